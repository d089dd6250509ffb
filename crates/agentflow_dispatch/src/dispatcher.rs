//! `InlineDispatcher` — matches parsed slash commands against the static
//! registry and returns a reply or a structured action (spec.md §4.4).
//!
//! Generalizes `casparian_sentinel::control::ControlRequest`'s
//! match-based dispatch table to a runtime command registry: the registry
//! (`super::registry`) is data, but the *handling* of each command is still
//! a match here, same division of labor the teacher draws between
//! `ControlRequest`'s enum shape and `control.rs`'s dispatch body.

use agentflow_protocol::{OutboundPayload, SlashCommand};

use crate::registry::{self, CommandCategory};

/// Commands whose mutation must only be accepted from the `main` group
/// (spec.md §4.4, §4.7).
const MAIN_GROUP_ONLY: &[&str] = &["kill", "restart", "heartbeat", "hbjob"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatControl {
    On,
    Off,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HbJobMutation {
    Add {
        label: String,
        category: String,
        interval_minutes: u64,
        prompt: String,
    },
    List,
    Label { id: String, label: String },
    Prompt { id: String, prompt: String },
    Interval { id: String, minutes: u64 },
    Category { id: String, category: String },
    Pause { id: String },
    Resume { id: String },
    Remove { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Document,
}

/// A structured side-effect the caller (outside the core) must carry out —
/// everything here needs state InlineDispatcher does not own (spec.md §1:
/// Oracle/cost tracker/container runtime are external collaborators).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    KillContainer { target: Option<String> },
    RestartRuntime,
    ShowContainers,
    ShowDocker,
    ShowUsage,
    ShowCost,
    ShowBudget,
    ResetChat,
    ListMedia,
    HeartbeatControl(HeartbeatControl),
    HbJobMutation(HbJobMutation),
    SendMedia {
        kind: MediaKind,
        rel_path: String,
        caption: Option<String>,
    },
}

/// Result of dispatching one parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Reply(String),
    /// spec.md §4.4: "/clear → structured action {action: clear-session,
    /// reply: confirmation text}".
    ClearSession { reply: String },
    Action(AdminAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficLight {
    Green,
    Yellow,
    Red,
}

impl TrafficLight {
    pub fn from_context_usage_percent(pct: f64) -> Self {
        if pct < 50.0 {
            TrafficLight::Green
        } else if pct < 80.0 {
            TrafficLight::Yellow
        } else {
            TrafficLight::Red
        }
    }

    fn emoji(self) -> &'static str {
        match self {
            TrafficLight::Green => "🟢",
            TrafficLight::Yellow => "🟡",
            TrafficLight::Red => "🔴",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub age_seconds: i64,
    pub messages_today: u64,
    pub context_usage_percent: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub current_max: usize,
    pub base_max: usize,
    pub cpu_usage_percent: f64,
    pub memory_free_percent: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub active: usize,
}

/// Everything InlineDispatcher needs from the rest of the process to answer
/// read-only commands. Mutation commands are returned as [`AdminAction`]
/// instead, since their target state lives outside this crate.
pub trait DispatchContext {
    fn is_main_group(&self, group_folder: &str) -> bool;
    fn session_info(&self, chat_jid: &str) -> SessionInfo;
    fn resource_stats(&self) -> ResourceSnapshot;
    fn queue_stats(&self) -> QueueSnapshot;
    fn recent_errors(&self, limit: usize) -> Vec<String>;
    fn current_model(&self) -> String;
    fn persona(&self) -> String;
    fn identity(&self, chat_jid: &str, sender_name: &str) -> String;
}

pub struct InlineDispatcher;

impl InlineDispatcher {
    pub fn new() -> Self {
        registry::validate_registry().expect("command registry invariants must hold");
        Self
    }

    /// Render `/help`'s listing, hiding admin-only mutation commands unless
    /// `group_folder` is `main`.
    pub fn help_text(&self, group_folder: &str, ctx: &dyn DispatchContext) -> String {
        let is_main = ctx.is_main_group(group_folder);
        let mut lines = vec!["Available commands:".to_string()];
        for spec in registry::COMMANDS {
            if spec.category == CommandCategory::Admin
                && MAIN_GROUP_ONLY.contains(&spec.command)
                && !is_main
            {
                continue;
            }
            let detail = spec.help_description.unwrap_or(spec.description);
            lines.push(format!("/{} — {}", spec.command, detail));
        }
        lines.join("\n")
    }

    pub fn dispatch(
        &self,
        cmd: &SlashCommand,
        group_folder: &str,
        chat_jid: &str,
        sender_name: &str,
        ctx: &dyn DispatchContext,
    ) -> DispatchOutcome {
        let name = cmd.name.to_lowercase();

        let Some(spec) = registry::find(&name) else {
            return DispatchOutcome::Reply(unknown_command_reply());
        };

        if spec.category == CommandCategory::Admin
            && MAIN_GROUP_ONLY.contains(&spec.command)
            && !ctx.is_main_group(group_folder)
        {
            return DispatchOutcome::Reply("Only main group".to_string());
        }

        match spec.command {
            "ping" => DispatchOutcome::Reply("pong 🏓".to_string()),
            "help" => DispatchOutcome::Reply(self.help_text(group_folder, ctx)),
            "clear" => DispatchOutcome::ClearSession {
                reply: "Session cleared.".to_string(),
            },
            "reset" => DispatchOutcome::Action(AdminAction::ResetChat),
            "session" => DispatchOutcome::Reply(render_session_info(ctx.session_info(chat_jid))),
            "model" => DispatchOutcome::Reply(format!("Active model: {}", ctx.current_model())),
            "status" => DispatchOutcome::Reply(render_status(
                ctx.resource_stats(),
                ctx.queue_stats(),
            )),
            "health" => DispatchOutcome::Reply(render_status(
                ctx.resource_stats(),
                ctx.queue_stats(),
            )),
            "usage" => DispatchOutcome::Action(AdminAction::ShowUsage),
            "cost" => DispatchOutcome::Action(AdminAction::ShowCost),
            "budget" => DispatchOutcome::Action(AdminAction::ShowBudget),
            "containers" => DispatchOutcome::Action(AdminAction::ShowContainers),
            "queue" => DispatchOutcome::Reply(render_queue(ctx.queue_stats())),
            "errors" => DispatchOutcome::Reply(render_errors(ctx.recent_errors(20))),
            "heartbeat" => match parse_heartbeat_control(&cmd.args) {
                Some(control) => DispatchOutcome::Action(AdminAction::HeartbeatControl(control)),
                None => DispatchOutcome::Reply("usage: /heartbeat on|off|status".to_string()),
            },
            "hbjob" => match parse_hbjob_mutation(&cmd.args) {
                Ok(op) => DispatchOutcome::Action(AdminAction::HbJobMutation(op)),
                Err(reply) => DispatchOutcome::Reply(reply),
            },
            "kill" => DispatchOutcome::Action(AdminAction::KillContainer {
                target: cmd.args.first().cloned(),
            }),
            "restart" => DispatchOutcome::Action(AdminAction::RestartRuntime),
            "docker" => DispatchOutcome::Action(AdminAction::ShowDocker),
            "me" => DispatchOutcome::Reply(ctx.identity(chat_jid, sender_name)),
            "soul" => DispatchOutcome::Reply(ctx.persona()),
            "start" => DispatchOutcome::Reply(
                "Hi! Send me a message or try /help to see what I can do.".to_string(),
            ),
            "tgmedia" => DispatchOutcome::Action(AdminAction::ListMedia),
            "tgsendfile" => match parse_send_media(&cmd.args) {
                Some((rel_path, caption)) => DispatchOutcome::Action(AdminAction::SendMedia {
                    kind: MediaKind::Document,
                    rel_path,
                    caption,
                }),
                None => DispatchOutcome::Reply("usage: /tgsendfile <rel> <caption>".to_string()),
            },
            "tgsendphoto" => match parse_send_media(&cmd.args) {
                Some((rel_path, caption)) => DispatchOutcome::Action(AdminAction::SendMedia {
                    kind: MediaKind::Photo,
                    rel_path,
                    caption,
                }),
                None => DispatchOutcome::Reply("usage: /tgsendphoto <rel> <caption>".to_string()),
            },
            _ => DispatchOutcome::Reply(unknown_command_reply()),
        }
    }
}

impl Default for InlineDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_command_reply() -> String {
    "ไม่รู้จักคำสั่ง ลองพิมพ์ /help เพื่อดูคำสั่งที่ใช้ได้".to_string()
}

fn render_session_info(info: SessionInfo) -> String {
    let light = TrafficLight::from_context_usage_percent(info.context_usage_percent);
    format!(
        "Session age: {}s\nMessages today: {}\nContext usage: {:.0}% {}",
        info.age_seconds,
        info.messages_today,
        info.context_usage_percent,
        light.emoji()
    )
}

fn render_status(resources: ResourceSnapshot, queue: QueueSnapshot) -> String {
    format!(
        "max workers: {}/{}\ncpu: {:.0}%\nmem free: {:.0}%\nqueue depth: {}\nactive: {}",
        resources.current_max,
        resources.base_max,
        resources.cpu_usage_percent,
        resources.memory_free_percent,
        queue.depth,
        queue.active
    )
}

fn render_queue(queue: QueueSnapshot) -> String {
    format!("queue depth: {}, active: {}", queue.depth, queue.active)
}

fn render_errors(errors: Vec<String>) -> String {
    if errors.is_empty() {
        "No recent errors.".to_string()
    } else {
        format!("Recent errors:\n{}", errors.join("\n"))
    }
}

fn parse_heartbeat_control(args: &[String]) -> Option<HeartbeatControl> {
    match args.first().map(String::as_str) {
        Some("on") => Some(HeartbeatControl::On),
        Some("off") => Some(HeartbeatControl::Off),
        Some("status") => Some(HeartbeatControl::Status),
        _ => None,
    }
}

fn parse_hbjob_mutation(args: &[String]) -> Result<HbJobMutation, String> {
    let Some(sub) = args.first() else {
        return Err("usage: /hbjob add|list|label|prompt|interval|category|pause|resume|remove".to_string());
    };

    match sub.as_str() {
        "list" => Ok(HbJobMutation::List),
        "add" => {
            let payload = args[1..].join(" ");
            let mut parts = payload.splitn(4, '|');
            let label = parts.next().unwrap_or_default().trim().to_string();
            let category = parts.next().unwrap_or_default().trim().to_string();
            let interval_minutes: u64 = parts
                .next()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| "usage: /hbjob add label|category|intervalMinutes|prompt".to_string())?;
            let prompt = parts.next().unwrap_or_default().trim().to_string();
            if label.is_empty() || category.is_empty() || prompt.is_empty() {
                return Err("usage: /hbjob add label|category|intervalMinutes|prompt".to_string());
            }
            Ok(HbJobMutation::Add {
                label,
                category,
                interval_minutes,
                prompt,
            })
        }
        "label" | "prompt" | "category" => {
            let id = args.get(1).cloned().ok_or("missing job id")?;
            let value = args[2..].join(" ");
            if value.is_empty() {
                return Err(format!("usage: /hbjob {sub} <id> <value>"));
            }
            Ok(match sub.as_str() {
                "label" => HbJobMutation::Label { id, label: value },
                "prompt" => HbJobMutation::Prompt { id, prompt: value },
                _ => HbJobMutation::Category { id, category: value },
            })
        }
        "interval" => {
            let id = args.get(1).cloned().ok_or("missing job id")?;
            let minutes: u64 = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .ok_or("usage: /hbjob interval <id> <minutes>")?;
            Ok(HbJobMutation::Interval { id, minutes })
        }
        "pause" => Ok(HbJobMutation::Pause {
            id: args.get(1).cloned().ok_or("missing job id")?,
        }),
        "resume" => Ok(HbJobMutation::Resume {
            id: args.get(1).cloned().ok_or("missing job id")?,
        }),
        "remove" => Ok(HbJobMutation::Remove {
            id: args.get(1).cloned().ok_or("missing job id")?,
        }),
        other => Err(format!("unknown /hbjob subcommand: {other}")),
    }
}

fn parse_send_media(args: &[String]) -> Option<(String, Option<String>)> {
    let rel_path = args.first()?.clone();
    let caption = if args.len() > 1 {
        Some(args[1..].join(" "))
    } else {
        None
    };
    Some((rel_path, caption))
}

/// Converts a dispatcher [`AdminAction::SendMedia`] into the wire
/// [`OutboundPayload`] shape consumed by a channel adapter.
pub fn media_action_to_payload(kind: MediaKind, file_path: String, caption: Option<String>) -> OutboundPayload {
    match kind {
        MediaKind::Photo => OutboundPayload::Photo { file_path, caption },
        MediaKind::Document => OutboundPayload::Document {
            file_path,
            caption,
            file_name: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCtx {
        main: bool,
    }

    impl DispatchContext for FakeCtx {
        fn is_main_group(&self, group_folder: &str) -> bool {
            self.main && group_folder == "main"
        }
        fn session_info(&self, _chat_jid: &str) -> SessionInfo {
            SessionInfo {
                age_seconds: 120,
                messages_today: 4,
                context_usage_percent: 42.0,
            }
        }
        fn resource_stats(&self) -> ResourceSnapshot {
            ResourceSnapshot {
                current_max: 4,
                base_max: 5,
                cpu_usage_percent: 30.0,
                memory_free_percent: 60.0,
            }
        }
        fn queue_stats(&self) -> QueueSnapshot {
            QueueSnapshot { depth: 2, active: 1 }
        }
        fn recent_errors(&self, _limit: usize) -> Vec<String> {
            vec![]
        }
        fn current_model(&self) -> String {
            "sonnet".to_string()
        }
        fn persona(&self) -> String {
            "assistant".to_string()
        }
        fn identity(&self, chat_jid: &str, sender_name: &str) -> String {
            format!("{sender_name} in {chat_jid}")
        }
    }

    #[test]
    fn ping_replies_with_pong() {
        let dispatcher = InlineDispatcher::new();
        let cmd = SlashCommand::parse("/ping").unwrap();
        let ctx = FakeCtx { main: true };
        let out = dispatcher.dispatch(&cmd, "main", "123@g.us", "alice", &ctx);
        assert_eq!(out, DispatchOutcome::Reply("pong 🏓".to_string()));
    }

    #[test]
    fn unknown_command_never_reaches_a_worker() {
        let dispatcher = InlineDispatcher::new();
        let cmd = SlashCommand::parse("/not_a_real_command").unwrap();
        let ctx = FakeCtx { main: true };
        let out = dispatcher.dispatch(&cmd, "main", "123@g.us", "alice", &ctx);
        match out {
            DispatchOutcome::Reply(text) => {
                assert!(text.contains("ไม่รู้จักคำสั่ง"));
                assert!(text.contains("/help"));
            }
            _ => panic!("unknown command must reply, not act"),
        }
    }

    #[test]
    fn clear_produces_clear_session_action_with_confirmation() {
        let dispatcher = InlineDispatcher::new();
        let cmd = SlashCommand::parse("/clear").unwrap();
        let ctx = FakeCtx { main: true };
        let out = dispatcher.dispatch(&cmd, "main", "123@g.us", "alice", &ctx);
        assert_eq!(
            out,
            DispatchOutcome::ClearSession {
                reply: "Session cleared.".to_string()
            }
        );
    }

    #[test]
    fn admin_mutation_outside_main_group_is_rejected() {
        let dispatcher = InlineDispatcher::new();
        let cmd = SlashCommand::parse("/kill worker1").unwrap();
        let ctx = FakeCtx { main: true };
        let out = dispatcher.dispatch(&cmd, "side-group", "123@g.us", "alice", &ctx);
        assert_eq!(out, DispatchOutcome::Reply("Only main group".to_string()));
    }

    #[test]
    fn admin_mutation_inside_main_group_is_allowed() {
        let dispatcher = InlineDispatcher::new();
        let cmd = SlashCommand::parse("/kill worker1").unwrap();
        let ctx = FakeCtx { main: true };
        let out = dispatcher.dispatch(&cmd, "main", "123@g.us", "alice", &ctx);
        assert_eq!(
            out,
            DispatchOutcome::Action(AdminAction::KillContainer {
                target: Some("worker1".to_string())
            })
        );
    }

    #[test]
    fn hbjob_add_parses_pipe_separated_payload() {
        let dispatcher = InlineDispatcher::new();
        let cmd = SlashCommand::parse("/hbjob add Disk check|monitor|30|Check free disk space").unwrap();
        let ctx = FakeCtx { main: true };
        let out = dispatcher.dispatch(&cmd, "main", "123@g.us", "alice", &ctx);
        assert_eq!(
            out,
            DispatchOutcome::Action(AdminAction::HbJobMutation(HbJobMutation::Add {
                label: "Disk check".to_string(),
                category: "monitor".to_string(),
                interval_minutes: 30,
                prompt: "Check free disk space".to_string(),
            }))
        );
    }

    #[test]
    fn session_reply_includes_traffic_light() {
        let dispatcher = InlineDispatcher::new();
        let cmd = SlashCommand::parse("/session").unwrap();
        let ctx = FakeCtx { main: true };
        let out = dispatcher.dispatch(&cmd, "main", "123@g.us", "alice", &ctx);
        match out {
            DispatchOutcome::Reply(text) => assert!(text.contains("🟡")),
            _ => panic!("expected a reply"),
        }
    }
}
