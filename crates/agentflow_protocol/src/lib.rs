//! Wire types and the slash-command grammar shared by every agentflow crate.
//!
//! Inbound chat content that starts with `/` is parsed here into a
//! [`SlashCommand`] before anything else touches it — the same "parse the
//! envelope once, pass a typed value everywhere else" role
//! `casparian_protocol`'s `Header`/`Message` pair played for the wire
//! protocol.

pub mod error;
pub mod types;

pub use error::{NotFoundError, ValidationError};
pub use types::{
    claim_sentinel, ContainerConfig, ContainerEventStatus, ContainerOutput, ContextMode, Group,
    HeartbeatJob, HeartbeatJobCategory, HeartbeatJobId, HeartbeatJobLog, HeartbeatJobStatus, Jid,
    NewMessage, OutboundPayload, ScheduleType, ScheduledTask, TaskId, TaskIdError, TaskRunLog,
    TaskStatus, WorkerRequest, CLAIM_SENTINEL,
};

/// A parsed `/command arg1 arg2...` chat message (spec.md §4.4, §6).
///
/// Grammar: `/` name `[@bot]` then whitespace-separated args, e.g.
/// `/task list` or `/hbjob pause 3fa8`. Hand-written scan, no `regex` — the
/// grammar is a fixed-prefix token split, same call the teacher makes for
/// `casparian_protocol::naming`'s identifier validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: String,
    pub mention: Option<String>,
    pub args: Vec<String>,
}

impl SlashCommand {
    /// Returns `None` when `text` isn't a slash command at all (doesn't start
    /// with `/`, or the `/` is followed directly by whitespace or nothing).
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix('/')?;
        let mut words = rest.split_whitespace();
        let head = words.next()?;
        if head.is_empty() {
            return None;
        }

        let (name, mention) = match head.split_once('@') {
            Some((name, bot)) if !name.is_empty() && !bot.is_empty() => {
                (name.to_string(), Some(bot.to_string()))
            }
            _ => (head.to_string(), None),
        };

        Some(SlashCommand {
            name,
            mention,
            args: words.map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_command() {
        let cmd = SlashCommand::parse("/status").unwrap();
        assert_eq!(cmd.name, "status");
        assert!(cmd.mention.is_none());
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn parses_command_with_args_and_mention() {
        let cmd = SlashCommand::parse("/hbjob@agentflow pause 3fa8").unwrap();
        assert_eq!(cmd.name, "hbjob");
        assert_eq!(cmd.mention.as_deref(), Some("agentflow"));
        assert_eq!(cmd.args, vec!["pause", "3fa8"]);
    }

    #[test]
    fn rejects_non_commands() {
        assert!(SlashCommand::parse("hello").is_none());
        assert!(SlashCommand::parse("/ leading space only").is_none());
        assert!(SlashCommand::parse("/").is_none());
        assert!(SlashCommand::parse("").is_none());
    }

    #[test]
    fn collapses_repeated_whitespace_between_args() {
        let cmd = SlashCommand::parse("/task   list   mine").unwrap();
        assert_eq!(cmd.args, vec!["list", "mine"]);
    }
}
