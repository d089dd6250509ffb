//! The static inline-command registry (spec.md §4.4).
//!
//! Generalizes `casparian_sentinel::control::ControlRequest`'s closed-enum
//! dispatch table into data: command names are runtime strings here, not an
//! enum, per spec.md §4.4's "registry is data" requirement (commands get
//! added/removed without a recompile of the match arms that *list* them,
//! even though handling them still goes through a match in
//! [`super::dispatcher`]).

/// Grouping used by `/help` and admin-scoping checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    General,
    Session,
    Cost,
    Admin,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub command: &'static str,
    pub description: &'static str,
    pub category: CommandCategory,
    pub help_description: Option<&'static str>,
}

/// Ordered command table (spec.md P6: the `TELEGRAM_COMMANDS` projection
/// must preserve this order).
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "ping",
        description: "Health check",
        category: CommandCategory::General,
        help_description: Some("Replies pong if the bot is alive"),
    },
    CommandSpec {
        command: "help",
        description: "List available commands",
        category: CommandCategory::General,
        help_description: None,
    },
    CommandSpec {
        command: "clear",
        description: "Clear this chat's session",
        category: CommandCategory::Session,
        help_description: None,
    },
    CommandSpec {
        command: "session",
        description: "Show session age and usage",
        category: CommandCategory::Session,
        help_description: None,
    },
    CommandSpec {
        command: "model",
        description: "Show the active model",
        category: CommandCategory::General,
        help_description: None,
    },
    CommandSpec {
        command: "status",
        description: "Show runtime and queue status",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "health",
        description: "Show component health",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "usage",
        description: "Show token usage",
        category: CommandCategory::Cost,
        help_description: None,
    },
    CommandSpec {
        command: "cost",
        description: "Show estimated spend",
        category: CommandCategory::Cost,
        help_description: None,
    },
    CommandSpec {
        command: "budget",
        description: "Show remaining budget",
        category: CommandCategory::Cost,
        help_description: None,
    },
    CommandSpec {
        command: "containers",
        description: "List active containers",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "queue",
        description: "Show queue depth and inflight work",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "errors",
        description: "Show recent errors",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "heartbeat",
        description: "Control the heartbeat loop",
        category: CommandCategory::Admin,
        help_description: Some("/heartbeat on|off|status"),
    },
    CommandSpec {
        command: "hbjob",
        description: "Manage heartbeat jobs",
        category: CommandCategory::Admin,
        help_description: Some("/hbjob add|list|label|prompt|interval|category|pause|resume|remove"),
    },
    CommandSpec {
        command: "kill",
        description: "Kill a running container",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "restart",
        description: "Restart the worker runtime",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "docker",
        description: "Show container runtime diagnostics",
        category: CommandCategory::Admin,
        help_description: None,
    },
    CommandSpec {
        command: "me",
        description: "Show the caller's identity",
        category: CommandCategory::General,
        help_description: None,
    },
    CommandSpec {
        command: "soul",
        description: "Show the assistant persona",
        category: CommandCategory::General,
        help_description: None,
    },
    CommandSpec {
        command: "start",
        description: "Start/greet in this chat",
        category: CommandCategory::General,
        help_description: None,
    },
    CommandSpec {
        command: "reset",
        description: "Reset this chat to defaults",
        category: CommandCategory::Session,
        help_description: None,
    },
    CommandSpec {
        command: "tgmedia",
        description: "List available media files",
        category: CommandCategory::General,
        help_description: None,
    },
    CommandSpec {
        command: "tgsendfile",
        description: "Send a workspace file as a document",
        category: CommandCategory::General,
        help_description: Some("/tgsendfile <rel> <caption>"),
    },
    CommandSpec {
        command: "tgsendphoto",
        description: "Send a workspace file as a photo",
        category: CommandCategory::General,
        help_description: Some("/tgsendphoto <rel> <caption>"),
    },
];

/// Validate the uniqueness/shape/non-empty-description invariants (spec.md
/// P6). Exposed so the binary can assert this at startup as well as in tests.
pub fn validate_registry() -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for spec in COMMANDS {
        if spec.description.is_empty() {
            return Err(format!("command {} has an empty description", spec.command));
        }
        if !is_valid_command_name(spec.command) {
            return Err(format!("command {} has an invalid name", spec.command));
        }
        if !seen.insert(spec.command) {
            return Err(format!("command {} is registered more than once", spec.command));
        }
    }
    Ok(())
}

fn is_valid_command_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn find(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.command == command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_passes_its_own_invariants() {
        validate_registry().unwrap();
    }

    #[test]
    fn find_is_case_sensitive_lowercase_lookup() {
        assert!(find("ping").is_some());
        assert!(find("PING").is_none());
    }
}
