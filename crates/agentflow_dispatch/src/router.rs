//! `QueryRouter::classify_query` — cheap, deterministic inbound-message
//! triage (spec.md §4.5).

/// The routing decision for an inbound chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Inline,
    Oracle,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tier: Tier,
    pub reason: &'static str,
}

/// Knowledge-query prefixes that route to the Oracle tier, keyed by the
/// language they belong to (spec.md §4.5 rule 2: "configured languages").
const ORACLE_PREFIXES: &[(&str, &str)] = &[
    ("search", "oracle-search"),
    ("remember", "oracle-remember"),
    ("recall", "oracle-recall"),
    ("ค้นหา", "oracle-search-th"),
    ("จำ", "oracle-remember-th"),
];

/// Classifies inbound message text into {inline, oracle, worker}.
///
/// Order matters (spec.md §4.5): an admin-command shape always wins, even if
/// the command is unknown — that's the fast failure path through
/// `InlineDispatcher` rather than a trip through the worker.
pub fn classify_query(text: &str) -> Classification {
    if looks_like_slash_command(text) {
        return Classification {
            tier: Tier::Inline,
            reason: "admin-cmd",
        };
    }

    let lower = text.trim().to_lowercase();
    for (prefix, reason) in ORACLE_PREFIXES {
        if lower.starts_with(prefix) {
            return Classification {
                tier: Tier::Oracle,
                reason,
            };
        }
    }

    Classification {
        tier: Tier::Worker,
        reason: "default",
    }
}

/// `^/[a-z0-9_]{1,32}(?:@[a-z0-9_]{3,})?\b` (case-insensitive), spec.md §4.5.
fn looks_like_slash_command(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('/') else {
        return false;
    };

    let name_end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if !(1..=32).contains(&name_end) {
        return false;
    }

    let after_name = &rest[name_end..];
    if let Some(mention) = after_name.strip_prefix('@') {
        let mention_end = mention
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(mention.len());
        mention_end >= 3
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_command_shape_wins_even_when_unknown() {
        let c = classify_query("/not_exists");
        assert_eq!(c.tier, Tier::Inline);
        assert_eq!(c.reason, "admin-cmd");
    }

    #[test]
    fn admin_command_with_bot_mention_still_classifies_inline() {
        let c = classify_query("/help@my_bot now");
        assert_eq!(c.tier, Tier::Inline);
    }

    #[test]
    fn short_bot_mention_is_not_a_valid_command_shape() {
        // mention must be 3+ chars; "ab" is too short, so this is not
        // recognized as the slash-command shape and falls through.
        let c = classify_query("/help@ab");
        assert_eq!(c.tier, Tier::Worker);
    }

    #[test]
    fn oracle_prefixes_route_to_oracle() {
        assert_eq!(classify_query("search for the invoice").tier, Tier::Oracle);
        assert_eq!(classify_query("remember this address").tier, Tier::Oracle);
        assert_eq!(classify_query("recall what I said").tier, Tier::Oracle);
    }

    #[test]
    fn everything_else_routes_to_worker() {
        let c = classify_query("what's the weather like today?");
        assert_eq!(c.tier, Tier::Worker);
        assert_eq!(c.reason, "default");
    }
}
