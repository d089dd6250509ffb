//! Process-wide mutable heartbeat configuration (spec.md §4.7).
//!
//! `patch_config`'s "clamp invalid values to previous" rule is the teacher's
//! `casparian_sentinel::sentinel` constant-guard idiom
//! (`DEFAULT_MAX_WORKERS`/`HARD_MAX_WORKERS` clamped into range) applied to a
//! whole config struct instead of one field.

use serde::{Deserialize, Serialize};

/// invariants enforced by [`HeartbeatConfig::apply_patch`].
pub const MIN_INTERVAL_MS: u64 = 60_000;
pub const MIN_SILENCE_THRESHOLD_MS: u64 = 60_000;
pub const MIN_ESCALATE_AFTER_ERRORS: u32 = 1;
pub const ACK_MAX_CHARS_RANGE: (usize, usize) = (50, 4_000);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub silence_threshold_ms: u64,
    pub main_chat_jid: String,
    pub escalate_after_errors: u32,
    pub show_ok: bool,
    pub show_alerts: bool,
    pub use_indicator: bool,
    pub delivery_muted: bool,
    pub alert_repeat_cooldown_ms: u64,
    pub heartbeat_prompt: String,
    pub ack_max_chars: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: MIN_INTERVAL_MS,
            silence_threshold_ms: 300_000,
            main_chat_jid: String::new(),
            escalate_after_errors: 3,
            show_ok: true,
            show_alerts: true,
            use_indicator: true,
            delivery_muted: false,
            alert_repeat_cooldown_ms: 600_000,
            heartbeat_prompt: "Report anything out of the ordinary.".to_string(),
            ack_max_chars: 500,
        }
    }
}

/// A partial update to [`HeartbeatConfig`]; unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfigPatch {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
    pub silence_threshold_ms: Option<u64>,
    pub main_chat_jid: Option<String>,
    pub escalate_after_errors: Option<u32>,
    pub show_ok: Option<bool>,
    pub show_alerts: Option<bool>,
    pub use_indicator: Option<bool>,
    pub delivery_muted: Option<bool>,
    pub alert_repeat_cooldown_ms: Option<u64>,
    pub heartbeat_prompt: Option<String>,
    pub ack_max_chars: Option<usize>,
}

impl HeartbeatConfig {
    /// Applies `patch`, reverting any individually invalid field back to its
    /// previous value (spec.md §4.7 "clamps invalid values to previous").
    /// Returns the new config and whether any field's effective value changed
    /// (callers use this to decide whether to fire restart-timer callbacks).
    pub fn apply_patch(&self, patch: HeartbeatConfigPatch) -> (Self, bool) {
        let mut next = self.clone();

        if let Some(v) = patch.enabled {
            next.enabled = v;
        }
        if let Some(v) = patch.interval_ms {
            if v >= MIN_INTERVAL_MS {
                next.interval_ms = v;
            }
        }
        if let Some(v) = patch.silence_threshold_ms {
            if v >= MIN_SILENCE_THRESHOLD_MS {
                next.silence_threshold_ms = v;
            }
        }
        if let Some(v) = patch.main_chat_jid {
            if !v.is_empty() {
                next.main_chat_jid = v;
            }
        }
        if let Some(v) = patch.escalate_after_errors {
            if v >= MIN_ESCALATE_AFTER_ERRORS {
                next.escalate_after_errors = v;
            }
        }
        if let Some(v) = patch.show_ok {
            next.show_ok = v;
        }
        if let Some(v) = patch.show_alerts {
            next.show_alerts = v;
        }
        if let Some(v) = patch.use_indicator {
            next.use_indicator = v;
        }
        if let Some(v) = patch.delivery_muted {
            next.delivery_muted = v;
        }
        if let Some(v) = patch.alert_repeat_cooldown_ms {
            next.alert_repeat_cooldown_ms = v;
        }
        if let Some(v) = patch.heartbeat_prompt {
            if !v.is_empty() {
                next.heartbeat_prompt = v;
            }
        }
        if let Some(v) = patch.ack_max_chars {
            if v >= ACK_MAX_CHARS_RANGE.0 && v <= ACK_MAX_CHARS_RANGE.1 {
                next.ack_max_chars = v;
            }
        }

        let changed = next != *self;
        (next, changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_interval_reverts_to_previous_value() {
        let config = HeartbeatConfig::default();
        let (patched, changed) = config.apply_patch(HeartbeatConfigPatch {
            interval_ms: Some(1_000),
            ..Default::default()
        });
        assert_eq!(patched.interval_ms, config.interval_ms);
        assert!(!changed);
    }

    #[test]
    fn valid_patch_applies_and_reports_change() {
        let config = HeartbeatConfig::default();
        let (patched, changed) = config.apply_patch(HeartbeatConfigPatch {
            interval_ms: Some(120_000),
            show_ok: Some(false),
            ..Default::default()
        });
        assert_eq!(patched.interval_ms, 120_000);
        assert!(!patched.show_ok);
        assert!(changed);
    }

    #[test]
    fn ack_max_chars_out_of_range_is_rejected() {
        let config = HeartbeatConfig::default();
        let (patched, _) = config.apply_patch(HeartbeatConfigPatch {
            ack_max_chars: Some(10),
            ..Default::default()
        });
        assert_eq!(patched.ack_max_chars, config.ack_max_chars);

        let (patched, _) = config.apply_patch(HeartbeatConfigPatch {
            ack_max_chars: Some(5_000),
            ..Default::default()
        });
        assert_eq!(patched.ack_max_chars, config.ack_max_chars);
    }
}
