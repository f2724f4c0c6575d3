//! Composing (typing indicator) state machine, RFC 3994 style.
//!
//! One machine per leg. It is pure: the owning leg arms and cancels the
//! refresh timer according to the returned [`ComposingTransition`] and pushes
//! a roster update whenever the state changes.
//!
//! ```text
//!            status=active (arm refresh)
//!   idle ─────────────────────────────────▶ active
//!    ▲                                        │ status=active → rearm only
//!    └────────────────────────────────────────┘
//!      status=idle | refresh expired | chat sent
//! ```

use crate::config::Config;
use std::fmt;
use std::time::Duration;

/// Composing state of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeState {
    #[default]
    Idle,
    Active,
}

impl ComposeState {
    /// Wire representation used in `isComposing` documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ComposeState::Idle => "idle",
            ComposeState::Active => "active",
        }
    }

    /// Parse a wire value. Anything other than `active` is idle.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("active") {
            ComposeState::Active
        } else {
            ComposeState::Idle
        }
    }
}

impl fmt::Display for ComposeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp policy for refresh periods announced by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub default: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl RefreshPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            default: Duration::from_secs(config.composing_default_refresh_seconds),
            min: Duration::from_secs(config.composing_min_refresh_seconds),
            max: Duration::from_secs(config.composing_max_refresh_seconds),
        }
    }

    /// Normalize a refresh value in seconds. Missing or zero means default.
    #[must_use]
    pub fn normalize(&self, refresh_seconds: Option<u64>) -> Duration {
        match refresh_seconds {
            None | Some(0) => self.default,
            Some(secs) => Duration::from_secs(secs).max(self.min).min(self.max),
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the owning leg must do after feeding an event to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposingTransition {
    /// Nothing changed, nothing to arm.
    Unchanged,
    /// Same active state: rearm the refresh timer, no roster broadcast.
    Rearm(Duration),
    /// State changed: broadcast the roster, then arm (`Some`) or cancel (`None`).
    Changed {
        state: ComposeState,
        refresh: Option<Duration>,
    },
}

#[derive(Debug, Clone)]
pub struct ComposingStateMachine {
    state: ComposeState,
    policy: RefreshPolicy,
}

impl ComposingStateMachine {
    #[must_use]
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            state: ComposeState::Idle,
            policy,
        }
    }

    #[must_use]
    pub fn state(&self) -> ComposeState {
        self.state
    }

    /// Handle an inbound status update.
    pub fn on_status_update(
        &mut self,
        state: ComposeState,
        refresh_seconds: Option<u64>,
    ) -> ComposingTransition {
        match (self.state, state) {
            (ComposeState::Idle, ComposeState::Idle) => ComposingTransition::Unchanged,
            (ComposeState::Idle, ComposeState::Active) => {
                self.state = ComposeState::Active;
                ComposingTransition::Changed {
                    state: ComposeState::Active,
                    refresh: Some(self.policy.normalize(refresh_seconds)),
                }
            }
            (ComposeState::Active, ComposeState::Active) => {
                ComposingTransition::Rearm(self.policy.normalize(refresh_seconds))
            }
            (ComposeState::Active, ComposeState::Idle) => {
                self.state = ComposeState::Idle;
                ComposingTransition::Changed {
                    state: ComposeState::Idle,
                    refresh: None,
                }
            }
        }
    }

    /// Refresh timer expired. Returns true if the state dropped to idle.
    pub fn on_refresh_expired(&mut self) -> bool {
        self.end_active()
    }

    /// A chat message was sent: the participant is no longer typing.
    /// Returns true if the state dropped to idle.
    pub fn end_active(&mut self) -> bool {
        if self.state == ComposeState::Active {
            self.state = ComposeState::Idle;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn machine() -> ComposingStateMachine {
        ComposingStateMachine::new(RefreshPolicy::default())
    }

    #[test]
    fn test_refresh_normalization() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.normalize(None), Duration::from_secs(120));
        assert_eq!(policy.normalize(Some(0)), Duration::from_secs(120));
        assert_eq!(policy.normalize(Some(5)), Duration::from_secs(60));
        assert_eq!(policy.normalize(Some(90)), Duration::from_secs(90));
        assert_eq!(policy.normalize(Some(7200)), Duration::from_secs(3600));
    }

    #[test]
    fn test_idle_to_active_arms_timer() {
        let mut m = machine();
        let t = m.on_status_update(ComposeState::Active, Some(90));
        assert_eq!(
            t,
            ComposingTransition::Changed {
                state: ComposeState::Active,
                refresh: Some(Duration::from_secs(90)),
            }
        );
        assert_eq!(m.state(), ComposeState::Active);
    }

    #[test]
    fn test_idle_update_while_idle_is_ignored() {
        let mut m = machine();
        assert_eq!(
            m.on_status_update(ComposeState::Idle, None),
            ComposingTransition::Unchanged
        );
    }

    #[test]
    fn test_repeated_active_only_rearms() {
        let mut m = machine();
        m.on_status_update(ComposeState::Active, None);

        for _ in 0..5 {
            let t = m.on_status_update(ComposeState::Active, Some(0));
            assert_eq!(t, ComposingTransition::Rearm(Duration::from_secs(120)));
            assert_eq!(m.state(), ComposeState::Active);
        }
    }

    #[test]
    fn test_active_to_idle_cancels_timer() {
        let mut m = machine();
        m.on_status_update(ComposeState::Active, None);
        let t = m.on_status_update(ComposeState::Idle, None);
        assert_eq!(
            t,
            ComposingTransition::Changed {
                state: ComposeState::Idle,
                refresh: None,
            }
        );
    }

    #[test]
    fn test_refresh_expiry_and_chat_reset_to_idle() {
        let mut m = machine();
        assert!(!m.on_refresh_expired());

        m.on_status_update(ComposeState::Active, None);
        assert!(m.on_refresh_expired());
        assert_eq!(m.state(), ComposeState::Idle);

        m.on_status_update(ComposeState::Active, None);
        assert!(m.end_active());
        assert!(!m.end_active());
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(ComposeState::from_wire("active"), ComposeState::Active);
        assert_eq!(ComposeState::from_wire(" Active "), ComposeState::Active);
        assert_eq!(ComposeState::from_wire("idle"), ComposeState::Idle);
        assert_eq!(ComposeState::from_wire("typing"), ComposeState::Idle);
        assert_eq!(ComposeState::Active.to_string(), "active");
    }
}
