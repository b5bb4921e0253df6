//! Bridge lifecycle states.
//!
//! ```text
//! Stopped → Starting → Initializing → Ready → Stopping → Stopped
//!              └──────────┴────────────┴────────┴──→ Failed (terminal)
//! ```

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Stopped,
    Starting,
    Initializing,
    Ready,
    Stopping,
    Failed,
}

impl BridgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeState::Stopped => "stopped",
            BridgeState::Starting => "starting",
            BridgeState::Initializing => "initializing",
            BridgeState::Ready => "ready",
            BridgeState::Stopping => "stopping",
            BridgeState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == BridgeState::Failed
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Initializing)
                | (Initializing, Ready)
                | (Ready, Stopping)
                | (Stopping, Stopped)
                | (Starting | Initializing | Ready | Stopping, Failed)
        )
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::BridgeState::*;
    use super::*;

    #[test]
    fn happy_path_edges() {
        let path = [Stopped, Starting, Initializing, Ready, Stopping, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn failed_is_terminal() {
        assert!(Failed.is_terminal());
        for next in [Stopped, Starting, Initializing, Ready, Stopping, Failed] {
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn no_shortcuts() {
        assert!(!Stopped.can_transition_to(Ready));
        assert!(!Starting.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Failed));
    }
}
