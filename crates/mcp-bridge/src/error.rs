use crate::protocol::JsonRpcError;
use crate::state::BridgeState;

/// Errors surfaced by the bridge and its correlator.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to spawn provider `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("provider I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("initialize rejected by provider: {0}")]
    Handshake(JsonRpcError),

    #[error("{0}")]
    Rpc(JsonRpcError),

    #[error("`{method}` timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("bridge terminated")]
    Terminated,

    #[error("provider process exited unexpectedly")]
    ProviderTerminated,

    #[error("bridge is not ready (state: {state})")]
    NotReady { state: BridgeState },

    #[error("cannot {op} a bridge in state {state}")]
    InvalidState {
        op: &'static str,
        state: BridgeState,
    },

    #[error("provider tool reported an error: {0}")]
    ToolReported(String),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// The bridge went away underneath the caller (stop or child exit).
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            BridgeError::Terminated | BridgeError::ProviderTerminated
        )
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, BridgeError::NotReady { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers() {
        let timeout = BridgeError::Timeout {
            method: "tools/call".into(),
            timeout_ms: 50,
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_terminated());
        assert_eq!(timeout.to_string(), "`tools/call` timed out after 50ms");

        assert!(BridgeError::Terminated.is_terminated());
        assert!(BridgeError::ProviderTerminated.is_terminated());

        let not_ready = BridgeError::NotReady {
            state: BridgeState::Stopped,
        };
        assert!(not_ready.is_not_ready());
        assert_eq!(not_ready.to_string(), "bridge is not ready (state: stopped)");
    }
}
