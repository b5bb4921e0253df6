//! Request/response correlation for one provider connection.
//!
//! Ids come from a single counter that starts at 1 and is never reset, so
//! they stay unique across restarts of the same bridge.  Every pending
//! entry is resolved exactly once: by its response, by its timeout, or by
//! [`Correlator::close`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::FrameWriter;
use crate::error::BridgeError;
use crate::protocol::{Inbound, JsonRpcNotification, JsonRpcRequest};

/// Why the correlator stopped accepting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `stop()` or a failed start.
    Stopped,
    /// The provider process exited on its own.
    ProviderExited,
}

impl CloseReason {
    fn to_error(self) -> BridgeError {
        match self {
            CloseReason::Stopped => BridgeError::Terminated,
            CloseReason::ProviderExited => BridgeError::ProviderTerminated,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending request table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingRequest {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Result<Value, BridgeError>>,
}

struct PendingTable {
    /// Closed tables reject new entries with `closed_reason`.
    open: bool,
    closed_reason: CloseReason,
    entries: HashMap<u64, PendingRequest>,
}

/// Removes its entry on drop, so a caller that times out, fails to write,
/// or is cancelled never leaves a stale entry behind.
struct PendingGuard<'a> {
    table: &'a Mutex<PendingTable>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.lock().entries.remove(&self.id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Correlator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Correlator {
    provider: String,
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
    writer: tokio::sync::Mutex<Option<FrameWriter>>,
    default_timeout: Duration,
}

impl Correlator {
    /// A closed correlator with no writer attached.
    pub fn new(provider: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            provider: provider.into(),
            next_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable {
                open: false,
                closed_reason: CloseReason::Stopped,
                entries: HashMap::new(),
            }),
            writer: tokio::sync::Mutex::new(None),
            default_timeout,
        }
    }

    /// Install the provider's stdin, replacing any previous writer.
    pub async fn attach(&self, writer: FrameWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Drop the writer, closing the provider's stdin.
    ///
    /// Waits for any write in progress to release the writer.
    pub async fn detach(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await;
        }
    }

    /// Start accepting requests.
    pub fn open(&self) {
        self.table.lock().open = true;
    }

    /// Stop accepting requests and reject everything still pending.
    ///
    /// Returns the number of requests rejected.
    pub fn close(&self, reason: CloseReason) -> usize {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut table = self.table.lock();
            table.open = false;
            table.closed_reason = reason;
            table.entries.drain().collect()
        };

        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(
                provider = %self.provider,
                id,
                method = %pending.method,
                age_ms = pending.created_at.elapsed().as_millis() as u64,
                "rejecting pending request"
            );
            let _ = pending.tx.send(Err(reason.to_error()));
        }

        if count > 0 {
            tracing::warn!(
                provider = %self.provider,
                failed_requests = count,
                reason = ?reason,
                "failed in-flight provider requests"
            );
        }
        count
    }

    pub fn is_open(&self) -> bool {
        self.table.lock().open
    }

    fn closed_error(&self) -> Option<BridgeError> {
        let table = self.table.lock();
        (!table.open).then(|| table.closed_reason.to_error())
    }

    /// Send a request and wait for its response with the default timeout.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, BridgeError> {
        self.send_with_timeout(method, params, self.default_timeout)
            .await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = self.table.lock();
            if !table.open {
                return Err(table.closed_reason.to_error());
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let prev = table.entries.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    created_at: Instant::now(),
                    tx,
                },
            );
            debug_assert!(prev.is_none(), "request id reused: {id}");
            id
        };
        let _guard = PendingGuard {
            table: &self.table,
            id,
        };

        let request = JsonRpcRequest::new(id, method, params);
        // One deadline covers the writer lock, the write and the response:
        // a provider that stops reading stdin cannot park the caller.
        let exchange = async {
            {
                let mut writer = self.writer.lock().await;
                let writer = writer.as_mut().ok_or(BridgeError::Terminated)?;
                tracing::debug!(provider = %self.provider, id, method, "sending provider request");
                if let Err(e) = writer.write_frame(&request).await {
                    // A write cut short by stop or exit reports that instead.
                    return Err(self.closed_error().unwrap_or(e));
                }
            }
            // Sender dropped without a verdict: the table was torn down.
            rx.await.unwrap_or(Err(BridgeError::Terminated))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    provider = %self.provider,
                    id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "provider request timed out"
                );
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire-and-forget notification.  No id, no pending entry.
    ///
    /// The write is bounded by the default timeout.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BridgeError> {
        if !self.is_open() {
            return Err(self.table.lock().closed_reason.to_error());
        }
        let notification = JsonRpcNotification::new(method, params);
        let write = async {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(BridgeError::Terminated)?;
            tracing::debug!(provider = %self.provider, method, "sending provider notification");
            writer.write_frame(&notification).await
        };
        tokio::time::timeout(self.default_timeout, write)
            .await
            .unwrap_or_else(|_| {
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                    timeout_ms: self.default_timeout.as_millis() as u64,
                })
            })
    }

    /// Route one inbound protocol frame.
    pub fn handle_message(&self, message: Value) {
        match Inbound::classify(message) {
            Inbound::Response(resp) => {
                let Some(id) = resp.request_id() else {
                    tracing::warn!(provider = %self.provider, id = %resp.id, "response with unusable id");
                    return;
                };
                let pending = self.table.lock().entries.remove(&id);
                match pending {
                    Some(pending) => {
                        let outcome = resp.into_result().map_err(BridgeError::Rpc);
                        let _ = pending.tx.send(outcome);
                    }
                    None => {
                        tracing::warn!(
                            provider = %self.provider,
                            id,
                            "received response for unknown request"
                        );
                    }
                }
            }
            Inbound::ServerMessage { method, id } => {
                tracing::debug!(
                    provider = %self.provider,
                    method = %method,
                    has_id = id.is_some(),
                    "ignoring provider-initiated message"
                );
            }
            Inbound::Unrecognized(value) => {
                tracing::debug!(provider = %self.provider, frame = %value, "unrecognized protocol frame");
            }
        }
    }

    /// Number of pending (in-flight) requests.
    pub fn pending_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// The id the next request will get.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::io::DuplexStream;

    use super::*;
    use crate::codec::{Frame, FrameReader};

    async fn open_correlator(timeout: Duration) -> (Arc<Correlator>, FrameReader<DuplexStream>) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let correlator = Arc::new(Correlator::new("test", timeout));
        correlator.attach(FrameWriter::new(ours)).await;
        correlator.open();
        (correlator, FrameReader::new(theirs))
    }

    async fn next_request(reader: &mut FrameReader<DuplexStream>) -> Value {
        match reader.next_frame().await.unwrap() {
            Some(Frame::Message(v)) => v,
            other => panic!("expected a request frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_by_default() {
        let correlator = Correlator::new("test", Duration::from_secs(1));
        let err = correlator.send("ping", None).await.unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(correlator.peek_next_id(), 1);
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let (correlator, mut provider) = open_correlator(Duration::from_secs(5)).await;

        for expected in 1..=3u64 {
            let c = correlator.clone();
            let call = tokio::spawn(async move { c.send("ping", None).await });
            let req = next_request(&mut provider).await;
            assert_eq!(req["id"], expected);
            assert_eq!(req["method"], "ping");
            correlator.handle_message(json!({ "jsonrpc": "2.0", "id": expected, "result": expected }));
            assert_eq!(call.await.unwrap().unwrap(), json!(expected));
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let (correlator, mut provider) = open_correlator(Duration::from_secs(5)).await;

        let c1 = correlator.clone();
        let first = tokio::spawn(async move { c1.send("tools/call", Some(json!({ "n": 1 }))).await });
        let req1 = next_request(&mut provider).await;
        let c2 = correlator.clone();
        let second = tokio::spawn(async move { c2.send("tools/call", Some(json!({ "n": 2 }))).await });
        let req2 = next_request(&mut provider).await;
        assert_eq!(req1["id"], 1);
        assert_eq!(req2["id"], 2);

        correlator.handle_message(json!({ "jsonrpc": "2.0", "id": 2, "result": "two" }));
        assert_eq!(second.await.unwrap().unwrap(), json!("two"));
        assert_eq!(correlator.pending_count(), 1);

        // String ids are matched too.
        correlator.handle_message(json!({ "jsonrpc": "2.0", "id": "1", "result": "one" }));
        assert_eq!(first.await.unwrap().unwrap(), json!("one"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_id_leaves_others_pending() {
        let (correlator, mut provider) = open_correlator(Duration::from_secs(5)).await;

        let c = correlator.clone();
        let call = tokio::spawn(async move { c.send("slow", None).await });
        let req = next_request(&mut provider).await;

        correlator.handle_message(json!({ "jsonrpc": "2.0", "id": 99, "result": "stray" }));
        assert_eq!(correlator.pending_count(), 1);

        correlator.handle_message(json!({ "jsonrpc": "2.0", "id": req["id"], "result": "ok" }));
        assert_eq!(call.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn error_response_rejects_with_rpc_error() {
        let (correlator, mut provider) = open_correlator(Duration::from_secs(5)).await;

        let c = correlator.clone();
        let call = tokio::spawn(async move { c.send("tools/call", None).await });
        let req = next_request(&mut provider).await;
        correlator.handle_message(json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": { "code": -32602, "message": "bad params", "data": { "field": "url" } }
        }));

        match call.await.unwrap() {
            Err(BridgeError::Rpc(err)) => {
                assert_eq!(err.code, -32602);
                assert_eq!(err.message, "bad params");
                assert_eq!(err.data, Some(json!({ "field": "url" })));
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_removes_pending_entry() {
        let (correlator, mut provider) = open_correlator(Duration::from_secs(5)).await;

        let started = Instant::now();
        let c = correlator.clone();
        let call = tokio::spawn(async move {
            c.send_with_timeout("tools/call", None, Duration::from_millis(50))
                .await
        });
        let _req = next_request(&mut provider).await;

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(correlator.pending_count(), 0);

        // A late response is just an unknown id now.
        correlator.handle_message(json!({ "jsonrpc": "2.0", "id": 1, "result": "late" }));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn close_rejects_all_pending_and_new_sends() {
        let (correlator, mut provider) = open_correlator(Duration::from_secs(5)).await;

        let mut calls = Vec::new();
        for _ in 0..3 {
            let c = correlator.clone();
            calls.push(tokio::spawn(async move { c.send("crawl", None).await }));
            let _ = next_request(&mut provider).await;
        }
        assert_eq!(correlator.pending_count(), 3);

        assert_eq!(correlator.close(CloseReason::ProviderExited), 3);
        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, BridgeError::ProviderTerminated));
        }
        assert_eq!(correlator.pending_count(), 0);

        let next = correlator.peek_next_id();
        let err = correlator.send("crawl", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::ProviderTerminated));
        assert_eq!(correlator.peek_next_id(), next, "closed table must not burn ids");
    }

    #[tokio::test]
    async fn write_failure_leaves_no_entry() {
        let (ours, theirs) = tokio::io::duplex(64);
        drop(theirs);
        let correlator = Correlator::new("test", Duration::from_secs(1));
        correlator.attach(FrameWriter::new(ours)).await;
        correlator.open();

        let err = correlator.send("ping", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)), "{err}");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn blocked_write_counts_against_the_timeout() {
        // Nobody reads the other end, so a large frame fills the pipe.
        let (ours, _theirs) = tokio::io::duplex(64);
        let correlator = Correlator::new("test", Duration::from_secs(5));
        correlator.attach(FrameWriter::new(ours)).await;
        correlator.open();

        let started = Instant::now();
        let big = "x".repeat(64 * 1024);
        let err = correlator
            .send_with_timeout("tools/call", Some(json!({ "msg": big })), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(correlator.pending_count(), 0);

        // The writer was released with the timed-out call.
        tokio::time::timeout(Duration::from_secs(1), correlator.detach())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn notify_has_no_id() {
        let (correlator, mut provider) = open_correlator(Duration::from_secs(5)).await;
        correlator
            .notify("notifications/initialized", None)
            .await
            .unwrap();
        let frame = next_request(&mut provider).await;
        assert_eq!(frame, json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.peek_next_id(), 1);
    }
}
