//! [`ProcessBridge`]: one supervised provider child process.
//!
//! The bridge owns the child's stdio exclusively.  Three background tasks
//! run per started child:
//! - a stdout pump feeding protocol frames to the correlator,
//! - a stderr pump feeding the diagnostic sink,
//! - a supervisor that owns the `Child` and either observes its exit or
//!   terminates it on request.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use bs_domain::config::ProviderConfig;
use bs_domain::{CapabilitySnapshot, TenantContext};

use crate::codec::{DiagnosticSink, Frame, FrameReader, FrameWriter, TracingDiagnostics};
use crate::correlator::{CloseReason, Correlator};
use crate::error::BridgeError;
use crate::protocol::{self, CallOutcome, InitializeResult, ToolsListResult};
use crate::state::BridgeState;

pub const ENV_TENANT_ID: &str = "BRAINSLOT_TENANT_ID";
/// Same value as [`ENV_TENANT_ID`]; the name existing crawlers read.
pub const ENV_ENTITY_ID: &str = "BRAINSLOT_ENTITY_ID";
pub const ENV_DATA_ROOT: &str = "BRAINSLOT_DATA_ROOT";
pub const ENV_NAMESPACE: &str = "BRAINSLOT_NAMESPACE";

/// How long an exited child's stdout may keep draining before cleanup.
const EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Upper bound on releasing stdin once the child is gone.
const DETACH_WAIT: Duration = Duration::from_millis(500);

/// Environment overrides identifying the tenant to the provider.
pub fn provider_env(tenant: &TenantContext) -> Vec<(&'static str, String)> {
    let tenant_id = tenant.tenant_id().unwrap_or_default().to_string();
    vec![
        (ENV_TENANT_ID, tenant_id.clone()),
        (ENV_ENTITY_ID, tenant_id),
        (ENV_DATA_ROOT, tenant.data_root().display().to_string()),
        (ENV_NAMESPACE, tenant.namespace()),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProcessBridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap to clone; clones share the same child process.
#[derive(Clone)]
pub struct ProcessBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: ProviderConfig,
    tenant: TenantContext,
    state: Mutex<BridgeState>,
    correlator: Arc<Correlator>,
    snapshot: RwLock<Option<CapabilitySnapshot>>,
    /// Serializes start/stop and holds the supervisor of the live child.
    lifecycle: tokio::sync::Mutex<Option<Running>>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

struct Running {
    shutdown_tx: oneshot::Sender<Duration>,
    supervisor: JoinHandle<()>,
}

impl Running {
    /// Ask the supervisor to terminate the child and wait until it has.
    async fn shutdown(self, grace: Duration) {
        // Fails if the child already exited and the supervisor is gone.
        let _ = self.shutdown_tx.send(grace);
        if let Err(e) = self.supervisor.await {
            tracing::warn!(error = %e, "provider supervisor task failed");
        }
    }
}

impl ProcessBridge {
    pub fn new(config: ProviderConfig, tenant: TenantContext) -> Self {
        Self::with_diagnostics(config, tenant, Arc::new(TracingDiagnostics))
    }

    pub fn with_diagnostics(
        config: ProviderConfig,
        tenant: TenantContext,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let correlator = Correlator::new(
            config.id.clone(),
            Duration::from_millis(config.request_timeout_ms),
        );
        Self {
            inner: Arc::new(BridgeInner {
                config,
                tenant,
                state: Mutex::new(BridgeState::Stopped),
                correlator: Arc::new(correlator),
                snapshot: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(None),
                diagnostics,
            }),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn state(&self) -> BridgeState {
        *self.inner.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == BridgeState::Ready
    }

    /// The snapshot negotiated by the last successful `start()`.
    pub fn capabilities(&self) -> Option<CapabilitySnapshot> {
        self.inner.snapshot.read().clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn tenant(&self) -> &TenantContext {
        &self.inner.tenant
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    pub fn provider_id(&self) -> &str {
        &self.inner.config.id
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Spawn the provider, perform the handshake and return the
    /// negotiated capabilities.
    ///
    /// Valid only from `Stopped`.  Any failure leaves the bridge `Failed`
    /// with the child killed.
    pub async fn start(&self) -> Result<CapabilitySnapshot, BridgeError> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;

        let current = self.state();
        if current != BridgeState::Stopped {
            return Err(BridgeError::InvalidState {
                op: "start",
                state: current,
            });
        }
        // A previous child that exited on its own leaves its supervisor here.
        if let Some(stale) = lifecycle.take() {
            inner.release(stale, Duration::ZERO).await;
        }

        inner.transition(BridgeState::Starting);
        tracing::info!(
            tenant = %inner.tenant,
            provider = %inner.config.id,
            command = %inner.config.command,
            "starting provider"
        );

        let mut child = match inner.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(tenant = %inner.tenant, provider = %inner.config.id, error = %e, "provider spawn failed");
                inner.transition(BridgeState::Failed);
                return Err(e);
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            inner.transition(BridgeState::Failed);
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture provider stdio",
            )));
        };
        let stderr = child.stderr.take();

        inner.correlator.attach(FrameWriter::new(stdin)).await;
        inner.correlator.open();

        let provider = inner.config.id.clone();
        let reader = tokio::spawn(pump_stdout(
            stdout,
            inner.correlator.clone(),
            inner.diagnostics.clone(),
            provider.clone(),
        ));
        let stderr_pump = stderr.map(|stderr| {
            tokio::spawn(pump_stderr(stderr, inner.diagnostics.clone(), provider.clone()))
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            child,
            shutdown_rx,
            reader,
            stderr_pump,
            Arc::downgrade(inner),
        ));
        let running = Running {
            shutdown_tx,
            supervisor,
        };

        inner.transition(BridgeState::Initializing);

        let snapshot = match inner.handshake().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(tenant = %inner.tenant, provider = %inner.config.id, error = %e, "provider handshake failed");
                inner.abort_start(running).await;
                return Err(e);
            }
        };

        // The child may have exited between the last response and here.
        let became_ready = {
            let mut state = inner.state.lock();
            if inner.correlator.is_open() {
                inner.apply(&mut state, BridgeState::Ready);
                *inner.snapshot.write() = Some(snapshot.clone());
                true
            } else {
                false
            }
        };
        if !became_ready {
            inner.abort_start(running).await;
            return Err(BridgeError::ProviderTerminated);
        }

        *lifecycle = Some(running);
        tracing::info!(
            tenant = %inner.tenant,
            provider = %inner.config.id,
            version = %snapshot.version,
            tool_count = snapshot.tools.len(),
            "provider ready"
        );
        Ok(snapshot)
    }

    /// Call a provider tool.
    ///
    /// Returns the first text content item, or the raw result when the
    /// provider answers with another shape.
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<Value, BridgeError> {
        let state = self.state();
        if state != BridgeState::Ready {
            return Err(BridgeError::NotReady { state });
        }

        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        let timeout = Duration::from_millis(self.inner.config.request_timeout_ms);
        let result = self
            .inner
            .correlator
            .send_with_timeout("tools/call", Some(params), timeout)
            .await?;

        match protocol::interpret_call_result(result) {
            CallOutcome::Output(value) => Ok(value),
            CallOutcome::ToolError(text) => Err(BridgeError::ToolReported(text)),
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BridgeError> {
        let state = self.state();
        if state != BridgeState::Ready {
            return Err(BridgeError::NotReady { state });
        }
        self.inner.correlator.notify(method, params).await
    }

    /// Terminate the provider.  Idempotent; a no-op unless `Ready`.
    ///
    /// Pending requests are rejected before the child is signalled.  The
    /// child is terminated before its stdin is released, so a write stuck
    /// on a full pipe cannot hold up the stop.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;

        let stopping = {
            let mut state = inner.state.lock();
            if *state == BridgeState::Ready {
                inner.apply(&mut state, BridgeState::Stopping);
                true
            } else {
                false
            }
        };

        if !stopping {
            if let Some(stale) = lifecycle.take() {
                inner.release(stale, Duration::ZERO).await;
            }
            return;
        }

        let rejected = inner.correlator.close(CloseReason::Stopped);
        if let Some(running) = lifecycle.take() {
            let grace = Duration::from_millis(inner.config.shutdown_grace_ms);
            inner.release(running, grace).await;
        }
        *inner.snapshot.write() = None;
        inner.transition(BridgeState::Stopped);

        tracing::info!(
            tenant = %inner.tenant,
            provider = %inner.config.id,
            rejected,
            "provider stopped"
        );
    }
}

impl std::fmt::Debug for ProcessBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBridge")
            .field("provider", &self.inner.config.id)
            .field("tenant", &self.inner.tenant.label())
            .field("state", &self.state())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl BridgeInner {
    fn transition(&self, next: BridgeState) {
        let mut state = self.state.lock();
        self.apply(&mut state, next);
    }

    /// Move along a lifecycle edge.  Off-graph requests are logged and ignored.
    fn apply(&self, state: &mut BridgeState, next: BridgeState) {
        let prev = *state;
        if !prev.can_transition_to(next) {
            tracing::warn!(
                tenant = %self.tenant,
                provider = %self.config.id,
                from = %prev,
                to = %next,
                "ignoring illegal bridge transition"
            );
            return;
        }
        *state = next;
        tracing::debug!(
            tenant = %self.tenant,
            provider = %self.config.id,
            from = %prev,
            to = %next,
            "bridge state"
        );
    }

    fn spawn_child(&self) -> Result<Child, BridgeError> {
        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.command);
        cmd.args(&cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &cfg.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&cfg.env);
        // Tenant identity is applied last so the config cannot override it.
        for (key, value) in provider_env(&self.tenant) {
            cmd.env(key, value);
        }

        cmd.spawn().map_err(|source| BridgeError::Spawn {
            command: cfg.command.clone(),
            source,
        })
    }

    async fn handshake(&self) -> Result<CapabilitySnapshot, BridgeError> {
        let timeout = Duration::from_millis(self.config.handshake_timeout_ms);
        let params = serde_json::to_value(protocol::initialize_params(
            &self.config.protocol_version,
        ))?;

        let raw = self
            .correlator
            .send_with_timeout("initialize", Some(params), timeout)
            .await
            .map_err(|e| match e {
                BridgeError::Rpc(err) => BridgeError::Handshake(err),
                other => other,
            })?;
        let init: InitializeResult = serde_json::from_value(raw).unwrap_or_else(|e| {
            tracing::warn!(provider = %self.config.id, error = %e, "unexpected initialize result shape");
            InitializeResult::default()
        });

        self.correlator
            .notify("notifications/initialized", None)
            .await?;

        let (tools, features) = match &self.config.static_capabilities {
            Some(fixed) => (fixed.tools.clone(), fixed.features.clone()),
            None => (self.discover_tools(timeout).await, init.feature_names()),
        };

        Ok(CapabilitySnapshot {
            tools,
            version: init.server_version(),
            features,
        })
    }

    async fn discover_tools(&self, timeout: Duration) -> Vec<String> {
        let raw = match self
            .correlator
            .send_with_timeout("tools/list", None, timeout)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    provider = %self.config.id,
                    error = %e,
                    "tools/list failed, provider will have no tools"
                );
                return Vec::new();
            }
        };
        match serde_json::from_value::<ToolsListResult>(raw) {
            Ok(list) => list.tools.into_iter().map(|t| t.name).collect(),
            Err(e) => {
                tracing::warn!(
                    provider = %self.config.id,
                    error = %e,
                    "failed to parse tools/list result"
                );
                Vec::new()
            }
        }
    }

    async fn abort_start(&self, running: Running) {
        self.correlator.close(CloseReason::Stopped);
        self.release(running, Duration::ZERO).await;
        self.transition(BridgeState::Failed);
    }

    /// Terminate the child, then drop its stdin.
    async fn release(&self, running: Running, grace: Duration) {
        running.shutdown(grace).await;
        // Blocked writers fail with EPIPE once the child is gone.
        if tokio::time::timeout(DETACH_WAIT, self.correlator.detach())
            .await
            .is_err()
        {
            tracing::warn!(
                tenant = %self.tenant,
                provider = %self.config.id,
                "provider stdin still busy after termination"
            );
        }
    }

    /// Called by the supervisor when the child exits without being asked to.
    fn on_child_exit(&self) {
        let mut state = self.state.lock();
        match *state {
            BridgeState::Ready => {
                self.apply(&mut state, BridgeState::Stopping);
                self.correlator.close(CloseReason::ProviderExited);
                *self.snapshot.write() = None;
                self.apply(&mut state, BridgeState::Stopped);
            }
            // start() sees the closed correlator and marks the bridge Failed.
            BridgeState::Starting | BridgeState::Initializing => {
                self.correlator.close(CloseReason::ProviderExited);
            }
            BridgeState::Stopping | BridgeState::Stopped | BridgeState::Failed => {}
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn pump_stdout(
    stdout: ChildStdout,
    correlator: Arc<Correlator>,
    diagnostics: Arc<dyn DiagnosticSink>,
    provider: String,
) {
    let mut reader = FrameReader::new(stdout);
    loop {
        match reader.next_frame().await {
            Ok(Some(Frame::Message(message))) => correlator.handle_message(message),
            Ok(Some(Frame::Diagnostic(line))) => diagnostics.stdout_line(&provider, &line),
            Ok(None) => {
                tracing::debug!(provider = %provider, "provider stdout closed");
                break;
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "error reading provider stdout");
                break;
            }
        }
    }
}

async fn pump_stderr(stderr: ChildStderr, diagnostics: Arc<dyn DiagnosticSink>, provider: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        if !line.is_empty() {
            diagnostics.stderr_line(&provider, line);
        }
    }
}

enum SupervisorEvent {
    Exited(std::io::Result<ExitStatus>),
    Shutdown(Duration),
}

async fn supervise(
    mut child: Child,
    shutdown_rx: oneshot::Receiver<Duration>,
    reader: JoinHandle<()>,
    stderr_pump: Option<JoinHandle<()>>,
    bridge: Weak<BridgeInner>,
) {
    let event = tokio::select! {
        status = child.wait() => SupervisorEvent::Exited(status),
        // A dropped sender means the bridge itself is gone: kill at once.
        grace = shutdown_rx => SupervisorEvent::Shutdown(grace.unwrap_or(Duration::ZERO)),
    };

    match event {
        SupervisorEvent::Exited(status) => {
            // Responses written just before exit are still in the pipe.
            let _ = tokio::time::timeout(EXIT_DRAIN, reader).await;
            if let Some(pump) = stderr_pump {
                let _ = tokio::time::timeout(EXIT_DRAIN, pump).await;
            }
            match status {
                Ok(status) => tracing::warn!(%status, "provider process exited"),
                Err(e) => tracing::warn!(error = %e, "error waiting for provider process"),
            }
            if let Some(inner) = bridge.upgrade() {
                inner.on_child_exit();
            }
        }
        SupervisorEvent::Shutdown(grace) => {
            terminate(&mut child, grace).await;
            reader.abort();
            if let Some(pump) = stderr_pump {
                pump.abort();
            }
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is a child we spawned and have not reaped yet.
            let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if ret != 0 {
                tracing::warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(%status, "provider exited after SIGTERM");
        }
        _ => {
            tracing::debug!(
                grace_ms = grace.as_millis() as u64,
                "provider did not exit within grace period, killing"
            );
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill provider process");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
