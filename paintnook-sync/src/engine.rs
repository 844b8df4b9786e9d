//! The sync engine: session lifecycle, outbound delivery with retry, and
//! inbound validation, deduplication and conflict gating.
//!
//! ```text
//!  send_action(LocalAction)
//!     │ normalize (current canvas size), stamp clock/author/priority
//!     ├──▶ action:local
//!     ▼
//!  ActionQueue ──flush──▶ one task per action ──▶ Transport::send
//!                              │ err: sleep(backoff) and retry
//!                              ├──▶ action:retry / action:failed
//!                              └──▶ action:acknowledged
//!
//!  handle_remote_action(raw | Value | Action)
//!     │ decode + validate ──▶ action:invalid
//!     │ dedup / own echo  ──▶ dropped
//!     ▼
//!  ConflictResolver ──▶ action:received | action:rejected
//! ```
//!
//! All state sits behind one mutex that is never held across an `.await` or
//! while event handlers run. Timers and retries are tokio tasks; methods
//! that need them (`create_session`, `join_session`, queue flushes) must be
//! called from inside a runtime for those tasks to start.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use lru::LruCache;
use paintnook_core::{
    denormalize_action, normalize_action, now_millis, Action, CanvasSize, LocalAction, Priority,
};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, MergeStrategy, RejectReason, Resolution};
use crate::error::{QueueError, SyncError, TransportError};
use crate::events::{EventBus, EventKind, SubscriptionId, SyncEvent};
use crate::lock;
use crate::queue::ActionQueue;
use crate::session::{
    generate_session_id, hash_password, pick_color, Participant, Role, SessionInfo, SessionOptions,
};
use crate::transport::Transport;

/// Input accepted by [`SyncEngine::handle_remote_action`].
#[derive(Debug, Clone)]
pub enum RemoteInput {
    /// JSON text as received from the wire
    Raw(String),
    Value(Value),
    /// Already decoded; still validated
    Parsed(Action),
}

impl From<&str> for RemoteInput {
    fn from(raw: &str) -> Self {
        RemoteInput::Raw(raw.to_string())
    }
}

impl From<String> for RemoteInput {
    fn from(raw: String) -> Self {
        RemoteInput::Raw(raw)
    }
}

impl From<Value> for RemoteInput {
    fn from(value: Value) -> Self {
        RemoteInput::Value(value)
    }
}

impl From<Action> for RemoteInput {
    fn from(action: Action) -> Self {
        RemoteInput::Parsed(action)
    }
}

impl RemoteInput {
    /// Decode and validate, or return the input as JSON with the reason.
    fn decode(self) -> Result<Action, (Value, String)> {
        match self {
            RemoteInput::Raw(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => RemoteInput::Value(value).decode(),
                Err(e) => Err((Value::String(raw), e.to_string())),
            },
            RemoteInput::Value(value) => {
                Action::from_value(value.clone()).map_err(|e| (value, e.to_string()))
            }
            RemoteInput::Parsed(action) => match action.validate() {
                Ok(()) => Ok(action),
                Err(e) => Err((action.to_value().unwrap_or(Value::Null), e.to_string())),
            },
        }
    }
}

/// What [`SyncEngine::handle_remote_action`] did with its input.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Passed every gate; emitted as `action:received`
    Accepted(Action),
    /// Lost a conflict; emitted as `action:rejected`
    Rejected(RejectReason),
    /// Already seen
    Duplicate,
    /// Authored by this participant
    OwnAction,
    /// Failed to decode or validate; emitted as `action:invalid`
    Invalid(String),
}

struct EngineState {
    connected: bool,
    role: Option<Role>,
    session_id: Option<String>,
    local_id: Option<String>,
    participants: HashMap<String, Participant>,
    vector_clock: u64,
    acknowledged: LruCache<String, ()>,
    /// Next attempt number per action currently backing off.
    retry_attempts: HashMap<String, u32>,
    /// Bumped on every session change; background work from an older
    /// epoch stops quietly.
    epoch: u64,
    host_priority: bool,
    canvas: CanvasSize,
    heartbeat: Option<JoinHandle<()>>,
}

impl EngineState {
    /// Forget everything scoped to the current session.
    fn reset(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.connected = false;
        self.role = None;
        self.session_id = None;
        self.local_id = None;
        self.participants.clear();
        self.acknowledged.clear();
        self.retry_attempts.clear();
        if let Some(hb) = self.heartbeat.take() {
            hb.abort();
        }
    }
}

struct EngineInner {
    config: SyncConfig,
    state: Mutex<EngineState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    events: EventBus,
    queue: ActionQueue,
    resolver: ConflictResolver,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(hb) = state.heartbeat.take() {
                hb.abort();
            }
        }
    }
}

/// Per-participant synchronization engine. Cloning shares the engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        let capacity = NonZeroUsize::new(config.dedup_capacity).unwrap_or(NonZeroUsize::MIN);

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let weak = weak.clone();
            let queue = ActionQueue::new(config.batch.clone(), move |batch: &[Action]| {
                match weak.upgrade() {
                    Some(inner) => inner.send_batch(batch),
                    None => Ok(()),
                }
            });

            EngineInner {
                resolver: ConflictResolver::new(&config.priority),
                state: Mutex::new(EngineState {
                    connected: false,
                    role: None,
                    session_id: None,
                    local_id: None,
                    participants: HashMap::new(),
                    vector_clock: 0,
                    acknowledged: LruCache::new(capacity),
                    retry_attempts: HashMap::new(),
                    epoch: 0,
                    host_priority: config.priority.host_override,
                    canvas: CanvasSize::default(),
                    heartbeat: None,
                }),
                transport: RwLock::new(None),
                events: EventBus::new(),
                queue,
                config,
            }
        });

        Self { inner }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ─── Events ──────────────────────────────────────────────────────

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.events.off(id)
    }

    // ─── Session lifecycle ───────────────────────────────────────────

    /// Host a new session. Any current session is abandoned first.
    pub fn create_session(
        &self,
        nickname: &str,
        password: Option<&str>,
        options: SessionOptions,
    ) -> SessionInfo {
        let priority = &self.inner.config.priority;
        let options = SessionOptions {
            host_priority: Some(options.host_priority.unwrap_or(priority.host_override)),
            conflict_mode: Some(options.conflict_mode.unwrap_or(priority.merge_strategy)),
            ..options
        };
        let host = Participant::new(
            Uuid::new_v4().to_string(),
            if nickname.is_empty() { "Host" } else { nickname },
            Role::Host,
        )
        .with_color(options.color.clone().unwrap_or_else(pick_color));

        let info = SessionInfo {
            id: generate_session_id(),
            host: host.clone(),
            password_hash: password.map(hash_password),
            options,
            created: now_millis(),
        };

        self.inner
            .resolver
            .set_strategy(info.options.conflict_mode.unwrap_or_default());
        self.inner.resolver.clear();
        self.inner.queue.clear();

        {
            let mut st = lock(&self.inner.state);
            st.reset();
            st.role = Some(Role::Host);
            st.session_id = Some(info.id.clone());
            st.local_id = Some(host.id.clone());
            st.participants.insert(host.id.clone(), host);
            st.host_priority = info.options.host_priority.unwrap_or(priority.host_override);
            st.connected = true;
            self.start_heartbeat(&mut st);
        }

        log::info!("Created session {} as host", info.id);
        self.inner.events.emit(&SyncEvent::SessionCreated(info.clone()));
        info
    }

    /// Join an existing session as a client. Password verification is the
    /// host's concern; nothing is checked locally.
    pub fn join_session(&self, session_id: &str, nickname: &str, _password: Option<&str>) -> Participant {
        let participant = Participant::new(
            Uuid::new_v4().to_string(),
            if nickname.is_empty() { "Guest" } else { nickname },
            Role::Client,
        )
        .with_color(pick_color());

        self.inner
            .resolver
            .set_strategy(self.inner.config.priority.merge_strategy);
        self.inner.resolver.clear();
        self.inner.queue.clear();

        {
            let mut st = lock(&self.inner.state);
            st.reset();
            st.role = Some(Role::Client);
            st.session_id = Some(session_id.to_string());
            st.local_id = Some(participant.id.clone());
            st.participants.insert(participant.id.clone(), participant.clone());
            st.host_priority = self.inner.config.priority.host_override;
            st.connected = true;
            self.start_heartbeat(&mut st);
        }

        log::info!("Joined session {} as {}", session_id, participant.nickname);
        self.inner.events.emit(&SyncEvent::SessionJoined {
            session_id: session_id.to_string(),
            participant: participant.clone(),
        });
        participant
    }

    /// Leave the session. Pending sends and retries are abandoned and the
    /// transport is closed on a best-effort basis.
    pub async fn disconnect(&self) {
        self.inner.queue.clear();
        lock(&self.inner.state).reset();
        self.inner.resolver.clear();

        if let Some(transport) = self.transport() {
            if let Err(e) = transport.close().await {
                log::warn!("Transport close failed: {}", e);
            }
        }

        log::info!("Disconnected");
        self.inner.events.emit(&SyncEvent::SessionDisconnected);
    }

    // ─── Outbound ────────────────────────────────────────────────────

    /// Normalize, stamp and queue a local action. The returned action is
    /// exactly what peers will receive.
    ///
    /// Once stamped, the action is announced and stays queued even if the
    /// flush it triggers fails; that batch is retried by the next flush.
    pub fn send_action(&self, local: &LocalAction) -> Result<Action, SyncError> {
        let has_transport = self.transport().is_some();
        let action = {
            let mut st = lock(&self.inner.state);
            if !st.connected {
                return Err(SyncError::NotConnected);
            }
            if !has_transport {
                return Err(SyncError::TransportUnavailable);
            }

            let mut action = normalize_action(local, st.canvas);
            st.vector_clock += 1;
            action.vector_clock = st.vector_clock;
            action.author_id = st.local_id.clone();
            action.priority = if st.role == Some(Role::Host) && st.host_priority {
                Priority::Host
            } else {
                Priority::Normal
            };
            action
        };

        self.inner.events.emit(&SyncEvent::ActionLocal(action.clone()));
        if let Err(e) = self.inner.queue.enqueue(action.clone()) {
            log::warn!("Flush failed, {} kept queued: {}", action.id, e);
        }
        Ok(action)
    }

    /// Hand queued actions to the transport now instead of waiting for the
    /// batch timer.
    pub fn flush(&self) -> Result<(), SyncError> {
        Ok(self.inner.queue.flush()?)
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    // ─── Inbound ─────────────────────────────────────────────────────

    pub fn handle_remote_action(&self, input: impl Into<RemoteInput>) -> RemoteOutcome {
        let action = match input.into().decode() {
            Ok(action) => action,
            Err((raw, reason)) => {
                log::warn!("Invalid action received: {}", reason);
                self.inner.events.emit(&SyncEvent::ActionInvalid {
                    raw,
                    reason: reason.clone(),
                });
                return RemoteOutcome::Invalid(reason);
            }
        };

        let resolution = {
            let mut st = lock(&self.inner.state);
            if st.acknowledged.contains(&action.id) {
                log::debug!("Dropping duplicate action {}", action.id);
                return RemoteOutcome::Duplicate;
            }
            if action.author_id.is_some() && action.author_id == st.local_id {
                log::debug!("Dropping echo of own action {}", action.id);
                return RemoteOutcome::OwnAction;
            }

            let resolution = self.inner.resolver.resolve(action);
            if let Resolution::Accepted(accepted) = &resolution {
                st.acknowledged.put(accepted.id.clone(), ());
                st.vector_clock = st.vector_clock.max(accepted.vector_clock);
                if let Some(author) = &accepted.author_id {
                    st.participants
                        .entry(author.clone())
                        .or_insert_with(|| Participant::unknown(author.clone()));
                }
            }
            resolution
        };

        match resolution {
            Resolution::Accepted(action) => {
                self.inner.events.emit(&SyncEvent::ActionReceived(action.clone()));
                RemoteOutcome::Accepted(action)
            }
            Resolution::Rejected { action, reason } => {
                self.inner.events.emit(&SyncEvent::ActionRejected {
                    action,
                    reason: reason.clone(),
                });
                RemoteOutcome::Rejected(reason)
            }
        }
    }

    pub fn handle_participant_joined(&self, participant: Participant) {
        lock(&self.inner.state)
            .participants
            .insert(participant.id.clone(), participant.clone());
        log::info!("Participant {} joined", participant.nickname);
        self.inner.events.emit(&SyncEvent::ParticipantJoined(participant));
    }

    pub fn handle_participant_left(&self, id: &str) {
        let participant = lock(&self.inner.state).participants.remove(id);
        log::info!("Participant {} left", id);
        self.inner.events.emit(&SyncEvent::ParticipantLeft {
            id: id.to_string(),
            participant,
        });
    }

    // ─── Coordinates ─────────────────────────────────────────────────

    /// Zero dimensions are coerced to 1.
    pub fn set_canvas_size(&self, width: u32, height: u32) {
        lock(&self.inner.state).canvas = CanvasSize::new(width, height);
    }

    pub fn canvas_size(&self) -> CanvasSize {
        lock(&self.inner.state).canvas
    }

    pub fn normalize_action(&self, local: &LocalAction) -> Action {
        normalize_action(local, self.canvas_size())
    }

    pub fn denormalize_action(&self, action: &Action) -> Action {
        denormalize_action(action, self.canvas_size())
    }

    // ─── Transport ───────────────────────────────────────────────────

    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.inner.transport.write().unwrap_or_else(|e| e.into_inner()) = Some(transport);
    }

    pub fn clear_transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport()
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).connected
    }

    pub fn is_host(&self) -> bool {
        lock(&self.inner.state).role == Some(Role::Host)
    }

    pub fn role(&self) -> Option<Role> {
        lock(&self.inner.state).role
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.inner.state).session_id.clone()
    }

    pub fn local_participant_id(&self) -> Option<String> {
        lock(&self.inner.state).local_id.clone()
    }

    pub fn participants(&self) -> HashMap<String, Participant> {
        lock(&self.inner.state).participants.clone()
    }

    pub fn participant(&self, id: &str) -> Option<Participant> {
        lock(&self.inner.state).participants.get(id).cloned()
    }

    pub fn vector_clock(&self) -> u64 {
        lock(&self.inner.state).vector_clock
    }

    pub fn is_acknowledged(&self, action_id: &str) -> bool {
        lock(&self.inner.state).acknowledged.contains(action_id)
    }

    /// Actions currently waiting out a retry backoff.
    pub fn pending_retries(&self) -> usize {
        lock(&self.inner.state).retry_attempts.len()
    }

    pub fn conflict_strategy(&self) -> MergeStrategy {
        self.inner.resolver.strategy()
    }

    /// Adopt the conflict mode announced in the host's [`SessionInfo`].
    pub fn set_conflict_strategy(&self, strategy: MergeStrategy) {
        self.inner.resolver.set_strategy(strategy);
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.inner.resolver
    }

    // ─── Heartbeat ───────────────────────────────────────────────────

    fn start_heartbeat(&self, st: &mut EngineState) {
        let Ok(handle) = Handle::try_current() else {
            log::debug!("No runtime, heartbeat disabled");
            return;
        };
        let interval = Duration::from_millis(self.inner.config.heartbeat.interval.max(1));
        let timeout = Duration::from_millis(self.inner.config.heartbeat.timeout);
        let epoch = st.epoch;
        let weak = Arc::downgrade(&self.inner);

        st.heartbeat = Some(handle.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_ok = Instant::now();

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.epoch() != Some(epoch) {
                    break;
                }

                match inner.transport() {
                    Some(transport) => {
                        match time::timeout(timeout, transport.heartbeat(now_millis())).await {
                            Ok(Ok(())) => last_ok = Instant::now(),
                            Ok(Err(e)) => log::debug!("Heartbeat failed: {}", e),
                            Err(_) => log::debug!("Heartbeat timed out"),
                        }
                    }
                    // Nothing to probe yet.
                    None => last_ok = Instant::now(),
                }

                if last_ok.elapsed() >= timeout {
                    {
                        let mut st = lock(&inner.state);
                        if st.epoch != epoch {
                            break;
                        }
                        // Detach so disconnect() does not abort this task.
                        st.heartbeat = None;
                    }
                    log::warn!("No heartbeat for {:?}, disconnecting", timeout);
                    SyncEngine { inner }.disconnect().await;
                    break;
                }
            }
        }));
    }
}

impl EngineInner {
    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current epoch while connected.
    fn epoch(&self) -> Option<u64> {
        let st = lock(&self.state);
        st.connected.then_some(st.epoch)
    }

    /// Flush callback: one delivery task per action.
    fn send_batch(self: &Arc<Self>, batch: &[Action]) -> Result<(), QueueError> {
        let Some(epoch) = self.epoch() else {
            log::debug!("Not connected, dropping batch of {}", batch.len());
            return Ok(());
        };
        if self.transport().is_none() {
            log::debug!("No transport, dropping batch of {}", batch.len());
            return Ok(());
        }
        let handle =
            Handle::try_current().map_err(|_| QueueError::Flush("no async runtime".to_string()))?;

        for action in batch {
            let inner = Arc::clone(self);
            let action = action.clone();
            handle.spawn(async move { inner.send_with_retry(action, epoch).await });
        }
        Ok(())
    }

    async fn send_with_retry(self: Arc<Self>, action: Action, epoch: u64) {
        let retry = self.config.retry.clone();
        let mut attempt: u32 = 0;

        loop {
            if self.epoch() != Some(epoch) {
                log::debug!("Session ended, abandoning {}", action.id);
                return;
            }

            let result = match self.transport() {
                Some(transport) => transport.send(action.clone()).await,
                None => Err(TransportError::Unavailable),
            };

            match result {
                Ok(()) => {
                    {
                        let mut st = lock(&self.state);
                        if st.epoch != epoch {
                            return;
                        }
                        st.acknowledged.put(action.id.clone(), ());
                        st.retry_attempts.remove(&action.id);
                    }
                    self.events.emit(&SyncEvent::ActionAcknowledged(action));
                    return;
                }
                Err(error) if attempt >= retry.max_attempts => {
                    {
                        let mut st = lock(&self.state);
                        if st.epoch != epoch {
                            return;
                        }
                        st.retry_attempts.remove(&action.id);
                    }
                    log::error!("Giving up on {} after {} retries: {}", action.id, attempt, error);
                    self.events.emit(&SyncEvent::ActionFailed {
                        action,
                        error,
                        attempts: attempt,
                    });
                    return;
                }
                Err(error) => {
                    let delay = retry.delay(attempt, rand::random::<f64>());
                    attempt += 1;
                    {
                        let mut st = lock(&self.state);
                        if st.epoch != epoch {
                            return;
                        }
                        st.retry_attempts.insert(action.id.clone(), attempt);
                    }
                    log::warn!(
                        "Send of {} failed ({}), retry {} in {:?}",
                        action.id,
                        error,
                        attempt,
                        delay
                    );
                    self.events.emit(&SyncEvent::ActionRetry {
                        action: action.clone(),
                        attempt,
                        delay,
                    });
                    time::sleep(delay).await;
                }
            }
        }
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("SyncEngine")
            .field("connected", &st.connected)
            .field("role", &st.role)
            .field("session_id", &st.session_id)
            .field("participants", &st.participants.len())
            .field("vector_clock", &st.vector_clock)
            .finish()
    }
}
