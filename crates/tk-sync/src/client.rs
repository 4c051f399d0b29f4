use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use tk_core::approval::{self, ApprovalError, CloseOutcome};
use tk_core::config::RemoteSettings;
use tk_core::store::{StoreError, TickStore};
use tk_core::types::Tick;

use crate::pending::PendingWrites;
use crate::protocol::{OperationPayload, SyncMessage, TickOperation};
use crate::queue::OfflineQueue;
use crate::watcher::{IssueChangeKind, IssueWatcher};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(90);
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const WATCH_DRAIN_INTERVAL: Duration = Duration::from_millis(500);

/// Author marker on notes and writes that originate from the remote.
const CLOUD_AUTHOR: &str = "cloud";

// ---------------------------------------------------------------------------
// Errors / state
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

enum ServeEnd {
    Shutdown,
    Disconnected,
}

// ---------------------------------------------------------------------------
// SyncClient
// ---------------------------------------------------------------------------

/// Bidirectional sync between `.tick/issues/` and the remote service.
///
/// One supervisor loop owns reconnect with exponential backoff (reset only
/// on a successful handshake); a spawned watcher task turns local file
/// changes into outbound frames; the reader half of the socket applies
/// inbound frames in arrival order; keepalive pings ride the same select
/// loop. Lock order is connection → pending-writes → queue, and no lock
/// outlives its serialized section.
pub struct SyncClient {
    store: TickStore,
    project: String,
    settings: RemoteSettings,
    conn: Mutex<Option<WsSink>>,
    pending: Arc<PendingWrites>,
    queue: OfflineQueue,
    state_tx: watch::Sender<SyncState>,
    state_rx: watch::Receiver<SyncState>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl SyncClient {
    pub fn new(store: TickStore, project: impl Into<String>, settings: RemoteSettings) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(SyncState::Disconnected);
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            project: project.into(),
            settings,
            conn: Mutex::new(None),
            pending: Arc::new(PendingWrites::new()),
            queue: OfflineQueue::new(),
            state_tx,
            state_rx,
            stop_tx,
            stop_rx,
        })
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    /// Request shutdown; the supervisor loop exits after the current
    /// select round.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn endpoint_url(&self) -> String {
        let token = self.settings.token.as_deref().unwrap_or("");
        format!(
            "{}/{}/sync?token={}&type=local",
            self.settings.url.trim_end_matches('/'),
            urlencoding::encode(&self.project),
            token
        )
    }

    // -- supervisor ----------------------------------------------------------

    /// Run until [`stop`] is called. Owns the reconnect loop and spawns the
    /// local file-watcher task.
    ///
    /// [`stop`]: SyncClient::stop
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let watcher_handle = tokio::spawn(Arc::clone(&self).watch_local());

        let mut backoff = BACKOFF_START;
        let mut stop = self.stop_rx.clone();
        loop {
            if *stop.borrow() {
                break;
            }
            self.set_state(SyncState::Connecting);
            let url = self.endpoint_url();
            match connect_async(url.as_str()).await {
                Ok((ws, _response)) => {
                    info!(project = %self.project, "sync connected");
                    backoff = BACKOFF_START; // reset only on a successful handshake
                    self.set_state(SyncState::Connected);

                    let end = self.serve(ws).await;
                    *self.conn.lock().await = None;
                    self.set_state(SyncState::Disconnected);
                    if matches!(end, ServeEnd::Shutdown) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, next_retry = ?backoff, "sync connect failed");
                    self.set_state(SyncState::Error);
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }

        self.set_state(SyncState::Disconnected);
        watcher_handle.abort();
        Ok(())
    }

    /// One connection's lifetime: handshake traffic, then the read loop
    /// with keepalive. Returns how it ended.
    async fn serve(&self, ws: WsStream) -> ServeEnd {
        let (sink, stream) = ws.split();
        *self.conn.lock().await = Some(sink);

        if let Err(e) = self.send_sync_full().await {
            warn!(error = %e, "sync_full failed");
            return ServeEnd::Disconnected;
        }
        if let Err(e) = self.drain_queue().await {
            warn!(error = %e, "offline queue drain failed; reconnecting");
            return ServeEnd::Disconnected;
        }

        self.read_loop(stream).await
    }

    async fn read_loop(&self, mut stream: SplitStream<WsStream>) -> ServeEnd {
        let mut stop = self.stop_rx.clone();
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keepalive.tick().await; // the first tick fires immediately; skip it
        let mut read_deadline = tokio::time::Instant::now() + READ_DEADLINE;

        loop {
            tokio::select! {
                _ = stop.changed() => return ServeEnd::Shutdown,
                _ = keepalive.tick() => {
                    if let Err(e) = self.send_raw(Message::Ping(Vec::new().into())).await {
                        warn!(error = %e, "keepalive ping failed");
                        return ServeEnd::Disconnected;
                    }
                }
                frame = tokio::time::timeout_at(read_deadline, stream.next()) => {
                    match frame {
                        Err(_) => {
                            warn!("read deadline missed; reconnecting");
                            return ServeEnd::Disconnected;
                        }
                        Ok(None) => {
                            info!("remote closed the connection");
                            return ServeEnd::Disconnected;
                        }
                        Ok(Some(Err(e))) => {
                            warn!(error = %e, "websocket read error");
                            return ServeEnd::Disconnected;
                        }
                        Ok(Some(Ok(message))) => match message {
                            Message::Pong(_) => {
                                read_deadline = tokio::time::Instant::now() + READ_DEADLINE;
                            }
                            Message::Ping(payload) => {
                                let _ = self.send_raw(Message::Pong(payload)).await;
                            }
                            Message::Text(text) => {
                                match serde_json::from_str::<SyncMessage>(text.as_str()) {
                                    Ok(msg) => {
                                        if let Err(e) = self.handle_remote(msg).await {
                                            warn!(error = %e, "inbound frame failed");
                                        }
                                    }
                                    Err(e) => warn!(error = %e, "unparseable inbound frame"),
                                }
                            }
                            Message::Close(_) => return ServeEnd::Disconnected,
                            _ => {}
                        },
                    }
                }
            }
        }
    }

    // -- local → remote ------------------------------------------------------

    /// Watches the issue tree for the life of the client, across
    /// reconnects; the offline queue absorbs changes made while down.
    async fn watch_local(self: Arc<Self>) {
        let watcher = match IssueWatcher::new(&self.store.issues_dir(), Arc::clone(&self.pending)) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "issue watcher failed to start; local edits will not sync");
                return;
            }
        };

        let mut stop = self.stop_rx.clone();
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                _ = tokio::time::sleep(WATCH_DRAIN_INTERVAL) => {}
            }
            for change in watcher.recv_changes() {
                match change.kind {
                    IssueChangeKind::Upserted => match self.store.read(&change.tick_id) {
                        Ok(tick) => {
                            self.send_or_queue(SyncMessage::TickUpdate {
                                tick: Box::new(tick),
                            })
                            .await;
                        }
                        Err(e) => debug!(tick_id = %change.tick_id, error = %e, "changed file unreadable; skipped"),
                    },
                    IssueChangeKind::Deleted => {
                        self.send_or_queue(SyncMessage::TickDelete {
                            id: change.tick_id.clone(),
                        })
                        .await;
                    }
                }
            }
        }
    }

    /// All open ticks plus those closed within the last 24 hours.
    async fn sync_full_ticks(&self) -> Result<HashMap<String, Tick>> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(24);
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|t| !t.is_closed() || t.closed_at.is_some_and(|c| c > cutoff))
            .map(|t| (t.id.clone(), t))
            .collect())
    }

    async fn send_sync_full(&self) -> Result<()> {
        let ticks = self.sync_full_ticks().await?;
        info!(count = ticks.len(), "sending sync_full");
        self.send_frame(&SyncMessage::SyncFull { ticks }).await
    }

    /// Drain the offline queue FIFO before live traffic resumes. A failed
    /// send re-queues the failed message and everything behind it.
    async fn drain_queue(&self) -> Result<()> {
        let msgs = self.queue.drain();
        if msgs.is_empty() {
            return Ok(());
        }
        info!(count = msgs.len(), "draining offline queue");
        let mut iter = msgs.into_iter();
        while let Some(msg) = iter.next() {
            if let Err(e) = self.send_frame(&msg).await {
                let mut unsent = vec![msg];
                unsent.extend(iter);
                self.queue.requeue_front(unsent);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Send now if connected, otherwise queue (queueable frames only —
    /// ephemeral streaming frames are dropped on the floor).
    pub async fn send_or_queue(&self, msg: SyncMessage) {
        match self.send_frame(&msg).await {
            Ok(()) => {}
            Err(e) => {
                if msg.is_queueable() {
                    debug!(error = %e, "queueing outbound message");
                    self.queue.push(msg);
                } else {
                    debug!(error = %e, "dropping ephemeral outbound message");
                }
            }
        }
    }

    /// Emit a live run event; never queued.
    pub async fn send_run_event(&self, event: serde_json::Value) {
        self.send_or_queue(SyncMessage::RunEvent { event }).await;
    }

    async fn send_frame(&self, msg: &SyncMessage) -> Result<()> {
        let text = serde_json::to_string(msg)
            .map_err(|e| SyncError::Transport(format!("serialize: {e}")))?;
        self.send_raw(Message::text(text)).await
    }

    async fn send_raw(&self, message: Message) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let Some(sink) = conn.as_mut() else {
            return Err(SyncError::Transport("not connected".to_string()));
        };
        match tokio::time::timeout(WRITE_DEADLINE, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::Transport(e.to_string())),
            Err(_) => Err(SyncError::Transport("write deadline missed".to_string())),
        }
    }

    // -- remote → local ------------------------------------------------------

    /// Apply one inbound frame. Called in arrival order from the read loop.
    pub async fn handle_remote(&self, msg: SyncMessage) -> Result<()> {
        match msg {
            SyncMessage::StateFull { ticks } => {
                for (_, tick) in ticks {
                    self.apply_remote_tick(tick)?;
                }
                Ok(())
            }
            SyncMessage::TickCreated { tick } | SyncMessage::TickUpdated { tick } => {
                self.apply_remote_tick(*tick)?;
                Ok(())
            }
            SyncMessage::TickDeleted { id } => {
                self.pending.mark(self.store.issue_path(&id));
                self.store.delete(&id)?;
                info!(tick_id = %id, "tick deleted by remote");
                Ok(())
            }
            SyncMessage::TickOperation {
                request_id,
                operation,
                tick_id,
                payload,
            } => {
                let result = self.apply_operation(operation, &tick_id, &payload).await;
                let response = match result {
                    Ok(()) => SyncMessage::TickOperationResponse {
                        request_id,
                        success: true,
                        tick: self.store.read(&tick_id).ok().map(Box::new),
                        error: None,
                    },
                    Err(message) => SyncMessage::TickOperationResponse {
                        request_id,
                        success: false,
                        tick: None,
                        error: Some(message),
                    },
                };
                if let Err(e) = self.send_frame(&response).await {
                    warn!(error = %e, "operation response failed to send");
                }
                Ok(())
            }
            SyncMessage::Error { message } => {
                warn!(remote_error = %message, "remote reported an error");
                Ok(())
            }
            // Outbound-only frames echoed back are ignored.
            other => {
                debug!(?other, "ignoring unexpected inbound frame");
                Ok(())
            }
        }
    }

    /// Conflict rule: the remote copy lands only when strictly newer;
    /// otherwise the local version stands and the next local change will
    /// re-advertise it.
    fn apply_remote_tick(&self, tick: Tick) -> Result<()> {
        match self.store.read(&tick.id) {
            Ok(local) if local.updated_at >= tick.updated_at => {
                debug!(tick_id = %tick.id, "remote copy older than local; keeping local");
                return Ok(());
            }
            _ => {}
        }
        self.pending.mark(self.store.issue_path(&tick.id));
        self.store.write_as(&tick, CLOUD_AUTHOR)?;
        debug!(tick_id = %tick.id, "remote tick applied");
        Ok(())
    }

    /// Map a remote operation onto the approval workflow. Errors are
    /// returned to the cloud UI without disturbing local state.
    async fn apply_operation(
        &self,
        operation: TickOperation,
        tick_id: &str,
        payload: &OperationPayload,
    ) -> std::result::Result<(), String> {
        let path = self.store.issue_path(tick_id);
        self.pending.mark(&path);
        let result = match operation {
            TickOperation::AddNote => {
                let Some(message) = payload.message.as_deref() else {
                    return Err("add_note requires a message".to_string());
                };
                let mut tick = self.store.read(tick_id).map_err(|e| e.to_string())?;
                tick.append_note(message, Some("(from: cloud)"));
                self.store
                    .write_as(&tick, CLOUD_AUTHOR)
                    .map_err(|e| e.to_string())
            }
            TickOperation::Approve => approval::approve(&self.store, tick_id)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            TickOperation::Reject => {
                let feedback = payload.message.as_deref().or(payload.reason.as_deref());
                approval::reject(&self.store, tick_id, feedback)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            TickOperation::Close => {
                match approval::route_close(&self.store, tick_id, payload.reason.as_deref(), false)
                    .await
                    .map_err(|e| e.to_string())?
                {
                    CloseOutcome::ChildrenOpen(children) => {
                        Err(format!("epic has open children: {}", children.join(", ")))
                    }
                    _ => Ok(()),
                }
            }
            TickOperation::Reopen => {
                let mut tick = self.store.read(tick_id).map_err(|e| e.to_string())?;
                tick.reopen();
                self.store
                    .write_as(&tick, CLOUD_AUTHOR)
                    .map_err(|e| e.to_string())
            }
        };
        // The operation may write more than once; refresh the echo window.
        self.pending.mark(&path);
        result
    }

    fn set_state(&self, state: SyncState) {
        let _ = self.state_tx.send(state);
    }

    #[cfg(test)]
    fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    #[cfg(test)]
    fn queue(&self) -> &OfflineQueue {
        &self.queue
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tk_core::types::{Awaiting, Requires, Status, TickType, Verdict};

    fn client() -> (tempfile::TempDir, Arc<SyncClient>) {
        let dir = tempfile::tempdir().unwrap();
        let store = TickStore::new(dir.path());
        store.ensure().unwrap();
        let settings = RemoteSettings {
            url: "wss://example.test/api".into(),
            token: Some("t0k3n".into()),
        };
        let client = SyncClient::new(store, "octo/widgets", settings);
        (dir, client)
    }

    fn make(id: &str) -> Tick {
        Tick::new(id, format!("tick {id}"), TickType::Task, "alice")
    }

    #[test]
    fn endpoint_url_encodes_project() {
        let (_dir, client) = client();
        assert_eq!(
            client.endpoint_url(),
            "wss://example.test/api/octo%2Fwidgets/sync?token=t0k3n&type=local"
        );
    }

    #[tokio::test]
    async fn newer_remote_tick_wins() {
        let (_dir, client) = client();
        let mut local = make("a1b");
        local.title = "local title".into();
        client.store.write(&local).unwrap();

        let mut remote = local.clone();
        remote.title = "remote title".into();
        remote.updated_at = local.updated_at + ChronoDuration::seconds(5);

        client
            .handle_remote(SyncMessage::TickUpdated {
                tick: Box::new(remote),
            })
            .await
            .unwrap();

        assert_eq!(client.store.read("a1b").unwrap().title, "remote title");
        // The write was marked for echo suppression.
        assert!(!client.pending().is_empty());
    }

    #[tokio::test]
    async fn older_remote_tick_is_ignored() {
        let (_dir, client) = client();
        let mut local = make("a1b");
        local.title = "local title".into();
        client.store.write(&local).unwrap();

        let mut remote = local.clone();
        remote.title = "stale remote".into();
        remote.updated_at = local.updated_at - ChronoDuration::seconds(5);

        client
            .handle_remote(SyncMessage::TickUpdated {
                tick: Box::new(remote),
            })
            .await
            .unwrap();

        assert_eq!(client.store.read("a1b").unwrap().title, "local title");
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn unknown_remote_tick_is_created() {
        let (_dir, client) = client();
        client
            .handle_remote(SyncMessage::TickCreated {
                tick: Box::new(make("z9y")),
            })
            .await
            .unwrap();
        assert!(client.store.read("z9y").is_ok());
    }

    #[tokio::test]
    async fn remote_delete_removes_file() {
        let (_dir, client) = client();
        client.store.write(&make("a1b")).unwrap();

        client
            .handle_remote(SyncMessage::TickDeleted { id: "a1b".into() })
            .await
            .unwrap();

        assert!(matches!(
            client.store.read("a1b"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn state_full_applies_each_tick() {
        let (_dir, client) = client();
        let mut ticks = HashMap::new();
        ticks.insert("a1b".to_string(), make("a1b"));
        ticks.insert("b2c".to_string(), make("b2c"));

        client
            .handle_remote(SyncMessage::StateFull { ticks })
            .await
            .unwrap();

        assert!(client.store.read("a1b").is_ok());
        assert!(client.store.read("b2c").is_ok());
    }

    #[tokio::test]
    async fn operation_approve_closes_awaiting_tick() {
        let (_dir, client) = client();
        let mut t = make("a1b");
        t.awaiting = Some(Awaiting::Approval);
        client.store.write(&t).unwrap();

        client
            .apply_operation(TickOperation::Approve, "a1b", &OperationPayload::default())
            .await
            .unwrap();

        let t = client.store.read("a1b").unwrap();
        assert_eq!(t.status, Status::Closed);
        assert_eq!(t.verdict, None);
    }

    #[tokio::test]
    async fn operation_reject_lands_feedback_note() {
        let (_dir, client) = client();
        let mut t = make("a1b");
        t.awaiting = Some(Awaiting::Review);
        client.store.write(&t).unwrap();

        client
            .apply_operation(
                TickOperation::Reject,
                "a1b",
                &OperationPayload {
                    message: Some("needs more tests".into()),
                    reason: None,
                },
            )
            .await
            .unwrap();

        let t = client.store.read("a1b").unwrap();
        assert!(t.notes.contains("needs more tests"));
        assert_eq!(t.status, Status::Open);
        assert_eq!(t.awaiting, None);
    }

    #[tokio::test]
    async fn operation_close_respects_gate() {
        let (_dir, client) = client();
        let mut t = make("a1b");
        t.requires = Some(Requires::Approval);
        client.store.write(&t).unwrap();

        client
            .apply_operation(TickOperation::Close, "a1b", &OperationPayload::default())
            .await
            .unwrap();

        let t = client.store.read("a1b").unwrap();
        assert_eq!(t.status, Status::Open);
        assert_eq!(t.awaiting, Some(Awaiting::Approval));
    }

    #[tokio::test]
    async fn operation_reopen() {
        let (_dir, client) = client();
        let mut t = make("a1b");
        t.close("done");
        client.store.write(&t).unwrap();

        client
            .apply_operation(TickOperation::Reopen, "a1b", &OperationPayload::default())
            .await
            .unwrap();

        assert_eq!(client.store.read("a1b").unwrap().status, Status::Open);
    }

    #[tokio::test]
    async fn operation_add_note_requires_message() {
        let (_dir, client) = client();
        client.store.write(&make("a1b")).unwrap();

        let err = client
            .apply_operation(TickOperation::AddNote, "a1b", &OperationPayload::default())
            .await
            .unwrap_err();
        assert!(err.contains("message"));
    }

    #[tokio::test]
    async fn operation_on_missing_tick_errors_without_local_damage() {
        let (_dir, client) = client();
        let err = client
            .apply_operation(
                TickOperation::AddNote,
                "zzz",
                &OperationPayload {
                    message: Some("hi".into()),
                    reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn disconnected_send_queues_updates_but_drops_run_events() {
        let (_dir, client) = client();
        client.store.write(&make("a1b")).unwrap();

        client
            .send_or_queue(SyncMessage::TickUpdate {
                tick: Box::new(client.store.read("a1b").unwrap()),
            })
            .await;
        client
            .send_run_event(serde_json::json!({"chunk": "hello"}))
            .await;
        client
            .send_or_queue(SyncMessage::TickDelete { id: "a1b".into() })
            .await;

        assert_eq!(client.queue().len(), 2);
        let drained = client.queue().drain();
        assert!(matches!(&drained[0], SyncMessage::TickUpdate { .. }));
        assert!(matches!(&drained[1], SyncMessage::TickDelete { .. }));
    }

    #[tokio::test]
    async fn sync_full_includes_open_and_recently_closed() {
        let (_dir, client) = client();
        client.store.write(&make("a1b")).unwrap();

        let mut recent = make("b2c");
        recent.close("done");
        client.store.write(&recent).unwrap();

        let mut old = make("c3d");
        old.close("done");
        old.closed_at = Some(chrono::Utc::now() - ChronoDuration::hours(48));
        client.store.write(&old).unwrap();

        let ticks = client.sync_full_ticks().await.unwrap();
        assert!(ticks.contains_key("a1b"));
        assert!(ticks.contains_key("b2c"));
        assert!(!ticks.contains_key("c3d"));
    }

    #[tokio::test]
    async fn verdict_cycle_via_operations() {
        let (_dir, client) = client();
        let mut t = make("a1b");
        t.requires = Some(Requires::Review);
        client.store.write(&t).unwrap();

        // Remote close routes into awaiting review.
        client
            .apply_operation(TickOperation::Close, "a1b", &OperationPayload::default())
            .await
            .unwrap();
        assert_eq!(
            client.store.read("a1b").unwrap().awaiting,
            Some(Awaiting::Review)
        );

        // Remote approve closes it for good.
        client
            .apply_operation(TickOperation::Approve, "a1b", &OperationPayload::default())
            .await
            .unwrap();
        let t = client.store.read("a1b").unwrap();
        assert_eq!(t.status, Status::Closed);
        assert_eq!(t.awaiting, None);
        assert_eq!(t.verdict, None::<Verdict>);
    }
}
