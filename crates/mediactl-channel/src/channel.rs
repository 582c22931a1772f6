use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use mediactl_frame::{
    classify, emit_engine_log, FrameCodec, FrameConfig, PayloadKind, MAX_PAYLOAD,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::correlator::{PendingRequests, Reply, RequestIdGenerator};
use crate::error::{ChannelError, Result};
use crate::message::{Incoming, Notification, NotifyMessage, RequestMessage};
use crate::notification::{NotificationRouter, Subscription};
use crate::ordering::{DispatchGate, DispatchGuard};

/// Delay between `close()` and tearing down the I/O tasks, so frames already
/// queued can still flush.
pub const CLOSE_GRACE: Duration = Duration::from_millis(200);

/// Configuration shared by [`Channel`] and [`crate::PayloadChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Frame limits for both directions.
    pub frame: FrameConfig,
    /// Engine process id, attached to re-emitted engine log lines.
    pub pid: Option<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            pid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// JSON messages interleaved with engine log lines.
    Control,
    /// Every received notification is followed by one payload frame.
    Payload,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Control => "Channel",
            Mode::Payload => "PayloadChannel",
        }
    }
}

/// State shared by the public handle and the I/O tasks.
pub(crate) struct Shared {
    mode: Mode,
    config: ChannelConfig,
    ids: Mutex<RequestIdGenerator>,
    pending: Mutex<PendingRequests>,
    outgoing: mpsc::UnboundedSender<Bytes>,
    notifications: NotificationRouter,
    gate: DispatchGate,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed_tx: watch::Sender<bool>,
    /// Set by `close()`; nothing is delivered to subscribers afterwards.
    stopped: AtomicBool,
}

impl Shared {
    /// Spawn writer, reader and dispatcher tasks over the given halves.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<R, W>(
        mode: Mode,
        reader: R,
        writer: W,
        notifications: NotificationRouter,
        config: ChannelConfig,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Self {
            mode,
            config,
            ids: Mutex::new(RequestIdGenerator::new()),
            pending: Mutex::new(PendingRequests::new()),
            outgoing,
            notifications,
            gate: DispatchGate::new(),
            tasks: Mutex::new(Vec::with_capacity(3)),
            closed_tx: watch::Sender::new(false),
            stopped: AtomicBool::new(false),
        });

        let write_task = tokio::spawn(write_loop(
            mode,
            writer,
            outgoing_rx,
            shared.config.frame.clone(),
        ));
        let read_task = tokio::spawn(read_loop(Arc::clone(&shared), reader, dispatch_tx));
        let dispatch_task = tokio::spawn(dispatch_loop(Arc::clone(&shared), dispatch_rx));
        shared
            .tasks
            .lock()
            .extend([write_task, read_task, dispatch_task]);

        shared
    }

    pub(crate) fn closed(&self) -> bool {
        self.pending.lock().is_closed()
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Reject everything pending and wake `wait_closed()` callers.
    fn mark_closed(&self) -> bool {
        let newly = self.pending.lock().close();
        self.closed_tx.send_replace(true);
        newly
    }

    pub(crate) async fn wait_closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives in `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub(crate) fn notifications(&self) -> &NotificationRouter {
        &self.notifications
    }

    fn encode_json<T: Serialize>(&self, message: &T) -> Result<Bytes> {
        let encoded = serde_json::to_vec(message)?;
        self.check_size(encoded.len())?;
        Ok(Bytes::from(encoded))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        let max = self.config.frame.max_payload_size.min(MAX_PAYLOAD);
        if size > max {
            return Err(ChannelError::RequestTooLarge { size, max });
        }
        Ok(())
    }

    fn enqueue(&self, frame: Bytes) -> Result<()> {
        self.outgoing.send(frame).map_err(|_| ChannelError::Closed)
    }

    /// Write a request (plus optional payload frame) and register it as pending.
    pub(crate) fn send_request(
        &self,
        method: &str,
        internal: Value,
        data: Value,
        payload: Option<Bytes>,
    ) -> Result<(u32, oneshot::Receiver<Reply>)> {
        let id = self.ids.lock().next_id();
        tracing::debug!(channel = self.mode.name(), method, id, "request()");

        let frame = self.encode_json(&RequestMessage {
            id,
            method,
            internal: &internal,
            data: &data,
        })?;
        if let Some(payload) = &payload {
            self.check_size(payload.len())?;
        }

        // Registering under the pending lock makes the closed check and the
        // write atomic with respect to close().
        let mut pending = self.pending.lock();
        let rx = pending.insert(id, method)?;
        let written = self
            .enqueue(frame)
            .and_then(|()| payload.map_or(Ok(()), |payload| self.enqueue(payload)));
        if let Err(err) = written {
            pending.remove(id);
            return Err(err);
        }
        Ok((id, rx))
    }

    /// Write a `{event, internal, data}` notification followed by its payload.
    pub(crate) fn send_notification(
        &self,
        event: &str,
        internal: Value,
        data: Value,
        payload: Bytes,
    ) -> Result<()> {
        tracing::debug!(channel = self.mode.name(), event, "notify()");

        let frame = self.encode_json(&NotifyMessage {
            event,
            internal: &internal,
            data: &data,
        })?;
        self.check_size(payload.len())?;

        let pending = self.pending.lock();
        if pending.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.enqueue(frame)?;
        self.enqueue(payload)
    }

    pub(crate) async fn await_reply(
        &self,
        id: u32,
        rx: oneshot::Receiver<Reply>,
    ) -> Result<(Value, DispatchGuard)> {
        let (outcome, guard) = rx.await.map_err(|_| ChannelError::Closed)?;
        match outcome {
            Ok(data) => Ok((data, guard)),
            Err(err) => {
                if let ChannelError::Rejected { reason, .. } = &err {
                    tracing::warn!(channel = self.mode.name(), id, %reason, "request failed");
                }
                Err(err)
            }
        }
    }

    /// Mark closed, reject every pending request, and tear down the tasks
    /// after [`CLOSE_GRACE`].
    pub(crate) fn close(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if self.mark_closed() {
            tracing::debug!(channel = self.mode.name(), "close()");
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(CLOSE_GRACE).await;
                    for task in tasks {
                        task.abort();
                    }
                });
            }
            Err(_) => {
                for task in tasks {
                    task.abort();
                }
            }
        }
    }

    fn handle_response(&self, seq: u64, id: u32, outcome: crate::message::Outcome) {
        let guard = self.gate.hold(seq);
        let result = outcome.into_result(id);
        let succeeded = result.is_ok();
        match self.pending.lock().resolve(id, (result, guard)) {
            Some(method) if succeeded => {
                tracing::debug!(channel = self.mode.name(), %method, id, "request succeeded");
            }
            Some(_) => {}
            None => {
                tracing::warn!(
                    channel = self.mode.name(),
                    id,
                    "received response does not match any sent request"
                );
            }
        }
    }

    /// Handle one JSON message. Returns a notification to dispatch, if any.
    fn handle_json(&self, seq: u64, payload: &[u8]) -> Option<Notification> {
        match Incoming::parse(payload) {
            Ok(Incoming::Response { id, outcome }) => {
                self.handle_response(seq, id, outcome);
                None
            }
            Ok(Incoming::Notification(notification)) => Some(notification),
            Ok(Incoming::Unknown) => {
                tracing::warn!(
                    channel = self.mode.name(),
                    "received message is not a response nor a notification"
                );
                None
            }
            Err(err) => {
                tracing::error!(
                    channel = self.mode.name(),
                    error = %err,
                    "received invalid JSON from the engine"
                );
                None
            }
        }
    }

    /// Handle one control-channel frame.
    fn handle_control_frame(&self, seq: u64, frame: &[u8]) -> Option<Notification> {
        match classify(frame) {
            PayloadKind::Json(json) => self.handle_json(seq, json),
            PayloadKind::Log { tag, text } => {
                emit_engine_log(tag, text, self.config.pid);
                None
            }
            PayloadKind::Unexpected(first) => {
                tracing::warn!(
                    channel = self.mode.name(),
                    first_byte = ?first,
                    len = frame.len(),
                    "unexpected data received from the engine"
                );
                None
            }
        }
    }

    /// Handle one payload-channel frame, pairing notifications with the
    /// binary frame that follows them.
    fn handle_payload_frame(
        &self,
        seq: u64,
        frame: Bytes,
        ongoing: &mut Option<Notification>,
    ) -> Option<Notification> {
        if let Some(mut notification) = ongoing.take() {
            notification.payload = Some(frame);
            return Some(notification);
        }
        if let Some(notification) = self.handle_json(seq, &frame) {
            *ongoing = Some(notification);
        }
        None
    }
}

async fn write_loop<W>(
    mode: Mode,
    writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
    config: FrameConfig,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, FrameCodec::with_config(config));
    while let Some(frame) = outgoing.recv().await {
        if let Err(err) = sink.send(frame).await {
            tracing::error!(channel = mode.name(), error = %err, "writing to the engine failed");
            break;
        }
    }
}

async fn read_loop<R>(
    shared: Arc<Shared>,
    reader: R,
    dispatch: mpsc::UnboundedSender<(u64, Notification)>,
) where
    R: AsyncRead + Unpin,
{
    let mode = shared.mode;
    let mut frames = FramedRead::new(reader, FrameCodec::with_config(shared.config.frame.clone()));
    let mut seq: u64 = 0;
    let mut ongoing: Option<Notification> = None;

    while let Some(next) = frames.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(channel = mode.name(), error = %err, "reading from the engine failed");
                break;
            }
        };
        if shared.stopped() {
            break;
        }
        seq += 1;

        let notification = match mode {
            Mode::Control => shared.handle_control_frame(seq, &frame),
            Mode::Payload => shared.handle_payload_frame(seq, frame, &mut ongoing),
        };
        if let Some(notification) = notification {
            if dispatch.send((seq, notification)).is_err() {
                break;
            }
        }
    }

    tracing::debug!(channel = mode.name(), "ended by the engine");
    // Nothing will ever answer what is still pending.
    shared.mark_closed();
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    mut incoming: mpsc::UnboundedReceiver<(u64, Notification)>,
) {
    while let Some((seq, notification)) = incoming.recv().await {
        shared.gate.wait_turn(seq).await;
        if shared.stopped() {
            tracing::debug!(
                channel = shared.mode.name(),
                event = %notification.event,
                "closed, dropping notification"
            );
            continue;
        }
        shared.notifications.dispatch(&notification);
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Control channel to the engine: JSON requests, responses and notifications.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Start a channel over the engine's response-out (`reader`) and
    /// request-in (`writer`) pipes with default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(reader: R, writer: W, notifications: NotificationRouter) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, notifications, ChannelConfig::default())
    }

    /// Start a channel with explicit configuration.
    pub fn with_config<R, W>(
        reader: R,
        writer: W,
        notifications: NotificationRouter,
        config: ChannelConfig,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            shared: Shared::spawn(Mode::Control, reader, writer, notifications, config),
        }
    }

    /// Send a request and wait for its response data.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        internal: impl Serialize,
        data: impl Serialize,
    ) -> Result<T> {
        let (data, _guard) = self.request_guarded(method, internal, data).await?;
        Ok(data)
    }

    /// Send a request; the returned guard holds back notifications received
    /// after the response until it is dropped.
    pub async fn request_guarded<T: DeserializeOwned>(
        &self,
        method: &str,
        internal: impl Serialize,
        data: impl Serialize,
    ) -> Result<(T, DispatchGuard)> {
        let (id, rx) =
            self.shared
                .send_request(method, to_value(internal)?, to_value(data)?, None)?;
        let (data, guard) = self.shared.await_reply(id, rx).await?;
        Ok((serde_json::from_value(data)?, guard))
    }

    /// Send a request without waiting for its outcome. Failures are logged.
    pub fn request_detached(&self, method: &str, internal: impl Serialize, data: impl Serialize) {
        let sent = to_value(internal).and_then(|internal| {
            to_value(data).and_then(|data| self.shared.send_request(method, internal, data, None))
        });
        if let Err(err) = sent {
            tracing::debug!(method, error = %err, "detached request not sent");
        }
    }

    /// Listen to notifications for `target_id`.
    pub fn subscribe<F>(&self, target_id: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.notifications().subscribe(target_id, handler)
    }

    pub fn notifications(&self) -> &NotificationRouter {
        self.shared.notifications()
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn closed(&self) -> bool {
        self.shared.closed()
    }

    /// Resolve once the channel is closed, locally or because the engine
    /// ended the stream.
    pub async fn wait_closed(&self) {
        self.shared.wait_closed().await;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::BytesMut;
    use mediactl_frame::encode_frame;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::error::RejectionKind;

    struct Engine {
        requests: FramedRead<DuplexStream, FrameCodec>,
        responses: DuplexStream,
    }

    impl Engine {
        async fn next_request(&mut self) -> Value {
            let frame = self.requests.next().await.unwrap().unwrap();
            serde_json::from_slice(&frame).unwrap()
        }

        async fn send_raw(&mut self, payload: &[u8]) {
            let mut buf = BytesMut::new();
            encode_frame(payload, MAX_PAYLOAD, &mut buf).unwrap();
            self.responses.write_all(&buf).await.unwrap();
        }

        async fn send(&mut self, message: Value) {
            self.send_raw(&serde_json::to_vec(&message).unwrap()).await;
        }
    }

    fn pair() -> (Channel, Engine) {
        let (request_writer, request_reader) = tokio::io::duplex(64 * 1024);
        let (response_writer, response_reader) = tokio::io::duplex(64 * 1024);
        let channel = Channel::spawn(response_reader, request_writer, NotificationRouter::new());
        let engine = Engine {
            requests: FramedRead::new(request_reader, FrameCodec::new()),
            responses: response_writer,
        };
        (channel, engine)
    }

    #[tokio::test]
    async fn request_resolves_with_response_data() {
        let (channel, mut engine) = pair();

        let call = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .request::<Value>("worker.dump", json!({}), ())
                    .await
            }
        });

        let request = engine.next_request().await;
        assert_eq!(request["id"], 1);
        assert_eq!(request["method"], "worker.dump");
        assert!(request.get("data").is_none());

        engine
            .send(json!({ "id": 1, "accepted": true, "data": { "pid": 42 } }))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), json!({ "pid": 42 }));
    }

    #[tokio::test]
    async fn rejected_request_carries_kind_and_reason() {
        let (channel, mut engine) = pair();

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request::<()>("router.close", json!({}), ()).await }
        });

        let request = engine.next_request().await;
        engine
            .send(json!({ "id": request["id"], "error": "InvalidStateError", "reason": "gone" }))
            .await;

        match call.await.unwrap() {
            Err(ChannelError::Rejected { kind, reason }) => {
                assert_eq!(kind, RejectionKind::InvalidState);
                assert_eq!(reason, "gone");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_rejects_pending_and_writes_nothing_after() {
        let (channel, mut engine) = pair();

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request::<()>("worker.dump", json!({}), ()).await }
        });
        let _ = engine.next_request().await;

        channel.close();
        assert!(channel.closed());
        assert!(matches!(call.await.unwrap(), Err(ChannelError::Closed)));

        let after = channel.request::<()>("worker.dump", json!({}), ()).await;
        assert!(matches!(after, Err(ChannelError::Closed)));

        // Writer is torn down after the grace delay; no further frame arrives.
        assert!(engine.requests.next().await.is_none());
    }

    #[tokio::test]
    async fn close_stops_delivering_notifications() {
        let (channel, mut engine) = pair();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _sub = channel.subscribe("p1", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        engine
            .send(json!({ "targetId": "p1", "event": "score" }))
            .await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("notification delivered while open");

        channel.close();
        engine
            .send(json!({ "targetId": "p1", "event": "score" }))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped() {
        let (channel, mut engine) = pair();

        engine.send(json!({ "id": 999, "accepted": true })).await;
        engine.send_raw(b"Wjust a warning").await;
        engine.send_raw(b"?garbage").await;

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request::<Value>("worker.dump", json!({}), ()).await }
        });
        let request = engine.next_request().await;
        engine
            .send(json!({ "id": request["id"], "accepted": true, "data": 1 }))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn notification_waits_for_guarded_response() {
        let (channel, mut engine) = pair();
        let seen = Arc::new(AtomicUsize::new(0));

        let call = tokio::spawn({
            let channel = channel.clone();
            let seen = Arc::clone(&seen);
            async move {
                let (id, guard) = channel
                    .request_guarded::<String>("transport.produce", json!({}), ())
                    .await
                    .unwrap();
                // Simulate entity setup before subscribing.
                tokio::time::sleep(Duration::from_millis(50)).await;
                let counter = Arc::clone(&seen);
                let sub = channel.subscribe(id, move |n| {
                    assert_eq!(n.event, "score");
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                drop(guard);
                sub
            }
        });

        let request = engine.next_request().await;
        engine
            .send(json!({ "id": request["id"], "accepted": true, "data": "p1" }))
            .await;
        engine
            .send(json!({ "targetId": "p1", "event": "score", "data": [] }))
            .await;

        let _sub = call.await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("notification delivered after subscription");
    }

    #[tokio::test]
    async fn stream_end_rejects_pending() {
        let (channel, mut engine) = pair();

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request::<()>("worker.dump", json!({}), ()).await }
        });
        let _ = engine.next_request().await;

        drop(engine);
        assert!(matches!(call.await.unwrap(), Err(ChannelError::Closed)));
        tokio::time::timeout(Duration::from_secs(1), channel.wait_closed())
            .await
            .expect("stream end closes the channel");
    }

    #[tokio::test]
    async fn oversized_request_is_refused() {
        let (request_writer, _request_reader) = tokio::io::duplex(1024);
        let (_response_writer, response_reader) = tokio::io::duplex(1024);
        let channel = Channel::with_config(
            response_reader,
            request_writer,
            NotificationRouter::new(),
            ChannelConfig {
                frame: FrameConfig {
                    max_payload_size: 32,
                },
                pid: None,
            },
        );

        let result = channel
            .request::<()>(
                "worker.updateSettings",
                json!({}),
                json!({ "logTags": vec!["x"; 20] }),
            )
            .await;
        assert!(matches!(result, Err(ChannelError::RequestTooLarge { .. })));
    }
}
