#![allow(dead_code)]

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use mediactl::frame::FrameCodec;
use mediactl::ortc::{RtpCodecCapability, RtpParameters};
use mediactl::{ListenIp, Router, RouterOptions, Worker, WorkerSettings};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};

pub const PID: u32 = 4242;

const PIPE_CAPACITY: usize = 1024 * 1024;

/// A request the engine received on either channel.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub internal: Value,
    pub data: Value,
}

/// A notification the engine received on the payload channel.
#[derive(Debug, Clone)]
pub struct PayloadMessage {
    pub event: String,
    pub internal: Value,
    pub data: Value,
    pub payload: Bytes,
}

#[derive(Default)]
struct State {
    requests: Mutex<Vec<Recorded>>,
    payload_messages: Mutex<Vec<PayloadMessage>>,
    rejected: Mutex<HashSet<String>>,
    next_port: AtomicU16,
}

/// In-memory stand-in for the media engine.
///
/// Accepts every request with plausible data, records what it saw and lets
/// tests push notifications back.
pub struct FakeEngine {
    control: mpsc::UnboundedSender<Bytes>,
    payload: mpsc::UnboundedSender<Bytes>,
    state: Arc<State>,
    crash: watch::Sender<bool>,
}

/// Worker-side pipe ends.
pub struct WorkerEnds {
    pub control_reader: DuplexStream,
    pub control_writer: DuplexStream,
    pub payload_reader: DuplexStream,
    pub payload_writer: DuplexStream,
}

impl FakeEngine {
    /// Start the engine and queue its `running` notification.
    pub fn spawn() -> (Self, WorkerEnds) {
        let (control_writer, engine_control_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (engine_control_writer, control_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (payload_writer, engine_payload_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (engine_payload_writer, payload_reader) = tokio::io::duplex(PIPE_CAPACITY);

        let (control, control_rx) = mpsc::unbounded_channel();
        let (payload, payload_rx) = mpsc::unbounded_channel();
        let (crash, crashed) = watch::channel(false);
        let state = Arc::new(State {
            next_port: AtomicU16::new(40000),
            ..State::default()
        });

        tokio::spawn(write_frames(engine_control_writer, control_rx, crashed.clone()));
        tokio::spawn(write_frames(engine_payload_writer, payload_rx, crashed));
        tokio::spawn(serve_control(
            engine_control_reader,
            control.clone(),
            Arc::clone(&state),
        ));
        tokio::spawn(serve_payload(
            engine_payload_reader,
            payload.clone(),
            Arc::clone(&state),
        ));

        let engine = Self {
            control,
            payload,
            state,
            crash,
        };
        engine.notify(json!(PID), "running", Value::Null);

        (
            engine,
            WorkerEnds {
                control_reader,
                control_writer,
                payload_reader,
                payload_writer,
            },
        )
    }

    /// Send a notification on the control channel.
    pub fn notify(&self, target_id: Value, event: &str, data: Value) {
        let mut message = json!({ "targetId": target_id, "event": event });
        if !data.is_null() {
            message["data"] = data;
        }
        let _ = self.control.send(encode(&message));
    }

    /// Send a notification followed by its payload on the payload channel.
    pub fn notify_with_payload(&self, target_id: &str, event: &str, data: Value, payload: &[u8]) {
        let message = json!({ "targetId": target_id, "event": event, "data": data });
        let _ = self.payload.send(encode(&message));
        let _ = self.payload.send(Bytes::copy_from_slice(payload));
    }

    /// Make every later request for `method` fail.
    pub fn reject(&self, method: &str) {
        self.state.rejected.lock().insert(method.to_string());
    }

    pub fn accept(&self, method: &str) {
        self.state.rejected.lock().remove(method);
    }

    /// Close the engine's side of both channels, as if the process died.
    pub fn crash(&self) {
        let _ = self.crash.send(true);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    pub fn last(&self, method: &str) -> Option<Recorded> {
        self.state
            .requests
            .lock()
            .iter()
            .rev()
            .find(|request| request.method == method)
            .cloned()
    }

    pub fn payload_messages(&self) -> Vec<PayloadMessage> {
        self.state.payload_messages.lock().clone()
    }

    /// Wait until `method` has been requested `times` times in total.
    pub async fn wait_for(&self, method: &str, times: usize) {
        let reached = eventually(|| self.count(method) >= times).await;
        assert!(reached, "engine should receive {method} {times} time(s)");
    }
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn encode(message: &Value) -> Bytes {
    Bytes::from(serde_json::to_vec(message).expect("message should serialize"))
}

async fn write_frames(
    writer: DuplexStream,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    mut crashed: watch::Receiver<bool>,
) {
    let mut sink = FramedWrite::new(writer, FrameCodec::new());
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = async { let _ = crashed.wait_for(|crashed| *crashed).await; } => break,
        }
    }
}

async fn serve_control(
    reader: DuplexStream,
    replies: mpsc::UnboundedSender<Bytes>,
    state: Arc<State>,
) {
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    while let Some(Ok(frame)) = frames.next().await {
        let Ok(request) = serde_json::from_slice::<Value>(&frame) else {
            continue;
        };
        let _ = replies.send(encode(&reply(&request, &state)));
    }
}

async fn serve_payload(
    reader: DuplexStream,
    replies: mpsc::UnboundedSender<Bytes>,
    state: Arc<State>,
) {
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    while let Some(Ok(frame)) = frames.next().await {
        let Ok(message) = serde_json::from_slice::<Value>(&frame) else {
            continue;
        };
        let Some(Ok(payload)) = frames.next().await else {
            break;
        };
        if message.get("id").is_some() {
            let _ = replies.send(encode(&reply(&message, &state)));
        } else {
            state.payload_messages.lock().push(PayloadMessage {
                event: message["event"].as_str().unwrap_or_default().to_string(),
                internal: message["internal"].clone(),
                data: message["data"].clone(),
                payload,
            });
        }
    }
}

fn reply(request: &Value, state: &State) -> Value {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    state.requests.lock().push(Recorded {
        method: method.clone(),
        internal: request["internal"].clone(),
        data: request["data"].clone(),
    });

    let id = request["id"].clone();
    if state.rejected.lock().contains(&method) {
        return json!({ "id": id, "error": "Error", "reason": format!("{method} rejected") });
    }
    let data = respond(&method, &request["data"], state);
    json!({ "id": id, "accepted": true, "data": data })
}

fn tuple(port: u16) -> Value {
    json!({ "localIp": "127.0.0.1", "localPort": port, "protocol": "udp" })
}

fn sctp(data: &Value) -> (Value, Value) {
    if data["enableSctp"] == json!(true) {
        (
            json!({
                "port": 5000,
                "OS": data["numSctpStreams"]["OS"],
                "MIS": data["numSctpStreams"]["MIS"],
                "maxMessageSize": data["maxSctpMessageSize"],
            }),
            json!("new"),
        )
    } else {
        (Value::Null, Value::Null)
    }
}

fn srtp(data: &Value) -> Value {
    if data["enableSrtp"] == json!(true) {
        json!({
            "cryptoSuite": data.get("srtpCryptoSuite").cloned().unwrap_or(json!("AES_CM_128_HMAC_SHA1_80")),
            "keyBase64": "ZnQ3eWJraDg0d3ZoYzM5cXN1Y2pnaHU5NWxrZTVv",
        })
    } else {
        Value::Null
    }
}

fn respond(method: &str, data: &Value, state: &State) -> Value {
    let port = || state.next_port.fetch_add(1, Ordering::SeqCst);
    match method {
        "worker.getResourceUsage" => json!({ "ru_utime": 120, "ru_stime": 30, "ru_maxrss": 5000 }),
        "router.createWebRtcTransport" => {
            let (sctp_parameters, sctp_state) = sctp(data);
            json!({
                "iceRole": "controlled",
                "iceParameters": { "usernameFragment": "frag", "password": "secret", "iceLite": true },
                "iceCandidates": [{
                    "foundation": "udpcandidate",
                    "priority": 1_076_302_079,
                    "ip": "127.0.0.1",
                    "protocol": "udp",
                    "port": port(),
                    "type": "host"
                }],
                "iceState": "new",
                "dtlsParameters": {
                    "role": "auto",
                    "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD:EF" }]
                },
                "dtlsState": "new",
                "sctpParameters": sctp_parameters,
                "sctpState": sctp_state,
            })
        }
        "router.createPlainTransport" => {
            let (sctp_parameters, sctp_state) = sctp(data);
            let rtcp_tuple = if data["rtcpMux"] == json!(true) {
                Value::Null
            } else {
                tuple(port())
            };
            json!({
                "rtcpMux": data["rtcpMux"],
                "comedia": data["comedia"],
                "tuple": tuple(port()),
                "rtcpTuple": rtcp_tuple,
                "sctpParameters": sctp_parameters,
                "sctpState": sctp_state,
                "srtpParameters": srtp(data),
            })
        }
        "router.createPipeTransport" => {
            let (sctp_parameters, sctp_state) = sctp(data);
            json!({
                "tuple": tuple(port()),
                "sctpParameters": sctp_parameters,
                "sctpState": sctp_state,
                "rtx": data["enableRtx"],
                "srtpParameters": srtp(data),
            })
        }
        "router.createDirectTransport" => json!({ "direct": true }),
        "transport.connect" => {
            let mut connected = tuple(40000);
            if let Some(ip) = data.get("ip") {
                connected["remoteIp"] = ip.clone();
            }
            if let Some(remote_port) = data.get("port") {
                connected["remotePort"] = remote_port.clone();
            }
            json!({ "tuple": connected, "dtlsLocalRole": "client" })
        }
        "transport.restartIce" => json!({
            "iceParameters": { "usernameFragment": "frag2", "password": "secret2", "iceLite": true }
        }),
        "transport.produce" => {
            let encodings = data["rtpParameters"]["encodings"]
                .as_array()
                .map_or(0, Vec::len);
            let r#type = if encodings > 1 { "simulcast" } else { "simple" };
            json!({ "type": r#type })
        }
        "transport.consume" => json!({
            "paused": data["paused"],
            "producerPaused": false,
            "score": { "score": 10, "producerScore": 10, "producerScores": [10] },
        }),
        "transport.produceData" | "transport.consumeData" => data.clone(),
        "dataConsumer.getBufferedAmount" => json!({ "bufferedAmount": 0 }),
        _ => Value::Null,
    }
}

pub fn listen_ip() -> ListenIp {
    ListenIp::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub fn media_codecs() -> Vec<RtpCodecCapability> {
    serde_json::from_value(json!([
        { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
        { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 },
    ]))
    .expect("codecs should parse")
}

pub fn vp8_rtp_parameters() -> RtpParameters {
    serde_json::from_value(json!({
        "mid": "VIDEO",
        "codecs": [{
            "mimeType": "video/VP8",
            "payloadType": 96,
            "clockRate": 90000,
            "rtcpFeedback": [{ "type": "nack" }, { "type": "nack", "parameter": "pli" }]
        }],
        "headerExtensions": [
            { "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "id": 1 }
        ],
        "encodings": [{ "ssrc": 22222222 }],
        "rtcp": { "cname": "video-1" }
    }))
    .expect("rtp parameters should parse")
}

pub fn opus_rtp_parameters() -> RtpParameters {
    serde_json::from_value(json!({
        "mid": "AUDIO",
        "codecs": [{
            "mimeType": "audio/opus",
            "payloadType": 111,
            "clockRate": 48000,
            "channels": 2,
            "parameters": { "useinbandfec": 1 }
        }],
        "encodings": [{ "ssrc": 11111111 }],
        "rtcp": { "cname": "audio-1" }
    }))
    .expect("rtp parameters should parse")
}

pub async fn start_worker() -> (Worker, FakeEngine) {
    let (engine, ends) = FakeEngine::spawn();
    let worker = Worker::from_endpoints(
        PID,
        ends.control_reader,
        ends.control_writer,
        ends.payload_reader,
        ends.payload_writer,
        WorkerSettings::default(),
    )
    .await
    .expect("worker should start");
    (worker, engine)
}

pub async fn create_router(worker: &Worker) -> Router {
    worker
        .create_router(RouterOptions::new(media_codecs()))
        .await
        .expect("router should be created")
}
