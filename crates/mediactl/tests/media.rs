mod common;

use std::sync::Arc;

use common::{create_router, listen_ip, opus_rtp_parameters, start_worker, vp8_rtp_parameters};
use mediactl::data_structures::{DtlsFingerprint, DtlsParameters, DtlsRole};
use mediactl::ortc::MediaKind;
use mediactl::{
    AudioLevelObserverOptions, ConsumerEvent, ConsumerOptions, DirectTransportOptions,
    EntityKind, Error, ObserverEvent, PlainTransportOptions, ProducerOptions, RtpObserverEvent,
    WebRtcTransportOptions,
};
use parking_lot::Mutex;
use serde_json::json;

#[tokio::test]
async fn produce_maps_codecs_and_consume_negotiates_vp8() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;
    let send = router
        .create_plain_transport(PlainTransportOptions::new(listen_ip()))
        .await
        .expect("send transport should be created");
    let recv = router
        .create_webrtc_transport(WebRtcTransportOptions::new(vec![listen_ip()]))
        .await
        .expect("recv transport should be created");

    let producer = send
        .produce(ProducerOptions::new(MediaKind::Video, vp8_rtp_parameters()))
        .await
        .expect("producer should be created");

    let request = engine
        .last("transport.produce")
        .expect("produce should be requested");
    assert_eq!(request.data["kind"], "video");
    assert_eq!(
        request.data["rtpMapping"]["codecs"],
        json!([{ "payloadType": 96, "mappedPayloadType": 101 }])
    );
    assert_eq!(send.producers().len(), 1);

    let caps = router.rtp_capabilities().clone();
    assert!(router.can_consume(producer.id(), &caps));

    let first = recv
        .consume(ConsumerOptions::new(producer.id(), caps.clone()))
        .await
        .expect("first consumer should be created");
    let second = recv
        .consume(ConsumerOptions::new(producer.id(), caps))
        .await
        .expect("second consumer should be created");

    let params = first.rtp_parameters();
    assert_eq!(params.codecs[0].mime_type, "video/VP8");
    assert_eq!(params.codecs[0].payload_type, 101);
    assert_eq!(params.encodings.len(), 1);
    assert_eq!(params.mid.as_deref(), Some("0"));
    assert_eq!(second.rtp_parameters().mid.as_deref(), Some("1"));
    assert_eq!(first.producer_id(), producer.id());
    assert_eq!(first.score().score, 10);
}

#[tokio::test]
async fn consume_unknown_producer_fails() {
    let (worker, _engine) = start_worker().await;
    let router = create_router(&worker).await;
    let transport = router
        .create_webrtc_transport(WebRtcTransportOptions::new(vec![listen_ip()]))
        .await
        .expect("transport should be created");

    let err = transport
        .consume(ConsumerOptions::new("nope", router.rtp_capabilities().clone()))
        .await
        .expect_err("unknown producer should be refused");
    assert_eq!(err.to_string(), "Producer with id \"nope\" not found");
    assert!(!router.can_consume("nope", router.rtp_capabilities()));
}

#[tokio::test]
async fn empty_listen_ips_are_refused_before_any_request() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;

    let err = router
        .create_webrtc_transport(WebRtcTransportOptions::new(Vec::new()))
        .await
        .expect_err("transport without listen ips should be refused");
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(engine.count("router.createWebRtcTransport"), 0);
}

#[tokio::test]
async fn webrtc_connect_and_ice_restart_update_local_state() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;
    let transport = router
        .create_webrtc_transport(WebRtcTransportOptions::new(vec![listen_ip()]))
        .await
        .expect("transport should be created");
    assert_eq!(transport.ice_candidates().len(), 1);

    transport
        .connect(DtlsParameters {
            role: DtlsRole::Server,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "12:34".to_string(),
            }],
        })
        .await
        .expect("connect should succeed");
    let dtls = transport
        .dtls_parameters()
        .expect("webrtc transport should carry DTLS parameters");
    assert_eq!(dtls.role, DtlsRole::Client);
    let request = engine
        .last("transport.connect")
        .expect("connect should be requested");
    assert_eq!(request.data["dtlsParameters"]["role"], "server");

    let ice = transport.restart_ice().await.expect("ICE restart should succeed");
    assert_eq!(ice.username_fragment, "frag2");
    let stored = transport
        .ice_parameters()
        .expect("webrtc transport should carry ICE parameters");
    assert_eq!(stored.username_fragment, "frag2");
}

#[tokio::test]
async fn producer_close_notification_closes_consumer() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;
    let transport = router
        .create_plain_transport(PlainTransportOptions::new(listen_ip()))
        .await
        .expect("transport should be created");
    let producer = transport
        .produce(ProducerOptions::new(MediaKind::Video, vp8_rtp_parameters()))
        .await
        .expect("producer should be created");
    let consumer = transport
        .consume(ConsumerOptions::new(
            producer.id(),
            router.rtp_capabilities().clone(),
        ))
        .await
        .expect("consumer should be created");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    consumer.on(move |event| sink.lock().push(format!("{event:?}")));

    engine.notify(json!(consumer.id()), "producerpause", serde_json::Value::Null);
    assert!(common::eventually(|| consumer.producer_paused()).await);
    assert!(consumer.paused() || consumer.producer_paused());

    engine.notify(json!(consumer.id()), "producerclose", serde_json::Value::Null);
    assert!(common::eventually(|| consumer.closed()).await);

    let events = events.lock().clone();
    assert_eq!(events, vec!["Pause", "ProducerPause", "ProducerClose"]);
    assert!(transport.consumers().is_empty());
    assert_eq!(engine.count("consumer.close"), 0);
}

#[tokio::test]
async fn producer_pause_updates_state_and_bus() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;
    let transport = router
        .create_plain_transport(PlainTransportOptions::new(listen_ip()))
        .await
        .expect("transport should be created");
    let producer = transport
        .produce(ProducerOptions::new(MediaKind::Audio, opus_rtp_parameters()))
        .await
        .expect("producer should be created");
    let mut bus = worker.observer().subscribe();

    producer.pause().await.expect("pause should succeed");
    producer.pause().await.expect("second pause should succeed");
    assert!(producer.paused());
    assert_eq!(engine.count("producer.pause"), 2);

    let event = bus.recv().await.expect("bus should carry the pause");
    assert_eq!(
        event,
        ObserverEvent::Paused {
            kind: EntityKind::Producer,
            id: producer.id().to_string(),
        }
    );

    producer.close();
    assert!(producer.closed());
    assert!(transport.producers().is_empty());
    engine.wait_for("producer.close", 1).await;
    assert!(!router.can_consume(producer.id(), router.rtp_capabilities()));
}

#[tokio::test]
async fn direct_transport_relays_rtp() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;
    let direct = router
        .create_direct_transport(DirectTransportOptions::default())
        .await
        .expect("direct transport should be created");
    let producer = direct
        .produce(ProducerOptions::new(MediaKind::Audio, opus_rtp_parameters()))
        .await
        .expect("producer should be created");

    producer
        .send(vec![0x80u8, 0x6f, 0x00, 0x01])
        .expect("rtp should be sent");
    direct
        .send_rtcp(vec![0x81u8, 0xc8])
        .expect("rtcp should be sent");

    assert!(common::eventually(|| engine.payload_messages().len() == 2).await);
    let messages = engine.payload_messages();
    assert_eq!(messages[0].event, "producer.send");
    assert_eq!(messages[0].internal["producerId"], producer.id());
    assert_eq!(messages[0].payload.as_ref(), &[0x80, 0x6f, 0x00, 0x01]);
    assert_eq!(messages[1].event, "transport.sendRtcp");

    let consumer = direct
        .consume(ConsumerOptions::new(
            producer.id(),
            router.rtp_capabilities().clone(),
        ))
        .await
        .expect("consumer should be created");
    let packets = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&packets);
    consumer.on(move |event| {
        if let ConsumerEvent::Rtp(packet) = event {
            sink.lock().push(packet.clone());
        }
    });

    engine.notify_with_payload(consumer.id(), "rtp", serde_json::Value::Null, &[1, 2, 3]);
    assert!(common::eventually(|| packets.lock().len() == 1).await);
    assert_eq!(packets.lock()[0].as_ref(), &[1, 2, 3]);

    let err = direct
        .set_max_incoming_bitrate(1_000_000)
        .await
        .expect_err("bitrate limits do not apply to direct transports");
    assert!(matches!(err, Error::Unsupported(_)));
}

#[tokio::test]
async fn producer_send_requires_direct_transport() {
    let (worker, _engine) = start_worker().await;
    let router = create_router(&worker).await;
    let transport = router
        .create_plain_transport(PlainTransportOptions::new(listen_ip()))
        .await
        .expect("transport should be created");
    let producer = transport
        .produce(ProducerOptions::new(MediaKind::Audio, opus_rtp_parameters()))
        .await
        .expect("producer should be created");

    let err = producer
        .send(vec![0u8; 12])
        .expect_err("send should be refused off a direct transport");
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn audio_level_observer_resolves_producers() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;
    let transport = router
        .create_plain_transport(PlainTransportOptions::new(listen_ip()))
        .await
        .expect("transport should be created");
    let producer = transport
        .produce(ProducerOptions::new(MediaKind::Audio, opus_rtp_parameters()))
        .await
        .expect("producer should be created");
    let observer = router
        .create_audio_level_observer(AudioLevelObserverOptions::default())
        .await
        .expect("observer should be created");

    observer
        .add_producer(producer.id())
        .await
        .expect("producer should be added");
    let request = engine
        .last("rtpObserver.addProducer")
        .expect("addProducer should be requested");
    assert_eq!(request.data["producerId"], producer.id());

    let volumes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&volumes);
    observer.on(move |event| {
        if let RtpObserverEvent::Volumes(entries) = event {
            for entry in entries {
                sink.lock().push((entry.producer.id().to_string(), entry.volume));
            }
        }
    });

    engine.notify(
        json!(observer.id()),
        "volumes",
        json!([
            { "producerId": producer.id(), "volume": -40 },
            { "producerId": "gone", "volume": -30 }
        ]),
    );
    assert!(common::eventually(|| !volumes.lock().is_empty()).await);
    assert_eq!(
        volumes.lock().clone(),
        vec![(producer.id().to_string(), -40)]
    );

    router.close();
    assert!(observer.closed());
    assert!(router.rtp_observers().is_empty());
}

#[tokio::test]
async fn audio_level_observer_options_are_validated() {
    let (worker, engine) = start_worker().await;
    let router = create_router(&worker).await;

    let options = AudioLevelObserverOptions {
        threshold: 10,
        ..AudioLevelObserverOptions::default()
    };
    let err = router
        .create_audio_level_observer(options)
        .await
        .expect_err("positive threshold should be refused");
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(engine.count("router.createAudioLevelObserver"), 0);
}
