//! Session scenarios driven through the in-memory engine.

use crate::config::{PeerConfig, TricklePolicy};
use crate::engine::{
    Capabilities, Channel, ChannelState, EngineEvent, IceConnectionState, PeerConnectionState,
    StatsApi, StatsRecord,
};
use crate::error::Error;
use crate::peer::types::{CandidateInit, Endpoint, Payload, PeerEvent, TransceiverRequest};
use crate::signaling::SignalData;
use crate::test_util::engine::OFFER_SDP;
use crate::test_util::{exchange_signals, spawn_peer, spawn_peer_with, ANSWER_SDP};
use bytes::Bytes;
use serde_json::json;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const HOST: &str = "candidate:1 1 udp 2122260223 10.1.2.3 54400 typ host";
const MDNS: &str = "candidate:2 1 udp 2122260223 3f1c7a4e-1b2c.local 54401 typ host";

fn answer() -> SignalData {
    SignalData::Answer {
        sdp: ANSWER_SDP.into(),
    }
}

fn offer() -> SignalData {
    SignalData::Offer {
        sdp: OFFER_SDP.into(),
    }
}

fn binary(text: &str) -> Payload {
    Payload::Binary(Bytes::copy_from_slice(text.as_bytes()))
}

fn offer_sdp(signal: &SignalData) -> &str {
    match signal {
        SignalData::Offer { sdp } => sdp,
        other => panic!("expected an offer, got {other:?}"),
    }
}

fn has_error(events: &[PeerEvent]) -> bool {
    events.iter().any(|e| matches!(e, PeerEvent::Error(_)))
}

#[tokio::test(start_paused = true)]
async fn test_initiator_offers_once() {
    let mut a = spawn_peer(PeerConfig::initiator());
    let signal = a.next_signal().await;
    assert!(offer_sdp(&signal).contains("a=ice-options:trickle"));

    sleep(Duration::from_millis(10)).await;
    assert_eq!(a.engine.count("create_offer"), 1);
    assert_eq!(a.engine.count("create_data_channel"), 1);
    assert!(!a.drain().iter().any(|e| matches!(e, PeerEvent::Signal(_))));
}

#[tokio::test(start_paused = true)]
async fn test_responder_stays_quiet_until_offered() {
    let mut b = spawn_peer(PeerConfig::responder());
    sleep(Duration::from_millis(10)).await;
    assert!(b.drain().is_empty());
    assert!(b.engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_trickle_bundles_candidates() {
    let mut a = spawn_peer(PeerConfig::initiator().with_trickle(TricklePolicy::Disabled));
    a.engine
        .emit(EngineEvent::IceCandidate(Some(CandidateInit::new(HOST))));
    a.engine.emit(EngineEvent::IceCandidate(None));

    let (signal, _) = a.wait_for(|e| matches!(e, PeerEvent::Signal(_))).await;
    let PeerEvent::Signal(signal) = signal else {
        unreachable!()
    };
    assert!(!offer_sdp(&signal).contains("a=ice-options:trickle"));

    // well past the completion timeout
    sleep(Duration::from_secs(10)).await;
    let rest = a.drain();
    assert!(!rest.iter().any(|e| matches!(e, PeerEvent::Signal(_))));
    assert!(!rest.contains(&PeerEvent::IceTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_gathering_timeout_releases_description() {
    let mut a = spawn_peer(PeerConfig::initiator().with_trickle(TricklePolicy::Disabled));
    a.engine
        .emit(EngineEvent::IceCandidate(Some(CandidateInit::new(HOST))));

    let start = Instant::now();
    let (_, before) = a.wait_for(|e| matches!(e, PeerEvent::Signal(_))).await;
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
    assert_eq!(before.last(), Some(&PeerEvent::IceTimeout));

    a.peer.signal(answer()).unwrap();
    a.wait_for(|e| *e == PeerEvent::Negotiated).await;

    // a late end-of-candidates marker changes nothing
    a.engine.emit(EngineEvent::IceCandidate(None));
    sleep(Duration::from_secs(10)).await;
    let rest = a.drain();
    assert!(!rest.contains(&PeerEvent::IceTimeout));
    assert!(!rest.iter().any(|e| matches!(e, PeerEvent::Signal(_))));
}

#[tokio::test(start_paused = true)]
async fn test_half_trickle_keeps_option_but_bundles() {
    let mut a = spawn_peer(PeerConfig::initiator().with_trickle(TricklePolicy::Half));
    a.engine
        .emit(EngineEvent::IceCandidate(Some(CandidateInit::new(HOST))));
    a.engine.emit(EngineEvent::IceCandidate(None));

    let signal = a.next_signal().await;
    assert!(offer_sdp(&signal).contains("a=ice-options:trickle"));
    sleep(Duration::from_millis(10)).await;
    assert!(!a.drain().iter().any(|e| matches!(e, PeerEvent::Signal(_))));
}

#[tokio::test(start_paused = true)]
async fn test_engine_without_trickle_forces_bundling() {
    let caps = Capabilities {
        trickle: false,
        ..Default::default()
    };
    let mut a = spawn_peer_with(PeerConfig::initiator(), caps);
    a.engine
        .emit(EngineEvent::IceCandidate(Some(CandidateInit::new(HOST))));
    a.engine.emit(EngineEvent::IceCandidate(None));

    let signal = a.next_signal().await;
    assert!(!offer_sdp(&signal).contains("a=ice-options:trickle"));
}

#[tokio::test(start_paused = true)]
async fn test_enabled_trickle_forwards_candidates() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.engine
        .emit(EngineEvent::IceCandidate(Some(CandidateInit::new(HOST))));
    assert_eq!(
        a.next_signal().await,
        SignalData::Candidate {
            candidate: CandidateInit::new(HOST)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_sdp_transform_applies_to_offer() {
    let config = PeerConfig::initiator()
        .with_sdp_transform(|sdp| format!("{sdp}a=x-google-flag:conference\r\n"));
    let mut a = spawn_peer(config);
    let signal = a.next_signal().await;
    assert!(offer_sdp(&signal).ends_with("a=x-google-flag:conference\r\n"));
}

#[tokio::test(start_paused = true)]
async fn test_two_sessions_exchange_data() {
    let mut a = spawn_peer(PeerConfig::initiator());
    let mut b = spawn_peer(PeerConfig::responder());

    a.peer.send("hello").unwrap();
    exchange_signals(&mut a, &mut b).await;

    a.channel().link(b.engine.events());
    b.open_link();
    b.channel().link(a.engine.events());
    a.open_link();

    a.wait_for(|e| *e == PeerEvent::Connect).await;
    b.wait_for(|e| *e == PeerEvent::Connect).await;
    a.peer.write("world").await.unwrap();

    let (first, _) = b.wait_for(|e| matches!(e, PeerEvent::Data(_))).await;
    let (second, _) = b.wait_for(|e| matches!(e, PeerEvent::Data(_))).await;
    assert_eq!(first, PeerEvent::Data(binary("hello")));
    assert_eq!(second, PeerEvent::Data(binary("world")));
    assert_eq!(a.channel().sent(), vec![Payload::from("hello"), Payload::from("world")]);

    b.peer.send(vec![1u8, 2, 3]).unwrap();
    let (data, _) = a.wait_for(|e| matches!(e, PeerEvent::Data(_))).await;
    assert_eq!(data, PeerEvent::Data(Payload::from(vec![1u8, 2, 3])));
}

#[tokio::test(start_paused = true)]
async fn test_writes_before_connect_are_flushed_in_order() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.peer.send("one").unwrap();
    a.peer.send("two").unwrap();
    a.connect().await;
    assert_eq!(a.channel().sent(), vec![Payload::from("one"), Payload::from("two")]);
}

#[tokio::test(start_paused = true)]
async fn test_connect_requires_transport_and_channel() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.peer.signal(answer()).unwrap();
    a.engine.emit(EngineEvent::IceConnectionStateChange(
        IceConnectionState::Connected,
    ));
    sleep(Duration::from_secs(1)).await;
    assert!(!a.drain().contains(&PeerEvent::Connect));

    a.engine.emit(EngineEvent::ChannelOpen);
    a.wait_for(|e| *e == PeerEvent::Connect).await;
    sleep(Duration::from_secs(1)).await;
    assert!(!a.drain().contains(&PeerEvent::Connect));
}

#[tokio::test(start_paused = true)]
async fn test_remote_candidate_before_description_is_buffered() {
    let mut b = spawn_peer(PeerConfig::responder());
    let candidate = CandidateInit::new(HOST);
    b.peer
        .signal(SignalData::Candidate {
            candidate: candidate.clone(),
        })
        .unwrap();
    b.peer.signal(offer()).unwrap();

    let (signal, before) = b.wait_for(|e| matches!(e, PeerEvent::Signal(_))).await;
    assert!(matches!(signal, PeerEvent::Signal(SignalData::Answer { .. })));
    assert!(!has_error(&before));
    assert_eq!(b.engine.applied_candidates(), vec![candidate]);

    let calls = b.engine.calls();
    let set_remote = calls.iter().position(|c| *c == "set_remote_description");
    let add_candidate = calls.iter().position(|c| *c == "add_ice_candidate");
    assert!(set_remote < add_candidate);
}

#[tokio::test(start_paused = true)]
async fn test_responder_answers_and_reports_negotiated() {
    let mut b = spawn_peer(PeerConfig::responder());
    b.peer.signal(offer()).unwrap();
    let signal = b.next_signal().await;
    assert!(matches!(signal, SignalData::Answer { .. }));
    b.wait_for(|e| *e == PeerEvent::Negotiated).await;
    assert_eq!(b.engine.count("create_answer"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_requested_in_flight_is_replayed() {
    let mut a = spawn_peer(PeerConfig::initiator());
    let first = a.next_signal().await;
    assert!(offer_sdp(&first).contains("o=- 1 "));

    a.peer.negotiate().unwrap();
    a.peer.signal(answer()).unwrap();

    let (second, skipped) = a.wait_for(|e| matches!(e, PeerEvent::Signal(_))).await;
    let PeerEvent::Signal(second) = second else {
        unreachable!()
    };
    assert!(offer_sdp(&second).contains("o=- 2 "));
    assert!(!skipped.contains(&PeerEvent::Negotiated));

    a.peer.signal(answer()).unwrap();
    a.wait_for(|e| *e == PeerEvent::Negotiated).await;
    assert_eq!(a.engine.count("create_offer"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_requests_collapse() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.peer.signal(answer()).unwrap();
    a.wait_for(|e| *e == PeerEvent::Negotiated).await;

    a.engine.emit(EngineEvent::NegotiationNeeded);
    a.engine.emit(EngineEvent::NegotiationNeeded);
    a.engine.emit(EngineEvent::NegotiationNeeded);
    let signal = a.next_signal().await;
    assert!(offer_sdp(&signal).contains("o=- 2 "));

    sleep(Duration::from_millis(10)).await;
    assert_eq!(a.engine.count("create_offer"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_responder_asks_initiator_to_renegotiate() {
    let mut b = spawn_peer(PeerConfig::responder());
    sleep(Duration::from_millis(1)).await;
    b.peer.negotiate().unwrap();
    assert_eq!(
        b.next_signal().await,
        SignalData::Renegotiate { renegotiate: true }
    );
    assert_eq!(b.engine.count("create_offer"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_initiator_honours_renegotiate_signal() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.peer.signal(answer()).unwrap();
    a.wait_for(|e| *e == PeerEvent::Negotiated).await;

    a.peer
        .signal(json!({"type": "renegotiate", "renegotiate": true}))
        .unwrap();
    let signal = a.next_signal().await;
    assert!(offer_sdp(&signal).contains("o=- 2 "));
}

#[tokio::test(start_paused = true)]
async fn test_initiator_adds_requested_transceiver() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.peer.signal(answer()).unwrap();
    a.wait_for(|e| *e == PeerEvent::Negotiated).await;

    a.peer
        .signal(SignalData::TransceiverRequest {
            transceiver_request: TransceiverRequest {
                kind: "audio".into(),
                init: None,
            },
        })
        .unwrap();
    let signal = a.next_signal().await;
    assert!(offer_sdp(&signal).contains("o=- 2 "));
    assert_eq!(a.engine.count("add_transceiver"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_transceiver_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.peer.add_transceiver("subtitles", None).unwrap();
    let events = a.expect_close().await;
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Error(Error::AddTransceiver(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_responder_forwards_transceiver_requests() {
    let mut b = spawn_peer(PeerConfig::responder());
    b.peer
        .add_transceiver("video", Some(json!({"direction": "recvonly"})))
        .unwrap();
    assert_eq!(
        b.next_signal().await,
        SignalData::TransceiverRequest {
            transceiver_request: TransceiverRequest {
                kind: "video".into(),
                init: Some(json!({"direction": "recvonly"})),
            }
        }
    );
    assert_eq!(b.engine.count("add_transceiver"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_responder_requests_unnegotiated_transceivers_once() {
    let mut b = spawn_peer(PeerConfig::responder());
    b.engine.add_local_transceiver("video");

    b.peer.signal(offer()).unwrap();
    assert!(matches!(b.next_signal().await, SignalData::Answer { .. }));
    assert_eq!(
        b.next_signal().await,
        SignalData::TransceiverRequest {
            transceiver_request: TransceiverRequest {
                kind: "video".into(),
                init: None,
            }
        }
    );

    b.peer.signal(offer()).unwrap();
    assert!(matches!(b.next_signal().await, SignalData::Answer { .. }));
    sleep(Duration::from_millis(10)).await;
    assert!(!b.drain().iter().any(|e| matches!(e, PeerEvent::Signal(_))));
}

#[tokio::test(start_paused = true)]
async fn test_native_backpressure_release() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.connect().await;
    let channel = a.channel();
    assert_eq!(channel.threshold(), 64 * 1024);

    channel.set_buffered(70_000);
    let peer = a.peer.clone();
    let big = tokio::spawn(async move { peer.write("big").await });
    sleep(Duration::from_millis(10)).await;
    a.peer.send("next").unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(!big.is_finished());
    assert_eq!(channel.sent(), vec![Payload::from("big")]);

    channel.set_buffered(0);
    a.engine.emit(EngineEvent::BufferedAmountLow);
    assert_eq!(big.await.unwrap(), Ok(()));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(channel.sent(), vec![Payload::from("big"), Payload::from("next")]);

    a.engine.emit(EngineEvent::BufferedAmountLow);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(channel.sent().len(), 2);
    assert!(!has_error(&a.drain()));
}

#[tokio::test(start_paused = true)]
async fn test_polled_backpressure_release() {
    let caps = Capabilities {
        buffered_amount_low: false,
        ..Default::default()
    };
    let mut a = spawn_peer_with(PeerConfig::initiator(), caps);
    a.connect().await;
    let channel = a.channel();
    assert_eq!(channel.threshold(), 0);

    channel.set_buffered(70_000);
    let peer = a.peer.clone();
    let big = tokio::spawn(async move { peer.write("big").await });
    sleep(Duration::from_millis(400)).await;
    assert!(!big.is_finished());

    channel.set_buffered(1_000);
    let start = Instant::now();
    assert_eq!(big.await.unwrap(), Ok(()));
    assert!(start.elapsed() <= Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn test_buffer_size_reports_channel() {
    let mut a = spawn_peer(PeerConfig::initiator());
    assert_eq!(a.peer.buffer_size().await, 0);
    a.connect().await;
    a.channel().set_buffered(1234);
    assert_eq!(a.peer.buffer_size().await, 1234);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_is_idempotent() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;

    a.peer.destroy(Some(Error::DataChannel("boom".into())));
    a.peer.destroy(Some(Error::ConnectionFailure));
    a.peer.destroy(None);

    let events = a.expect_close().await;
    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, PeerEvent::Error(_)))
        .collect();
    assert_eq!(errors, vec![&PeerEvent::Error(Error::DataChannel("boom".into()))]);

    sleep(Duration::from_secs(10)).await;
    assert!(a.drain().is_empty());
    assert!(a.peer.is_destroyed());
    assert!(a.engine.is_closed());
    assert_eq!(a.channel().ready_state(), ChannelState::Closed);

    assert_eq!(a.peer.signal(answer()), Err(Error::Destroyed));
    assert_eq!(a.peer.send("late"), Err(Error::Destroyed));
    assert_eq!(a.peer.write("late").await, Err(Error::Destroyed));
    assert_eq!(a.peer.negotiate(), Err(Error::Destroyed));
    assert_eq!(a.peer.address().await, None);
    assert_eq!(a.engine.count("close"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_write_fails_on_destroy() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;

    let peer = a.peer.clone();
    let pending = tokio::spawn(async move { peer.write("never").await });
    sleep(Duration::from_millis(10)).await;
    assert!(!pending.is_finished());

    a.peer.destroy(None);
    assert_eq!(pending.await.unwrap(), Err(Error::Destroyed));
    let events = a.expect_close().await;
    assert!(!has_error(&events));
    assert!(a.channel().sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.connect().await;
    a.channel().fail_sends();
    let result = a.peer.write("lost").await;
    assert!(matches!(result, Err(Error::DataChannel(_))));
    let events = a.expect_close().await;
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Error(Error::DataChannel(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_candidate_failures() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.peer.signal(answer()).unwrap();
    a.wait_for(|e| *e == PeerEvent::Negotiated).await;
    a.engine.fail("add_ice_candidate");

    a.peer
        .signal(SignalData::Candidate {
            candidate: CandidateInit::new(MDNS),
        })
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(!has_error(&a.drain()));
    assert!(!a.peer.is_destroyed());

    a.peer
        .signal(SignalData::Candidate {
            candidate: CandidateInit::new(HOST),
        })
        .unwrap();
    let events = a.expect_close().await;
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Error(Error::AddIceCandidate(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_create_offer_failure_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.engine.fail("create_offer");
    let events = a.expect_close().await;
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Error(Error::CreateOffer(_)))
    ));
    assert!(!events.iter().any(|e| matches!(e, PeerEvent::Signal(_))));
}

#[tokio::test(start_paused = true)]
async fn test_channel_creation_failure_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.engine.fail("create_data_channel");
    let events = a.expect_close().await;
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Error(Error::DataChannel(_)))
    ));
    assert_eq!(a.engine.count("create_offer"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ice_failure_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.engine.emit(EngineEvent::IceConnectionStateChange(
        IceConnectionState::Failed,
    ));
    let events = a.expect_close().await;
    assert_eq!(
        events.last(),
        Some(&PeerEvent::Error(Error::IceConnectionFailure))
    );
    assert!(events.iter().any(|e| matches!(
        e,
        PeerEvent::ConnectionStateChange {
            connection: IceConnectionState::Failed,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.connect().await;
    a.engine.emit(EngineEvent::PeerConnectionStateChange(
        PeerConnectionState::Failed,
    ));
    let events = a.expect_close().await;
    assert_eq!(events.last(), Some(&PeerEvent::Error(Error::ConnectionFailure)));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_signal_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    let result = a.peer.signal(json!({"type": "bye"}));
    assert!(matches!(result, Err(Error::Signaling(_))));
    let events = a.expect_close().await;
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Error(Error::Signaling(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_sdp_without_type_destroys() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.next_signal().await;
    a.peer.signal(json!({"sdp": "v=0"})).unwrap();
    let events = a.expect_close().await;
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Error(Error::SetRemoteDescription(_)))
    ));
    assert!(a.peer.is_destroyed());
    assert_eq!(a.engine.count("set_remote_description"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_signal_accepts_json_text() {
    let mut b = spawn_peer(PeerConfig::responder());
    let text = serde_json::to_string(&offer()).unwrap();
    b.peer.signal(text).unwrap();
    assert!(matches!(b.next_signal().await, SignalData::Answer { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_end_closes_after_grace_period() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.connect().await;
    a.peer.end().unwrap();
    let start = Instant::now();
    let events = a.expect_close().await;
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(!has_error(&events));
}

#[tokio::test(start_paused = true)]
async fn test_end_before_connect_waits_for_connect() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.peer.end().unwrap();
    a.connect().await;
    let connected = Instant::now();
    a.expect_close().await;
    assert!(connected.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_channel_close_ends_session() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.connect().await;
    a.engine.emit(EngineEvent::ChannelClose);
    let events = a.expect_close().await;
    assert!(!has_error(&events));
}

#[tokio::test(start_paused = true)]
async fn test_channel_stuck_closing_ends_session() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.connect().await;
    a.channel().set_state(ChannelState::Closing);
    let events = a.expect_close().await;
    assert!(!has_error(&events));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_destroys() {
    let a = spawn_peer(PeerConfig::initiator());
    let engine = a.engine.clone();
    let mut events = a.events;
    drop(a.peer);
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .unwrap();
        if event == Some(PeerEvent::Close) {
            break;
        }
        assert!(event.is_some(), "stream ended before close");
    }
    assert!(engine.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_address_of_selected_pair() {
    let mut a = spawn_peer(PeerConfig::initiator());
    assert_eq!(a.peer.address().await, None);
    a.connect().await;
    let address = a.peer.address().await.unwrap();
    assert_eq!(address.local, Some(Endpoint::new("10.0.0.1", Some(5000))));
    assert_eq!(address.remote, Some(Endpoint::new("10.0.0.2", Some(6000))));
}

#[tokio::test(start_paused = true)]
async fn test_stats_are_retried_until_pair_selected() {
    let mut a = spawn_peer(PeerConfig::initiator());
    a.engine.push_stats(vec![StatsRecord::LocalCandidate {
        id: "L1".into(),
        address: Some("10.0.0.1".into()),
        port: Some(5000),
    }]);
    a.connect().await;
    assert_eq!(a.engine.count("stats"), 2);
    assert!(a.peer.address().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_connects_without_stats() {
    let caps = Capabilities {
        stats: StatsApi::Unavailable,
        ..Default::default()
    };
    let mut a = spawn_peer_with(PeerConfig::initiator(), caps);
    a.connect().await;
    assert_eq!(a.engine.count("stats"), 0);
    assert_eq!(a.peer.address().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_object_mode_keeps_text() {
    let mut plain = spawn_peer(PeerConfig::initiator());
    plain.connect().await;
    plain
        .engine
        .emit(EngineEvent::ChannelMessage(Payload::from("hi")));
    let (data, _) = plain.wait_for(|e| matches!(e, PeerEvent::Data(_))).await;
    assert_eq!(data, PeerEvent::Data(binary("hi")));

    let mut object = spawn_peer(PeerConfig::initiator().with_object_mode(true));
    object.connect().await;
    object
        .engine
        .emit(EngineEvent::ChannelMessage(Payload::from("hi")));
    let (data, _) = object.wait_for(|e| matches!(e, PeerEvent::Data(_))).await;
    assert_eq!(data, PeerEvent::Data(Payload::from("hi")));
}
