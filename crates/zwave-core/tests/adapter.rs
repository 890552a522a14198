mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, mock_transport, request, response, MockPeer};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use zwave_core::adapter::{Adapter, AdapterConfig};
use zwave_core::api::{
    ApiRequest, ApplicationCommand, ApplicationUpdate, GetLibraryVersion, GetNetworkIds,
    LibraryVersion, NetworkIds, SendData, SendDataAccepted, SendDataComplete, SetDefault,
    SoftReset, StartWatchdog, SucNodeId, TxOptions, TxStatus, UpdateEvent,
};
use zwave_core::protocol::frame::{ACK, CAN, NAK, SOF};
use zwave_core::protocol::{Buffer, FrameError, ProtocolError};
use zwave_core::sequence::SequenceState;

fn config() -> AdapterConfig {
    AdapterConfig {
        timeout_ms: 1000,
        soft_reset_on_failure: false,
        ..AdapterConfig::default()
    }
}

async fn started(config: AdapterConfig) -> (Arc<Adapter>, MockPeer) {
    init_tracing();
    let (transport, mut peer) = mock_transport();
    let adapter = Arc::new(Adapter::new(Box::new(transport), config).expect("adapter"));
    assert!(adapter.start().await.expect("start"));
    assert_eq!(peer.next_write().await, vec![NAK]);
    (adapter, peer)
}

fn encoded(request: &dyn ApiRequest) -> Vec<u8> {
    request.to_frame().expect("fits in a frame").to_bytes()
}

fn library_version_response() -> Vec<u8> {
    vec![
        0x01, 0x10, 0x01, 0x15, 0x5A, 0x2D, 0x57, 0x61, 0x76, 0x65, 0x20, 0x37, 0x2E, 0x31, 0x35,
        0x07, 0x93, 0x00,
    ]
}

#[tokio::test(start_paused = true)]
async fn test_request_with_response() {
    let (adapter, mut peer) = started(config()).await;

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetLibraryVersion).await })
    };

    assert_eq!(
        peer.next_write().await,
        vec![0x01, 0x03, 0x00, 0x15, 0xE9]
    );
    peer.inject(&[ACK]);
    peer.inject(&library_version_response());
    assert_eq!(peer.next_write().await, vec![ACK]);

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 1);
    let version = outcome
        .response_as::<LibraryVersion>()
        .expect("library version");
    assert_eq!(version.description, "Z-Wave 7.15");
    assert_eq!(version.version.to_string(), "7.15");

    let tx = adapter.tx_statistics();
    assert_eq!((tx.nak, tx.sof, tx.ack), (1, 1, 1));
    let rx = adapter.rx_statistics();
    assert_eq!((rx.ack, rx.sof), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_response_before_ack_completes() {
    let (adapter, mut peer) = started(config()).await;

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetNetworkIds).await })
    };
    peer.next_data_frame().await;
    peer.inject(&response(0x20, &[0xC6, 0x24, 0xF7, 0x62, 0x01]));

    let outcome = sender.await.expect("join").expect("send");
    assert!(outcome.is_complete());
    assert_eq!(
        outcome.response_as::<NetworkIds>(),
        Some(&NetworkIds {
            home_id: 0xC624F762,
            node_id: 1
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_response_and_callback() {
    let (adapter, mut peer) = started(config()).await;
    let session_id = adapter.next_session_id();

    let sender = {
        let adapter = adapter.clone();
        let request = SendData::new(2, vec![0x20, 0x02], TxOptions::ACK, session_id);
        tokio::spawn(async move { adapter.send_command(&request).await })
    };

    assert_eq!(
        peer.next_data_frame().await,
        SendData::new(2, vec![0x20, 0x02], TxOptions::ACK, session_id)
            .to_frame()
            .expect("fits in a frame")
            .to_bytes()
    );
    peer.inject(&[ACK]);
    peer.inject(&response(0x13, &[0x01]));
    peer.inject(&request(0x13, &[session_id, 0x00]));

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(
        outcome.response_as::<SendDataAccepted>(),
        Some(&SendDataAccepted { accepted: true })
    );
    let callback = outcome
        .callback_as::<SendDataComplete>()
        .expect("callback");
    assert_eq!(callback.session_id, session_id);
    assert_eq!(callback.tx_status, TxStatus::CompleteOk);
}

#[tokio::test(start_paused = true)]
async fn test_unack_frame_does_not_wait() {
    let (adapter, mut peer) = started(config()).await;

    let outcome = adapter.send_command(&StartWatchdog).await.expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(peer.next_write().await, encoded(&StartWatchdog));
}

#[tokio::test(start_paused = true)]
async fn test_ack_timeout_retransmits_identical_request() {
    let (adapter, mut peer) = started(config()).await;

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetNetworkIds).await })
    };

    let first = peer.next_data_frame().await;
    // No ACK: the request goes out again once the timeout passes
    let second = peer.next_data_frame().await;
    assert_eq!(first, second);

    peer.inject(&[ACK]);
    peer.inject(&response(0x20, &[0x00, 0x00, 0x00, 0x01, 0x01]));

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_and_soft_reset() {
    let config = AdapterConfig {
        soft_reset_on_failure: true,
        ..config()
    };
    let (adapter, mut peer) = started(config).await;

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetLibraryVersion).await })
    };

    let request = encoded(&GetLibraryVersion);
    for _ in 0..3 {
        assert_eq!(peer.next_data_frame().await, request);
    }

    assert_eq!(peer.next_data_frame().await, encoded(&SoftReset));
    peer.inject(&[ACK]);

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Failed);
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.response.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_soft_reset_is_not_recovered() {
    let config = AdapterConfig {
        soft_reset_on_failure: true,
        max_retries: 1,
        ..config()
    };
    let (adapter, peer) = started(config).await;

    let outcome = adapter.send_command(&SoftReset).await.expect("send");
    assert_eq!(outcome.state, SequenceState::Failed);

    let frames: Vec<Vec<u8>> = peer
        .written()
        .into_iter()
        .filter(|bytes| bytes.len() > 1)
        .collect();
    assert_eq!(frames, vec![encoded(&SoftReset)]);
}

#[tokio::test(start_paused = true)]
async fn test_callback_timeout_is_not_retried() {
    let (adapter, mut peer) = started(config()).await;

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&SetDefault::new(5)).await })
    };
    peer.next_data_frame().await;
    peer.inject(&[ACK]);

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Failed);
    assert_eq!(outcome.attempts, 1);
    let data_frames = peer.written().iter().filter(|b| b.len() > 1).count();
    assert_eq!(data_frames, 1);
}

#[tokio::test(start_paused = true)]
async fn test_callback_timeout_retried_when_enabled() {
    let config = AdapterConfig {
        retry_on_response_timeout: true,
        ..config()
    };
    let (adapter, mut peer) = started(config).await;

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&SetDefault::new(5)).await })
    };
    peer.next_data_frame().await;
    peer.inject(&[ACK]);

    peer.next_data_frame().await;
    peer.inject(&[ACK]);
    peer.inject(&request(0x42, &[0x05]));

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_nak_triggers_retransmit_when_enabled() {
    let config = AdapterConfig {
        retransmit_on_nak: true,
        ..config()
    };
    let (adapter, mut peer) = started(config).await;

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetNetworkIds).await })
    };

    let first = peer.next_data_frame().await;
    peer.inject(&[CAN]);
    assert_eq!(peer.next_data_frame().await, first);

    peer.inject(&[ACK]);
    peer.inject(&response(0x20, &[0x00, 0x00, 0x00, 0x01, 0x01]));

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(adapter.rx_statistics().can, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_does_not_carry_into_next_exchange() {
    let config = AdapterConfig {
        retransmit_on_nak: true,
        ..config()
    };
    let (adapter, mut peer) = started(config).await;

    // NAK, ACK and response all land before the sender wakes
    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetNetworkIds).await })
    };
    peer.next_data_frame().await;
    peer.inject(&[NAK]);
    peer.inject(&[ACK]);
    peer.inject(&response(0x20, &[0x00, 0x00, 0x00, 0x01, 0x01]));
    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 1);

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetNetworkIds).await })
    };
    peer.next_data_frame().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.inject(&[ACK]);
    peer.inject(&response(0x20, &[0x00, 0x00, 0x00, 0x01, 0x01]));
    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 1);

    let data_frames = peer.written().iter().filter(|b| b.len() > 1).count();
    assert_eq!(data_frames, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_inbound_frame_does_not_block_sending() {
    let config = AdapterConfig {
        timeout_ms: 50,
        ..config()
    };
    let (adapter, mut peer) = started(config).await;

    // The module starts a frame and goes quiet
    peer.inject(&[SOF, 0x05]);

    let sender = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.send_command(&GetNetworkIds).await })
    };

    // The first attempt cannot get the line; the retry goes out
    assert_eq!(peer.next_data_frame().await, encoded(&GetNetworkIds));
    peer.inject(&[ACK]);
    peer.inject(&response(0x20, &[0xC6, 0x24, 0xF7, 0x62, 0x01]));

    let outcome = sender.await.expect("join").expect("send");
    assert_eq!(outcome.state, SequenceState::Complete);
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_request_is_rejected_before_sending() {
    let (adapter, peer) = started(config()).await;

    let request = SendData::new(2, vec![0xAA; 300], TxOptions::ACK, 1);
    let result = adapter.send_command(&request).await;
    assert!(matches!(
        result,
        Err(ProtocolError::Frame(FrameError::PayloadTooLarge { size: 304, max: 61 }))
    ));

    // Node id, length, options and session id leave 57 bytes of data
    let request = SendData::new(2, vec![0xAA; 58], TxOptions::ACK, 1);
    assert!(matches!(
        adapter.send_command(&request).await,
        Err(ProtocolError::Frame(FrameError::PayloadTooLarge { size: 62, .. }))
    ));
    assert_eq!(peer.written(), vec![vec![NAK]]);
}

#[tokio::test(start_paused = true)]
async fn test_checksum_mismatch_sends_one_nak() {
    let (adapter, mut peer) = started(config()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter.subscribe(move |update: &ApplicationUpdate| {
        let _ = tx.send(update.clone());
    });

    let mut corrupted = request(0x49, &[0x84, 0x03, 0x00]);
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    peer.inject(&corrupted);

    assert_eq!(peer.next_write().await, vec![NAK]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(peer.written(), vec![vec![NAK], vec![NAK]]);

    peer.inject(&request(0x49, &[0x84, 0x03, 0x00]));
    assert_eq!(peer.next_write().await, vec![ACK]);
    let update = rx.recv().await.expect("update");
    assert_eq!(update.event, UpdateEvent::NodeInfoReceived);
    assert_eq!(update.node_id, 3);
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_dispatch_with_filter() {
    let (adapter, peer) = started(config()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter.subscribe_filtered(
        move |command: &ApplicationCommand| {
            let _ = tx.send(command.source_node_id);
        },
        |command: &ApplicationCommand| command.source_node_id == 5,
    );

    peer.inject(&request(0x04, &[0x00, 0x04, 0x02, 0x20, 0x01]));
    peer.inject(&request(0x04, &[0x00, 0x05, 0x02, 0x20, 0x02]));

    assert_eq!(rx.recv().await, Some(5));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_delivery() {
    let (adapter, peer) = started(config()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = adapter.subscribe(move |command: &SucNodeId| {
        let _ = tx.send(command.node_id);
    });

    // A response with nothing in flight only reaches subscribers
    peer.inject(&response(0x56, &[0x01]));
    assert_eq!(rx.recv().await, Some(1));

    assert!(adapter.unsubscribe(handle));
    peer.inject(&response(0x56, &[0x02]));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_overflow_rejects_newest() {
    let config = AdapterConfig {
        dispatch_capacity: 2,
        ..config()
    };
    let (adapter, peer) = started(config).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter.subscribe(move |command: &SucNodeId| {
        let _ = tx.send(command.node_id);
    });

    // The dispatcher cannot run while the test task injects
    let mut burst = Vec::new();
    for node_id in 1..=5 {
        burst.extend(response(0x56, &[node_id]));
    }
    peer.inject(&burst);

    assert_eq!(adapter.rx_statistics().dropped, 3);
    assert_eq!(rx.recv().await, Some(1));
    assert_eq!(rx.recv().await, Some(2));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_command_is_acked_and_discarded() {
    let (adapter, mut peer) = started(config()).await;

    peer.inject(&response(0x99, &[0x00]));
    assert_eq!(peer.next_write().await, vec![ACK]);
    assert_eq!(adapter.rx_statistics().sof, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_request_is_rejected() {
    #[derive(Debug)]
    struct Unregistered;

    impl ApiRequest for Unregistered {
        fn command_id(&self) -> u8 {
            0x99
        }

        fn encode(&self) -> Buffer {
            Buffer::empty()
        }
    }

    let (adapter, _peer) = started(config()).await;
    let result = adapter.send_command(&Unregistered).await;
    assert!(matches!(result, Err(ProtocolError::UnregisteredCommand(0x99))));
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle() {
    let (adapter, peer) = started(config()).await;
    assert!(adapter.is_running());
    assert!(matches!(
        adapter.start().await,
        Err(ProtocolError::AlreadyRunning)
    ));

    assert!(adapter.stop().await.expect("stop"));
    assert!(!adapter.is_running());
    assert!(!peer.is_open());
    assert!(!adapter.stop().await.expect("second stop"));
    assert!(matches!(
        adapter.send_command(&GetLibraryVersion).await,
        Err(ProtocolError::NotRunning)
    ));
}

#[tokio::test]
async fn test_start_with_refused_port() {
    let (transport, peer) = mock_transport();
    let adapter =
        Adapter::new(Box::new(transport.refusing()), AdapterConfig::default()).expect("adapter");
    assert!(!adapter.start().await.expect("start"));
    assert!(!adapter.is_running());
    assert!(peer.written().is_empty());
}
