//! End-to-end tests for the async sender and receiver sessions.
//!
//! Most tests run both sessions in-process over a `MemoryTransport` pair with
//! scripted loss.  The exact-count group runs on tokio's paused clock, where
//! time only moves when every task is waiting, so retransmission counts are
//! fully deterministic.  The last group runs over loopback UDP.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arq_over_udp::packet::{decode_ack, DataPacket, Seq};
use arq_over_udp::receiver::Delivery;
use arq_over_udp::report::{ReceiverReport, SenderReport};
use arq_over_udp::shutdown;
use arq_over_udp::simulator::{LossModel, NoLoss, RandomLoss, ScriptedLoss};
use arq_over_udp::timer::RtoConfig;
use arq_over_udp::transport::{MemoryTransport, Transport, UdpTransport};
use arq_over_udp::{Protocol, ReceiverSession, SenderSession, SessionConfig, SessionError};

const ALL: [Protocol; 3] = [
    Protocol::StopAndWait,
    Protocol::GoBackN,
    Protocol::SelectiveRepeat,
];

/// Upper bound for any single test scenario.
const DEADLINE: Duration = Duration::from_secs(20);

fn fast_config(protocol: Protocol, total: u32, window: u32) -> SessionConfig {
    SessionConfig {
        protocol,
        total_packets: total,
        window_size: window,
        rto: RtoConfig {
            initial: Duration::from_millis(60),
            min: Duration::from_millis(30),
            max: Duration::from_millis(120),
        },
        max_sends: 20,
        recv_timeout: Duration::from_millis(20),
        max_idle_timeouts: 50,
        payload_size: 16,
        ..SessionConfig::default()
    }
}

struct PairOutcome {
    sender: Result<SenderReport, SessionError>,
    sender_report: SenderReport,
    receiver: Result<ReceiverReport, SessionError>,
    receiver_report: ReceiverReport,
    delivered: Vec<Delivery>,
}

/// Run a sender and a receiver against each other until both stop.
async fn run_pair<L: LossModel>(config: SessionConfig, loss: L) -> PairOutcome {
    let (sender_end, receiver_end) = MemoryTransport::pair();
    let (_trigger, shutdown) = shutdown::channel();

    let mut receiver = ReceiverSession::new(config.clone(), receiver_end).expect("receiver config");
    let (tx, mut rx) = receiver.delivery_channel();
    let receiver_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let res = receiver.run(tx, shutdown).await;
            (res, receiver.report().clone())
        }
    });

    let payloads = config.payloads();
    let sender = SenderSession::new(config, sender_end, loss, payloads).expect("sender config");
    let sender_res = sender.run(shutdown).await;
    let sender_report = sender.report().await;
    // Dropping the sender's end lets the receiver notice and wind down.
    drop(sender);

    let (receiver_res, receiver_report) = receiver_task.await.expect("receiver task panicked");
    let mut delivered = Vec::new();
    while let Some(d) = rx.recv().await {
        delivered.push(d);
    }

    PairOutcome {
        sender: sender_res,
        sender_report,
        receiver: receiver_res,
        receiver_report,
        delivered,
    }
}

fn assert_delivered_in_order(config: &SessionConfig, delivered: &[Delivery]) {
    let seqs: Vec<u32> = delivered.iter().map(|d| d.seq).collect();
    assert_eq!(seqs, (0..config.total_packets).collect::<Vec<_>>());
    for d in delivered {
        assert_eq!(d.payload, config.payload_for(d.seq), "payload of seq {}", d.seq);
    }
}

// ---------------------------------------------------------------------------
// Liveness and convergence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_loss_delivers_everything_for_every_protocol() {
    for protocol in ALL {
        let config = fast_config(protocol, 20, 4);
        let out = tokio::time::timeout(DEADLINE, run_pair(config.clone(), NoLoss))
            .await
            .expect("session hung");

        let report = out.sender.unwrap_or_else(|e| panic!("{protocol}: sender failed: {e}"));
        assert!(report.is_complete(), "{protocol}");
        assert_eq!(report.stats.packets_sent, 20);
        assert_eq!(report.stats.packets_lost, 0);
        assert!(report.lost.is_empty());
        assert_eq!(out.sender_report, report);

        let recv = out.receiver.unwrap_or_else(|e| panic!("{protocol}: receiver failed: {e}"));
        assert_eq!(recv.delivered, 20);
        assert_eq!(recv.bytes_delivered, 20 * 16);
        assert_eq!(recv.corrupted, 0);
        assert_delivered_in_order(&config, &out.delivered);
    }
}

#[tokio::test]
async fn scripted_loss_is_recovered_for_every_protocol() {
    for protocol in ALL {
        let config = fast_config(protocol, 8, 3);
        let loss = ScriptedLoss::new().drop_first(2, 2).drop_first(5, 1);
        let out = tokio::time::timeout(DEADLINE, run_pair(config.clone(), loss))
            .await
            .expect("session hung");

        let report = out.sender.unwrap_or_else(|e| panic!("{protocol}: sender failed: {e}"));
        assert!(report.is_complete());
        assert_eq!(report.stats.packets_lost, 3, "{protocol}");
        assert_eq!(report.lost, BTreeSet::from([2, 5]));
        assert!(report.stats.retransmissions >= 3, "{protocol}: {:?}", report.stats);
        assert!(out.receiver.is_ok(), "{protocol}: {:?}", out.receiver);
        assert_delivered_in_order(&config, &out.delivered);
    }
}

#[tokio::test]
async fn seeded_random_loss_converges() {
    for protocol in ALL {
        let config = fast_config(protocol, 30, 5);
        let loss = RandomLoss::new(0.2, Some(42));
        let out = tokio::time::timeout(DEADLINE, run_pair(config.clone(), loss))
            .await
            .expect("session hung");

        let report = out.sender.unwrap_or_else(|e| panic!("{protocol}: sender failed: {e}"));
        assert!(report.is_complete());
        assert!(report.stats.retransmissions >= report.stats.packets_lost);
        assert_delivered_in_order(&config, &out.delivered);
    }
}

// ---------------------------------------------------------------------------
// Protocol-specific recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn go_back_n_discards_after_gap_and_recovers() {
    let config = fast_config(Protocol::GoBackN, 5, 3);
    let loss = ScriptedLoss::new().drop_first(1, 1);
    let out = tokio::time::timeout(DEADLINE, run_pair(config.clone(), loss))
        .await
        .expect("session hung");

    let report = out.sender.expect("sender failed");
    assert_eq!(report.lost, BTreeSet::from([1]));
    // Packet 2 at least arrived while the receiver still wanted 1.
    assert!(out.receiver_report.out_of_order >= 1);
    // Go-Back-N resends the whole outstanding window, not just packet 1.
    assert!(report.stats.retransmissions >= 2, "{:?}", report.stats);
    assert_delivered_in_order(&config, &out.delivered);
}

#[tokio::test]
async fn selective_repeat_buffers_and_resends_only_the_hole() {
    let config = fast_config(Protocol::SelectiveRepeat, 4, 4);
    let loss = ScriptedLoss::new().drop_first(0, 1);
    let out = tokio::time::timeout(DEADLINE, run_pair(config.clone(), loss))
        .await
        .expect("session hung");

    let report = out.sender.expect("sender failed");
    assert_eq!(report.lost, BTreeSet::from([0]));
    assert!(out.receiver_report.out_of_order >= 3);
    assert_eq!(out.receiver_report.delivered, 4);
    assert_delivered_in_order(&config, &out.delivered);
}

// ---------------------------------------------------------------------------
// Exact counts on a paused clock
// ---------------------------------------------------------------------------

/// Virtual-time bound for paused-clock scenarios.
const PAUSED_DEADLINE: Duration = Duration::from_secs(300);

/// Wraps a loss model and logs every `(seq, attempt)` put to it.
struct Recorded<L> {
    inner: L,
    attempts: Arc<Mutex<Vec<(Seq, u32)>>>,
}

impl<L: LossModel> Recorded<L> {
    fn new(inner: L) -> (Self, Arc<Mutex<Vec<(Seq, u32)>>>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }
}

impl<L: LossModel> LossModel for Recorded<L> {
    fn should_drop(&mut self, seq: Seq, attempt: u32) -> bool {
        self.attempts.lock().unwrap().push((seq, attempt));
        self.inner.should_drop(seq, attempt)
    }
}

fn resent(attempts: &Mutex<Vec<(Seq, u32)>>) -> Vec<(Seq, u32)> {
    let mut resent: Vec<_> = attempts
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|&(_, attempt)| attempt > 1)
        .collect();
    resent.sort_unstable();
    resent
}

fn paced_config(protocol: Protocol, total: u32, window: u32) -> SessionConfig {
    SessionConfig {
        protocol,
        total_packets: total,
        window_size: window,
        rto: RtoConfig {
            initial: Duration::from_millis(100),
            min: Duration::from_millis(50),
            max: Duration::from_millis(400),
        },
        max_sends: 10,
        recv_timeout: Duration::from_millis(50),
        max_idle_timeouts: 40,
        payload_size: 16,
        ..SessionConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn selective_repeat_resends_exactly_the_lost_packet() {
    let config = paced_config(Protocol::SelectiveRepeat, 4, 4);
    let (loss, attempts) = Recorded::new(ScriptedLoss::new().drop_first(0, 1));
    let out = tokio::time::timeout(PAUSED_DEADLINE, run_pair(config.clone(), loss))
        .await
        .expect("session hung");

    let report = out.sender.expect("sender failed");
    assert_eq!(report.stats.retransmissions, 1);
    assert_eq!(report.stats.packets_lost, 1);
    assert_eq!(resent(&attempts), vec![(0, 2)]);
    assert_eq!(out.receiver_report.out_of_order, 3);
    assert_eq!(out.receiver_report.duplicates, 0);
    assert_delivered_in_order(&config, &out.delivered);
}

#[tokio::test(start_paused = true)]
async fn go_back_n_resends_the_outstanding_window_once() {
    let config = paced_config(Protocol::GoBackN, 5, 3);
    let (loss, attempts) = Recorded::new(ScriptedLoss::new().drop_first(1, 1));
    let out = tokio::time::timeout(PAUSED_DEADLINE, run_pair(config.clone(), loss))
        .await
        .expect("session hung");

    let report = out.sender.expect("sender failed");
    // The ack for 0 slides the window to [1, 4) before the timer fires, so
    // one expiry resends 1 and 2 together with the newly admitted 3.
    assert_eq!(resent(&attempts), vec![(1, 2), (2, 2), (3, 2)]);
    assert_eq!(report.stats.retransmissions, 3);
    assert_eq!(report.lost, BTreeSet::from([1]));
    assert_eq!(out.receiver_report.out_of_order, 2);
    assert_delivered_in_order(&config, &out.delivered);
}

#[tokio::test(start_paused = true)]
async fn stop_and_wait_retransmissions_match_losses() {
    for (seq, times) in [(0, 1), (1, 2), (2, 4)] {
        let config = paced_config(Protocol::StopAndWait, 3, 1);
        let (loss, attempts) = Recorded::new(ScriptedLoss::new().drop_first(seq, times));
        let out = tokio::time::timeout(PAUSED_DEADLINE, run_pair(config.clone(), loss))
            .await
            .expect("session hung");

        let report = out.sender.expect("sender failed");
        assert_eq!(report.stats.retransmissions, u64::from(times), "seq {seq}");
        assert_eq!(report.stats.packets_lost, u64::from(times), "seq {seq}");
        let expected: Vec<_> = (2..=times + 1).map(|attempt| (seq, attempt)).collect();
        assert_eq!(resent(&attempts), expected);
        assert_delivered_in_order(&config, &out.delivered);
    }
}

#[tokio::test(start_paused = true)]
async fn default_config_survives_losses_within_the_retry_budget() {
    // Six of the seven allowed attempts lost: the longest silence the
    // receiver sees with the stock timers.
    for times in [2, 6] {
        let config = SessionConfig {
            protocol: Protocol::StopAndWait,
            total_packets: 3,
            ..SessionConfig::default()
        };
        let loss = ScriptedLoss::new().drop_first(0, times);
        let out = tokio::time::timeout(PAUSED_DEADLINE, run_pair(config.clone(), loss))
            .await
            .expect("session hung");

        let report = out
            .sender
            .unwrap_or_else(|e| panic!("{times} losses: sender failed: {e}"));
        assert_eq!(report.stats.retransmissions, u64::from(times));
        let recv = out
            .receiver
            .unwrap_or_else(|e| panic!("{times} losses: receiver failed: {e}"));
        assert_eq!(recv.delivered, 3);
        assert_delivered_in_order(&config, &out.delivered);
    }
}

// ---------------------------------------------------------------------------
// Faults at the edges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn corrupted_datagram_is_counted_and_not_acked() {
    let config = fast_config(Protocol::GoBackN, 1, 1);
    let (client, server) = MemoryTransport::pair();
    let (_trigger, shutdown) = shutdown::channel();

    let mut receiver = ReceiverSession::new(config, server).unwrap();
    let (tx, mut rx) = receiver.delivery_channel();
    let task = tokio::spawn(async move { receiver.run(tx, shutdown).await });

    let good = DataPacket::new(0, b"payload".to_vec()).encode().unwrap();
    let mut bad = good.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0x01;

    client.send(&bad).await.unwrap();
    client.send(&good).await.unwrap();

    // The only ack is the one for the good copy.
    let mut buf = [0u8; 32];
    let n = tokio::time::timeout(Duration::from_secs(2), client.recv(&mut buf))
        .await
        .expect("no ack")
        .unwrap();
    assert_eq!(decode_ack(&buf[..n]).unwrap(), 0);
    drop(client);

    let report = tokio::time::timeout(DEADLINE, task)
        .await
        .expect("receiver hung")
        .unwrap()
        .expect("receiver failed");
    assert_eq!(report.corrupted, 1);
    assert_eq!(report.acks_sent, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(rx.recv().await.unwrap().payload, b"payload");
}

#[tokio::test]
async fn malformed_ack_is_counted_and_ignored() {
    let config = fast_config(Protocol::StopAndWait, 1, 1);
    let (sender_end, peer) = MemoryTransport::pair();
    let (_trigger, shutdown) = shutdown::channel();

    let payloads = config.payloads();
    let sender = SenderSession::new(config, sender_end, NoLoss, payloads).unwrap();

    let fake_receiver = tokio::spawn(async move {
        let mut buf = [0u8; 128];
        peer.recv(&mut buf).await.unwrap();
        peer.send(b"not-a-number").await.unwrap();
        peer.send(b"0").await.unwrap();
        peer
    });

    let report = tokio::time::timeout(DEADLINE, sender.run(shutdown))
        .await
        .expect("sender hung")
        .expect("sender failed");
    assert!(report.is_complete());
    assert_eq!(report.stats.malformed_acks, 1);
    fake_receiver.await.unwrap();
}

#[tokio::test]
async fn silent_peer_exhausts_retry_budget() {
    let mut config = fast_config(Protocol::GoBackN, 4, 4);
    config.max_sends = 3;
    config.rto = RtoConfig {
        initial: Duration::from_millis(10),
        min: Duration::from_millis(5),
        max: Duration::from_millis(40),
    };
    let (sender_end, _silent) = MemoryTransport::pair();
    let (_trigger, shutdown) = shutdown::channel();

    let payloads = config.payloads();
    let sender = SenderSession::new(config, sender_end, NoLoss, payloads).unwrap();
    let err = tokio::time::timeout(DEADLINE, sender.run(shutdown))
        .await
        .expect("sender hung")
        .unwrap_err();

    assert!(err.is_delivery_failure(), "{err}");
    match err {
        SessionError::RetryBudgetExceeded(e) => {
            assert_eq!(e.seq, 0);
            assert_eq!(e.sends, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    let report = sender.report().await;
    assert!(!report.is_complete());
    // Two whole-window retransmissions of four packets each.
    assert_eq!(report.stats.retransmissions, 8);
    assert_eq!(report.final_rto, Duration::from_millis(40));
}

#[tokio::test]
async fn receiver_without_sender_reports_peer_idle() {
    let mut config = fast_config(Protocol::SelectiveRepeat, 3, 2);
    config.max_idle_timeouts = 6;
    let (_client, server) = MemoryTransport::pair();
    let (_trigger, shutdown) = shutdown::channel();

    let mut receiver = ReceiverSession::new(config, server).unwrap();
    let (tx, _rx) = receiver.delivery_channel();
    let err = tokio::time::timeout(DEADLINE, receiver.run(tx, shutdown))
        .await
        .expect("receiver hung")
        .unwrap_err();
    assert!(matches!(err, SessionError::PeerIdle { expected: 0 }), "{err}");
}

#[tokio::test]
async fn dropped_delivery_queue_stops_receiver() {
    let config = fast_config(Protocol::GoBackN, 2, 2);
    let (client, server) = MemoryTransport::pair();
    let (_trigger, shutdown) = shutdown::channel();

    let mut receiver = ReceiverSession::new(config, server).unwrap();
    let (tx, rx) = receiver.delivery_channel();
    drop(rx);

    client
        .send(&DataPacket::new(0, b"a".to_vec()).encode().unwrap())
        .await
        .unwrap();
    let err = tokio::time::timeout(DEADLINE, receiver.run(tx, shutdown))
        .await
        .expect("receiver hung")
        .unwrap_err();
    assert!(matches!(err, SessionError::DeliveryClosed), "{err}");
}

#[tokio::test]
async fn shutdown_cancels_both_sessions() {
    let mut config = fast_config(Protocol::SelectiveRepeat, 10, 4);
    config.max_sends = 1000;
    let (sender_end, _silent) = MemoryTransport::pair();
    let (_client, receiver_end) = MemoryTransport::pair();
    let (trigger, shutdown) = shutdown::channel();

    let payloads = config.payloads();
    let sender = SenderSession::new(config.clone(), sender_end, NoLoss, payloads).unwrap();
    let sender_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { sender.run(shutdown).await }
    });

    let mut receiver = ReceiverSession::new(config, receiver_end).unwrap();
    let (tx, _rx) = receiver.delivery_channel();
    let receiver_task = tokio::spawn(async move { receiver.run(tx, shutdown).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    trigger.trigger();

    let sent = tokio::time::timeout(Duration::from_secs(2), sender_task)
        .await
        .expect("sender ignored shutdown")
        .unwrap();
    assert!(matches!(sent, Err(SessionError::Cancelled)), "{sent:?}");

    let received = tokio::time::timeout(Duration::from_secs(2), receiver_task)
        .await
        .expect("receiver ignored shutdown")
        .unwrap();
    assert!(matches!(received, Err(SessionError::Cancelled)), "{received:?}");
}

#[tokio::test]
async fn invalid_config_is_rejected_up_front() {
    let mut config = fast_config(Protocol::GoBackN, 4, 0);
    let (a, _b) = MemoryTransport::pair();
    let payloads = config.payloads();
    assert!(matches!(
        SenderSession::new(config.clone(), a, NoLoss, payloads),
        Err(SessionError::Config(_))
    ));

    config.window_size = 2;
    config.max_idle_timeouts = 0;
    let (a, _b) = MemoryTransport::pair();
    assert!(matches!(
        ReceiverSession::new(config, a),
        Err(SessionError::Config(_))
    ));
}

// ---------------------------------------------------------------------------
// Loopback UDP
// ---------------------------------------------------------------------------

async fn run_udp(config: SessionConfig) -> (SenderReport, ReceiverReport, Vec<Delivery>) {
    let server = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind receiver");
    let client = UdpTransport::connect("127.0.0.1:0".parse().unwrap(), server.local_addr)
        .await
        .expect("bind sender");
    let (_trigger, shutdown) = shutdown::channel();

    let mut receiver = ReceiverSession::new(config.clone(), server).unwrap();
    let (tx, mut rx) = receiver.delivery_channel();
    let receiver_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { receiver.run(tx, shutdown).await }
    });

    let loss = RandomLoss::from_config(&config.simulator);
    let payloads = config.payloads();
    let sender = SenderSession::new(config, client, loss, payloads).unwrap();
    let sent = sender.run(shutdown).await.expect("udp sender failed");
    let received = receiver_task
        .await
        .unwrap()
        .expect("udp receiver failed");

    let mut delivered = Vec::new();
    while let Some(d) = rx.recv().await {
        delivered.push(d);
    }
    (sent, received, delivered)
}

#[tokio::test]
async fn udp_loopback_go_back_n() {
    let mut config = fast_config(Protocol::GoBackN, 15, 4);
    config.max_idle_timeouts = 25;
    let (sent, received, delivered) = tokio::time::timeout(DEADLINE, run_udp(config.clone()))
        .await
        .expect("udp session hung");

    assert!(sent.is_complete());
    assert_eq!(received.delivered, 15);
    assert_delivered_in_order(&config, &delivered);
}

#[tokio::test]
async fn udp_loopback_selective_repeat_with_loss() {
    let mut config = fast_config(Protocol::SelectiveRepeat, 15, 4);
    config.max_idle_timeouts = 25;
    config.simulator.loss_rate = 0.1;
    config.simulator.seed = Some(7);
    let (sent, received, delivered) = tokio::time::timeout(DEADLINE, run_udp(config.clone()))
        .await
        .expect("udp session hung");

    assert!(sent.is_complete());
    assert!(sent.lost.len() as u64 <= sent.stats.packets_lost);
    assert_eq!(received.delivered, 15);
    assert_delivered_in_order(&config, &delivered);
}
