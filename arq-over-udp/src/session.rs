//! Async sender and receiver sessions.
//!
//! # Architecture
//!
//! ```text
//!  SenderSession                                   ReceiverSession
//!  ┌──────────────────────────────┐                ┌──────────────────────┐
//!  │ main loop: admit + read acks │── DATA ──────▶ │ recv → ReceiverWindow│
//!  │        │                     │                │   │          │       │
//!  │   Arc<Mutex<SenderWindow>>   │◀───── ACK ──── │  ack     deliveries  │
//!  │        │                     │                └──────────────┬───────┘
//!  │ timer task: sleep_until      │                               ▼
//!  │   deadline → retransmit      │                  bounded mpsc (backpressure)
//!  └──────────────────────────────┘
//! ```
//!
//! The sender runs two activities, the main loop and a spawned timer task.
//! Both mutate the window only while holding one `tokio::sync::Mutex`, and
//! never hold it across transport I/O.  A `Notify` wakes the timer task
//! whenever deadlines may have moved.
//!
//! Every blocking point races the session's [`Shutdown`] token.  Once it
//! trips, no timer fires and no further I/O is started.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{sleep_until, timeout, Instant};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::packet::{decode_ack, encode_ack, MAX_DATAGRAM};
use crate::receiver::{Delivery, ReceiverWindow};
use crate::report::{ReceiverReport, SenderReport};
use crate::sender::{AckOutcome, RetryBudgetExceeded, SenderWindow, Transmission};
use crate::shutdown::{self, Shutdown};
use crate::simulator::LossModel;
use crate::transport::Transport;

/// Acks are short decimal strings; anything longer is malformed anyway.
const ACK_BUF_LEN: usize = 32;

/// Pause after a failed receive so a broken transport cannot spin the loop.
const RECV_ERROR_PAUSE: Duration = Duration::from_millis(10);

/// Stand-in deadline for the disabled timer branch.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

// ---------------------------------------------------------------------------
// SenderSession
// ---------------------------------------------------------------------------

/// State shared by the main loop and the timer task.
struct SenderShared<L> {
    window: SenderWindow,
    loss: L,
    /// Set by the timer task when a packet exhausts its retry budget.
    failure: Option<RetryBudgetExceeded>,
}

/// Drives a [`SenderWindow`] over a [`Transport`] until every packet is acked.
pub struct SenderSession<T, L> {
    config: SessionConfig,
    transport: Arc<T>,
    shared: Arc<Mutex<SenderShared<L>>>,
    /// Wakes the timer task when deadlines may have changed.
    rearm: Arc<Notify>,
    /// Wakes the main loop when the timer task records a failure.
    failed: Arc<Notify>,
}

impl<T: Transport, L: LossModel> SenderSession<T, L> {
    /// Validate `config` and prepare to send `payloads` (payload `i` is
    /// sequence number `i`).
    pub fn new(
        config: SessionConfig,
        transport: T,
        loss: L,
        payloads: Vec<Vec<u8>>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let window = SenderWindow::from_config(&config, payloads)?;
        Ok(Self {
            config,
            transport: Arc::new(transport),
            shared: Arc::new(Mutex::new(SenderShared {
                window,
                loss,
                failure: None,
            })),
            rearm: Arc::new(Notify::new()),
            failed: Arc::new(Notify::new()),
        })
    }

    /// Snapshot of the session's counters and ack bitmap.
    ///
    /// Available after [`run`](Self::run) returns, whatever the outcome.
    pub async fn report(&self) -> SenderReport {
        self.shared.lock().await.window.report()
    }

    /// Run until `base == total`, the retry budget is exhausted, or
    /// `shutdown` trips.
    pub async fn run(&self, shutdown: Shutdown) -> Result<SenderReport, SessionError> {
        let tag = self.config.protocol.tag();
        log::info!(
            "[{tag}:sender] sending {} packet(s), window={}",
            self.config.total_packets,
            self.config.effective_window()
        );

        let (halt_trigger, halt) = shutdown::channel();
        let timer = tokio::spawn(timer_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            Arc::clone(&self.rearm),
            Arc::clone(&self.failed),
            shutdown.clone(),
            halt,
        ));

        let result = self.drive(shutdown).await;

        halt_trigger.trigger();
        let joined = timer.await;
        self.shared.lock().await.window.cancel_timers();
        let report = self.report().await;

        match (result, joined) {
            (Ok(()), Ok(())) => {
                log::info!(
                    "[{tag}:sender] complete: sent={} retransmissions={} lost={}",
                    report.stats.packets_sent,
                    report.stats.retransmissions,
                    report.stats.packets_lost
                );
                Ok(report)
            }
            (Ok(()), Err(e)) => Err(SessionError::Task(e.to_string())),
            (Err(e), _) => {
                log::warn!("[{tag}:sender] stopped: {e}");
                Err(e)
            }
        }
    }

    /// Main loop: admit packets, then wait (bounded) for one ack.
    async fn drive(&self, mut shutdown: Shutdown) -> Result<(), SessionError> {
        let tag = self.config.protocol.tag();
        let mut buf = [0u8; ACK_BUF_LEN];

        loop {
            let batch = {
                let mut shared = self.shared.lock().await;
                if let Some(failure) = shared.failure.take() {
                    return Err(failure.into());
                }
                if shared.window.is_complete() {
                    return Ok(());
                }
                shared.window.try_send(Instant::now())
            };
            if !batch.is_empty() {
                self.rearm.notify_one();
                transmit(&*self.transport, &self.shared, batch, tag).await;
            }

            tokio::select! {
                biased;

                _ = shutdown.triggered() => return Err(SessionError::Cancelled),

                // The failure itself is picked up at the top of the loop.
                _ = self.failed.notified() => {}

                res = timeout(self.config.recv_timeout, self.transport.recv(&mut buf)) => {
                    match res {
                        Ok(Ok(n)) => self.on_ack_datagram(&buf[..n]).await,
                        Ok(Err(e)) => {
                            log::warn!("[{tag}:sender] recv failed: {e}");
                            self.shared.lock().await.window.record_transport_error();
                            tokio::time::sleep(RECV_ERROR_PAUSE).await;
                        }
                        Err(_elapsed) => {}
                    }
                }
            }
        }
    }

    async fn on_ack_datagram(&self, datagram: &[u8]) {
        let tag = self.config.protocol.tag();
        let seq = match decode_ack(datagram) {
            Ok(seq) => seq,
            Err(e) => {
                log::debug!("[{tag}:sender] ← bad ack: {e}");
                self.shared.lock().await.window.record_malformed_ack();
                return;
            }
        };

        let mut shared = self.shared.lock().await;
        match shared.window.on_ack(seq, Instant::now()) {
            AckOutcome::Acked { newly_acked } => {
                log::debug!(
                    "[{tag}:sender] ← ACK {seq} (+{newly_acked}) base={} next={}",
                    shared.window.base(),
                    shared.window.next()
                );
                drop(shared);
                self.rearm.notify_one();
            }
            AckOutcome::Stale => {
                log::debug!("[{tag}:sender] ← ACK {seq} stale (base={})", shared.window.base());
            }
        }
    }
}

/// Timer activity: sleep until the earliest deadline, then retransmit.
async fn timer_loop<T: Transport, L: LossModel>(
    transport: Arc<T>,
    shared: Arc<Mutex<SenderShared<L>>>,
    rearm: Arc<Notify>,
    failed: Arc<Notify>,
    mut shutdown: Shutdown,
    mut halt: Shutdown,
) {
    let tag = shared.lock().await.window.protocol().tag();

    loop {
        let deadline = shared.lock().await.window.next_deadline();

        tokio::select! {
            biased;
            _ = shutdown.triggered() => return,
            _ = halt.triggered() => return,
            _ = sleep_until(deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE)), if deadline.is_some() => {}
            _ = rearm.notified() => continue,
        }

        let batch = {
            let mut guard = shared.lock().await;
            match guard.window.on_timer_expiry(Instant::now()) {
                Ok(batch) => batch,
                Err(e) => {
                    log::warn!("[{tag}:timer] {e}");
                    guard.failure = Some(e);
                    failed.notify_one();
                    return;
                }
            }
        };

        if !batch.is_empty() {
            log::debug!("[{tag}:timer] timeout, retransmitting {} packet(s)", batch.len());
            transmit(&*transport, &shared, batch, tag).await;
        }
    }
}

/// Pass `batch` through the loss model and put the survivors on the wire.
///
/// Send failures are counted and otherwise ignored: the packet stays in
/// flight and its timer will retransmit it.
async fn transmit<T: Transport, L: LossModel>(
    transport: &T,
    shared: &Mutex<SenderShared<L>>,
    batch: Vec<Transmission>,
    tag: &str,
) {
    let survivors: Vec<Transmission> = {
        let mut guard = shared.lock().await;
        let SenderShared { window, loss, .. } = &mut *guard;
        batch
            .into_iter()
            .filter(|t| {
                if loss.should_drop(t.seq, t.attempt) {
                    window.record_loss(t.seq);
                    log::debug!("[{tag}:sender] LOST seq={} attempt={}", t.seq, t.attempt);
                    false
                } else {
                    true
                }
            })
            .collect()
    };

    for t in survivors {
        match transport.send(&t.datagram).await {
            Ok(()) => log::debug!("[{tag}:sender] → DATA seq={} attempt={}", t.seq, t.attempt),
            Err(e) => {
                log::warn!("[{tag}:sender] send seq={} failed: {e}", t.seq);
                shared.lock().await.window.record_transport_error();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiverSession
// ---------------------------------------------------------------------------

/// Drives a [`ReceiverWindow`] over a [`Transport`], pushing in-order
/// payloads into a bounded channel.
pub struct ReceiverSession<T> {
    config: SessionConfig,
    transport: T,
    window: ReceiverWindow,
}

impl<T: Transport> ReceiverSession<T> {
    pub fn new(config: SessionConfig, transport: T) -> Result<Self, SessionError> {
        config.validate()?;
        let window = ReceiverWindow::from_config(&config);
        Ok(Self {
            config,
            transport,
            window,
        })
    }

    pub fn window(&self) -> &ReceiverWindow {
        &self.window
    }

    pub fn report(&self) -> &ReceiverReport {
        self.window.report()
    }

    /// A bounded delivery channel sized from the config.
    pub fn delivery_channel(&self) -> (mpsc::Sender<Delivery>, mpsc::Receiver<Delivery>) {
        mpsc::channel(self.config.delivery_queue)
    }

    /// Receive until `max_idle_timeouts` consecutive receives come back empty.
    ///
    /// Ends successfully if every packet was delivered by then, otherwise
    /// with [`SessionError::PeerIdle`].  The idle period after the last
    /// delivery lets the receiver re-ack a final packet whose ack was lost.
    pub async fn run(
        &mut self,
        deliveries: mpsc::Sender<Delivery>,
        mut shutdown: Shutdown,
    ) -> Result<ReceiverReport, SessionError> {
        let tag = self.config.protocol.tag();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut idle = 0u32;
        log::info!(
            "[{tag}:receiver] receiving {} packet(s), window={}",
            self.config.total_packets,
            self.window.capacity()
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.triggered() => return Err(SessionError::Cancelled),
                res = timeout(self.config.recv_timeout, self.transport.recv(&mut buf)) => res,
            };

            let n = match received {
                Ok(Ok(n)) => {
                    idle = 0;
                    n
                }
                Ok(Err(e)) => {
                    log::warn!("[{tag}:receiver] recv failed: {e}");
                    self.window.record_transport_error();
                    idle += 1;
                    if idle >= self.config.max_idle_timeouts {
                        return self.finish();
                    }
                    continue;
                }
                Err(_elapsed) => {
                    idle += 1;
                    log::debug!("[{tag}:receiver] idle {idle}/{}", self.config.max_idle_timeouts);
                    if idle >= self.config.max_idle_timeouts {
                        return self.finish();
                    }
                    continue;
                }
            };

            let outcome = self.window.on_datagram(&buf[..n]);

            if let Some(ack) = outcome.ack {
                match self.transport.send(&encode_ack(ack)).await {
                    Ok(()) => {
                        self.window.record_ack_sent();
                        log::debug!("[{tag}:receiver] → ACK {ack}");
                    }
                    Err(e) => {
                        log::warn!("[{tag}:receiver] ack {ack} failed: {e}");
                        self.window.record_transport_error();
                    }
                }
            }

            for delivery in outcome.delivered {
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => return Err(SessionError::Cancelled),
                    res = deliveries.send(delivery) => {
                        if res.is_err() {
                            return Err(SessionError::DeliveryClosed);
                        }
                    }
                }
            }
        }
    }

    fn finish(&self) -> Result<ReceiverReport, SessionError> {
        let tag = self.config.protocol.tag();
        if self.window.is_complete() {
            log::info!(
                "[{tag}:receiver] complete: delivered={} corrupted={}",
                self.report().delivered,
                self.report().corrupted
            );
            Ok(self.report().clone())
        } else {
            Err(SessionError::PeerIdle {
                expected: self.window.expected(),
            })
        }
    }
}
