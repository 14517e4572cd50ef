//! # Send-Side Bandwidth Estimator
//!
//! Loss-driven target bitrate for one transport, fed by RTCP receiver
//! reports, transport-wide feedback and RTT updates. The estimator is a
//! [`Module`] on the controller's worker; each tick folds the loss reported
//! since the previous tick into the target and pushes the result to the pacer.
//!
//! ## Target Update
//!
//! ```text
//!   loss ≤ 2%   →  target × 1.08^elapsed_s + 1 kbps
//!   loss > 10%  →  target × (512 − loss_q8) / 512   (once per 300 ms + rtt)
//!   otherwise   →  hold
//! ```
//!
//! The result is clamped to `[max(min, 5 kbps), min(max, receiver estimate)]`.
//! Observers hear about the target only when `(target, loss, rtt)` changes.
//! Reports go out from [`Module::process`] on the worker thread with the
//! estimator lock released, never from inside a configuration call, so an
//! observer may call back into whoever configured the estimator.
//!
//! A new start rate restarts the target; limit-only changes re-clamp it.

use quanta::{Clock, Instant};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::event_log::{EventLog, RtcEvent};
use crate::observer::{
    BandwidthObserver, CallStatsObserver, NetworkChangedObserver, ObserverSet,
    PacketFeedbackObserver, TransportFeedbackObserver,
};
use crate::packet::{PacketFeedback, SentPacket, TransportFeedback};
use crate::pacer::Pacer;
use crate::route::NetworkRoute;
use crate::worker::Module;

const PROCESS_INTERVAL: Duration = Duration::from_millis(25);
const DECREASE_INTERVAL: Duration = Duration::from_millis(300);
const ALR_PROBE_INTERVAL: Duration = Duration::from_secs(5);
const MIN_BITRATE_BPS: u32 = 5_000;
/// 2% and 10% in Q8.
const LOW_LOSS_Q8: u8 = 5;
const HIGH_LOSS_Q8: u8 = 25;
const MAX_PENDING_PACKETS: usize = 10_000;

// ─── Contract ───────────────────────────────────────────────────────────────

/// Network availability as seen by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Up,
    Down,
}

/// What the controller needs from a bandwidth estimator.
///
/// Callers may hold their own locks across these calls. Implementations must
/// not invoke [`NetworkChangedObserver`]s synchronously from them.
pub trait BandwidthEstimator:
    Module + TransportFeedbackObserver + CallStatsObserver + BandwidthObserver
{
    fn signal_network_state(&self, state: NetworkState);
    fn set_bwe_bitrates(&self, min_bps: i32, start_bps: i32, max_bps: i32);
    fn set_max_total_allocated_bitrate(&self, bitrate_bps: i32);
    /// Restart estimation from `start_bps` after a route change.
    fn on_network_route_changed(
        &self,
        route: &NetworkRoute,
        start_bps: i32,
        min_bps: i32,
        max_bps: i32,
    );
    fn on_sent_packet(&self, sent: &SentPacket);
    /// Current target, `None` while the network is down or before any
    /// start rate has been configured.
    fn available_bandwidth(&self) -> Option<u32>;
    fn enable_periodic_alr_probing(&self, enable: bool);

    fn register_packet_feedback_observer(&self, observer: &Arc<dyn PacketFeedbackObserver>)
        -> bool;
    fn deregister_packet_feedback_observer(
        &self,
        observer: &Arc<dyn PacketFeedbackObserver>,
    ) -> bool;
    fn register_network_observer(&self, observer: &Arc<dyn NetworkChangedObserver>) -> bool;
    fn deregister_network_observer(&self, observer: &Arc<dyn NetworkChangedObserver>) -> bool;
}

// ─── State ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NetworkReport {
    target_bps: u32,
    fraction_loss: u8,
    rtt_ms: i64,
    probing_interval_ms: i64,
}

type PendingReport = Option<(NetworkReport, Vec<Arc<dyn NetworkChangedObserver>>)>;

#[derive(Debug)]
struct PendingPacket {
    ssrc: u32,
    payload_size: usize,
    send_time_ms: Option<i64>,
}

struct EstimatorState {
    network: NetworkState,
    min_bps: u32,
    max_bps: Option<u32>,
    target_bps: Option<u32>,
    configured_start_bps: Option<i32>,
    receiver_estimate_bps: Option<u32>,
    max_total_allocated_bps: u32,
    rtt_ms: i64,

    lost_packets: u32,
    expected_packets: u32,
    last_fraction_loss: u8,
    last_process: Instant,
    last_decrease: Option<Instant>,

    pending: HashMap<u16, PendingPacket>,
    pending_order: VecDeque<u16>,

    alr_probing: bool,
    last_probe: Option<Instant>,

    last_report: Option<NetworkReport>,
    feedback_observers: ObserverSet<dyn PacketFeedbackObserver>,
    network_observers: ObserverSet<dyn NetworkChangedObserver>,
}

impl EstimatorState {
    fn clamp(&self, bps: u64) -> u32 {
        let lower = self.min_bps.max(MIN_BITRATE_BPS);
        let mut upper = self.max_bps.unwrap_or(u32::MAX);
        if let Some(remb) = self.receiver_estimate_bps {
            upper = upper.min(remb);
        }
        // The configured floor wins over a receiver estimate below it.
        (bps.min(upper as u64) as u32).max(lower)
    }

    fn apply_limits(&mut self, min_bps: i32, max_bps: i32) {
        self.min_bps = min_bps.max(0) as u32;
        self.max_bps = (max_bps > 0).then_some(max_bps as u32);
    }

    /// Loss since the last call as Q8, with the packet count it covers.
    fn take_fraction_loss(&mut self) -> Option<(u8, u32)> {
        if self.expected_packets == 0 {
            return None;
        }
        let expected = self.expected_packets;
        let lost = self.lost_packets.min(expected);
        self.expected_packets = 0;
        self.lost_packets = 0;
        let fraction = ((lost as u64 * 256) / expected as u64).min(255) as u8;
        Some((fraction, expected))
    }

    fn reset_history(&mut self) {
        self.lost_packets = 0;
        self.expected_packets = 0;
        self.last_fraction_loss = 0;
        self.last_decrease = None;
        self.pending.clear();
        self.pending_order.clear();
    }

    fn report(&self) -> NetworkReport {
        let target_bps = match self.network {
            NetworkState::Up => self.target_bps.unwrap_or(0),
            NetworkState::Down => 0,
        };
        NetworkReport {
            target_bps,
            fraction_loss: self.last_fraction_loss,
            rtt_ms: self.rtt_ms,
            probing_interval_ms: if self.alr_probing {
                ALR_PROBE_INTERVAL.as_millis() as i64
            } else {
                0
            },
        }
    }

    fn pending_report(&mut self) -> PendingReport {
        let report = self.report();
        if self.last_report == Some(report) {
            return None;
        }
        self.last_report = Some(report);
        Some((report, self.network_observers.snapshot()))
    }

    fn track_packet(&mut self, sequence_number: u16, packet: PendingPacket) {
        if self.pending.len() >= MAX_PENDING_PACKETS {
            if let Some(oldest) = self.pending_order.pop_front() {
                self.pending.remove(&oldest);
            }
        }
        if self.pending.insert(sequence_number, packet).is_none() {
            self.pending_order.push_back(sequence_number);
        }
    }
}

// ─── Send-Side Estimator ────────────────────────────────────────────────────

/// Default [`BandwidthEstimator`], steering a [`Pacer`].
pub struct SendSideEstimator {
    clock: Clock,
    event_log: Arc<dyn EventLog>,
    pacer: Arc<dyn Pacer>,
    state: Mutex<EstimatorState>,
}

impl SendSideEstimator {
    pub fn new(clock: Clock, event_log: Arc<dyn EventLog>, pacer: Arc<dyn Pacer>) -> Self {
        let now = clock.now();
        SendSideEstimator {
            clock,
            event_log,
            pacer,
            state: Mutex::new(EstimatorState {
                network: NetworkState::Up,
                min_bps: 0,
                max_bps: None,
                target_bps: None,
                configured_start_bps: None,
                receiver_estimate_bps: None,
                max_total_allocated_bps: 0,
                rtt_ms: 0,
                lost_packets: 0,
                expected_packets: 0,
                last_fraction_loss: 0,
                last_process: now,
                last_decrease: None,
                pending: HashMap::new(),
                pending_order: VecDeque::new(),
                alr_probing: false,
                last_probe: None,
                last_report: None,
                feedback_observers: ObserverSet::new(),
                network_observers: ObserverSet::new(),
            }),
        }
    }

    pub fn network_state(&self) -> NetworkState {
        self.lock().network
    }

    fn lock(&self) -> MutexGuard<'_, EstimatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, pending: PendingReport) {
        if let Some((report, observers)) = pending {
            for observer in observers {
                observer.on_network_changed(
                    report.target_bps,
                    report.fraction_loss,
                    report.rtt_ms,
                    report.probing_interval_ms,
                );
            }
        }
    }

    /// Set the target from a (re)configured start rate and push it downstream.
    fn restart_from(&self, state: &mut EstimatorState, start_bps: i32) {
        if start_bps <= 0 {
            return;
        }
        let target = state.clamp(start_bps as u64);
        state.configured_start_bps = Some(start_bps);
        state.target_bps = Some(target);
        self.pacer.set_estimated_bitrate(target);
    }

    fn apply_loss(&self, state: &mut EstimatorState, now: Instant, elapsed: Duration) {
        let Some((fraction, total_packets)) = state.take_fraction_loss() else {
            return;
        };
        state.last_fraction_loss = fraction;

        let Some(target) = state.target_bps else {
            return;
        };
        if state.network == NetworkState::Down {
            return;
        }

        let candidate = if fraction <= LOW_LOSS_Q8 {
            let growth = 1.08f64.powf(elapsed.as_secs_f64());
            (target as f64 * growth) as u64 + 1000
        } else if fraction > HIGH_LOSS_Q8 {
            let hold = DECREASE_INTERVAL + Duration::from_millis(state.rtt_ms.max(0) as u64);
            let may_decrease = state
                .last_decrease
                .map_or(true, |t| now.duration_since(t) >= hold);
            if may_decrease {
                state.last_decrease = Some(now);
                target as u64 * (512 - fraction as u64) / 512
            } else {
                target as u64
            }
        } else {
            target as u64
        };

        let updated = state.clamp(candidate);
        if updated != target {
            state.target_bps = Some(updated);
            self.pacer.set_estimated_bitrate(updated);
            self.event_log.log(RtcEvent::LossBasedUpdate {
                bitrate_bps: updated,
                fraction_loss: fraction,
                total_packets,
            });
        }
    }

    fn maybe_probe(&self, state: &mut EstimatorState, now: Instant) {
        if !state.alr_probing || state.network == NetworkState::Down {
            return;
        }
        let Some(target) = state.target_bps else {
            return;
        };
        if self.pacer.queue_in_ms() > 0 {
            return;
        }
        if state
            .last_probe
            .is_some_and(|t| now.duration_since(t) < ALR_PROBE_INTERVAL)
        {
            return;
        }

        let mut bitrate = target.saturating_mul(2);
        if state.max_total_allocated_bps > 0 {
            bitrate = bitrate.min(state.max_total_allocated_bps);
        }
        state.last_probe = Some(now);
        let id = self.pacer.create_probe_cluster(bitrate);
        self.event_log.log(RtcEvent::ProbeClusterCreated {
            id,
            bitrate_bps: bitrate,
        });
    }
}

impl Module for SendSideEstimator {
    fn time_until_next_process(&self) -> Duration {
        let since = self.clock.now().duration_since(self.lock().last_process);
        PROCESS_INTERVAL.saturating_sub(since)
    }

    fn process(&self) {
        let now = self.clock.now();
        let report = {
            let mut state = self.lock();
            let elapsed = now.duration_since(state.last_process);
            state.last_process = now;
            self.apply_loss(&mut state, now, elapsed);
            self.maybe_probe(&mut state, now);
            state.pending_report()
        };
        self.notify(report);
    }
}

impl TransportFeedbackObserver for SendSideEstimator {
    fn add_packet(&self, ssrc: u32, sequence_number: u16, length: usize) {
        let observers = {
            let mut state = self.lock();
            state.track_packet(
                sequence_number,
                PendingPacket {
                    ssrc,
                    payload_size: length,
                    send_time_ms: None,
                },
            );
            state.feedback_observers.snapshot()
        };
        for observer in observers {
            observer.on_packet_added(ssrc, sequence_number);
        }
    }

    fn on_transport_feedback(&self, feedback: &TransportFeedback) {
        let (vector, observers) = {
            let mut state = self.lock();
            let mut vector = Vec::with_capacity(feedback.packets.len());
            for status in &feedback.packets {
                let Some(packet) = state.pending.remove(&status.sequence_number) else {
                    debug!(seq = status.sequence_number, "feedback for unknown packet");
                    continue;
                };
                vector.push(PacketFeedback {
                    ssrc: packet.ssrc,
                    sequence_number: status.sequence_number,
                    payload_size: packet.payload_size,
                    send_time_ms: packet.send_time_ms,
                    arrival_time_ms: status.arrival_time_ms,
                });
            }
            if vector.is_empty() {
                return;
            }
            let received: Vec<u16> = vector.iter().map(|f| f.sequence_number).collect();
            state.pending_order.retain(|seq| !received.contains(seq));
            state.expected_packets += vector.len() as u32;
            state.lost_packets += vector.iter().filter(|f| f.is_lost()).count() as u32;
            (vector, state.feedback_observers.snapshot())
        };
        for observer in observers {
            observer.on_packet_feedback_vector(&vector);
        }
    }
}

impl CallStatsObserver for SendSideEstimator {
    fn on_rtt_update(&self, avg_rtt_ms: i64, _max_rtt_ms: i64) {
        self.lock().rtt_ms = avg_rtt_ms;
    }
}

impl BandwidthObserver for SendSideEstimator {
    fn on_received_estimated_bitrate(&self, bitrate_bps: u32) {
        let mut state = self.lock();
        state.receiver_estimate_bps = Some(bitrate_bps);
        if let Some(target) = state.target_bps {
            let capped = state.clamp(target as u64);
            if capped != target {
                debug!(target, capped, "receiver estimate caps target");
                state.target_bps = Some(capped);
                self.pacer.set_estimated_bitrate(capped);
            }
        }
    }

    fn on_received_rtcp_receiver_report(&self, fraction_loss: u8, rtt_ms: i64, packets: u32) {
        let mut state = self.lock();
        state.expected_packets += packets;
        state.lost_packets += (fraction_loss as u32 * packets) / 256;
        state.rtt_ms = rtt_ms;
    }
}

impl BandwidthEstimator for SendSideEstimator {
    fn signal_network_state(&self, network: NetworkState) {
        let mut state = self.lock();
        if state.network == network {
            return;
        }
        state.network = network;
        match network {
            NetworkState::Up => self.pacer.resume(),
            NetworkState::Down => self.pacer.pause(),
        }
        info!(?network, "network state changed");
        self.event_log.log(RtcEvent::NetworkState {
            up: network == NetworkState::Up,
        });
    }

    fn set_bwe_bitrates(&self, min_bps: i32, start_bps: i32, max_bps: i32) {
        let mut state = self.lock();
        state.apply_limits(min_bps, max_bps);
        let new_start = start_bps > 0 && state.configured_start_bps != Some(start_bps);
        let current = state.target_bps;
        match current {
            Some(target) if !new_start => {
                let clamped = state.clamp(target as u64);
                if clamped != target {
                    debug!(target, clamped, "limits re-clamp target");
                    state.target_bps = Some(clamped);
                }
                self.pacer.set_estimated_bitrate(clamped);
            }
            _ => self.restart_from(&mut state, start_bps),
        }
        self.event_log.log(RtcEvent::BitrateConfig {
            min_bps,
            start_bps,
            max_bps,
        });
    }

    fn set_max_total_allocated_bitrate(&self, bitrate_bps: i32) {
        self.lock().max_total_allocated_bps = bitrate_bps.max(0) as u32;
    }

    fn on_network_route_changed(
        &self,
        route: &NetworkRoute,
        start_bps: i32,
        min_bps: i32,
        max_bps: i32,
    ) {
        let mut state = self.lock();
        state.apply_limits(min_bps, max_bps);
        state.receiver_estimate_bps = None;
        state.reset_history();
        self.restart_from(&mut state, start_bps);
        self.event_log.log(RtcEvent::RouteChange {
            local_network_id: route.local_network_id,
            remote_network_id: route.remote_network_id,
            start_bps,
        });
    }

    fn on_sent_packet(&self, sent: &SentPacket) {
        let Some(id) = sent.packet_id else {
            return;
        };
        let mut state = self.lock();
        match state.pending.get_mut(&id) {
            Some(packet) => packet.send_time_ms = Some(sent.send_time_ms),
            None => debug!(seq = id, "sent packet was never added"),
        }
    }

    fn available_bandwidth(&self) -> Option<u32> {
        let state = self.lock();
        match state.network {
            NetworkState::Up => state.target_bps,
            NetworkState::Down => None,
        }
    }

    fn enable_periodic_alr_probing(&self, enable: bool) {
        let mut state = self.lock();
        if enable && state.max_total_allocated_bps == 0 {
            warn!("ALR probing enabled without a total allocated bitrate cap");
        }
        state.alr_probing = enable;
    }

    fn register_packet_feedback_observer(
        &self,
        observer: &Arc<dyn PacketFeedbackObserver>,
    ) -> bool {
        self.lock().feedback_observers.register(observer)
    }

    fn deregister_packet_feedback_observer(
        &self,
        observer: &Arc<dyn PacketFeedbackObserver>,
    ) -> bool {
        self.lock().feedback_observers.deregister(observer)
    }

    fn register_network_observer(&self, observer: &Arc<dyn NetworkChangedObserver>) -> bool {
        self.lock().network_observers.register(observer)
    }

    fn deregister_network_observer(&self, observer: &Arc<dyn NetworkChangedObserver>) -> bool {
        self.lock().network_observers.deregister(observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::NullEventLog;
    use crate::packet::PacedPacket;
    use crate::pacer::RtpPacketSender;
    use quanta::Mock;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

    #[derive(Default)]
    struct FakePacer {
        estimated: AtomicU32,
        paused: AtomicBool,
        queue_ms: AtomicI64,
        probes: Mutex<Vec<u32>>,
    }

    impl Module for FakePacer {
        fn time_until_next_process(&self) -> Duration {
            Duration::from_millis(5)
        }
        fn process(&self) {}
    }

    impl RtpPacketSender for FakePacer {
        fn insert_packet(&self, _packet: PacedPacket) {}
    }

    impl Pacer for FakePacer {
        fn set_send_bitrate_limits(&self, _min: i32, _padding: i32) {}
        fn set_pacing_factor(&self, _factor: f32) {}
        fn set_queue_time_limit(&self, _limit_ms: i64) {}
        fn set_estimated_bitrate(&self, bitrate_bps: u32) {
            self.estimated.store(bitrate_bps, Ordering::SeqCst);
        }
        fn create_probe_cluster(&self, bitrate_bps: u32) -> u32 {
            let mut probes = self.probes.lock().unwrap();
            probes.push(bitrate_bps);
            probes.len() as u32 - 1
        }
        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
        fn queue_in_ms(&self) -> i64 {
            self.queue_ms.load(Ordering::SeqCst)
        }
        fn first_sent_packet_time_ms(&self) -> Option<i64> {
            None
        }
    }

    #[derive(Default)]
    struct Reports(Mutex<Vec<(u32, u8, i64)>>);

    impl NetworkChangedObserver for Reports {
        fn on_network_changed(&self, target: u32, loss: u8, rtt: i64, _probing: i64) {
            self.0.lock().unwrap().push((target, loss, rtt));
        }
    }

    #[derive(Default)]
    struct Feedback {
        added: AtomicU32,
        vectors: Mutex<Vec<Vec<PacketFeedback>>>,
    }

    impl PacketFeedbackObserver for Feedback {
        fn on_packet_added(&self, _ssrc: u32, _seq: u16) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
        fn on_packet_feedback_vector(&self, feedback: &[PacketFeedback]) {
            self.vectors.lock().unwrap().push(feedback.to_vec());
        }
    }

    fn setup() -> (SendSideEstimator, Arc<FakePacer>, Arc<Mock>) {
        let (clock, mock) = Clock::mock();
        let pacer = Arc::new(FakePacer::default());
        let estimator = SendSideEstimator::new(clock, Arc::new(NullEventLog), pacer.clone());
        estimator.set_bwe_bitrates(50_000, 300_000, 2_500_000);
        (estimator, pacer, mock)
    }

    #[test]
    fn start_rate_seeds_target_and_pacer() {
        let (estimator, pacer, _mock) = setup();
        assert_eq!(estimator.available_bandwidth(), Some(300_000));
        assert_eq!(pacer.estimated.load(Ordering::SeqCst), 300_000);
    }

    #[test]
    fn no_estimate_before_start_rate() {
        let (clock, _mock) = Clock::mock();
        let estimator =
            SendSideEstimator::new(clock, Arc::new(NullEventLog), Arc::new(FakePacer::default()));
        assert_eq!(estimator.available_bandwidth(), None);
    }

    #[test]
    fn network_down_hides_estimate_and_pauses_pacer() {
        let (estimator, pacer, _mock) = setup();
        let reports = Arc::new(Reports::default());
        let obs: Arc<dyn NetworkChangedObserver> = reports.clone();
        estimator.register_network_observer(&obs);

        estimator.signal_network_state(NetworkState::Down);
        assert_eq!(estimator.available_bandwidth(), None);
        assert!(pacer.paused.load(Ordering::SeqCst));
        estimator.process();
        assert_eq!(reports.0.lock().unwrap().last(), Some(&(0, 0, 0)));

        estimator.signal_network_state(NetworkState::Up);
        assert_eq!(estimator.available_bandwidth(), Some(300_000));
        assert!(!pacer.paused.load(Ordering::SeqCst));
    }

    #[test]
    fn heavy_loss_reduces_target() {
        let (estimator, pacer, mock) = setup();
        estimator.on_received_rtcp_receiver_report(128, 50, 100);
        mock.increment(Duration::from_millis(25));
        estimator.process();
        assert_eq!(estimator.available_bandwidth(), Some(225_000));
        assert_eq!(pacer.estimated.load(Ordering::SeqCst), 225_000);

        // Second report inside the hold-off window does not decrease again.
        estimator.on_received_rtcp_receiver_report(128, 50, 100);
        mock.increment(Duration::from_millis(25));
        estimator.process();
        assert_eq!(estimator.available_bandwidth(), Some(225_000));
    }

    #[test]
    fn low_loss_grows_target() {
        let (estimator, _pacer, mock) = setup();
        estimator.on_received_rtcp_receiver_report(0, 20, 100);
        mock.increment(Duration::from_secs(1));
        estimator.process();
        let target = estimator.available_bandwidth().unwrap();
        assert!(target > 320_000, "target {target}");
    }

    #[test]
    fn target_respects_receiver_estimate_and_floor() {
        let (estimator, _pacer, _mock) = setup();
        estimator.on_received_estimated_bitrate(100_000);
        assert_eq!(estimator.available_bandwidth(), Some(100_000));
        estimator.on_received_estimated_bitrate(1_000);
        assert_eq!(estimator.available_bandwidth(), Some(50_000));
    }

    #[test]
    fn route_change_resets_to_start() {
        let (estimator, _pacer, mock) = setup();
        estimator.on_received_rtcp_receiver_report(200, 50, 100);
        mock.increment(Duration::from_millis(25));
        estimator.process();
        assert!(estimator.available_bandwidth().unwrap() < 300_000);

        estimator.on_network_route_changed(&NetworkRoute::connected(1, 2), 300_000, 50_000, 2_500_000);
        assert_eq!(estimator.available_bandwidth(), Some(300_000));
    }

    #[test]
    fn transport_feedback_reaches_observers() {
        let (estimator, _pacer, _mock) = setup();
        let fb = Arc::new(Feedback::default());
        let obs: Arc<dyn PacketFeedbackObserver> = fb.clone();
        assert!(estimator.register_packet_feedback_observer(&obs));

        estimator.add_packet(7, 10, 500);
        estimator.add_packet(7, 11, 500);
        estimator.on_sent_packet(&SentPacket {
            packet_id: Some(10),
            send_time_ms: 100,
        });
        let mut report = TransportFeedback::default();
        report.received(10, 150).lost(11).received(99, 160);
        estimator.on_transport_feedback(&report);

        assert_eq!(fb.added.load(Ordering::SeqCst), 2);
        let vectors = fb.vectors.lock().unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 2);
        assert_eq!(vectors[0][0].send_time_ms, Some(100));
        assert!(vectors[0][1].is_lost());
    }

    #[test]
    fn alr_probe_is_capped_and_rate_limited() {
        let (estimator, pacer, mock) = setup();
        estimator.set_max_total_allocated_bitrate(400_000);
        estimator.enable_periodic_alr_probing(true);

        estimator.process();
        assert_eq!(*pacer.probes.lock().unwrap(), vec![400_000]);

        mock.increment(Duration::from_secs(1));
        estimator.process();
        assert_eq!(pacer.probes.lock().unwrap().len(), 1);

        mock.increment(Duration::from_secs(5));
        estimator.process();
        assert_eq!(pacer.probes.lock().unwrap().len(), 2);
    }

    #[test]
    fn no_probe_while_queue_busy() {
        let (estimator, pacer, _mock) = setup();
        estimator.enable_periodic_alr_probing(true);
        pacer.queue_ms.store(40, Ordering::SeqCst);
        estimator.process();
        assert!(pacer.probes.lock().unwrap().is_empty());
    }

    #[test]
    fn observers_only_hear_changes() {
        let (estimator, _pacer, mock) = setup();
        let reports = Arc::new(Reports::default());
        let obs: Arc<dyn NetworkChangedObserver> = reports.clone();
        estimator.register_network_observer(&obs);

        mock.increment(Duration::from_millis(25));
        estimator.process();
        mock.increment(Duration::from_millis(25));
        estimator.process();
        assert_eq!(*reports.0.lock().unwrap(), vec![(300_000, 0, 0)]);

        estimator.on_rtt_update(80, 120);
        mock.increment(Duration::from_millis(25));
        estimator.process();
        assert_eq!(
            *reports.0.lock().unwrap(),
            vec![(300_000, 0, 0), (300_000, 0, 80)]
        );
    }

    #[test]
    fn configuration_calls_defer_reports_to_process() {
        let (estimator, _pacer, _mock) = setup();
        let reports = Arc::new(Reports::default());
        let obs: Arc<dyn NetworkChangedObserver> = reports.clone();
        estimator.register_network_observer(&obs);

        estimator.set_bwe_bitrates(60_000, 400_000, 2_000_000);
        estimator.on_network_route_changed(&NetworkRoute::connected(3, 4), 500_000, 60_000, 2_000_000);
        estimator.on_received_estimated_bitrate(450_000);
        estimator.signal_network_state(NetworkState::Down);
        estimator.signal_network_state(NetworkState::Up);
        assert!(reports.0.lock().unwrap().is_empty());

        estimator.process();
        assert_eq!(*reports.0.lock().unwrap(), vec![(450_000, 0, 0)]);
    }

    #[test]
    fn limit_only_change_keeps_converged_target() {
        let (estimator, pacer, mock) = setup();
        estimator.on_received_rtcp_receiver_report(128, 50, 100);
        mock.increment(Duration::from_millis(25));
        estimator.process();
        assert_eq!(estimator.available_bandwidth(), Some(225_000));

        // Same start, new max.
        estimator.set_bwe_bitrates(50_000, 300_000, 2_000_000);
        assert_eq!(estimator.available_bandwidth(), Some(225_000));
        assert_eq!(pacer.estimated.load(Ordering::SeqCst), 225_000);

        // No start at all, max below the target.
        estimator.set_bwe_bitrates(50_000, 0, 200_000);
        assert_eq!(estimator.available_bandwidth(), Some(200_000));

        estimator.set_bwe_bitrates(50_000, 400_000, 2_000_000);
        assert_eq!(estimator.available_bandwidth(), Some(400_000));
    }
}
