//! # Packet Pacer
//!
//! Smooths outgoing packets to the rate the estimator allows. The pacer is a
//! [`Module`] ticked by the controller's worker every few milliseconds; each
//! tick refills an interval budget and releases queued packets through the
//! [`PacketRouter`] until the budget is spent.
//!
//! ## Rates
//!
//! 1. **Media**: `max(estimate, min_send) × pacing_factor`, raised when the
//!    oldest packet would otherwise miss the queue time limit, or while a
//!    probe cluster is active
//! 2. **Padding**: `max_padding_bitrate`, only once media has flowed and the
//!    queue is empty
//!
//! The router is always called with the pacer lock released, so send modules
//! may re-enter [`RtpPacketSender::insert_packet`] (e.g. for retransmissions).

use quanta::{Clock, Instant};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::packet::{PacedPacket, Priority};
use crate::router::PacketRouter;
use crate::worker::Module;

const PROCESS_INTERVAL: Duration = Duration::from_millis(5);
const PAUSED_PROCESS_INTERVAL: Duration = Duration::from_millis(500);
const MAX_ELAPSED: Duration = Duration::from_millis(30);
const BUDGET_WINDOW_MS: i64 = 500;
const PROBE_DURATION_MS: i64 = 15;
const MAX_PADDING_BYTES: usize = 1400;
const INITIAL_ESTIMATE_BPS: u32 = 300_000;

// ─── Contracts ──────────────────────────────────────────────────────────────

/// Accepts packets for paced transmission.
pub trait RtpPacketSender: Send + Sync {
    fn insert_packet(&self, packet: PacedPacket);
}

/// What the controller and estimator need from a pacer.
pub trait Pacer: Module + RtpPacketSender {
    fn set_send_bitrate_limits(&self, min_send_bitrate_bps: i32, max_padding_bitrate_bps: i32);
    fn set_pacing_factor(&self, pacing_factor: f32);
    fn set_queue_time_limit(&self, limit_ms: i64);
    /// Latest target from the estimator.
    fn set_estimated_bitrate(&self, bitrate_bps: u32);
    /// Start a probe at `bitrate_bps`. Returns the cluster id.
    fn create_probe_cluster(&self, bitrate_bps: u32) -> u32;
    fn pause(&self);
    fn resume(&self);
    /// Age of the oldest queued packet in ms, 0 when empty.
    fn queue_in_ms(&self) -> i64;
    /// When the first packet left the pacer, in ms on the pacer's clock.
    fn first_sent_packet_time_ms(&self) -> Option<i64>;
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Pacer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacerSettings {
    /// Multiplier applied to the estimate to get the media pacing rate.
    pub pacing_factor: f32,
    /// Longest a packet may wait before the pacer speeds up. `0` disables.
    pub queue_time_limit_ms: i64,
}

impl Default for PacerSettings {
    fn default() -> Self {
        PacerSettings {
            pacing_factor: 2.5,
            queue_time_limit_ms: 2000,
        }
    }
}

/// Pacer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PacerStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub padding_bytes_sent: u64,
    pub probes_completed: u64,
}

// ─── Interval Budget ────────────────────────────────────────────────────────

/// Byte budget refilled at a target rate, capped at one window's worth.
#[derive(Debug, Clone, Default)]
struct IntervalBudget {
    target_rate_kbps: i64,
    max_bytes_in_budget: i64,
    bytes_remaining: i64,
}

impl IntervalBudget {
    fn set_target_rate_kbps(&mut self, kbps: i64) {
        let kbps = kbps.max(0);
        self.target_rate_kbps = kbps;
        self.max_bytes_in_budget = kbps * BUDGET_WINDOW_MS / 8;
        self.bytes_remaining = self
            .bytes_remaining
            .clamp(-self.max_bytes_in_budget, self.max_bytes_in_budget);
    }

    fn increase_budget(&mut self, delta_ms: i64) {
        let bytes = self.target_rate_kbps * delta_ms / 8;
        // Unused budget does not carry over; debt does.
        self.bytes_remaining = if self.bytes_remaining < 0 {
            (self.bytes_remaining + bytes).min(self.max_bytes_in_budget)
        } else {
            bytes.min(self.max_bytes_in_budget)
        };
    }

    fn use_budget(&mut self, bytes: usize) {
        self.bytes_remaining = (self.bytes_remaining - bytes as i64).max(-self.max_bytes_in_budget);
    }

    fn bytes_remaining(&self) -> i64 {
        self.bytes_remaining
    }
}

// ─── Pacer State ────────────────────────────────────────────────────────────

type QueueKey = (Reverse<Priority>, u64);

#[derive(Debug)]
struct QueuedPacket {
    packet: PacedPacket,
    enqueued_at: Instant,
}

#[derive(Debug)]
struct ProbeCluster {
    id: u32,
    bitrate_bps: u32,
    bytes_remaining: i64,
}

struct PacerState {
    settings: PacerSettings,
    queue: BTreeMap<QueueKey, QueuedPacket>,
    next_order: u64,
    queued_bytes: usize,
    media_budget: IntervalBudget,
    padding_budget: IntervalBudget,
    estimated_bitrate_bps: u32,
    min_send_bitrate_bps: u32,
    max_padding_bitrate_bps: u32,
    paused: bool,
    last_process: Instant,
    first_sent: Option<Instant>,
    probe: Option<ProbeCluster>,
    next_probe_id: u32,
    stats: PacerStats,
}

impl PacerState {
    fn oldest_enqueue_time(&self) -> Option<Instant> {
        self.queue.values().map(|q| q.enqueued_at).min()
    }

    fn media_rate_kbps(&self, now: Instant) -> i64 {
        let base = self.estimated_bitrate_bps.max(self.min_send_bitrate_bps) as f64;
        let mut rate_bps = base * self.settings.pacing_factor as f64;

        if let Some(probe) = &self.probe {
            rate_bps = rate_bps.max(probe.bitrate_bps as f64);
        }

        if self.settings.queue_time_limit_ms > 0 {
            if let Some(oldest) = self.oldest_enqueue_time() {
                let age_ms = now.duration_since(oldest).as_millis() as i64;
                let remaining_ms = (self.settings.queue_time_limit_ms - age_ms).max(1);
                let needed_bps = (self.queued_bytes as f64 * 8.0 * 1000.0) / remaining_ms as f64;
                rate_bps = rate_bps.max(needed_bps);
            }
        }

        (rate_bps / 1000.0) as i64
    }

    fn on_media_sent(&mut self, bytes: usize, now: Instant) {
        self.media_budget.use_budget(bytes);
        self.padding_budget.use_budget(bytes);
        self.first_sent.get_or_insert(now);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        self.consume_probe(bytes);
    }

    fn on_padding_sent(&mut self, bytes: usize) {
        self.padding_budget.use_budget(bytes);
        self.stats.padding_bytes_sent += bytes as u64;
        self.consume_probe(bytes);
    }

    fn consume_probe(&mut self, bytes: usize) {
        if let Some(probe) = &mut self.probe {
            probe.bytes_remaining -= bytes as i64;
            if probe.bytes_remaining <= 0 {
                debug!(cluster = probe.id, "probe cluster complete");
                self.probe = None;
                self.stats.probes_completed += 1;
            }
        }
    }

    /// Bytes of padding to request right now, if any.
    fn padding_request(&self) -> usize {
        if self.paused || !self.queue.is_empty() || self.first_sent.is_none() {
            return 0;
        }
        if let Some(probe) = &self.probe {
            return (probe.bytes_remaining.max(0) as usize).min(MAX_PADDING_BYTES);
        }
        (self.padding_budget.bytes_remaining().max(0) as usize).min(MAX_PADDING_BYTES)
    }
}

// ─── Budget Pacer ───────────────────────────────────────────────────────────

/// Interval-budget pacer dispatching through a [`PacketRouter`].
pub struct BudgetPacer {
    clock: Clock,
    router: Arc<PacketRouter>,
    epoch: Instant,
    state: Mutex<PacerState>,
}

impl BudgetPacer {
    pub fn new(clock: Clock, router: Arc<PacketRouter>, settings: PacerSettings) -> Self {
        let now = clock.now();
        BudgetPacer {
            clock,
            router,
            epoch: now,
            state: Mutex::new(PacerState {
                settings,
                queue: BTreeMap::new(),
                next_order: 0,
                queued_bytes: 0,
                media_budget: IntervalBudget::default(),
                padding_budget: IntervalBudget::default(),
                estimated_bitrate_bps: INITIAL_ESTIMATE_BPS,
                min_send_bitrate_bps: 0,
                max_padding_bitrate_bps: 0,
                paused: false,
                last_process: now,
                first_sent: None,
                probe: None,
                next_probe_id: 0,
                stats: PacerStats::default(),
            }),
        }
    }

    pub fn settings(&self) -> PacerSettings {
        self.lock().settings
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn stats(&self) -> PacerStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PacerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_queued_media(&self, now: Instant) {
        loop {
            let (key, queued) = {
                let mut state = self.lock();
                if state.paused || state.media_budget.bytes_remaining() <= 0 {
                    return;
                }
                match state.queue.pop_first() {
                    Some(entry) => {
                        state.queued_bytes -= entry.1.packet.bytes;
                        entry
                    }
                    None => return,
                }
            };

            let sent = self.router.time_to_send_packet(&queued.packet);

            let mut state = self.lock();
            if !sent {
                state.queued_bytes += queued.packet.bytes;
                state.queue.insert(key, queued);
                return;
            }
            state.on_media_sent(queued.packet.bytes, now);
        }
    }

    fn send_padding(&self) {
        let request = self.lock().padding_request();
        if request == 0 {
            return;
        }
        let sent = self.router.time_to_send_padding(request);
        if sent > 0 {
            self.lock().on_padding_sent(sent);
        }
    }
}

impl RtpPacketSender for BudgetPacer {
    fn insert_packet(&self, packet: PacedPacket) {
        let now = self.clock.now();
        let mut state = self.lock();
        let order = state.next_order;
        state.next_order += 1;
        state.queued_bytes += packet.bytes;
        state.queue.insert(
            (Reverse(packet.priority), order),
            QueuedPacket {
                packet,
                enqueued_at: now,
            },
        );
    }
}

impl Module for BudgetPacer {
    fn time_until_next_process(&self) -> Duration {
        let state = self.lock();
        let interval = if state.paused {
            PAUSED_PROCESS_INTERVAL
        } else {
            PROCESS_INTERVAL
        };
        let since = self.clock.now().duration_since(state.last_process);
        interval.saturating_sub(since)
    }

    fn process(&self) {
        let now = self.clock.now();
        {
            let mut state = self.lock();
            let elapsed = now.duration_since(state.last_process).min(MAX_ELAPSED);
            state.last_process = now;
            if state.paused {
                return;
            }
            let elapsed_ms = elapsed.as_millis() as i64;
            let media_kbps = state.media_rate_kbps(now);
            let padding_kbps = state.max_padding_bitrate_bps as i64 / 1000;
            state.media_budget.set_target_rate_kbps(media_kbps);
            state.padding_budget.set_target_rate_kbps(padding_kbps);
            state.media_budget.increase_budget(elapsed_ms);
            state.padding_budget.increase_budget(elapsed_ms);
        }

        self.send_queued_media(now);
        self.send_padding();
    }
}

impl Pacer for BudgetPacer {
    fn set_send_bitrate_limits(&self, min_send_bitrate_bps: i32, max_padding_bitrate_bps: i32) {
        let mut state = self.lock();
        state.min_send_bitrate_bps = min_send_bitrate_bps.max(0) as u32;
        state.max_padding_bitrate_bps = max_padding_bitrate_bps.max(0) as u32;
    }

    fn set_pacing_factor(&self, pacing_factor: f32) {
        if !pacing_factor.is_finite() || pacing_factor <= 0.0 {
            warn!(pacing_factor, "ignoring invalid pacing factor");
            return;
        }
        self.lock().settings.pacing_factor = pacing_factor;
    }

    fn set_queue_time_limit(&self, limit_ms: i64) {
        self.lock().settings.queue_time_limit_ms = limit_ms;
    }

    fn set_estimated_bitrate(&self, bitrate_bps: u32) {
        self.lock().estimated_bitrate_bps = bitrate_bps;
    }

    fn create_probe_cluster(&self, bitrate_bps: u32) -> u32 {
        let mut state = self.lock();
        let id = state.next_probe_id;
        state.next_probe_id += 1;
        let bytes = (bitrate_bps as i64 * PROBE_DURATION_MS / 8000).max(1);
        state.probe = Some(ProbeCluster {
            id,
            bitrate_bps,
            bytes_remaining: bytes,
        });
        debug!(cluster = id, bitrate_bps, bytes, "probe cluster created");
        id
    }

    fn pause(&self) {
        let mut state = self.lock();
        if !state.paused {
            debug!("pacer paused");
            state.paused = true;
        }
    }

    fn resume(&self) {
        let mut state = self.lock();
        if state.paused {
            debug!("pacer resumed");
            state.paused = false;
        }
    }

    fn queue_in_ms(&self) -> i64 {
        let now = self.clock.now();
        self.lock()
            .oldest_enqueue_time()
            .map(|t| now.duration_since(t).as_millis() as i64)
            .unwrap_or(0)
    }

    fn first_sent_packet_time_ms(&self) -> Option<i64> {
        self.lock()
            .first_sent
            .map(|t| t.duration_since(self.epoch).as_millis() as i64)
    }
}
