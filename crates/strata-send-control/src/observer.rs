//! # Observers
//!
//! Capability traits the send path notifies or exposes, plus [`ObserverSet`],
//! the registry the estimator keeps its subscribers in.
//!
//! Registration does not take ownership: the set stores `Weak` handles and
//! the caller decides how long an observer lives. Identity is the allocation,
//! so the same `Arc` (or any clone of it) names the same observer.
//! Registering twice or deregistering an unknown observer is a silent no-op
//! reported through the `bool` return value.

use std::sync::{Arc, Weak};
use tracing::debug;

use crate::packet::{PacketFeedback, TransportFeedback};

// ─── Capability Traits ──────────────────────────────────────────────────────

/// Receives per-packet transport feedback.
pub trait PacketFeedbackObserver: Send + Sync {
    fn on_packet_added(&self, ssrc: u32, sequence_number: u16);
    fn on_packet_feedback_vector(&self, feedback: &[PacketFeedback]);
}

/// Receives target-rate updates from the estimator.
///
/// Called from the estimator's periodic tick on the worker thread with no
/// estimator or controller lock held.
pub trait NetworkChangedObserver: Send + Sync {
    fn on_network_changed(
        &self,
        target_bitrate_bps: u32,
        fraction_loss: u8,
        rtt_ms: i64,
        probing_interval_ms: i64,
    );
}

/// Entry point for transport-wide congestion control feedback.
pub trait TransportFeedbackObserver: Send + Sync {
    /// A packet with transport sequence number `sequence_number` was handed
    /// to the network.
    fn add_packet(&self, ssrc: u32, sequence_number: u16, length: usize);
    fn on_transport_feedback(&self, feedback: &TransportFeedback);
}

/// Receives round-trip time measurements from call statistics.
pub trait CallStatsObserver: Send + Sync {
    fn on_rtt_update(&self, avg_rtt_ms: i64, max_rtt_ms: i64);
}

/// Receives RTCP-derived bandwidth signals.
pub trait BandwidthObserver: Send + Sync {
    /// Receiver-estimated maximum bitrate (REMB).
    fn on_received_estimated_bitrate(&self, bitrate_bps: u32);
    /// Loss and RTT from an RTCP receiver report. `fraction_loss` is Q8.
    fn on_received_rtcp_receiver_report(&self, fraction_loss: u8, rtt_ms: i64, packets: u32);
}

// ─── Observer Set ───────────────────────────────────────────────────────────

/// Non-owning, identity-keyed set of observers.
pub struct ObserverSet<T: ?Sized> {
    observers: Vec<Weak<T>>,
}

impl<T: ?Sized> ObserverSet<T> {
    pub fn new() -> Self {
        ObserverSet {
            observers: Vec::new(),
        }
    }

    /// Returns `false` if `observer` is already registered.
    pub fn register(&mut self, observer: &Arc<T>) -> bool {
        let weak = Arc::downgrade(observer);
        if self.observers.iter().any(|o| Weak::ptr_eq(o, &weak)) {
            debug!("observer already registered");
            return false;
        }
        self.observers.push(weak);
        true
    }

    /// Returns `false` if `observer` was not registered.
    pub fn deregister(&mut self, observer: &Arc<T>) -> bool {
        let weak = Arc::downgrade(observer);
        let before = self.observers.len();
        self.observers.retain(|o| !Weak::ptr_eq(o, &weak));
        let removed = self.observers.len() != before;
        if !removed {
            debug!("deregistering unknown observer");
        }
        removed
    }

    /// Live observers, pruning any whose owner has dropped them.
    ///
    /// Returned as strong handles so callers can notify without holding
    /// whatever lock guards the set.
    pub fn snapshot(&mut self) -> Vec<Arc<T>> {
        self.observers.retain(|o| o.strong_count() > 0);
        self.observers.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.observers.iter().filter(|o| o.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Rtt(AtomicU32);

    impl CallStatsObserver for Rtt {
        fn on_rtt_update(&self, avg_rtt_ms: i64, _max_rtt_ms: i64) {
            self.0.store(avg_rtt_ms as u32, Ordering::SeqCst);
        }
    }

    #[test]
    fn double_register_is_noop() {
        let mut set: ObserverSet<dyn CallStatsObserver> = ObserverSet::new();
        let obs: Arc<dyn CallStatsObserver> = Arc::new(Rtt::default());
        assert!(set.register(&obs));
        assert!(!set.register(&obs.clone()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn deregister_absent_is_noop() {
        let mut set: ObserverSet<dyn CallStatsObserver> = ObserverSet::new();
        let a: Arc<dyn CallStatsObserver> = Arc::new(Rtt::default());
        let b: Arc<dyn CallStatsObserver> = Arc::new(Rtt::default());
        set.register(&a);
        assert!(!set.deregister(&b));
        assert_eq!(set.len(), 1);
        assert!(set.deregister(&a));
        assert!(set.is_empty());
    }

    #[test]
    fn snapshot_notifies_live_observers() {
        let mut set: ObserverSet<dyn CallStatsObserver> = ObserverSet::new();
        let rtt = Arc::new(Rtt::default());
        let obs: Arc<dyn CallStatsObserver> = rtt.clone();
        set.register(&obs);
        for o in set.snapshot() {
            o.on_rtt_update(42, 50);
        }
        assert_eq!(rtt.0.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let mut set: ObserverSet<dyn CallStatsObserver> = ObserverSet::new();
        let obs: Arc<dyn CallStatsObserver> = Arc::new(Rtt::default());
        set.register(&obs);
        drop(obs);
        assert!(set.snapshot().is_empty());
        assert!(set.is_empty());
    }
}
