//! # Transport Send Controller
//!
//! Single entry point for configuring and driving send-side bandwidth
//! behaviour of one RTP transport. It owns:
//!
//! - the **pacer** and the **estimator**, ticked by a private [`ProcessWorker`]
//! - a **route table** so only genuine route changes reset the estimate
//! - a **bitrate configurator** merging SDP constraints with client preferences
//! - the **keepalive config**
//!
//! ## Locking
//!
//! Route table, configurator and keepalive config live behind one mutex.
//! Pushes into the estimator that result from a mutation are issued while
//! that mutex is held, so two racing configuration calls reach the estimator
//! in the order they mutated the configurator. Worker ticks never take it.
//!
//! Estimators only notify [`NetworkChangedObserver`]s from their worker tick,
//! never from inside those pushes, so an observer may call any controller
//! method. Dropping the last handle to the controller from inside an observer
//! callback is not supported: it would join the worker from its own thread.
//!
//! ## Lifecycle
//!
//! ```text
//!   new:   network down → seed bitrates → register pacer, estimator → start
//!   drop:  stop (joins) → deregister estimator → deregister pacer
//! ```

use quanta::Clock;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::bitrate::{BitrateConfigurator, BitrateConstraints, BitrateConstraintsMask, BitrateUpdate};
use crate::config::{ControllerConfig, KeepAliveConfig};
use crate::error::ControllerError;
use crate::estimator::{BandwidthEstimator, NetworkState, SendSideEstimator};
use crate::event_log::EventLog;
use crate::observer::{
    BandwidthObserver, CallStatsObserver, NetworkChangedObserver, PacketFeedbackObserver,
    TransportFeedbackObserver,
};
use crate::pacer::{BudgetPacer, Pacer, RtpPacketSender};
use crate::packet::SentPacket;
use crate::route::{NetworkRoute, RouteObservation, RouteTable};
use crate::router::PacketRouter;
use crate::worker::{Module, ProcessWorker, WorkerConfig};

struct SharedState {
    routes: RouteTable,
    bitrate: BitrateConfigurator,
    keepalive: KeepAliveConfig,
}

/// Send-side controller for one transport.
pub struct TransportController<P = BudgetPacer, E = SendSideEstimator>
where
    P: Pacer + 'static,
    E: BandwidthEstimator + 'static,
{
    router: Arc<PacketRouter>,
    pacer: Arc<P>,
    estimator: Arc<E>,
    pacer_module: Arc<dyn Module>,
    estimator_module: Arc<dyn Module>,
    worker: ProcessWorker,
    state: Mutex<SharedState>,
}

impl TransportController {
    /// Controller with the default pacer and estimator.
    pub fn new(
        clock: Clock,
        event_log: Arc<dyn EventLog>,
        constraints: BitrateConstraints,
    ) -> Result<Self, ControllerError> {
        let config = ControllerConfig {
            bitrate: constraints,
            ..ControllerConfig::default()
        };
        Self::from_config(&config, clock, event_log)
    }

    /// Controller from a TOML document; an empty document gives defaults.
    pub fn from_toml_str(
        input: &str,
        clock: Clock,
        event_log: Arc<dyn EventLog>,
    ) -> Result<Self, ControllerError> {
        let config = ControllerConfig::from_toml_str(input)?;
        Self::from_config(&config, clock, event_log)
    }

    pub fn from_config(
        config: &ControllerConfig,
        clock: Clock,
        event_log: Arc<dyn EventLog>,
    ) -> Result<Self, ControllerError> {
        if config.bitrate.start_bps <= 0 {
            return Err(ControllerError::InvalidBitrate(config.bitrate.start_bps));
        }
        let router = Arc::new(PacketRouter::new());
        let pacer = Arc::new(BudgetPacer::new(clock.clone(), router.clone(), config.pacer));
        let estimator = Arc::new(SendSideEstimator::new(clock, event_log, pacer.clone()));
        let controller =
            Self::with_components(router, pacer, estimator, config.bitrate, config.worker.clone())?;
        controller.set_keepalive_config(config.keepalive);
        Ok(controller)
    }
}

impl<P, E> TransportController<P, E>
where
    P: Pacer + 'static,
    E: BandwidthEstimator + 'static,
{
    /// Controller around caller-supplied collaborators.
    ///
    /// Fails if `constraints.start_bps` is not positive or the worker thread
    /// cannot be spawned; in both cases nothing stays registered or running.
    pub fn with_components(
        router: Arc<PacketRouter>,
        pacer: Arc<P>,
        estimator: Arc<E>,
        constraints: BitrateConstraints,
        worker_config: WorkerConfig,
    ) -> Result<Self, ControllerError> {
        if constraints.start_bps <= 0 {
            return Err(ControllerError::InvalidBitrate(constraints.start_bps));
        }

        estimator.signal_network_state(NetworkState::Down);
        estimator.set_bwe_bitrates(
            constraints.min_bps,
            constraints.start_bps,
            constraints.max_bps,
        );

        let pacer_module: Arc<dyn Module> = pacer.clone();
        let estimator_module: Arc<dyn Module> = estimator.clone();
        let mut worker = ProcessWorker::new(worker_config);
        worker.register_module(pacer_module.clone());
        worker.register_module(estimator_module.clone());
        worker.start()?;

        info!(
            min_bps = constraints.min_bps,
            start_bps = constraints.start_bps,
            max_bps = constraints.max_bps,
            "transport controller started"
        );

        Ok(TransportController {
            router,
            pacer,
            estimator,
            pacer_module,
            estimator_module,
            worker,
            state: Mutex::new(SharedState {
                routes: RouteTable::new(),
                bitrate: BitrateConfigurator::new(constraints),
                keepalive: KeepAliveConfig::default(),
            }),
        })
    }

    // ─── Configuration ──────────────────────────────────────────────────

    pub fn set_allocated_send_bitrate_limits(
        &self,
        min_send_bitrate_bps: i32,
        max_padding_bitrate_bps: i32,
        max_total_bitrate_bps: i32,
    ) {
        self.pacer
            .set_send_bitrate_limits(min_send_bitrate_bps, max_padding_bitrate_bps);
        self.estimator
            .set_max_total_allocated_bitrate(max_total_bitrate_bps);
    }

    pub fn set_keepalive_config(&self, config: KeepAliveConfig) {
        self.lock().keepalive = config;
    }

    pub fn keepalive_config(&self) -> KeepAliveConfig {
        self.lock().keepalive
    }

    pub fn set_pacing_factor(&self, pacing_factor: f32) {
        self.pacer.set_pacing_factor(pacing_factor);
    }

    pub fn set_queue_time_limit(&self, limit_ms: i64) {
        self.pacer.set_queue_time_limit(limit_ms);
    }

    /// New session-negotiated constraints. Reconfigures the estimator only if
    /// the effective `{min, start, max}` changed.
    pub fn set_sdp_bitrate_parameters(&self, constraints: &BitrateConstraints) {
        let mut state = self.lock();
        let update = state.bitrate.update_with_sdp_parameters(*constraints);
        self.apply_bitrate_update(update, "sdp");
    }

    /// New client overrides; same propagation rule as
    /// [`set_sdp_bitrate_parameters`](Self::set_sdp_bitrate_parameters).
    pub fn set_client_bitrate_preferences(&self, preferences: &BitrateConstraintsMask) {
        let mut state = self.lock();
        let update = state.bitrate.update_with_client_preferences(*preferences);
        self.apply_bitrate_update(update, "client");
    }

    /// Effective bitrate constraints the estimator is configured with.
    pub fn bitrate_config(&self) -> BitrateConstraints {
        self.lock().bitrate.config()
    }

    // Caller holds the state lock.
    fn apply_bitrate_update(&self, update: BitrateUpdate, source: &'static str) {
        match update {
            BitrateUpdate::Changed(c) => {
                debug!(
                    source,
                    min_bps = c.min_bps,
                    start_bps = c.start_bps,
                    max_bps = c.max_bps,
                    "bitrate config changed"
                );
                self.estimator
                    .set_bwe_bitrates(c.min_bps, c.start_bps, c.max_bps);
            }
            BitrateUpdate::Unchanged => {
                debug!(source, "bitrate config unchanged, nothing to update");
            }
        }
    }

    // ─── Network Events ─────────────────────────────────────────────────

    /// A route observation for `transport_name`.
    ///
    /// Resets the estimator to the configured start rate only when a known
    /// transport moves to a different connected route.
    pub fn on_network_route_changed(&self, transport_name: &str, route: &NetworkRoute) {
        let mut state = self.lock();
        match state.routes.observe(transport_name, *route) {
            RouteObservation::Disconnected => {
                info!(transport = transport_name, "ignoring disconnected route");
            }
            RouteObservation::First => {
                info!(
                    transport = transport_name,
                    local = route.local_network_id,
                    remote = route.remote_network_id,
                    "route established"
                );
            }
            RouteObservation::Unchanged => {
                debug!(transport = transport_name, "route unchanged");
            }
            RouteObservation::Changed { previous } => {
                let config = state.bitrate.config();
                assert!(
                    config.start_bps > 0,
                    "route reset requires a positive start bitrate, got {}",
                    config.start_bps
                );
                info!(
                    transport = transport_name,
                    from_local = previous.local_network_id,
                    from_remote = previous.remote_network_id,
                    local = route.local_network_id,
                    remote = route.remote_network_id,
                    start_bps = config.start_bps,
                    min_bps = config.min_bps,
                    max_bps = config.max_bps,
                    "network route changed, resetting estimate"
                );
                self.estimator.on_network_route_changed(
                    route,
                    config.start_bps,
                    config.min_bps,
                    config.max_bps,
                );
            }
        }
    }

    pub fn on_network_availability(&self, network_available: bool) {
        info!(network_available, "network availability");
        let state = if network_available {
            NetworkState::Up
        } else {
            NetworkState::Down
        };
        self.estimator.signal_network_state(state);
    }

    pub fn on_sent_packet(&self, sent_packet: &SentPacket) {
        self.estimator.on_sent_packet(sent_packet);
    }

    // ─── Observers ──────────────────────────────────────────────────────

    pub fn register_packet_feedback_observer(
        &self,
        observer: &Arc<dyn PacketFeedbackObserver>,
    ) -> bool {
        self.estimator.register_packet_feedback_observer(observer)
    }

    pub fn deregister_packet_feedback_observer(
        &self,
        observer: &Arc<dyn PacketFeedbackObserver>,
    ) -> bool {
        self.estimator.deregister_packet_feedback_observer(observer)
    }

    pub fn register_network_observer(&self, observer: &Arc<dyn NetworkChangedObserver>) -> bool {
        self.estimator.register_network_observer(observer)
    }

    pub fn deregister_network_observer(
        &self,
        observer: &Arc<dyn NetworkChangedObserver>,
    ) -> bool {
        self.estimator.deregister_network_observer(observer)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn pacer_queuing_delay_ms(&self) -> i64 {
        self.pacer.queue_in_ms()
    }

    pub fn first_packet_time_ms(&self) -> Option<i64> {
        self.pacer.first_sent_packet_time_ms()
    }

    /// `None` means no estimate yet, not an error.
    pub fn available_bandwidth(&self) -> Option<u32> {
        self.estimator.available_bandwidth()
    }

    pub fn enable_periodic_alr_probing(&self, enable: bool) {
        self.estimator.enable_periodic_alr_probing(enable);
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn packet_router(&self) -> &Arc<PacketRouter> {
        &self.router
    }

    pub fn pacer(&self) -> &Arc<P> {
        &self.pacer
    }

    pub fn estimator(&self) -> &Arc<E> {
        &self.estimator
    }

    pub fn transport_feedback_observer(&self) -> Arc<dyn TransportFeedbackObserver> {
        self.estimator.clone()
    }

    pub fn packet_sender(&self) -> Arc<dyn RtpPacketSender> {
        self.pacer.clone()
    }

    pub fn call_stats_observer(&self) -> Arc<dyn CallStatsObserver> {
        self.estimator.clone()
    }

    pub fn bandwidth_observer(&self) -> Arc<dyn BandwidthObserver> {
        self.estimator.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<P, E> Drop for TransportController<P, E>
where
    P: Pacer + 'static,
    E: BandwidthEstimator + 'static,
{
    fn drop(&mut self) {
        self.worker.stop();
        self.worker.deregister_module(&self.estimator_module);
        self.worker.deregister_module(&self.pacer_module);
        info!("transport controller stopped");
    }
}
