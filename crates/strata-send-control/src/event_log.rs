//! # Event Log
//!
//! Structured record of send-side decisions (bitrate configuration, route
//! resets, estimate updates, probes) for offline analysis. The controller
//! receives a sink at construction and hands it to the estimator.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use tracing::warn;

/// One logged send-side event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RtcEvent {
    BitrateConfig {
        min_bps: i32,
        start_bps: i32,
        max_bps: i32,
    },
    RouteChange {
        local_network_id: u16,
        remote_network_id: u16,
        start_bps: i32,
    },
    LossBasedUpdate {
        bitrate_bps: u32,
        fraction_loss: u8,
        total_packets: u32,
    },
    NetworkState {
        up: bool,
    },
    ProbeClusterCreated {
        id: u32,
        bitrate_bps: u32,
    },
}

/// Sink for [`RtcEvent`]s. Must be callable from any thread.
pub trait EventLog: Send + Sync {
    fn log(&self, event: RtcEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventLog;

impl EventLog for NullEventLog {
    fn log(&self, _event: RtcEvent) {}
}

/// Writes each event as one JSON object per line.
pub struct JsonEventLog<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonEventLog<W> {
    pub fn new(out: W) -> Self {
        JsonEventLog {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> EventLog for JsonEventLog<W> {
    fn log(&self, event: RtcEvent) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let written = serde_json::to_writer(&mut *out, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"));
        if let Err(e) = written {
            warn!(error = %e, "failed to write event log entry");
        }
    }
}
