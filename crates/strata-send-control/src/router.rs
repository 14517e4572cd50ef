//! # Packet Router
//!
//! Hands paced packets to the RTP module that owns them. The pacer decides
//! *when*; the router only finds *who* by SSRC, and asks modules for padding
//! when the pacer has budget left and nothing queued.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::packet::PacedPacket;

/// An RTP sender that stores outgoing packets until the pacer releases them.
pub trait RtpSendModule: Send + Sync {
    fn ssrc(&self) -> u32;

    /// Put the stored packet on the wire. Returns `false` if it could not be
    /// sent and should stay queued.
    fn time_to_send_packet(&self, packet: &PacedPacket) -> bool;

    /// Generate up to `bytes` of padding. Returns the bytes actually sent.
    fn time_to_send_padding(&self, bytes: usize) -> usize;
}

/// SSRC-keyed registry of send modules.
pub struct PacketRouter {
    modules: Mutex<Vec<Arc<dyn RtpSendModule>>>,
    transport_seq: AtomicU16,
}

impl PacketRouter {
    pub fn new() -> Self {
        PacketRouter {
            modules: Mutex::new(Vec::new()),
            transport_seq: AtomicU16::new(0),
        }
    }

    /// Returns `false` if a module with the same SSRC is already present.
    pub fn add_send_module(&self, module: Arc<dyn RtpSendModule>) -> bool {
        let mut modules = self.lock_modules();
        if modules.iter().any(|m| m.ssrc() == module.ssrc()) {
            debug!(ssrc = module.ssrc(), "send module already present");
            return false;
        }
        modules.push(module);
        true
    }

    pub fn remove_send_module(&self, ssrc: u32) -> bool {
        let mut modules = self.lock_modules();
        let before = modules.len();
        modules.retain(|m| m.ssrc() != ssrc);
        modules.len() != before
    }

    pub fn module_count(&self) -> usize {
        self.lock_modules().len()
    }

    /// Dispatch to the module owning `packet.ssrc`.
    ///
    /// Packets for unknown SSRCs are reported as sent so they leave the queue.
    pub fn time_to_send_packet(&self, packet: &PacedPacket) -> bool {
        let module = self
            .lock_modules()
            .iter()
            .find(|m| m.ssrc() == packet.ssrc)
            .cloned();
        match module {
            Some(m) => m.time_to_send_packet(packet),
            None => {
                debug!(ssrc = packet.ssrc, seq = packet.sequence_number, "no module for packet");
                true
            }
        }
    }

    /// Ask modules in registration order for padding until one produces some.
    pub fn time_to_send_padding(&self, bytes: usize) -> usize {
        let modules: Vec<_> = self.lock_modules().clone();
        for m in modules {
            let sent = m.time_to_send_padding(bytes);
            if sent > 0 {
                return sent;
            }
        }
        0
    }

    /// Next transport-wide sequence number (wraps at `u16::MAX`).
    pub fn allocate_sequence_number(&self) -> u16 {
        self.transport_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_modules(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn RtpSendModule>>> {
        self.modules.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PacketRouter {
    fn default() -> Self {
        Self::new()
    }
}
