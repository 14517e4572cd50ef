//! # Network Route Tracking
//!
//! Remembers the last connected route seen on each named transport and
//! classifies every new observation:
//!
//! ```text
//!   Unseen ──connected──▶ Known(route) ──different route──▶ Known(route')
//!                              │
//!                        same route / disconnected: no change
//! ```
//!
//! Only a `Changed` observation should reset bandwidth estimation; the first
//! connection on a transport just establishes the baseline.

use std::collections::HashMap;

use compact_str::CompactString;
use serde::Serialize;

/// Local/remote network pairing used to reach a transport endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkRoute {
    pub local_network_id: u16,
    pub remote_network_id: u16,
    pub connected: bool,
}

impl NetworkRoute {
    /// A connected route between the given networks.
    pub fn connected(local_network_id: u16, remote_network_id: u16) -> Self {
        NetworkRoute {
            local_network_id,
            remote_network_id,
            connected: true,
        }
    }
}

/// How an observed route relates to what was known for that transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteObservation {
    /// Route is not connected; nothing recorded.
    Disconnected,
    /// First connected route for this transport.
    First,
    /// Same as the stored route.
    Unchanged,
    /// Differs from the stored route, which has been replaced.
    Changed { previous: NetworkRoute },
}

/// Last known route per transport name. Entries are never removed.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<CompactString, NetworkRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `route` for `transport` and report what kind of event it was.
    pub fn observe(&mut self, transport: &str, route: NetworkRoute) -> RouteObservation {
        if !route.connected {
            return RouteObservation::Disconnected;
        }
        match self.routes.get_mut(transport) {
            None => {
                self.routes.insert(CompactString::from(transport), route);
                RouteObservation::First
            }
            Some(known) if *known == route => RouteObservation::Unchanged,
            Some(known) => {
                let previous = std::mem::replace(known, route);
                RouteObservation::Changed { previous }
            }
        }
    }

    pub fn get(&self, transport: &str) -> Option<&NetworkRoute> {
        self.routes.get(transport)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
