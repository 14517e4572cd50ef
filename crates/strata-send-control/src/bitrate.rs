//! # Bitrate Constraints
//!
//! Merges the two independent sources of send bitrate limits into the single
//! `{min, start, max}` triple the estimator is configured with:
//!
//! - **SDP parameters**: the session-negotiated base constraints
//! - **Client preferences**: an application-supplied mask that overrides any
//!   subset of the base fields
//!
//! Every update reports whether the effective triple actually changed, so the
//! caller only reconfigures the estimator when there is something new to say.

use serde::{Deserialize, Serialize};
use tracing::warn;

// ─── Constraints ────────────────────────────────────────────────────────────

/// Send bitrate limits in bits per second. `0` means "unset".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitrateConstraints {
    pub min_bps: i32,
    pub start_bps: i32,
    pub max_bps: i32,
}

impl BitrateConstraints {
    pub fn new(min_bps: i32, start_bps: i32, max_bps: i32) -> Self {
        BitrateConstraints {
            min_bps,
            start_bps,
            max_bps,
        }
    }
}

/// Optional per-field overrides supplied by the application.
///
/// A `None` field leaves the session-negotiated value in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateConstraintsMask {
    pub min_bps: Option<i32>,
    pub start_bps: Option<i32>,
    pub max_bps: Option<i32>,
}

impl BitrateConstraintsMask {
    /// Mask that overrides only the maximum.
    pub fn max(max_bps: i32) -> Self {
        BitrateConstraintsMask {
            max_bps: Some(max_bps),
            ..Default::default()
        }
    }

    /// Drop fields that carry no usable value (`<= 0`).
    fn sanitized(self) -> Self {
        let keep = |field: &'static str, value: Option<i32>| match value {
            Some(v) if v <= 0 => {
                warn!(field, value = v, "ignoring non-positive bitrate preference");
                None
            }
            other => other,
        };
        BitrateConstraintsMask {
            min_bps: keep("min_bps", self.min_bps),
            start_bps: keep("start_bps", self.start_bps),
            max_bps: keep("max_bps", self.max_bps),
        }
    }
}

// ─── Update Outcome ─────────────────────────────────────────────────────────

/// Result of feeding new constraints into the [`BitrateConfigurator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateUpdate {
    /// The effective config differs from the last one; push it downstream.
    Changed(BitrateConstraints),
    /// Nothing to propagate.
    Unchanged,
}

impl BitrateUpdate {
    pub fn is_changed(&self) -> bool {
        matches!(self, BitrateUpdate::Changed(_))
    }
}

// ─── Configurator ───────────────────────────────────────────────────────────

/// Holds the base constraints, the client mask, and the last effective triple.
#[derive(Debug, Clone)]
pub struct BitrateConfigurator {
    base: BitrateConstraints,
    mask: BitrateConstraintsMask,
    effective: BitrateConstraints,
}

impl BitrateConfigurator {
    /// Seed the configurator with the constraints the estimator starts with.
    pub fn new(initial: BitrateConstraints) -> Self {
        let base = clamp_unset(initial);
        BitrateConfigurator {
            base,
            mask: BitrateConstraintsMask::default(),
            effective: base,
        }
    }

    /// Current effective `{min, start, max}`.
    pub fn config(&self) -> BitrateConstraints {
        self.effective
    }

    /// Replace the session-negotiated base constraints.
    ///
    /// A base without a start rate keeps the previously negotiated start.
    pub fn update_with_sdp_parameters(&mut self, constraints: BitrateConstraints) -> BitrateUpdate {
        let mut base = clamp_unset(constraints);
        if base.start_bps <= 0 {
            base.start_bps = self.base.start_bps;
        }
        self.base = base;
        self.recompute()
    }

    /// Replace the application's override mask.
    pub fn update_with_client_preferences(&mut self, mask: BitrateConstraintsMask) -> BitrateUpdate {
        self.mask = mask.sanitized();
        self.recompute()
    }

    fn recompute(&mut self) -> BitrateUpdate {
        let merged = merge(&self.base, &self.mask);
        if merged == self.effective {
            return BitrateUpdate::Unchanged;
        }
        self.effective = merged;
        BitrateUpdate::Changed(merged)
    }
}

/// Per-field override: a present mask field wins, otherwise the base value.
pub fn merge(base: &BitrateConstraints, mask: &BitrateConstraintsMask) -> BitrateConstraints {
    BitrateConstraints {
        min_bps: mask.min_bps.unwrap_or(base.min_bps),
        start_bps: mask.start_bps.unwrap_or(base.start_bps),
        max_bps: mask.max_bps.unwrap_or(base.max_bps),
    }
}

fn clamp_unset(c: BitrateConstraints) -> BitrateConstraints {
    BitrateConstraints {
        min_bps: c.min_bps.max(0),
        start_bps: c.start_bps.max(0),
        max_bps: c.max_bps.max(0),
    }
}
