use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;
use crate::port::PortId;

pub const MAX_MULTIPLIER: f32 = 16.0;

/// Connection ids grow monotonically, so they double as creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

pub fn validate_multiplier(multiplier: f32) -> Result<f32, ConnectionError> {
    if multiplier.is_finite() && multiplier.abs() <= MAX_MULTIPLIER {
        Ok(multiplier)
    } else {
        Err(ConnectionError::InvalidMultiplier(multiplier))
    }
}

/// Per-cycle state of a connection shared between the editor side and every
/// graph snapshot, so toggling or re-weighting never requires a rebuild.
#[derive(Debug)]
pub struct ConnectionControl {
    enabled: AtomicBool,
    multiplier: AtomicF32,
}

impl ConnectionControl {
    pub fn new(multiplier: f32) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            multiplier: AtomicF32::new(multiplier),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn multiplier(&self) -> f32 {
        self.multiplier.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_multiplier(&self, multiplier: f32) {
        self.multiplier.store(multiplier, Ordering::Relaxed);
    }

    /// Effective gain for this cycle, zero when disabled.
    #[inline]
    pub fn gain(&self) -> f32 {
        if self.is_enabled() {
            self.multiplier()
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: PortId,
    pub dest: PortId,
    pub control: Arc<ConnectionControl>,
}

impl Connection {
    pub fn new(id: ConnectionId, source: PortId, dest: PortId, multiplier: f32) -> Self {
        Self {
            id,
            source,
            dest,
            control: Arc::new(ConnectionControl::new(multiplier)),
        }
    }
}

/// Handle returned by a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionRef {
    pub id: ConnectionId,
    pub source: PortId,
    pub dest: PortId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_bounds() {
        assert!(validate_multiplier(0.0).is_ok());
        assert!(validate_multiplier(-16.0).is_ok());
        assert!(validate_multiplier(16.5).is_err());
        assert!(validate_multiplier(f32::NAN).is_err());
        assert!(validate_multiplier(f32::INFINITY).is_err());
    }

    #[test]
    fn disabled_connection_contributes_nothing() {
        let control = ConnectionControl::new(0.7);
        assert_eq!(control.gain(), 0.7);
        control.set_enabled(false);
        assert_eq!(control.gain(), 0.0);
        control.set_enabled(true);
        control.set_multiplier(0.25);
        assert_eq!(control.gain(), 0.25);
    }
}
