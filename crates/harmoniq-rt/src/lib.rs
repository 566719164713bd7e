#![cfg_attr(not(test), warn(clippy::pedantic))]

//! Real-time hygiene shared by every thread that touches audio.
//!
//! The audio thread never logs. Anything worth telling the user is encoded as
//! a small `Copy` [`RtEvent`] and handed to a lock-free queue that a control
//! thread drains.

pub mod thread;

pub use thread::{enable_ftz_daz, lock_memory, pin_current_thread, promote_current_thread};

/// Why a processing unit was taken out of the signal chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FaultReason {
    /// The unit unwound out of its process call.
    Panicked,
    /// The unit returned an error.
    Error,
    /// The unit did not return before its deadline.
    Timeout,
}

impl FaultReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultReason::Panicked => "panicked",
            FaultReason::Error => "returned an error",
            FaultReason::Timeout => "exceeded its deadline",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RtEvent {
    Xrun { count: u32 },
    EngineLoad { pct: u16 },
    MaxBlockMicros { us: u32 },
    NodeFault { node: u32, reason: FaultReason },
    RecordingOverflow { port: u32, frames: u32 },
    /// `state` and `request` are the transport's own discriminants.
    TransportRejected { state: u8, request: u8 },
    BufferSizeMismatch { expected: u32, got: u32 },
    RetireOverflow,
}

impl RtEvent {
    #[inline]
    pub fn kind_id(&self) -> u8 {
        match self {
            RtEvent::Xrun { .. } => 1,
            RtEvent::EngineLoad { .. } => 2,
            RtEvent::MaxBlockMicros { .. } => 3,
            RtEvent::NodeFault { .. } => 4,
            RtEvent::RecordingOverflow { .. } => 5,
            RtEvent::TransportRejected { .. } => 6,
            RtEvent::BufferSizeMismatch { .. } => 7,
            RtEvent::RetireOverflow => 8,
        }
    }

    /// Events the user should see, as opposed to load statistics.
    #[inline]
    pub fn is_notification(&self) -> bool {
        !matches!(
            self,
            RtEvent::EngineLoad { .. } | RtEvent::MaxBlockMicros { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ids_are_distinct() {
        let events = [
            RtEvent::Xrun { count: 1 },
            RtEvent::EngineLoad { pct: 10 },
            RtEvent::MaxBlockMicros { us: 5 },
            RtEvent::NodeFault {
                node: 3,
                reason: FaultReason::Panicked,
            },
            RtEvent::RecordingOverflow { port: 1, frames: 64 },
            RtEvent::TransportRejected { state: 0, request: 2 },
            RtEvent::BufferSizeMismatch {
                expected: 256,
                got: 512,
            },
            RtEvent::RetireOverflow,
        ];
        let mut ids: Vec<u8> = events.iter().map(RtEvent::kind_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), events.len());
    }

    #[test]
    fn load_statistics_are_not_notifications() {
        assert!(!RtEvent::EngineLoad { pct: 90 }.is_notification());
        assert!(RtEvent::Xrun { count: 1 }.is_notification());
    }
}
