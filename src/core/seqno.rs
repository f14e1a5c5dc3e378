//! Sequence numbers and the monotonic counters built on them.
//!
//! Every counter that must never regress is a distinct wrapper type rather
//! than a bare integer: [`Monotonic`] requires strictly increasing values,
//! [`WeaklyMonotonic`] tolerates re-observing the current value. A regression
//! on either is an invariant breach, not an input error.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A prepare/acknowledgement sequence number.
///
/// Zero means "nothing yet": real seqnos assigned at enqueue time start at 1.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqNo(u64);

impl SeqNo {
    pub const ZERO: SeqNo = SeqNo(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNo({})", self.0)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SeqNo> for u64 {
    fn from(value: SeqNo) -> u64 {
        value.0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{label} regressed: current {current}, attempted {attempted}")]
pub struct MonotonicError {
    pub label: &'static str,
    pub current: SeqNo,
    pub attempted: SeqNo,
}

/// Strictly increasing counter. Writing a value less than or equal to the
/// current one fails.
#[derive(Clone, Copy, Debug)]
pub struct Monotonic {
    label: &'static str,
    value: SeqNo,
}

impl Monotonic {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            value: SeqNo::ZERO,
        }
    }

    pub fn get(self) -> SeqNo {
        self.value
    }

    pub fn advance(&mut self, next: SeqNo) -> Result<(), MonotonicError> {
        if next <= self.value {
            return Err(MonotonicError {
                label: self.label,
                current: self.value,
                attempted: next,
            });
        }
        self.value = next;
        Ok(())
    }
}

/// Counter where re-observing the current value is legal but a decrease is
/// still a breach.
#[derive(Clone, Copy, Debug)]
pub struct WeaklyMonotonic {
    label: &'static str,
    value: SeqNo,
}

impl WeaklyMonotonic {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            value: SeqNo::ZERO,
        }
    }

    pub fn get(self) -> SeqNo {
        self.value
    }

    pub fn advance(&mut self, next: SeqNo) -> Result<(), MonotonicError> {
        if next < self.value {
            return Err(MonotonicError {
                label: self.label,
                current: self.value,
                attempted: next,
            });
        }
        self.value = next;
        Ok(())
    }

    /// Record `seen` if it is ahead of the current value; lower values are
    /// ignored rather than rejected. Used where stale reports are benign.
    pub fn observe_at_least(&mut self, seen: SeqNo) {
        if seen > self.value {
            self.value = seen;
        }
    }
}
