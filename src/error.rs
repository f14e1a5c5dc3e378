use thiserror::Error;

use crate::monitor::MonitorError;

/// How the embedding partition should treat an error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Severity {
    /// Input refused before any state mutation; the caller may correct and
    /// retry.
    Rejection,
    /// Invariant breach or completion-hook failure. The monitor state is no
    /// longer trustworthy; tear the partition down and re-promote.
    Fatal,
}

impl Severity {
    pub fn is_fatal(self) -> bool {
        matches!(self, Severity::Fatal)
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the canonical capability error; severity
/// classification lives on the inner type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl Error {
    pub fn severity(&self) -> Severity {
        match self {
            Error::Monitor(e) => e.severity(),
        }
    }
}
