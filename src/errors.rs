//! Structured adapter error taxonomy.
//!
//! Venue adapters never raise exceptions for control flow (Design Notes,
//! spec §9): every fallible adapter call returns `Result<T, AdapterError>` and
//! callers branch on `AdapterError::kind`.

use thiserror::Error;

/// Error classification used by callers to decide retry/backoff/escalation
/// policy (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterErrorKind {
    RateLimited,
    NotFound,
    InsufficientMargin,
    SignatureFailure,
    NonceFailure,
    Network,
    Validation,
    Internal,
}

impl AdapterErrorKind {
    /// Transient errors are safe to retry at the component level with bounded
    /// backoff (spec §7 "Transient").
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            AdapterErrorKind::RateLimited
                | AdapterErrorKind::Network
                | AdapterErrorKind::NonceFailure
                | AdapterErrorKind::SignatureFailure
        )
    }

    /// Permanent leg-level errors count toward the caller's retry budget
    /// rather than being retried indefinitely (spec §7 "Permanent").
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            AdapterErrorKind::Validation | AdapterErrorKind::InsufficientMargin
        )
    }
}

/// A structured error returned by a venue adapter call.
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::RateLimited, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::NotFound, message)
    }

    pub fn insufficient_margin(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::InsufficientMargin, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Network, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Internal, message)
    }
}

/// Errors raised by the scheduler's rate-limiter acquire path.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("no counterparty venue available for {normalized}")]
    NoCounterparty { normalized: String },

    #[error("symbol lock for {normalized} already held by another task")]
    SymbolLockContended { normalized: String },

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),
}
