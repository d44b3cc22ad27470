//! # Typed Errors
//!
//! kitedb reports recoverable failures by value. Every public operation
//! returns `eyre::Result`; failures that callers are expected to branch on
//! carry an [`Error`] with a stable [`ErrorCode`], which survives `eyre`
//! context wrapping and can be recovered with [`Error::code_of`].
//!
//! Broken internal invariants are not errors; those are asserts.

use thiserror::Error as ThisError;

/// Stable error codes surfaced across the public boundary.
///
/// The RPC/HTTP layers (out of scope here) translate these to protocol
/// status codes, so the discriminants are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    ParseJson = 1,
    ParseSql = 2,
    ParseDsl = 3,
    /// Bad input from the caller (lossy conversion, malformed key, ...).
    Params = 4,
    /// A precondition did not hold.
    Logic = 5,
    /// Primary-key or unique-constraint violation.
    Conflict = 6,
    NotFound = 7,
    Forbidden = 8,
    /// The namespace was marked read-only (storage failure or teardown).
    NamespaceInvalidated = 9,
    /// Stale client state token or tags-matcher version.
    StateInvalidated = 10,
    /// Deadline elapsed or the call was cancelled.
    Canceled = 11,
    /// CJSON was encoded against an incompatible tags matcher.
    TagsMismatch = 12,
}

#[derive(Debug, Clone, ThisError)]
#[error("{code:?}: {msg}")]
pub struct Error {
    pub code: ErrorCode,
    pub msg: String,
}

impl Error {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, msg: msg.into() }
    }

    pub fn params(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Params, msg)
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Logic, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn parse_json(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseJson, msg)
    }

    pub fn parse_sql(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseSql, msg)
    }

    pub fn namespace_invalidated() -> Self {
        Self::new(ErrorCode::NamespaceInvalidated, "namespace invalidated")
    }

    pub fn state_invalidated(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateInvalidated, msg)
    }

    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Canceled, msg)
    }

    pub fn tags_mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::TagsMismatch, msg)
    }

    /// Recovers the typed code from an `eyre::Report`, walking the context
    /// chain. Reports that do not originate from an [`Error`] map to
    /// [`ErrorCode::Logic`].
    pub fn code_of(report: &eyre::Report) -> ErrorCode {
        for cause in report.chain() {
            if let Some(err) = cause.downcast_ref::<Error>() {
                return err.code;
            }
        }
        ErrorCode::Logic
    }
}
