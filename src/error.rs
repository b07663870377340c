//! # Error Kinds
//!
//! JotDB propagates failures as `eyre::Result` throughout, with a small
//! stable [`ErrorKind`] attached as the root cause wherever the failure
//! class matters to a caller. Callers that need to branch (retry on busy,
//! surface corruption, fail fast on misuse) recover the kind with
//! [`error_kind`]; everything else just bubbles the report up.
//!
//! ## Taxonomy
//!
//! - `Io`: read/write/sync/truncate failure on the database or journal file.
//!   Never retried internally except for lock acquisition.
//! - `Corrupt`: malformed page or file header, out-of-bounds cell pointer,
//!   bad journal checksum. Always reported, never a panic.
//! - `Busy`: a lock could not be acquired within the busy timeout.
//!   Retryable by the caller.
//! - `NoMem`: an allocation-bounded resource (the page cache) is exhausted
//!   with nothing evictable. The triggering operation fails; cache state
//!   stays consistent.
//! - `Misuse`: API contract violation, e.g. operating a cursor after its
//!   transaction ended, or writing without a write transaction.
//! - `Full`: the database cannot grow (page number space exhausted).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("disk I/O error")]
    Io,
    #[error("database disk image is malformed")]
    Corrupt,
    #[error("database is locked")]
    Busy,
    #[error("out of memory")]
    NoMem,
    #[error("library routine called out of sequence")]
    Misuse,
    #[error("database is full")]
    Full,
}

/// Extracts the [`ErrorKind`] from a report, if one was attached anywhere
/// along the chain.
pub fn error_kind(report: &eyre::Report) -> Option<ErrorKind> {
    report
        .chain()
        .find_map(|cause| cause.downcast_ref::<ErrorKind>())
        .copied()
}

/// Builds a report rooted in `kind` with a human-readable message on top.
pub(crate) fn kind_err<D>(kind: ErrorKind, msg: D) -> eyre::Report
where
    D: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    eyre::Report::new(kind).wrap_err(msg)
}
