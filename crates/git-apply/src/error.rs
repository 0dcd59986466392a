//! Error taxonomy for the patch engine.
//!
//! Mirrors the three error kinds the pipeline distinguishes: stream-fatal
//! (corrupt input, aborts the whole session), patch-fatal (this file's
//! patch cannot be applied at all), and fragment-local (one hunk failed to
//! locate, only relevant when rejects are enabled).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    // --- stream-fatal: corrupt input, abort with a line number ---
    #[error("line {line}: corrupt patch: {reason}")]
    MalformedHeader { line: usize, reason: String },

    #[error("line {line}: corrupt patch - malformed fragment: {reason}")]
    MalformedFragment { line: usize, reason: String },

    #[error("line {line}: corrupt binary patch: {reason}")]
    MalformedBinaryHunk { line: usize, reason: String },

    #[error("cannot reverse-apply a binary patch without the reverse hunk")]
    IrreversibleBinary,

    #[error("line {line}: patch fragment without header")]
    FragmentWithoutHeader { line: usize },

    // --- patch-fatal: this patch cannot be applied ---
    #[error("{path}: preimage mismatch (expected blob {expected}, found {actual})")]
    PreimageMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{path}: {reason}")]
    PathConflict { path: String, reason: String },

    #[error("{path}: the index does not contain this path")]
    IndexMissing { path: String },

    #[error("patch failed: {path}")]
    PatchFailed { path: String },

    #[error("{count} line(s) added whitespace errors")]
    WhitespaceViolation { count: usize },

    #[error("{path}: postimage result hashes to {actual}, expected {expected}")]
    PostimageMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // --- wrapped collaborator errors ---
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] git_hash::HashError),

    #[error(transparent)]
    Object(#[from] git_object::ObjectError),

    #[error(transparent)]
    Odb(#[from] git_odb::OdbError),

    #[error(transparent)]
    Index(#[from] git_index::IndexError),

    #[error(transparent)]
    Pack(#[from] git_pack::PackError),

    #[error("{0}")]
    Other(String),
}

impl ApplyError {
    /// Stream-fatal errors carry a line number and abort the whole session.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            ApplyError::MalformedHeader { .. }
                | ApplyError::MalformedFragment { .. }
                | ApplyError::MalformedBinaryHunk { .. }
                | ApplyError::IrreversibleBinary
                | ApplyError::FragmentWithoutHeader { .. }
        )
    }
}
