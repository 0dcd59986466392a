//! Unified-diff / git-apply-compatible patch engine for the gitr git
//! implementation.
//!
//! Parses both the git (`diff --git`) and traditional (`---`/`+++`) dialects
//! of unified diffs, including extended headers, binary hunks, and zero- or
//! reduced-context fragments, then applies them against a caller-supplied
//! working tree, index, and object store (see [`pipeline::TreeSource`],
//! [`pipeline::IndexSource`], [`pipeline::ObjectStore`]).

mod applier;
mod base85;
mod binary;
mod error;
mod fragment;
mod header;
mod image;
mod line;
mod matcher;
mod model;
pub mod pipeline;
pub mod reject;
mod stream;
mod whitespace;

pub use error::ApplyError;
pub use header::HeaderOptions;
pub use model::{
    BinaryHunk, BinaryMethod, BinaryPatch, FileTable, FileTableEntry, FragLine, FragLineKind,
    Fragment, Patch, PatchArena, PatchId, Tri,
};
pub use pipeline::{PreimageMode, Session, SessionOptions};
pub use whitespace::{WsConfig, WsPolicy, WS_DEFAULT_RULE};
