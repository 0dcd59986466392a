//! Drive parsing and application across a whole patch stream: resolve each
//! patch's preimage source, apply it, and record the result in the file
//! table.
//!
//! The object store, working tree, and index are external collaborators
//! the spec names only by interface; they are modeled here as traits so
//! the engine itself never touches a filesystem path or an `ObjectId`
//! directly. `git-cli` supplies the real implementations.

use bstr::BString;

use crate::applier::{self, ApplyFragmentOptions};
use crate::error::ApplyError;
use crate::fragment::parse_fragments;
use crate::header::{self, HeaderOptions, HeaderResult, HeaderSession};
use crate::image::Image;
use crate::model::{FileTable, FileTableEntry, PatchArena, PatchId};
use crate::stream::Cursor;
use crate::binary;
use crate::whitespace::WsConfig;

/// Read access to the working tree.
pub trait TreeSource {
    fn read_file(&self, path: &BString) -> std::io::Result<Option<Vec<u8>>>;
    fn mode(&self, path: &BString) -> std::io::Result<Option<u32>>;
}

/// Read access to the index, used for `--cached`/`--index`.
pub trait IndexSource {
    fn blob_for(&self, path: &BString) -> Option<(git_hash::ObjectId, u32)>;
}

/// Read access to the content-addressed object store.
pub trait ObjectStore {
    fn read_blob(&self, oid: &git_hash::ObjectId) -> Result<Vec<u8>, ApplyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreimageMode {
    /// Working tree file contents.
    WorkingTree,
    /// Index blob only (`--cached`).
    Cached,
}

pub struct SessionOptions {
    pub check_only: bool,
    pub reject: bool,
    pub reverse: bool,
    pub no_add: bool,
    pub unidiff_zero: bool,
    pub recount: bool,
    pub inaccurate_eof: bool,
    pub context_floor: usize,
    pub preimage_mode: PreimageMode,
    pub require_index_match: bool,
    pub ws: WsConfig,
    pub header: HeaderOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            check_only: false,
            reject: false,
            reverse: false,
            no_add: false,
            unidiff_zero: false,
            recount: false,
            inaccurate_eof: false,
            context_floor: 0,
            preimage_mode: PreimageMode::WorkingTree,
            require_index_match: false,
            ws: WsConfig::default(),
            header: HeaderOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct PatchOutcome {
    pub id: PatchId,
    pub rejected_fragment_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct Session {
    pub arena: PatchArena,
    pub file_table: FileTable,
    pub outcomes: Vec<PatchOutcome>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            arena: PatchArena::new(),
            file_table: FileTable::new(),
            outcomes: Vec::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse and apply a full patch stream. `ws_errors` accumulates the
/// whitespace violation count so the caller can turn `--whitespace=error`
/// into a session-ending failure after processing every patch.
pub fn run_stream(
    stream: &[u8],
    opts: &SessionOptions,
    tree: &dyn TreeSource,
    index: &dyn IndexSource,
    odb: &dyn ObjectStore,
) -> Result<Session, ApplyError> {
    let mut session = Session::new();
    let mut cur = Cursor::new(stream);
    let mut header_session = HeaderSession::default();
    let mut ws_error_count = 0usize;

    loop {
        match header::parse_next_header(&mut cur, &opts.header, &mut header_session)? {
            HeaderResult::Eof => break,
            HeaderResult::Patch(mut patch) => {
                let (fragments, binary_patch) =
                    parse_fragments(&mut cur, opts.unidiff_zero, opts.recount)?;
                patch.fragments = fragments;
                patch.binary = binary_patch;
                patch.is_binary = patch.binary.is_some();
                if patch.is_binary && opts.reverse && patch.binary.as_ref().unwrap().reverse.is_none()
                {
                    return Err(ApplyError::IrreversibleBinary);
                }

                let id = session.arena.insert(patch);
                let outcome = apply_one_patch(
                    &mut session.arena,
                    &mut session.file_table,
                    id,
                    opts,
                    tree,
                    index,
                    odb,
                    &mut ws_error_count,
                )?;
                session.outcomes.push(outcome);
            }
        }
    }

    if opts.ws.fails_on_violation() && ws_error_count > 0 {
        return Err(ApplyError::WhitespaceViolation {
            count: ws_error_count,
        });
    }

    Ok(session)
}

#[allow(clippy::too_many_arguments)]
fn apply_one_patch(
    arena: &mut PatchArena,
    file_table: &mut FileTable,
    id: PatchId,
    opts: &SessionOptions,
    tree: &dyn TreeSource,
    index: &dyn IndexSource,
    odb: &dyn ObjectStore,
    ws_error_count: &mut usize,
) -> Result<PatchOutcome, ApplyError> {
    let preimage_bytes = resolve_preimage(arena, file_table, id, opts, tree, index, odb)?;
    resolve_actual_mode(arena, file_table, id, opts, tree, index)?;
    let mut warnings = Vec::new();

    let patch = arena.get(id);
    let is_binary = patch.is_binary;
    let path_for_errors = patch
        .target_name()
        .or(patch.source_name())
        .map(|b| b.to_string())
        .unwrap_or_default();

    let result_bytes = if is_binary {
        apply_binary(arena, id, &preimage_bytes, opts)?
    } else {
        apply_text(arena, id, preimage_bytes, opts, ws_error_count, &mut warnings)?
    };

    let patch = arena.get_mut(id);
    patch.result = Some(result_bytes);
    patch.rejected = patch.fragments.iter().any(|f| f.rejected);

    if patch.rejected && !opts.reject {
        return Err(ApplyError::PatchFailed {
            path: path_for_errors,
        });
    }

    record_file_table(arena, file_table, id);

    let patch = arena.get(id);
    let rejected_fragment_count = patch.fragments.iter().filter(|f| f.rejected).count();
    Ok(PatchOutcome {
        id,
        rejected_fragment_count,
        warnings,
    })
}

fn apply_binary(
    arena: &mut PatchArena,
    id: PatchId,
    preimage: &[u8],
    opts: &SessionOptions,
) -> Result<Vec<u8>, ApplyError> {
    let patch = arena.get(id);
    let binary_patch = patch.binary.as_ref().expect("apply_binary requires a binary patch");
    let hunk = if opts.reverse {
        binary_patch
            .reverse
            .as_ref()
            .ok_or(ApplyError::IrreversibleBinary)?
    } else {
        &binary_patch.forward
    };

    if let Some(expected) = &patch.old_sha1_prefix {
        let actual = hex_blob_hash(preimage);
        if !actual.starts_with(expected.as_str()) {
            return Err(ApplyError::PreimageMismatch {
                path: patch.target_name().map(|b| b.to_string()).unwrap_or_default(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    let result = binary::reconstruct(hunk.method, preimage, &hunk.inflated)?;

    if let Some(expected) = &patch.new_sha1_prefix {
        let actual = hex_blob_hash(&result);
        if !actual.starts_with(expected.as_str()) {
            return Err(ApplyError::PostimageMismatch {
                path: patch.target_name().map(|b| b.to_string()).unwrap_or_default(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    Ok(result)
}

fn hex_blob_hash(data: &[u8]) -> String {
    match git_hash::hasher::Hasher::hash_object(git_hash::HashAlgorithm::default(), "blob", data) {
        Ok(oid) => oid.to_hex(),
        Err(_) => String::new(),
    }
}

fn apply_text(
    arena: &mut PatchArena,
    id: PatchId,
    preimage: Vec<u8>,
    opts: &SessionOptions,
    ws_error_count: &mut usize,
    warnings: &mut Vec<String>,
) -> Result<Vec<u8>, ApplyError> {
    let mut image = Image::new(preimage);

    let ws_rule = arena.get(id).ws_rule;
    let ws = WsConfig {
        rule: if ws_rule != 0 { ws_rule } else { opts.ws.rule },
        policy: opts.ws.policy,
    };

    let fragment_count = arena.get(id).fragments.len();
    for i in 0..fragment_count {
        let mut fragment = arena.get(id).fragments[i].clone();
        let apply_opts = ApplyFragmentOptions {
            context_floor: opts.context_floor,
            no_add: opts.no_add,
            apply_in_reverse: opts.reverse,
            inaccurate_eof: opts.inaccurate_eof,
        };
        if let Some(result) = applier::apply_fragment(&mut image, &mut fragment, &ws, &apply_opts) {
            if let Some(w) = result.warning {
                warnings.push(w);
            }
            if ws.detects_errors() {
                *ws_error_count += result.ws_violations;
            }
        }
        arena.get_mut(id).fragments[i] = fragment;
    }

    Ok(image.buf)
}

fn resolve_preimage(
    arena: &PatchArena,
    file_table: &FileTable,
    id: PatchId,
    opts: &SessionOptions,
    tree: &dyn TreeSource,
    index: &dyn IndexSource,
    odb: &dyn ObjectStore,
) -> Result<Vec<u8>, ApplyError> {
    let patch = arena.get(id);

    if patch.is_creation() {
        return Ok(Vec::new());
    }

    let Some(source) = patch.source_name() else {
        return Ok(Vec::new());
    };

    if let Some(entry) = file_table.get(source) {
        match entry {
            FileTableEntry::Patch(prev_id) => {
                let prev = arena.get(prev_id);
                return Ok(prev.result.clone().unwrap_or_default());
            }
            FileTableEntry::WasDeleted => {
                return Err(ApplyError::PathConflict {
                    path: source.to_string(),
                    reason: "path was deleted earlier in this session".into(),
                });
            }
            FileTableEntry::ToBeDeleted => {
                // First half of a type-change split already ran; fall
                // through to read the real on-disk contents.
            }
        }
    }

    match opts.preimage_mode {
        PreimageMode::Cached => {
            let Some((oid, _mode)) = index.blob_for(source) else {
                return Err(ApplyError::IndexMissing {
                    path: source.to_string(),
                });
            };
            odb.read_blob(&oid)
        }
        PreimageMode::WorkingTree => {
            if opts.require_index_match && index.blob_for(source).is_none() {
                return Err(ApplyError::IndexMissing {
                    path: source.to_string(),
                });
            }
            match tree.read_file(source)? {
                Some(bytes) => Ok(bytes),
                None => Err(ApplyError::PathConflict {
                    path: source.to_string(),
                    reason: "file does not exist".into(),
                }),
            }
        }
    }
}

/// When a patch's header never states an `old mode`, it defaults to the
/// preimage's actual mode. `header::resolve_modes` only ever sees the
/// header text, so the real mode (tree, index, or an earlier patch in
/// this session that already rewrote the same path) has to be consulted
/// here instead, once the preimage source is known.
fn resolve_actual_mode(
    arena: &mut PatchArena,
    file_table: &FileTable,
    id: PatchId,
    opts: &SessionOptions,
    tree: &dyn TreeSource,
    index: &dyn IndexSource,
) -> Result<(), ApplyError> {
    let patch = arena.get(id);
    if patch.old_mode != 0 || patch.is_creation() {
        return Ok(());
    }
    let Some(source) = patch.source_name() else {
        return Ok(());
    };

    let actual_mode = if let Some(FileTableEntry::Patch(prev_id)) = file_table.get(source) {
        Some(arena.get(prev_id).new_mode)
    } else {
        match opts.preimage_mode {
            PreimageMode::Cached => index.blob_for(source).map(|(_, mode)| mode),
            PreimageMode::WorkingTree => tree.mode(source)?,
        }
    };

    if let Some(mode) = actual_mode {
        if mode != 0 {
            let patch = arena.get_mut(id);
            patch.old_mode = mode;
            header::resolve_modes(patch);
        }
    }
    Ok(())
}

fn record_file_table(arena: &PatchArena, file_table: &mut FileTable, id: PatchId) {
    let patch = arena.get(id);

    if let Some(old_name) = &patch.old_name {
        let consumed_by_rename_or_delete = patch.is_rename || patch.is_deletion();
        if consumed_by_rename_or_delete && Some(old_name) != patch.new_name.as_ref() {
            if patch.is_deletion() && !patch.is_rename && !patch.is_copy {
                // A delete immediately followed by a create at the same
                // path (type-change split) marks the path for reuse
                // instead of a hard deletion.
                file_table.set(old_name.clone(), FileTableEntry::ToBeDeleted);
            } else {
                file_table.set(old_name.clone(), FileTableEntry::WasDeleted);
            }
        }
    }

    if let Some(new_name) = patch.target_name() {
        if patch.is_deletion() && patch.new_name.is_none() {
            file_table.set(new_name.clone(), FileTableEntry::WasDeleted);
        } else {
            file_table.set(new_name.clone(), FileTableEntry::Patch(id));
        }
    }
}

