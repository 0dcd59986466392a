use std::fs;
use std::io::{self, Read as IoRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use bstr::BString;
use clap::{Args, ValueEnum};
use git_apply::pipeline::{IndexSource, ObjectStore, PreimageMode, Session, SessionOptions, TreeSource};
use git_apply::{reject, ApplyError, HeaderOptions, WsConfig, WsPolicy};
use git_index::{EntryFlags, Index, IndexEntry, Stage, StatData};
use git_object::{FileMode, Object};
use git_odb::ObjectDatabase;

use super::open_repo;
use crate::Cli;

/// Whitespace error handling action
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum WhitespaceAction {
    /// Do not warn about whitespace errors
    Nowarn,
    /// Warn about whitespace errors but apply the patch
    Warn,
    /// Fix whitespace errors and apply the patch
    Fix,
    /// Output errors and refuse to apply the patch
    Error,
    /// Like error, but show all errors (not just the first)
    ErrorAll,
}

impl From<WhitespaceAction> for WsPolicy {
    fn from(action: WhitespaceAction) -> Self {
        match action {
            WhitespaceAction::Nowarn => WsPolicy::NoWarn,
            WhitespaceAction::Warn => WsPolicy::Warn,
            WhitespaceAction::Fix => WsPolicy::Fix,
            WhitespaceAction::Error => WsPolicy::Error,
            WhitespaceAction::ErrorAll => WsPolicy::ErrorAll,
        }
    }
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Show diffstat for the input (don't apply)
    #[arg(long)]
    pub stat: bool,

    /// Show number stat for the input (don't apply)
    #[arg(long)]
    pub numstat: bool,

    /// Output a condensed summary of the patch (don't apply)
    #[arg(long)]
    pub summary: bool,

    /// Check if the patch can be applied without actually applying
    #[arg(long)]
    pub check: bool,

    /// Apply the patch to both the index and the working tree
    #[arg(long)]
    pub index: bool,

    /// Apply the patch to the index only (without touching the working tree)
    #[arg(long)]
    pub cached: bool,

    /// Apply the patch in reverse
    #[arg(short = 'R', long)]
    pub reverse: bool,

    /// Do not trust the line counts in the hunk headers (allow zero context)
    #[arg(long)]
    pub unidiff_zero: bool,

    /// Tolerate a missing trailing newline recorded incorrectly by some
    /// diff generators
    #[arg(long)]
    pub inaccurate_eof: bool,

    /// Remove <n> leading path components (default 1)
    #[arg(short = 'p', default_value = "1")]
    pub strip: usize,

    /// Prepend <dir> to all filenames
    #[arg(long = "directory")]
    pub directory: Option<String>,

    /// Leave rejected hunks in <file>.rej instead of failing outright
    #[arg(long)]
    pub reject: bool,

    /// Be verbose
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Whitespace error handling
    #[arg(long, value_enum)]
    pub whitespace: Option<WhitespaceAction>,

    /// Patch files (read from stdin if empty)
    pub patches: Vec<String>,
}

pub fn run(args: &ApplyArgs, cli: &Cli) -> Result<i32> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stderr = io::stderr();
    let mut err = stderr.lock();

    let patch_bytes = read_patch_input(&args.patches)?;

    // --stat/--numstat/--summary only need the parsed arena, not a working
    // tree, so run them against a collaborator set that refuses to read
    // anything; real patches never dereference a preimage for these modes
    // since nothing downstream of header+fragment parsing is exercised.
    if args.stat || args.numstat || args.summary {
        let mut opts = session_options(args, WsConfig::default());
        // Line counts come from the parsed fragments, not from actually
        // matching them against any content, so tolerate unreachable
        // hunks instead of bailing with a patch-failed error.
        opts.reject = true;
        let session = parse_only(&patch_bytes, &opts)?;
        if args.stat {
            write!(out, "{}", reject::diffstat(&session.arena))?;
        }
        if args.numstat {
            write!(out, "{}", reject::numstat(&session.arena))?;
        }
        if args.summary {
            write!(out, "{}", reject::summary(&session.arena))?;
        }
        return Ok(0);
    }

    let repo = open_repo(cli).ok();
    let work_dir = repo
        .as_ref()
        .and_then(|r| r.work_tree())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let ws = resolve_ws_config(args, repo.as_ref().map(|r| r.git_dir()))?;
    let mut opts = session_options(args, ws);

    let index_path = repo.as_ref().map(|r| r.git_dir().join("index"));
    let mut index = match &index_path {
        Some(path) if path.exists() => Index::read_from(path)?,
        _ => Index::new(),
    };
    opts.require_index_match = args.index;

    let odb = match &repo {
        Some(r) => Some(r.odb()),
        None if args.cached || args.index => {
            bail!("not a git repository");
        }
        None => None,
    };

    let tree = FsTreeSource {
        work_dir: work_dir.clone(),
    };
    let index_source = RepoIndexSource { index: &index };
    let object_store = RepoObjectStore { odb };

    let session = git_apply::pipeline::run_stream(
        &patch_bytes,
        &opts,
        &tree,
        &index_source,
        &object_store,
    );

    let session = match session {
        Ok(s) => s,
        Err(ApplyError::PatchFailed { path }) => {
            writeln!(err, "error: patch failed: {path}")?;
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    if args.check {
        for (_, patch) in session.arena.iter() {
            if patch.rejected {
                let name = patch
                    .target_name()
                    .or(patch.source_name())
                    .map(|b| b.to_string())
                    .unwrap_or_default();
                writeln!(err, "error: patch failed: {name}")?;
            }
        }
        let had_errors = session.arena.iter().any(|(_, p)| p.rejected);
        return Ok(i32::from(had_errors));
    }

    for outcome in &session.outcomes {
        let patch = session.arena.get(outcome.id);
        let name = patch
            .target_name()
            .or(patch.source_name())
            .map(|b| b.to_string())
            .unwrap_or_default();
        for warning in &outcome.warnings {
            writeln!(err, "warning: {name}: {warning}")?;
        }
    }

    write_results(&session, &work_dir, args, &mut err)?;

    let had_errors = session.arena.iter().any(|(_, p)| p.rejected && !args.reject);
    let any_rejected = session.arena.iter().any(|(_, p)| p.rejected);

    if (args.index || args.cached) && !had_errors {
        update_index(&mut index, &session, &work_dir)?;
        if let Some(path) = &index_path {
            index.write_to(path)?;
        }
    }

    Ok(i32::from(any_rejected && !args.reject || had_errors))
}

fn read_patch_input(patches: &[String]) -> Result<Vec<u8>> {
    if patches.is_empty() {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    let mut out = Vec::new();
    for path in patches {
        out.extend(fs::read(path)?);
    }
    Ok(out)
}

fn session_options(args: &ApplyArgs, ws: WsConfig) -> SessionOptions {
    SessionOptions {
        check_only: args.check,
        reject: args.reject,
        reverse: args.reverse,
        no_add: false,
        unidiff_zero: args.unidiff_zero,
        recount: false,
        inaccurate_eof: args.inaccurate_eof,
        context_floor: 0,
        preimage_mode: if args.cached {
            PreimageMode::Cached
        } else {
            PreimageMode::WorkingTree
        },
        require_index_match: false,
        ws,
        header: HeaderOptions {
            p_value: Some(args.strip),
            root: args.directory.as_deref().map(BString::from),
        },
    }
}

/// Resolve the effective whitespace policy: `--whitespace` wins over
/// `apply.whitespace`, which wins over `core.whitespace`, which falls back
/// to `warn`; `apply.ignorewhitespace` loosens a `Warn`/`NoWarn` policy to
/// whitespace-insensitive context matching without requiring `--whitespace
/// =fix`, mirroring `core git apply`'s layering.
fn resolve_ws_config(args: &ApplyArgs, git_dir: Option<&Path>) -> Result<WsConfig> {
    if let Some(action) = args.whitespace {
        return Ok(WsConfig {
            rule: git_apply::WS_DEFAULT_RULE,
            policy: action.into(),
        });
    }

    let config = git_config::ConfigSet::load(git_dir)?;
    let policy_name = config
        .get_string("apply.whitespace")?
        .or(config.get_string("core.whitespace")?);
    let mut policy = match policy_name.as_deref() {
        Some("nowarn") => WsPolicy::NoWarn,
        Some("warn") => WsPolicy::Warn,
        Some("fix") => WsPolicy::Fix,
        Some("error") => WsPolicy::Error,
        Some("error-all") => WsPolicy::ErrorAll,
        _ => WsPolicy::Warn,
    };
    if config.get_bool_or("apply.ignorewhitespace", false)? && matches!(policy, WsPolicy::Warn) {
        policy = WsPolicy::NoWarn;
    }
    Ok(WsConfig {
        rule: git_apply::WS_DEFAULT_RULE,
        policy,
    })
}

/// Collaborator set used for `--stat`/`--numstat`/`--summary`, where no
/// preimage is ever actually read.
struct NullTree;
impl TreeSource for NullTree {
    fn read_file(&self, _path: &BString) -> std::io::Result<Option<Vec<u8>>> {
        Ok(Some(Vec::new()))
    }
    fn mode(&self, _path: &BString) -> std::io::Result<Option<u32>> {
        Ok(None)
    }
}
struct NullIndex;
impl IndexSource for NullIndex {
    fn blob_for(&self, _path: &BString) -> Option<(git_hash::ObjectId, u32)> {
        None
    }
}
struct NullObjects;
impl ObjectStore for NullObjects {
    fn read_blob(&self, _oid: &git_hash::ObjectId) -> Result<Vec<u8>, ApplyError> {
        Ok(Vec::new())
    }
}

fn parse_only(patch_bytes: &[u8], opts: &SessionOptions) -> Result<Session> {
    Ok(git_apply::pipeline::run_stream(
        patch_bytes,
        opts,
        &NullTree,
        &NullIndex,
        &NullObjects,
    )?)
}

struct FsTreeSource {
    work_dir: PathBuf,
}

impl TreeSource for FsTreeSource {
    fn read_file(&self, path: &BString) -> std::io::Result<Option<Vec<u8>>> {
        let full = self.work_dir.join(path_from_bstring(path));
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn mode(&self, path: &BString) -> std::io::Result<Option<u32>> {
        let full = self.work_dir.join(path_from_bstring(path));
        match fs::symlink_metadata(&full) {
            Ok(meta) => Ok(Some(mode_from_metadata(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn mode_from_metadata(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    if meta.file_type().is_symlink() {
        0o120000
    } else if meta.permissions().mode() & 0o111 != 0 {
        0o100755
    } else {
        let _ = meta.dev();
        0o100644
    }
}

#[cfg(not(unix))]
fn mode_from_metadata(_meta: &fs::Metadata) -> u32 {
    0o100644
}

fn path_from_bstring(path: &BString) -> PathBuf {
    PathBuf::from(path.to_string())
}

struct RepoIndexSource<'a> {
    index: &'a Index,
}

impl IndexSource for RepoIndexSource<'_> {
    fn blob_for(&self, path: &BString) -> Option<(git_hash::ObjectId, u32)> {
        let entry = self.index.get(path.as_ref(), Stage::Normal)?;
        Some((entry.oid, entry.mode.raw()))
    }
}

struct RepoObjectStore<'a> {
    odb: Option<&'a ObjectDatabase>,
}

impl ObjectStore for RepoObjectStore<'_> {
    fn read_blob(&self, oid: &git_hash::ObjectId) -> Result<Vec<u8>, ApplyError> {
        let odb = self
            .odb
            .ok_or_else(|| ApplyError::Other("no object database available".into()))?;
        match odb.read(oid)? {
            Some(Object::Blob(blob)) => Ok(blob.data),
            Some(_) => Err(ApplyError::Other(format!("{} is not a blob", oid.to_hex()))),
            None => Err(ApplyError::Other(format!("missing object {}", oid.to_hex()))),
        }
    }
}

/// Write each patch's result to the working tree (unless `--cached`),
/// and any rejected patch's leftover hunks to a `.rej` file (with
/// `--reject`) or report failure otherwise. The engine itself never
/// touches the filesystem; this is the only place patch results become
/// durable.
fn write_results(
    session: &Session,
    work_dir: &Path,
    args: &ApplyArgs,
    err: &mut impl Write,
) -> Result<()> {
    let mut pending_deletes = Vec::<PathBuf>::new();

    for (_, patch) in session.arena.iter() {
        let had_source = patch.source_name().is_some() && !patch.is_creation();
        if patch.is_deletion() && patch.new_name.is_none() {
            if let Some(source) = patch.source_name() {
                pending_deletes.push(work_dir.join(path_from_bstring(source)));
            }
            continue;
        }

        let Some(target_name) = patch.target_name() else {
            continue;
        };
        let target = work_dir.join(path_from_bstring(target_name));

        if !args.cached {
            if let Some(result) = &patch.result {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, result)?;
            }
            if had_source {
                if let Some(source) = patch.source_name() {
                    if source != target_name {
                        pending_deletes.push(work_dir.join(path_from_bstring(source)));
                    }
                }
            }
        }

        if patch.rejected {
            if args.reject {
                if let Some((rej_name, rej_body)) = reject::build_reject(patch) {
                    let rej_path = work_dir.join(path_from_bstring(&rej_name));
                    fs::write(&rej_path, rej_body)?;
                    writeln!(err, "Applying patch with rejects... saved rejects to file {}", rej_path.display())?;
                }
            } else {
                let name = target_name.to_string();
                writeln!(err, "error: patch failed: {name}")?;
            }
        }

        if args.verbose {
            writeln!(err, "applied: {}", target_name)?;
        }
    }

    for path in pending_deletes {
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }

    Ok(())
}

fn update_index(index: &mut Index, session: &Session, work_dir: &Path) -> Result<()> {
    for (_, patch) in session.arena.iter() {
        if let Some(old_name) = &patch.old_name {
            if patch.is_rename || (patch.is_deletion() && patch.new_name.is_none()) {
                index.remove(old_name.as_ref(), Stage::Normal);
            }
        }

        let Some(target_name) = patch.target_name() else {
            continue;
        };
        if patch.is_deletion() && patch.new_name.is_none() {
            index.remove(target_name.as_ref(), Stage::Normal);
            continue;
        }

        let Some(result) = &patch.result else {
            continue;
        };
        let oid = git_hash::hasher::Hasher::hash_object(
            git_hash::HashAlgorithm::default(),
            "blob",
            result,
        )?;
        let mode = if matches!(patch.is_new, git_apply::Tri::Yes) && patch.new_mode != 0 {
            FileMode::from_raw(patch.new_mode)
        } else {
            FileMode::Regular
        };
        let stat = fs::metadata(work_dir.join(path_from_bstring(target_name)))
            .map(|m| StatData::from_metadata(&m))
            .unwrap_or_default();
        index.remove(target_name.as_ref(), Stage::Normal);
        index.add(IndexEntry {
            path: target_name.clone(),
            oid,
            mode,
            stage: Stage::Normal,
            stat,
            flags: EntryFlags::default(),
        });
    }
    Ok(())
}
