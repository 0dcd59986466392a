//! Core data structures: patches, fragments, the file table, and the arena
//! that owns them.
//!
//! Patches and fragments reference each other (a patch owns fragments, a
//! multi-patch session chains a rename's source into its consumer, the file
//! table points back at whichever patch currently owns a path); modeling
//! that directly with `Rc<RefCell<..>>` pointers would fight the borrow
//! checker for no benefit, so patches live in one arena `Vec` and are
//! addressed by an opaque handle.

use std::collections::HashMap;

use bstr::BString;

/// A patch's ternary flags: C git represents "unknown" with -1, distinct
/// from an explicit false/true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tri {
    #[default]
    Unknown,
    No,
    Yes,
}

impl Tri {
    pub fn is_yes(self) -> bool {
        matches!(self, Tri::Yes)
    }
}

/// Opaque handle into a [`PatchArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryMethod {
    Literal,
    Delta,
}

#[derive(Debug, Clone)]
pub struct BinaryHunk {
    pub method: BinaryMethod,
    pub orig_len: usize,
    /// Inflated bytes: the literal postimage for `Literal`, or delta
    /// instructions against the preimage for `Delta`.
    pub inflated: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BinaryPatch {
    pub forward: BinaryHunk,
    pub reverse: Option<BinaryHunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragLineKind {
    Context,
    Add,
    Remove,
}

/// One line within a fragment's body, in patch order.
#[derive(Debug, Clone)]
pub struct FragLine {
    pub kind: FragLineKind,
    /// Raw content including the trailing LF unless `no_eol` is set.
    pub content: Vec<u8>,
    pub no_eol: bool,
}

/// One `@@ -a,b +c,d @@` hunk.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub old_pos: i64,
    pub old_lines: usize,
    pub new_pos: i64,
    pub new_lines: usize,
    pub leading: usize,
    pub trailing: usize,
    pub lines: Vec<FragLine>,
    /// Raw hunk text (header line + body), kept verbatim for `.rej` output.
    pub raw: Vec<u8>,
    pub rejected: bool,
}

impl Fragment {
    pub fn context_floor_reached(&self, floor: usize) -> bool {
        self.leading <= floor && self.trailing <= floor
    }
}

/// One logical file change.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub old_name: Option<BString>,
    pub new_name: Option<BString>,
    pub def_name: Option<BString>,

    /// Octal mode, 0 when absent.
    pub old_mode: u32,
    pub new_mode: u32,

    pub is_new: Tri,
    pub is_delete: Tri,
    pub is_rename: bool,
    pub is_copy: bool,
    pub is_binary: bool,
    pub is_toplevel_relative: bool,
    pub inaccurate_eof: bool,
    pub recount: bool,

    pub score: u8,
    pub ws_rule: u32,

    pub old_sha1_prefix: Option<String>,
    pub new_sha1_prefix: Option<String>,

    pub fragments: Vec<Fragment>,
    pub binary: Option<BinaryPatch>,

    pub result: Option<Vec<u8>>,
    pub rejected: bool,
}

impl Patch {
    /// The name under which this patch's postimage should be recorded.
    pub fn target_name(&self) -> Option<&BString> {
        self.new_name.as_ref().or(self.def_name.as_ref())
    }

    /// The name this patch reads its preimage from.
    pub fn source_name(&self) -> Option<&BString> {
        self.old_name.as_ref().or(self.def_name.as_ref())
    }

    pub fn is_deletion(&self) -> bool {
        self.is_delete.is_yes()
    }

    pub fn is_creation(&self) -> bool {
        self.is_new.is_yes()
    }
}

/// Sentinel entries for a path in the [`FileTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTableEntry {
    Patch(PatchId),
    WasDeleted,
    ToBeDeleted,
}

/// Session-scoped map from path to whichever patch currently defines its
/// contents (or a deletion sentinel).
#[derive(Debug, Default)]
pub struct FileTable {
    map: HashMap<BString, FileTableEntry>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &BString) -> Option<FileTableEntry> {
        self.map.get(path).copied()
    }

    pub fn set(&mut self, path: BString, entry: FileTableEntry) {
        self.map.insert(path, entry);
    }

    pub fn remove(&mut self, path: &BString) {
        self.map.remove(path);
    }
}

/// Owns every patch parsed in a session; patches are addressed by
/// [`PatchId`] so the file table and rename chains can reference them
/// without shared ownership.
#[derive(Debug, Default)]
pub struct PatchArena {
    patches: Vec<Patch>,
}

impl PatchArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, patch: Patch) -> PatchId {
        self.patches.push(patch);
        PatchId(self.patches.len() - 1)
    }

    pub fn get(&self, id: PatchId) -> &Patch {
        &self.patches[id.0]
    }

    pub fn get_mut(&mut self, id: PatchId) -> &mut Patch {
        &mut self.patches[id.0]
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PatchId, &Patch)> {
        self.patches
            .iter()
            .enumerate()
            .map(|(i, p)| (PatchId(i), p))
    }

    pub fn ids(&self) -> impl Iterator<Item = PatchId> {
        (0..self.patches.len()).map(PatchId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_round_trips_patches() {
        let mut arena = PatchArena::new();
        let id = arena.insert(Patch::default());
        arena.get_mut(id).is_binary = true;
        assert!(arena.get(id).is_binary);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn tri_default_is_unknown() {
        assert_eq!(Tri::default(), Tri::Unknown);
        assert!(!Tri::Unknown.is_yes());
        assert!(Tri::Yes.is_yes());
    }

    #[test]
    fn file_table_tracks_sentinels() {
        let mut table = FileTable::new();
        let path = BString::from("a.txt");
        table.set(path.clone(), FileTableEntry::WasDeleted);
        assert_eq!(table.get(&path), Some(FileTableEntry::WasDeleted));
    }
}
