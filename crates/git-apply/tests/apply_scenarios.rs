//! End-to-end scenarios driving `pipeline::run_stream` over a full patch
//! stream against an in-memory working tree.

use std::cell::RefCell;
use std::collections::HashMap;

use bstr::BString;
use git_apply::pipeline::{IndexSource, ObjectStore, PreimageMode, SessionOptions, TreeSource};
use git_apply::{ApplyError, FileTableEntry};

#[derive(Default)]
struct FakeTree {
    files: RefCell<HashMap<BString, Vec<u8>>>,
}

impl FakeTree {
    fn with(pairs: &[(&str, &[u8])]) -> Self {
        let mut files = HashMap::new();
        for (name, content) in pairs {
            files.insert(BString::from(*name), content.to_vec());
        }
        Self {
            files: RefCell::new(files),
        }
    }
}

impl TreeSource for FakeTree {
    fn read_file(&self, path: &BString) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.files.borrow().get(path).cloned())
    }

    fn mode(&self, _path: &BString) -> std::io::Result<Option<u32>> {
        Ok(None)
    }
}

struct NoIndex;
impl IndexSource for NoIndex {
    fn blob_for(&self, _path: &BString) -> Option<(git_hash::ObjectId, u32)> {
        None
    }
}

struct NoObjects;
impl ObjectStore for NoObjects {
    fn read_blob(&self, _oid: &git_hash::ObjectId) -> Result<Vec<u8>, ApplyError> {
        Err(ApplyError::Other("no object store in this test".into()))
    }
}

fn run(patch_text: &[u8], tree: &FakeTree, opts: &SessionOptions) -> git_apply::pipeline::Session {
    git_apply::pipeline::run_stream(patch_text, opts, tree, &NoIndex, &NoObjects).unwrap()
}

#[test]
fn s1_plain_text_apply() {
    let tree = FakeTree::with(&[("a", b"a\nb\nc\n")]);
    let patch = b"--- a\n+++ b\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n";
    let session = run(patch, &tree, &SessionOptions::default());
    let (_, patch) = session.arena.iter().next().unwrap();
    assert_eq!(patch.result.as_deref(), Some(&b"a\nB\nc\n"[..]));
}

#[test]
fn s2_drift_with_context_emits_warning() {
    let tree = FakeTree::with(&[("a", b"h1\nh2\na\nb\nc\nt\n")]);
    let patch = b"--- a\n+++ b\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n";
    let session = run(patch, &tree, &SessionOptions::default());
    let (_, result) = session.arena.iter().next().unwrap();
    assert_eq!(result.result.as_deref(), Some(&b"h1\nh2\na\nB\nc\nt\n"[..]));
    assert!(!session.outcomes[0].warnings.is_empty());
}

#[test]
fn s3_whitespace_fix_rewrites_context_to_patch_bytes() {
    use git_apply::{WsConfig, WsPolicy, WS_DEFAULT_RULE};

    let tree = FakeTree::with(&[("a", b"foo \n")]);
    let patch = b"--- a\n+++ b\n@@ -1,1 +1,2 @@\n foo\n+bar\n";
    let mut opts = SessionOptions::default();
    opts.ws = WsConfig {
        rule: WS_DEFAULT_RULE,
        policy: WsPolicy::Fix,
    };
    let session = run(patch, &tree, &opts);
    let (_, patch) = session.arena.iter().next().unwrap();
    assert_eq!(patch.result.as_deref(), Some(&b"foo\nbar\n"[..]));
}

#[test]
fn s4_creation_populates_file_table() {
    let tree = FakeTree::with(&[]);
    let patch = b"--- /dev/null\n+++ path\n@@ -0,0 +1,2 @@\n+one\n+two\n";
    let session = run(patch, &tree, &SessionOptions::default());
    let (id, result) = session.arena.iter().next().unwrap();
    assert_eq!(result.result.as_deref(), Some(&b"one\ntwo\n"[..]));
    assert!(matches!(result.is_new, git_apply::Tri::Yes));
    assert_eq!(
        session.file_table.get(&BString::from("path")),
        Some(FileTableEntry::Patch(id))
    );
}

#[test]
fn s5_rename_chain_reads_prior_result_as_preimage() {
    let tree = FakeTree::with(&[("A", b"one\ntwo\n")]);
    let patch = concat_bytes(&[
        b"--- A\n+++ B\n",
        b"@@ -1,2 +1,2 @@\n one\n-two\n+TWO\n",
        b"--- B\n+++ B\n",
        b"@@ -1,2 +1,2 @@\n one\n-TWO\n+three\n",
    ]);
    let session = run(&patch, &tree, &SessionOptions::default());
    assert_eq!(session.arena.len(), 2);
    let second = session.arena.get(session.outcomes[1].id);
    assert_eq!(second.result.as_deref(), Some(&b"one\nthree\n"[..]));
    assert_eq!(
        session.file_table.get(&BString::from("A")),
        Some(FileTableEntry::WasDeleted)
    );
    assert_eq!(
        session.file_table.get(&BString::from("B")),
        Some(FileTableEntry::Patch(session.outcomes[1].id))
    );
}

#[test]
fn s6_reject_applies_other_hunks_and_emits_rej() {
    let tree = FakeTree::with(&[("a", b"1\n2\n3\nzzz\nzzz\nzzz\n7\n8\n9\n")]);
    let patch = concat_bytes(&[
        b"--- a\n+++ a\n",
        b"@@ -1,3 +1,3 @@\n 1\n-2\n+two\n 3\n",
        b"@@ -4,3 +4,3 @@\n-nomatcha\n-nomatchb\n-nomatchc\n+A\n+B\n+C\n",
        b"@@ -7,3 +7,3 @@\n 7\n-8\n+eight\n 9\n",
    ]);
    let mut opts = SessionOptions::default();
    opts.reject = true;
    let session = run(&patch, &tree, &opts);
    let (_, patch) = session.arena.iter().next().unwrap();
    assert!(patch.rejected);
    assert_eq!(
        patch.result.as_deref(),
        Some(&b"1\ntwo\n3\nzzz\nzzz\nzzz\n7\neight\n9\n"[..])
    );
    assert_eq!(patch.fragments.iter().filter(|f| f.rejected).count(), 1);
    assert!(!patch.fragments[0].rejected);
    assert!(patch.fragments[1].rejected);
    assert!(!patch.fragments[2].rejected);

    let (rej_name, rej_body) = git_apply::reject::build_reject(patch).unwrap();
    assert_eq!(rej_name, BString::from("a.rej"));
    assert!(rej_body.starts_with(b"diff a/a b/a  (rejected hunks)\n"));
    assert!(rej_body.windows(b"nomatcha".len()).any(|w| w == b"nomatcha"));
}

#[test]
fn reverse_binary_without_reverse_hunk_fails() {
    let tree = FakeTree::with(&[("bin", b"old-bytes")]);
    // A literal-only binary hunk with no reverse half.
    let patch: Vec<u8> = {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"new-bytes").unwrap();
        let compressed = enc.finish().unwrap();
        let encoded = base85_encode_for_test(&compressed);
        let mut out = Vec::new();
        out.extend_from_slice(b"--- a/bin\n+++ b/bin\n");
        out.extend_from_slice(b"GIT binary patch\n");
        out.extend_from_slice(format!("literal {}\n", b"new-bytes".len()).as_bytes());
        out.extend_from_slice(&encoded);
        out.extend_from_slice(b"\n");
        out
    };

    let mut opts = SessionOptions::default();
    opts.reverse = true;
    let err = git_apply::pipeline::run_stream(&patch, &opts, &tree, &NoIndex, &NoObjects)
        .unwrap_err();
    assert!(matches!(err, ApplyError::IrreversibleBinary));
}

fn concat_bytes(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

/// Minimal GNU base85 encoder, mirroring the decoder in `src/base85.rs`,
/// used only to build binary-hunk fixtures for this test module.
fn base85_encode_for_test(data: &[u8]) -> Vec<u8> {
    const ALPHABET: &[u8] =
        b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";
    let mut out = Vec::new();
    for chunk in data.chunks(52) {
        let llen = if chunk.len() <= 26 {
            (chunk.len() as u8 + b'A' - 1) as char
        } else {
            (chunk.len() as u8 - 26 + b'a' - 1) as char
        };
        out.push(llen as u8);
        for group in chunk.chunks(4) {
            let mut buf = [0u8; 4];
            buf[..group.len()].copy_from_slice(group);
            let mut value = u32::from_be_bytes(buf);
            let mut digits = [0u8; 5];
            for d in digits.iter_mut().rev() {
                *d = ALPHABET[(value % 85) as usize];
                value /= 85;
            }
            out.extend_from_slice(&digits);
        }
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod property_checks {
    use super::*;

    #[test]
    fn fragment_line_counts_match_header_after_recount() {
        let tree = FakeTree::with(&[("a", b"a\nb\nc\n")]);
        let patch = b"--- a\n+++ a\n@@ -1,99 +1,99 @@\n a\n-b\n+B\n c\n";
        let mut opts = SessionOptions::default();
        opts.recount = true;
        let session = run(patch, &tree, &opts);
        let (_, patch) = session.arena.iter().next().unwrap();
        assert_eq!(patch.fragments[0].old_lines, 3);
        assert_eq!(patch.fragments[0].new_lines, 3);
    }
}
