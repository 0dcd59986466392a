//! Patch-start recognition, extended-header parsing and filename
//! extraction, for both the git and traditional unified-diff dialects.

use bstr::{BStr, BString, ByteSlice};

use crate::error::ApplyError;
use crate::model::{Patch, Tri};
use crate::stream::Cursor;

fn trim_end_bytes(bytes: &[u8], pred: impl Fn(u8) -> bool) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && pred(bytes[end - 1]) {
        end -= 1;
    }
    &bytes[..end]
}

fn trim_eol(bytes: &[u8]) -> &[u8] {
    trim_end_bytes(bytes, |b| b == b'\n' || b == b'\r')
}

fn trim_ascii_bytes(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    trim_end_bytes(&bytes[start..], |b| b.is_ascii_whitespace())
}

/// Options that affect header parsing: an explicit `-p<n>` always wins; the
/// session-latched value otherwise carries across patches (a git-dialect
/// header never re-guesses its own `p_value`, only traditional-dialect
/// `---`/`+++` pairs do).
#[derive(Debug, Clone, Default)]
pub struct HeaderOptions {
    pub p_value: Option<usize>,
    pub root: Option<BString>,
}

/// Mutable session state threaded through header parsing: the latched
/// `p_value` once it has been determined.
#[derive(Debug, Default)]
pub struct HeaderSession {
    pub latched_p: Option<usize>,
}

/// Outcome of attempting to parse one patch header.
pub enum HeaderResult {
    /// A patch header was recognized; the cursor now sits at the first
    /// `@@ -` line (or at EOF, for header-only / binary patches).
    Patch(Patch),
    /// No more patch headers in the stream.
    Eof,
}

/// Find and parse the next patch header starting from the cursor's current
/// position. Lines preceding a recognized header (e.g. mailbox noise) are
/// skipped.
pub fn parse_next_header(
    cur: &mut Cursor,
    opts: &HeaderOptions,
    session: &mut HeaderSession,
) -> Result<HeaderResult, ApplyError> {
    loop {
        let Some(line) = cur.peek_line() else {
            return Ok(HeaderResult::Eof);
        };
        if line.starts_with(b"diff --git ") {
            let patch = parse_git_header(cur, opts, session)?;
            return Ok(HeaderResult::Patch(patch));
        }
        if line.starts_with(b"--- ") {
            let patch = parse_traditional_header(cur, opts, session)?;
            return Ok(HeaderResult::Patch(patch));
        }
        cur.next_line();
    }
}

fn parse_git_header(
    cur: &mut Cursor,
    opts: &HeaderOptions,
    session: &mut HeaderSession,
) -> Result<Patch, ApplyError> {
    let line_no = cur.line_no;
    let header_line = cur.next_line().expect("caller peeked this line");
    let rest = &header_line[b"diff --git ".len()..];
    let rest = trim_eol(rest);

    let mut patch = Patch::default();
    if let Some((a, b)) = split_git_diff_names(rest) {
        if let (Ok(a), Ok(b)) = (c_unquote(a), c_unquote(b)) {
            let a_stripped = strip_fixed_prefix(a.as_bstr());
            let b_stripped = strip_fixed_prefix(b.as_bstr());
            if a_stripped == b_stripped {
                patch.def_name = Some(a_stripped.to_owned());
            }
        }
    }

    loop {
        let Some(line) = cur.peek_line() else { break };
        if line.starts_with(b"@@ -") || line.starts_with(b"GIT binary patch") {
            break;
        }
        if line.starts_with(b"diff --git ") {
            break;
        }
        let line = cur.next_line().unwrap();
        if !apply_extended_header_line(line, &mut patch, opts, session, true)? {
            break;
        }
    }

    resolve_def_name_fallback(&mut patch, line_no)?;
    resolve_modes(&mut patch);
    Ok(patch)
}

fn parse_traditional_header(
    cur: &mut Cursor,
    opts: &HeaderOptions,
    session: &mut HeaderSession,
) -> Result<Patch, ApplyError> {
    let line_no = cur.line_no;
    let old_line = cur.next_line().expect("caller peeked this line");
    let Some(new_line) = cur.peek_line() else {
        return Err(ApplyError::MalformedHeader {
            line: line_no,
            reason: "'---' not followed by '+++'".into(),
        });
    };
    if !new_line.starts_with(b"+++ ") {
        return Err(ApplyError::MalformedHeader {
            line: line_no,
            reason: "'---' not followed by '+++'".into(),
        });
    }
    cur.next_line();

    let old_raw = parse_name_field(&old_line[4..]);
    let new_raw = parse_name_field(&new_line[4..]);

    let mut patch = Patch::default();
    let old_is_dev_null = old_raw.as_slice() == b"/dev/null";
    let new_is_dev_null = new_raw.as_slice() == b"/dev/null";

    let p = resolve_p_value(opts, session, &old_raw, &new_raw, old_is_dev_null, new_is_dev_null);

    if !old_is_dev_null {
        patch.old_name = Some(normalize_name(old_raw.as_bstr(), p, opts));
    }
    if !new_is_dev_null {
        patch.new_name = Some(normalize_name(new_raw.as_bstr(), p, opts));
    }
    if old_is_dev_null {
        patch.is_new = Tri::Yes;
        patch.is_delete = Tri::No;
    } else if new_is_dev_null {
        patch.is_delete = Tri::Yes;
        patch.is_new = Tri::No;
    }

    resolve_def_name_fallback(&mut patch, line_no)?;
    resolve_modes(&mut patch);
    Ok(patch)
}

/// Dispatch one extended-header line against the static prefix table.
/// Returns `Ok(true)` if the line was recognized (header block continues),
/// `Ok(false)` if it signals end-of-header (caller must not consume it
/// again; already consumed here only when recognized).
fn apply_extended_header_line(
    line: &[u8],
    patch: &mut Patch,
    opts: &HeaderOptions,
    session: &mut HeaderSession,
    in_git_dialect: bool,
) -> Result<bool, ApplyError> {
    let trimmed = trim_eol(line);

    const HANDLERS: &[(&[u8], fn(&[u8], &mut Patch) -> Result<(), ApplyError>)] = &[
        (b"old mode ", handle_old_mode),
        (b"new mode ", handle_new_mode),
        (b"deleted file mode ", handle_deleted_file_mode),
        (b"new file mode ", handle_new_file_mode),
        (b"copy from ", handle_copy_from),
        (b"copy to ", handle_copy_to),
        (b"rename old ", handle_rename_from),
        (b"rename from ", handle_rename_from),
        (b"rename new ", handle_rename_to),
        (b"rename to ", handle_rename_to),
        (b"similarity index ", handle_similarity_index),
        (b"dissimilarity index ", handle_dissimilarity_index),
    ];

    for (prefix, handler) in HANDLERS {
        if trimmed.starts_with(prefix) {
            handler(&trimmed[prefix.len()..], patch)?;
            return Ok(true);
        }
    }

    if trimmed.starts_with(b"index ") {
        handle_index_line(&trimmed[b"index ".len()..], patch)?;
        return Ok(true);
    }

    if trimmed.starts_with(b"--- ") {
        let raw = parse_name_field(&trimmed[4..]);
        if raw.as_slice() != b"/dev/null" {
            let p = if in_git_dialect {
                opts.p_value.or(session.latched_p).unwrap_or(1)
            } else {
                opts.p_value.or(session.latched_p).unwrap_or(0)
            };
            patch.old_name = Some(normalize_name(raw.as_bstr(), p, opts));
        } else {
            patch.is_new = Tri::Yes;
        }
        return Ok(true);
    }

    if trimmed.starts_with(b"+++ ") {
        let raw = parse_name_field(&trimmed[4..]);
        if raw.as_slice() != b"/dev/null" {
            let p = if in_git_dialect {
                opts.p_value.or(session.latched_p).unwrap_or(1)
            } else {
                opts.p_value.or(session.latched_p).unwrap_or(0)
            };
            patch.new_name = Some(normalize_name(raw.as_bstr(), p, opts));
        } else {
            patch.is_delete = Tri::Yes;
        }
        return Ok(true);
    }

    Ok(false)
}

fn handle_old_mode(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.old_mode = parse_octal_mode(rest)?;
    Ok(())
}
fn handle_new_mode(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.new_mode = parse_octal_mode(rest)?;
    Ok(())
}
fn handle_deleted_file_mode(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.old_mode = parse_octal_mode(rest)?;
    patch.is_delete = Tri::Yes;
    patch.is_new = Tri::No;
    Ok(())
}
fn handle_new_file_mode(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.new_mode = parse_octal_mode(rest)?;
    patch.is_new = Tri::Yes;
    patch.is_delete = Tri::No;
    Ok(())
}
fn handle_copy_from(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.old_name = Some(unquote_or_raw(rest));
    patch.is_copy = true;
    Ok(())
}
fn handle_copy_to(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.new_name = Some(unquote_or_raw(rest));
    patch.is_copy = true;
    Ok(())
}
fn handle_rename_from(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.old_name = Some(unquote_or_raw(rest));
    patch.is_rename = true;
    Ok(())
}
fn handle_rename_to(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.new_name = Some(unquote_or_raw(rest));
    patch.is_rename = true;
    Ok(())
}
fn handle_similarity_index(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.score = parse_percent(rest)?;
    Ok(())
}
fn handle_dissimilarity_index(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    patch.score = 100u8.saturating_sub(parse_percent(rest)?);
    Ok(())
}

fn handle_index_line(rest: &[u8], patch: &mut Patch) -> Result<(), ApplyError> {
    // "<old>..<new>[ <mode>]"
    let s = rest.to_str().map_err(|_| ApplyError::MalformedHeader {
        line: 0,
        reason: "non-utf8 index line".into(),
    })?;
    let mut parts = s.splitn(2, ' ');
    let hashes = parts.next().unwrap_or("");
    let mode = parts.next();
    let mut hash_parts = hashes.splitn(2, "..");
    let old = hash_parts.next().unwrap_or("");
    let new = hash_parts.next().unwrap_or("");
    if old.is_empty() || new.is_empty() || !is_hex(old) || !is_hex(new) {
        return Err(ApplyError::MalformedHeader {
            line: 0,
            reason: format!("invalid index line: {rest:?}"),
        });
    }
    patch.old_sha1_prefix = Some(old.to_string());
    patch.new_sha1_prefix = Some(new.to_string());
    if let Some(mode) = mode {
        if let Ok(m) = u32::from_str_radix(mode.trim(), 8) {
            patch.old_mode = m;
            patch.new_mode = m;
        }
    }
    Ok(())
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_octal_mode(rest: &[u8]) -> Result<u32, ApplyError> {
    let s = trim_ascii_bytes(rest).to_str().map_err(|_| ApplyError::MalformedHeader {
        line: 0,
        reason: "non-utf8 mode".into(),
    })?;
    u32::from_str_radix(s, 8).map_err(|_| ApplyError::MalformedHeader {
        line: 0,
        reason: format!("invalid mode {s:?}"),
    })
}

fn parse_percent(rest: &[u8]) -> Result<u8, ApplyError> {
    let trimmed = trim_ascii_bytes(rest);
    let trimmed = trim_end_bytes(trimmed, |b| b == b'%');
    let s = trimmed.to_str().map_err(|_| ApplyError::MalformedHeader {
            line: 0,
            reason: "non-utf8 similarity index".into(),
        })?;
    s.parse::<u8>().map_err(|_| ApplyError::MalformedHeader {
        line: 0,
        reason: format!("invalid similarity index {s:?}"),
    })
}

fn unquote_or_raw(rest: &[u8]) -> BString {
    let trimmed = trim_eol(rest);
    c_unquote(trimmed).unwrap_or_else(|_| BString::from(trimmed))
}

/// Split `diff --git a/X b/Y`'s remainder into `(A, B)`. Filenames may
/// contain spaces, so this only works reliably when both sides share the
/// conventional `a/`/`b/` prefix (the common case); otherwise it falls
/// back to a plain midpoint split, mirroring the header-line ambiguity the
/// spec calls out.
fn split_git_diff_names(rest: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(pos) = find_ab_split(rest) {
        return Some((&rest[..pos], &rest[pos + 1..]));
    }
    let mid = rest.len() / 2;
    rest.get(mid).map(|_| (&rest[..mid], &rest[mid + 1..]))
}

fn find_ab_split(rest: &[u8]) -> Option<usize> {
    if !rest.starts_with(b"a/") && rest.first() != Some(&b'"') {
        return None;
    }
    let mut i = 0;
    while i < rest.len() {
        if rest[i] == b' ' && rest[i..].starts_with(b" b/") {
            return Some(i);
        }
        if rest[i] == b' ' && i + 1 < rest.len() && rest[i + 1] == b'"' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn strip_fixed_prefix(path: &BStr) -> BString {
    let bytes = path.as_bytes();
    if bytes.len() > 2 && (bytes.starts_with(b"a/") || bytes.starts_with(b"b/")) {
        BString::from(&bytes[2..])
    } else {
        BString::from(bytes)
    }
}

/// Extract the name field from a `---`/`+++` line's remainder: optional
/// C-quoting, then trimmed of a trailing tab-delimited timestamp and CR/LF.
fn parse_name_field(rest: &[u8]) -> BString {
    let rest = trim_eol(rest);
    let name_part = match rest.iter().position(|&b| b == b'\t') {
        Some(tab) => &rest[..tab],
        None => rest,
    };
    let name_part = trim_end_bytes(name_part, |b| b == b' ');
    c_unquote(name_part).unwrap_or_else(|_| BString::from(name_part))
}

fn strip_components(path: &BStr, p: usize) -> BString {
    let parts: Vec<&[u8]> = path.as_bytes().split(|&b| b == b'/').collect();
    if p >= parts.len() {
        return BString::from(path.as_bytes());
    }
    let mut out = Vec::new();
    for (i, part) in parts[p..].iter().enumerate() {
        if i > 0 {
            out.push(b'/');
        }
        out.extend_from_slice(part);
    }
    BString::from(out)
}

fn collapse_slashes(path: &BStr) -> BString {
    let mut out = Vec::with_capacity(path.len());
    let mut prev_slash = false;
    for &b in path.as_bytes() {
        if b == b'/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(b);
    }
    BString::from(out)
}

fn normalize_name(raw: &BStr, p: usize, opts: &HeaderOptions) -> BString {
    let stripped = strip_components(raw, p);
    let collapsed = collapse_slashes(stripped.as_bstr());
    match &opts.root {
        Some(root) => {
            let mut joined = root.clone();
            if !joined.ends_with(b"/") {
                joined.push(b'/');
            }
            joined.extend_from_slice(&collapsed);
            joined
        }
        None => collapsed,
    }
}

/// Only invoked for the traditional dialect, per the noted source quirk
/// that git-dialect `---`/`+++` lines always reuse the already-latched
/// value instead of re-guessing.
fn resolve_p_value(
    opts: &HeaderOptions,
    session: &mut HeaderSession,
    old: &BString,
    new: &BString,
    old_is_dev_null: bool,
    new_is_dev_null: bool,
) -> usize {
    if let Some(p) = opts.p_value {
        return p;
    }
    if let Some(p) = session.latched_p {
        return p;
    }
    let p = if old_is_dev_null || new_is_dev_null {
        1
    } else {
        guess_p_value(old.as_bstr(), new.as_bstr())
    };
    session.latched_p = Some(p);
    p
}

fn guess_p_value(old: &BStr, new: &BStr) -> usize {
    if !old.contains_str("/") && !new.contains_str("/") {
        return 0;
    }
    let old_components = old.as_bytes().split(|&b| b == b'/').count();
    let new_components = new.as_bytes().split(|&b| b == b'/').count();
    let max_p = old_components.min(new_components).saturating_sub(1);
    for p in 0..=max_p {
        if strip_components(old, p) == strip_components(new, p) {
            return p;
        }
    }
    1
}

fn resolve_def_name_fallback(patch: &mut Patch, line_no: usize) -> Result<(), ApplyError> {
    if patch.old_name.is_none() && patch.new_name.is_none() && patch.def_name.is_none() {
        return Err(ApplyError::MalformedHeader {
            line: line_no,
            reason: "could not determine a filename for this patch".into(),
        });
    }
    Ok(())
}

pub(crate) fn resolve_modes(patch: &mut Patch) {
    if patch.new_mode == 0 && !patch.is_deletion() {
        if patch.old_mode != 0 {
            patch.new_mode = patch.old_mode;
        } else if patch.is_creation() {
            patch.new_mode = 0o100644;
        }
    }
}

/// Inverse of `GitBStringExt::c_quote`: parse a double-quoted, backslash
/// escaped filename. Returns the bytes unchanged if `input` is not quoted.
pub fn c_unquote(input: &[u8]) -> Result<BString, ApplyError> {
    if input.first() != Some(&b'"') {
        return Ok(BString::from(input));
    }
    if input.last() != Some(&b'"') || input.len() < 2 {
        return Err(ApplyError::MalformedHeader {
            line: 0,
            reason: "unterminated quoted filename".into(),
        });
    }
    let body = &input[1..input.len() - 1];
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        i += 1;
        let esc = *body.get(i).ok_or_else(|| ApplyError::MalformedHeader {
            line: 0,
            reason: "trailing backslash in quoted filename".into(),
        })?;
        match esc {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'v' => out.push(0x0b),
            b'f' => out.push(0x0c),
            b'"' => out.push(b'"'),
            b'\\' => out.push(b'\\'),
            b'0'..=b'7' => {
                let mut val: u32 = 0;
                let mut n = 0;
                while n < 3 {
                    match body.get(i) {
                        Some(&d) if (b'0'..=b'7').contains(&d) => {
                            val = val * 8 + (d - b'0') as u32;
                            i += 1;
                            n += 1;
                        }
                        _ => break,
                    }
                }
                out.push(val as u8);
                continue;
            }
            other => {
                return Err(ApplyError::MalformedHeader {
                    line: 0,
                    reason: format!("unknown quoting escape \\{}", other as char),
                })
            }
        }
        i += 1;
    }
    Ok(BString::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquote_round_trips_simple_escapes() {
        let unquoted = c_unquote(br#""a\tb\n""#).unwrap();
        assert_eq!(unquoted.as_slice(), b"a\tb\n");
    }

    #[test]
    fn unquote_passes_through_unquoted() {
        let unquoted = c_unquote(b"plain/path").unwrap();
        assert_eq!(unquoted.as_slice(), b"plain/path");
    }

    #[test]
    fn unquote_decodes_octal_escape() {
        let unquoted = c_unquote(br#""\200\377""#).unwrap();
        assert_eq!(unquoted.as_slice(), &[0x80, 0xff]);
    }

    #[test]
    fn strip_components_removes_leading_segments() {
        let path = BString::from("a/b/c.txt");
        assert_eq!(strip_components(path.as_bstr(), 1).as_slice(), b"b/c.txt");
        assert_eq!(strip_components(path.as_bstr(), 2).as_slice(), b"c.txt");
    }

    #[test]
    fn collapse_slashes_merges_runs() {
        let path = BString::from("a//b///c");
        assert_eq!(collapse_slashes(path.as_bstr()).as_slice(), b"a/b/c");
    }

    #[test]
    fn parses_plain_git_header() {
        let mut cur = Cursor::new(b"diff --git a/foo.txt b/foo.txt\nindex 1111111..2222222 100644\n--- a/foo.txt\n+++ b/foo.txt\n@@ -1 +1 @@\n");
        let mut session = HeaderSession::default();
        let opts = HeaderOptions::default();
        match parse_next_header(&mut cur, &opts, &mut session).unwrap() {
            HeaderResult::Patch(p) => {
                assert_eq!(p.old_name.unwrap().as_slice(), b"foo.txt");
                assert_eq!(p.new_name.unwrap().as_slice(), b"foo.txt");
                assert_eq!(p.old_sha1_prefix.unwrap(), "1111111");
            }
            HeaderResult::Eof => panic!("expected a patch"),
        }
    }

    #[test]
    fn parses_traditional_header_with_dev_null_creation() {
        let mut cur = Cursor::new(b"--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n");
        let mut session = HeaderSession::default();
        let opts = HeaderOptions::default();
        match parse_next_header(&mut cur, &opts, &mut session).unwrap() {
            HeaderResult::Patch(p) => {
                assert!(p.old_name.is_none());
                assert_eq!(p.is_new, Tri::Yes);
            }
            HeaderResult::Eof => panic!("expected a patch"),
        }
    }
}
