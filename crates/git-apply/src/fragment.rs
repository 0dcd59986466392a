//! `@@ -a,b +c,d @@` hunk parsing and `GIT binary patch` hunk recognition.

use crate::base85::decode_hunk_body;
use crate::binary::inflate_exact;
use crate::error::ApplyError;
use crate::model::{BinaryHunk, BinaryMethod, BinaryPatch, FragLine, FragLineKind, Fragment};
use crate::stream::Cursor;

/// Parse every `@@` fragment (and/or a `GIT binary patch` block) belonging
/// to the patch whose header the cursor just finished reading.
pub fn parse_fragments(
    cur: &mut Cursor,
    unidiff_zero: bool,
    recount: bool,
) -> Result<(Vec<Fragment>, Option<BinaryPatch>), ApplyError> {
    if let Some(line) = cur.peek_line() {
        if line.starts_with(b"GIT binary patch") {
            cur.next_line();
            let binary = parse_binary_patch(cur)?;
            return Ok((Vec::new(), Some(binary)));
        }
    }

    let mut fragments = Vec::new();
    while let Some(line) = cur.peek_line() {
        if !line.starts_with(b"@@ -") {
            break;
        }
        fragments.push(parse_one_fragment(cur, unidiff_zero, recount)?);
    }
    Ok((fragments, None))
}

fn parse_one_fragment(
    cur: &mut Cursor,
    unidiff_zero: bool,
    recount: bool,
) -> Result<Fragment, ApplyError> {
    let header_line_no = cur.line_no;
    let header = cur.next_line().expect("caller peeked this line");
    let (old_pos, old_lines, new_pos, new_lines) =
        parse_hunk_header(header, header_line_no)?;

    if old_lines == 0 && new_lines == 0 && !unidiff_zero {
        return Err(ApplyError::MalformedFragment {
            line: header_line_no,
            reason: "zero-context hunk without --unidiff-zero".into(),
        });
    }

    let mut raw = header.to_vec();
    let mut lines = Vec::new();
    let mut leading = 0usize;
    let mut trailing = 0usize;
    let mut seen_change = false;

    let mut remaining_old = old_lines;
    let mut remaining_new = new_lines;

    loop {
        let body_line = match cur.peek_line() {
            Some(l) => l,
            None if recount || (remaining_old == 0 && remaining_new == 0) => break,
            None => {
                return Err(ApplyError::MalformedFragment {
                    line: cur.line_no,
                    reason: "hunk ended before old/new line counts were satisfied".into(),
                })
            }
        };
        let marker = body_line[0];
        if recount {
            if !matches!(marker, b' ' | b'\n' | b'-' | b'+' | b'\\') {
                break;
            }
        } else if remaining_old == 0 && remaining_new == 0 {
            break;
        }
        match marker {
            b' ' | b'\n' => {
                let content = strip_marker(body_line);
                raw.extend_from_slice(body_line);
                cur.next_line();
                remaining_old = remaining_old.saturating_sub(1);
                remaining_new = remaining_new.saturating_sub(1);
                lines.push(FragLine {
                    kind: FragLineKind::Context,
                    content: content.to_vec(),
                    no_eol: false,
                });
                if !seen_change {
                    leading += 1;
                }
                trailing += 1;
            }
            b'-' => {
                let content = strip_marker(body_line);
                raw.extend_from_slice(body_line);
                cur.next_line();
                remaining_old = remaining_old.saturating_sub(1);
                lines.push(FragLine {
                    kind: FragLineKind::Remove,
                    content: content.to_vec(),
                    no_eol: false,
                });
                seen_change = true;
                trailing = 0;
            }
            b'+' => {
                let content = strip_marker(body_line);
                raw.extend_from_slice(body_line);
                cur.next_line();
                remaining_new = remaining_new.saturating_sub(1);
                lines.push(FragLine {
                    kind: FragLineKind::Add,
                    content: content.to_vec(),
                    no_eol: false,
                });
                seen_change = true;
                trailing = 0;
            }
            b'\\' => {
                if body_line.len() < 12 || !body_line.starts_with(b"\\ ") {
                    return Err(ApplyError::MalformedFragment {
                        line: cur.line_no,
                        reason: "malformed no-newline marker".into(),
                    });
                }
                raw.extend_from_slice(body_line);
                cur.next_line();
                if let Some(last) = lines.last_mut() {
                    last.no_eol = true;
                    if last.content.last() == Some(&b'\n') {
                        last.content.pop();
                    }
                }
            }
            _ => {
                return Err(ApplyError::MalformedFragment {
                    line: cur.line_no,
                    reason: format!("unexpected byte {:#04x} in hunk body", marker),
                });
            }
        }
    }

    // A trailing no-newline marker belongs to this fragment too.
    if let Some(next) = cur.peek_line() {
        if next.starts_with(b"\\ ") {
            raw.extend_from_slice(next);
            cur.next_line();
            if let Some(last) = lines.last_mut() {
                last.no_eol = true;
                if last.content.last() == Some(&b'\n') {
                    last.content.pop();
                }
            }
        }
    }

    let (final_old_lines, final_new_lines) = if recount {
        recount_lines(&lines)
    } else {
        (old_lines, new_lines)
    };

    Ok(Fragment {
        old_pos,
        old_lines: final_old_lines,
        new_pos,
        new_lines: final_new_lines,
        leading,
        trailing,
        lines,
        raw,
        rejected: false,
    })
}

fn recount_lines(lines: &[FragLine]) -> (usize, usize) {
    let old = lines
        .iter()
        .filter(|l| matches!(l.kind, FragLineKind::Context | FragLineKind::Remove))
        .count();
    let new = lines
        .iter()
        .filter(|l| matches!(l.kind, FragLineKind::Context | FragLineKind::Add))
        .count();
    (old, new)
}

fn strip_marker(line: &[u8]) -> &[u8] {
    if line.is_empty() {
        line
    } else {
        &line[1..]
    }
}

/// Parse `@@ -a,b +c,d @@`; `,b`/`,d` default to 1 when absent.
fn parse_hunk_header(
    line: &[u8],
    line_no: usize,
) -> Result<(i64, usize, i64, usize), ApplyError> {
    let s = std::str::from_utf8(line).map_err(|_| ApplyError::MalformedFragment {
        line: line_no,
        reason: "non-utf8 hunk header".into(),
    })?;
    let err = || ApplyError::MalformedFragment {
        line: line_no,
        reason: format!("malformed hunk header: {}", s.trim_end()),
    };

    let rest = s.strip_prefix("@@ -").ok_or_else(err)?;
    let at_end = rest.find(" @@").ok_or_else(err)?;
    let ranges = &rest[..at_end];
    let (old_range, new_range) = ranges.split_once(" +").ok_or_else(err)?;

    let (old_pos, old_lines) = parse_range(old_range).ok_or_else(err)?;
    let (new_pos, new_lines) = parse_range(new_range).ok_or_else(err)?;
    Ok((old_pos, old_lines, new_pos, new_lines))
}

fn parse_range(s: &str) -> Option<(i64, usize)> {
    match s.split_once(',') {
        Some((pos, count)) => Some((pos.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

fn parse_binary_patch(cur: &mut Cursor) -> Result<BinaryPatch, ApplyError> {
    let forward = parse_binary_hunk(cur)?;
    let reverse = match cur.peek_line() {
        Some(line) if line.starts_with(b"literal ") || line.starts_with(b"delta ") => {
            Some(parse_binary_hunk(cur)?)
        }
        _ => None,
    };
    Ok(BinaryPatch { forward, reverse })
}

fn parse_binary_hunk(cur: &mut Cursor) -> Result<BinaryHunk, ApplyError> {
    let header_line_no = cur.line_no;
    let header = cur.next_line().ok_or_else(|| ApplyError::MalformedBinaryHunk {
        line: header_line_no,
        reason: "missing binary hunk header".into(),
    })?;
    let header_str = std::str::from_utf8(header)
        .map_err(|_| ApplyError::MalformedBinaryHunk {
            line: header_line_no,
            reason: "non-utf8 binary hunk header".into(),
        })?
        .trim_end();

    let (method, len_str) = if let Some(rest) = header_str.strip_prefix("literal ") {
        (BinaryMethod::Literal, rest)
    } else if let Some(rest) = header_str.strip_prefix("delta ") {
        (BinaryMethod::Delta, rest)
    } else {
        return Err(ApplyError::MalformedBinaryHunk {
            line: header_line_no,
            reason: format!("expected 'literal <n>' or 'delta <n>', got {header_str:?}"),
        });
    };
    let orig_len: usize = len_str.trim().parse().map_err(|_| ApplyError::MalformedBinaryHunk {
        line: header_line_no,
        reason: format!("invalid original length {len_str:?}"),
    })?;

    let mut data_lines: Vec<Vec<u8>> = Vec::new();
    let start_line_no = cur.line_no;
    loop {
        let line_no = cur.line_no;
        let line = cur.next_line().ok_or_else(|| ApplyError::MalformedBinaryHunk {
            line: line_no,
            reason: "unterminated binary hunk".into(),
        })?;
        if line == b"\n" || line.is_empty() {
            break;
        }
        data_lines.push(line.to_vec());
    }

    let refs: Vec<&[u8]> = data_lines.iter().map(|v| v.as_slice()).collect();
    let compressed = decode_hunk_body(&refs, start_line_no)?;
    let inflated = inflate_exact(&compressed, orig_len)?;

    Ok(BinaryHunk {
        method,
        orig_len,
        inflated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_hunk_header() {
        let (op, ol, np, nl) = parse_hunk_header(b"@@ -1,3 +1,3 @@\n", 1).unwrap();
        assert_eq!((op, ol, np, nl), (1, 3, 1, 3));
    }

    #[test]
    fn defaults_missing_counts_to_one() {
        let (op, ol, np, nl) = parse_hunk_header(b"@@ -5 +7 @@\n", 1).unwrap();
        assert_eq!((op, ol, np, nl), (5, 1, 7, 1));
    }

    #[test]
    fn parses_full_fragment_body() {
        let mut cur = Cursor::new(b"@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n");
        let frag = parse_one_fragment(&mut cur, false, false).unwrap();
        assert_eq!(frag.lines.len(), 4);
        assert_eq!(frag.leading, 1);
        assert_eq!(frag.trailing, 1);
    }

    #[test]
    fn rejects_zero_context_without_unidiff_zero() {
        let mut cur = Cursor::new(b"@@ -1,0 +1,0 @@\n");
        assert!(parse_one_fragment(&mut cur, false, false).is_err());
    }

    #[test]
    fn recount_ignores_header_counts() {
        let mut cur = Cursor::new(b"@@ -1,99 +1,99 @@\n a\n-b\n+B\n c\n");
        let frag = parse_one_fragment(&mut cur, false, true).unwrap();
        assert_eq!(frag.old_lines, 2);
        assert_eq!(frag.new_lines, 2);
    }
}
