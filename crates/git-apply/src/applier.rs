//! Build pre/postimage bytes from a fragment body and splice the result
//! into the target image, shrinking context on a failed match until the
//! context floor is reached.

use crate::image::Image;
use crate::matcher::{self, MatchFlags, MatchOutcome};
use crate::model::{FragLine, FragLineKind, Fragment};
use crate::whitespace::{self, WsConfig};

pub struct ApplyFragmentOptions {
    pub context_floor: usize,
    pub no_add: bool,
    pub apply_in_reverse: bool,
    pub inaccurate_eof: bool,
}

pub struct ApplyFragmentResult {
    pub warning: Option<String>,
    /// Count of whitespace violations found on this fragment's added
    /// lines only, not on untouched context carried along for matching.
    pub ws_violations: usize,
}

/// Apply one fragment against `target` in place. Returns `Ok(Some(result))`
/// on success (possibly with a reduced-context warning), `Ok(None)` if no
/// location could be found (caller decides whether that's tolerable, i.e.
/// whether `--reject` was requested), and marks `fragment.rejected` in the
/// latter case.
pub fn apply_fragment(
    target: &mut Image,
    fragment: &mut Fragment,
    ws: &WsConfig,
    opts: &ApplyFragmentOptions,
) -> Option<ApplyFragmentResult> {
    let (pre_lines, post_lines) = split_body(fragment, opts.no_add, opts.apply_in_reverse);

    // `leading`/`trailing` count purely-context lines at each end of the
    // fragment; those same lines sit at identical head/tail positions of
    // both `pre_lines` and `post_lines`, so dropping N from the front or
    // back of one list drops the matching N from the other.
    let mut leading = fragment.leading.min(pre_lines.len()).min(post_lines.len());
    let mut trailing = fragment.trailing.min(pre_lines.len()).min(post_lines.len());
    // A pure insertion ("@@ -0,0 +1,n @@") only ever makes sense at the
    // very start of the file; everything else is left to ordinary fuzzy
    // search rather than forced, since doing so reliably requires the
    // original (pre-session) file length, which the engine does not track
    // once earlier fragments have already mutated the target.
    let mut match_beginning = fragment.old_lines == 0 && fragment.old_pos <= 1;
    let mut match_end = false;
    let mut reduced = false;

    loop {
        let drop_leading = fragment.leading - leading;
        let drop_trailing = fragment.trailing - trailing;

        let pre_window = &pre_lines[drop_leading..pre_lines.len() - drop_trailing];
        let post_window = &post_lines[drop_leading..post_lines.len() - drop_trailing];

        let pre_image = Image::new(concat_lines(pre_window));
        let desired_line = (fragment.new_pos - 1 + drop_leading as i64).max(0);

        let flags = MatchFlags {
            match_beginning,
            match_end,
            inaccurate_eof: opts.inaccurate_eof,
        };

        let outcome = matcher::locate(target, &pre_image, desired_line, ws, flags);

        match outcome {
            Some(MatchOutcome { pos, ws_fixed }) => {
                let mut post_bytes = build_postimage(post_window, ws.rule, ws_fixed);
                let touches_eof = pos + pre_image.line_count() == target.line_count();
                if ws.fixes() && touches_eof {
                    let last_raw = post_window.last().map(|l| l.content.as_slice());
                    if last_raw.is_some_and(|l| whitespace::has_blank_at_eof(&[l])) {
                        post_bytes = strip_trailing_blank_bytes(post_bytes);
                    }
                }
                target.splice(pos, pre_image.line_count(), &post_bytes);
                let warning = if reduced {
                    Some(format!(
                        "applied with reduced context (leading={leading}, trailing={trailing})"
                    ))
                } else {
                    None
                };
                let ws_violations = post_window
                    .iter()
                    .filter(|l| l.kind == FragLineKind::Add)
                    .filter(|l| whitespace::detect(&l.content, ws.rule) != 0)
                    .count();
                return Some(ApplyFragmentResult {
                    warning,
                    ws_violations,
                });
            }
            None => {
                if match_beginning || match_end {
                    match_beginning = false;
                    match_end = false;
                    continue;
                }
                if leading > opts.context_floor || trailing > opts.context_floor {
                    if leading >= trailing {
                        leading = leading.saturating_sub(1).max(opts.context_floor);
                    } else {
                        trailing = trailing.saturating_sub(1).max(opts.context_floor);
                    }
                    reduced = true;
                    continue;
                }
                fragment.rejected = true;
                return None;
            }
        }
    }
}

/// Split a fragment's body into the (preimage, postimage) line lists,
/// honoring `no_add` (drop `+` lines entirely) and `apply_in_reverse`
/// (swap add/remove semantics before replaying).
fn split_body(
    fragment: &Fragment,
    no_add: bool,
    reverse: bool,
) -> (Vec<FragLine>, Vec<FragLine>) {
    let mut pre = Vec::new();
    let mut post = Vec::new();
    for line in &fragment.lines {
        let kind = if reverse {
            match line.kind {
                FragLineKind::Add => FragLineKind::Remove,
                FragLineKind::Remove => FragLineKind::Add,
                FragLineKind::Context => FragLineKind::Context,
            }
        } else {
            line.kind
        };
        match kind {
            FragLineKind::Context => {
                pre.push(line.clone());
                post.push(line.clone());
            }
            FragLineKind::Remove => pre.push(line.clone()),
            FragLineKind::Add => {
                if !no_add {
                    post.push(line.clone());
                }
            }
        }
    }
    (pre, post)
}

/// Strip whitespace-introduced trailing blank lines, used only when the
/// fixed postimage reaches the end of the target file (a mid-file blank
/// line is real content, not an EOF artifact of the fix).
fn strip_trailing_blank_bytes(buf: Vec<u8>) -> Vec<u8> {
    let mut image = Image::new(buf);
    image.strip_trailing_blank_lines();
    image.buf
}

/// `FragLine.content` already carries its own trailing LF whenever
/// `no_eol` is false (the parser only strips the leading marker byte), so
/// this is a plain concatenation.
fn concat_lines(lines: &[FragLine]) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        out.extend_from_slice(&line.content);
    }
    out
}

/// Build the postimage bytes for a matched fragment. When the match
/// required whitespace normalization, context lines carry the
/// whitespace-fixed version of the patch's own bytes (not the target's
/// on-disk bytes); newly added lines always keep their own literal bytes
/// unchanged.
fn build_postimage(post: &[FragLine], rule: u32, ws_fixed: bool) -> Vec<u8> {
    if !ws_fixed {
        return concat_lines(post);
    }

    let mut out = Vec::new();
    for line in post {
        match line.kind {
            FragLineKind::Context => {
                whitespace::fix_copy(&mut out, &line.content, rule);
            }
            FragLineKind::Add => {
                out.extend_from_slice(&line.content);
            }
            FragLineKind::Remove => unreachable!("postimage never contains remove lines"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FragLineKind;
    use crate::whitespace::WsConfig;

    /// Builds a `FragLine` the way the real parser does: `content` carries
    /// its own trailing LF (the parser only strips the marker byte).
    fn fl(kind: FragLineKind, content: &[u8]) -> FragLine {
        let mut content = content.to_vec();
        content.push(b'\n');
        FragLine {
            kind,
            content,
            no_eol: false,
        }
    }

    fn simple_fragment() -> Fragment {
        Fragment {
            old_pos: 1,
            old_lines: 3,
            new_pos: 1,
            new_lines: 3,
            leading: 1,
            trailing: 1,
            lines: vec![
                fl(FragLineKind::Context, b"a"),
                fl(FragLineKind::Remove, b"b"),
                fl(FragLineKind::Add, b"B"),
                fl(FragLineKind::Context, b"c"),
            ],
            raw: Vec::new(),
            rejected: false,
        }
    }

    #[test]
    fn applies_plain_text_fragment() {
        let mut target = Image::new(b"a\nb\nc\n".to_vec());
        let mut frag = simple_fragment();
        let ws = WsConfig::default();
        let opts = ApplyFragmentOptions {
            context_floor: 0,
            no_add: false,
            apply_in_reverse: false,
            inaccurate_eof: false,
        };
        let result = apply_fragment(&mut target, &mut frag, &ws, &opts);
        assert!(result.is_some());
        assert_eq!(target.buf, b"a\nB\nc\n");
        assert!(!frag.rejected);
    }

    #[test]
    fn drifted_context_applies_with_warning() {
        let mut target = Image::new(b"h1\nh2\na\nb\nc\nt\n".to_vec());
        let mut frag = simple_fragment();
        let ws = WsConfig::default();
        let opts = ApplyFragmentOptions {
            context_floor: 0,
            no_add: false,
            apply_in_reverse: false,
            inaccurate_eof: false,
        };
        let result = apply_fragment(&mut target, &mut frag, &ws, &opts).unwrap();
        assert_eq!(target.buf, b"h1\nh2\na\nB\nc\nt\n");
        assert!(result.warning.is_some());
    }

    #[test]
    fn unlocatable_fragment_is_rejected() {
        let mut target = Image::new(b"x\ny\nz\n".to_vec());
        let mut frag = simple_fragment();
        let ws = WsConfig::default();
        let opts = ApplyFragmentOptions {
            context_floor: 0,
            no_add: false,
            apply_in_reverse: false,
            inaccurate_eof: false,
        };
        let result = apply_fragment(&mut target, &mut frag, &ws, &opts);
        assert!(result.is_none());
        assert!(frag.rejected);
    }

    #[test]
    fn whitespace_fix_rewrites_context_to_patch_bytes() {
        use crate::whitespace::{WsPolicy, WS_DEFAULT_RULE};

        let mut target = Image::new(b"foo \n".to_vec());
        let mut frag = Fragment {
            old_pos: 1,
            old_lines: 1,
            new_pos: 1,
            new_lines: 2,
            leading: 1,
            trailing: 1,
            lines: vec![
                fl(FragLineKind::Context, b"foo"),
                fl(FragLineKind::Add, b"bar"),
            ],
            raw: Vec::new(),
            rejected: false,
        };
        let ws = WsConfig {
            rule: WS_DEFAULT_RULE,
            policy: WsPolicy::Fix,
        };
        let opts = ApplyFragmentOptions {
            context_floor: 0,
            no_add: false,
            apply_in_reverse: false,
            inaccurate_eof: false,
        };
        apply_fragment(&mut target, &mut frag, &ws, &opts);
        assert_eq!(target.buf, b"foo\nbar\n");
    }

    #[test]
    fn reverse_apply_swaps_add_remove() {
        let mut target = Image::new(b"a\nB\nc\n".to_vec());
        let mut frag = simple_fragment();
        let ws = WsConfig::default();
        let opts = ApplyFragmentOptions {
            context_floor: 0,
            no_add: false,
            apply_in_reverse: true,
            inaccurate_eof: false,
        };
        apply_fragment(&mut target, &mut frag, &ws, &opts);
        assert_eq!(target.buf, b"a\nb\nc\n");
    }
}
