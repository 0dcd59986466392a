//! Locate a preimage within a target image, with optional whitespace
//! tolerance and reduced-context fuzz (the fuzz loop itself lives in
//! `applier.rs`; this module performs one search attempt at a fixed
//! preimage).

use crate::image::Image;
use crate::whitespace::{self, WsConfig};

#[derive(Debug, Clone, Copy)]
pub struct MatchFlags {
    pub match_beginning: bool,
    pub match_end: bool,
    /// Tolerate a trailing-newline mismatch on a candidate's last line
    /// (`--inaccurate-eof`): some diff generators fail to record the
    /// "\ No newline at end of file" marker correctly, so the preimage's
    /// EOL state can disagree with the target's actual last line.
    pub inaccurate_eof: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    /// 0-based starting line in the target image.
    pub pos: usize,
    /// Whether the match required whitespace normalization; when true the
    /// applier must substitute the target's actual bytes for context
    /// lines rather than the patch's literal text (this can rewrite
    /// context bytes in the result -- intentional, if surprising).
    pub ws_fixed: bool,
}

/// Search `target` for `pre`, starting from `desired_line` (0-based) and
/// alternating backward/forward one line at a time; backward is tried
/// first at each distance, so equidistant matches prefer the earlier
/// position.
pub fn locate(
    target: &Image,
    pre: &Image,
    desired_line: i64,
    ws: &WsConfig,
    flags: MatchFlags,
) -> Option<MatchOutcome> {
    let target_lines = target.line_count() as i64;
    let pre_lines = pre.line_count() as i64;
    if pre_lines > target_lines {
        return None;
    }

    let mut line = desired_line;
    if flags.match_beginning {
        line = 0;
    } else if flags.match_end {
        line = target_lines - pre_lines;
    }
    line = line.clamp(0, target_lines - pre_lines);

    let max_start = target_lines - pre_lines;

    let mut backward = line;
    let mut forward = line;
    let mut first = true;

    loop {
        let backward_in_range = backward >= 0;
        let forward_in_range = forward <= max_start;
        if !backward_in_range && !forward_in_range {
            return None;
        }

        if backward_in_range {
            if let Some(outcome) = try_candidate(target, pre, backward as usize, ws, flags) {
                return Some(outcome);
            }
        }
        if !first && forward_in_range && forward != backward {
            if let Some(outcome) = try_candidate(target, pre, forward as usize, ws, flags) {
                return Some(outcome);
            }
        }

        backward -= 1;
        forward += 1;
        first = false;
    }
}

fn try_candidate(
    target: &Image,
    pre: &Image,
    k: usize,
    ws: &WsConfig,
    flags: MatchFlags,
) -> Option<MatchOutcome> {
    let pre_lines = pre.line_count();
    if k + pre_lines > target.line_count() {
        return None;
    }

    for i in 0..pre_lines {
        if pre.lines[i].hash != target.lines[k + i].hash {
            return None;
        }
    }

    if flags.match_end {
        let start_byte = target.byte_offset(k);
        if target.buf.len() - start_byte != pre.buf.len() {
            return None;
        }
    }

    let exact = (0..pre_lines).all(|i| pre.line_bytes(i) == target.line_bytes(k + i));
    if exact {
        return Some(MatchOutcome {
            pos: k,
            ws_fixed: false,
        });
    }

    if ws.fixes() || ws.rule != 0 {
        let all_match_normalized = (0..pre_lines).all(|i| {
            let a = whitespace::fix_line(pre.line_bytes(i), ws.rule);
            let b = whitespace::fix_line(target.line_bytes(k + i), ws.rule);
            a == b
        });
        if all_match_normalized {
            return Some(MatchOutcome {
                pos: k,
                ws_fixed: true,
            });
        }
    }

    if flags.inaccurate_eof && pre_lines > 0 {
        let last = pre_lines - 1;
        let rest_matches = (0..last).all(|i| pre.line_bytes(i) == target.line_bytes(k + i));
        let last_matches_modulo_eol =
            strip_trailing_lf(pre.line_bytes(last)) == strip_trailing_lf(target.line_bytes(k + last));
        if rest_matches && last_matches_modulo_eol {
            return Some(MatchOutcome {
                pos: k,
                ws_fixed: false,
            });
        }
    }

    None
}

fn strip_trailing_lf(bytes: &[u8]) -> &[u8] {
    match bytes.last() {
        Some(b'\n') => &bytes[..bytes.len() - 1],
        _ => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whitespace::{WsConfig, WsPolicy, WS_DEFAULT_RULE};

    fn flags() -> MatchFlags {
        MatchFlags {
            match_beginning: false,
            match_end: false,
            inaccurate_eof: false,
        }
    }

    #[test]
    fn exact_match_at_desired_line() {
        let target = Image::new(b"a\nb\nc\n".to_vec());
        let pre = Image::new(b"b\n".to_vec());
        let ws = WsConfig::default();
        let outcome = locate(&target, &pre, 1, &ws, flags()).unwrap();
        assert_eq!(outcome.pos, 1);
        assert!(!outcome.ws_fixed);
    }

    #[test]
    fn drifted_context_is_located_by_outward_search() {
        let target = Image::new(b"h1\nh2\na\nb\nc\nt\n".to_vec());
        let pre = Image::new(b"a\nb\nc\n".to_vec());
        let ws = WsConfig::default();
        let outcome = locate(&target, &pre, 0, &ws, flags()).unwrap();
        assert_eq!(outcome.pos, 2);
    }

    #[test]
    fn backward_wins_ties() {
        // "x" appears at position 0 and 2 relative to desired line 1.
        let target = Image::new(b"x\ny\nx\n".to_vec());
        let pre = Image::new(b"x\n".to_vec());
        let ws = WsConfig::default();
        let outcome = locate(&target, &pre, 1, &ws, flags()).unwrap();
        assert_eq!(outcome.pos, 0);
    }

    #[test]
    fn whitespace_fix_matches_normalized_lines() {
        let target = Image::new(b"foo\n".to_vec());
        let pre = Image::new(b"foo \n".to_vec());
        let ws = WsConfig {
            rule: WS_DEFAULT_RULE,
            policy: WsPolicy::Fix,
        };
        let outcome = locate(&target, &pre, 0, &ws, flags()).unwrap();
        assert!(outcome.ws_fixed);
    }

    #[test]
    fn no_match_returns_none() {
        let target = Image::new(b"a\nb\nc\n".to_vec());
        let pre = Image::new(b"z\n".to_vec());
        let ws = WsConfig::default();
        assert!(locate(&target, &pre, 0, &ws, flags()).is_none());
    }
}
