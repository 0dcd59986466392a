//! Whitespace-error detection and correction for added/context lines.
//!
//! Policy is per-path (`ws_rule`, resolved from repo config by the
//! caller); this module only detects and fixes, it does not resolve rules
//! from config (see `git-apply`'s CLI-side wiring through `git_config`).

pub const WS_TRAILING: u32 = 1 << 0;
pub const WS_SPACE_BEFORE_TAB: u32 = 1 << 1;
pub const WS_INDENT_WITH_NON_TAB: u32 = 1 << 2;
pub const WS_TAB_IN_INDENT: u32 = 1 << 3;
pub const WS_CR_AT_EOL: u32 = 1 << 4;
pub const WS_BLANK_AT_EOF: u32 = 1 << 5;

pub const WS_DEFAULT_RULE: u32 = WS_TRAILING | WS_SPACE_BEFORE_TAB | WS_CR_AT_EOL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsPolicy {
    NoWarn,
    Warn,
    Error,
    ErrorAll,
    Fix,
}

#[derive(Debug, Clone, Copy)]
pub struct WsConfig {
    pub rule: u32,
    pub policy: WsPolicy,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            rule: WS_DEFAULT_RULE,
            policy: WsPolicy::Warn,
        }
    }
}

impl WsConfig {
    pub fn detects_errors(&self) -> bool {
        !matches!(self.policy, WsPolicy::NoWarn)
    }

    pub fn fixes(&self) -> bool {
        matches!(self.policy, WsPolicy::Fix)
    }

    pub fn fails_on_violation(&self) -> bool {
        matches!(self.policy, WsPolicy::Error | WsPolicy::ErrorAll)
    }
}

/// Bitmask of violation classes present on this line, restricted to `rule`.
pub fn detect(line: &[u8], rule: u32) -> u32 {
    let mut found = 0u32;
    let content = strip_eol(line);

    if rule & WS_CR_AT_EOL != 0 && content.last() == Some(&b'\r') {
        found |= WS_CR_AT_EOL;
    }
    let content = if found & WS_CR_AT_EOL != 0 {
        &content[..content.len() - 1]
    } else {
        content
    };

    if rule & WS_TRAILING != 0 && content.last().is_some_and(|&b| b == b' ' || b == b'\t') {
        found |= WS_TRAILING;
    }

    let indent_end = content
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(content.len());
    let indent = &content[..indent_end];

    if rule & WS_SPACE_BEFORE_TAB != 0 {
        let mut seen_space = false;
        for &b in indent {
            if b == b' ' {
                seen_space = true;
            } else if b == b'\t' && seen_space {
                found |= WS_SPACE_BEFORE_TAB;
                break;
            }
        }
    }

    if rule & WS_TAB_IN_INDENT != 0 && indent.contains(&b'\t') {
        found |= WS_TAB_IN_INDENT;
    }

    if rule & WS_INDENT_WITH_NON_TAB != 0 {
        let leading_spaces = indent.iter().take_while(|&&b| b == b' ').count();
        if leading_spaces >= 8 {
            found |= WS_INDENT_WITH_NON_TAB;
        }
    }

    found
}

fn strip_eol(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\n') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

/// Rewrite one line's bytes under `rule`, returning the corrected bytes.
/// Non-expansive: output length never exceeds input length. Only the
/// trailing-whitespace and CR-at-EOL classes are auto-corrected; the
/// remaining classes are detection-only (rewriting indentation style is a
/// much larger, ambiguous transformation not required by the apply
/// engine's testable properties).
pub fn fix_line(line: &[u8], rule: u32) -> Vec<u8> {
    let has_nl = line.last() == Some(&b'\n');
    let mut content: Vec<u8> = if has_nl {
        line[..line.len() - 1].to_vec()
    } else {
        line.to_vec()
    };

    if rule & WS_CR_AT_EOL != 0 && content.last() == Some(&b'\r') {
        content.pop();
    }

    if rule & WS_TRAILING != 0 {
        while matches!(content.last(), Some(&b' ') | Some(&b'\t')) {
            content.pop();
        }
    }

    if has_nl {
        content.push(b'\n');
    }
    content
}

/// Non-expansive copy used by the matcher/applier to compare and rewrite a
/// whole image's lines at once: appends the fixed bytes of `src` into
/// `dst`, returning the number of bytes written.
pub fn fix_copy(dst: &mut Vec<u8>, src: &[u8], rule: u32) -> usize {
    let fixed = fix_line(src, rule);
    debug_assert!(fixed.len() <= src.len());
    dst.extend_from_slice(&fixed);
    fixed.len()
}

/// Whether the whole image ends in blank (whitespace-only) lines.
pub fn has_blank_at_eof(lines_tail: &[&[u8]]) -> bool {
    lines_tail
        .iter()
        .all(|l| strip_eol(l).iter().all(|&b| b == b' ' || b == b'\t'))
        && !lines_tail.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_trailing_whitespace() {
        assert_ne!(detect(b"foo \n", WS_DEFAULT_RULE) & WS_TRAILING, 0);
        assert_eq!(detect(b"foo\n", WS_DEFAULT_RULE) & WS_TRAILING, 0);
    }

    #[test]
    fn detects_cr_at_eol() {
        assert_ne!(detect(b"foo\r\n", WS_DEFAULT_RULE) & WS_CR_AT_EOL, 0);
    }

    #[test]
    fn detects_space_before_tab() {
        assert_ne!(
            detect(b" \tfoo\n", WS_DEFAULT_RULE) & WS_SPACE_BEFORE_TAB,
            0
        );
    }

    #[test]
    fn fix_is_non_expansive() {
        let input = b"foo  \t\n";
        let fixed = fix_line(input, WS_DEFAULT_RULE);
        assert!(fixed.len() <= input.len());
        assert_eq!(fixed, b"foo\n");
    }

    #[test]
    fn fix_removes_cr_before_trailing_trim() {
        let fixed = fix_line(b"foo\r\n", WS_DEFAULT_RULE);
        assert_eq!(fixed, b"foo\n");
    }
}
