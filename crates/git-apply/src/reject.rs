//! `.rej` file construction and the `--stat`/`--numstat`/`--summary`
//! reporting formats.

use bstr::BString;

use crate::model::{Patch, PatchArena, Tri};

/// Maximum path length a `.rej` name may occupy before truncation, mirroring
/// the conventional `PATH_MAX` ceiling minus room for the `.rej` suffix.
const PATH_MAX: usize = 4096;

/// Build the `<name>.rej` path and contents for a rejected patch. Returns
/// `None` if the patch has no rejected fragments.
pub fn build_reject(patch: &Patch) -> Option<(BString, Vec<u8>)> {
    let rejected: Vec<&crate::model::Fragment> =
        patch.fragments.iter().filter(|f| f.rejected).collect();
    if rejected.is_empty() {
        return None;
    }

    let name = patch
        .target_name()
        .or(patch.source_name())
        .cloned()
        .unwrap_or_default();
    let rej_name = reject_path(&name);

    let mut out = Vec::new();
    out.extend_from_slice(b"diff a/");
    out.extend_from_slice(&name);
    out.extend_from_slice(b" b/");
    out.extend_from_slice(&name);
    out.extend_from_slice(b"  (rejected hunks)\n");
    for frag in rejected {
        out.extend_from_slice(&frag.raw);
    }
    Some((rej_name, out))
}

/// `<name>.rej`, truncating `name` to fit `PATH_MAX - 5` (room for the
/// `.rej` suffix) if necessary.
fn reject_path(name: &BString) -> BString {
    let suffix = b".rej";
    let budget = PATH_MAX.saturating_sub(suffix.len());
    let mut bytes: Vec<u8> = name.to_vec();
    if bytes.len() > budget {
        bytes.truncate(budget);
    }
    bytes.extend_from_slice(suffix);
    BString::from(bytes)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub added: usize,
    pub removed: usize,
}

impl FileStat {
    fn total(&self) -> usize {
        self.added + self.removed
    }
}

fn per_file_stats(patch: &Patch) -> FileStat {
    if let Some(binary) = &patch.binary {
        // Binary files contribute to the file count but not the
        // added/removed line tally; git itself reports "Bin" here.
        let _ = binary;
        return FileStat::default();
    }
    let mut stat = FileStat::default();
    for frag in &patch.fragments {
        for line in &frag.lines {
            match line.kind {
                crate::model::FragLineKind::Add => stat.added += 1,
                crate::model::FragLineKind::Remove => stat.removed += 1,
                crate::model::FragLineKind::Context => {}
            }
        }
    }
    stat
}

/// Tab-separated numeric stat: `<added>\t<removed>\t<path>`, binary files
/// reported as `-\t-\t<path>`.
pub fn numstat(arena: &PatchArena) -> String {
    let mut out = String::new();
    for (_, patch) in arena.iter() {
        let name = patch
            .target_name()
            .or(patch.source_name())
            .map(|b| b.to_string())
            .unwrap_or_default();
        if patch.is_binary {
            out.push_str(&format!("-\t-\t{name}\n"));
        } else {
            let stat = per_file_stats(patch);
            out.push_str(&format!("{}\t{}\t{name}\n", stat.added, stat.removed));
        }
    }
    out
}

const STAT_WIDTH: usize = 50;

/// Scaled diffstat: one line per file with a proportional `+`/`-` bar, plus
/// a summary line (`N files changed, M insertions(+), K deletions(-)`).
pub fn diffstat(arena: &PatchArena) -> String {
    let mut rows: Vec<(String, FileStat, bool)> = Vec::new();
    let mut max_total = 0usize;
    let mut max_name_len = 0usize;

    for (_, patch) in arena.iter() {
        let name = patch
            .target_name()
            .or(patch.source_name())
            .map(|b| b.to_string())
            .unwrap_or_default();
        max_name_len = max_name_len.max(name.chars().count());
        if patch.is_binary {
            rows.push((name, FileStat::default(), true));
            continue;
        }
        let stat = per_file_stats(patch);
        max_total = max_total.max(stat.total());
        rows.push((name, stat, false));
    }

    let mut out = String::new();
    let mut total_added = 0usize;
    let mut total_removed = 0usize;
    for (name, stat, is_binary) in &rows {
        if *is_binary {
            out.push_str(&format!(" {name:<width$} | Bin\n", width = max_name_len));
            continue;
        }
        total_added += stat.added;
        total_removed += stat.removed;
        let bar = scale_bar(stat.added, stat.removed, max_total);
        out.push_str(&format!(
            " {name:<width$} | {total:>4} {bar}\n",
            width = max_name_len,
            total = stat.total(),
        ));
    }
    out.push_str(&format!(
        " {} file{} changed, {} insertion{}(+), {} deletion{}(-)\n",
        rows.len(),
        if rows.len() == 1 { "" } else { "s" },
        total_added,
        if total_added == 1 { "" } else { "s" },
        total_removed,
        if total_removed == 1 { "" } else { "s" },
    ));
    out
}

fn scale_bar(added: usize, removed: usize, max_total: usize) -> String {
    let total = added + removed;
    if max_total == 0 || total == 0 {
        return String::new();
    }
    let scale = STAT_WIDTH as f64 / max_total as f64;
    let plus = ((added as f64) * scale).round() as usize;
    let minus = ((removed as f64) * scale).round() as usize;
    let plus = plus.max(usize::from(added > 0));
    let minus = minus.max(usize::from(removed > 0));
    format!("{}{}", "+".repeat(plus), "-".repeat(minus))
}

/// Create/delete/rename/copy/mode-change summary lines.
pub fn summary(arena: &PatchArena) -> String {
    let mut out = String::new();
    for (_, patch) in arena.iter() {
        let target = patch
            .target_name()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let source = patch
            .source_name()
            .map(|b| b.to_string())
            .unwrap_or_default();

        if matches!(patch.is_new, Tri::Yes) {
            out.push_str(&format!(" create mode {:06o} {target}\n", patch.new_mode));
        }
        if matches!(patch.is_delete, Tri::Yes) {
            out.push_str(&format!(" delete mode {:06o} {source}\n", patch.old_mode));
        }
        if patch.is_rename {
            out.push_str(&format!(
                " rename {source} => {target} ({}%)\n",
                patch.score
            ));
        }
        if patch.is_copy {
            out.push_str(&format!(
                " copy {source} => {target} ({}%)\n",
                patch.score
            ));
        }
        if !matches!(patch.is_new, Tri::Yes)
            && !matches!(patch.is_delete, Tri::Yes)
            && patch.old_mode != 0
            && patch.new_mode != 0
            && patch.old_mode != patch.new_mode
        {
            out.push_str(&format!(
                " mode change {:06o} => {:06o} {target}\n",
                patch.old_mode, patch.new_mode
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fragment, FragLine, FragLineKind};

    fn fragment_with(added: usize, removed: usize) -> Fragment {
        let mut lines = Vec::new();
        for _ in 0..added {
            lines.push(FragLine {
                kind: FragLineKind::Add,
                content: b"x".to_vec(),
                no_eol: false,
            });
        }
        for _ in 0..removed {
            lines.push(FragLine {
                kind: FragLineKind::Remove,
                content: b"y".to_vec(),
                no_eol: false,
            });
        }
        Fragment {
            old_pos: 1,
            old_lines: removed,
            new_pos: 1,
            new_lines: added,
            leading: 0,
            trailing: 0,
            lines,
            raw: b"@@ -1 +1 @@\n".to_vec(),
            rejected: true,
        }
    }

    #[test]
    fn reject_builds_synthetic_header() {
        let mut patch = Patch::default();
        patch.new_name = Some(BString::from("foo.txt"));
        patch.fragments = vec![fragment_with(1, 1)];
        let (name, body) = build_reject(&patch).unwrap();
        assert_eq!(name, BString::from("foo.txt.rej"));
        assert!(body.starts_with(b"diff a/foo.txt b/foo.txt  (rejected hunks)\n"));
    }

    #[test]
    fn no_rejected_fragments_yields_none() {
        let mut patch = Patch::default();
        patch.new_name = Some(BString::from("foo.txt"));
        let mut frag = fragment_with(1, 1);
        frag.rejected = false;
        patch.fragments = vec![frag];
        assert!(build_reject(&patch).is_none());
    }

    #[test]
    fn numstat_counts_added_and_removed_lines() {
        let mut arena = PatchArena::new();
        let mut patch = Patch::default();
        patch.new_name = Some(BString::from("a.txt"));
        patch.fragments = vec![fragment_with(3, 2)];
        arena.insert(patch);
        let report = numstat(&arena);
        assert_eq!(report, "3\t2\ta.txt\n");
    }

    #[test]
    fn summary_reports_new_file_mode() {
        let mut arena = PatchArena::new();
        let mut patch = Patch::default();
        patch.new_name = Some(BString::from("a.txt"));
        patch.is_new = Tri::Yes;
        patch.new_mode = 0o100644;
        arena.insert(patch);
        let report = summary(&arena);
        assert_eq!(report, " create mode 100644 a.txt\n");
    }
}
