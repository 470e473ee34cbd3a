use serde::{Deserialize, Serialize};
use similar::{DiffTag, TextDiff};
use std::fmt;
use std::ops::Range;

/// Hunks carry this many characters of context on each side of an edit so
/// that `apply` can relocate them against a slightly divergent target text.
pub const CONTEXT_LEN: usize = 4;
/// How far `apply` slides looking for a hunk's context before giving up.
pub const FUZZY_WINDOW: usize = 32;

/// A single character-range edit. Positions and lengths are Unicode scalar
/// value (`char`) offsets, not byte offsets, so that patches stay valid
/// across multi-byte UTF-8 sequences under fuzzy repositioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Edit {
    Insert { pos: usize, text: String },
    Delete { pos: usize, len: usize },
    Replace { pos: usize, old_len: usize, new_text: String },
}

impl Edit {
    pub fn pos(&self) -> usize {
        match self {
            Edit::Insert { pos, .. } => *pos,
            Edit::Delete { pos, .. } => *pos,
            Edit::Replace { pos, .. } => *pos,
        }
    }

    pub fn old_len(&self) -> usize {
        match self {
            Edit::Insert { .. } => 0,
            Edit::Delete { len, .. } => *len,
            Edit::Replace { old_len, .. } => *old_len,
        }
    }

    fn new_chars(&self) -> Vec<char> {
        match self {
            Edit::Insert { text, .. } => text.chars().collect(),
            Edit::Delete { .. } => Vec::new(),
            Edit::Replace { new_text, .. } => new_text.chars().collect(),
        }
    }
}

/// A single context-anchored edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hunk {
    pub edit: Edit,
    pub pre_context: String,
    pub post_context: String,
}

/// A bundle of hunks produced from one `diff` call, plus a checksum of the
/// source text it was computed against. The checksum is informational only
/// (logged on mismatch); it does not gate application. Only per-hunk fuzzy
/// matching does. A divergent client-reported shadow version is logged,
/// not enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchBundle {
    pub hunks: Vec<Hunk>,
    pub source_checksum: String,
}

impl PatchBundle {
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hunks.len()
    }

    /// A bundle succeeds iff every hunk succeeded. Vacuously true for zero
    /// hunks: an empty patch is a no-op, not a failure.
    pub fn fully_applied(results: &[bool]) -> bool {
        results.iter().all(|ok| *ok)
    }
}

impl fmt::Display for PatchBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hunks.is_empty() {
            write!(f, "No edits")
        } else {
            write!(f, "{} hunks:", self.hunks.len())?;
            for (i, hunk) in self.hunks.iter().enumerate() {
                write!(f, "\n  {}: {:?}", i + 1, hunk.edit)?;
            }
            Ok(())
        }
    }
}

/// A cheap non-cryptographic fingerprint of a text, used only to flag a
/// mismatch between the base a patch was computed against and the base it
/// is later applied to. Never used to reject a patch.
pub fn checksum(text: &str) -> String {
    format!(
        "{:x}",
        text.chars().count() ^ (text.chars().map(|c| c as u32).sum::<u32>() as usize)
    )
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    equal: bool,
    old: Range<usize>,
    new: Range<usize>,
}

fn merge_segment(a: Segment, b: Segment) -> Segment {
    Segment {
        equal: false,
        old: a.old.start..b.old.end,
        new: a.new.start..b.new.end,
    }
}

/// Whether every character of an equal segment's gap is alphanumeric, i.e.
/// the gap sits inside a word rather than at a word boundary. Consolidation
/// only bridges gaps like this one; a gap containing a space or punctuation
/// marks a real word boundary and is left as a split.
fn gap_is_word_internal(gap: Segment, from_chars: &[char]) -> bool {
    from_chars[gap.old.clone()].iter().all(|c| c.is_alphanumeric())
}

/// Merge non-equal runs separated by a short, word-internal equal gap into
/// one edit, so a one-character typo fix in the middle of a word produces a
/// single word-sized hunk instead of two adjacent one-character hunks. A
/// gap that crosses a non-alphanumeric separator (space, punctuation) is
/// never bridged, even if it is short, since that separator is a real word
/// boundary.
fn consolidate(segments: Vec<Segment>, from_chars: &[char]) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < segments.len() {
        if segments[i].equal {
            out.push(segments[i]);
            i += 1;
            continue;
        }
        let mut acc = segments[i];
        let mut j = i + 1;
        loop {
            if j >= segments.len() {
                break;
            }
            if !segments[j].equal {
                acc = merge_segment(acc, segments[j]);
                j += 1;
                continue;
            }
            let gap_len = segments[j].old.len().max(segments[j].new.len());
            let bridgeable = gap_len <= CONTEXT_LEN && gap_is_word_internal(segments[j], from_chars);
            if bridgeable && j + 1 < segments.len() && !segments[j + 1].equal {
                acc = merge_segment(acc, segments[j]);
                acc = merge_segment(acc, segments[j + 1]);
                j += 2;
                continue;
            }
            break;
        }
        out.push(acc);
        i = j;
    }
    out
}

fn segment_to_edit(seg: Segment, from_chars: &[char], to_chars: &[char]) -> Edit {
    let pos = seg.old.start;
    let old_len = seg.old.len();
    let new_text: String = to_chars[seg.new.clone()].iter().collect();

    if old_len == 0 {
        Edit::Insert { pos, text: new_text }
    } else if new_text.is_empty() {
        Edit::Delete { pos, len: old_len }
    } else {
        Edit::Replace { pos, old_len, new_text }
    }
}

/// Character-level diff between `from` and `to`, consolidated at word
/// boundaries. The result is a sequence of `Edit`s, ordered by
/// ascending position, that transform `from` into `to`.
pub fn diff(from: &str, to: &str) -> Vec<Edit> {
    if from == to {
        return Vec::new();
    }
    if from.is_empty() {
        return vec![Edit::Insert { pos: 0, text: to.to_string() }];
    }
    if to.is_empty() {
        return vec![Edit::Delete { pos: 0, len: from.chars().count() }];
    }

    let from_chars: Vec<char> = from.chars().collect();
    let to_chars: Vec<char> = to.chars().collect();
    let text_diff = TextDiff::from_chars(from, to);

    let segments: Vec<Segment> = text_diff
        .ops()
        .iter()
        .map(|op| Segment {
            equal: op.tag() == DiffTag::Equal,
            old: op.old_range(),
            new: op.new_range(),
        })
        .collect();

    consolidate(segments, &from_chars)
        .into_iter()
        .filter(|s| !s.equal)
        .map(|s| segment_to_edit(s, &from_chars, &to_chars))
        .collect()
}

/// Build a fuzzy-patchable bundle from the edits needed to turn `from` into
/// `to`, capturing `CONTEXT_LEN` characters of context around each edit.
pub fn make_patch(from: &str, to: &str) -> PatchBundle {
    let from_chars: Vec<char> = from.chars().collect();
    let edits = diff(from, to);

    let hunks = edits
        .into_iter()
        .map(|edit| {
            let pos = edit.pos();
            let old_len = edit.old_len();
            let pre_start = pos.saturating_sub(CONTEXT_LEN);
            let pre_context: String = from_chars[pre_start..pos.min(from_chars.len())].iter().collect();
            let post_start = (pos + old_len).min(from_chars.len());
            let post_end = (post_start + CONTEXT_LEN).min(from_chars.len());
            let post_context: String = from_chars[post_start..post_end].iter().collect();
            Hunk { edit, pre_context, post_context }
        })
        .collect();

    PatchBundle { hunks, source_checksum: checksum(from) }
}

/// How many trailing characters of `pre_context` match the characters
/// immediately preceding `anchor`, scanning inward from the boundary. This
/// is the character right next to the edit that matters most for
/// relocating it; characters further back only add confidence.
fn pre_boundary_run(chars: &[char], pre_context: &[char], anchor: usize) -> usize {
    let max_run = pre_context.len().min(anchor);
    let mut run = 0;
    while run < max_run && chars[anchor - 1 - run] == pre_context[pre_context.len() - 1 - run] {
        run += 1;
    }
    run
}

/// How many leading characters of `post_context` match the characters
/// immediately following `anchor_end`.
fn post_boundary_run(chars: &[char], post_context: &[char], anchor_end: usize) -> usize {
    let max_run = post_context.len().min(chars.len() - anchor_end);
    let mut run = 0;
    while run < max_run && chars[anchor_end + run] == post_context[run] {
        run += 1;
    }
    run
}

/// Find where a hunk's context occurs near `expected`, sliding up to
/// `FUZZY_WINDOW` characters in either direction. A candidate anchor is
/// accepted if at least one character immediately bordering the edit (on
/// either side) matches; among candidates, the one with the most matching
/// boundary characters wins, ties broken by proximity to `expected`. This
/// tolerates the case where a concurrent, disjoint edit has shifted or
/// partially consumed a hunk's recorded context without moving the edit
/// itself.
fn find_anchor(chars: &[char], pre_context: &[char], post_context: &[char], old_len: usize, expected: usize) -> Option<usize> {
    if pre_context.is_empty() && post_context.is_empty() {
        return Some(expected.min(chars.len()));
    }

    let expected = expected.min(chars.len());
    let mut best: Option<(usize, usize)> = None; // (combined_run, anchor)

    let mut consider = |anchor: usize, best: &mut Option<(usize, usize)>| {
        if anchor > chars.len() {
            return;
        }
        let anchor_end = (anchor + old_len).min(chars.len());
        let run = pre_boundary_run(chars, pre_context, anchor) + post_boundary_run(chars, post_context, anchor_end);
        if run == 0 {
            return;
        }
        let replace = match best {
            None => true,
            Some((best_run, best_anchor)) => {
                run > *best_run
                    || (run == *best_run
                        && (anchor as isize - expected as isize).abs()
                            < (*best_anchor as isize - expected as isize).abs())
            }
        };
        if replace {
            *best = Some((run, anchor));
        }
    };

    consider(expected, &mut best);
    for delta in 1..=FUZZY_WINDOW {
        if expected + delta <= chars.len() {
            consider(expected + delta, &mut best);
        }
        if expected >= delta {
            consider(expected - delta, &mut best);
        }
    }

    best.map(|(_, anchor)| anchor)
}

/// Apply a patch bundle to `text`, fuzzily relocating each hunk if the
/// exact context has drifted. Returns the resulting text and one boolean
/// per hunk recording whether that hunk applied. A hunk that fails to find
/// its context leaves the surrounding text untouched.
pub fn apply(bundle: &PatchBundle, text: &str) -> (String, Vec<bool>) {
    let mut chars: Vec<char> = text.chars().collect();
    let mut results = Vec::with_capacity(bundle.hunks.len());
    let mut delta: isize = 0;

    for hunk in &bundle.hunks {
        let pre_context: Vec<char> = hunk.pre_context.chars().collect();
        let post_context: Vec<char> = hunk.post_context.chars().collect();
        let old_len = hunk.edit.old_len();
        let expected = (hunk.edit.pos() as isize + delta).max(0) as usize;

        match find_anchor(&chars, &pre_context, &post_context, old_len, expected) {
            Some(anchor) => {
                let clamped_old_len = old_len.min(chars.len() - anchor);
                let new_chars = hunk.edit.new_chars();
                chars.splice(anchor..anchor + clamped_old_len, new_chars.iter().copied());
                delta += new_chars.len() as isize - clamped_old_len as isize;
                results.push(true);
            }
            None => {
                results.push(false);
            }
        }
    }

    (chars.into_iter().collect(), results)
}

/// Convenience for callers that only care about the final text, treating
/// any unapplied hunk as a hard failure.
pub fn apply_or_reject(bundle: &PatchBundle, text: &str) -> Result<String, (String, Vec<bool>)> {
    let (new_text, results) = apply(bundle, text);
    if PatchBundle::fully_applied(&results) {
        Ok(new_text)
    } else {
        Err((new_text, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diff_for_identical_text() {
        let text = "Same text";
        assert!(diff(text, text).is_empty());
    }

    #[test]
    fn empty_bundle_is_vacuously_fully_applied() {
        let bundle = make_patch("same", "same");
        assert!(bundle.is_empty());
        let (result, results) = apply(&bundle, "same");
        assert!(PatchBundle::fully_applied(&results));
        assert_eq!(result, "same");
    }

    #[test]
    fn consolidates_edits_separated_by_a_short_word_internal_gap() {
        let edits = diff("xaxbx", "yayby");
        assert_eq!(edits.len(), 1);
    }

    #[test]
    fn does_not_consolidate_across_a_word_boundary() {
        let edits = diff("ax bx", "ay by");
        assert_eq!(edits.len(), 2);
    }

    #[test]
    fn diff_and_patch_roundtrip() {
        let original = "The quick brown fox";
        let modified = "The quick red fox jumps";
        let bundle = make_patch(original, modified);
        let (result, results) = apply(&bundle, original);
        assert!(PatchBundle::fully_applied(&results));
        assert_eq!(result, modified);
    }

    #[test]
    fn fuzzy_patch_applies_against_shifted_base() {
        let original = "Hello world";
        let modified = "Hello beautiful world";
        let bundle = make_patch(original, modified);

        // Apply against a base that differs outside the edited region.
        // This is the scenario differential sync relies on.
        let shifted = "  Hello world";
        let (result, results) = apply(&bundle, shifted);
        assert!(PatchBundle::fully_applied(&results));
        assert!(result.contains("beautiful"));
    }

    #[test]
    fn insert_into_empty_document() {
        let bundle = make_patch("", "hello");
        let (result, results) = apply(&bundle, "");
        assert!(PatchBundle::fully_applied(&results));
        assert_eq!(result, "hello");
    }

    #[test]
    fn unrelated_context_fails_the_hunk() {
        // A patch computed from one base, applied to text drawn from a
        // disjoint character set: even a single boundary character can't
        // find purchase, and the hunk reports failure without corrupting
        // the target.
        let bundle = make_patch("111222333", "111222333444");
        let target = "abcdefghijklmnopqrstuvwxyz abcdefghijklmnopqrstuvwxyz";
        let (result, results) = apply(&bundle, target);
        assert!(!PatchBundle::fully_applied(&results));
        assert_eq!(result, target);
    }

    #[test]
    fn disjoint_concurrent_edits_both_apply() {
        // Two patches touching opposite ends of the same base both apply
        // cleanly to each other's result.
        let base = "AAA BBB";
        let patch_a = make_patch(base, "XXX BBB");
        let patch_b = make_patch(base, "AAA YYY");

        let (after_a, results_a) = apply(&patch_a, base);
        assert!(PatchBundle::fully_applied(&results_a));
        let (after_both, results_b) = apply(&patch_b, &after_a);
        assert!(PatchBundle::fully_applied(&results_b));
        assert_eq!(after_both, "XXX YYY");
    }

    #[test]
    fn checksum_changes_with_content() {
        assert_ne!(checksum("abc"), checksum("abd"));
        assert_eq!(checksum("abc"), checksum("abc"));
    }
}
