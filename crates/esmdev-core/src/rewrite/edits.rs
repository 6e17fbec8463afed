//! Offset-keyed text edits applied to the original source in one pass.

use std::ops::Range;

/// Replace `range` of the original text with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Two edits touching the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("edit at {start}..{end} overlaps an earlier edit")]
pub struct OverlapError {
    pub start: usize,
    pub end: usize,
}

/// Sorted, non-overlapping edits against one source text.
#[derive(Debug, Clone, Default)]
pub struct TextEdits {
    edits: Vec<TextEdit>,
}

impl TextEdits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edit, keeping the list sorted. Empty ranges are insertions.
    pub fn push(&mut self, range: Range<usize>, replacement: impl Into<String>) -> Result<(), OverlapError> {
        let overlap = OverlapError {
            start: range.start,
            end: range.end,
        };
        if range.start > range.end {
            return Err(overlap);
        }
        let at = self
            .edits
            .partition_point(|e| (e.range.start, e.range.end) <= (range.start, range.end));
        if at > 0 && self.edits[at - 1].range.end > range.start {
            return Err(overlap);
        }
        if let Some(next) = self.edits.get(at) {
            if range.end > next.range.start {
                return Err(overlap);
            }
        }
        self.edits.insert(
            at,
            TextEdit {
                range,
                replacement: replacement.into(),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Produce the edited text. Ranges must lie on char boundaries of `source`.
    #[must_use]
    pub fn apply(&self, source: &str) -> String {
        debug_assert!(
            self.edits.windows(2).all(|w| w[0].range.end <= w[1].range.start),
            "edits must be sorted and non-overlapping"
        );
        let extra: usize = self.edits.iter().map(|e| e.replacement.len()).sum();
        let mut out = String::with_capacity(source.len() + extra);
        let mut cursor = 0;
        for edit in &self.edits {
            out.push_str(&source[cursor..edit.range.start]);
            out.push_str(&edit.replacement);
            cursor = edit.range.end;
        }
        out.push_str(&source[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_in_order() {
        let mut edits = TextEdits::new();
        edits.push(10..13, "ZZZ").unwrap();
        edits.push(0..1, "a").unwrap();
        assert_eq!(edits.apply("0123456789abcdef"), "a123456789ZZZdef");
    }

    #[test]
    fn test_insertions() {
        let mut edits = TextEdits::new();
        edits.push(0..0, "head;").unwrap();
        edits.push(0..3, "xyz").unwrap();
        assert_eq!(edits.apply("abcdef"), "head;xyzdef");
    }

    #[test]
    fn test_overlap_rejected() {
        let mut edits = TextEdits::new();
        edits.push(2..6, "x").unwrap();
        assert!(edits.push(4..8, "y").is_err());
        assert!(edits.push(0..3, "y").is_err());
        assert!(edits.push(6..8, "y").is_ok());
        assert_eq!(edits.len(), 2);
    }

    #[test]
    fn test_no_edits_is_identity() {
        assert_eq!(TextEdits::new().apply("same"), "same");
    }
}
