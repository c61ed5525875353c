//! Cross-section rolling summary
//!
//! A bounded, job-scoped accumulator of previously completed sections'
//! synthesized output. Oldest entries are dropped first once the character
//! budget is exceeded.

use crate::types::{clip_chars, SectionId};
use std::collections::VecDeque;

/// One section's contribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    /// Contributing section
    pub section_id: SectionId,
    /// Condensed synthesized output
    pub text: String,
}

impl SummaryEntry {
    fn rendered(&self) -> String {
        format!("[{}] {}", self.section_id, self.text)
    }

    fn rendered_len(&self) -> usize {
        // "[" + id + "] " + text
        self.section_id.as_str().chars().count() + 3 + self.text.chars().count()
    }
}

/// Size-bounded accumulator owned by one job
#[derive(Debug, Clone)]
pub struct RollingSummary {
    max_chars: usize,
    entries: VecDeque<SummaryEntry>,
    dropped: usize,
}

impl RollingSummary {
    /// Create empty summary with a character budget
    #[inline]
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            entries: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Append a section's contribution, evicting oldest entries over budget
    ///
    /// A contribution larger than the whole budget keeps only its leading
    /// characters.
    pub fn push(&mut self, section_id: SectionId, text: impl AsRef<str>) {
        let text = text.as_ref().trim();
        if text.is_empty() || self.max_chars == 0 {
            return;
        }

        let overhead = section_id.as_str().chars().count() + 3;
        let room = self.max_chars.saturating_sub(overhead);
        if room == 0 {
            return;
        }
        let entry = SummaryEntry {
            section_id,
            text: clip_chars(text, room).to_string(),
        };
        self.entries.push_back(entry);

        while self.rendered_len() > self.max_chars {
            if self.entries.pop_front().is_some() {
                self.dropped += 1;
            } else {
                break;
            }
        }
    }

    /// Current entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &SummaryEntry> {
        self.entries.iter()
    }

    /// Number of retained entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted so far
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Character budget
    #[inline]
    #[must_use]
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Rendered length in characters
    #[must_use]
    pub fn rendered_len(&self) -> usize {
        let separators = self.entries.len().saturating_sub(1);
        self.entries.iter().map(SummaryEntry::rendered_len).sum::<usize>() + separators
    }

    /// Render as one `[section] text` line per entry
    #[must_use]
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(SummaryEntry::rendered)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
