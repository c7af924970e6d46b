//! Page-bounded text chunking
//!
//! Extracted manuscripts arrive as one string with page breaks embedded in
//! it. The chunker groups whole pages into chunks of at most
//! `pages_per_chunk` pages so each compliance call sees a bounded slice of
//! the document. Chunks borrow their boundaries from the page breaks, so
//! concatenating every chunk's text yields the input unchanged.

use serde::{Deserialize, Serialize};

/// Default number of pages handed to a single compliance call.
pub const DEFAULT_PAGES_PER_CHUNK: usize = 25;

/// Form feed, the page separator emitted by most PDF-to-text converters.
pub const FORM_FEED: char = '\u{000C}';

/// How pages are delimited in extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageBreak {
    /// Each page ends with a form feed character (the last may omit it).
    #[default]
    FormFeed,
    /// Each page starts with a line beginning with this marker
    /// (e.g. `--- Page`). Text before the first marker belongs to page 1.
    Marker(String),
}

/// A page-aligned slice of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Zero-based position in document order
    pub index: usize,
    /// First page in this chunk (1-based)
    pub first_page: usize,
    /// Last page in this chunk (1-based, inclusive)
    pub last_page: usize,
    /// Human-readable range, e.g. "Pages 26-50"
    pub page_range: String,
    /// The chunk text, page breaks included
    pub text: String,
}

impl TextChunk {
    pub fn page_count(&self) -> usize {
        self.last_page - self.first_page + 1
    }
}

/// Format a page range the way it appears in logs and findings.
pub fn page_range_label(first: usize, last: usize) -> String {
    if first == last {
        format!("Page {}", first)
    } else {
        format!("Pages {}-{}", first, last)
    }
}

/// Splits page-annotated text into page-aligned chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    pages_per_chunk: usize,
    page_break: PageBreak,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_PAGES_PER_CHUNK)
    }
}

impl Chunker {
    /// Create a chunker. A limit of zero is treated as one page per chunk.
    pub fn new(pages_per_chunk: usize) -> Self {
        Self {
            pages_per_chunk: pages_per_chunk.max(1),
            page_break: PageBreak::FormFeed,
        }
    }

    pub fn with_page_break(mut self, page_break: PageBreak) -> Self {
        self.page_break = match page_break {
            PageBreak::Marker(m) if m.is_empty() => PageBreak::FormFeed,
            other => other,
        };
        self
    }

    pub fn pages_per_chunk(&self) -> usize {
        self.pages_per_chunk
    }

    /// Byte ranges of each page, in order. Empty text has no pages.
    fn page_spans(&self, text: &str) -> Vec<(usize, usize)> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut starts: Vec<usize> = match &self.page_break {
            PageBreak::FormFeed => {
                let mut starts = vec![0];
                starts.extend(
                    text.match_indices(FORM_FEED)
                        .map(|(i, _)| i + FORM_FEED.len_utf8())
                        .filter(|&i| i < text.len()),
                );
                starts
            }
            PageBreak::Marker(marker) => {
                let line_starts = std::iter::once(0)
                    .chain(text.match_indices('\n').map(|(i, _)| i + 1))
                    .filter(|&i| i < text.len());
                let mut markers: Vec<usize> = line_starts
                    .filter(|&i| text[i..].starts_with(marker.as_str()))
                    .collect();
                // The first marker opens page 1, together with any preamble.
                if !markers.is_empty() {
                    markers.remove(0);
                }
                let mut starts = vec![0];
                starts.extend(markers);
                starts
            }
        };
        starts.dedup();

        let mut spans = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            spans.push((start, end));
        }
        spans
    }

    /// Number of pages in the text.
    pub fn count_pages(&self, text: &str) -> usize {
        self.page_spans(text).len()
    }

    /// Split text into chunks of whole pages.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let spans = self.page_spans(text);

        spans
            .chunks(self.pages_per_chunk)
            .enumerate()
            .map(|(index, pages)| {
                let first_page = index * self.pages_per_chunk + 1;
                let last_page = first_page + pages.len() - 1;
                let start = pages[0].0;
                let end = pages[pages.len() - 1].1;
                TextChunk {
                    index,
                    first_page,
                    last_page,
                    page_range: page_range_label(first_page, last_page),
                    text: text[start..end].to_string(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paged(pages: usize) -> String {
        (1..=pages)
            .map(|p| format!("Text of page {}.\n{}", p, FORM_FEED))
            .collect()
    }

    #[test]
    fn sixty_pages_make_three_chunks() {
        let chunks = Chunker::new(25).chunk(&paged(60));

        let labels: Vec<&str> = chunks.iter().map(|c| c.page_range.as_str()).collect();
        assert_eq!(labels, vec!["Pages 1-25", "Pages 26-50", "Pages 51-60"]);
        assert_eq!(chunks[2].page_count(), 10);
        assert!(chunks[1].text.starts_with("Text of page 26."));
    }

    #[test]
    fn short_document_is_single_chunk() {
        let chunks = Chunker::default().chunk(&paged(3));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_range, "Pages 1-3");
    }

    #[test]
    fn empty_document_has_no_chunks() {
        assert!(Chunker::default().chunk("").is_empty());
        assert_eq!(Chunker::default().count_pages(""), 0);
    }

    #[test]
    fn text_without_breaks_is_one_page() {
        let chunks = Chunker::new(2).chunk("no page breaks here");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_range, "Page 1");
    }

    #[test]
    fn trailing_form_feed_does_not_add_a_page() {
        let chunker = Chunker::new(1);
        assert_eq!(chunker.count_pages("a\u{c}b\u{c}"), 2);
        assert_eq!(chunker.count_pages("a\u{c}b"), 2);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let chunker = Chunker::new(0);
        assert_eq!(chunker.pages_per_chunk(), 1);
        assert_eq!(chunker.chunk(&paged(4)).len(), 4);
    }

    #[test]
    fn marker_lines_start_pages() {
        let text = "Title page\n--- Page 1\nalpha\n--- Page 2\nbeta\n--- Page 3\ngamma\n";
        let chunker = Chunker::new(2).with_page_break(PageBreak::Marker("--- Page".into()));

        let chunks = chunker.chunk(text);
        assert_eq!(chunker.count_pages(text), 3);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("Title page\n--- Page 1"));
        assert_eq!(chunks[1].text, "--- Page 3\ngamma\n");
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn empty_marker_falls_back_to_form_feed() {
        let chunker = Chunker::new(1).with_page_break(PageBreak::Marker(String::new()));
        assert_eq!(chunker.count_pages("a\u{c}b"), 2);
    }

    fn page_texts() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-zA-Z0-9 .,\n]{0,40}", 0..90)
    }

    proptest! {
        /// Property: chunks reassemble the original text exactly
        #[test]
        fn chunks_reassemble_text(pages in page_texts(), limit in 1usize..30) {
            let text: String = pages.iter().map(|p| format!("{}{}", p, FORM_FEED)).collect();
            let chunks = Chunker::new(limit).chunk(&text);
            let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
            prop_assert_eq!(joined, text);
        }

        /// Property: chunk count is ceil(pages / limit) and no chunk splits a page
        #[test]
        fn chunk_count_matches_page_count(pages in page_texts(), limit in 1usize..30) {
            let text: String = pages.iter().map(|p| format!("{}{}", p, FORM_FEED)).collect();
            let chunks = Chunker::new(limit).chunk(&text);

            prop_assert_eq!(chunks.len(), (pages.len() + limit - 1) / limit);
            for chunk in &chunks {
                prop_assert!(chunk.text.ends_with(FORM_FEED));
                prop_assert_eq!(chunk.text.matches(FORM_FEED).count(), chunk.page_count());
                prop_assert!(chunk.page_count() <= limit);
            }
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].page_count(), limit);
                prop_assert_eq!(pair[0].last_page + 1, pair[1].first_page);
            }
        }
    }
}
