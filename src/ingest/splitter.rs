// src/ingest/splitter.rs
// Recursive separator splitter for document chunking

use tracing::warn;

/// Separator priority: paragraph break, line break, CJK sentence
/// punctuation, western punctuation, space, then single characters.
const DEFAULT_SEPARATORS: [&str; 13] = [
    "\n\n", "\n", "。", "！", "？", "；", ". ", "! ", "? ", "; ", "，", " ", "",
];

/// Recursive character splitter. Lengths are measured in characters, not
/// bytes, so CJK text chunks the same as ASCII.
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_overlap = if chunk_overlap >= chunk_size {
            warn!(chunk_size, chunk_overlap, "overlap >= chunk size, clamping");
            chunk_size / 2
        } else {
            chunk_overlap
        };
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    /// Split text into chunks of at most `chunk_size` characters with
    /// `chunk_overlap` characters carried between adjacent chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Vec::new();
        }
        self.split_recursive(&cleaned, &DEFAULT_SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(|c| c.to_string()).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        };

        let mut good_splits: Vec<String> = Vec::new();
        let mut chunks: Vec<String> = Vec::new();

        for split in splits {
            if char_len(&split) <= self.chunk_size {
                good_splits.push(split);
            } else {
                if !good_splits.is_empty() {
                    chunks.extend(self.merge_splits(&good_splits, separator));
                    good_splits.clear();
                }
                // Too large for this level; descend to finer separators.
                chunks.extend(self.split_recursive(&split, remaining));
            }
        }
        if !good_splits.is_empty() {
            chunks.extend(self.merge_splits(&good_splits, separator));
        }
        chunks
    }

    /// Merge splits into chunks respecting `chunk_size` and carrying
    /// `chunk_overlap` of trailing context into the next chunk.
    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut window: std::collections::VecDeque<usize> = Default::default();
        let mut total = 0usize;

        let join = |window: &std::collections::VecDeque<usize>| -> String {
            window
                .iter()
                .map(|&i| splits[i].as_str())
                .collect::<Vec<_>>()
                .join(separator)
                .trim()
                .to_string()
        };

        for (idx, split) in splits.iter().enumerate() {
            let len = char_len(split);
            let sep_adjust = if window.is_empty() { 0 } else { sep_len };

            if total + len + sep_adjust > self.chunk_size && !window.is_empty() {
                let doc = join(&window);
                if !doc.is_empty() {
                    docs.push(doc);
                }
                // Drop from the front until only the overlap remains and the
                // incoming split fits.
                while total > self.chunk_overlap
                    || (total + len + if window.is_empty() { 0 } else { sep_len }
                        > self.chunk_size
                        && total > 0)
                {
                    match window.pop_front() {
                        Some(removed) => {
                            let removed_len = char_len(&splits[removed]);
                            let adj = if window.is_empty() { 0 } else { sep_len };
                            total = total.saturating_sub(removed_len + adj);
                        }
                        None => break,
                    }
                }
            }

            window.push_back(idx);
            let adj = if window.len() > 1 { sep_len } else { 0 };
            total += len + adj;
        }

        if !window.is_empty() {
            let doc = join(&window);
            if !doc.is_empty() {
                docs.push(doc);
            }
        }
        docs
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First separator that occurs in the text wins; the tail of the list is
/// handed down for oversized pieces.
fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = TextSplitter::new(500, 50);
        let chunks = splitter.split_text("Apples are red. Bananas are yellow.");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Bananas are yellow"));
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        let splitter = TextSplitter::new(500, 50);
        assert!(splitter.split_text("   \n ").is_empty());
    }

    #[test]
    fn paragraphs_split_before_sentences() {
        let splitter = TextSplitter::new(30, 0);
        let text = "First paragraph here.\n\nSecond paragraph over there.";
        let chunks = splitter.split_text(text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("First"));
        assert!(chunks[1].contains("Second"));
    }

    #[test]
    fn chunks_respect_the_size_bound() {
        let splitter = TextSplitter::new(40, 10);
        let text = "one two three four five six seven eight nine ten \
                    eleven twelve thirteen fourteen fifteen sixteen";
        for chunk in splitter.split_text(text) {
            assert!(chunk.chars().count() <= 40, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn adjacent_chunks_share_overlap() {
        let splitter = TextSplitter::new(20, 8);
        let text = "aa bb cc dd ee ff gg hh ii jj kk ll";
        let chunks = splitter.split_text(text);
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().rev().take(2).collect();
            let tail: String = tail.chars().rev().collect();
            assert!(
                pair[1].contains(&tail),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn cjk_sentences_split_on_cjk_punctuation() {
        let splitter = TextSplitter::new(12, 0);
        let text = "苹果是红色的。香蕉是黄色的。葡萄是紫色的。";
        let chunks = splitter.split_text(text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 12);
        }
    }

    #[test]
    fn oversized_overlap_is_clamped() {
        let splitter = TextSplitter::new(10, 50);
        let chunks = splitter.split_text("some words that should still split fine here");
        assert!(!chunks.is_empty());
    }
}
