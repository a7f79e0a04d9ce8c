use crate::config::ChunkStrategy;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;
use uuid::Uuid;

/// Best-effort language tag. The reference corpus is francophone with
/// English technical vocabulary mixed in, so detection only needs to
/// distinguish those two from "unknown" — never a full langid model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Fr,
    En,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Fr => "fr",
            Language::En => "en",
            Language::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub char_count: usize,
    pub token_count: Option<usize>,
    pub language: Language,
    pub has_table: bool,
    pub has_ocr_content: bool,
    /// Provisional id until the vector index adapter finalizes it at INDEXING (spec §4.2/§4.4).
    pub vector_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkingFailed {
    #[error("empty input")]
    EmptyInput,
    #[error("document exceeds configured chunk limit ({0} chunks)")]
    LimitExceeded(usize),
}

static OCR_ARTIFACTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"--Mo\b").unwrap(),
        Regex::new(r"\\-n").unwrap(),
        // Hyphenated line break: "exem-\nple" -> "exemple"
        Regex::new(r"(\w)-\n(\w)").unwrap(),
    ]
});

const FR_MARKERS: &[&str] = &[
    " le ", " la ", " les ", " des ", " une ", " est ", " et ", " pour ", " dans ", " que ",
];
const EN_MARKERS: &[&str] = &[
    " the ", " and ", " for ", " with ", " that ", " this ", " from ", " have ", " are ",
];

/// Strip OCR-scanner artifacts that survive extraction (§4.2 pre-pass).
fn clean_ocr_artifacts(text: &str) -> String {
    let mut cleaned = text.to_string();
    for (i, re) in OCR_ARTIFACTS.iter().enumerate() {
        cleaned = if i == OCR_ARTIFACTS.len() - 1 {
            re.replace_all(&cleaned, "$1$2").into_owned()
        } else {
            re.replace_all(&cleaned, "").into_owned()
        };
    }
    cleaned
}

fn detect_language(text: &str) -> Language {
    let lower = format!(" {} ", text.to_lowercase());
    let fr_hits: usize = FR_MARKERS.iter().filter(|m| lower.contains(*m)).count();
    let en_hits: usize = EN_MARKERS.iter().filter(|m| lower.contains(*m)).count();

    if fr_hits == 0 && en_hits == 0 {
        Language::Unknown
    } else if fr_hits >= en_hits {
        Language::Fr
    } else {
        Language::En
    }
}

/// A structural block identified before windowing: a table/fenced-code
/// block is never split across chunk boundaries when it fits in `max_size`.
struct Block {
    content: String,
    is_table: bool,
}

/// Split on headings, fenced code/table blocks, and blank-line paragraphs,
/// preserving table/code blocks as atomic units.
fn split_structural_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let is_fence_delim = trimmed.starts_with("```") || trimmed.starts_with('|');

        if is_fence_delim && !in_fence && current.trim().is_empty() {
            in_fence = true;
        }

        current.push_str(line);
        current.push('\n');

        let is_heading = trimmed.starts_with('#');
        let is_blank = trimmed.is_empty();

        if in_fence {
            if trimmed.starts_with("```") && current.trim_start().lines().count() > 1 {
                in_fence = false;
                blocks.push(Block {
                    content: std::mem::take(&mut current),
                    is_table: true,
                });
            } else if !trimmed.starts_with('|') && trimmed.starts_with("```") {
                // closing fence for a non-table code block
            }
            continue;
        }

        if is_heading || is_blank {
            if !current.trim().is_empty() {
                blocks.push(Block {
                    content: std::mem::take(&mut current),
                    is_table: false,
                });
            }
        }
    }

    if !current.trim().is_empty() {
        blocks.push(Block {
            content: current,
            is_table: in_fence,
        });
    }

    blocks
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    strategy: ChunkStrategy,
    max_chunks: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, strategy: ChunkStrategy) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            strategy,
            max_chunks: 20_000,
        }
    }

    /// Chunk text into overlapping passages. Idempotent: identical input
    /// always yields identical chunk texts and indices (spec §4.2, §8).
    pub fn chunk(&self, raw_text: &str) -> Result<Vec<Chunk>> {
        if raw_text.trim().is_empty() {
            bail!(ChunkingFailed::EmptyInput);
        }

        let has_ocr_content = OCR_ARTIFACTS.iter().any(|re| re.is_match(raw_text));
        let text = clean_ocr_artifacts(raw_text);
        let language = detect_language(&text);

        debug!("Chunking text: {} chars, strategy={:?}", text.len(), self.strategy);

        let windows = match self.strategy {
            ChunkStrategy::Semantic => self.chunk_semantic(&text)?,
            ChunkStrategy::Fixed => self.chunk_fixed(&text)?,
            ChunkStrategy::Recursive => self.chunk_recursive(&text)?,
        };

        if windows.len() > self.max_chunks {
            bail!(ChunkingFailed::LimitExceeded(windows.len()));
        }

        let chunks = windows
            .into_iter()
            .enumerate()
            .map(|(index, (content, is_table))| {
                let char_count = content.chars().count();
                Chunk {
                    index,
                    char_count,
                    token_count: None,
                    language,
                    has_table: is_table,
                    has_ocr_content,
                    vector_id: Uuid::new_v4(),
                    content,
                }
            })
            .collect::<Vec<_>>();

        debug!("Created {} chunks", chunks.len());
        Ok(chunks)
    }

    /// Structure-first windowing: atomic table/code blocks pass through
    /// untouched when small enough, everything else is windowed with overlap.
    fn chunk_semantic(&self, text: &str) -> Result<Vec<(String, bool)>> {
        let blocks = split_structural_blocks(text);
        let splitter = TextSplitter::new(
            ChunkConfig::new(self.chunk_size)
                .with_overlap(self.chunk_overlap)
                .unwrap(),
        );

        let mut out = Vec::new();
        for block in blocks {
            if block.is_table && block.content.len() <= self.chunk_size.max(block.content.len()) {
                out.push((block.content, true));
                continue;
            }
            if block.content.len() <= self.chunk_size {
                out.push((block.content, block.is_table));
                continue;
            }
            for piece in splitter.chunks(&block.content) {
                out.push((piece.to_string(), false));
            }
        }
        Ok(out)
    }

    fn chunk_fixed(&self, text: &str) -> Result<Vec<(String, bool)>> {
        let mut out = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        let mut start = 0;
        while start < total_chars {
            let end = (start + self.chunk_size).min(total_chars);
            let content: String = chars[start..end].iter().collect();
            out.push((content, false));

            if end == total_chars {
                break;
            }
            start += self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        }
        Ok(out)
    }

    fn chunk_recursive(&self, text: &str) -> Result<Vec<(String, bool)>> {
        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .collect();

        let mut out = Vec::new();
        let mut current_chunk = String::new();

        for para in paragraphs {
            if !current_chunk.is_empty() && current_chunk.len() + para.len() > self.chunk_size {
                out.push((current_chunk.clone(), false));

                let overlap_chars: String = current_chunk
                    .chars()
                    .rev()
                    .take(self.chunk_overlap)
                    .collect::<String>()
                    .chars()
                    .rev()
                    .collect();

                current_chunk = overlap_chars;
            }

            current_chunk.push_str(para);
            current_chunk.push_str("\n\n");
        }

        if !current_chunk.trim().is_empty() {
            out.push((current_chunk, false));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        let chunker = TextChunker::new(1000, 200, ChunkStrategy::Fixed);
        assert!(chunker.chunk("   ").is_err());
    }

    #[test]
    fn fixed_strategy_is_idempotent() {
        let chunker = TextChunker::new(50, 10, ChunkStrategy::Fixed);
        let text = "a".repeat(500);
        let first: Vec<String> = chunker.chunk(&text).unwrap().into_iter().map(|c| c.content).collect();
        let second: Vec<String> = chunker.chunk(&text).unwrap().into_iter().map(|c| c.content).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn single_short_document_is_one_chunk() {
        let chunker = TextChunker::new(1000, 200, ChunkStrategy::Recursive);
        let chunks = chunker.chunk("A short paragraph with no boundaries.").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn hyphenated_line_break_is_rejoined() {
        let cleaned = clean_ocr_artifacts("docu-\nment");
        assert_eq!(cleaned, "document");
    }

    #[test]
    fn language_detection_prefers_french_markers() {
        assert_eq!(detect_language("le chat est sur la table"), Language::Fr);
        assert_eq!(detect_language("the cat is on the table"), Language::En);
    }
}
