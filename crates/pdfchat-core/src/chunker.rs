use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub char_count: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Fixed,     // fixed-size character windows with overlap
    Recursive, // paragraph-first splitting
    Semantic,  // semantic splitting via text-splitter
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        ChunkStrategy::Fixed
    }
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    strategy: ChunkStrategy,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, strategy: ChunkStrategy) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            strategy,
        }
    }

    /// Split text into overlapping segments, ordered by index.
    pub fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        debug!("Chunking text: {} chars", text.len());

        let chunks = match self.strategy {
            ChunkStrategy::Fixed => self.chunk_fixed(text),
            ChunkStrategy::Recursive => self.chunk_recursive(text),
            ChunkStrategy::Semantic => self.chunk_semantic(text)?,
        };

        debug!("Created {} chunks", chunks.len());

        Ok(chunks)
    }

    fn chunk_fixed(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();
        // Guard against a zero or negative step when overlap >= size.
        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut index = 0;

        while start < total_chars {
            let end = (start + self.chunk_size).min(total_chars);
            let content: String = chars[start..end].iter().collect();

            chunks.push(Chunk {
                index,
                content,
                char_count: end - start,
            });

            if end >= total_chars {
                break;
            }

            index += 1;
            start += step;
        }

        chunks
    }

    fn chunk_recursive(&self, text: &str) -> Vec<Chunk> {
        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .collect();

        let mut chunks = Vec::new();
        let mut current_chunk = String::new();
        let mut index = 0;

        for para in paragraphs {
            if !current_chunk.is_empty() && current_chunk.len() + para.len() > self.chunk_size {
                chunks.push(Chunk {
                    index,
                    content: current_chunk.clone(),
                    char_count: current_chunk.len(),
                });

                index += 1;

                // Seed the next chunk with the tail of the previous one.
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
            chunks.push(Chunk {
                index,
                content: current_chunk.clone(),
                char_count: current_chunk.len(),
            });
        }

        chunks
    }

    fn chunk_semantic(&self, text: &str) -> Result<Vec<Chunk>> {
        let config = ChunkConfig::new(self.chunk_size)
            .with_overlap(self.chunk_overlap)
            .map_err(|e| anyhow!("Invalid chunk config: {}", e))?;
        let splitter = TextSplitter::new(config);

        let chunks = splitter
            .chunks(text)
            .enumerate()
            .map(|(i, content)| Chunk {
                index: i,
                content: content.to_string(),
                char_count: content.len(),
            })
            .collect();

        Ok(chunks)
    }
}
