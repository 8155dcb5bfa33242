use anyhow::{anyhow, Result};
use lopdf::Document as PdfDocument;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub pages: Option<usize>,
}

pub struct DocumentParser;

impl DocumentParser {
    pub fn parse(path: &Path) -> Result<ParsedDocument> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| anyhow!("No file extension"))?
            .to_lowercase();

        debug!("Parsing file: {:?} (type: {})", path, extension);

        let parsed = match extension.as_str() {
            "pdf" => Self::parse_pdf(path)?,
            // Markdown and any other text-based format index as plain text
            _ => Self::parse_text(path)?,
        };

        debug!("Parsed {} characters from {:?}", parsed.content.len(), path);

        Ok(parsed)
    }

    /// Page-by-page text extraction. A page that fails to extract is logged
    /// and skipped, not fatal to the document.
    fn parse_pdf(path: &Path) -> Result<ParsedDocument> {
        let doc = PdfDocument::load(path)?;
        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut content = String::new();

        for (page_num, _) in pages.iter() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                }
                Err(e) => {
                    warn!("Failed to extract text from page {}: {}", page_num, e);
                }
            }
        }

        Ok(ParsedDocument {
            content,
            pages: Some(page_count),
        })
    }

    fn parse_text(path: &Path) -> Result<ParsedDocument> {
        let raw = fs::read(path)?;
        let content = String::from_utf8_lossy(&raw).into_owned();

        Ok(ParsedDocument {
            content,
            pages: None,
        })
    }
}
