//! Per-format text + image extraction (component A — Text Extractor).
//!
//! Selects a native path per extension and degrades to OCR when the native
//! path produces too little text relative to the page count, or when the
//! document carries only image content. OCR itself sits behind a narrow
//! vendor trait (`OcrProvider`) since this crate vendors none — a missing
//! backend degrades to `OCR_UNAVAILABLE` rather than failing the document
//! unless the native path also produced nothing.

use async_trait::async_trait;
use encoding_rs::{UTF_8, WINDOWS_1252};
use quick_xml::events::Event as XmlEvent;
use quick_xml::reader::Reader as XmlReader;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

const OCR_NATIVE_CHARS_PER_PAGE_THRESHOLD: usize = 100;
const PAGE_ESTIMATE_CHARS: usize = 2500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Text,
    Ocr,
    Hybrid,
    Fallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Text => "TEXT",
            ExtractionMethod::Ocr => "OCR",
            ExtractionMethod::Hybrid => "HYBRID",
            ExtractionMethod::Fallback => "FALLBACK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub content: String,
    pub method: ExtractionMethod,
    pub has_images: bool,
    pub image_count: u32,
    pub page_count: usize,
}

/// Kept for call sites that only care about text + page count.
#[derive(Debug)]
pub struct ParsedDocument {
    pub content: String,
    pub page_count: Option<usize>,
}

impl From<ExtractionResult> for ParsedDocument {
    fn from(r: ExtractionResult) -> Self {
        ParsedDocument { content: r.content, page_count: Some(r.page_count) }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ExtractionFailed {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("OCR backend unavailable")]
    OcrUnavailable,
    #[error("extraction timed out")]
    Timeout,
    #[error("downstream OCR/rendering service returned 5xx")]
    Downstream5xx,
}

impl ExtractionFailed {
    pub fn retriable(&self) -> bool {
        matches!(self, ExtractionFailed::Timeout | ExtractionFailed::Downstream5xx)
    }
}

/// OCR sits behind this trait so the vendor is swappable (spec §9, Vendor coupling).
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn ocr_image(&self, bytes: &[u8]) -> Result<String, ExtractionFailed>;
}

/// Used when no OCR backend is configured; always degrades callers to FALLBACK.
pub struct NoopOcrProvider;

#[async_trait]
impl OcrProvider for NoopOcrProvider {
    async fn ocr_image(&self, _bytes: &[u8]) -> Result<String, ExtractionFailed> {
        Err(ExtractionFailed::OcrUnavailable)
    }
}

pub struct DocumentParser {
    ocr: Arc<dyn OcrProvider>,
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self { ocr: Arc::new(NoopOcrProvider) }
    }
}

impl DocumentParser {
    pub fn new(ocr: Arc<dyn OcrProvider>) -> Self {
        Self { ocr }
    }

    /// File-path convenience wrapper kept for call sites still reading from disk.
    pub fn parse(file_path: &Path) -> Result<ParsedDocument, ExtractionFailed> {
        let bytes = std::fs::read(file_path).map_err(|e| ExtractionFailed::Corrupt(e.to_string()))?;
        let extension = file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let result = futures::executor::block_on(Self::default().extract(&bytes, &extension))?;
        Ok(result.into())
    }

    pub async fn extract(
        &self,
        bytes: &[u8],
        extension: &str,
    ) -> Result<ExtractionResult, ExtractionFailed> {
        let ext = extension.to_lowercase();
        let mut result = match ext.as_str() {
            "pdf" => self.extract_pdf(bytes)?,
            "docx" | "doc" => self.extract_docx(bytes)?,
            "xlsx" | "xls" => self.extract_xlsx(bytes)?,
            "pptx" | "ppt" => self.extract_pptx(bytes)?,
            "md" | "markdown" => self.extract_markdown(bytes)?,
            "rtf" => self.extract_rtf(bytes)?,
            "txt" | "csv" | "log" | "json" | "yaml" | "yml" | "toml" => self.extract_plain(bytes)?,
            "png" | "jpg" | "jpeg" | "tiff" | "bmp" => self.extract_image_only(bytes).await?,
            other => return Err(ExtractionFailed::UnsupportedFormat(other.to_string())),
        };

        // Degrade to OCR if the native path is too thin relative to page count,
        // or promote to HYBRID if images also carry substantive content.
        let native_density = if result.page_count > 0 {
            result.content.len() / result.page_count
        } else {
            result.content.len()
        };

        if result.method == ExtractionMethod::Text
            && native_density < OCR_NATIVE_CHARS_PER_PAGE_THRESHOLD
        {
            match self.ocr.ocr_image(bytes).await {
                Ok(ocr_text) if !ocr_text.trim().is_empty() => {
                    if result.content.trim().is_empty() {
                        result.content = ocr_text;
                        result.method = ExtractionMethod::Ocr;
                    } else {
                        result.content.push('\n');
                        result.content.push_str(&ocr_text);
                        result.method = ExtractionMethod::Hybrid;
                    }
                }
                _ => {
                    if result.content.trim().is_empty() {
                        warn!("native extraction empty and OCR unavailable, falling back");
                        return Err(ExtractionFailed::Corrupt(
                            "no extractable text and OCR unavailable".to_string(),
                        ));
                    }
                }
            }
        }

        if result.page_count == 0 {
            result.page_count = estimate_page_count(result.content.len());
        }

        result.content = sanitize_nul(&result.content);
        Ok(result)
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractionFailed::Corrupt(e.to_string()))?;
        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut content = String::new();
        for page_num in 1..=page_count {
            if let Ok(text) = doc.extract_text(&[page_num as u32]) {
                content.push_str(&text);
                content.push('\n');
            }
        }

        let has_images = pages
            .keys()
            .any(|&num| doc.get_page_images(num).map(|imgs| !imgs.is_empty()).unwrap_or(false));

        Ok(ExtractionResult {
            content,
            method: ExtractionMethod::Text,
            has_images,
            image_count: 0,
            page_count,
        })
    }

    fn extract_docx(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        use docx_rs::*;

        let docx = read_docx(bytes).map_err(|e| ExtractionFailed::Corrupt(format!("{:?}", e)))?;
        let mut content = String::new();

        for child in docx.document.children {
            if let DocumentChild::Paragraph(para) = child {
                for child in para.children {
                    if let ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let RunChild::Text(text) = child {
                                content.push_str(&text.text);
                            }
                        }
                    }
                }
                content.push('\n');
            }
        }

        let image_count = count_zip_media(bytes, "word/media/").unwrap_or(0);

        Ok(ExtractionResult {
            content,
            method: ExtractionMethod::Text,
            has_images: image_count > 0,
            image_count,
            page_count: 0,
        })
    }

    fn extract_xlsx(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        use calamine::{open_workbook_from_rs, Reader, Xlsx};
        use std::io::Cursor;

        let cursor = Cursor::new(bytes.to_vec());
        let mut workbook: Xlsx<_> =
            open_workbook_from_rs(cursor).map_err(|e| ExtractionFailed::Corrupt(e.to_string()))?;

        let mut content = String::new();
        let sheet_names = workbook.sheet_names().to_vec();
        for sheet_name in &sheet_names {
            if let Ok(range) = workbook.worksheet_range(sheet_name) {
                content.push_str(&format!("## {}\n", sheet_name));
                for row in range.rows() {
                    let line: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                    content.push_str(&line.join("\t"));
                    content.push('\n');
                }
            }
        }

        Ok(ExtractionResult {
            content,
            method: ExtractionMethod::Text,
            has_images: false,
            image_count: 0,
            page_count: sheet_names.len().max(1),
        })
    }

    fn extract_pptx(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        let reader = std::io::Cursor::new(bytes.to_vec());
        let mut zip = zip::ZipArchive::new(reader).map_err(|e| ExtractionFailed::Corrupt(e.to_string()))?;

        let mut slide_names: Vec<String> = (0..zip.len())
            .filter_map(|i| zip.by_index(i).ok().map(|f| f.name().to_string()))
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .collect();
        slide_names.sort();

        let mut content = String::new();
        for name in &slide_names {
            let mut file = zip.by_name(name).map_err(|e| ExtractionFailed::Corrupt(e.to_string()))?;
            let mut xml = String::new();
            file.read_to_string(&mut xml).map_err(|e| ExtractionFailed::Corrupt(e.to_string()))?;
            content.push_str(&extract_pptx_slide_text(&xml));
            content.push('\n');
        }

        let image_count = count_zip_media(bytes, "ppt/media/").unwrap_or(0);

        Ok(ExtractionResult {
            content,
            method: ExtractionMethod::Text,
            has_images: image_count > 0,
            image_count,
            page_count: slide_names.len(),
        })
    }

    fn extract_markdown(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        let raw = decode_text(bytes);
        let parser = pulldown_cmark::Parser::new_ext(&raw, pulldown_cmark::Options::all());
        let mut html_buf = String::new();
        pulldown_cmark::html::push_html(&mut html_buf, parser);

        let fragment = scraper::Html::parse_fragment(&html_buf);
        let content: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");

        Ok(ExtractionResult {
            content,
            method: ExtractionMethod::Text,
            has_images: false,
            image_count: 0,
            page_count: 0,
        })
    }

    fn extract_rtf(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        let raw = decode_text(bytes);
        let content = rtf_parser::RtfDocument::try_from(raw.as_str())
            .map(|doc| doc.get_text())
            .unwrap_or_else(|_| strip_rtf_control_words(&raw));

        Ok(ExtractionResult {
            content,
            method: ExtractionMethod::Text,
            has_images: false,
            image_count: 0,
            page_count: 0,
        })
    }

    fn extract_plain(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        Ok(ExtractionResult {
            content: decode_text(bytes),
            method: ExtractionMethod::Text,
            has_images: false,
            image_count: 0,
            page_count: 0,
        })
    }

    async fn extract_image_only(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
        let text = self.ocr.ocr_image(bytes).await?;
        Ok(ExtractionResult {
            content: text,
            method: ExtractionMethod::Ocr,
            has_images: true,
            image_count: 1,
            page_count: 1,
        })
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

fn sanitize_nul(text: &str) -> String {
    if text.contains('\u{0}') {
        text.replace('\u{0}', "")
    } else {
        text.to_string()
    }
}

/// Fallback when the RTF parse fails: drop control words/groups, keep plain runs.
fn strip_rtf_control_words(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                while matches!(chars.peek(), Some(c) if c.is_ascii_alphanumeric() || *c == '-') {
                    chars.next();
                }
                if chars.peek() == Some(&' ') {
                    chars.next();
                }
            }
            '{' | '}' => {}
            _ => out.push(c),
        }
    }
    out
}

fn estimate_page_count(char_count: usize) -> usize {
    (char_count + PAGE_ESTIMATE_CHARS - 1) / PAGE_ESTIMATE_CHARS.max(1)
}

fn count_zip_media(bytes: &[u8], prefix: &str) -> Result<u32, ExtractionFailed> {
    let reader = std::io::Cursor::new(bytes.to_vec());
    let mut zip = zip::ZipArchive::new(reader).map_err(|e| ExtractionFailed::Corrupt(e.to_string()))?;
    let count = (0..zip.len())
        .filter_map(|i| zip.by_index(i).ok().map(|f| f.name().to_string()))
        .filter(|n| n.starts_with(prefix))
        .count();
    Ok(count as u32)
}

fn extract_pptx_slide_text(xml: &str) -> String {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) if e.name().as_ref() == b"a:t" => in_text = true,
            Ok(XmlEvent::End(e)) if e.name().as_ref() == b"a:t" => {
                in_text = false;
                out.push(' ');
            }
            Ok(XmlEvent::Text(t)) if in_text => {
                if let Ok(unescaped) = t.unescape() {
                    out.push_str(&unescaped);
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nul_bytes() {
        assert_eq!(sanitize_nul("a\u{0}b"), "ab");
    }

    #[test]
    fn estimates_page_count_by_ceiling_division() {
        assert_eq!(estimate_page_count(2500), 1);
        assert_eq!(estimate_page_count(2501), 2);
        assert_eq!(estimate_page_count(0), 0);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let parser = DocumentParser::default();
        let err = parser.extract(b"data", "exe").await.unwrap_err();
        assert!(matches!(err, ExtractionFailed::UnsupportedFormat(_)));
    }
}
