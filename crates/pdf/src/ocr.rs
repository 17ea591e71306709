//! # OCR Provider Abstraction
//!
//! A pluggable interface for extracting text from images embedded in a
//! document. The ingestor only sees the trait: a Tesseract-backed provider
//! is available behind the `ocr-tesseract` feature, and a mock provider
//! ships for tests.

use thiserror::Error;

/// OCR output below this many non-whitespace characters is considered
/// noise and the image is dropped instead of becoming a chunk.
pub const OCR_MIN_CHARS: usize = 20;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine failed: {0}")]
    Engine(String),
    #[error("unsupported or corrupt image data")]
    UnsupportedFormat,
}

/// Generic interface for OCR engines.
///
/// `recognize` is synchronous and CPU-bound; callers run it under a
/// blocking-safe context.
pub trait OcrProvider: Send + Sync {
    /// Extracts text from raw image bytes (JPEG, PNG, or TIFF).
    fn recognize(&self, image_data: &[u8]) -> Result<String, OcrError>;
}

/// Counts the characters that survive whitespace normalization, the
/// measure the emission threshold applies to.
pub fn normalized_ocr_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Collapses runs of whitespace in OCR output into single spaces.
pub fn normalize_ocr_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A provider for tests: returns the programmed text for every image.
#[derive(Debug, Clone, Default)]
pub struct MockOcrProvider {
    text: String,
}

impl MockOcrProvider {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrProvider for MockOcrProvider {
    fn recognize(&self, _image_data: &[u8]) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

/// A local Tesseract-backed provider.
#[cfg(feature = "ocr-tesseract")]
#[derive(Debug, Clone)]
pub struct TesseractOcrProvider {
    language: String,
}

#[cfg(feature = "ocr-tesseract")]
impl TesseractOcrProvider {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[cfg(feature = "ocr-tesseract")]
impl Default for TesseractOcrProvider {
    fn default() -> Self {
        Self::new("eng")
    }
}

#[cfg(feature = "ocr-tesseract")]
impl OcrProvider for TesseractOcrProvider {
    fn recognize(&self, image_data: &[u8]) -> Result<String, OcrError> {
        let decoded =
            image::load_from_memory(image_data).map_err(|_| OcrError::UnsupportedFormat)?;
        let img = rusty_tesseract::Image::from_dynamic_image(&decoded)
            .map_err(|e| OcrError::Engine(e.to_string()))?;
        let args = rusty_tesseract::Args {
            lang: self.language.clone(),
            ..Default::default()
        };
        rusty_tesseract::image_to_string(&img, &args).map_err(|e| OcrError::Engine(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_length_ignores_whitespace() {
        assert_eq!(normalized_ocr_len("  a b\nc\t"), 3);
        assert_eq!(normalized_ocr_len("\n \t "), 0);
    }

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(
            normalize_ocr_text("Figure  3:\n  throughput   graph"),
            "Figure 3: throughput graph"
        );
    }

    #[test]
    fn mock_provider_returns_programmed_text() {
        let provider = MockOcrProvider::new("DB2 throughput chart, 2003 benchmark run");
        let text = provider.recognize(&[0xFF, 0xD8]).unwrap();
        assert!(normalized_ocr_len(&text) >= OCR_MIN_CHARS);
    }
}
