//! # PDF Extraction
//!
//! Page-by-page extraction of text and embedded images, plus the Info
//! dictionary metadata. Parsing is CPU-bound and runs inside
//! `spawn_blocking` at the call site; a page that fails to parse is logged
//! and skipped rather than aborting the document.

use pdf::file::FileOptions;
use pdf::object::{Resolve, XObject};
use tracing::warn;

use crate::PdfIngestError;

/// One extracted page: 1-based number, its text, and raw embedded images.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub number: u32,
    pub text: String,
    pub images: Vec<Vec<u8>>,
}

/// Title and author from the PDF Info dictionary, when present.
#[derive(Debug, Clone, Default)]
pub struct PdfMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub pages: Vec<ExtractedPage>,
    pub metadata: PdfMetadata,
    pub page_count: u32,
}

/// Extracts text, images, and metadata from all pages of a PDF.
///
/// Designed to run in a blocking-safe context. Unreadable individual pages
/// are skipped with a warning; only a document that fails to open at all is
/// an error.
pub fn extract_document(pdf_data: &[u8]) -> Result<ExtractedDocument, PdfIngestError> {
    let file = FileOptions::cached()
        .load(pdf_data)
        .map_err(|e| PdfIngestError::Parse(e.to_string()))?;
    let resolver = file.resolver();

    let metadata = {
        let info = file.trailer.info_dict.as_ref();
        PdfMetadata {
            title: info
                .and_then(|i| i.title.as_ref())
                .map(|s| s.to_string_lossy().trim().to_string())
                .filter(|s| !s.is_empty()),
            author: info
                .and_then(|i| i.author.as_ref())
                .map(|s| s.to_string_lossy().trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    };

    let mut pages = Vec::new();
    for page_num in 0..file.num_pages() {
        let page = match file.get_page(page_num) {
            Ok(page) => page,
            Err(e) => {
                warn!(page = page_num + 1, error = %e, "skipping unreadable page");
                continue;
            }
        };

        let mut text = String::new();
        if let Some(content) = &page.contents {
            match content.operations(&resolver) {
                Ok(operations) => {
                    for op in operations.iter() {
                        match op {
                            pdf::content::Op::TextDraw { text: drawn } => {
                                text.push_str(&drawn.to_string_lossy());
                            }
                            pdf::content::Op::TextDrawAdjusted { array } => {
                                for item in array.iter() {
                                    if let pdf::content::TextDrawAdjusted::Text(drawn) = item {
                                        text.push_str(&drawn.to_string_lossy());
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    warn!(page = page_num + 1, error = %e, "skipping page content stream");
                }
            }
        } else {
            warn!(page = page_num + 1, "page has no content stream");
        }

        let mut images = Vec::new();
        if let Ok(resources) = page.resources() {
            for (_name, &xobject_ref) in resources.xobjects.iter() {
                let xobject = match resolver.get(xobject_ref) {
                    Ok(xobject) => xobject,
                    Err(e) => {
                        warn!(page = page_num + 1, error = %e, "skipping unresolvable xobject");
                        continue;
                    }
                };
                if let XObject::Image(ref image) = *xobject {
                    match image.raw_image_data(&resolver) {
                        Ok((data, _filter)) => images.push(data.to_vec()),
                        Err(e) => {
                            warn!(page = page_num + 1, error = %e, "skipping undecodable image");
                        }
                    }
                }
            }
        }

        pages.push(ExtractedPage {
            number: page_num + 1,
            text,
            images,
        });
    }

    let page_count = file.num_pages();
    Ok(ExtractedDocument {
        pages,
        metadata,
        page_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_to_open() {
        let result = extract_document(b"this is not a pdf at all");
        assert!(matches!(result, Err(PdfIngestError::Parse(_))));
    }
}
