//! Reference engine built on pdfium.
//!
//! Reads the text layer and embedded images of each selected page, segments
//! the text into blocks ([`super::layout`]) and renders the requested output
//! format. With `use_llm` and markdown output, each page is additionally
//! rasterised and refined by the [`AssistService`]; a page whose refinement
//! fails keeps its extracted markdown.
//!
//! pdfium keeps thread-local state, so the engine only stores the library
//! path and binds a fresh [`Pdfium`] inside every (blocking) conversion.
//!
//! OCR and language options are accepted but have no effect: pdfium reads
//! the existing text layer only.

use super::layout::{self, PageContent};
use super::{
    ConversionEngine, ConversionOutput, ConversionRequest, EngineError, ImageCollection, ImageRef,
    RenderedBody,
};
use crate::assist::AssistService;
use crate::error::JobError;
use crate::job::OutputFormat;
use crate::payload::{Field, Fields};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// pdfium-backed [`ConversionEngine`].
#[derive(Debug, Clone)]
pub struct PdfiumEngine {
    library: PathBuf,
}

impl PdfiumEngine {
    /// Locate (downloading on first use) the pdfium library and check it binds.
    pub fn setup() -> Result<Self, JobError> {
        let library = pdfium_auto::ensure_pdfium_library(None)
            .map_err(|e| JobError::EngineUnavailable(e.to_string()))?;
        Self::from_library(library)
    }

    /// Use the pdfium library at an explicit path.
    pub fn from_library(library: impl Into<PathBuf>) -> Result<Self, JobError> {
        let engine = Self {
            library: library.into(),
        };
        engine
            .bind()
            .map_err(|e| JobError::EngineUnavailable(e.to_string()))?;
        info!("pdfium bound from {}", engine.library.display());
        Ok(engine)
    }

    pub fn library_path(&self) -> &Path {
        &self.library
    }

    fn bind(&self) -> Result<Pdfium, EngineError> {
        pdfium_auto::bind_pdfium_from_path(&self.library)
            .map_err(|e| EngineError::Failed(format!("cannot bind pdfium: {e}")))
    }
}

impl ConversionEngine for PdfiumEngine {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, EngineError> {
        let start = Instant::now();
        let cfg = &request.config;
        if cfg.force_ocr || cfg.strip_existing_ocr {
            warn!("OCR options are not supported by the pdfium engine; using the text layer");
        }
        if let Some(langs) = &cfg.languages {
            debug!("Ignoring language hints {:?}", langs);
        }
        debug!("Converting on {} with variant {}", request.device, request.variant);

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(request.path(), None)
            .map_err(|e| EngineError::Open {
                path: request.path.clone(),
                detail: format!("{e:?}"),
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        let indices = match cfg.page_range.as_deref() {
            Some(range) => parse_page_range(range, total)?,
            None => (0..total).collect(),
        };
        info!("PDF loaded: {} pages, {} selected", total, indices.len());

        let assist = match (&request.assist, cfg.use_llm, cfg.output_format) {
            (Some(service), true, OutputFormat::Markdown) => Some(service.as_ref()),
            (Some(_), true, format) => {
                debug!("LLM assist applies to markdown output only, not {}", format.as_str());
                None
            }
            _ => None,
        };

        let mut contents: Vec<PageContent> = Vec::with_capacity(indices.len());
        let mut bitmaps: Vec<(String, DynamicImage)> = Vec::new();
        let mut refined: HashMap<usize, String> = HashMap::new();

        for (position, &idx) in indices.iter().enumerate() {
            let page = pages
                .get(idx as u16)
                .map_err(|e| EngineError::Failed(format!("cannot load page {idx}: {e:?}")))?;

            let text = match page.text() {
                Ok(t) => t.all(),
                Err(e) => {
                    warn!("Page {}: no text layer ({:?})", idx, e);
                    String::new()
                }
            };

            let mut pictures = Vec::new();
            if !cfg.disable_image_extraction {
                for object in page.objects().iter() {
                    let Some(image_object) = object.as_image_object() else {
                        continue;
                    };
                    match image_object.get_processed_image(&document) {
                        Ok(img) => {
                            let name = format!("_page_{}_Picture_{}.jpeg", idx, pictures.len());
                            pictures.push(name.clone());
                            bitmaps.push((name, img));
                        }
                        Err(e) => warn!("Page {}: skipping unreadable image ({:?})", idx, e),
                    }
                }
            }

            let content = layout::segment_page(
                idx,
                (page.width().value, page.height().value),
                &text,
                pictures,
                cfg.force_layout_block.as_deref(),
                position == 0,
            );

            if let Some(service) = assist {
                if let Some(md) = refine(service, &page, &content, &text) {
                    refined.insert(idx, md);
                }
            }
            contents.push(content);
        }

        let metadata = document_metadata(&document, total, &contents);

        let body = match cfg.output_format {
            OutputFormat::Markdown => {
                let pages_md: Vec<(usize, String)> = contents
                    .iter()
                    .map(|p| {
                        let md = refined
                            .remove(&p.index)
                            .unwrap_or_else(|| layout::render_page_markdown(p));
                        (p.index, md)
                    })
                    .collect();
                RenderedBody::Markdown(layout::join_markdown_pages(&pages_md, cfg.paginate_output))
            }
            OutputFormat::Html => {
                RenderedBody::Html(layout::render_html(&contents, cfg.paginate_output))
            }
            OutputFormat::Json => {
                let lookup: HashMap<String, DynamicImage> = bitmaps.iter().cloned().collect();
                RenderedBody::Tree(layout::render_tree(&contents, &metadata, &lookup))
            }
        };

        info!(
            "pdfium conversion: {} pages, {} images in {}ms",
            contents.len(),
            bitmaps.len(),
            start.elapsed().as_millis()
        );

        let images = if bitmaps.is_empty() {
            ImageCollection::None
        } else {
            ImageCollection::Keyed(
                bitmaps
                    .into_iter()
                    .map(|(name, img)| (name, ImageRef::InMemory(img)))
                    .collect(),
            )
        };

        Ok(ConversionOutput {
            body,
            metadata,
            images,
        })
    }
}

/// Rasterise one page and ask the assist service to refine it.
fn refine(
    service: &AssistService,
    page: &PdfPage,
    content: &PageContent,
    text: &str,
) -> Option<String> {
    let pixels = service.page_image_pixels() as i32;
    let render_config = PdfRenderConfig::new()
        .set_target_width(pixels)
        .set_maximum_height(pixels);

    let image = match page.render_with_config(&render_config) {
        Ok(bitmap) => bitmap.as_image(),
        Err(e) => {
            warn!("Page {}: cannot rasterise for assist ({:?})", content.index, e);
            return None;
        }
    };

    match service.refine_page_blocking(content.index + 1, &image, text) {
        Ok(md) => Some(md),
        Err(e) => {
            warn!("{}; keeping extracted text", e);
            None
        }
    }
}

fn document_metadata(document: &PdfDocument, total: usize, pages: &[PageContent]) -> Fields {
    let tags = document.metadata();
    let mut fields = Fields::new();

    for (key, tag) in [
        ("title", PdfDocumentMetadataTagType::Title),
        ("author", PdfDocumentMetadataTagType::Author),
        ("subject", PdfDocumentMetadataTagType::Subject),
        ("creator", PdfDocumentMetadataTagType::Creator),
        ("producer", PdfDocumentMetadataTagType::Producer),
    ] {
        if let Some(value) = tags.get(tag) {
            let value = value.value().trim().to_string();
            if !value.is_empty() {
                fields.insert(key.into(), Field::Text(value));
            }
        }
    }

    fields.insert("page_count".into(), Field::from(total));
    fields.insert(
        "pdf_version".into(),
        Field::text(format!("{:?}", document.version())),
    );
    fields.insert("table_of_contents".into(), layout::table_of_contents(pages));
    fields.insert("page_stats".into(), layout::page_stats(pages));
    fields
}

/// Parse a 0-based page range such as `0,3-5,9`.
///
/// Ranges are inclusive. The result is sorted and deduplicated; indices past
/// the end of the document are dropped with a warning. Selecting no page at
/// all is an error.
pub fn parse_page_range(range: &str, total: usize) -> Result<Vec<usize>, EngineError> {
    let invalid = |reason: String| EngineError::PageRange {
        range: range.to_string(),
        reason,
    };
    let number = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|_| invalid(format!("'{}' is not a page index", s.trim())))
    };

    // Clamp to the document before expanding.
    let mut pages = Vec::new();
    let mut past_end = false;
    for part in range.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (number(start)?, number(end)?),
            None => {
                let page = number(part)?;
                (page, page)
            }
        };
        if start > end {
            return Err(invalid(format!("start {start} is after end {end}")));
        }
        if end >= total {
            past_end = true;
        }
        if start < total {
            pages.extend(start..=end.min(total - 1));
        }
    }

    pages.sort_unstable();
    pages.dedup();

    if past_end {
        warn!(
            "Page range '{}' reaches past the last page ({} pages)",
            range, total
        );
    }
    if pages.is_empty() {
        return Err(invalid(format!("no pages selected in a {total}-page document")));
    }
    Ok(pages)
}
