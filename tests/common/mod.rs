//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use docjob_worker::engine::{
    ConversionEngine, ConversionOutput, ConversionRequest, EngineConfig, EngineError,
    ImageCollection, ImageRef, RenderedBody,
};
use docjob_worker::error::JobError;
use docjob_worker::payload::{Field, Fields};
use docjob_worker::SourceFetcher;
use futures::future::BoxFuture;
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ── PDF fixtures ─────────────────────────────────────────────────────────

/// A minimal PDF with one Helvetica text line per page.
pub fn tiny_pdf(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    let font_id = 3 + 2 * n;
    let mut objects: Vec<String> = Vec::new();

    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        n
    ));
    for (i, text) in pages.iter().enumerate() {
        let page_id = 3 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R \
             /Resources << /Font << /F1 {} 0 R >> >> >>",
            page_id + 1,
            font_id
        ));
        let escaped = text
            .replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)");
        let content = format!("BT /F1 18 Tf 72 720 Td ({escaped}) Tj ET");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for off in offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

pub fn bitmap(seed: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([seed, 128, 255 - seed])))
}

// ── Scripted engine ──────────────────────────────────────────────────────

/// What a [`ScriptedEngine`] does when called.
pub enum Script {
    /// Markdown body plus `images` in-memory bitmaps.
    Markdown { text: String, images: usize },
    Html(String),
    /// A block tree whose first child embeds an image payload.
    Tree,
    Fail(String),
    Panic,
}

/// What the engine saw on one call.
#[derive(Debug, Clone)]
pub struct SeenCall {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub config: EngineConfig,
    pub assisted: bool,
}

pub struct ScriptedEngine {
    script: Script,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenCall>>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn markdown(text: &str) -> Self {
        Self::new(Script::Markdown {
            text: text.to_string(),
            images: 0,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenCall> {
        self.seen.lock().unwrap().clone()
    }
}

fn metadata() -> Fields {
    Fields::from([
        ("page_count".to_string(), Field::from(1usize)),
        ("title".to_string(), Field::text("Scripted")),
    ])
}

impl ConversionEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(SeenCall {
            path: request.path.clone(),
            bytes: std::fs::read(&request.path).unwrap_or_default(),
            config: request.config.clone(),
            assisted: request.assist.is_some(),
        });

        match &self.script {
            Script::Markdown { text, images } => Ok(ConversionOutput {
                body: RenderedBody::Markdown(text.clone()),
                metadata: metadata(),
                images: ImageCollection::Keyed(
                    (0..*images)
                        .map(|i| {
                            (
                                format!("_page_0_Picture_{i}.jpeg"),
                                ImageRef::InMemory(bitmap(i as u8)),
                            )
                        })
                        .collect(),
                ),
            }),
            Script::Html(html) => Ok(ConversionOutput {
                body: RenderedBody::Html(html.clone()),
                metadata: metadata(),
                images: ImageCollection::Sequence(vec![ImageRef::InMemory(bitmap(7))]),
            }),
            Script::Tree => Ok(ConversionOutput {
                body: RenderedBody::Tree(Field::map([
                    ("block_type", Field::text("Document")),
                    (
                        "children",
                        Field::List(vec![Field::map([
                            ("block_type", Field::text("Picture")),
                            ("html", Field::text("<p>figure</p>")),
                            (
                                "images",
                                Field::map([("fig.png", Field::text("iVBORw0KGgo="))]),
                            ),
                        ])]),
                    ),
                ])),
                metadata: metadata(),
                images: ImageCollection::Keyed(vec![(
                    "fig.png".into(),
                    ImageRef::InMemory(bitmap(1)),
                )]),
            }),
            Script::Fail(reason) => Err(EngineError::Failed(reason.clone())),
            Script::Panic => panic!("layout model crashed"),
        }
    }
}

// ── Scripted fetcher ─────────────────────────────────────────────────────

/// Writes fixed bytes as `download.pdf`, or panics when asked to.
pub struct ScriptedFetcher {
    bytes: Vec<u8>,
    panic: bool,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn serving(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            panic: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn panicking() -> Self {
        Self {
            bytes: Vec::new(),
            panic: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SourceFetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        _url: &'a str,
        dest_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, JobError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("fetcher exploded");
            }
            let path = dest_dir.join("download.pdf");
            std::fs::write(&path, &self.bytes).map_err(|source| JobError::InputWriteFailed {
                path: path.clone(),
                source,
            })?;
            Ok(path)
        })
    }
}
