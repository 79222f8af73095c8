//! Integration tests for the pdfium engine.
//!
//! These need the native pdfium library (downloaded on first use, or taken
//! from `PDFIUM_LIB_PATH`). They are gated behind the `DOCJOB_PDFIUM_TESTS`
//! environment variable so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   DOCJOB_PDFIUM_TESTS=1 cargo test --test pdfium -- --nocapture --test-threads=1

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::tiny_pdf;
use docjob_worker::engine::{
    ConversionEngine, ConversionRequest, Device, EngineConfig, RenderedBody,
};
use docjob_worker::job::{ConverterVariant, OutputFormat};
use docjob_worker::{Field, JobEnvelope, JobOrchestrator, PdfiumEngine, Worker, WorkerConfig};
use serde_json::json;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless DOCJOB_PDFIUM_TESTS is set; otherwise set up the engine.
macro_rules! pdfium_skip_unless_ready {
    () => {{
        if std::env::var("DOCJOB_PDFIUM_TESTS").is_err() {
            println!("SKIP — set DOCJOB_PDFIUM_TESTS=1 to run pdfium tests");
            return;
        }
        PdfiumEngine::setup().expect("pdfium library should bind")
    }};
}

const PAGES: [&str; 3] = ["Quarterly Report", "Revenue grew steadily", "Closing remarks"];

fn engine_config(format: OutputFormat, page_range: Option<&str>) -> EngineConfig {
    EngineConfig {
        output_format: format,
        paginate_output: false,
        use_llm: false,
        disable_image_extraction: false,
        force_ocr: false,
        strip_existing_ocr: false,
        page_range: page_range.map(str::to_string),
        languages: None,
        force_layout_block: None,
    }
}

fn convert(engine: &PdfiumEngine, cfg: EngineConfig) -> docjob_worker::ConversionOutput {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.pdf");
    std::fs::write(&path, tiny_pdf(&PAGES)).unwrap();
    let request = ConversionRequest {
        path,
        variant: ConverterVariant::Default,
        config: cfg,
        device: Device::Cpu,
        assist: None,
    };
    engine.convert(&request).expect("conversion should succeed")
}

// ── Engine ───────────────────────────────────────────────────────────────────

#[test]
fn markdown_contains_every_page() {
    let engine = pdfium_skip_unless_ready!();
    let out = convert(&engine, engine_config(OutputFormat::Markdown, None));

    let RenderedBody::Markdown(md) = out.body else {
        panic!("expected markdown body");
    };
    for text in PAGES {
        assert!(md.contains(text), "missing {text:?} in:\n{md}");
    }
    assert_eq!(out.metadata["page_count"], Field::Int(3));
    assert!(out.metadata.contains_key("table_of_contents"));
    assert!(out.images.is_empty());
}

#[test]
fn page_range_selects_pages() {
    let engine = pdfium_skip_unless_ready!();
    let out = convert(&engine, engine_config(OutputFormat::Markdown, Some("1-2")));

    let RenderedBody::Markdown(md) = out.body else {
        panic!("expected markdown body");
    };
    assert!(!md.contains("Quarterly Report"));
    assert!(md.contains("Revenue grew steadily"));
    assert!(md.contains("Closing remarks"));
}

#[test]
fn page_range_past_the_end_fails() {
    let engine = pdfium_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.pdf");
    std::fs::write(&path, tiny_pdf(&PAGES)).unwrap();

    let request = ConversionRequest {
        path,
        variant: ConverterVariant::Default,
        config: engine_config(OutputFormat::Markdown, Some("7-9")),
        device: Device::Cpu,
        assist: None,
    };
    assert!(engine.convert(&request).is_err());
}

#[test]
fn html_wraps_pages() {
    let engine = pdfium_skip_unless_ready!();
    let out = convert(&engine, engine_config(OutputFormat::Html, None));

    let RenderedBody::Html(html) = out.body else {
        panic!("expected html body");
    };
    assert!(html.contains(r#"data-page-id="0""#));
    assert!(html.contains("Closing remarks"));
}

#[test]
fn json_tree_has_one_child_per_page() {
    let engine = pdfium_skip_unless_ready!();
    let out = convert(&engine, engine_config(OutputFormat::Json, None));

    let RenderedBody::Tree(tree) = out.body else {
        panic!("expected tree body");
    };
    let root = tree.as_map().unwrap();
    assert_eq!(root["block_type"].as_str(), Some("Document"));
    assert_eq!(root["children"].as_list().unwrap().len(), PAGES.len());
}

// ── Full job ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn embedded_pdf_job_end_to_end() {
    let engine = pdfium_skip_unless_ready!();
    let config = WorkerConfig::builder().device("cpu").build().unwrap();
    let worker = Worker::new(JobOrchestrator::with_http(Arc::new(engine), config));

    let out = worker
        .run_job(&JobEnvelope {
            id: "e2e".into(),
            input: json!({
                "pdf_base64": STANDARD.encode(tiny_pdf(&PAGES)),
                "paginate_output": true,
            }),
        })
        .await;

    assert!(out.get("error").is_none(), "unexpected error: {out}");
    let md = out["markdown"].as_str().unwrap();
    assert!(md.contains(&"-".repeat(48)));
    assert_eq!(out["metadata"]["page_count"], 3);
    assert_eq!(out["device"], "cpu");
    assert!(out["processing_time"].as_f64().unwrap() >= 0.0);
}
