//! Result shaping: engine output → response fields, per output format.
//!
//! * **json** — the engine's block tree, with every embedded `images`
//!   payload removed so the tree stays text and metadata only.
//! * **markdown / html** — the text under `markdown`/`html`, the metadata,
//!   and up to `max_processed_images` condensed images as
//!   `{filename, data}` pairs (data base64-encoded).
//!
//! Image reporting follows one rule for every combination: `total_images` is
//! present whenever the engine reported any image, `images_truncated` only
//! when references were skipped because of the ceiling, and `images` only
//! when at least one image survived condensation.
//!
//! Every shape ends with `device` and `model`.

use crate::config::WorkerConfig;
use crate::engine::{ConversionOutput, Device, ImageCollection, RenderedBody};
use crate::job::{ConverterVariant, JobRequest, OutputFormat};
use crate::payload::{Field, Fields};
use crate::pipeline::condense::{condense, Condensed};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

/// Build the pre-sanitization response for a converted document.
pub fn shape(
    output: ConversionOutput,
    request: &JobRequest,
    device: Device,
    config: &WorkerConfig,
) -> Fields {
    let ConversionOutput {
        body,
        metadata,
        images,
    } = output;

    let mut fields = match body {
        RenderedBody::Tree(tree) => tree_fields(tree, metadata),
        RenderedBody::Markdown(text) => text_fields("markdown", text, metadata),
        RenderedBody::Html(text) => text_fields("html", text, metadata),
    };

    let wants_images =
        request.output_format != OutputFormat::Json && !request.disable_image_extraction;
    if wants_images {
        attach_images(&mut fields, images, config);
    } else if !images.is_empty() {
        debug!("Skipping {} images for this output shape", images.len());
    }

    fields.insert("device".into(), Field::text(device.as_str()));
    fields.insert("model".into(), Field::text(model_name(request.model)));
    fields
}

fn model_name(variant: ConverterVariant) -> &'static str {
    variant.as_str()
}

fn text_fields(key: &str, text: String, metadata: Fields) -> Fields {
    let mut fields = Fields::new();
    fields.insert(key.into(), Field::Text(text));
    fields.insert("metadata".into(), Field::Map(metadata));
    fields
}

fn tree_fields(mut tree: Field, metadata: Fields) -> Fields {
    strip_images(&mut tree);
    let mut fields = match tree {
        Field::Map(map) => map,
        other => Fields::from([("tree".to_string(), other)]),
    };
    if !metadata.is_empty() {
        let mut metadata = Field::Map(metadata);
        strip_images(&mut metadata);
        fields.entry("metadata".into()).or_insert(metadata);
    }
    fields
}

/// Remove every `images` entry from a tree, at any depth.
pub fn strip_images(field: &mut Field) {
    match field {
        Field::Map(map) => {
            map.remove("images");
            map.values_mut().for_each(strip_images);
        }
        Field::List(items) => items.iter_mut().for_each(strip_images),
        _ => {}
    }
}

fn attach_images(fields: &mut Fields, images: ImageCollection, config: &WorkerConfig) {
    let total = images.len();
    if total == 0 {
        return;
    }

    let sources = images.into_sequence();
    let mut attached = Vec::new();
    let mut lost = 0usize;

    for source in sources.iter().take(config.max_processed_images) {
        match condense(source, &config.image_bounds) {
            Condensed::Lost { .. } => lost += 1,
            kept => {
                if let Some(image) = kept.into_image() {
                    attached.push(Field::map([
                        ("filename", Field::Text(image.filename)),
                        ("data", Field::Text(STANDARD.encode(&image.data))),
                    ]));
                }
            }
        }
    }

    if lost > 0 {
        warn!("{} of {} processed images were dropped", lost, lost + attached.len());
    }
    debug!(
        "Attached {} images ({} reported, ceiling {})",
        attached.len(),
        total,
        config.max_processed_images
    );

    if !attached.is_empty() {
        fields.insert("images".into(), Field::List(attached));
    }
    if total > config.max_processed_images {
        fields.insert("images_truncated".into(), Field::Bool(true));
    }
    fields.insert("total_images".into(), Field::from(total));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ImageRef;
    use image::{DynamicImage, RgbImage};
    use serde_json::json;
    use std::path::PathBuf;

    fn request(input: serde_json::Value) -> JobRequest {
        JobRequest::from_input(&input).unwrap()
    }

    fn bitmaps(n: usize) -> ImageCollection {
        ImageCollection::Keyed(
            (0..n)
                .map(|i| {
                    (
                        format!("_page_0_Picture_{i}.png"),
                        ImageRef::InMemory(DynamicImage::ImageRgb8(RgbImage::new(8, 8))),
                    )
                })
                .collect(),
        )
    }

    fn markdown_output(images: ImageCollection) -> ConversionOutput {
        ConversionOutput {
            body: RenderedBody::Markdown("# Title\n\nBody".into()),
            metadata: Fields::from([("page_count".to_string(), Field::Int(1))]),
            images,
        }
    }

    #[test]
    fn markdown_shape_carries_text_metadata_device_model() {
        let req = request(json!({"pdf_base64": "AAAA"}));
        let fields = shape(markdown_output(ImageCollection::None), &req, Device::Cpu, &WorkerConfig::default());
        assert_eq!(fields["markdown"], Field::text("# Title\n\nBody"));
        assert!(fields["metadata"].as_map().is_some());
        assert_eq!(fields["device"], Field::text("cpu"));
        assert_eq!(fields["model"], Field::text("default"));
        assert!(!fields.contains_key("images"));
        assert!(!fields.contains_key("total_images"));
    }

    #[test]
    fn twelve_images_are_capped_at_ten() {
        let req = request(json!({"pdf_base64": "AAAA"}));
        let fields = shape(markdown_output(bitmaps(12)), &req, Device::Cpu, &WorkerConfig::default());
        assert_eq!(fields["images"].as_list().unwrap().len(), 10);
        assert_eq!(fields["images_truncated"], Field::Bool(true));
        assert_eq!(fields["total_images"], Field::Int(12));
        let first = fields["images"].as_list().unwrap()[0].as_map().unwrap();
        assert_eq!(first["filename"], Field::text("_page_0_Picture_0.jpeg"));
        assert!(STANDARD.decode(first["data"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn few_images_are_all_attached_without_truncation_flag() {
        let req = request(json!({"pdf_base64": "AAAA", "output_format": "html"}));
        let output = ConversionOutput {
            body: RenderedBody::Html("<p>x</p>".into()),
            metadata: Fields::new(),
            images: bitmaps(3),
        };
        let fields = shape(output, &req, Device::Cuda, &WorkerConfig::default());
        assert_eq!(fields["html"], Field::text("<p>x</p>"));
        assert_eq!(fields["images"].as_list().unwrap().len(), 3);
        assert_eq!(fields["total_images"], Field::Int(3));
        assert!(!fields.contains_key("images_truncated"));
        assert_eq!(fields["device"], Field::text("cuda"));
    }

    #[test]
    fn all_images_lost_reports_only_total() {
        let req = request(json!({"pdf_base64": "AAAA"}));
        let images = ImageCollection::Sequence(vec![
            ImageRef::File(PathBuf::from("/nonexistent/a.png")),
            ImageRef::File(PathBuf::from("/nonexistent/b.png")),
        ]);
        let fields = shape(markdown_output(images), &req, Device::Cpu, &WorkerConfig::default());
        assert!(!fields.contains_key("images"));
        assert_eq!(fields["total_images"], Field::Int(2));
    }

    #[test]
    fn suppression_flag_skips_images() {
        let req = request(json!({"pdf_base64": "AAAA", "disable_image_extraction": true}));
        let fields = shape(markdown_output(bitmaps(2)), &req, Device::Cpu, &WorkerConfig::default());
        assert!(!fields.contains_key("images"));
        assert!(!fields.contains_key("total_images"));
    }

    #[test]
    fn tree_shape_drops_every_image_payload() {
        let req = request(json!({"pdf_base64": "AAAA", "output_format": "json", "model": "table"}));
        let tree = Field::from(json!({
            "block_type": "Document",
            "children": [{
                "block_type": "Page",
                "children": [{"block_type": "Picture", "images": {"p.jpeg": "AAAA"}}]
            }],
            "images": {"cover.jpeg": "AAAA"}
        }));
        let output = ConversionOutput {
            body: RenderedBody::Tree(tree),
            metadata: Fields::new(),
            images: bitmaps(4),
        };
        let fields = shape(output, &req, Device::Cpu, &WorkerConfig::default());
        assert!(!fields.contains_key("images"));
        assert!(!fields.contains_key("total_images"));
        let page = &fields["children"].as_list().unwrap()[0];
        let picture = &page.as_map().unwrap()["children"].as_list().unwrap()[0];
        assert!(!picture.as_map().unwrap().contains_key("images"));
        assert_eq!(fields["model"], Field::text("table"));
    }
}
