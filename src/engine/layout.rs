//! Block model and renderers for the reference engine.
//!
//! Page text comes out of pdfium as plain lines. [`segment_page`] groups them
//! into [`Block`]s with a few cheap heuristics:
//!
//! * lines split into two or more cells by runs of whitespace, on at least
//!   two consecutive lines, form a table;
//! * bullet / numbered lines are list items;
//! * short unpunctuated lines that are ALL CAPS or carry dotted section
//!   numbers (`2.1 Scope`) are headings; the first short line of the
//!   document is its title;
//! * everything else is folded into paragraphs, re-joining hyphenated
//!   line breaks.
//!
//! When the table layout is forced every non-empty line becomes a row of
//! one page-wide table.
//!
//! The same pages render to markdown, HTML, or a block tree.

use crate::payload::{Field, Fields};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tracing::warn;

/// Layout hint that forces every line into a table row.
pub const TABLE_LAYOUT: &str = "Table";

const PAGE_SEPARATOR_DASHES: usize = 48;
const HEADING_MAX_CHARS: usize = 80;

// ── Block model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    ListItem(String),
    Table(Vec<Vec<String>>),
    /// An embedded image, by the name it is reported under.
    Picture(String),
}

impl Block {
    pub fn block_type(&self) -> &'static str {
        match self {
            Block::Heading { .. } => "SectionHeader",
            Block::Paragraph(_) => "Text",
            Block::ListItem(_) => "ListItem",
            Block::Table(_) => "Table",
            Block::Picture(_) => "Picture",
        }
    }
}

/// One page worth of blocks, in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    /// 0-based page index in the source document.
    pub index: usize,
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<Block>,
}

// ── Segmentation ─────────────────────────────────────────────────────────

static RE_CELL_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t+| {2,}").unwrap());
static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•▪◦‣–]|\(?\d{1,3}[.)]|[a-z][.)])\s+(.+)$").unwrap());
static RE_SECTION_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)+)\.?\s+\S").unwrap());

/// Segment one page of extracted text into blocks.
///
/// `pictures` are appended after the text blocks. `title_allowed` lets the
/// first short line become a level-1 heading (first selected page only).
pub fn segment_page(
    index: usize,
    size: (f32, f32),
    text: &str,
    pictures: Vec<String>,
    forced_layout: Option<&str>,
    title_allowed: bool,
) -> PageContent {
    let mut blocks = match forced_layout {
        Some(TABLE_LAYOUT) => table_layout(text),
        Some(other) => {
            warn!("Unknown forced layout '{}', using automatic layout", other);
            auto_layout(text, title_allowed)
        }
        None => auto_layout(text, title_allowed),
    };
    blocks.extend(pictures.into_iter().map(Block::Picture));
    PageContent {
        index,
        width: size.0,
        height: size.1,
        blocks,
    }
}

fn split_cells(line: &str) -> Vec<String> {
    RE_CELL_GAP
        .split(line.trim())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn table_layout(text: &str) -> Vec<Block> {
    let rows: Vec<Vec<String>> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(split_cells)
        .collect();
    if rows.is_empty() {
        Vec::new()
    } else {
        vec![Block::Table(rows)]
    }
}

fn auto_layout(text: &str, title_allowed: bool) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let longest = lines.iter().map(|l| l.trim().chars().count()).max().unwrap_or(0);

    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut title_pending = title_allowed;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();

        if line.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            i += 1;
            continue;
        }

        // Tables need at least two consecutive multi-cell rows.
        let run = lines[i..]
            .iter()
            .take_while(|l| split_cells(l).len() >= 2)
            .count();
        if run >= 2 {
            flush_paragraph(&mut paragraph, &mut blocks);
            let rows = lines[i..i + run].iter().map(|l| split_cells(l)).collect();
            blocks.push(Block::Table(rows));
            title_pending = false;
            i += run;
            continue;
        }

        if let Some(caps) = RE_BULLET.captures(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::ListItem(caps[1].trim().to_string()));
            title_pending = false;
            i += 1;
            continue;
        }

        if let Some(level) = heading_level(line, title_pending && paragraph.is_empty()) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::Heading {
                level,
                text: line.to_string(),
            });
            title_pending = false;
            i += 1;
            continue;
        }

        paragraph.push(line);
        title_pending = false;

        // A short line closing a sentence ends the paragraph.
        let closes = line.ends_with(['.', '!', '?', ':']);
        if closes && line.chars().count() * 10 < longest * 6 {
            flush_paragraph(&mut paragraph, &mut blocks);
        }
        i += 1;
    }
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

fn heading_level(line: &str, as_title: bool) -> Option<u8> {
    let chars = line.chars().count();
    if chars > HEADING_MAX_CHARS || line.ends_with(['.', ',', ';', ':']) {
        return None;
    }
    if let Some(caps) = RE_SECTION_NUMBER.captures(line) {
        let depth = caps[1].matches('.').count() as u8;
        return Some((2 + depth).min(4));
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase()) {
        return Some(2);
    }
    if as_title && chars <= HEADING_MAX_CHARS / 2 && line.chars().next().is_some_and(char::is_uppercase) {
        return Some(1);
    }
    None
}

fn flush_paragraph(lines: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if lines.is_empty() {
        return;
    }
    let mut text = String::new();
    for line in lines.drain(..) {
        if text.ends_with('-') && line.starts_with(|c: char| c.is_lowercase()) {
            text.pop();
        } else if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(line);
    }
    blocks.push(Block::Paragraph(text));
}

// ── Markdown ─────────────────────────────────────────────────────────────

pub fn render_page_markdown(page: &PageContent) -> String {
    page.blocks
        .iter()
        .map(block_markdown)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn block_markdown(block: &Block) -> String {
    match block {
        Block::Heading { level, text } => format!("{} {}", "#".repeat(*level as usize), text),
        Block::Paragraph(text) => text.clone(),
        Block::ListItem(text) => format!("- {text}"),
        Block::Table(rows) => markdown_table(rows),
        Block::Picture(name) => format!("![]({name})"),
    }
}

fn markdown_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let line = |row: &[String]| {
        let mut out = String::from("|");
        for c in 0..columns {
            let cell = row.get(c).map(|s| s.replace('|', "\\|")).unwrap_or_default();
            out.push(' ');
            out.push_str(&cell);
            out.push_str(" |");
        }
        out
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    if let Some((header, body)) = rows.split_first() {
        lines.push(line(header.as_slice()));
        lines.push(format!("|{}", " --- |".repeat(columns)));
        lines.extend(body.iter().map(|r| line(r.as_slice())));
    }
    lines.join("\n")
}

/// Join per-page markdown, adding page separators when paginating.
///
/// A separator is `\n\n{page_index}` followed by a dashed rule and a blank
/// line, placed before every page.
pub fn join_markdown_pages(pages: &[(usize, String)], paginate: bool) -> String {
    if !paginate {
        return pages
            .iter()
            .map(|(_, md)| md.trim_end())
            .filter(|md| !md.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
    }
    let dashes = "-".repeat(PAGE_SEPARATOR_DASHES);
    let mut out = String::new();
    for (index, md) in pages {
        out.push_str(&format!("\n\n{index}{dashes}\n\n"));
        out.push_str(md.trim_end());
    }
    out
}

// ── HTML ─────────────────────────────────────────────────────────────────

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn block_html(block: &Block) -> String {
    match block {
        Block::Heading { level, text } => format!("<h{level}>{}</h{level}>", escape_html(text)),
        Block::Paragraph(text) => format!("<p>{}</p>", escape_html(text)),
        Block::ListItem(text) => format!("<li>{}</li>", escape_html(text)),
        Block::Table(rows) => {
            let mut out = String::from("<table>");
            for (r, row) in rows.iter().enumerate() {
                let tag = if r == 0 { "th" } else { "td" };
                out.push_str("<tr>");
                for cell in row {
                    out.push_str(&format!("<{tag}>{}</{tag}>", escape_html(cell)));
                }
                out.push_str("</tr>");
            }
            out.push_str("</table>");
            out
        }
        Block::Picture(name) => format!("<img src=\"{}\"/>", escape_html(name)),
    }
}

fn page_html(page: &PageContent) -> String {
    let mut out = String::new();
    let mut in_list = false;
    for block in &page.blocks {
        let is_item = matches!(block, Block::ListItem(_));
        if is_item && !in_list {
            out.push_str("<ul>");
        } else if !is_item && in_list {
            out.push_str("</ul>");
        }
        in_list = is_item;
        out.push_str(&block_html(block));
        out.push('\n');
    }
    if in_list {
        out.push_str("</ul>\n");
    }
    out
}

pub fn render_html(pages: &[PageContent], paginate: bool) -> String {
    pages
        .iter()
        .map(|page| {
            if paginate {
                format!(
                    "<div class=\"page\" data-page-id=\"{}\">\n{}</div>\n",
                    page.index,
                    page_html(page)
                )
            } else {
                page_html(page)
            }
        })
        .collect()
}

// ── Block tree ───────────────────────────────────────────────────────────

/// Render pages as a `Document → Page → block` tree.
///
/// Picture blocks embed their bitmap as base64 PNG under `images`, keyed by
/// name, when it is present in `bitmaps`.
pub fn render_tree(
    pages: &[PageContent],
    metadata: &Fields,
    bitmaps: &HashMap<String, DynamicImage>,
) -> Field {
    let children = pages.iter().map(|p| page_tree(p, bitmaps)).collect();
    Field::map([
        ("block_type", Field::text("Document")),
        ("children", Field::List(children)),
        ("metadata", Field::Map(metadata.clone())),
    ])
}

fn page_tree(page: &PageContent, bitmaps: &HashMap<String, DynamicImage>) -> Field {
    let (w, h) = (page.width as f64, page.height as f64);
    let polygon = Field::List(
        [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
            .into_iter()
            .map(|(x, y)| Field::List(vec![Field::Float(x), Field::Float(y)]))
            .collect(),
    );

    let mut counters: BTreeMap<&str, usize> = BTreeMap::new();
    let children = page
        .blocks
        .iter()
        .map(|block| {
            let kind = block.block_type();
            let n = counters.entry(kind).or_default();
            let id = format!("/page/{}/{}/{}", page.index, kind, n);
            *n += 1;

            let mut node = Fields::new();
            node.insert("id".into(), Field::text(id));
            node.insert("block_type".into(), Field::text(kind));
            node.insert("html".into(), Field::text(block_html(block)));
            if let Block::Picture(name) = block {
                if let Some(b64) = bitmaps.get(name).and_then(png_base64) {
                    node.insert("images".into(), Field::map([(name.as_str(), Field::text(b64))]));
                }
            }
            Field::Map(node)
        })
        .collect();

    Field::map([
        ("id", Field::text(format!("/page/{}/Page/0", page.index))),
        ("block_type", Field::text("Page")),
        ("polygon", polygon),
        ("children", Field::List(children)),
    ])
}

fn png_base64(img: &DynamicImage) -> Option<String> {
    let mut buf = Vec::new();
    match img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png) {
        Ok(()) => Some(STANDARD.encode(&buf)),
        Err(e) => {
            warn!("Could not embed picture in tree: {}", e);
            None
        }
    }
}

// ── Metadata helpers ─────────────────────────────────────────────────────

/// Headings across all pages as `{title, heading_level, page_id}`.
pub fn table_of_contents(pages: &[PageContent]) -> Field {
    Field::List(
        pages
            .iter()
            .flat_map(|page| {
                page.blocks.iter().filter_map(move |block| match block {
                    Block::Heading { level, text } => Some(Field::map([
                        ("title", Field::text(text.as_str())),
                        ("heading_level", Field::Int(*level as i64)),
                        ("page_id", Field::from(page.index)),
                    ])),
                    _ => None,
                })
            })
            .collect(),
    )
}

/// Per-page block counts.
pub fn page_stats(pages: &[PageContent]) -> Field {
    Field::List(
        pages
            .iter()
            .map(|page| {
                let mut counts: BTreeMap<String, Field> = BTreeMap::new();
                for block in &page.blocks {
                    let entry = counts
                        .entry(block.block_type().to_string())
                        .or_insert(Field::Int(0));
                    if let Field::Int(n) = entry {
                        *n += 1;
                    }
                }
                Field::map([
                    ("page_id", Field::from(page.index)),
                    ("text_extraction_method", Field::text("pdftext")),
                    ("block_counts", Field::Map(counts)),
                ])
            })
            .collect(),
    )
}
