//! Deterministic cleanup of model-written Markdown.
//!
//! Models occasionally wrap output in fences, emit CRLF, repeat table
//! separator rows, or point image links at files that do not exist. These
//! rules repair that without touching content. Line endings are normalised
//! before the fence check, and the final newline pass runs last.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```$").unwrap());
static RE_EXCESS_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_IMAGE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const INVISIBLE: [char; 6] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

/// Apply every cleanup rule in order.
pub fn clean_markdown(raw: &str) -> String {
    let s = raw.replace("\r\n", "\n").replace('\r', "\n");
    let s = unwrap_fence(&s);
    let s = s.replace(INVISIBLE, "");
    let s = s.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    let s = RE_EXCESS_BLANKS.replace_all(&s, "\n\n").into_owned();
    let s = repair_tables(&s);
    let s = drop_placeholder_images(&s);
    let s = s.trim();
    if s.is_empty() {
        String::new()
    } else {
        format!("{s}\n")
    }
}

fn unwrap_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn is_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator(line: &str) -> bool {
    is_row(line) && line.trim().chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Within each pipe table keep exactly one separator row, right after the header.
fn repair_tables(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut position = 0usize;

    for line in input.lines() {
        if !is_row(line) {
            position = 0;
            out.push(line.to_string());
            continue;
        }
        position += 1;
        match (position, is_separator(line)) {
            (1, true) => {
                // A table cannot start with a separator.
                position = 0;
            }
            (2, false) => {
                let header_cells = out
                    .last()
                    .map(|h| h.trim().matches('|').count().saturating_sub(1))
                    .unwrap_or(1)
                    .max(1);
                out.push(format!("|{}", " --- |".repeat(header_cells)));
                out.push(line.to_string());
                position = 3;
            }
            (p, true) if p > 2 => {}
            _ => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

fn is_placeholder_target(url: &str) -> bool {
    let u = url.trim();
    if !(u.starts_with("http://") || u.starts_with("https://")) {
        return true;
    }
    ["example.com", "placeholder.com", "placehold.it", "dummyimage.com", "picsum.photos"]
        .iter()
        .any(|d| u.contains(d))
}

/// Replace links to non-existent images with their alt text in italics.
fn drop_placeholder_images(input: &str) -> String {
    RE_IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_target(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}
