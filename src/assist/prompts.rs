//! Prompts for LLM-assisted page refinement.
//!
//! The model sees the rendered page image alongside the text layer pdfium
//! extracted. The text layer is accurate at the character level but loses
//! structure; the image shows structure but vision models misread small
//! print. The prompt asks the model to keep the characters and restore the
//! structure.

/// System prompt for refining one page into Markdown.
pub const REFINE_SYSTEM_PROMPT: &str = r#"You are an expert document converter. You receive an image of one document page and the raw text extracted from that page's text layer. Produce clean, well-structured Markdown for the page.

Follow these rules precisely:

1. TEXT
   - Prefer the extracted text for exact wording, numbers and names
   - Use the image to recover reading order, structure and anything missing from the extracted text
   - Do not invent content that appears in neither

2. STRUCTURE
   - Use # for the document title (at most one), ## for sections, ### for subsections
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Use **bold** and *italic* to match visual emphasis

3. TABLES
   - Convert tables to GFM pipe format with a header separator row
   - Use HTML table markup only if pipe format cannot represent the table

4. FORMULAS AND CODE
   - LaTeX for math: $inline$ and $$display$$
   - Triple backticks with a language identifier for code

5. IGNORE
   - Page numbers, running headers and footers, decorative rules

6. OUTPUT
   - Output ONLY the Markdown content, without ```markdown fences or commentary"#;

/// The user turn that accompanies the page image.
pub fn refine_user_message(page_number: usize, extracted_text: &str) -> String {
    let text = extracted_text.trim();
    if text.is_empty() {
        format!("Page {page_number}. The text layer is empty; transcribe the page from the image.")
    } else {
        format!("Page {page_number}. Extracted text layer:\n\n\"\"\"\n{text}\n\"\"\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_embeds_extracted_text() {
        let msg = refine_user_message(3, "  Hello world \n");
        assert!(msg.starts_with("Page 3."));
        assert!(msg.contains("\"\"\"\nHello world\n\"\"\""));
    }

    #[test]
    fn empty_text_layer_asks_for_transcription() {
        assert!(refine_user_message(1, "   ").contains("transcribe the page"));
    }

    #[test]
    fn system_prompt_forbids_fences() {
        assert!(REFINE_SYSTEM_PROMPT.contains("without ```markdown fences"));
    }
}
