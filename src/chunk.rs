//! Heading-aware markdown chunker.
//!
//! Splits document text into [`Chunk`]s suitable for embedding. Splitting
//! happens at markdown heading boundaries first, so each chunk carries a
//! `heading_trail` of the nested section titles above it (headings stay in
//! the chunk text). Sections longer than `max_chars` are cut into sliding
//! windows where each window starts with the last `overlap_chars` of the
//! previous one, bounding context loss at window boundaries.
//!
//! Given the same documents and parameters the output is identical across
//! runs, which re-ingestion and the tests rely on.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

use crate::error::IngestError;
use crate::models::{Chunk, RawDocument};

/// Split documents into chunks of at most `max_chars` characters.
///
/// `max_chars` must be positive and `overlap_chars` strictly smaller,
/// otherwise this fails with [`IngestError::InvalidConfiguration`].
/// Empty (whitespace-only) documents are skipped without error. Chunk
/// `sequence_index` is contiguous per document starting at 0.
pub fn chunk_documents(
    documents: &[RawDocument],
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<Chunk>, IngestError> {
    if max_chars == 0 {
        return Err(IngestError::InvalidConfiguration(
            "max_chars must be > 0".to_string(),
        ));
    }
    if overlap_chars >= max_chars {
        return Err(IngestError::InvalidConfiguration(format!(
            "overlap_chars ({}) must be < max_chars ({})",
            overlap_chars, max_chars
        )));
    }

    let mut chunks = Vec::new();

    for doc in documents {
        if doc.text.trim().is_empty() {
            continue;
        }

        let mut sequence_index = 0usize;
        for section in split_sections(&doc.text) {
            let body = section.text.trim_end();
            if body.trim().is_empty() {
                continue;
            }
            for window in split_windows(body, max_chars, overlap_chars) {
                chunks.push(Chunk {
                    text: window,
                    source_path: doc.path.clone(),
                    sequence_index,
                    heading_trail: section.trail.clone(),
                });
                sequence_index += 1;
            }
        }
    }

    Ok(chunks)
}

/// One heading-delimited region of a document. The heading line itself is
/// part of `text`; `trail` holds the nested titles, outermost first.
struct Section {
    text: String,
    trail: Vec<String>,
}

fn split_sections(text: &str) -> Vec<Section> {
    // (byte offset of the heading start, depth 1-6, title text)
    let mut headings: Vec<(usize, usize, String)> = Vec::new();
    let mut pending: Option<(usize, usize, String)> = None;

    for (event, range) in Parser::new_ext(text, Options::empty()).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                pending = Some((range.start, level as usize, String::new()));
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, _, title)) = pending.as_mut() {
                    title.push_str(&t);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = pending.take() {
                    headings.push(h);
                }
            }
            _ => {}
        }
    }

    if headings.is_empty() {
        return vec![Section {
            text: text.to_string(),
            trail: Vec::new(),
        }];
    }

    let mut sections = Vec::new();

    // Prelude before the first heading has an empty trail.
    if headings[0].0 > 0 {
        sections.push(Section {
            text: text[..headings[0].0].to_string(),
            trail: Vec::new(),
        });
    }

    // Stack of (depth, title) for the trail at each heading.
    let mut stack: Vec<(usize, String)> = Vec::new();
    for (i, (offset, depth, title)) in headings.iter().enumerate() {
        while stack.last().is_some_and(|(d, _)| *d >= *depth) {
            stack.pop();
        }
        stack.push((*depth, title.trim().to_string()));

        let end = headings
            .get(i + 1)
            .map(|(next, _, _)| *next)
            .unwrap_or(text.len());
        sections.push(Section {
            text: text[*offset..end].to_string(),
            trail: stack.iter().map(|(_, t)| t.clone()).collect(),
        });
    }

    sections
}

/// Cut `text` into windows of at most `max` characters, each window after
/// the first beginning with the trailing `overlap` characters of its
/// predecessor. Operates on `char` counts so multi-byte text never splits
/// inside a code point.
fn split_windows(text: &str, max: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return vec![text.to_string()];
    }

    let stride = max - overlap;
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    windows
}

/// Count fenced code blocks across documents, for catalog bookkeeping.
pub fn count_code_blocks(documents: &[RawDocument]) -> usize {
    documents
        .iter()
        .map(|doc| {
            Parser::new_ext(&doc.text, Options::empty())
                .filter(|ev| {
                    matches!(
                        ev,
                        Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(_)))
                    )
                })
                .count()
        })
        .sum()
}

/// Count whitespace-separated tokens across documents.
pub fn count_tokens(documents: &[RawDocument]) -> usize {
    documents
        .iter()
        .map(|doc| doc.text.split_whitespace().count())
        .sum()
}
