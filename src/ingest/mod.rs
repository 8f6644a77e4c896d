//! Document ingestion and chunking.
//!
//! Turns scraper output into fixed-size overlapping chunks with stable,
//! deterministic ids. Persistence is the index's responsibility; this
//! module only produces in-memory chunk records plus a per-batch report.

use crate::models::{Chunk, Document};
use crate::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between consecutive chunks, in characters.
pub const DEFAULT_OVERLAP: usize = 50;

/// Aggregate outcome of one ingestion batch.
///
/// Empty documents are recoverable: they are logged, counted here, and
/// skipped without failing the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Documents examined.
    pub documents_seen: usize,
    /// Documents skipped (no extractable text).
    pub documents_skipped: usize,
    /// Chunks produced.
    pub chunks_built: usize,
    /// Human-readable descriptions of per-document errors.
    pub errors: Vec<String>,
}

impl IngestReport {
    fn record_skip(&mut self, err: &Error) {
        self.documents_skipped += 1;
        self.errors.push(err.to_string());
    }
}

/// Splits a document batch into chunks.
///
/// Paragraphs are packed whole into chunks while they fit; oversized
/// paragraphs fall back to word-window splitting. Consecutive chunks share
/// up to `overlap` characters of tail context, snapped to word boundaries
/// so no token is ever cut mid-word. Identical inputs and parameters
/// always produce identical chunk boundaries and ids.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `chunk_size` is zero or `overlap`
/// is not smaller than `chunk_size`. Documents without extractable text
/// are skipped and recorded in the report, never an error.
pub fn chunk_documents(
    documents: &[Document],
    chunk_size: usize,
    overlap: usize,
) -> Result<(Vec<Chunk>, IngestReport)> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk_size must be > 0".to_string()));
    }
    if overlap >= chunk_size {
        return Err(Error::InvalidInput(format!(
            "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }

    let mut chunks = Vec::new();
    let mut report = IngestReport::default();

    for doc in documents {
        report.documents_seen += 1;

        if doc.text.trim().is_empty() {
            let err = Error::EmptyDocument {
                title: doc.title.clone(),
            };
            tracing::warn!(title = %doc.title, "skipping document with no extractable text");
            metrics::counter!("ingest_documents_skipped_total").increment(1);
            report.record_skip(&err);
            continue;
        }

        let pieces = chunk_text(&doc.text, chunk_size, overlap);
        for piece in pieces {
            let chunk = Chunk::new(doc, chunks_for_doc(&chunks, &doc.title), piece);
            chunks.push(chunk);
        }
    }

    report.chunks_built = chunks.len();
    tracing::info!(
        documents = report.documents_seen,
        skipped = report.documents_skipped,
        chunks = report.chunks_built,
        "chunked document batch"
    );

    Ok((chunks, report))
}

/// Next chunk index for a document title.
///
/// Indices restart at zero per document so ids stay stable when the batch
/// order of other documents changes.
fn chunks_for_doc(chunks: &[Chunk], title: &str) -> usize {
    chunks.iter().filter(|c| c.source_title == title).count()
}

/// Splits raw text into chunk-sized pieces.
fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if para.len() > chunk_size {
            flush(&mut pieces, &mut current);
            pieces.extend(split_words(para, chunk_size, overlap));
            continue;
        }

        if !current.is_empty() && current.len() + 2 + para.len() > chunk_size {
            let tail = word_tail(&current, overlap);
            flush(&mut pieces, &mut current);
            // Carry the overlap tail forward unless it would push the next
            // chunk over budget
            if !tail.is_empty() && tail.len() + 2 + para.len() <= chunk_size {
                current = tail;
            }
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }

    flush(&mut pieces, &mut current);
    pieces
}

fn flush(pieces: &mut Vec<String>, current: &mut String) {
    if !current.trim().is_empty() {
        pieces.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Word-window split for paragraphs larger than a whole chunk.
fn split_words(para: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = para.split_whitespace().collect();
    let mut pieces = Vec::new();
    let mut window = String::new();

    for word in &words {
        if !window.is_empty() && window.len() + 1 + word.len() > chunk_size {
            let tail = word_tail(&window, overlap);
            pieces.push(std::mem::take(&mut window));
            window = tail;
        }
        if !window.is_empty() {
            window.push(' ');
        }
        window.push_str(word);
    }

    if !window.is_empty() {
        pieces.push(window);
    }
    pieces
}

/// Returns the trailing whole words of `s` totalling at most `max_chars`.
fn word_tail(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let mut tail_words: Vec<&str> = Vec::new();
    let mut len = 0;
    for word in s.split_whitespace().rev() {
        let added = if tail_words.is_empty() {
            word.len()
        } else {
            word.len() + 1
        };
        if len + added > max_chars {
            break;
        }
        len += added;
        tail_words.push(word);
    }
    tail_words.reverse();
    tail_words.join(" ")
}
