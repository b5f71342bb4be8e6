//! Reshape a service reply into numbered text chunk files.
//!
//! Split rule, applied to the trimmed extracted text with lengths counted in
//! `char`s:
//!
//! 1. If the remainder fits in `max` chars, it is the last segment.
//! 2. Otherwise, if the char right after the first `max` chars is whitespace,
//!    cut there.
//! 3. Otherwise cut at the last whitespace inside the first `max` chars.
//! 4. If that window holds no whitespace, hard-cut at `max` chars.
//!
//! Trailing whitespace of a segment and the whitespace run after a cut are
//! dropped, so segments are never empty and never exceed `max` chars.
//!
//! Writes are not transactional: when a write fails, earlier chunk files stay
//! on disk and the error is returned. After every chunk is written, files
//! left by an earlier reply for the same filename with higher indices are
//! removed, so the destination always holds exactly the latest segments.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::core::error::ChunkError;
use crate::core::file_handler;
use crate::core::models::{Payload, TextChunk};

/// Pulls the text to be chunked out of a service reply.
pub type TextExtractor = fn(&Payload) -> Result<String, ChunkError>;

/// Default extractor: `text` string, else `segments[*].text` joined by spaces.
pub fn extract_text(payload: &Payload) -> Result<String, ChunkError> {
    match payload.get("text") {
        Some(Value::String(text)) => return Ok(text.clone()),
        Some(other) => {
            return Err(ChunkError::InvalidPayload(format!(
                "`text` must be a string, found {}",
                json_type(other)
            )));
        }
        None => {}
    }

    let segments = match payload.get("segments") {
        Some(Value::Array(segments)) => segments,
        Some(other) => {
            return Err(ChunkError::InvalidPayload(format!(
                "`segments` must be an array, found {}",
                json_type(other)
            )));
        }
        None => {
            return Err(ChunkError::InvalidPayload(
                "payload has neither `text` nor `segments`".to_string(),
            ));
        }
    };

    let mut parts = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        match segment.get("text") {
            Some(Value::String(text)) => parts.push(text.trim()),
            _ => {
                return Err(ChunkError::InvalidPayload(format!(
                    "segment {i} has no string `text`"
                )));
            }
        }
    }
    Ok(parts.join(" "))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Split `text` into segments of at most `max` chars. `max` must be non-zero.
pub fn split_segments(text: &str, max: usize) -> Vec<&str> {
    debug_assert!(max > 0);
    let mut segments = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        // Byte offset of char number `max`, or None if the remainder fits.
        let Some((limit, next)) = rest.char_indices().nth(max) else {
            segments.push(rest);
            break;
        };

        let cut = if next.is_whitespace() {
            limit
        } else {
            match rest[..limit].rfind(char::is_whitespace) {
                Some(ws) if ws > 0 => ws,
                _ => limit,
            }
        };

        segments.push(rest[..cut].trim_end());
        rest = rest[cut..].trim_start();
    }

    segments
}

/// Extract and split a payload into indexed chunks for `filename`.
pub fn segment(
    payload: &Payload,
    filename: &str,
    max_segment_length: usize,
    extractor: TextExtractor,
) -> Result<Vec<TextChunk>, ChunkError> {
    if max_segment_length == 0 {
        return Err(ChunkError::ZeroSegmentLength);
    }
    let text = extractor(payload)?;

    Ok(split_segments(&text, max_segment_length)
        .into_iter()
        .enumerate()
        .map(|(index, content)| TextChunk {
            index,
            content: content.to_string(),
            source_filename: filename.to_string(),
        })
        .collect())
}

/// Write every chunk of `payload` as `{filename}.{index}.txt` in `destination`.
///
/// Returns the number of files written.
pub fn chunk(
    payload: &Payload,
    filename: &str,
    destination: &Path,
    max_segment_length: usize,
    extractor: TextExtractor,
) -> Result<usize, ChunkError> {
    let chunks = segment(payload, filename, max_segment_length, extractor)?;
    if !chunks.is_empty() {
        file_handler::ensure_destination(destination)?;
    }
    for chunk in &chunks {
        let path = destination.join(chunk.file_name());
        file_handler::write_file_content(&path, chunk.content.as_bytes())?;
        debug!(path = %path.display(), index = chunk.index, "Wrote chunk");
    }
    remove_stale_chunks(filename, destination, chunks.len())?;
    Ok(chunks.len())
}

/// Delete `{filename}.{n}.txt` for `n = from, from + 1, ..` until one is missing.
fn remove_stale_chunks(filename: &str, destination: &Path, from: usize) -> Result<(), ChunkError> {
    let mut index = from;
    loop {
        let path = destination.join(TextChunk::name_for(filename, index));
        if !file_handler::remove_file_if_exists(&path)? {
            return Ok(());
        }
        debug!(path = %path.display(), index, "Removed stale chunk");
        index += 1;
    }
}
