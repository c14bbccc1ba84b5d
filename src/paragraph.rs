// src/paragraph.rs

//! Blank-line-separated `Key: Value` paragraph format
//!
//! Port manifests, binary control files and BUILD_INFO files all share the
//! same line format: one or more paragraphs, each a run of `Key: Value`
//! lines, separated by blank lines. A line starting with whitespace
//! continues the previous value; a line starting with `#` is a comment.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// A single parsed paragraph: field name to field value
pub type Paragraph = HashMap<String, String>;

/// Parse text into its paragraphs
pub fn parse_paragraphs(text: &str) -> Result<Vec<Paragraph>> {
    let mut paragraphs = Vec::new();
    let mut current = Paragraph::new();
    let mut last_key: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
                last_key = None;
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // continuation of the previous field
            let key = last_key.as_ref().ok_or_else(|| {
                Error::ParseError(format!("continuation line with no field: {:?}", line))
            })?;
            let value = current
                .get_mut(key)
                .ok_or_else(|| Error::internal("continuation key vanished"))?;
            value.push('\n');
            value.push_str(line.trim());
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| Error::ParseError(format!("expected `Key: Value`, got {:?}", line)))?;
        let key = key.trim().to_string();
        if current.contains_key(&key) {
            return Err(Error::ParseError(format!("duplicate field {}", key)));
        }
        last_key = Some(key.clone());
        current.insert(key, value.trim().to_string());
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs)
}

/// Parse a file expected to contain exactly one paragraph
pub fn get_single_paragraph(path: &Path) -> Result<Paragraph> {
    let text = std::fs::read_to_string(path)?;
    let mut paragraphs = parse_paragraphs(&text)?;
    if paragraphs.len() != 1 {
        return Err(Error::ParseError(format!(
            "expected a single paragraph in {}, found {}",
            path.display(),
            paragraphs.len()
        )));
    }
    Ok(paragraphs.remove(0))
}

/// Remove and return a field, failing if it is absent
pub fn required_field(paragraph: &mut Paragraph, name: &str) -> Result<String> {
    paragraph
        .remove(name)
        .ok_or_else(|| Error::ParseError(format!("missing required field {}", name)))
}

/// Remove and return a field if present
pub fn optional_field(paragraph: &mut Paragraph, name: &str) -> Option<String> {
    paragraph.remove(name)
}

/// Split a comma-separated field value into trimmed entries
pub fn split_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
