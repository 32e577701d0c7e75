//! Turning generated token sequences into text and JSON.
//!
//! Structured document models emit XML-ish field tags, for example
//! `<s_rvlcdip><s_class><letter/></s_class></s>`. [`token2json`] recovers the
//! fields, and [`strip_special_tokens`] recovers readable text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Map;

use crate::prelude::*;

/// Tokenizer bookkeeping tokens which never carry content.
const BASE_SPECIAL_TOKENS: &[&str] = &["<s>", "</s>", "<pad>", "<unk>", "<mask>"];

/// Separator between sibling values.
const SEP_TOKEN: &str = "<sep/>";

/// Field start tags, like `<s_class>`.
static START_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<s_(.*?)>").expect("failed to compile regex"));

/// Any field start or end tag.
static FIELD_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?s_[^>]*>").expect("failed to compile regex"));

/// Categorical tokens, like `<letter/>`.
static CATEGORICAL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z0-9_\-]+)/>").expect("failed to compile regex")
});

/// Runs of horizontal whitespace.
static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("failed to compile regex"));

/// How should a model's output be interpreted?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// Field-tagged token sequences, parsed with [`token2json`].
    Structured,
    /// Ordinary text.
    PlainText,
}

/// A decoded generation.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    /// Readable text, with special tokens removed.
    pub text: String,
    /// Parsed fields, for [`OutputKind::Structured`] models.
    pub parsed: Option<Value>,
}

/// Decode a raw generated sequence.
pub fn decode(kind: OutputKind, raw: &str) -> Decoded {
    let text = strip_special_tokens(raw);
    let parsed = match kind {
        OutputKind::Structured => Some(token2json(&remove_base_special_tokens(raw))),
        OutputKind::PlainText => None,
    };
    Decoded { text, parsed }
}

/// Remove tokenizer bookkeeping tokens.
fn remove_base_special_tokens(raw: &str) -> String {
    let mut out = raw.to_owned();
    for token in BASE_SPECIAL_TOKENS {
        out = out.replace(token, "");
    }
    out
}

/// Render a generated sequence as plain text.
///
/// Bookkeeping tokens and field tags disappear, `<sep/>` becomes a line
/// break, and categorical tokens like `<letter/>` become their names.
pub fn strip_special_tokens(raw: &str) -> String {
    let text = remove_base_special_tokens(raw);
    let text = FIELD_TAG.replace_all(&text, " ");
    let text = text.replace(SEP_TOKEN, "\n");
    let text = CATEGORICAL_TOKEN.replace_all(&text, "$1");
    text.lines()
        .map(|line| SPACES.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert a field-tagged token sequence into JSON.
///
/// Sequences without any fields come back as `{"text_sequence": ...}`.
pub fn token2json(tokens: &str) -> Value {
    parse_fields(tokens, false)
}

/// Find `needle` in `haystack`, ignoring ASCII case.
///
/// ASCII lowercasing never changes byte lengths, so offsets into the
/// lowercased copy are valid in the original.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

/// Parse fields from `tokens`. Nested calls (`is_inner`) always return an
/// array, so that `<sep/>`-separated siblings can be collected.
fn parse_fields(tokens: &str, is_inner: bool) -> Value {
    let mut tokens = tokens.to_owned();
    let mut output = Map::new();
    while !tokens.is_empty() {
        let Some(caps) = START_TAG.captures(&tokens) else {
            break;
        };
        let start_tag = caps[0].to_owned();
        let key = caps[1].to_owned();
        let end_tag_pattern = format!("</s_{key}>");

        let Some(end_pos) = find_ignore_case(&tokens, &end_tag_pattern) else {
            // Unterminated fields are dropped.
            tokens = tokens.replace(&start_tag, "");
            continue;
        };
        let end_tag = tokens[end_pos..end_pos + end_tag_pattern.len()].to_owned();

        if let Some(content) = field_content(&tokens, &start_tag, &end_tag) {
            if content.contains("<s_") && content.contains("</s_") {
                if let Value::Array(mut children) = parse_fields(content, true)
                    && !children.is_empty()
                {
                    let value = if children.len() == 1 {
                        children.remove(0)
                    } else {
                        Value::Array(children)
                    };
                    output.insert(key, value);
                }
            } else {
                let mut leaves = content
                    .split(SEP_TOKEN)
                    .map(|leaf| Value::String(leaf_value(leaf.trim()).to_owned()))
                    .collect::<Vec<_>>();
                let value = if leaves.len() == 1 {
                    leaves.remove(0)
                } else {
                    Value::Array(leaves)
                };
                output.insert(key, value);
            }
        }

        tokens = tokens[end_pos + end_tag.len()..].trim().to_owned();
        if let Some(rest) = tokens.strip_prefix(SEP_TOKEN) {
            let mut siblings = vec![Value::Object(output)];
            if let Value::Array(more) = parse_fields(rest, true) {
                siblings.extend(more);
            }
            return Value::Array(siblings);
        }
    }

    match (output.is_empty(), is_inner) {
        (false, true) => Value::Array(vec![Value::Object(output)]),
        (false, false) => Value::Object(output),
        (true, true) => Value::Array(vec![]),
        (true, false) => {
            let mut fallback = Map::new();
            fallback.insert("text_sequence".to_owned(), Value::String(tokens));
            Value::Object(fallback)
        }
    }
}

/// The trimmed text between the first `start_tag` and the next `end_tag`.
fn field_content<'a>(tokens: &'a str, start_tag: &str, end_tag: &str) -> Option<&'a str> {
    let start = find_ignore_case(tokens, start_tag)? + start_tag.len();
    let len = find_ignore_case(&tokens[start..], end_tag)?;
    Some(tokens[start..start + len].trim())
}

/// Unwrap categorical tokens like `<letter/>` to `letter`.
fn leaf_value(leaf: &str) -> &str {
    match CATEGORICAL_TOKEN.captures(leaf) {
        Some(caps) if caps[0].len() == leaf.len() => {
            caps.get(1).map_or(leaf, |name| name.as_str())
        }
        _ => leaf,
    }
}
