//! Tag construction for statsd samples
use crate::metric::Labels;

/// Parse a whitespace-separated list of `key:value` tokens.
///
/// Tokens without a non-empty key and value on either side of the first
/// colon are dropped.
pub fn parse_static_tags(raw: &str) -> Vec<String> {
    raw.split_whitespace()
        .filter(|token| is_valid_tag(token))
        .map(str::to_string)
        .collect()
}

/// Whether a token is a usable `key:value` tag
pub fn is_valid_tag(token: &str) -> bool {
    match token.split_once(':') {
        Some((key, value)) => !key.is_empty() && !value.is_empty(),
        None => false,
    }
}

/// Render labels as `key:value` tags
pub fn label_tags(labels: &Labels) -> Vec<String> {
    labels
        .iter()
        .map(|(key, value)| format!("{}:{}", key, value))
        .collect()
}

/// Label tags first, static tags after
pub fn merge_tags(labels: &Labels, static_tags: &[String]) -> Vec<String> {
    let mut tags = label_tags(labels);
    tags.reserve(static_tags.len());
    tags.extend(static_tags.iter().cloned());
    tags
}
