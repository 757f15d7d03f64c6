//! Prompt normalization and exact-match keying.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Folds case, whitespace, and punctuation so trivially-different prompts
/// share an exact-match key.
pub fn normalize_prompt(prompt: &str) -> String {
    let mut out = String::with_capacity(prompt.len());
    let mut pending_space = false;

    for ch in prompt.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if ch.is_ascii_punctuation() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }

    out
}

/// Stable-within-process hash of a normalized prompt.
pub fn prompt_hash(normalized: &str) -> String {
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
