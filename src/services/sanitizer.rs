//! Turns client-supplied filenames into safe, collision-free storage keys.
//!
//! Keys produced here have the shape `{base}-{suffix}.{ext}` where `base` only
//! contains `[A-Za-z0-9_-]`, `suffix` is [`SUFFIX_BYTES`] random bytes in
//! lowercase hex, and `ext` is the lowercased alphanumeric extension (omitted
//! when the original name had none). Sanitization is total, and keys never
//! exceed [`MAX_KEY_LEN`] bytes so they are valid single path components.

/// Characters removed before the name is split into base and extension.
const DENYLIST: &[char] = &[
    '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '{', '}', '[', ']', ':', ';', '"', '\'',
    '`', '\\', '|', '?', '/', '>', '<', ',', '~', '=', '+',
];

const SUFFIX_DELIMITER: char = '-';
const SUFFIX_BYTES: usize = 3;
const FALLBACK_BASE: &str = "upload";

/// Longest key produced, in bytes. Matches the usual filesystem name limit.
pub const MAX_KEY_LEN: usize = 255;
const MAX_EXTENSION_LEN: usize = 32;

/// Sanitize `original_name` and append a fresh random suffix.
pub fn sanitize(original_name: &str) -> String {
    let suffix: [u8; SUFFIX_BYTES] = rand::random();
    sanitize_with_suffix(original_name, &hex::encode(suffix))
}

fn sanitize_with_suffix(original_name: &str, suffix: &str) -> String {
    let stripped: String = original_name
        .chars()
        .filter(|c| !c.is_control() && !DENYLIST.contains(c))
        .collect();

    let (base, ext) = match stripped.rsplit_once('.') {
        Some((base, ext)) => (base, ext),
        None => (stripped.as_str(), ""),
    };

    let ext: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_EXTENSION_LEN)
        .collect();

    let mut key = clean_base(base);
    let reserved = SUFFIX_DELIMITER.len_utf8()
        + suffix.len()
        + if ext.is_empty() { 0 } else { 1 + ext.len() };
    // `clean_base` output is ASCII, so any byte index is a char boundary.
    key.truncate(MAX_KEY_LEN.saturating_sub(reserved));
    key.push(SUFFIX_DELIMITER);
    key.push_str(suffix);
    if !ext.is_empty() {
        key.push('.');
        key.push_str(&ext);
    }
    key
}

/// Collapse whitespace runs to `_` and drop dots and anything outside the key alphabet.
fn clean_base(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    let mut pending_space = false;
    for c in base.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if !(c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push('_');
        }
        pending_space = false;
        out.push(c);
    }

    if out.is_empty() {
        FALLBACK_BASE.to_string()
    } else {
        out
    }
}
