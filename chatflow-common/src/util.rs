//! Utility functions for chatflow services.

/// Normalize a contact identifier to digits only.
///
/// Provider ids arrive in several shapes (`+34 600-111-222`,
/// `34600111222@s.whatsapp.net`); conversations are keyed by the digits.
pub fn normalize_contact_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Uses character boundaries, so multi-byte text (emoji, accents) is safe.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}
