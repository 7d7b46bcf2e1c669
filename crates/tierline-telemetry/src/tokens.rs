//! Token estimation and budget helpers

/// Estimate BPE token count from text
///
/// Heuristic by content type:
/// - Code-heavy content: ~2.5 chars/token
/// - Natural language: ~4.0 chars/token
/// - Markdown: ~3.0 chars/token
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let total_chars = text.chars().count();
    let total_lines = text.lines().count().max(1);

    let code_chars = text
        .chars()
        .filter(|&c| "{}[]();=<>|&!@#$%^*~`\\".contains(c))
        .count();
    let md_chars = text.chars().filter(|&c| "#-*_>".contains(c)).count();
    let indent_lines = text
        .lines()
        .filter(|line| line.starts_with("    ") || line.starts_with('\t'))
        .count();
    let indent_ratio = indent_lines as f64 / total_lines as f64;

    let code_fraction =
        ((code_chars as f64 / total_chars as f64) * 10.0 + indent_ratio * 0.5).min(1.0);
    let md_fraction = ((md_chars as f64 / total_chars as f64) * 8.0).min(1.0 - code_fraction);
    let prose_fraction = 1.0 - code_fraction - md_fraction;

    let chars_per_token = code_fraction * 2.5 + md_fraction * 3.0 + prose_fraction * 4.0;

    (total_chars as f64 / chars_per_token).max(1.0) as usize
}

/// Truncate to at most `max_chars` characters without splitting a code point.
///
/// Returns the input unchanged when it already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
