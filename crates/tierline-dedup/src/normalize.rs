//! Request text normalization and token-set similarity

use std::collections::BTreeSet;

/// Function words that carry no request meaning
static STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "can", "to", "of",
    "in", "for", "on", "with", "at", "by", "from", "as", "into", "through", "then", "here",
    "there", "when", "why", "all", "each", "both", "some", "such", "only", "just", "but", "and",
    "or", "if", "about", "this", "that", "these", "those", "it", "its", "my", "me", "we", "our",
    "you", "your", "so", "very", "too", "than", "also", "now", "i",
];

fn raw_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Sorted, de-duplicated content tokens of `text`.
///
/// Stop words and single-character tokens are dropped unless that would
/// leave nothing, in which case every token is kept.
pub fn normalize(text: &str) -> Vec<String> {
    let filtered: BTreeSet<String> = raw_tokens(text)
        .filter(|w| w.chars().count() > 1 && !STOP_WORDS.contains(&w.as_str()))
        .collect();
    if !filtered.is_empty() {
        return filtered.into_iter().collect();
    }
    raw_tokens(text)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Cache key for a normalized token set. `None` when there are no tokens.
pub fn fingerprint(tokens: &[String]) -> Option<String> {
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Jaccard similarity of two sorted, de-duplicated token lists
pub fn jaccard<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].as_ref().cmp(b[j].as_ref()) {
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drops_noise() {
        assert_eq!(normalize("Fix the login bug"), vec!["bug", "fix", "login"]);
        assert_eq!(
            normalize("please fix the LOGIN bug!"),
            vec!["bug", "fix", "login", "please"]
        );
        assert_eq!(
            normalize("rename user_id in auth-service"),
            vec!["auth-service", "rename", "user_id"]
        );
    }

    #[test]
    fn test_all_stop_words_kept_as_fallback() {
        assert_eq!(normalize("do it"), vec!["do", "it"]);
        assert!(normalize("   ?!  ").is_empty());
        assert_eq!(fingerprint(&normalize("")), None);
    }

    #[test]
    fn test_fingerprint_stable_under_reordering() {
        let a = fingerprint(&normalize("login bug fix")).unwrap();
        let b = fingerprint(&normalize("Fix: the bug in LOGIN")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "bug fix login");
    }

    #[test]
    fn test_jaccard_three_of_four() {
        let a = normalize("fix the login bug");
        let b = normalize("please fix the login bug");
        assert!((jaccard(&a, &b) - 0.75).abs() < 1e-12);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &normalize("deploy staging")), 0.0);
    }
}
