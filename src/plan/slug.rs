//! URL-safe slug derivation from a plan's free-text description.

const MAX_SLUG_LEN: usize = 60;

/// Lowercase, ASCII, hyphen-separated, collapsed runs of non-alphanumerics,
/// trimmed of leading/trailing hyphens, capped at [`MAX_SLUG_LEN`].
pub fn derive_slug(description: &str) -> String {
    let mut slug = String::with_capacity(description.len());
    let mut last_was_hyphen = true; // suppresses a leading hyphen
    for ch in description.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "untitled-plan".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_punctuation_into_single_hyphens() {
        assert_eq!(derive_slug("Add Rate Limiting!!"), "add-rate-limiting");
    }

    #[test]
    fn strips_leading_and_trailing_punctuation() {
        assert_eq!(derive_slug("  -- Fix bug --  "), "fix-bug");
    }

    #[test]
    fn truncates_long_descriptions() {
        let long = "a ".repeat(100);
        let slug = derive_slug(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
    }

    #[test]
    fn empty_description_falls_back() {
        assert_eq!(derive_slug("!!!"), "untitled-plan");
    }
}
