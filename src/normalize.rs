/// Lowercase text and collapse every maximal run of non-alphanumeric
/// characters into a single space. Shared by both scorers so their
/// vocabularies line up.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lc in c.to_lowercase() {
                out.push(lc);
            }
        } else {
            pending_space = true;
        }
    }
    out
}

/// Alphanumeric tokens of the normalized text.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_collapses() {
        assert_eq!(
            normalize("Quantitative   Analyst -- (Denver, CO)!"),
            "quantitative analyst denver co"
        );
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("?!- --"), "");
    }

    #[test]
    fn test_normalize_no_leading_or_trailing_space() {
        assert_eq!(normalize("  rust  "), "rust");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("C++, Rust & SQL"), vec!["c", "rust", "sql"]);
    }
}
