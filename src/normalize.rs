// 🔤 Label Normalizer - raw item text → lookup key

/// Canonicalize a raw transaction label into the key used by every store.
///
/// - Lowercase
/// - Trim leading/trailing whitespace
/// - Collapse internal runs of whitespace to a single space
///
/// Example:
/// - normalize("Coffee  Shop ") = "coffee shop"
pub fn normalize(raw_label: &str) -> String {
    raw_label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_case_and_whitespace() {
        assert_eq!(normalize("Coffee  Shop "), "coffee shop");
        assert_eq!(normalize("  STARBUCKS #4521\t"), "starbucks #4521");
        assert_eq!(normalize("already normal"), "already normal");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(" Café   DE  Flore ");
        assert_eq!(normalize(&once), once);
        assert_eq!(once, "café de flore");
    }
}
