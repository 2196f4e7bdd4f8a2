//! Name normalization used for cross-layer matching

/// Lower-case and keep only alphanumeric characters
///
/// `"Customer Order"`, `"customer_order"` and `"CustomerOrder"` all normalize
/// to `"customerorder"`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

pub fn names_match(a: &str, b: &str) -> bool {
    let a = normalize_name(a);
    !a.is_empty() && a == normalize_name(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Customer Order"), "customerorder");
        assert_eq!(normalize_name("customer_order"), "customerorder");
        assert_eq!(normalize_name("CustomerOrder"), "customerorder");
        assert_eq!(normalize_name("  "), "");
    }

    #[test]
    fn test_names_match() {
        assert!(names_match("order-line", "OrderLine"));
        assert!(!names_match("Order", "Orders"));
        assert!(!names_match("", "_"));
    }
}
