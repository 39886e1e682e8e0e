//! Shared utilities.

pub mod decimal;

use uuid::Uuid;

/// Generate a short prefixed identifier such as `pos_3f9a0c1d2e4b`.
pub fn new_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &raw[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_prefix_and_uniqueness() {
        let a = new_id("pos");
        let b = new_id("pos");
        assert!(a.starts_with("pos_"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
