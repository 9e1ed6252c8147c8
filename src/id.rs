//! Job ID generation.

use uuid::Uuid;

/// Generate a 32-character alphanumeric job ID drawn from a cryptographically
/// strong source.
///
/// Implemented as a v4 UUID rendered without hyphens (`simple` form), which
/// is 32 lowercase hex characters — alphanumeric, and backed by the `uuid`
/// crate's CSPRNG-based v4 generator.
pub fn random_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_32_chars_and_alphanumeric() {
        let id = random_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn ids_are_unique() {
        let a = random_id();
        let b = random_id();
        assert_ne!(a, b);
    }
}
