//! Generated resource names

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Maximum length of an infra ID
pub const INFRA_ID_MAX_LEN: usize = 27;
/// Number of random characters appended to an infra ID
pub const INFRA_ID_RANDOM_LEN: usize = 5;

/// Source of unique names for resources the orchestrator creates
pub trait NameGenerator: Send + Sync {
    /// A fresh name, unique among everything this generator has returned
    fn generate(&self) -> String;
}

/// Random hyphenated v4 UUIDs
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidNameGenerator;

impl NameGenerator for UuidNameGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().hyphenated().to_string()
    }
}

/// Derive an infra ID from a cluster name
///
/// Characters outside `[A-Za-z0-9-]` become dashes, runs of dashes collapse,
/// the base is truncated so that `<base>-<random>` fits in `max_len`, and
/// the result is lower-cased.
pub fn generate_infra_id(base: &str, max_len: usize, random_len: usize) -> String {
    let mut cleaned = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' };
        if c == '-' && cleaned.ends_with('-') {
            continue;
        }
        cleaned.push(c);
    }

    let max_base_len = max_len.saturating_sub(random_len + 1);
    cleaned.truncate(max_base_len);
    let cleaned = cleaned.trim_end_matches('-');

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(random_len)
        .map(char::from)
        .collect();

    format!("{}-{}", cleaned, suffix).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_names_are_unique_and_hyphenated() {
        let names = UuidNameGenerator;
        let a = names.generate();
        let b = names.generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn infra_id_replaces_invalid_characters() {
        let id = generate_infra_id("my_cluster..name", INFRA_ID_MAX_LEN, INFRA_ID_RANDOM_LEN);
        let (base, random) = id.rsplit_once('-').unwrap();
        assert_eq!(base, "my-cluster-name");
        assert_eq!(random.len(), INFRA_ID_RANDOM_LEN);
    }

    #[test]
    fn infra_id_is_truncated_and_lowercased() {
        let id = generate_infra_id(
            "AVeryLongClusterNameThatKeepsGoing",
            INFRA_ID_MAX_LEN,
            INFRA_ID_RANDOM_LEN,
        );
        assert_eq!(id.len(), INFRA_ID_MAX_LEN);
        assert!(id.starts_with("averylongclusternamet-"));
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn infra_id_does_not_end_base_with_dash() {
        // base truncates to "abcdefghijklmnopqrst-" before trimming
        let id = generate_infra_id("abcdefghijklmnopqrst-uvw", INFRA_ID_MAX_LEN, INFRA_ID_RANDOM_LEN);
        assert!(id.starts_with("abcdefghijklmnopqrst-"));
        assert!(!id.contains("--"));
    }
}
