//! Record identifier generation.
//!
//! The legacy format `<prefix>-<epoch-ms>-<6 chars [0-9a-z]>` matches the ids
//! already present in stored records. It is not collision-proof under
//! contention; `UuidV7` gives monotonic, collision-resistant ids with the
//! same prefix convention.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 6;

/// Record kinds that receive generated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdPrefix {
    Consent,
    Request,
    Revocation,
    Policy,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Consent => "consent",
            IdPrefix::Request => "req",
            IdPrefix::Revocation => "rev",
            IdPrefix::Policy => "policy",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// `<prefix>-<epoch-ms>-<random6>`
    #[default]
    Legacy,
    /// `<prefix>-<uuid v7>`
    UuidV7,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator {
    strategy: IdStrategy,
}

impl IdGenerator {
    pub fn new(strategy: IdStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }

    pub fn generate(&self, prefix: IdPrefix, now: Timestamp) -> String {
        match self.strategy {
            IdStrategy::Legacy => {
                format!("{}-{}-{}", prefix.as_str(), now.as_millis(), random_suffix())
            }
            IdStrategy::UuidV7 => format!("{}-{}", prefix.as_str(), uuid::Uuid::now_v7()),
        }
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_format() {
        let now = Timestamp::from_millis(1_760_000_000_000).unwrap();
        let id = IdGenerator::default().generate(IdPrefix::Consent, now);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "consent");
        assert_eq!(parts[1], "1760000000000");
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2]
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn test_prefixes() {
        let now = Timestamp::now();
        let gen = IdGenerator::default();
        assert!(gen.generate(IdPrefix::Request, now).starts_with("req-"));
        assert!(gen.generate(IdPrefix::Revocation, now).starts_with("rev-"));
        assert!(gen.generate(IdPrefix::Policy, now).starts_with("policy-"));
    }

    #[test]
    fn test_uuid_v7_format() {
        let gen = IdGenerator::new(IdStrategy::UuidV7);
        let id = gen.generate(IdPrefix::Consent, Timestamp::now());
        let uuid_part = id.strip_prefix("consent-").unwrap();
        let parsed = uuid::Uuid::parse_str(uuid_part).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn test_uuid_v7_ids_are_distinct() {
        let gen = IdGenerator::new(IdStrategy::UuidV7);
        let now = Timestamp::now();
        let a = gen.generate(IdPrefix::Request, now);
        let b = gen.generate(IdPrefix::Request, now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_strategy_serde() {
        let s: IdStrategy = serde_json::from_str("\"uuid_v7\"").unwrap();
        assert_eq!(s, IdStrategy::UuidV7);
        assert_eq!(IdStrategy::default(), IdStrategy::Legacy);
    }
}
