//! IdGenerator port: request-identifier generation.

use crate::domain::RequestId;

/// Produces unique request identifiers. No two calls within one process
/// should reasonably collide; the guarantee is probabilistic, which is enough
/// for store keys and idempotency headers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> RequestId;
}

/// Production generator: dash-grouped hex in 8-4-4-4-12 digit groups, four
/// hex digits per random draw.
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    /// Four random hex digits.
    fn quad() -> String {
        format!("{:04x}", rand::random::<u16>())
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> RequestId {
        let raw = format!(
            "{}{}-{}-{}-{}-{}{}{}",
            Self::quad(),
            Self::quad(),
            Self::quad(),
            Self::quad(),
            Self::quad(),
            Self::quad(),
            Self::quad(),
            Self::quad(),
        );
        RequestId::from_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_match_the_guid_shape() {
        let id = RandomIdGenerator.generate();
        // parse() enforces the 8-4-4-4-12 hex grouping.
        assert!(RequestId::parse(id.as_str()).is_ok(), "bad id: {id}");
        assert_eq!(id.as_str().len(), 36);
    }

    #[test]
    fn ten_thousand_ids_do_not_collide() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(RandomIdGenerator.generate()));
        }
    }
}
