//! One-shot pool seeding.

use std::collections::HashSet;

use rand::Rng;
use tracing::info;

use crate::error::StoreError;
use crate::store::CouponStore;

pub const CODE_LEN: usize = 8;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// `count` distinct codes. Collisions are redrawn, so the result is always
/// exactly `count` long.
pub fn generate_codes<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<String> {
    let mut seen = HashSet::with_capacity(count);
    let mut codes = Vec::with_capacity(count);
    while codes.len() < count {
        let code = generate_code(rng);
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }
    codes
}

/// Replace the pool (and the ledger) with `count` fresh coupons.
pub fn seed_pool(store: &dyn CouponStore, count: usize) -> Result<usize, StoreError> {
    let codes = generate_codes(&mut rand::thread_rng(), count);
    let total = store.replace_pool(&codes)?;
    info!(total, "coupon pool seeded, previous coupons and claims cleared");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn codes_are_eight_uppercase_alphanumerics() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LEN);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn batch_has_no_duplicates() {
        let mut rng = StdRng::seed_from_u64(42);
        let codes = generate_codes(&mut rng, 5_000);
        let unique: HashSet<_> = codes.iter().collect();
        assert_eq!(codes.len(), 5_000);
        assert_eq!(unique.len(), 5_000);
    }

    #[test]
    fn seeding_fills_an_unclaimed_pool() {
        let store = MemoryStore::new();
        assert_eq!(seed_pool(&store, 20).unwrap(), 20);
        let stats = store.pool_stats().unwrap();
        assert_eq!((stats.total, stats.unclaimed), (20, 20));
    }
}
