//! Replay-safe HOTP verification.
//!
//! [`Verifier::verify_hotp`] only *reports* the next counter. A caller that
//! reads the counter, verifies, and writes the new value without atomicity
//! can be raced into accepting the same code twice. [`verify_hotp_and_commit`]
//! closes that gap: the counter advance is a compare-and-swap against the
//! value the verification started from, and a lost race rejects the code.

use crate::clock::Clock;
use crate::error::Result;
use crate::generator::OtpParams;
use crate::verifier::{HotpVerification, Verifier};

/// Durable storage for HOTP counters, keyed by credential id.
pub trait HotpCounterStore {
    /// The next counter the credential expects.
    fn load(&self, credential_id: &str) -> Result<u64>;

    /// Replace the counter with `new` only if it still equals `expected`.
    ///
    /// Returns `false` when another writer got there first.
    fn compare_and_swap(&self, credential_id: &str, expected: u64, new: u64) -> Result<bool>;
}

/// Verify an HOTP code and atomically advance the stored counter.
pub fn verify_hotp_and_commit<C, S>(
    verifier: &Verifier<C>,
    store: &S,
    credential_id: &str,
    secret: &str,
    code: &str,
    lookahead: u64,
    params: &OtpParams,
) -> Result<HotpVerification>
where
    C: Clock,
    S: HotpCounterStore + ?Sized,
{
    let counter = store.load(credential_id)?;
    let result = verifier.verify_hotp(secret, code, counter, lookahead, params)?;

    if !result.valid {
        return Ok(result);
    }
    // A match on the last representable counter cannot be committed.
    let Some(new_counter) = result.new_counter else {
        tracing::warn!(credential_id, "hotp counter exhausted, rejecting code");
        return Ok(HotpVerification::rejected());
    };

    if store.compare_and_swap(credential_id, counter, new_counter)? {
        tracing::debug!(credential_id, new_counter, "hotp counter advanced");
        Ok(result)
    } else {
        tracing::warn!(credential_id, "hotp counter changed concurrently, rejecting code");
        Ok(HotpVerification::rejected())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::clock::FixedClock;
    use crate::generator::Generator;

    const SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[derive(Default)]
    struct MapStore(RefCell<HashMap<String, u64>>);

    impl HotpCounterStore for MapStore {
        fn load(&self, credential_id: &str) -> Result<u64> {
            Ok(self.0.borrow().get(credential_id).copied().unwrap_or(0))
        }

        fn compare_and_swap(&self, credential_id: &str, expected: u64, new: u64) -> Result<bool> {
            let mut map = self.0.borrow_mut();
            let current = map.entry(credential_id.to_string()).or_insert(0);
            if *current != expected {
                return Ok(false);
            }
            *current = new;
            Ok(true)
        }
    }

    /// Bumps the counter behind the verifier's back on the first swap.
    struct RacingStore(MapStore);

    impl HotpCounterStore for RacingStore {
        fn load(&self, credential_id: &str) -> Result<u64> {
            self.0.load(credential_id)
        }

        fn compare_and_swap(&self, credential_id: &str, expected: u64, new: u64) -> Result<bool> {
            self.0.compare_and_swap(credential_id, expected, expected + 1)?;
            self.0.compare_and_swap(credential_id, expected, new)
        }
    }

    fn code(counter: u64) -> String {
        Generator::new(FixedClock::at_unix(0))
            .hotp(SECRET, counter, &OtpParams::default())
            .unwrap()
    }

    #[test]
    fn accepted_code_cannot_be_replayed() {
        let verifier = Verifier::new(FixedClock::at_unix(0));
        let store = MapStore::default();
        let params = OtpParams::default();
        let otp = code(2);

        let first =
            verify_hotp_and_commit(&verifier, &store, "cred", SECRET, &otp, 10, &params).unwrap();
        assert!(first.valid);
        assert_eq!(store.load("cred").unwrap(), 3);

        let replay =
            verify_hotp_and_commit(&verifier, &store, "cred", SECRET, &otp, 10, &params).unwrap();
        assert!(!replay.valid);
        assert_eq!(store.load("cred").unwrap(), 3);
    }

    #[test]
    fn rejected_code_leaves_counter_untouched() {
        let verifier = Verifier::new(FixedClock::at_unix(0));
        let store = MapStore::default();

        let result = verify_hotp_and_commit(
            &verifier,
            &store,
            "cred",
            SECRET,
            "000000",
            10,
            &OtpParams::default(),
        )
        .unwrap();
        assert!(!result.valid);
        assert_eq!(store.load("cred").unwrap(), 0);
    }

    #[test]
    fn lost_race_rejects_code() {
        let verifier = Verifier::new(FixedClock::at_unix(0));
        let store = RacingStore(MapStore::default());

        let result = verify_hotp_and_commit(
            &verifier,
            &store,
            "cred",
            SECRET,
            &code(0),
            10,
            &OtpParams::default(),
        )
        .unwrap();
        assert!(!result.valid);
    }

    #[test]
    fn code_at_exhausted_counter_is_never_accepted() {
        let verifier = Verifier::new(FixedClock::at_unix(0));
        let store = MapStore::default();
        store.0.borrow_mut().insert("cred".into(), u64::MAX);
        let otp = code(u64::MAX);

        for _ in 0..2 {
            let result = verify_hotp_and_commit(
                &verifier,
                &store,
                "cred",
                SECRET,
                &otp,
                10,
                &OtpParams::default(),
            )
            .unwrap();
            assert!(!result.valid);
            assert_eq!(result.new_counter, None);
            assert_eq!(store.load("cred").unwrap(), u64::MAX);
        }
    }
}
