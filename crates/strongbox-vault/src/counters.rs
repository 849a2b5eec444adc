//! SQLite-backed HOTP counters.
//!
//! Implements [`HotpCounterStore`] over the `otp_counters` table so
//! [`strongbox_otp::verify_hotp_and_commit`] can advance counters with a
//! single conditional `UPDATE`. Two verifiers racing on the same code both
//! read the same counter, but only one `UPDATE ... WHERE counter = ?` can
//! match.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use strongbox_otp::{HotpCounterStore, OtpError};

use crate::db::Database;
use crate::error::VaultError;

#[derive(Clone)]
pub struct SqliteCounterStore {
    db: Database,
}

impl SqliteCounterStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a credential at `counter`. An existing counter is left
    /// untouched; returns whether a row was created.
    pub fn initialize(&self, credential_id: &str, counter: u64) -> crate::Result<bool> {
        let counter = to_sql_counter(counter)?;
        let inserted = self.db.execute(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO otp_counters (credential_id, counter, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![credential_id, counter, Utc::now().timestamp()],
            )?)
        })?;
        if inserted > 0 {
            tracing::info!(credential_id, "registered hotp counter");
        }
        Ok(inserted > 0)
    }

    pub fn remove(&self, credential_id: &str) -> crate::Result<()> {
        self.db.execute(|conn| {
            conn.execute(
                "DELETE FROM otp_counters WHERE credential_id = ?1",
                params![credential_id],
            )?;
            Ok(())
        })
    }
}

impl HotpCounterStore for SqliteCounterStore {
    fn load(&self, credential_id: &str) -> strongbox_otp::Result<u64> {
        let counter: Option<i64> = self
            .db
            .execute(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT counter FROM otp_counters WHERE credential_id = ?1",
                        params![credential_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .map_err(store_error)?;

        let counter = counter.ok_or_else(|| OtpError::CounterStore {
            reason: format!("no counter registered for {credential_id}"),
        })?;
        u64::try_from(counter).map_err(|_| OtpError::CounterStore {
            reason: format!("stored counter for {credential_id} is negative"),
        })
    }

    fn compare_and_swap(
        &self,
        credential_id: &str,
        expected: u64,
        new: u64,
    ) -> strongbox_otp::Result<bool> {
        let expected = to_sql_counter(expected).map_err(store_error)?;
        let new = to_sql_counter(new).map_err(store_error)?;

        let changed = self
            .db
            .execute(|conn| {
                Ok(conn.execute(
                    "UPDATE otp_counters SET counter = ?3, updated_at = ?4
                     WHERE credential_id = ?1 AND counter = ?2",
                    params![credential_id, expected, new, Utc::now().timestamp()],
                )?)
            })
            .map_err(store_error)?;
        Ok(changed == 1)
    }
}

fn to_sql_counter(counter: u64) -> crate::Result<i64> {
    i64::try_from(counter)
        .map_err(|_| VaultError::validation(format!("hotp counter {counter} is out of range")))
}

fn store_error(err: VaultError) -> OtpError {
    OtpError::CounterStore {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use strongbox_otp::{FixedClock, Generator, OtpParams, Verifier, verify_hotp_and_commit};

    use super::*;

    const SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn cas_only_succeeds_from_expected_value() {
        let store = SqliteCounterStore::new(Database::open_in_memory().unwrap());
        assert!(store.initialize("cred", 5).unwrap());
        assert!(!store.initialize("cred", 0).unwrap());
        assert_eq!(store.load("cred").unwrap(), 5);

        assert!(store.compare_and_swap("cred", 5, 8).unwrap());
        assert!(!store.compare_and_swap("cred", 5, 9).unwrap());
        assert_eq!(store.load("cred").unwrap(), 8);
    }

    #[test]
    fn unknown_credentials_are_errors() {
        let store = SqliteCounterStore::new(Database::open_in_memory().unwrap());
        assert!(matches!(store.load("nope"), Err(OtpError::CounterStore { .. })));
        assert!(!store.compare_and_swap("nope", 0, 1).unwrap());

        store.initialize("gone", 0).unwrap();
        store.remove("gone").unwrap();
        assert!(store.load("gone").is_err());
    }

    #[test]
    fn accepted_code_cannot_be_replayed() {
        let store = SqliteCounterStore::new(Database::open_in_memory().unwrap());
        store.initialize("cred", 0).unwrap();
        let params = OtpParams::default();
        let clock = FixedClock::at_unix(0);
        let verifier = Verifier::new(clock);
        let code = Generator::new(clock).hotp(SECRET, 3, &params).unwrap();

        let first = verify_hotp_and_commit(&verifier, &store, "cred", SECRET, &code, 10, &params)
            .unwrap();
        assert!(first.valid);
        assert_eq!(first.new_counter, Some(4));
        assert_eq!(store.load("cred").unwrap(), 4);

        let replay = verify_hotp_and_commit(&verifier, &store, "cred", SECRET, &code, 10, &params)
            .unwrap();
        assert!(!replay.valid);
        assert_eq!(store.load("cred").unwrap(), 4);
    }
}
