//! Integration tests for the strongbox-vault crate.
//!
//! These exercise the assembled vault: envelope encryption, key rotation,
//! versioned resolution, import/export, access policies and HOTP counters.

use std::collections::HashSet;

use proptest::prelude::*;
use strongbox_otp::{FixedClock, Generator, OtpParams, Verifier, verify_hotp_and_commit};
use strongbox_vault::{
    Database, ExportFormat, ImportFormat, MasterKey, NewPolicy, NewSecret, Permission, Principal,
    RunMode, Vault, VaultConfig, VaultError,
};

fn test_vault() -> Vault {
    Vault::open_in_memory(MasterKey::from_bytes([7u8; 32])).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Envelope encryption
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn encrypt_decrypt_round_trip(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
        let vault = test_vault();
        let payload = vault.encryptor().encrypt(&plaintext, "proj").unwrap();
        let decrypted = vault.encryptor().decrypt_payload(&payload, "proj").unwrap();
        prop_assert_eq!(decrypted.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn any_flipped_bit_fails_authentication(
        plaintext in proptest::collection::vec(any::<u8>(), 1..128),
        bit in any::<usize>(),
    ) {
        let vault = test_vault();
        let mut payload = vault.encryptor().encrypt(&plaintext, "proj").unwrap();
        let bit = bit % (payload.ciphertext.len() * 8);
        payload.ciphertext[bit / 8] ^= 1 << (bit % 8);

        let err = vault.encryptor().decrypt_payload(&payload, "proj").unwrap_err();
        prop_assert!(err.is_security_event());
    }
}

#[test]
fn every_encryption_uses_a_fresh_iv() {
    let vault = test_vault();
    let mut ivs = HashSet::new();
    let mut ciphertexts = HashSet::new();
    for _ in 0..64 {
        let payload = vault.encryptor().encrypt(b"same plaintext", "proj").unwrap();
        assert!(ivs.insert(payload.iv));
        assert!(ciphertexts.insert(payload.ciphertext));
    }
}

#[test]
fn wrong_iv_is_a_decryption_failure() {
    let vault = test_vault();
    let mut payload = vault.encryptor().encrypt(b"value", "proj").unwrap();
    payload.iv[0] ^= 0xFF;
    assert!(matches!(
        vault.encryptor().decrypt_payload(&payload, "proj"),
        Err(VaultError::DecryptionFailed { .. })
    ));
}

#[test]
fn different_master_key_cannot_unwrap_data_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");

    let payload = {
        let vault = Vault::with_database(
            Database::open(&path).unwrap(),
            MasterKey::from_bytes([1u8; 32]),
        );
        vault.encryptor().encrypt(b"value", "proj").unwrap()
    };

    let other = Vault::with_database(
        Database::open(&path).unwrap(),
        MasterKey::from_bytes([2u8; 32]),
    );
    let err = other.encryptor().decrypt_payload(&payload, "proj").unwrap_err();
    assert!(err.is_security_event(), "{err}");
}

// ═══════════════════════════════════════════════════════════════════════
//  Key lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn rotation_preserves_history() {
    let vault = test_vault();
    let env = vault
        .secrets()
        .create_environment("proj", "production", "Production")
        .unwrap();
    let secret = vault
        .secrets()
        .create_secret("proj", NewSecret::new("STRIPE_KEY"))
        .unwrap();

    let v1 = vault
        .secrets()
        .set_value(&secret, &env, "sk_old", None, None)
        .unwrap();
    let new_key = vault.keys().rotate_key("proj").unwrap();
    let v2 = vault
        .secrets()
        .set_value(&secret, &env, "sk_new", None, None)
        .unwrap();

    assert_ne!(v1.key_id, v2.key_id);
    assert_eq!(v2.key_id, new_key.key_id);

    // The old version is still readable through rollback.
    vault.secrets().rollback(&secret, &env, 1, None).unwrap();
    assert_eq!(
        vault
            .secrets()
            .resolve("proj", "production", "STRIPE_KEY")
            .unwrap()
            .as_deref(),
        Some("sk_old")
    );

    let history = vault.secrets().history(&secret, &env).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].key_id, v1.key_id);
}

#[test]
fn concurrent_first_use_creates_one_active_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    Database::open(&path).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                let vault = Vault::with_database(
                    Database::open(&path).unwrap(),
                    MasterKey::from_bytes([3u8; 32]),
                );
                vault.keys().current_key("proj").unwrap().key_id
            })
        })
        .collect();

    let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 1);

    let vault = Vault::with_database(
        Database::open(&path).unwrap(),
        MasterKey::from_bytes([3u8; 32]),
    );
    assert_eq!(vault.keys().list_keys("proj").unwrap().len(), 1);
}

#[test]
fn production_without_master_key_is_fatal() {
    let config = VaultConfig {
        mode: RunMode::Production,
        master_key: None,
        ..VaultConfig::default()
    };
    assert!(matches!(
        Vault::open(&config),
        Err(VaultError::Configuration { .. })
    ));
}

#[test]
fn vault_opens_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("strongbox.db");
    let config_path = dir.path().join("strongbox.toml");
    std::fs::write(
        &config_path,
        format!(
            "mode = \"production\"\nmaster_key = \"{}\"\ndatabase_path = {:?}\n",
            "ab".repeat(32),
            db_path.display().to_string()
        ),
    )
    .unwrap();

    let config = VaultConfig::load(&config_path).unwrap();
    let vault = Vault::open(&config).unwrap();
    vault.keys().current_key("proj").unwrap();
    assert!(db_path.exists());
}

// ═══════════════════════════════════════════════════════════════════════
//  Resolution
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn resolve_all_skips_archived_and_unset_secrets() {
    let vault = test_vault();
    let secrets = vault.secrets();
    let prod = secrets.create_environment("proj", "production", "").unwrap();
    let staging = secrets.create_environment("proj", "staging", "").unwrap();

    let live = secrets.create_secret("proj", NewSecret::new("LIVE")).unwrap();
    let archived = secrets.create_secret("proj", NewSecret::new("ARCHIVED")).unwrap();
    let staging_only = secrets
        .create_secret("proj", NewSecret::new("STAGING_ONLY"))
        .unwrap();
    secrets.create_secret("proj", NewSecret::new("NEVER_SET")).unwrap();

    secrets.set_value(&live, &prod, "1", None, None).unwrap();
    secrets.set_value(&archived, &prod, "2", None, None).unwrap();
    secrets
        .set_value(&staging_only, &staging, "3", None, None)
        .unwrap();
    secrets.archive(&archived).unwrap();

    let resolved = secrets.resolve_all("proj", "production").unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved["LIVE"], "1");
}

#[test]
fn projects_are_isolated() {
    let vault = test_vault();
    let secrets = vault.secrets();
    for project in ["alpha", "beta"] {
        let env = secrets.create_environment(project, "production", "").unwrap();
        let secret = secrets.create_secret(project, NewSecret::new("TOKEN")).unwrap();
        secrets
            .set_value(&secret, &env, &format!("{project}-token"), None, None)
            .unwrap();
    }

    assert_eq!(
        secrets.resolve("alpha", "production", "TOKEN").unwrap().as_deref(),
        Some("alpha-token")
    );
    assert_eq!(
        secrets.resolve("beta", "production", "TOKEN").unwrap().as_deref(),
        Some("beta-token")
    );
    assert_ne!(
        vault.keys().current_key("alpha").unwrap().key_id,
        vault.keys().current_key("beta").unwrap().key_id
    );
}

#[test]
fn tampered_version_surfaces_as_security_event() {
    let vault = test_vault();
    let env = vault.secrets().create_environment("proj", "production", "").unwrap();
    let secret = vault.secrets().create_secret("proj", NewSecret::new("X")).unwrap();
    vault.secrets().set_value(&secret, &env, "value", None, None).unwrap();

    vault
        .database()
        .execute(|conn| {
            conn.execute(
                "UPDATE secret_versions SET encrypted_value = zeroblob(length(encrypted_value))",
                [],
            )?;
            Ok(())
        })
        .unwrap();

    let err = vault
        .secrets()
        .resolve("proj", "production", "X")
        .unwrap_err();
    assert!(err.is_security_event(), "{err}");
}

// ═══════════════════════════════════════════════════════════════════════
//  Import / export
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn dotenv_import_then_export_round_trips() {
    let vault = test_vault();
    vault.secrets().create_environment("proj", "production", "").unwrap();

    let report = vault
        .secrets()
        .import(
            "proj",
            "production",
            ImportFormat::Dotenv,
            "NAME=\"a b#c\"\n",
            Some("alice"),
        )
        .unwrap();
    assert_eq!(report.created, vec!["NAME".to_string()]);
    assert!(report.is_clean());

    assert_eq!(
        vault
            .secrets()
            .resolve("proj", "production", "NAME")
            .unwrap()
            .as_deref(),
        Some("a b#c")
    );
    let exported = vault
        .secrets()
        .export("proj", "production", ExportFormat::Dotenv, None)
        .unwrap();
    assert_eq!(exported, "NAME=\"a b#c\"\n");
}

#[test]
fn import_isolates_failures_and_reports_updates() {
    let vault = test_vault();
    let secrets = vault.secrets();
    let env = secrets.create_environment("proj", "production", "").unwrap();
    let existing = secrets.create_secret("proj", NewSecret::new("EXISTING")).unwrap();
    secrets.set_value(&existing, &env, "old", None, None).unwrap();
    let archived = secrets.create_secret("proj", NewSecret::new("FROZEN")).unwrap();
    secrets.archive(&archived).unwrap();

    let report = secrets
        .import(
            "proj",
            "production",
            ImportFormat::Dotenv,
            "EXISTING=new\nFROZEN=x\ngarbage line\nFRESH=1\n",
            None,
        )
        .unwrap();

    assert_eq!(report.created, vec!["FRESH".to_string()]);
    assert_eq!(report.updated, vec!["EXISTING".to_string()]);
    let failed: Vec<_> = report.failed.iter().map(|f| f.key.as_str()).collect();
    assert!(failed.contains(&"FROZEN"));
    assert!(failed.contains(&"line 3"));

    assert_eq!(
        secrets.resolve("proj", "production", "EXISTING").unwrap().as_deref(),
        Some("new")
    );
    assert_eq!(secrets.history(&existing, &env).unwrap().len(), 2);
}

#[test]
fn json_import_and_kubernetes_export() {
    let vault = test_vault();
    vault.secrets().create_environment("proj", "production", "").unwrap();
    vault
        .secrets()
        .import(
            "proj",
            "production",
            ImportFormat::Json,
            r#"{"PORT": 5432, "USER": "app"}"#,
            None,
        )
        .unwrap();

    let manifest = vault
        .secrets()
        .export("proj", "production", ExportFormat::Kubernetes, Some("db-creds"))
        .unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["metadata"]["name"], "db-creds");
    assert_eq!(manifest["data"]["PORT"], "NTQzMg==");
    assert_eq!(manifest["data"]["USER"], "YXBw");

    let shell = vault
        .secrets()
        .export("proj", "production", ExportFormat::Shell, None)
        .unwrap();
    assert_eq!(shell, "export PORT=5432\nexport USER=app\n");

    assert!(matches!(
        vault.secrets().import("proj", "missing", ImportFormat::Json, "{}", None),
        Err(VaultError::NotFound { .. })
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  Access policies
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn allowed_secrets_filters_by_policy() {
    let vault = test_vault();
    let secrets = vault.secrets();
    let prod = secrets.create_environment("proj", "production", "").unwrap();
    for (key, path) in [
        ("DB_PASSWORD", "db/password"),
        ("DB_USER", "db/user"),
        ("REDIS_URL", "cache/redis"),
    ] {
        secrets
            .create_secret("proj", NewSecret::new(key).with_path(path))
            .unwrap();
    }

    let token = Principal::Token("tok_123".into());
    vault
        .access()
        .create_policy(
            "proj",
            NewPolicy::new("db readers", token.clone(), [Permission::Read])
                .in_environments(["production"])
                .on_paths(["db/*"]),
        )
        .unwrap();

    let readable: Vec<_> = vault
        .access()
        .allowed_secrets(&token, &prod, Permission::Read)
        .unwrap()
        .into_iter()
        .map(|s| s.key)
        .collect();
    assert_eq!(readable, ["DB_PASSWORD", "DB_USER"]);

    assert!(vault
        .access()
        .allowed_secrets(&token, &prod, Permission::Write)
        .unwrap()
        .is_empty());

    let redis = secrets.secret("proj", "cache/redis").unwrap();
    assert!(!vault
        .access()
        .can_access(&token, &redis, &prod, Permission::Read)
        .unwrap());

    let user = Principal::User("tok_123".into());
    assert!(vault
        .access()
        .allowed_secrets(&user, &prod, Permission::Read)
        .unwrap()
        .is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  HOTP counters
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn hotp_codes_are_single_use_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let first = Vault::with_database(Database::open(&path).unwrap(), MasterKey::development());
    let second = Vault::with_database(Database::open(&path).unwrap(), MasterKey::development());

    let secret = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    let params = OtpParams::default();
    let clock = FixedClock::at_unix(0);
    let verifier = Verifier::new(clock);
    first.counters().initialize("login", 0).unwrap();

    let code = Generator::new(clock).hotp(secret, 2, &params).unwrap();
    let accepted =
        verify_hotp_and_commit(&verifier, first.counters(), "login", secret, &code, 10, &params)
            .unwrap();
    assert!(accepted.valid);

    let replayed =
        verify_hotp_and_commit(&verifier, second.counters(), "login", secret, &code, 10, &params)
            .unwrap();
    assert!(!replayed.valid);
}
