//! Fixed test IDs for deterministic tests
//!
//! Using fixed ids and subjects keeps assertions and log output stable
//! between runs.

// Signing key ids
pub const TEST_KEY_ID_1: &str = "test-key-2026-01";
pub const TEST_KEY_ID_2: &str = "test-key-2026-02";
pub const TEST_RSA_KEY_ID: &str = "test-rsa-key-01";

// Seeds for deterministic Ed25519 keys
pub const TEST_SEED_1: u8 = 1;
pub const TEST_SEED_2: u8 = 2;

// Token subjects
pub const TEST_SUBJECT_ALICE: &str = "uid-alice";
pub const TEST_SUBJECT_BOB: &str = "uid-bob";

// Default claim values
pub const TEST_ISSUER: &str = "JWT API Simulation";
pub const TEST_AUDIENCE: &str = "JWT API Simulation";
