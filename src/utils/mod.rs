//! Utility functions and helpers
//!
//! This module contains cryptographic utilities, encoding functions,
//! and the shutdown-aware background loop used by the node's timers.

pub mod background;
pub mod crypto;
pub mod serialization;

pub use background::{spawn_periodic, ShutdownToken, MIN_PERIOD};
pub use crypto::{
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, leading_zero_bits,
    new_key_pair, public_key_from_pkcs8, random_hex, sha256_array, sha256_digest,
};
pub use serialization::{deserialize, from_hex, serialize, to_hex};
