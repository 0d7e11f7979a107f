//! Key derivation from passwords.

pub mod derive;

pub use derive::derive_key_from_password;
