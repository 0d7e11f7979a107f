//! Memory hygiene for key material.

pub mod secure_buf;
pub mod wipe;

pub use secure_buf::SecureBuf;
pub use wipe::{lock_memory, prevent_core_dumps};
