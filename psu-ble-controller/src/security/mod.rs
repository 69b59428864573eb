//! Security1 session: X25519 key agreement, proof of possession, AES-256-CTR

pub mod cipher;
pub mod handshake;

pub use cipher::{CipherSession, process};
pub use handshake::{Security1, derive_key};
