//! Cryptography for secrets at rest.

pub mod vault;
