//! Persistence: respawn times per map instance, stored as checksummed JSON.
//!
//! # Invariants
//! - Files are replaced atomically; a crash leaves the old or the new file.
//! - Every file carries its schema version and a SHA-256 of its rows, and
//!   loading fails closed on a mismatch of either.

mod atomic;
mod store;

pub use store::{FileRespawnStore, PersistError, RESPAWN_SCHEMA_VERSION, RespawnFile, StoreMeta};

pub fn crate_info() -> &'static str {
    "worldgrid-persist v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("persist"));
    }
}
