//! Ledger — run event log and BLAKE3 digests for reproducible artifacts.

pub mod eventlog;
pub mod hasher;
