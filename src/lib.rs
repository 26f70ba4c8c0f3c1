//! paramreg — parameter registry and simulation orchestration.
//!
//! Modules declare what they read and what they publish. The resolver orders
//! them, the executor runs them against one shared registry with a provenance
//! ledger, and the auditor checks the result. BLAKE3 artifacts make a run
//! reproducible and tamper-evident.

pub mod cli;
pub mod core;
pub mod ledger;
pub mod modules;
