//! Core logic — types, registry, contract, resolution, execution, audit.

pub mod artifact;
pub mod auditor;
pub mod contract;
pub mod error;
pub mod executor;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod types;
