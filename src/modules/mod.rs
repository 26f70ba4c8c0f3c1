//! Built-in modules — compiled-in producers wired into the CLI.
//!
//! Each module exposes a `descriptor()` returning its declaration and run
//! function. `builtin_catalog` registers them in a fixed order.

pub mod gauge;
pub mod generations;
pub mod topology;

use crate::core::contract::ModuleCatalog;
use crate::core::error::CatalogError;

/// The compiled-in catalog, in registration order.
pub fn builtin_catalog() -> Result<ModuleCatalog, CatalogError> {
    ModuleCatalog::from_modules(vec![
        topology::descriptor(),
        generations::descriptor(),
        gauge::descriptor(),
    ])
}
