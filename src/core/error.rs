//! PM-002: Error taxonomy.
//!
//! Three tiers: registry errors fail the offending call, graph errors abort
//! the whole run before any module executes, module errors fail one module
//! and prune its dependents while the rest of the run continues.

use thiserror::Error;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Kind of id guarded by the uniqueness discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Formula,
    Section,
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Formula => write!(f, "formula"),
            Self::Section => write!(f, "section"),
        }
    }
}

/// Registry-level errors, immediate to the offending call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("conflict on '{path}': '{existing_source}' wrote {existing}, '{source_id}' wrote {attempted}")]
    Conflict {
        path: String,
        existing_source: String,
        existing: String,
        source_id: String,
        attempted: String,
    },

    #[error("parameter not found: {0}")]
    NotFound(String),

    #[error("duplicate {kind} id '{id}': owned by '{existing_source}', '{source_id}' tried to redefine it")]
    DuplicateId {
        kind: IdKind,
        id: String,
        existing_source: String,
        source_id: String,
    },

    #[error("parameter '{path}' has a non-finite {field}")]
    NonFinite { path: String, field: &'static str },

    #[error("parameter '{path}' is {actual}, expected {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Graph-structure errors; any of them aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("producer conflict on '{path}': declared by {}", .modules.join(", "))]
    ProducerConflict { path: String, modules: Vec<String> },

    #[error("unresolved input '{path}': required by {}, produced by no module and not bootstrapped", .required_by.join(", "))]
    UnresolvedInput {
        path: String,
        required_by: Vec<String>,
    },

    #[error("dependency cycle: {}", cycle_display(.modules))]
    Cycle { modules: Vec<String> },
}

fn cycle_display(modules: &[String]) -> String {
    let mut parts: Vec<&str> = modules.iter().map(String::as_str).collect();
    if let Some(first) = modules.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}

/// Every graph error found in one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("graph resolution failed with {} error(s)", .0.len())]
pub struct ResolveFailure(pub Vec<GraphError>);

/// Per-module errors; the run continues without the module's dependents.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModuleError {
    #[error("module '{module}' is missing inputs: {}", .missing.join(", "))]
    MissingInput { module: String, missing: Vec<String> },

    #[error("module '{module}' failed: {cause}")]
    Execution { module: String, cause: String },

    #[error("module '{module}' published undeclared outputs: {}", .paths.join(", "))]
    UndeclaredOutput { module: String, paths: Vec<String> },

    #[error("module '{module}' published undeclared formulas: {}", .ids.join(", "))]
    UndeclaredFormula { module: String, ids: Vec<String> },

    #[error("module '{module}' formula '{formula}' names undeclared outputs: {}", .paths.join(", "))]
    FormulaMismatch {
        module: String,
        formula: String,
        paths: Vec<String>,
    },

    #[error("module '{module}' could not be injected: {cause}")]
    Injection {
        module: String,
        #[source]
        cause: RegistryError,
    },

    #[error("module '{module}' not started: wall-clock limit of {limit_secs}s exceeded")]
    Timeout { module: String, limit_secs: u64 },
}

impl ModuleError {
    pub fn module(&self) -> &str {
        match self {
            Self::MissingInput { module, .. }
            | Self::Execution { module, .. }
            | Self::UndeclaredOutput { module, .. }
            | Self::UndeclaredFormula { module, .. }
            | Self::FormulaMismatch { module, .. }
            | Self::Injection { module, .. }
            | Self::Timeout { module, .. } => module,
        }
    }

    /// Short kind label for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "missing_input",
            Self::Execution { .. } => "module_execution",
            Self::UndeclaredOutput { .. } => "undeclared_output",
            Self::UndeclaredFormula { .. } => "undeclared_formula",
            Self::FormulaMismatch { .. } => "formula_mismatch",
            Self::Injection { .. } => "injection",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Secondary sort key after module registration order.
    pub fn kind_rank(&self) -> u8 {
        match self {
            Self::MissingInput { .. } => 0,
            Self::Execution { .. } => 1,
            Self::UndeclaredOutput { .. } => 2,
            Self::UndeclaredFormula { .. } => 3,
            Self::FormulaMismatch { .. } => 4,
            Self::Injection { .. } => 5,
            Self::Timeout { .. } => 6,
        }
    }
}

/// Error a module's run function may return.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModuleFault {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Compute(String),
}

/// Errors assembling a module catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("module '{0}' registered twice")]
    DuplicateModule(String),

    #[error("unknown module '{0}'")]
    UnknownModule(String),
}

/// Errors that stop a run before or after module execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("bootstrap rejected: {0}")]
    Seed(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveFailure),

    #[error("export failed: {0}")]
    Export(String),
}
