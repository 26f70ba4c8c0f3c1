//! PM-001: Core types — values, entries, formulas, sections, config, events.
//!
//! Defines the YAML config schema, the registry's value cells and content
//! collections, and the run events written to the JSONL log. Everything that
//! crosses a file boundary derives Serialize/Deserialize.

use crate::core::error::ModuleError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source recorded for bootstrap constants.
pub const EXTERNAL_SOURCE: &str = "external";

// ============================================================================
// Values
// ============================================================================

/// A dynamically typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// False if any number, including list elements, is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite(),
            Self::List(items) => items.iter().all(ParamValue::is_finite),
            Self::Bool(_) | Self::Text(_) => true,
        }
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }

    /// Equality with a relative tolerance for numbers (element-wise for lists).
    pub fn approx_eq(&self, other: &ParamValue, tolerance: f64) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                if a == b {
                    return true;
                }
                let scale = 1.0_f64.max(a.abs()).max(b.abs());
                (a - b).abs() <= tolerance * scale
            }
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.approx_eq(y, tolerance))
            }
            (a, b) => a == b,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<ParamValue>> for ParamValue {
    fn from(items: Vec<ParamValue>) -> Self {
        Self::List(items)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Epistemic status of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamStatus {
    #[serde(alias = "established")]
    Established,
    #[serde(alias = "geometric")]
    Geometric,
    #[serde(alias = "derived")]
    Derived,
    #[serde(alias = "predicted")]
    Predicted,
    #[serde(alias = "calibrated")]
    Calibrated,
    #[serde(alias = "input")]
    Input,
    #[serde(alias = "validation")]
    Validation,
    #[serde(alias = "gate")]
    Gate,
}

impl fmt::Display for ParamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Established => write!(f, "ESTABLISHED"),
            Self::Geometric => write!(f, "GEOMETRIC"),
            Self::Derived => write!(f, "DERIVED"),
            Self::Predicted => write!(f, "PREDICTED"),
            Self::Calibrated => write!(f, "CALIBRATED"),
            Self::Input => write!(f, "INPUT"),
            Self::Validation => write!(f, "VALIDATION"),
            Self::Gate => write!(f, "GATE"),
        }
    }
}

/// How an experimental bound is compared against a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundType {
    Upper,
    Lower,
    Range,
    Measured,
}

impl fmt::Display for BoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upper => write!(f, "upper"),
            Self::Lower => write!(f, "lower"),
            Self::Range => write!(f, "range"),
            Self::Measured => write!(f, "measured"),
        }
    }
}

/// Optional metadata attached to a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f64>,

    /// A number, or `[lo, hi]` for a range bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental_bound: Option<ParamValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_type: Option<BoundType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_source: Option<String>,

    /// Replace an entry owned by a different source instead of conflicting
    #[serde(default, skip_serializing)]
    pub allow_override: bool,
}

impl ParamMeta {
    pub fn units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn uncertainty(mut self, sigma: f64) -> Self {
        self.uncertainty = Some(sigma);
        self
    }

    pub fn bound(mut self, bound: ParamValue, bound_type: BoundType, source: &str) -> Self {
        self.experimental_bound = Some(bound);
        self.bound_type = Some(bound_type);
        self.bound_source = Some(source.to_string());
        self
    }

    pub fn overriding(mut self) -> Self {
        self.allow_override = true;
        self
    }
}

/// One named parameter with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub value: ParamValue,
    pub status: ParamStatus,
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental_bound: Option<ParamValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_type: Option<BoundType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_source: Option<String>,
}

impl Entry {
    pub fn new(
        path: &str,
        value: ParamValue,
        status: ParamStatus,
        source: &str,
        meta: ParamMeta,
    ) -> Self {
        Self {
            path: path.to_string(),
            value,
            status,
            source: source.to_string(),
            units: meta.units,
            description: meta.description,
            uncertainty: meta.uncertainty,
            experimental_bound: meta.experimental_bound,
            bound_type: meta.bound_type,
            bound_source: meta.bound_source,
        }
    }
}

/// What a successful `set_param` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    /// First write of the path
    Created,
    /// Same source re-wrote its own entry
    Updated,
    /// Different source wrote an equal value; entry unchanged
    Confirmed,
    /// Different source replaced the entry with `allow_override`
    Overridden,
}

impl fmt::Display for WriteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Overridden => write!(f, "overridden"),
        }
    }
}

/// Immutable record appended on every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub ordinal: u64,
    pub path: String,
    pub source: String,
    pub status: ParamStatus,
    pub action: WriteAction,
}

// ============================================================================
// Formulas and sections
// ============================================================================

/// Step-by-step derivation attached to a formula.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    #[serde(default)]
    pub steps: Vec<String>,

    #[serde(default)]
    pub references: Vec<String>,
}

/// A formula definition published by a module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub id: String,
    pub label: String,
    pub latex: String,
    pub plain_text: String,
    pub category: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub input_params: Vec<String>,

    #[serde(default)]
    pub output_params: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<Derivation>,

    /// Producing module; stamped by the registry
    #[serde(default)]
    pub source: String,
}

/// A presentational block inside a section contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum ContentBlock {
    Heading(String),
    Paragraph(String),
    Formula(String),
    Param(String),
}

/// One module's contribution to a section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionContent {
    /// Contributing module; stamped by the registry
    #[serde(default)]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub blocks: Vec<ContentBlock>,

    #[serde(default)]
    pub formula_refs: Vec<String>,

    #[serde(default)]
    pub param_refs: Vec<String>,
}

/// A document section assembled from ordered contributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Module that supplied the title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_source: Option<String>,

    pub contributions: Vec<SectionContent>,
}

// ============================================================================
// Config (paramreg.yaml)
// ============================================================================

/// Root configuration for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable run name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Externally supplied constants (order-preserving)
    #[serde(default)]
    pub bootstrap: IndexMap<String, BootstrapParam>,

    /// Catalog module ids to enable; empty enables all
    #[serde(default)]
    pub modules: Vec<String>,

    #[serde(default)]
    pub policy: Policy,
}

/// A bootstrap constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapParam {
    pub value: ParamValue,

    #[serde(default = "default_bootstrap_status")]
    pub status: ParamStatus,

    #[serde(default)]
    pub units: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub uncertainty: Option<f64>,

    #[serde(default)]
    pub experimental_bound: Option<ParamValue>,

    #[serde(default)]
    pub bound_type: Option<BoundType>,

    #[serde(default)]
    pub bound_source: Option<String>,
}

fn default_bootstrap_status() -> ParamStatus {
    ParamStatus::Input
}

impl BootstrapParam {
    pub fn meta(&self) -> ParamMeta {
        ParamMeta {
            units: self.units.clone(),
            description: self.description.clone(),
            uncertainty: self.uncertainty,
            experimental_bound: self.experimental_bound.clone(),
            bound_type: self.bound_type,
            bound_source: self.bound_source.clone(),
            allow_override: false,
        }
    }
}

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Worker threads; 1 runs sequentially
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock guard for the whole pass
    #[serde(default = "default_wall_clock_secs")]
    pub wall_clock_secs: u64,

    /// Relative tolerance for numeric conflict checks
    #[serde(default = "default_tolerance")]
    pub conflict_tolerance: f64,

    #[serde(default = "default_pass_sigma")]
    pub pass_sigma: f64,

    #[serde(default = "default_marginal_sigma")]
    pub marginal_sigma: f64,

    /// Write the JSONL event log
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            workers: default_workers(),
            wall_clock_secs: default_wall_clock_secs(),
            conflict_tolerance: default_tolerance(),
            pass_sigma: default_pass_sigma(),
            marginal_sigma: default_marginal_sigma(),
            event_log: true,
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_wall_clock_secs() -> u64 {
    3600
}

fn default_tolerance() -> f64 {
    1e-9
}

fn default_pass_sigma() -> f64 {
    1.0
}

fn default_marginal_sigma() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    StopOnFirst,
    #[default]
    ContinueIndependent,
}

// ============================================================================
// Execution state
// ============================================================================

/// Per-module lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleStatus {
    Pending,
    Validating,
    Running,
    Injecting,
    Done,
    Failed,
    Skipped,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Validating => write!(f, "VALIDATING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Injecting => write!(f, "INJECTING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Final state of one module after a run.
#[derive(Debug, Clone)]
pub struct ModuleOutcome {
    pub module: String,
    pub status: ModuleStatus,
    pub error: Option<ModuleError>,
    /// Root failed modules that caused a skip
    pub blocked_by: Vec<String>,
    pub duration_seconds: f64,
}

/// Result of one execution pass.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One outcome per module, in registration order
    pub outcomes: Vec<ModuleOutcome>,
    pub done: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Ordered by module registration order, then error kind
    pub errors: Vec<ModuleError>,
    pub total_duration: std::time::Duration,
}

impl RunSummary {
    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.outcomes.iter().find(|o| o.module == module)
    }

    pub fn status_of(&self, module: &str) -> Option<ModuleStatus> {
        self.outcome(module).map(|o| o.status)
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Event for the JSONL run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        name: String,
        modules: usize,
        paramreg_version: String,
    },
    ModuleStarted {
        run_id: String,
        module: String,
    },
    ModuleDone {
        run_id: String,
        module: String,
        outputs: usize,
        duration_seconds: f64,
    },
    ModuleFailed {
        run_id: String,
        module: String,
        error: String,
    },
    ModuleSkipped {
        run_id: String,
        module: String,
        reason: String,
    },
    RunCompleted {
        run_id: String,
        done: u32,
        failed: u32,
        skipped: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}
