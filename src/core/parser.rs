//! PM-010: YAML parsing and validation.
//!
//! Parses paramreg.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Bootstrap paths must be dotted identifiers
//! - Bootstrap status must be input or established
//! - Bootstrap numbers must be finite
//! - Policy thresholds must be consistent
//! - Selected modules must exist in the catalog

use super::contract::ModuleCatalog;
use super::types::*;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*$").unwrap_or_else(|e| {
            unreachable!("static parameter path pattern is invalid: {e}")
        })
    })
}

/// Whether `path` is a well-formed parameter path (`topology.b3`, `k`).
pub fn is_valid_path(path: &str) -> bool {
    path_pattern().is_match(path)
}

/// Parse a paramreg.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<RegistryConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a paramreg.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<RegistryConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config against a catalog. Returns a list of errors
/// (empty = valid).
pub fn validate_config(
    config: &RegistryConfig,
    catalog: &ModuleCatalog,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }

    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }

    for (path, param) in &config.bootstrap {
        if !is_valid_path(path) {
            push(format!("bootstrap path '{}' is not a dotted identifier", path));
        }
        if !matches!(param.status, ParamStatus::Input | ParamStatus::Established) {
            push(format!(
                "bootstrap '{}' has status {}, expected INPUT or ESTABLISHED",
                path, param.status
            ));
        }
        if !param.value.is_finite() {
            push(format!("bootstrap '{}' has a non-finite value {}", path, param.value));
        }
        if let Some(sigma) = param.uncertainty {
            if !sigma.is_finite() || sigma < 0.0 {
                push(format!("bootstrap '{}' has invalid uncertainty {}", path, sigma));
            }
        }
    }

    let policy = &config.policy;
    if policy.workers == 0 {
        push("policy.workers must be at least 1".to_string());
    }
    if policy.wall_clock_secs == 0 {
        push("policy.wall_clock_secs must be positive".to_string());
    }
    if policy.conflict_tolerance.is_nan() || policy.conflict_tolerance < 0.0 {
        push(format!(
            "policy.conflict_tolerance must be non-negative, got {}",
            policy.conflict_tolerance
        ));
    }
    if policy.pass_sigma.partial_cmp(&policy.marginal_sigma) != Some(std::cmp::Ordering::Less) {
        push(format!(
            "policy.pass_sigma ({}) must be below policy.marginal_sigma ({})",
            policy.pass_sigma, policy.marginal_sigma
        ));
    }

    for id in &config.modules {
        if catalog.get(id).is_none() {
            push(format!("unknown module '{}'", id));
        }
    }

    errors
}
