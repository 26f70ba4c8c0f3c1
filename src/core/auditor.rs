//! PM-007: Validator/Auditor — provenance, experimental bounds, formulas.
//!
//! Read-only pass over a finished registry. Never fails: every problem is a
//! finding in the report.

use super::registry::Registry;
use super::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Verdict for one experimental comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Marginal,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Marginal => write!(f, "MARGINAL"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Comparison of one entry against its experimental bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub path: String,
    pub verdict: Verdict,
    /// Absent when no usable uncertainty was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation_sigma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Provenance,
    Validation,
    Formula,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provenance => write!(f, "provenance"),
            Self::Validation => write!(f, "validation"),
            Self::Formula => write!(f, "formula"),
        }
    }
}

/// A single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: AuditCategory,
    /// Parameter path or formula id
    pub subject: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub passed: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tallies {
    pub provenance: Tally,
    pub validation: Tally,
    pub formula: Tally,
}

impl Tallies {
    fn get_mut(&mut self, category: AuditCategory) -> &mut Tally {
        match category {
            AuditCategory::Provenance => &mut self.provenance,
            AuditCategory::Validation => &mut self.validation,
            AuditCategory::Formula => &mut self.formula,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub findings: Vec<Finding>,
    pub tallies: Tallies,
    pub verdicts: Vec<ValidationVerdict>,
    pub overall_pass: bool,
}

impl AuditReport {
    pub fn failures(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.passed)
    }

    pub fn verdict_for(&self, path: &str) -> Option<&ValidationVerdict> {
        self.verdicts.iter().find(|v| v.path == path)
    }
}

/// Thresholds for verdicts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditPolicy {
    pub pass_sigma: f64,
    pub marginal_sigma: f64,
    pub tolerance: f64,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self::from_policy(&Policy::default())
    }
}

impl AuditPolicy {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            pass_sigma: policy.pass_sigma,
            marginal_sigma: policy.marginal_sigma,
            tolerance: policy.conflict_tolerance,
        }
    }

    fn grade(&self, sigma: f64) -> Verdict {
        if sigma < self.pass_sigma {
            Verdict::Pass
        } else if sigma < self.marginal_sigma {
            Verdict::Marginal
        } else {
            Verdict::Fail
        }
    }
}

/// Audit a registry. Findings come back ordered by category, then subject,
/// independent of the order entries were written in.
pub fn audit(registry: &Registry, policy: &AuditPolicy) -> AuditReport {
    let mut findings = Vec::new();
    let mut verdicts = Vec::new();

    for entry in registry.entries() {
        if let Some(finding) = check_provenance(entry) {
            findings.push(finding);
        }
        if entry.experimental_bound.is_some() {
            let verdict = check_bound(entry, policy);
            findings.push(Finding {
                category: AuditCategory::Validation,
                subject: entry.path.clone(),
                passed: verdict.verdict != Verdict::Fail,
                message: describe_verdict(&verdict),
            });
            verdicts.push(verdict);
        }
    }

    for formula in registry.formulas() {
        findings.push(check_formula(formula, registry));
    }
    findings.sort_by(|a, b| (a.category, &a.subject).cmp(&(b.category, &b.subject)));
    verdicts.sort_by(|a, b| a.path.cmp(&b.path));

    let mut tallies = Tallies::default();
    for f in &findings {
        let tally = tallies.get_mut(f.category);
        if f.passed {
            tally.passed += 1;
        } else {
            tally.failed += 1;
        }
    }
    let overall_pass = findings.iter().all(|f| f.passed);
    debug!(findings = findings.len(), overall_pass, "audit complete");

    AuditReport {
        findings,
        tallies,
        verdicts,
        overall_pass,
    }
}

fn check_provenance(entry: &Entry) -> Option<Finding> {
    if !matches!(entry.status, ParamStatus::Derived | ParamStatus::Predicted) {
        return None;
    }
    let passed = !entry.source.trim().is_empty();
    let message = if passed {
        format!("{} from '{}'", entry.status, entry.source)
    } else {
        format!("{} entry has no source", entry.status)
    };
    Some(Finding {
        category: AuditCategory::Provenance,
        subject: entry.path.clone(),
        passed,
        message,
    })
}

fn describe_verdict(v: &ValidationVerdict) -> String {
    match (&v.message, v.deviation_sigma) {
        (Some(msg), _) => format!("{}: {}", v.verdict, msg),
        (None, Some(sigma)) => format!("{} ({:.2} sigma)", v.verdict, sigma),
        (None, None) => format!("{} (exact)", v.verdict),
    }
}

fn failed_check(path: &str, message: String) -> ValidationVerdict {
    ValidationVerdict {
        path: path.to_string(),
        verdict: Verdict::Fail,
        deviation_sigma: None,
        message: Some(message),
    }
}

/// Raw distance between a value and its bound, before dividing by sigma.
fn bound_distance(value: f64, bound: &ParamValue, bound_type: BoundType) -> Result<f64, String> {
    let scalar = || {
        bound
            .as_f64()
            .ok_or_else(|| format!("{} bound must be a number, got {}", bound_type, bound.kind()))
    };
    match bound_type {
        BoundType::Measured => Ok((value - scalar()?).abs()),
        BoundType::Upper => Ok((value - scalar()?).max(0.0)),
        BoundType::Lower => Ok((scalar()? - value).max(0.0)),
        BoundType::Range => {
            let (lo, hi) = match bound.as_list() {
                Some([lo, hi]) => match (lo.as_f64(), hi.as_f64()) {
                    (Some(lo), Some(hi)) if lo <= hi => (lo, hi),
                    _ => return Err(format!("malformed range bound {}", bound)),
                },
                _ => return Err(format!("range bound must be [lo, hi], got {}", bound)),
            };
            if value < lo {
                Ok(lo - value)
            } else if value > hi {
                Ok(value - hi)
            } else {
                Ok(0.0)
            }
        }
    }
}

fn check_bound(entry: &Entry, policy: &AuditPolicy) -> ValidationVerdict {
    let Some(bound) = entry.experimental_bound.as_ref() else {
        return failed_check(&entry.path, "no experimental bound".to_string());
    };
    let Some(value) = entry.value.as_f64() else {
        return failed_check(
            &entry.path,
            format!("non-numeric value ({}) cannot be compared", entry.value.kind()),
        );
    };
    let bound_type = entry.bound_type.unwrap_or(match bound {
        ParamValue::List(_) => BoundType::Range,
        _ => BoundType::Measured,
    });
    let distance = match bound_distance(value, bound, bound_type) {
        Ok(d) => d,
        Err(msg) => return failed_check(&entry.path, msg),
    };

    match entry.uncertainty {
        Some(sigma) if sigma > 0.0 => {
            let deviation = distance / sigma;
            ValidationVerdict {
                path: entry.path.clone(),
                verdict: policy.grade(deviation),
                deviation_sigma: Some(deviation),
                message: None,
            }
        }
        _ => {
            let scale = 1.0_f64.max(value.abs());
            let verdict = if distance <= policy.tolerance * scale {
                Verdict::Pass
            } else {
                Verdict::Fail
            };
            ValidationVerdict {
                path: entry.path.clone(),
                verdict,
                deviation_sigma: None,
                message: None,
            }
        }
    }
}

fn check_formula(formula: &Formula, registry: &Registry) -> Finding {
    let mut problems = Vec::new();
    for (field, text) in [
        ("latex", &formula.latex),
        ("plain_text", &formula.plain_text),
        ("category", &formula.category),
    ] {
        if text.trim().is_empty() {
            problems.push(format!("empty {}", field));
        }
    }
    for id in formula.input_params.iter().chain(&formula.output_params) {
        if !registry.has_param(id) && !registry.is_other_formula_output(id, &formula.id) {
            problems.push(format!("unresolved reference '{}'", id));
        }
    }

    let passed = problems.is_empty();
    Finding {
        category: AuditCategory::Formula,
        subject: formula.id.clone(),
        passed,
        message: if passed {
            "complete".to_string()
        } else {
            problems.join("; ")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(path: &str, value: ParamValue, meta: ParamMeta) -> Registry {
        let mut reg = Registry::default();
        reg.set_param(path, value, "sim", ParamStatus::Predicted, meta)
            .unwrap();
        reg
    }

    fn verdict(reg: &Registry, path: &str) -> ValidationVerdict {
        audit(reg, &AuditPolicy::default())
            .verdict_for(path)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_pm007_measured_sigma_grades() {
        let meta = |v| ParamMeta::default().uncertainty(0.1).bound(v, BoundType::Measured, "PDG");
        let reg = registry_with("m.pass", 1.05.into(), meta(ParamValue::Number(1.0)));
        let v = verdict(&reg, "m.pass");
        assert_eq!(v.verdict, Verdict::Pass);
        assert!((v.deviation_sigma.unwrap() - 0.5).abs() < 1e-9);

        let reg = registry_with("m.marg", 1.15.into(), meta(ParamValue::Number(1.0)));
        assert_eq!(verdict(&reg, "m.marg").verdict, Verdict::Marginal);

        let reg = registry_with("m.fail", 1.3.into(), meta(ParamValue::Number(1.0)));
        let report = audit(&reg, &AuditPolicy::default());
        assert_eq!(report.verdict_for("m.fail").unwrap().verdict, Verdict::Fail);
        assert!(!report.overall_pass);
        assert_eq!(report.tallies.validation.failed, 1);
    }

    #[test]
    fn test_pm007_upper_and_lower_bounds() {
        let upper = ParamMeta::default()
            .uncertainty(1.0)
            .bound(10.0.into(), BoundType::Upper, "limit");
        let reg = registry_with("u", 3.0.into(), upper.clone());
        assert_eq!(verdict(&reg, "u").deviation_sigma, Some(0.0));
        let reg = registry_with("u", 13.0.into(), upper);
        assert_eq!(verdict(&reg, "u").verdict, Verdict::Fail);

        let lower = ParamMeta::default()
            .uncertainty(1.0)
            .bound(10.0.into(), BoundType::Lower, "limit");
        let reg = registry_with("l", 8.5.into(), lower);
        assert_eq!(verdict(&reg, "l").verdict, Verdict::Marginal);
    }

    #[test]
    fn test_pm007_range_bound() {
        let range = ParamValue::List(vec![1.0.into(), 2.0.into()]);
        let meta = ParamMeta::default()
            .uncertainty(0.5)
            .bound(range, BoundType::Range, "fit");
        let reg = registry_with("r", 1.5.into(), meta.clone());
        assert_eq!(verdict(&reg, "r").deviation_sigma, Some(0.0));
        let reg = registry_with("r", 2.75.into(), meta);
        let v = verdict(&reg, "r");
        assert_eq!(v.verdict, Verdict::Marginal);
        assert!((v.deviation_sigma.unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_pm007_exact_comparison_without_sigma() {
        let meta = ParamMeta::default().bound(3.0.into(), BoundType::Measured, "count");
        let reg = registry_with("n.gen", 3.0.into(), meta.clone());
        let v = verdict(&reg, "n.gen");
        assert_eq!(v.verdict, Verdict::Pass);
        assert_eq!(v.deviation_sigma, None);

        let reg = registry_with("n.gen", 4.0.into(), meta);
        assert_eq!(verdict(&reg, "n.gen").verdict, Verdict::Fail);
    }

    #[test]
    fn test_pm007_non_numeric_value_fails_check() {
        let meta = ParamMeta::default().bound(1.0.into(), BoundType::Measured, "x");
        let reg = registry_with("t", "SO(10)".into(), meta);
        let v = verdict(&reg, "t");
        assert_eq!(v.verdict, Verdict::Fail);
        assert!(v.message.unwrap().contains("non-numeric"));
    }

    #[test]
    fn test_pm007_malformed_range() {
        let meta = ParamMeta::default()
            .uncertainty(1.0)
            .bound(ParamValue::List(vec![2.0.into(), 1.0.into()]), BoundType::Range, "x");
        let reg = registry_with("r", 1.5.into(), meta);
        assert!(verdict(&reg, "r").message.unwrap().contains("malformed"));
    }

    #[test]
    fn test_pm007_provenance_requires_source() {
        let mut reg = Registry::default();
        reg.set_param("d.ok", 1.0.into(), "sim", ParamStatus::Derived, ParamMeta::default())
            .unwrap();
        reg.set_param("d.anon", 1.0.into(), "", ParamStatus::Derived, ParamMeta::default())
            .unwrap();
        reg.seed("k", 24.0.into(), ParamStatus::Input, ParamMeta::default())
            .unwrap();
        let report = audit(&reg, &AuditPolicy::default());
        assert_eq!(report.tallies.provenance, Tally { passed: 1, failed: 1 });
        let failed: Vec<&str> = report.failures().map(|f| f.subject.as_str()).collect();
        assert_eq!(failed, vec!["d.anon"]);
        assert!(!report.overall_pass);
    }

    #[test]
    fn test_pm007_formula_completeness() {
        let mut reg = Registry::default();
        reg.set_param("k2", 576.0.into(), "M", ParamStatus::Derived, ParamMeta::default())
            .unwrap();
        reg.add_formula(
            Formula {
                id: "square".to_string(),
                latex: "k_2 = k^2".to_string(),
                plain_text: "k2 = k^2".to_string(),
                category: "derived".to_string(),
                output_params: vec!["k2".to_string()],
                ..Default::default()
            },
            "M",
        )
        .unwrap();
        reg.add_formula(
            Formula {
                id: "broken".to_string(),
                latex: "x".to_string(),
                input_params: vec!["nowhere".to_string()],
                ..Default::default()
            },
            "M",
        )
        .unwrap();
        let report = audit(&reg, &AuditPolicy::default());
        assert_eq!(report.tallies.formula, Tally { passed: 1, failed: 1 });
        let broken = report.findings.iter().find(|f| f.subject == "broken").unwrap();
        assert!(broken.message.contains("empty plain_text"));
        assert!(broken.message.contains("unresolved reference 'nowhere'"));
    }

    #[test]
    fn test_pm007_formula_output_must_exist() {
        let mut reg = Registry::default();
        reg.set_param("k2", 576.0.into(), "M", ParamStatus::Derived, ParamMeta::default())
            .unwrap();
        let formula = |id: &str, inputs: &[&str], outputs: &[&str]| Formula {
            id: id.to_string(),
            latex: "x".to_string(),
            plain_text: "x".to_string(),
            category: "derived".to_string(),
            input_params: inputs.iter().map(|s| s.to_string()).collect(),
            output_params: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        reg.add_formula(formula("ghost", &["k2"], &["ghost.path"]), "M")
            .unwrap();
        let report = audit(&reg, &AuditPolicy::default());
        assert_eq!(report.tallies.formula, Tally { passed: 0, failed: 1 });
        let ghost = report.findings.iter().find(|f| f.subject == "ghost").unwrap();
        assert!(ghost.message.contains("unresolved reference 'ghost.path'"));
        assert!(!report.overall_pass);

        // Another formula's output is a valid reference
        reg.add_formula(formula("uses-ghost", &["ghost.path"], &["k2"]), "M")
            .unwrap();
        let report = audit(&reg, &AuditPolicy::default());
        let uses = report.findings.iter().find(|f| f.subject == "uses-ghost").unwrap();
        assert!(uses.passed, "{}", uses.message);
    }

    #[test]
    fn test_pm007_findings_ignore_write_order() {
        let meta = || {
            ParamMeta::default()
                .uncertainty(0.1)
                .bound(1.0.into(), BoundType::Measured, "PDG")
        };
        let fill = |paths: &[&str]| {
            let mut reg = Registry::default();
            for p in paths {
                reg.set_param(p, 2.0.into(), "", ParamStatus::Predicted, meta())
                    .unwrap();
            }
            reg
        };
        let forward = audit(&fill(&["a.slow", "b.fast"]), &AuditPolicy::default());
        let backward = audit(&fill(&["b.fast", "a.slow"]), &AuditPolicy::default());
        assert_eq!(forward, backward);
        let order: Vec<(AuditCategory, &str)> = backward
            .failures()
            .map(|f| (f.category, f.subject.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (AuditCategory::Provenance, "a.slow"),
                (AuditCategory::Provenance, "b.fast"),
                (AuditCategory::Validation, "a.slow"),
                (AuditCategory::Validation, "b.fast"),
            ]
        );
    }

    #[test]
    fn test_pm007_empty_registry_passes() {
        let report = audit(&Registry::default(), &AuditPolicy::default());
        assert!(report.overall_pass);
        assert!(report.findings.is_empty());
    }
}
