//! PM-011: Run artifact — build, save (atomic), load, digest verification.
//!
//! The artifact is the exported document of a run: every parameter with its
//! provenance and validation verdict, formulas, sections and the audit. Its
//! digest covers only the content (params, formulas, sections), so two runs
//! producing the same values hash the same regardless of timing or workers.

use super::auditor::{AuditReport, Finding, Tallies, Verdict};
use super::registry::Registry;
use super::types::*;
use crate::ledger::{eventlog, hasher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ARTIFACT_SCHEMA: &str = "1.0";

/// One exported parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactParam {
    #[serde(flatten)]
    pub entry: Entry,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation_sigma: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactError {
    pub module: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub done: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: Vec<ArtifactError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactAudit {
    pub tallies: Tallies,
    pub overall_pass: bool,
    /// Failed findings only
    pub failures: Vec<Finding>,
}

/// The exported document of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub schema: String,
    pub generator: String,
    pub generated_at: String,
    pub run_id: String,
    pub name: String,
    /// BLAKE3 over params, formulas and sections
    pub digest: String,
    pub params: Vec<ArtifactParam>,
    pub formulas: Vec<Formula>,
    pub sections: Vec<Section>,
    pub provenance: Vec<ProvenanceRecord>,
    pub summary: ArtifactSummary,
    pub audit: ArtifactAudit,
}

/// Result of re-hashing a saved artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCheck {
    pub recorded: String,
    pub computed: String,
}

impl DigestCheck {
    pub fn is_intact(&self) -> bool {
        self.recorded == self.computed
    }
}

/// Derive the artifact path within a state directory.
pub fn artifact_path(state_dir: &Path) -> PathBuf {
    state_dir.join("artifact.json")
}

/// Digest of the content sections of an artifact.
pub fn compute_digest(
    params: &[ArtifactParam],
    formulas: &[Formula],
    sections: &[Section],
) -> Result<String, String> {
    let components = [
        hasher::hash_json(&params)?,
        hasher::hash_json(&formulas)?,
        hasher::hash_json(&sections)?,
    ];
    let refs: Vec<&str> = components.iter().map(String::as_str).collect();
    Ok(hasher::composite_hash(&refs))
}

/// Assemble the artifact for a finished run.
pub fn build(
    name: &str,
    run_id: &str,
    registry: &Registry,
    summary: &RunSummary,
    audit: &AuditReport,
) -> Result<RunArtifact, String> {
    let mut params: Vec<ArtifactParam> = registry
        .entries()
        .map(|entry| {
            let verdict = audit.verdict_for(&entry.path);
            ArtifactParam {
                entry: entry.clone(),
                verdict: verdict.map(|v| v.verdict),
                deviation_sigma: verdict.and_then(|v| v.deviation_sigma),
            }
        })
        .collect();
    params.sort_by(|a, b| a.entry.path.cmp(&b.entry.path));

    let mut formulas: Vec<Formula> = registry.formulas().cloned().collect();
    formulas.sort_by(|a, b| a.id.cmp(&b.id));

    // Contributions grouped by module so parallel injection order does not leak in
    let mut sections: Vec<Section> = registry.sections().cloned().collect();
    sections.sort_by(|a, b| a.id.cmp(&b.id));
    for section in &mut sections {
        section.contributions.sort_by(|a, b| a.source.cmp(&b.source));
    }

    let digest = compute_digest(&params, &formulas, &sections)?;

    Ok(RunArtifact {
        schema: ARTIFACT_SCHEMA.to_string(),
        generator: format!("paramreg {}", env!("CARGO_PKG_VERSION")),
        generated_at: eventlog::now_iso8601(),
        run_id: run_id.to_string(),
        name: name.to_string(),
        digest,
        params,
        formulas,
        sections,
        provenance: registry.provenance().to_vec(),
        summary: ArtifactSummary {
            done: summary.done,
            failed: summary.failed,
            skipped: summary.skipped,
            errors: summary
                .errors
                .iter()
                .map(|e| ArtifactError {
                    module: e.module().to_string(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                })
                .collect(),
        },
        audit: ArtifactAudit {
            tallies: audit.tallies,
            overall_pass: audit.overall_pass,
            failures: audit.failures().cloned().collect(),
        },
    })
}

/// Save an artifact atomically (write to temp, then rename).
pub fn save_artifact(state_dir: &Path, artifact: &RunArtifact) -> Result<PathBuf, String> {
    std::fs::create_dir_all(state_dir)
        .map_err(|e| format!("cannot create dir {}: {}", state_dir.display(), e))?;
    let path = artifact_path(state_dir);

    let json = serde_json::to_string_pretty(artifact)
        .map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(path)
}

/// Load the artifact from a state directory. Returns None if there is none.
pub fn load_artifact(state_dir: &Path) -> Result<Option<RunArtifact>, String> {
    let path = artifact_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let artifact = serde_json::from_str(&content)
        .map_err(|e| format!("invalid artifact {}: {}", path.display(), e))?;
    Ok(Some(artifact))
}

/// Recompute the content digest and compare it with the recorded one.
pub fn verify_artifact(artifact: &RunArtifact) -> Result<DigestCheck, String> {
    Ok(DigestCheck {
        recorded: artifact.digest.clone(),
        computed: compute_digest(&artifact.params, &artifact.formulas, &artifact.sections)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auditor::{self, AuditPolicy};

    fn sample_registry() -> Registry {
        let mut reg = Registry::default();
        reg.seed("k", 24.0.into(), ParamStatus::Input, ParamMeta::default())
            .unwrap();
        reg.set_param(
            "k2",
            576.0.into(),
            "M",
            ParamStatus::Derived,
            ParamMeta::default()
                .uncertainty(1.0)
                .bound(576.0.into(), BoundType::Measured, "lab"),
        )
        .unwrap();
        reg.add_section_content(
            "results",
            SectionContent {
                title: Some("Results".to_string()),
                blocks: vec![ContentBlock::Param("k2".to_string())],
                ..Default::default()
            },
            "M",
        )
        .unwrap();
        reg
    }

    fn sample_artifact(reg: &Registry) -> RunArtifact {
        let audit = auditor::audit(reg, &AuditPolicy::default());
        build("squares", "r-test", reg, &RunSummary::default(), &audit).unwrap()
    }

    #[test]
    fn test_pm011_build_sorted_with_verdicts() {
        let reg = sample_registry();
        let artifact = sample_artifact(&reg);
        let paths: Vec<&str> = artifact.params.iter().map(|p| p.entry.path.as_str()).collect();
        assert_eq!(paths, vec!["k", "k2"]);
        assert_eq!(artifact.params[1].verdict, Some(Verdict::Pass));
        assert_eq!(artifact.params[0].verdict, None);
        assert!(artifact.digest.starts_with("blake3:"));
        assert_eq!(artifact.provenance.len(), 2);
        assert!(artifact.audit.overall_pass);
    }

    #[test]
    fn test_pm011_digest_ignores_run_metadata() {
        let reg = sample_registry();
        let a = sample_artifact(&reg);
        let audit = auditor::audit(&reg, &AuditPolicy::default());
        let b = build("other-name", "r-other", &reg, &RunSummary::default(), &audit).unwrap();
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn test_pm011_save_load_verify() {
        let dir = tempfile::tempdir().unwrap();
        let reg = sample_registry();
        let artifact = sample_artifact(&reg);
        let path = save_artifact(dir.path(), &artifact).unwrap();
        assert_eq!(path, artifact_path(dir.path()));
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load_artifact(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, artifact);
        assert!(verify_artifact(&loaded).unwrap().is_intact());
    }

    #[test]
    fn test_pm011_verify_detects_tamper() {
        let reg = sample_registry();
        let mut artifact = sample_artifact(&reg);
        artifact.params[1].entry.value = ParamValue::Number(577.0);
        let check = verify_artifact(&artifact).unwrap();
        assert!(!check.is_intact());
        assert_ne!(check.recorded, check.computed);
    }

    #[test]
    fn test_pm011_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_artifact(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_pm011_load_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(artifact_path(dir.path()), "{not json").unwrap();
        assert!(load_artifact(dir.path()).unwrap_err().contains("invalid artifact"));
    }
}
