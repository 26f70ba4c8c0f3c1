//! PM-003: Parameter registry — keyed entries, formulas, sections, provenance.
//!
//! The registry is an explicitly constructed value. Modules read it through a
//! shared reference; only the executor holds it mutably, so every write goes
//! through `set_param` and lands in the append-only provenance ledger.

use super::error::{IdKind, RegistryError, RegistryResult};
use super::types::*;
use indexmap::IndexMap;
use tracing::debug;

/// Relative tolerance used by `Registry::default`.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Shared store of parameters, formulas and section content.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: IndexMap<String, Entry>,
    formulas: IndexMap<String, Formula>,
    sections: IndexMap<String, Section>,
    provenance: Vec<ProvenanceRecord>,
    tolerance: f64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl Registry {
    /// Create an empty registry with the given relative numeric tolerance.
    pub fn new(tolerance: f64) -> Self {
        Self {
            entries: IndexMap::new(),
            formulas: IndexMap::new(),
            sections: IndexMap::new(),
            provenance: Vec::new(),
            tolerance,
        }
    }

    /// Decide what writing `value` to `path` would do, without writing.
    ///
    /// A different source may only re-write a path with an equal value
    /// (within tolerance for numbers) unless `meta.allow_override` is set.
    /// NaN and infinities are never stored.
    pub fn check_param(
        &self,
        path: &str,
        value: &ParamValue,
        source: &str,
        meta: &ParamMeta,
    ) -> RegistryResult<WriteAction> {
        let non_finite = if !value.is_finite() {
            Some("value")
        } else if meta.uncertainty.is_some_and(|u| !u.is_finite()) {
            Some("uncertainty")
        } else if meta.experimental_bound.as_ref().is_some_and(|b| !b.is_finite()) {
            Some("experimental bound")
        } else {
            None
        };
        if let Some(field) = non_finite {
            return Err(RegistryError::NonFinite {
                path: path.to_string(),
                field,
            });
        }

        match self.entries.get(path) {
            None => Ok(WriteAction::Created),
            Some(existing) if existing.source == source => Ok(WriteAction::Updated),
            Some(_) if meta.allow_override => Ok(WriteAction::Overridden),
            Some(existing) if existing.value.approx_eq(value, self.tolerance) => {
                Ok(WriteAction::Confirmed)
            }
            Some(existing) => Err(RegistryError::Conflict {
                path: path.to_string(),
                existing_source: existing.source.clone(),
                existing: existing.value.to_string(),
                source_id: source.to_string(),
                attempted: value.to_string(),
            }),
        }
    }

    /// Write a parameter and append a provenance record.
    pub fn set_param(
        &mut self,
        path: &str,
        value: ParamValue,
        source: &str,
        status: ParamStatus,
        meta: ParamMeta,
    ) -> RegistryResult<WriteAction> {
        let action = self.check_param(path, &value, source, &meta)?;

        if action != WriteAction::Confirmed {
            let entry = Entry::new(path, value, status, source, meta);
            self.entries.insert(path.to_string(), entry);
        }

        let ordinal = self.provenance.len() as u64;
        self.provenance.push(ProvenanceRecord {
            ordinal,
            path: path.to_string(),
            source: source.to_string(),
            status,
            action,
        });
        debug!(path, source, %status, %action, "set_param");
        Ok(action)
    }

    /// Seed an externally supplied constant.
    pub fn seed(
        &mut self,
        path: &str,
        value: ParamValue,
        status: ParamStatus,
        meta: ParamMeta,
    ) -> RegistryResult<WriteAction> {
        self.set_param(path, value, EXTERNAL_SOURCE, status, meta)
    }

    pub fn get_param(&self, path: &str) -> RegistryResult<&ParamValue> {
        self.get_entry(path).map(|e| &e.value)
    }

    pub fn get_entry(&self, path: &str) -> RegistryResult<&Entry> {
        self.entries
            .get(path)
            .ok_or_else(|| RegistryError::NotFound(path.to_string()))
    }

    /// Read a numeric parameter.
    pub fn get_number(&self, path: &str) -> RegistryResult<f64> {
        let value = self.get_param(path)?;
        value.as_f64().ok_or_else(|| RegistryError::WrongType {
            path: path.to_string(),
            expected: "number",
            actual: value.kind(),
        })
    }

    /// Read a text parameter.
    pub fn get_text(&self, path: &str) -> RegistryResult<&str> {
        let value = self.get_param(path)?;
        value.as_str().ok_or_else(|| RegistryError::WrongType {
            path: path.to_string(),
            expected: "text",
            actual: value.kind(),
        })
    }

    pub fn has_param(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Would registering formula `id` from `source` be accepted?
    pub fn check_formula(&self, id: &str, source: &str) -> RegistryResult<()> {
        match self.formulas.get(id) {
            Some(existing) if existing.source != source => Err(RegistryError::DuplicateId {
                kind: IdKind::Formula,
                id: id.to_string(),
                existing_source: existing.source.clone(),
                source_id: source.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Register a formula. Re-registration by the same source replaces it.
    pub fn add_formula(&mut self, mut formula: Formula, source: &str) -> RegistryResult<()> {
        self.check_formula(&formula.id, source)?;
        formula.source = source.to_string();
        debug!(id = %formula.id, source, "add_formula");
        self.formulas.insert(formula.id.clone(), formula);
        Ok(())
    }

    /// Would `source` contributing `title` to `section_id` be accepted?
    ///
    /// The first contributor to name a title owns it; another source may only
    /// repeat the same title.
    pub fn check_section(
        &self,
        section_id: &str,
        title: Option<&str>,
        source: &str,
    ) -> RegistryResult<()> {
        let Some(title) = title else {
            return Ok(());
        };
        let Some(section) = self.sections.get(section_id) else {
            return Ok(());
        };
        match (&section.title, &section.title_source) {
            (Some(existing), Some(owner)) if owner != source && existing != title => {
                Err(RegistryError::DuplicateId {
                    kind: IdKind::Section,
                    id: section_id.to_string(),
                    existing_source: owner.clone(),
                    source_id: source.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Append a contribution to a section, creating the section on first use.
    pub fn add_section_content(
        &mut self,
        section_id: &str,
        mut content: SectionContent,
        source: &str,
    ) -> RegistryResult<()> {
        self.check_section(section_id, content.title.as_deref(), source)?;
        content.source = source.to_string();
        let section = self
            .sections
            .entry(section_id.to_string())
            .or_insert_with(|| Section {
                id: section_id.to_string(),
                title: None,
                title_source: None,
                contributions: Vec::new(),
            });

        if let Some(title) = &content.title {
            let owned_elsewhere = section
                .title_source
                .as_deref()
                .is_some_and(|owner| owner != source);
            if !owned_elsewhere {
                section.title = Some(title.clone());
                section.title_source = Some(source.to_string());
            }
        }

        debug!(section = section_id, source, "add_section_content");
        section.contributions.push(content);
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn formulas(&self) -> impl Iterator<Item = &Formula> {
        self.formulas.values()
    }

    pub fn formula(&self, id: &str) -> Option<&Formula> {
        self.formulas.get(id)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.get(id)
    }

    /// The append-only write ledger, in write order.
    pub fn provenance(&self) -> &[ProvenanceRecord] {
        &self.provenance
    }

    pub fn entries_by_status(&self, status: ParamStatus) -> Vec<&Entry> {
        self.entries.values().filter(|e| e.status == status).collect()
    }

    pub fn entries_from_source(&self, source: &str) -> Vec<&Entry> {
        self.entries.values().filter(|e| e.source == source).collect()
    }

    /// Is `id` listed as an output of a registered formula other than
    /// `formula_id`?
    pub fn is_other_formula_output(&self, id: &str, formula_id: &str) -> bool {
        self.formulas
            .values()
            .filter(|f| f.id != formula_id)
            .any(|f| f.output_params.iter().any(|p| p == id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
