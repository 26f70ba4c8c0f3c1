//! PM-004: Simulation contract — declarations, run functions, the catalog.
//!
//! A module is a static declaration plus a run function over a read-only
//! registry. The resolver only ever looks at declarations; the executor is
//! the only caller of `run` and the only writer of its results.

use super::error::{CatalogError, ModuleError, ModuleFault};
use super::registry::Registry;
use super::types::*;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A module's computation. Reads the registry, returns what it publishes.
pub type RunFn = Box<dyn Fn(&Registry) -> Result<ModuleOutput, ModuleFault> + Send + Sync>;

/// Static description of a module's inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleDeclaration {
    pub id: String,
    pub version: String,
    pub domain: String,
    pub required_inputs: Vec<String>,
    pub output_params: Vec<String>,
    pub output_formulas: Vec<String>,
}

impl ModuleDeclaration {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn requires(mut self, paths: &[&str]) -> Self {
        self.required_inputs = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn produces(mut self, paths: &[&str]) -> Self {
        self.output_params = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn defines(mut self, formula_ids: &[&str]) -> Self {
        self.output_formulas = formula_ids.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// One published parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParam {
    pub value: ParamValue,
    pub status: ParamStatus,
    pub meta: ParamMeta,
}

/// Everything a module publishes from one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleOutput {
    pub params: IndexMap<String, OutputParam>,
    pub formulas: Vec<Formula>,
    pub sections: Vec<(String, SectionContent)>,
}

impl ModuleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a DERIVED value with no metadata.
    pub fn param(self, path: &str, value: impl Into<ParamValue>) -> Self {
        self.param_with(path, value, ParamStatus::Derived, ParamMeta::default())
    }

    pub fn param_with(
        mut self,
        path: &str,
        value: impl Into<ParamValue>,
        status: ParamStatus,
        meta: ParamMeta,
    ) -> Self {
        self.params.insert(
            path.to_string(),
            OutputParam {
                value: value.into(),
                status,
                meta,
            },
        );
        self
    }

    pub fn formula(mut self, formula: Formula) -> Self {
        self.formulas.push(formula);
        self
    }

    pub fn section(mut self, section_id: &str, content: SectionContent) -> Self {
        self.sections.push((section_id.to_string(), content));
        self
    }
}

/// A registered module: declaration plus run function.
pub struct ModuleDescriptor {
    declaration: ModuleDeclaration,
    run_fn: RunFn,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}

impl ModuleDescriptor {
    pub fn new<F>(declaration: ModuleDeclaration, run_fn: F) -> Self
    where
        F: Fn(&Registry) -> Result<ModuleOutput, ModuleFault> + Send + Sync + 'static,
    {
        Self {
            declaration,
            run_fn: Box::new(run_fn),
        }
    }

    pub fn id(&self) -> &str {
        &self.declaration.id
    }

    pub fn declaration(&self) -> &ModuleDeclaration {
        &self.declaration
    }

    /// Check that every required input exists; reports all missing paths.
    pub fn validate_inputs(&self, registry: &Registry) -> Result<(), ModuleError> {
        let missing: Vec<String> = self
            .declaration
            .required_inputs
            .iter()
            .filter(|p| !registry.has_param(p))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::MissingInput {
                module: self.declaration.id.clone(),
                missing,
            })
        }
    }

    /// Invoke the run function. Faults and panics become `Execution` errors.
    pub fn run(&self, registry: &Registry) -> Result<ModuleOutput, ModuleError> {
        let result = catch_unwind(AssertUnwindSafe(|| (self.run_fn)(registry)));
        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(fault)) => Err(ModuleError::Execution {
                module: self.declaration.id.clone(),
                cause: fault.to_string(),
            }),
            Err(payload) => Err(ModuleError::Execution {
                module: self.declaration.id.clone(),
                cause: format!("panicked: {}", panic_message(payload.as_ref())),
            }),
        }
    }

    /// Reject outputs the declaration does not cover.
    pub fn check_outputs(&self, output: &ModuleOutput) -> Result<(), ModuleError> {
        let undeclared: Vec<String> = output
            .params
            .keys()
            .filter(|p| !self.declaration.output_params.contains(p))
            .cloned()
            .collect();
        if !undeclared.is_empty() {
            return Err(ModuleError::UndeclaredOutput {
                module: self.declaration.id.clone(),
                paths: undeclared,
            });
        }

        let undeclared_formulas: Vec<String> = output
            .formulas
            .iter()
            .filter(|f| !self.declaration.output_formulas.contains(&f.id))
            .map(|f| f.id.clone())
            .collect();
        if !undeclared_formulas.is_empty() {
            return Err(ModuleError::UndeclaredFormula {
                module: self.declaration.id.clone(),
                ids: undeclared_formulas,
            });
        }

        for formula in &output.formulas {
            let foreign: Vec<String> = formula
                .output_params
                .iter()
                .filter(|p| !self.declaration.output_params.contains(p))
                .cloned()
                .collect();
            if !foreign.is_empty() {
                return Err(ModuleError::FormulaMismatch {
                    module: self.declaration.id.clone(),
                    formula: formula.id.clone(),
                    paths: foreign,
                });
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Ordered set of modules. Registration order is the scheduling tie-break.
#[derive(Debug, Default)]
pub struct ModuleCatalog {
    modules: Vec<ModuleDescriptor>,
    index: FxHashMap<String, usize>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module. Module ids must be unique.
    pub fn register(&mut self, module: ModuleDescriptor) -> Result<(), CatalogError> {
        if self.index.contains_key(module.id()) {
            return Err(CatalogError::DuplicateModule(module.id().to_string()));
        }
        self.index.insert(module.id().to_string(), self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    /// Build a catalog from a list, failing on the first duplicate id.
    pub fn from_modules(modules: Vec<ModuleDescriptor>) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for module in modules {
            catalog.register(module)?;
        }
        Ok(catalog)
    }

    /// Keep only the named modules, in registration order. Empty keeps all.
    pub fn select(self, ids: &[String]) -> Result<Self, CatalogError> {
        if ids.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = ids.iter().find(|id| !self.index.contains_key(*id)) {
            return Err(CatalogError::UnknownModule(unknown.clone()));
        }
        let kept = self
            .modules
            .into_iter()
            .filter(|m| ids.iter().any(|id| id == m.id()))
            .collect();
        Self::from_modules(kept)
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    /// Registration index of a module.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squarer() -> ModuleDescriptor {
        ModuleDescriptor::new(
            ModuleDeclaration::new("M").requires(&["k"]).produces(&["k2"]),
            |reg| {
                let k = reg.get_number("k")?;
                Ok(ModuleOutput::new().param("k2", k * k))
            },
        )
    }

    #[test]
    fn test_pm004_declaration_builder() {
        let decl = ModuleDeclaration::new("gauge")
            .version("2.1.0")
            .domain("gauge")
            .requires(&["a", "b"])
            .produces(&["c"])
            .defines(&["f-c"]);
        assert_eq!(decl.id, "gauge");
        assert_eq!(decl.version, "2.1.0");
        assert_eq!(decl.required_inputs, vec!["a", "b"]);
        assert_eq!(decl.output_params, vec!["c"]);
        assert_eq!(decl.output_formulas, vec!["f-c"]);
    }

    #[test]
    fn test_pm004_validate_inputs_lists_all_missing() {
        let module = ModuleDescriptor::new(
            ModuleDeclaration::new("m").requires(&["a", "b", "c"]),
            |_| Ok(ModuleOutput::new()),
        );
        let mut reg = Registry::default();
        reg.seed("b", 1.0.into(), ParamStatus::Input, ParamMeta::default())
            .unwrap();
        let err = module.validate_inputs(&reg).unwrap_err();
        assert_eq!(
            err,
            ModuleError::MissingInput {
                module: "m".to_string(),
                missing: vec!["a".to_string(), "c".to_string()],
            }
        );
    }

    #[test]
    fn test_pm004_run_pure() {
        let module = squarer();
        let mut reg = Registry::default();
        reg.seed("k", 24.0.into(), ParamStatus::Input, ParamMeta::default())
            .unwrap();
        module.validate_inputs(&reg).unwrap();
        let out = module.run(&reg).unwrap();
        assert_eq!(out.params["k2"].value, ParamValue::Number(576.0));
        assert_eq!(out.params["k2"].status, ParamStatus::Derived);
        // run never writes
        assert!(!reg.has_param("k2"));
    }

    #[test]
    fn test_pm004_fault_becomes_execution_error() {
        let module = squarer();
        let reg = Registry::default();
        let err = module.run(&reg).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::Execution { ref cause, .. } if cause.contains("not found")
        ));
    }

    #[test]
    fn test_pm004_panic_is_caught() {
        let module = ModuleDescriptor::new(ModuleDeclaration::new("boom"), |_| {
            panic!("division by zero in boom")
        });
        let err = module.run(&Registry::default()).unwrap_err();
        match err {
            ModuleError::Execution { module, cause } => {
                assert_eq!(module, "boom");
                assert!(cause.contains("division by zero"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pm004_check_outputs_undeclared() {
        let module = squarer();
        let out = ModuleOutput::new().param("k2", 1.0).param("k3", 2.0);
        let err = module.check_outputs(&out).unwrap_err();
        assert_eq!(
            err,
            ModuleError::UndeclaredOutput {
                module: "M".to_string(),
                paths: vec!["k3".to_string()],
            }
        );
        let f = Formula {
            id: "rogue".to_string(),
            ..Default::default()
        };
        let err = module
            .check_outputs(&ModuleOutput::new().formula(f))
            .unwrap_err();
        assert!(matches!(err, ModuleError::UndeclaredFormula { .. }));
    }

    #[test]
    fn test_pm004_formula_outputs_must_be_declared() {
        let module = ModuleDescriptor::new(
            ModuleDeclaration::new("M").requires(&["k"]).produces(&["k2"]).defines(&["square"]),
            |_| Ok(ModuleOutput::new()),
        );
        let square = |outputs: &[&str]| Formula {
            id: "square".to_string(),
            input_params: vec!["k".to_string()],
            output_params: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let ok = ModuleOutput::new().param("k2", 4.0).formula(square(&["k2"]));
        assert!(module.check_outputs(&ok).is_ok());

        let bad = ModuleOutput::new().param("k2", 4.0).formula(square(&["k2", "k3"]));
        assert_eq!(
            module.check_outputs(&bad).unwrap_err(),
            ModuleError::FormulaMismatch {
                module: "M".to_string(),
                formula: "square".to_string(),
                paths: vec!["k3".to_string()],
            }
        );
    }

    #[test]
    fn test_pm004_catalog_rejects_duplicates() {
        let mut catalog = ModuleCatalog::new();
        catalog.register(squarer()).unwrap();
        assert_eq!(
            catalog.register(squarer()),
            Err(CatalogError::DuplicateModule("M".to_string()))
        );
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.position("M"), Some(0));
    }

    #[test]
    fn test_pm004_catalog_select_preserves_order() {
        let make = |id: &str| {
            ModuleDescriptor::new(ModuleDeclaration::new(id), |_| Ok(ModuleOutput::new()))
        };
        let catalog = ModuleCatalog::from_modules(vec![make("a"), make("b"), make("c")]).unwrap();
        let selected = catalog
            .select(&["c".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(selected.ids(), vec!["a", "c"]);
        assert_eq!(selected.position("c"), Some(1));

        let catalog = ModuleCatalog::from_modules(vec![make("a")]).unwrap();
        assert_eq!(
            catalog.select(&["zzz".to_string()]).unwrap_err(),
            CatalogError::UnknownModule("zzz".to_string())
        );
    }
}
