//! Property tests for execution.

use proptest::prelude::*;
use proptest::sample::Index;

use paramreg::core::contract::{ModuleCatalog, ModuleDeclaration, ModuleDescriptor, ModuleOutput};
use paramreg::core::error::ModuleFault;
use paramreg::core::executor::{self, ExecutorConfig};
use paramreg::core::registry::Registry;
use paramreg::core::resolver;
use paramreg::core::types::{ModuleStatus, ParamMeta, ParamStatus};

/// Module `i` sums its inputs into `v{i}`; modules flagged in `fails` error out.
fn catalog(deps: &[Vec<Index>], fails: &[bool]) -> ModuleCatalog {
    let modules = deps
        .iter()
        .enumerate()
        .map(|(i, picks)| {
            let mut inputs: Vec<String> = vec!["seed".to_string()];
            if i > 0 {
                inputs.extend(picks.iter().map(|ix| format!("v{}", ix.index(i))));
            }
            inputs.sort();
            inputs.dedup();
            let output = format!("v{}", i);
            let fail = fails.get(i).copied().unwrap_or(false);
            let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
            let decl = ModuleDeclaration::new(&format!("m{}", i))
                .requires(&refs)
                .produces(&[output.as_str()]);
            ModuleDescriptor::new(decl, move |reg| {
                if fail {
                    return Err(ModuleFault::Compute("forced failure".to_string()));
                }
                let mut sum = 0.0;
                for path in &inputs {
                    sum += reg.get_number(path)?;
                }
                Ok(ModuleOutput::new().param(&output, sum))
            })
        })
        .collect();
    ModuleCatalog::from_modules(modules).unwrap()
}

fn run(catalog: &ModuleCatalog, workers: usize) -> (Registry, Vec<ModuleStatus>) {
    let mut reg = Registry::default();
    reg.seed("seed", 1.0.into(), ParamStatus::Input, ParamMeta::default())
        .unwrap();
    let plan = resolver::resolve(catalog, &reg).unwrap();
    let cfg = ExecutorConfig {
        workers,
        ..Default::default()
    };
    let summary = executor::execute(catalog, &plan, &mut reg, &cfg, None);
    let statuses = summary.outcomes.iter().map(|o| o.status).collect();
    (reg, statuses)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: worker count changes neither statuses nor values.
    #[test]
    fn property_parallel_matches_sequential(
        deps in proptest::collection::vec(proptest::collection::vec(any::<Index>(), 0..3), 1..20),
        fails in proptest::collection::vec(proptest::bool::weighted(0.15), 20),
    ) {
        let catalog = catalog(&deps, &fails);
        let (seq, seq_status) = run(&catalog, 1);
        let (par, par_status) = run(&catalog, 4);

        prop_assert_eq!(seq_status, par_status);
        prop_assert_eq!(seq.len(), par.len());
        for entry in seq.entries() {
            let other = par.get_entry(&entry.path).unwrap();
            prop_assert_eq!(&entry.value, &other.value);
            prop_assert_eq!(&entry.source, &other.source);
        }
    }

    /// PROPERTY: a module runs iff none of its producers failed or were
    /// skipped, and every finished module wrote exactly its declared output.
    #[test]
    fn property_failures_prune_exactly_dependents(
        deps in proptest::collection::vec(proptest::collection::vec(any::<Index>(), 0..3), 1..20),
        fails in proptest::collection::vec(proptest::bool::weighted(0.2), 20),
    ) {
        let catalog = catalog(&deps, &fails);
        let (reg, statuses) = run(&catalog, 1);
        let plan = resolver::resolve(&catalog, &reg).unwrap();

        for (i, status) in statuses.iter().enumerate() {
            let blocked = plan.predecessors[i]
                .iter()
                .any(|&p| statuses[p] != ModuleStatus::Done);
            let expected = if blocked {
                ModuleStatus::Skipped
            } else if fails[i] {
                ModuleStatus::Failed
            } else {
                ModuleStatus::Done
            };
            prop_assert_eq!(*status, expected, "module m{}", i);
            prop_assert_eq!(reg.has_param(&format!("v{}", i)), expected == ModuleStatus::Done);
        }
    }
}
