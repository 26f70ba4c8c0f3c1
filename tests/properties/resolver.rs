//! Property tests for dependency resolution.

use proptest::prelude::*;
use proptest::sample::Index;

use paramreg::core::contract::{ModuleCatalog, ModuleDeclaration, ModuleDescriptor, ModuleOutput};
use paramreg::core::error::GraphError;
use paramreg::core::registry::Registry;
use paramreg::core::resolver;
use std::collections::HashMap;

fn declared(id: &str, requires: &[String], produces: &[String]) -> ModuleDescriptor {
    let req: Vec<&str> = requires.iter().map(String::as_str).collect();
    let prod: Vec<&str> = produces.iter().map(String::as_str).collect();
    ModuleDescriptor::new(
        ModuleDeclaration::new(id).requires(&req).produces(&prod),
        |_| Ok(ModuleOutput::new()),
    )
}

/// Module `i` produces `p{i}` and requires outputs of earlier modules.
fn dag_catalog(deps: &[Vec<Index>]) -> ModuleCatalog {
    let modules = deps
        .iter()
        .enumerate()
        .map(|(i, picks)| {
            let mut requires: Vec<String> = if i == 0 {
                Vec::new()
            } else {
                picks.iter().map(|ix| format!("p{}", ix.index(i))).collect()
            };
            requires.sort();
            requires.dedup();
            declared(&format!("m{}", i), &requires, &[format!("p{}", i)])
        })
        .collect();
    ModuleCatalog::from_modules(modules).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: resolving the same catalog twice yields the same plan.
    #[test]
    fn property_resolution_deterministic(
        deps in proptest::collection::vec(proptest::collection::vec(any::<Index>(), 0..4), 1..25),
    ) {
        let catalog = dag_catalog(&deps);
        let a = resolver::resolve(&catalog, &Registry::default()).unwrap();
        let b = resolver::resolve(&catalog, &Registry::default()).unwrap();
        prop_assert_eq!(a, b);
    }

    /// PROPERTY: every producer precedes each of its consumers, every module
    /// appears exactly once, and levels agree with the order.
    #[test]
    fn property_order_respects_dependencies(
        deps in proptest::collection::vec(proptest::collection::vec(any::<Index>(), 0..4), 1..25),
    ) {
        let catalog = dag_catalog(&deps);
        let plan = resolver::resolve(&catalog, &Registry::default()).unwrap();

        let mut position = vec![usize::MAX; plan.len()];
        for (pos, &i) in plan.order.iter().enumerate() {
            prop_assert_eq!(position[i], usize::MAX, "module listed twice");
            position[i] = pos;
        }
        prop_assert!(position.iter().all(|&p| p != usize::MAX));

        let mut level_of = vec![0usize; plan.len()];
        for (depth, level) in plan.levels.iter().enumerate() {
            for &i in level {
                level_of[i] = depth;
            }
        }
        for (consumer, preds) in plan.predecessors.iter().enumerate() {
            for &producer in preds {
                prop_assert!(position[producer] < position[consumer]);
                prop_assert!(level_of[producer] < level_of[consumer]);
            }
        }
    }

    /// PROPERTY: resolution reports a producer conflict exactly for the paths
    /// declared by more than one module.
    #[test]
    fn property_producer_uniqueness(
        outputs in proptest::collection::vec(proptest::collection::vec(0usize..6, 1..3), 1..10),
    ) {
        let modules: Vec<ModuleDescriptor> = outputs
            .iter()
            .enumerate()
            .map(|(i, paths)| {
                let mut produces: Vec<String> =
                    paths.iter().map(|p| format!("out.p{}", p)).collect();
                produces.sort();
                produces.dedup();
                declared(&format!("m{}", i), &[], &produces)
            })
            .collect();
        let catalog = ModuleCatalog::from_modules(modules).unwrap();

        let mut owners: HashMap<String, usize> = HashMap::new();
        for decl in catalog.modules().iter().map(|m| m.declaration()) {
            for path in &decl.output_params {
                *owners.entry(path.clone()).or_default() += 1;
            }
        }
        let mut expected: Vec<String> = owners
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(path, _)| path)
            .collect();
        expected.sort();

        match resolver::resolve(&catalog, &Registry::default()) {
            Ok(_) => prop_assert!(expected.is_empty()),
            Err(failure) => {
                let mut reported: Vec<String> = failure
                    .0
                    .iter()
                    .filter_map(|e| match e {
                        GraphError::ProducerConflict { path, .. } => Some(path.clone()),
                        _ => None,
                    })
                    .collect();
                reported.sort();
                prop_assert_eq!(reported, expected);
            }
        }
    }

    /// PROPERTY: a ring of modules reports exactly one cycle naming every member,
    /// starting from the first registered.
    #[test]
    fn property_ring_reports_exact_cycle(n in 1usize..12) {
        let modules: Vec<ModuleDescriptor> = (0..n)
            .map(|i| {
                let prev = (i + n - 1) % n;
                declared(&format!("m{:02}", i), &[format!("r{}", prev)], &[format!("r{}", i)])
            })
            .collect();
        let catalog = ModuleCatalog::from_modules(modules).unwrap();
        let failure = resolver::resolve(&catalog, &Registry::default()).unwrap_err();
        let expected: Vec<String> = (0..n).map(|i| format!("m{:02}", i)).collect();
        prop_assert_eq!(failure.0, vec![GraphError::Cycle { modules: expected }]);
    }
}
