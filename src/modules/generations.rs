//! PM-014: Generations — fermion generation count from chi_eff.

use crate::core::contract::{ModuleDeclaration, ModuleDescriptor, ModuleOutput};
use crate::core::error::ModuleFault;
use crate::core::registry::Registry;
use crate::core::types::*;

pub const ID: &str = "generations";

const CHI_PER_GENERATION: f64 = 48.0;

/// n_gen = chi_eff / 48, checked against the observed count.
pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new(
        ModuleDeclaration::new(ID)
            .domain("particles")
            .requires(&["topology.chi_eff"])
            .produces(&["generations.n_gen"])
            .defines(&["n-gen"]),
        run,
    )
}

fn run(registry: &Registry) -> Result<ModuleOutput, ModuleFault> {
    let chi_eff = registry.get_number("topology.chi_eff")?;
    let n_gen = chi_eff / CHI_PER_GENERATION;

    Ok(ModuleOutput::new()
        .param_with(
            "generations.n_gen",
            n_gen,
            ParamStatus::Predicted,
            ParamMeta::default()
                .description("number of fermion generations")
                .bound(3.0.into(), BoundType::Measured, "PDG"),
        )
        .formula(Formula {
            id: "n-gen".to_string(),
            label: "Generation count".to_string(),
            latex: r"n_{\mathrm{gen}} = \chi_{\mathrm{eff}} / 48".to_string(),
            plain_text: "n_gen = chi_eff / 48".to_string(),
            category: "predicted".to_string(),
            input_params: vec!["topology.chi_eff".to_string()],
            output_params: vec!["generations.n_gen".to_string()],
            ..Default::default()
        })
        .section(
            "topology",
            SectionContent {
                blocks: vec![
                    ContentBlock::Paragraph("Generations follow from the index.".to_string()),
                    ContentBlock::Formula("n-gen".to_string()),
                ],
                formula_refs: vec!["n-gen".to_string()],
                param_refs: vec!["generations.n_gen".to_string()],
                ..Default::default()
            },
        ))
}
