//! PM-013: Topology — effective Euler characteristic from the third Betti number.

use crate::core::contract::{ModuleDeclaration, ModuleDescriptor, ModuleOutput};
use crate::core::error::ModuleFault;
use crate::core::registry::Registry;
use crate::core::types::*;

pub const ID: &str = "topology";

/// chi_eff = 6 * b3
pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new(
        ModuleDeclaration::new(ID)
            .domain("geometry")
            .requires(&["topology.b3"])
            .produces(&["topology.chi_eff"])
            .defines(&["chi-eff"]),
        run,
    )
}

fn run(registry: &Registry) -> Result<ModuleOutput, ModuleFault> {
    let b3 = registry.get_number("topology.b3")?;
    if b3 < 0.0 || b3.fract() != 0.0 {
        return Err(ModuleFault::Compute(format!(
            "b3 must be a non-negative integer, got {}",
            b3
        )));
    }
    let chi_eff = 6.0 * b3;

    Ok(ModuleOutput::new()
        .param_with(
            "topology.chi_eff",
            chi_eff,
            ParamStatus::Geometric,
            ParamMeta::default().description("effective Euler characteristic"),
        )
        .formula(Formula {
            id: "chi-eff".to_string(),
            label: "Effective Euler characteristic".to_string(),
            latex: r"\chi_{\mathrm{eff}} = 6 b_3".to_string(),
            plain_text: "chi_eff = 6 * b3".to_string(),
            category: "geometric".to_string(),
            input_params: vec!["topology.b3".to_string()],
            output_params: vec!["topology.chi_eff".to_string()],
            derivation: Some(Derivation {
                steps: vec![
                    "each associative 3-cycle contributes six units".to_string(),
                    format!("6 * {} = {}", b3, chi_eff),
                ],
                references: Vec::new(),
            }),
            ..Default::default()
        })
        .section(
            "topology",
            SectionContent {
                title: Some("Topology".to_string()),
                blocks: vec![
                    ContentBlock::Heading("Euler characteristic".to_string()),
                    ContentBlock::Formula("chi-eff".to_string()),
                    ContentBlock::Param("topology.chi_eff".to_string()),
                ],
                formula_refs: vec!["chi-eff".to_string()],
                param_refs: vec!["topology.chi_eff".to_string()],
                ..Default::default()
            },
        ))
}
