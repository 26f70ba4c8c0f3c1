//! PM-015: Gauge group — dimension and rank of SO(n).

use crate::core::contract::{ModuleDeclaration, ModuleDescriptor, ModuleOutput};
use crate::core::error::ModuleFault;
use crate::core::registry::Registry;
use crate::core::types::*;

pub const ID: &str = "gauge";

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new(
        ModuleDeclaration::new(ID)
            .domain("gauge")
            .requires(&["gauge.so_n"])
            .produces(&["gauge.group", "gauge.dim", "gauge.rank"])
            .defines(&["so-n-dim"]),
        run,
    )
}

fn run(registry: &Registry) -> Result<ModuleOutput, ModuleFault> {
    let n = registry.get_number("gauge.so_n")?;
    if n < 2.0 || n.fract() != 0.0 {
        return Err(ModuleFault::Compute(format!("SO(n) needs integer n >= 2, got {}", n)));
    }
    let dim = n * (n - 1.0) / 2.0;
    let rank = (n / 2.0).floor();

    Ok(ModuleOutput::new()
        .param_with(
            "gauge.group",
            format!("SO({})", n),
            ParamStatus::Derived,
            ParamMeta::default().description("unified gauge group"),
        )
        .param("gauge.dim", dim)
        .param("gauge.rank", rank)
        .formula(Formula {
            id: "so-n-dim".to_string(),
            label: "Dimension of SO(n)".to_string(),
            latex: r"\dim SO(n) = n(n-1)/2".to_string(),
            plain_text: "dim = n(n-1)/2".to_string(),
            category: "derived".to_string(),
            input_params: vec!["gauge.so_n".to_string()],
            output_params: vec!["gauge.dim".to_string()],
            ..Default::default()
        })
        .section(
            "gauge",
            SectionContent {
                title: Some("Gauge structure".to_string()),
                blocks: vec![
                    ContentBlock::Param("gauge.group".to_string()),
                    ContentBlock::Formula("so-n-dim".to_string()),
                ],
                formula_refs: vec!["so-n-dim".to_string()],
                param_refs: vec!["gauge.dim".to_string(), "gauge.rank".to_string()],
                ..Default::default()
            },
        ))
}
