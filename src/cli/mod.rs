//! PM-016: CLI subcommands — init, validate, plan, run, modules, verify, status.

use crate::core::contract::ModuleCatalog;
use crate::core::executor::{self, RunOptions, RunReport};
use crate::core::{artifact, parser, registry::Registry, resolver, types};
use crate::ledger::hasher;
use crate::modules;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "paramreg",
    version,
    about = "Parameter registry and simulation orchestration — declared dependencies, provenance, BLAKE3 artifacts"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new paramreg project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate paramreg.yaml and resolve the module graph
    Validate {
        /// Path to paramreg.yaml
        #[arg(short, long, default_value = "paramreg.yaml")]
        file: PathBuf,
    },

    /// Show the resolved execution order
    Plan {
        /// Path to paramreg.yaml
        #[arg(short, long, default_value = "paramreg.yaml")]
        file: PathBuf,
    },

    /// Seed, resolve, execute, audit and export
    Run {
        /// Path to paramreg.yaml
        #[arg(short, long, default_value = "paramreg.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Worker threads (overrides policy.workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Skip writing the artifact
        #[arg(long)]
        no_export: bool,
    },

    /// List the built-in modules
    Modules,

    /// Recompute the artifact digest (tamper detection)
    Verify {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Summarize the saved artifact
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file } => cmd_plan(&file),
        Commands::Run {
            file,
            state_dir,
            workers,
            no_export,
        } => cmd_run(&file, &state_dir, workers, !no_export),
        Commands::Modules => cmd_modules(),
        Commands::Verify { state_dir } => cmd_verify(&state_dir),
        Commands::Status { state_dir } => cmd_status(&state_dir),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "paramreg", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn catalog() -> Result<ModuleCatalog, String> {
    modules::builtin_catalog().map_err(|e| e.to_string())
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("paramreg.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"version: "1.0"
name: my-registry
description: "Managed by paramreg"

bootstrap:
  topology.b3:
    value: 24
    status: established
    description: "third Betti number"
  gauge.so_n:
    value: 10

modules: []

policy:
  failure: continue_independent
  workers: 1
  wall_clock_secs: 3600
  event_log: true
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized paramreg project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Parse and validate a config file, returning errors if invalid.
fn parse_and_validate(
    file: &Path,
    catalog: &ModuleCatalog,
) -> Result<types::RegistryConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config, catalog);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

/// Resolve the selected modules against the bootstrap, printing every graph error.
fn resolve_plan(
    config: &types::RegistryConfig,
    catalog: ModuleCatalog,
) -> Result<(ModuleCatalog, resolver::ExecutionPlan), String> {
    let catalog = catalog.select(&config.modules).map_err(|e| e.to_string())?;
    let bootstrap: Registry = executor::seed_registry(config).map_err(|e| e.to_string())?;
    match resolver::resolve(&catalog, &bootstrap) {
        Ok(plan) => Ok((catalog, plan)),
        Err(failure) => {
            for e in &failure.0 {
                eprintln!("  ERROR: {}", e);
            }
            Err(failure.to_string())
        }
    }
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let catalog = catalog()?;
    let config = parse_and_validate(file, &catalog)?;
    let (catalog, plan) = resolve_plan(&config, catalog)?;
    println!(
        "OK: {} ({} bootstrap params, {} modules, {} levels)",
        config.name,
        config.bootstrap.len(),
        catalog.len(),
        plan.levels.len()
    );
    Ok(())
}

fn cmd_plan(file: &Path) -> Result<(), String> {
    let catalog = catalog()?;
    let config = parse_and_validate(file, &catalog)?;
    let (catalog, plan) = resolve_plan(&config, catalog)?;

    println!("Planning: {} ({} modules)", config.name, plan.len());
    println!();
    for (depth, level) in plan.levels.iter().enumerate() {
        println!("level {}:", depth);
        for &i in level {
            let decl = catalog.modules()[i].declaration();
            println!(
                "  {} <- [{}] -> [{}]",
                decl.id,
                decl.required_inputs.join(", "),
                decl.output_params.join(", ")
            );
        }
    }
    println!();
    println!("Order: {}", plan.order_ids().join(" -> "));
    Ok(())
}

fn cmd_run(
    file: &Path,
    state_dir: &Path,
    workers: Option<usize>,
    export: bool,
) -> Result<(), String> {
    let catalog = catalog()?;
    let config = parse_and_validate(file, &catalog)?;

    let opts = RunOptions {
        state_dir: Some(state_dir),
        export,
        workers,
    };
    let report = match executor::run(&config, catalog, &opts) {
        Ok(report) => report,
        Err(executor_err) => {
            if let crate::core::error::PipelineError::Resolve(ref failure) = executor_err {
                for e in &failure.0 {
                    eprintln!("  ERROR: {}", e);
                }
            }
            return Err(executor_err.to_string());
        }
    };

    print_report(&report);

    if report.success() {
        Ok(())
    } else if report.summary.failed > 0 || !report.summary.errors.is_empty() {
        Err(format!("{} module error(s)", report.summary.errors.len()))
    } else {
        Err("audit failed".to_string())
    }
}

fn print_report(report: &RunReport) {
    println!("Run {}:", report.run_id);
    for outcome in &report.summary.outcomes {
        let detail = if outcome.blocked_by.is_empty() {
            String::new()
        } else {
            format!(" (blocked by {})", outcome.blocked_by.join(", "))
        };
        println!(
            "  {}: {}{} ({:.2}s)",
            outcome.module, outcome.status, detail, outcome.duration_seconds
        );
    }
    for e in &report.summary.errors {
        eprintln!("  ERROR [{}]: {}", e.kind(), e);
    }

    let t = &report.audit.tallies;
    println!();
    println!(
        "Audit: provenance {}/{}, validation {}/{}, formula {}/{} passed",
        t.provenance.passed,
        t.provenance.passed + t.provenance.failed,
        t.validation.passed,
        t.validation.passed + t.validation.failed,
        t.formula.passed,
        t.formula.passed + t.formula.failed,
    );
    for f in report.audit.failures() {
        eprintln!("  FAILED [{}] {}: {}", f.category, f.subject, f.message);
    }
    if let Some(ref path) = report.artifact_path {
        println!("Artifact: {}", path.display());
    }

    println!();
    println!(
        "Run complete: {} done, {} failed, {} skipped ({:.1}s).",
        report.summary.done,
        report.summary.failed,
        report.summary.skipped,
        report.summary.total_duration.as_secs_f64()
    );
}

fn cmd_modules() -> Result<(), String> {
    let catalog = catalog()?;
    println!("Built-in modules ({}):", catalog.len());
    for module in catalog.modules() {
        let decl = module.declaration();
        println!("  {} v{} [{}]", decl.id, decl.version, decl.domain);
        println!("    requires: {}", decl.required_inputs.join(", "));
        println!("    produces: {}", decl.output_params.join(", "));
        if !decl.output_formulas.is_empty() {
            println!("    formulas: {}", decl.output_formulas.join(", "));
        }
    }
    Ok(())
}

fn load_required(state_dir: &Path) -> Result<artifact::RunArtifact, String> {
    artifact::load_artifact(state_dir)?.ok_or_else(|| {
        format!(
            "no artifact in {}. Run `paramreg run` first.",
            state_dir.display()
        )
    })
}

fn cmd_verify(state_dir: &Path) -> Result<(), String> {
    let doc = load_required(state_dir)?;
    let check = artifact::verify_artifact(&doc)?;
    if check.is_intact() {
        println!("OK: {} ({})", doc.name, check.recorded);
        Ok(())
    } else {
        println!("TAMPERED: {}", artifact::artifact_path(state_dir).display());
        println!("  Recorded: {}", check.recorded);
        println!("  Computed: {}", check.computed);
        Err("artifact digest mismatch".to_string())
    }
}

fn cmd_status(state_dir: &Path) -> Result<(), String> {
    let Some(doc) = artifact::load_artifact(state_dir)? else {
        println!("No artifact found. Run `paramreg run` first.");
        return Ok(());
    };
    let file_hash = hasher::hash_file(&artifact::artifact_path(state_dir))?;

    println!("Run: {} ({})", doc.name, doc.run_id);
    println!("  Generated: {}", doc.generated_at);
    println!("  Generator: {}", doc.generator);
    println!("  Digest:    {}", doc.digest);
    println!("  File:      {}", file_hash);
    println!(
        "  Modules:   {} done, {} failed, {} skipped",
        doc.summary.done, doc.summary.failed, doc.summary.skipped
    );
    println!(
        "  Audit:     {}",
        if doc.audit.overall_pass { "PASS" } else { "FAIL" }
    );
    println!("  Params:    {}", doc.params.len());
    for p in &doc.params {
        let verdict = p.verdict.map(|v| format!(" [{}]", v)).unwrap_or_default();
        println!(
            "    {} = {} ({}, {}){}",
            p.entry.path, p.entry.value, p.entry.status, p.entry.source, verdict
        );
    }
    Ok(())
}
