//! PM-006: Executor — orchestration loop for a run.
//!
//! seed bootstrap → resolve → for each ready module: validate → run → inject
//! → audit → export. Module failures prune their dependents and the rest of
//! the graph keeps going; graph errors abort before anything runs.

use super::artifact;
use super::auditor::{self, AuditReport};
use super::contract::{ModuleCatalog, ModuleDescriptor, ModuleOutput};
use super::error::{ModuleError, PipelineError};
use super::registry::Registry;
use super::resolver::{self, ExecutionPlan};
use super::types::*;
use crate::ledger::eventlog::{self, EventLog};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Knobs for one execution pass.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub failure: FailurePolicy,
    pub wall_clock: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_policy(&Policy::default())
    }
}

impl ExecutorConfig {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            workers: policy.workers.max(1),
            failure: policy.failure,
            wall_clock: Duration::from_secs(policy.wall_clock_secs),
        }
    }
}

/// Outcome of starting a module.
enum Begin {
    Run,
    /// Not started; carries successors that became ready
    Skipped(Vec<usize>),
}

/// Bookkeeping shared by the sequential loop and the worker pool.
struct Scheduler<'a> {
    plan: &'a ExecutionPlan,
    in_degree: Vec<usize>,
    status: Vec<ModuleStatus>,
    errors: Vec<Option<ModuleError>>,
    /// Root failed modules behind each skip
    blocked_by: Vec<BTreeSet<usize>>,
    durations: Vec<f64>,
    /// Set under `stop_on_first` once a module fails
    halted_by: Option<usize>,
    /// First module refused by the wall-clock guard
    timed_out_at: Option<usize>,
    failure: FailurePolicy,
    started: Instant,
    limit: Duration,
    log: Option<&'a EventLog>,
}

impl<'a> Scheduler<'a> {
    fn new(plan: &'a ExecutionPlan, cfg: &ExecutorConfig, log: Option<&'a EventLog>) -> Self {
        let n = plan.len();
        Self {
            plan,
            in_degree: plan.predecessors.iter().map(Vec::len).collect(),
            status: vec![ModuleStatus::Pending; n],
            errors: vec![None; n],
            blocked_by: vec![BTreeSet::new(); n],
            durations: vec![0.0; n],
            halted_by: None,
            timed_out_at: None,
            failure: cfg.failure,
            started: Instant::now(),
            limit: cfg.wall_clock,
            log,
        }
    }

    fn id(&self, i: usize) -> &'a str {
        &self.plan.ids[i]
    }

    fn initial_ready(&self) -> Vec<usize> {
        (0..self.plan.len())
            .filter(|&i| self.in_degree[i] == 0)
            .collect()
    }

    fn set_status(&mut self, i: usize, status: ModuleStatus) {
        debug!(module = self.id(i), from = %self.status[i], to = %status, "transition");
        self.status[i] = status;
    }

    /// Claim a ready module, or skip it when the run is halted or out of time.
    fn begin(&mut self, i: usize) -> Begin {
        if let Some(culprit) = self.halted_by {
            let reason = format!("halted after failure of {}", self.id(culprit));
            self.blocked_by[i] = BTreeSet::from([culprit]);
            return Begin::Skipped(self.skip(i, reason));
        }
        if let Some(first) = self.timed_out_at {
            self.blocked_by[i] = BTreeSet::from([first]);
            return Begin::Skipped(self.skip(i, "timeout".to_string()));
        }
        if self.started.elapsed() >= self.limit {
            let limit_secs = self.limit.as_secs();
            warn!(module = self.id(i), limit_secs, "wall-clock limit exceeded");
            self.errors[i] = Some(ModuleError::Timeout {
                module: self.id(i).to_string(),
                limit_secs,
            });
            self.timed_out_at = Some(i);
            self.blocked_by[i] = BTreeSet::from([i]);
            return Begin::Skipped(self.skip(i, "timeout".to_string()));
        }

        self.set_status(i, ModuleStatus::Validating);
        if let Some(log) = self.log {
            log.record(RunEvent::ModuleStarted {
                run_id: log.run_id().to_string(),
                module: self.id(i).to_string(),
            });
        }
        Begin::Run
    }

    /// Record a finished module and release its successors.
    fn finish(
        &mut self,
        i: usize,
        result: Result<usize, ModuleError>,
        elapsed: Duration,
    ) -> Vec<usize> {
        self.durations[i] = elapsed.as_secs_f64();
        match result {
            Ok(outputs) => {
                self.set_status(i, ModuleStatus::Done);
                info!(module = self.id(i), outputs, "module done");
                if let Some(log) = self.log {
                    log.record(RunEvent::ModuleDone {
                        run_id: log.run_id().to_string(),
                        module: self.id(i).to_string(),
                        outputs,
                        duration_seconds: self.durations[i],
                    });
                }
            }
            Err(e) => {
                self.set_status(i, ModuleStatus::Failed);
                warn!(module = self.id(i), error = %e, "module failed");
                if let Some(log) = self.log {
                    log.record(RunEvent::ModuleFailed {
                        run_id: log.run_id().to_string(),
                        module: self.id(i).to_string(),
                        error: e.to_string(),
                    });
                }
                self.errors[i] = Some(e);
                if self.failure == FailurePolicy::StopOnFirst && self.halted_by.is_none() {
                    self.halted_by = Some(i);
                }
            }
        }
        self.release(i)
    }

    /// Mark a module skipped and release its successors.
    fn skip(&mut self, i: usize, reason: String) -> Vec<usize> {
        self.set_status(i, ModuleStatus::Skipped);
        debug!(module = self.id(i), %reason, "module skipped");
        if let Some(log) = self.log {
            log.record(RunEvent::ModuleSkipped {
                run_id: log.run_id().to_string(),
                module: self.id(i).to_string(),
                reason,
            });
        }
        self.release(i)
    }

    /// Decrement successors' in-degree. Successors of a failed or skipped
    /// module are skipped in turn; the rest come back as ready.
    fn release(&mut self, i: usize) -> Vec<usize> {
        let plan = self.plan;
        let mut ready = Vec::new();
        let mut stack = vec![i];
        while let Some(current) = stack.pop() {
            for &next in &plan.successors[current] {
                self.in_degree[next] -= 1;
                if self.in_degree[next] != 0 {
                    continue;
                }
                let roots = self.blocking_roots(next);
                if roots.is_empty() {
                    ready.push(next);
                    continue;
                }
                let names: Vec<&str> = roots.iter().map(|&r| self.id(r)).collect();
                let reason = format!("blocked by {}", names.join(", "));
                self.blocked_by[next] = roots;
                self.set_status(next, ModuleStatus::Skipped);
                if let Some(log) = self.log {
                    log.record(RunEvent::ModuleSkipped {
                        run_id: log.run_id().to_string(),
                        module: self.id(next).to_string(),
                        reason,
                    });
                }
                stack.push(next);
            }
        }
        ready.sort_unstable();
        ready
    }

    /// Root failures among a module's predecessors.
    fn blocking_roots(&self, i: usize) -> BTreeSet<usize> {
        let mut roots = BTreeSet::new();
        for &p in &self.plan.predecessors[i] {
            match self.status[p] {
                ModuleStatus::Failed => {
                    roots.insert(p);
                }
                ModuleStatus::Skipped => roots.extend(self.blocked_by[p].iter().copied()),
                _ => {}
            }
        }
        roots
    }

    fn into_summary(self) -> RunSummary {
        let mut summary = RunSummary {
            total_duration: self.started.elapsed(),
            ..Default::default()
        };
        for (i, error) in self.errors.into_iter().enumerate() {
            let status = self.status[i];
            match status {
                ModuleStatus::Done => summary.done += 1,
                ModuleStatus::Failed => summary.failed += 1,
                ModuleStatus::Skipped => summary.skipped += 1,
                _ => {}
            }
            if let Some(ref e) = error {
                summary.errors.push(e.clone());
            }
            let blocked_by = if status == ModuleStatus::Skipped {
                self.blocked_by[i]
                    .iter()
                    .filter(|&&r| r != i)
                    .map(|&r| self.plan.ids[r].clone())
                    .collect()
            } else {
                Vec::new()
            };
            summary.outcomes.push(ModuleOutcome {
                module: self.plan.ids[i].clone(),
                status,
                error,
                blocked_by,
                duration_seconds: self.durations[i],
            });
        }
        // Registration order is preserved by the loop; stable sort on kind
        // only reorders errors of the same module.
        summary
            .errors
            .sort_by_key(|e| (self.plan.ids.iter().position(|id| id == e.module()), e.kind_rank()));
        summary
    }
}

/// Validate and run one module against a read-only registry.
fn compute(
    module: &ModuleDescriptor,
    registry: &Registry,
    mut on_status: impl FnMut(ModuleStatus),
) -> Result<ModuleOutput, ModuleError> {
    module.validate_inputs(registry)?;
    on_status(ModuleStatus::Running);
    let output = module.run(registry)?;
    module.check_outputs(&output)?;
    Ok(output)
}

/// Write a module's output into the registry. All-or-nothing: every write is
/// checked before the first one lands.
fn inject(
    module: &ModuleDescriptor,
    output: ModuleOutput,
    registry: &mut Registry,
) -> Result<usize, ModuleError> {
    let source = module.id();
    let wrap = |cause| ModuleError::Injection {
        module: source.to_string(),
        cause,
    };

    for (path, param) in &output.params {
        registry
            .check_param(path, &param.value, source, &param.meta)
            .map_err(wrap)?;
    }
    for formula in &output.formulas {
        registry.check_formula(&formula.id, source).map_err(wrap)?;
    }
    for (section_id, content) in &output.sections {
        registry
            .check_section(section_id, content.title.as_deref(), source)
            .map_err(wrap)?;
    }

    let written = output.params.len();
    for (path, param) in output.params {
        registry
            .set_param(&path, param.value, source, param.status, param.meta)
            .map_err(wrap)?;
    }
    for formula in output.formulas {
        registry.add_formula(formula, source).map_err(wrap)?;
    }
    for (section_id, content) in output.sections {
        registry
            .add_section_content(&section_id, content, source)
            .map_err(wrap)?;
    }
    Ok(written)
}

/// Execute every module of a resolved plan against the registry.
///
/// `plan` must have been resolved from `catalog`.
pub fn execute(
    catalog: &ModuleCatalog,
    plan: &ExecutionPlan,
    registry: &mut Registry,
    cfg: &ExecutorConfig,
    log: Option<&EventLog>,
) -> RunSummary {
    if cfg.workers > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(cfg.workers).build() {
            Ok(pool) => return execute_parallel(&pool, catalog, plan, registry, cfg, log),
            Err(e) => warn!(error = %e, "thread pool unavailable, running sequentially"),
        }
    }
    execute_sequential(catalog, plan, registry, cfg, log)
}

fn execute_sequential(
    catalog: &ModuleCatalog,
    plan: &ExecutionPlan,
    registry: &mut Registry,
    cfg: &ExecutorConfig,
    log: Option<&EventLog>,
) -> RunSummary {
    let mut sched = Scheduler::new(plan, cfg, log);
    let mut queue: VecDeque<usize> = sched.initial_ready().into();

    while let Some(i) = queue.pop_front() {
        if let Begin::Skipped(ready) = sched.begin(i) {
            queue.extend(ready);
            continue;
        }
        let module = &catalog.modules()[i];
        let start = Instant::now();
        let result = compute(module, registry, |s| sched.set_status(i, s)).and_then(|output| {
            sched.set_status(i, ModuleStatus::Injecting);
            inject(module, output, registry)
        });
        queue.extend(sched.finish(i, result, start.elapsed()));
    }

    sched.into_summary()
}

struct Shared<'a> {
    catalog: &'a ModuleCatalog,
    registry: RwLock<Registry>,
    sched: Mutex<Scheduler<'a>>,
}

fn execute_parallel(
    pool: &rayon::ThreadPool,
    catalog: &ModuleCatalog,
    plan: &ExecutionPlan,
    registry: &mut Registry,
    cfg: &ExecutorConfig,
    log: Option<&EventLog>,
) -> RunSummary {
    let shared = Shared {
        catalog,
        registry: RwLock::new(std::mem::take(registry)),
        sched: Mutex::new(Scheduler::new(plan, cfg, log)),
    };
    let roots = shared
        .sched
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .initial_ready();

    pool.scope(|scope| {
        for i in roots {
            spawn_module(scope, &shared, i);
        }
    });

    *registry = shared
        .registry
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    shared
        .sched
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_summary()
}

fn spawn_module<'s, 'a: 's>(scope: &rayon::Scope<'s>, shared: &'s Shared<'a>, i: usize) {
    scope.spawn(move |scope| {
        let lock_sched = || shared.sched.lock().unwrap_or_else(PoisonError::into_inner);

        let begin = lock_sched().begin(i);
        if let Begin::Skipped(ready) = begin {
            for j in ready {
                spawn_module(scope, shared, j);
            }
            return;
        }

        let module = &shared.catalog.modules()[i];
        let start = Instant::now();
        let computed = {
            let registry = shared.registry.read().unwrap_or_else(PoisonError::into_inner);
            compute(module, &registry, |s| lock_sched().set_status(i, s))
        };

        let ready = match computed {
            Ok(output) => {
                // Single writer: injection and in-degree bookkeeping together
                let mut registry = shared.registry.write().unwrap_or_else(PoisonError::into_inner);
                lock_sched().set_status(i, ModuleStatus::Injecting);
                let result = inject(module, output, &mut registry);
                let ready = lock_sched().finish(i, result, start.elapsed());
                drop(registry);
                ready
            }
            Err(e) => lock_sched().finish(i, Err(e), start.elapsed()),
        };

        for j in ready {
            spawn_module(scope, shared, j);
        }
    });
}

// ============================================================================
// Full run
// ============================================================================

/// Where a run writes its event log and artifact.
#[derive(Debug, Clone, Default)]
pub struct RunOptions<'a> {
    pub state_dir: Option<&'a Path>,
    /// Write the artifact into `state_dir`
    pub export: bool,
    /// Overrides `policy.workers`
    pub workers: Option<usize>,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub registry: Registry,
    pub plan: ExecutionPlan,
    pub summary: RunSummary,
    pub audit: AuditReport,
    pub artifact_path: Option<PathBuf>,
}

impl RunReport {
    /// Exit contract: no module failed, nothing timed out, audit passed.
    pub fn success(&self) -> bool {
        self.summary.failed == 0 && self.summary.errors.is_empty() && self.audit.overall_pass
    }
}

/// Seed the bootstrap constants into a fresh registry.
pub fn seed_registry(config: &RegistryConfig) -> Result<Registry, PipelineError> {
    let mut registry = Registry::new(config.policy.conflict_tolerance);
    for (path, param) in &config.bootstrap {
        registry.seed(path, param.value.clone(), param.status, param.meta())?;
    }
    Ok(registry)
}

/// Run one full pass: seed, resolve, execute, audit and optionally export.
pub fn run(
    config: &RegistryConfig,
    catalog: ModuleCatalog,
    opts: &RunOptions,
) -> Result<RunReport, PipelineError> {
    let catalog = catalog.select(&config.modules)?;
    let mut registry = seed_registry(config)?;
    let plan = resolver::resolve(&catalog, &registry)?;

    let run_id = eventlog::generate_run_id();
    let log = match opts.state_dir {
        Some(dir) if config.policy.event_log => Some(EventLog::new(dir, &run_id)),
        _ => None,
    };
    info!(run_id = %run_id, name = %config.name, modules = catalog.len(), "run started");
    if let Some(ref log) = log {
        log.record(RunEvent::RunStarted {
            run_id: run_id.clone(),
            name: config.name.clone(),
            modules: catalog.len(),
            paramreg_version: env!("CARGO_PKG_VERSION").to_string(),
        });
    }

    let mut cfg = ExecutorConfig::from_policy(&config.policy);
    if let Some(workers) = opts.workers {
        cfg.workers = workers.max(1);
    }
    let summary = execute(&catalog, &plan, &mut registry, &cfg, log.as_ref());

    if let Some(ref log) = log {
        log.record(RunEvent::RunCompleted {
            run_id: run_id.clone(),
            done: summary.done,
            failed: summary.failed,
            skipped: summary.skipped,
            total_seconds: summary.total_duration.as_secs_f64(),
        });
    }
    info!(
        done = summary.done,
        failed = summary.failed,
        skipped = summary.skipped,
        "run completed"
    );

    let audit = auditor::audit(&registry, &auditor::AuditPolicy::from_policy(&config.policy));

    let artifact_path = match opts.state_dir {
        Some(dir) if opts.export => {
            let doc = artifact::build(&config.name, &run_id, &registry, &summary, &audit)
                .map_err(PipelineError::Export)?;
            Some(artifact::save_artifact(dir, &doc).map_err(PipelineError::Export)?)
        }
        _ => None,
    };

    Ok(RunReport {
        run_id,
        registry,
        plan,
        summary,
        audit,
        artifact_path,
    })
}
