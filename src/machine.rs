//! machine.rs
//!
//! Per-unit generate -> store -> validate pipeline, with at most one
//! repair pass on compile failure.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::llm::client::{prompt_hash, GenerationResult, TextGenerator};
use crate::llm::prompt::{build_generation_prompt, build_repair_prompt, GenerationRequest, RequestKind};
use crate::locator::SourceUnit;
use crate::logger::{log, log_fields};
use crate::report::{RunSummary, UnitReport};
use crate::state::{LogLevel, Phase, RunState, UnitOutcome};
use crate::testgen::parse::{extract_artifacts, Artifact, FenceMode};
use crate::testgen::store::ArtifactStore;
use crate::testgen::validate::{log_tail, TestRunner, ValidationOutcome, ValidationStatus};

/// Longest build log tail carried into a repair prompt.
const REPAIR_LOG_LIMIT: usize = 10_000;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub project_root: PathBuf,
    /// Minimum spacing between two generation calls.
    pub request_delay: Duration,
    pub fence_mode: FenceMode,
    /// Units not started within this budget are reported cancelled.
    pub deadline: Option<Duration>,
}

/// Bookkeeping for the unit currently moving through the machine.
struct UnitRun<'a> {
    unit: &'a SourceUnit,
    phase: Phase,
    calls: u32,
    build_ms: u64,
    artifact: Option<PathBuf>,
    detail: Option<String>,
}

enum StoreError {
    Unresolved(String),
    Io(io::Error),
}

pub struct Orchestrator<G, R> {
    generator: G,
    runner: R,
    store: ArtifactStore,
    settings: Settings,
    cancel: CancelToken,
    last_request: Option<Instant>,
}

impl<G: TextGenerator, R: TestRunner> Orchestrator<G, R> {
    pub fn new(generator: G, runner: R, store: ArtifactStore, settings: Settings) -> Self {
        Self {
            generator,
            runner,
            store,
            settings,
            cancel: CancelToken::new(),
            last_request: None,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Process units one at a time, in order. A failing unit never stops the run.
    pub fn run(&mut self, state: &mut RunState, units: &[SourceUnit]) -> RunSummary {
        let started_at = Local::now();
        let started = Instant::now();
        let mut reports = Vec::with_capacity(units.len());

        for unit in units {
            if let Some(deadline) = self.settings.deadline {
                if started.elapsed() >= deadline && !self.cancel.is_cancelled() {
                    log(state, LogLevel::Warn, "Run deadline reached; remaining units are skipped.");
                    self.cancel.cancel();
                }
            }

            if self.cancel.is_cancelled() {
                reports.push(UnitReport::cancelled(unit));
                continue;
            }

            reports.push(self.process_unit(state, unit));
        }

        log(state, LogLevel::Info, "All units processed.");
        RunSummary::new(started_at, reports)
    }

    pub fn process_unit(&mut self, state: &mut RunState, unit: &SourceUnit) -> UnitReport {
        log(
            state,
            LogLevel::Info,
            format!("Processing {} ({})", unit.name, unit.path.display()),
        );

        let mut run = UnitRun {
            unit,
            phase: Phase::Idle,
            calls: 0,
            build_ms: 0,
            artifact: None,
            detail: None,
        };

        while !run.phase.is_done() {
            self.step(state, &mut run);
        }

        let outcome = match run.phase {
            Phase::Done(o) => o,
            _ => UnitOutcome::Cancelled,
        };

        let calls = run.calls.to_string();
        log_fields(
            state,
            outcome.level(),
            format!("{} finished: {}", unit.name, outcome),
            &[("calls", calls.as_str())],
        );

        UnitReport {
            unit: unit.name.clone(),
            source: unit.path.clone(),
            outcome,
            artifact: run.artifact,
            generation_calls: run.calls,
            build_ms: run.build_ms,
            detail: run.detail,
        }
    }

    fn step(&mut self, state: &mut RunState, run: &mut UnitRun) {
        let next = match std::mem::replace(&mut run.phase, Phase::Idle) {
            Phase::Idle => self.generate_initial(state, run),

            Phase::Generated { raw } => match self.store_response(state, &raw, None) {
                Ok((artifact, path)) => {
                    run.artifact = Some(path.clone());
                    Phase::Stored { artifact, path }
                }
                Err(StoreError::Unresolved(why)) => {
                    fail(state, run, "parse", format!("unparseable response: {why}"));
                    Phase::Done(UnitOutcome::UnparseableResponse)
                }
                Err(StoreError::Io(e)) => {
                    fail(state, run, "store", format!("could not write test: {e}"));
                    Phase::Done(UnitOutcome::StoreFailure)
                }
            },

            Phase::Stored { artifact, path } => {
                let outcome = self.validate(state, run, &artifact);
                Phase::Validated { path, outcome }
            }

            Phase::Validated { path, outcome } => match outcome.status {
                ValidationStatus::Pass => Phase::Done(UnitOutcome::Pass),
                ValidationStatus::AssertionFailure => {
                    run.detail = Some(format!("exit code {}", outcome.exit_code));
                    Phase::Done(UnitOutcome::AssertionFailure)
                }
                ValidationStatus::ToolingFailure => {
                    fail(state, run, "validate", log_tail(&outcome.log, 300));
                    Phase::Done(UnitOutcome::ToolingFailure)
                }
                ValidationStatus::CompileFailure => {
                    log(
                        state,
                        LogLevel::Warn,
                        format!("{}: compile failure, requesting repair", run.unit.name),
                    );
                    Phase::Repairing { path, outcome }
                }
            },

            Phase::Repairing { path, outcome } => self.generate_repair(state, run, path, &outcome),

            Phase::RepairGenerated { raw, previous } => {
                match self.store_response(state, &raw, Some(&previous)) {
                    Ok((artifact, path)) => {
                        run.artifact = Some(path);
                        Phase::RepairStored { artifact }
                    }
                    Err(StoreError::Unresolved(why)) => {
                        fail(state, run, "repair-parse", format!("unparseable repair: {why}"));
                        Phase::Done(UnitOutcome::CompileFailureUnrepaired)
                    }
                    Err(StoreError::Io(e)) => {
                        fail(state, run, "repair-store", format!("could not write repair: {e}"));
                        Phase::Done(UnitOutcome::StoreFailure)
                    }
                }
            }

            Phase::RepairStored { artifact } => {
                let outcome = self.validate(state, run, &artifact);
                Phase::RepairValidated { outcome }
            }

            Phase::RepairValidated { outcome } => match outcome.status {
                ValidationStatus::Pass => Phase::Done(UnitOutcome::RepairedPass),
                ValidationStatus::AssertionFailure => {
                    run.detail = Some(format!("exit code {} after repair", outcome.exit_code));
                    Phase::Done(UnitOutcome::AssertionFailure)
                }
                ValidationStatus::ToolingFailure => {
                    fail(state, run, "repair-validate", log_tail(&outcome.log, 300));
                    Phase::Done(UnitOutcome::ToolingFailure)
                }
                ValidationStatus::CompileFailure => {
                    run.detail = Some("repaired test still does not compile".into());
                    Phase::Done(UnitOutcome::CompileFailureUnrepaired)
                }
            },

            done @ Phase::Done(_) => done,
        };

        run.phase = next;
    }

    /* ---------- transitions ---------- */

    fn generate_initial(&mut self, state: &mut RunState, run: &mut UnitRun) -> Phase {
        if self.cancel.is_cancelled() {
            return Phase::Done(UnitOutcome::Cancelled);
        }

        let request = build_generation_prompt(&run.unit.text);
        match self.call(state, run, &request) {
            Ok(raw) => Phase::Generated { raw },
            Err(e) => {
                fail(state, run, "generate", e.to_string());
                Phase::Done(UnitOutcome::GenerationFailure)
            }
        }
    }

    fn generate_repair(
        &mut self,
        state: &mut RunState,
        run: &mut UnitRun,
        path: PathBuf,
        outcome: &ValidationOutcome,
    ) -> Phase {
        if self.cancel.is_cancelled() {
            run.detail = Some("cancelled before repair".into());
            return Phase::Done(UnitOutcome::CompileFailureUnrepaired);
        }

        let current = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                fail(state, run, "repair", format!("could not read {}: {e}", path.display()));
                return Phase::Done(UnitOutcome::StoreFailure);
            }
        };

        let request = build_repair_prompt(&log_tail(&outcome.log, REPAIR_LOG_LIMIT), &current);
        match self.call(state, run, &request) {
            Ok(raw) => Phase::RepairGenerated { raw, previous: path },
            Err(e) => {
                fail(state, run, "repair-generate", e.to_string());
                Phase::Done(UnitOutcome::CompileFailureUnrepaired)
            }
        }
    }

    /* ---------- collaborators ---------- */

    fn call(&mut self, state: &mut RunState, run: &mut UnitRun, request: &GenerationRequest) -> GenerationResult {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.settings.request_delay {
                thread::sleep(self.settings.request_delay - elapsed);
            }
        }

        let kind = match request.kind {
            RequestKind::Initial => "initial",
            RequestKind::Repair => "repair",
        };
        let hash = prompt_hash(&request.prompt);
        log_fields(
            state,
            LogLevel::Info,
            "requesting generation",
            &[("unit", run.unit.name.as_str()), ("kind", kind), ("prompt", hash.as_str())],
        );

        run.calls += 1;
        let result = self.generator.generate(request);
        self.last_request = Some(Instant::now());

        result
    }

    /// Parse a response and persist every resolvable artifact it yields.
    /// The first resolvable one is returned. The first artifact that lands
    /// on `replace_at` overwrites it; later ones merge as usual.
    fn store_response(
        &self,
        state: &mut RunState,
        raw: &str,
        replace_at: Option<&Path>,
    ) -> Result<(Artifact, PathBuf), StoreError> {
        let mut primary = None;
        let mut misses = Vec::new();
        let mut replace_at = replace_at;

        for result in extract_artifacts(raw, self.settings.fence_mode) {
            match result {
                Ok(artifact) => {
                    let path = self.persist(state, &artifact, replace_at).map_err(StoreError::Io)?;
                    if replace_at == Some(path.as_path()) {
                        replace_at = None;
                    }
                    if primary.is_none() {
                        primary = Some((artifact, path));
                    }
                }
                Err(unresolved) => misses.push(unresolved.to_string()),
            }
        }

        primary.ok_or_else(|| StoreError::Unresolved(misses.join("; ")))
    }

    fn persist(&self, state: &mut RunState, artifact: &Artifact, replace_at: Option<&Path>) -> io::Result<PathBuf> {
        if let Some(previous) = replace_at {
            let path = self.store.resolve(artifact)?;
            if path == previous {
                self.store.replace(state, &path, &artifact.body)?;
                return Ok(path);
            }
        }

        self.store.save(state, artifact)
    }

    fn validate(&self, state: &mut RunState, run: &mut UnitRun, artifact: &Artifact) -> ValidationOutcome {
        let test = artifact.qualified_name();
        log_fields(state, LogLevel::Info, "running test", &[("test", test.as_str())]);

        let outcome = self
            .runner
            .run_test(&self.settings.project_root, &artifact.namespace, &artifact.name);
        run.build_ms += outcome.duration_ms;

        let exit = outcome.exit_code.to_string();
        let took = outcome.duration_ms.to_string();

        log_fields(
            state,
            LogLevel::Info,
            "build finished",
            &[
                ("test", test.as_str()),
                ("exit", exit.as_str()),
                ("ms", took.as_str()),
                ("status", status_label(outcome.status)),
            ],
        );

        outcome
    }
}

fn fail(state: &mut RunState, run: &mut UnitRun, stage: &str, detail: String) {
    log_fields(
        state,
        LogLevel::Error,
        detail.clone(),
        &[("unit", run.unit.name.as_str()), ("stage", stage)],
    );
    run.detail = Some(detail);
}

fn status_label(status: ValidationStatus) -> &'static str {
    match status {
        ValidationStatus::Pass => "pass",
        ValidationStatus::AssertionFailure => "assertion-failure",
        ValidationStatus::CompileFailure => "compile-failure",
        ValidationStatus::ToolingFailure => "tooling-failure",
    }
}
