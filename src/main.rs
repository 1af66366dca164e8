use std::error::Error;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use testsmith::{
    config::{Args, Config},
    llm::client::LlmClient,
    locator::Locator,
    logger::{log, log_fields},
    machine::{Orchestrator, Settings},
    report::RunSummary,
    state::{LogLevel, RunState},
    testgen::{store::ArtifactStore, validate::GradleRunner},
};

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("testsmith: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, Box<dyn Error>> {
    let config = Config::load(&args)?;
    let mut state = RunState::new(config.echo);

    let root = config.project_root.display().to_string();
    let provider = config.llm.provider.to_string();
    log_fields(
        &mut state,
        LogLevel::Info,
        "starting run",
        &[
            ("project", root.as_str()),
            ("provider", provider.as_str()),
            ("model", config.llm.model.as_str()),
        ],
    );

    let locator = Locator::new(config.source_extension.clone(), config.exclude.clone());
    let units = locator.discover(&mut state, &config.source_root(), config.class_filter.as_deref());

    if units.is_empty() {
        return match &config.class_filter {
            Some(name) => {
                log(&mut state, LogLevel::Error, format!("No source unit named {name}"));
                Ok(ExitCode::FAILURE)
            }
            None => {
                log(&mut state, LogLevel::Info, "No source units found; nothing to do.");
                Ok(ExitCode::SUCCESS)
            }
        };
    }

    log(&mut state, LogLevel::Info, format!("Found {} source unit(s).", units.len()));

    let client = LlmClient::new(config.llm.clone())?;
    let runner = GradleRunner::new(config.build_tool.clone(), config.build_timeout);
    let store = ArtifactStore::new(
        config.project_root.clone(),
        config.test_root.clone(),
        config.artifact_extension.clone(),
    );
    let settings = Settings {
        project_root: config.project_root.clone(),
        request_delay: config.request_delay,
        fence_mode: config.fence_mode,
        deadline: config.deadline,
    };

    let mut orchestrator = Orchestrator::new(client, runner, store, settings);
    let summary = orchestrator.run(&mut state, &units);

    print!("{}", summary.render());

    if let Some(path) = &config.report {
        write_report(&mut state, &summary, path);
    }

    Ok(ExitCode::SUCCESS)
}

/// The run already completed; a report that cannot be written is only logged.
fn write_report(state: &mut RunState, summary: &RunSummary, path: &Path) -> bool {
    match summary.write_json(path) {
        Ok(()) => {
            log(state, LogLevel::Success, format!("Report written to {}", path.display()));
            true
        }
        Err(e) => {
            log(
                state,
                LogLevel::Error,
                format!("Could not write report {}: {e}", path.display()),
            );
            false
        }
    }
}
