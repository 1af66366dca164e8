use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::testgen::parse::Artifact;
use crate::testgen::validate::ValidationOutcome;

pub const MAX_LOGS: usize = 1000;

/* ---------- logging ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
    pub at: DateTime<Local>,
}

/* ---------- run state ---------- */

pub struct RunState {
    pub logs: VecDeque<LogLine>,
    /// Mirror every record to stderr as it is logged.
    pub echo: bool,
}

impl RunState {
    pub fn new(echo: bool) -> Self {
        Self {
            logs: VecDeque::new(),
            echo,
        }
    }

    pub fn quiet() -> Self {
        Self::new(false)
    }

    pub fn contains_log(&self, needle: &str) -> bool {
        self.logs.iter().any(|l| l.text.contains(needle))
    }
}

/* ---------- per-unit lifecycle ---------- */

/// Pipeline position of a single source unit.
///
/// Only one repair pass exists: `Validated` may branch into `Repairing`,
/// every `Repair*` phase leads straight to `Done`.
#[derive(Debug, Clone)]
pub enum Phase {
    Idle,
    Generated {
        raw: String,
    },
    Stored {
        artifact: Artifact,
        path: PathBuf,
    },
    Validated {
        path: PathBuf,
        outcome: ValidationOutcome,
    },
    Repairing {
        path: PathBuf,
        outcome: ValidationOutcome,
    },
    RepairGenerated {
        raw: String,
        previous: PathBuf,
    },
    RepairStored {
        artifact: Artifact,
    },
    RepairValidated {
        outcome: ValidationOutcome,
    },
    Done(UnitOutcome),
}

impl Phase {
    pub fn is_done(&self) -> bool {
        matches!(self, Phase::Done(_))
    }
}

/// Terminal result for one source unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitOutcome {
    GenerationFailure,
    UnparseableResponse,
    Pass,
    AssertionFailure,
    CompileFailureUnrepaired,
    RepairedPass,
    ToolingFailure,
    StoreFailure,
    Cancelled,
}

impl UnitOutcome {
    pub const ALL: [UnitOutcome; 9] = [
        UnitOutcome::Pass,
        UnitOutcome::RepairedPass,
        UnitOutcome::AssertionFailure,
        UnitOutcome::CompileFailureUnrepaired,
        UnitOutcome::ToolingFailure,
        UnitOutcome::GenerationFailure,
        UnitOutcome::UnparseableResponse,
        UnitOutcome::StoreFailure,
        UnitOutcome::Cancelled,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            UnitOutcome::GenerationFailure => "generation-failure",
            UnitOutcome::UnparseableResponse => "unparseable-response",
            UnitOutcome::Pass => "pass",
            UnitOutcome::AssertionFailure => "assertion-failure",
            UnitOutcome::CompileFailureUnrepaired => "compile-failure-unrepaired",
            UnitOutcome::RepairedPass => "repaired-pass",
            UnitOutcome::ToolingFailure => "tooling-failure",
            UnitOutcome::StoreFailure => "store-failure",
            UnitOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Pass | UnitOutcome::RepairedPass)
    }

    pub fn level(&self) -> LogLevel {
        match self {
            UnitOutcome::Pass | UnitOutcome::RepairedPass => LogLevel::Success,
            UnitOutcome::AssertionFailure
            | UnitOutcome::UnparseableResponse
            | UnitOutcome::Cancelled => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl std::fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
