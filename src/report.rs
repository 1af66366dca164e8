// src/report.rs: per-unit results and the end-of-run summary.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::locator::SourceUnit;
use crate::state::UnitOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: String,
    pub source: PathBuf,
    pub outcome: UnitOutcome,
    pub artifact: Option<PathBuf>,
    pub generation_calls: u32,
    /// Wall time spent in the build tool, summed over validations.
    pub build_ms: u64,
    pub detail: Option<String>,
}

impl UnitReport {
    pub fn cancelled(unit: &SourceUnit) -> Self {
        Self {
            unit: unit.name.clone(),
            source: unit.path.clone(),
            outcome: UnitOutcome::Cancelled,
            artifact: None,
            generation_calls: 0,
            build_ms: 0,
            detail: Some("run deadline reached or cancelled".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Local>, units: Vec<UnitReport>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Local::now(),
            units,
        }
    }

    pub fn count(&self, outcome: UnitOutcome) -> usize {
        self.units.iter().filter(|u| u.outcome == outcome).count()
    }

    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_success()).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("Run {}\n\n", self.run_id));

        let width = self
            .units
            .iter()
            .map(|u| u.unit.len())
            .max()
            .unwrap_or(4)
            .max(4);

        for u in &self.units {
            out.push_str(&format!(
                "  {:<width$}  {:<26}  calls={}  build={}ms",
                u.unit,
                u.outcome.label(),
                u.generation_calls,
                u.build_ms,
            ));
            if let Some(path) = &u.artifact {
                out.push_str(&format!("  -> {}", path.display()));
            }
            out.push('\n');
        }

        out.push_str(&format!(
            "\n{} of {} units passed\n",
            self.succeeded(),
            self.units.len()
        ));

        for outcome in UnitOutcome::ALL {
            let n = self.count(outcome);
            if n > 0 {
                out.push_str(&format!("  {:<26} {}\n", outcome.label(), n));
            }
        }

        out
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, text)
    }
}
