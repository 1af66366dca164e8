//! locator.rs
//!
//! Discovers source units (one compilable file each) below the main
//! source directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::logger::log;
use crate::state::{LogLevel, RunState};

/// One file of application code, read once.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
    /// File name without extension.
    pub name: String,
    pub text: String,
}

impl SourceUnit {
    pub fn read(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            text,
        })
    }
}

pub struct Locator {
    pub extension: String,
    /// Glob patterns on the file name; matching files are entry points and never tested.
    pub exclude: Vec<glob::Pattern>,
}

impl Locator {
    pub fn new(extension: impl Into<String>, exclude: Vec<glob::Pattern>) -> Self {
        Self {
            extension: extension.into(),
            exclude,
        }
    }

    /// Candidate paths, sorted. `filter` keeps only files whose stem equals it.
    pub fn find(&self, root: &Path, filter: Option<&str>) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str()))
            .filter(|p| !self.is_excluded(p))
            .filter(|p| match filter {
                Some(name) => p.file_stem().and_then(|s| s.to_str()) == Some(name),
                None => true,
            })
            .collect();

        out.sort();
        out
    }

    /// `find` plus reading; unreadable files are logged and skipped.
    pub fn discover(&self, state: &mut RunState, root: &Path, filter: Option<&str>) -> Vec<SourceUnit> {
        let mut units = Vec::new();

        for path in self.find(root, filter) {
            match SourceUnit::read(&path) {
                Ok(u) => units.push(u),
                Err(e) => log(
                    state,
                    LogLevel::Warn,
                    format!("Skipping unreadable source {}: {e}", path.display()),
                ),
            }
        }

        units
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        self.exclude.iter().any(|p| p.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("java/com/acme");
        fs::create_dir_all(base.join("billing")).unwrap();
        fs::write(base.join("Application.java"), "class Application {}").unwrap();
        fs::write(base.join("billing/Invoice.java"), "class Invoice {}").unwrap();
        fs::write(base.join("billing/Customer.java"), "class Customer {}").unwrap();
        fs::write(base.join("billing/notes.txt"), "not code").unwrap();
        dir
    }

    fn locator() -> Locator {
        Locator::new("java", vec![glob::Pattern::new("Application.java").unwrap()])
    }

    #[test]
    fn finds_sources_and_skips_entry_points() {
        let dir = tree();
        let names: Vec<_> = locator()
            .find(dir.path(), None)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, ["Customer.java", "Invoice.java"]);
    }

    #[test]
    fn filter_matches_stem_exactly() {
        let dir = tree();
        let mut state = RunState::quiet();

        let units = locator().discover(&mut state, dir.path(), Some("Invoice"));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "Invoice");
        assert_eq!(units[0].text, "class Invoice {}");

        assert!(locator().find(dir.path(), Some("Invoic")).is_empty());
    }
}
