// src/testgen/store.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::logger::log_fields;
use crate::state::{LogLevel, RunState};
use crate::testgen::merge::merge;
use crate::testgen::parse::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    New,
    Extend,
    Replace,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::New => "new",
            WriteMode::Extend => "extend",
            WriteMode::Replace => "replace",
        }
    }
}

/// Persists artifacts under `<project>/<test_root>/<namespace dirs>/<Name>.<ext>`.
/// The type name is the merge key: two artifacts with the same namespace and
/// name share one file.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    project_root: PathBuf,
    test_root: PathBuf,
    extension: String,
}

impl ArtifactStore {
    pub fn new(
        project_root: impl Into<PathBuf>,
        test_root: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            test_root: test_root.into(),
            extension: extension.into(),
        }
    }

    pub fn test_root(&self) -> PathBuf {
        self.project_root.join(&self.test_root)
    }

    pub fn resolve(&self, artifact: &Artifact) -> io::Result<PathBuf> {
        resolve_path(&self.test_root(), &artifact.namespace, &artifact.name, &self.extension)
    }

    /// Write `artifact`, extending whatever already lives at its path.
    pub fn save(&self, state: &mut RunState, artifact: &Artifact) -> io::Result<PathBuf> {
        let path = self.resolve(artifact)?;
        let existing = read_existing(&path)?;
        let mode = persist(&path, &artifact.body, existing.as_deref())?;

        log_written(state, &path, mode);
        Ok(path)
    }

    /// Overwrite `path` with `body`, no merge.
    pub fn replace(&self, state: &mut RunState, path: &Path, body: &str) -> io::Result<()> {
        ensure_parent_dir(path)?;
        fs::write(path, body)?;

        log_written(state, path, WriteMode::Replace);
        Ok(())
    }
}

/* ============================================================
   Path resolution
   ============================================================ */

/// Pure namespace -> path mapping.
pub fn artifact_path(test_root: &Path, namespace: &str, name: &str, ext: &str) -> PathBuf {
    let mut dir = test_root.to_path_buf();
    for segment in namespace.split('.').filter(|s| !s.is_empty()) {
        dir.push(segment);
    }
    dir.join(format!("{name}.{ext}"))
}

/// `artifact_path` plus creation of every missing directory.
pub fn resolve_path(test_root: &Path, namespace: &str, name: &str, ext: &str) -> io::Result<PathBuf> {
    let path = artifact_path(test_root, namespace, name, ext);
    ensure_parent_dir(&path)?;
    Ok(path)
}

/* ============================================================
   Writing
   ============================================================ */

/// Whole-file replace. With `existing`, the written text is `merge(existing, body)`.
/// Last writer wins.
pub fn persist(path: &Path, body: &str, existing: Option<&str>) -> io::Result<WriteMode> {
    match existing {
        Some(existing) => {
            fs::write(path, merge(existing, body))?;
            Ok(WriteMode::Extend)
        }
        None => {
            fs::write(path, body)?;
            Ok(WriteMode::New)
        }
    }
}

pub fn read_existing(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn log_written(state: &mut RunState, path: &Path, mode: WriteMode) {
    let shown = path.display().to_string();
    log_fields(
        state,
        LogLevel::Info,
        "test artifact written",
        &[("path", shown.as_str()), ("mode", mode.as_str())],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(body: &str) -> Artifact {
        Artifact {
            namespace: "billing.core".into(),
            name: "InvoiceTest".into(),
            body: body.into(),
        }
    }

    #[test]
    fn namespace_segments_become_directories() {
        let p = artifact_path(Path::new("/p/src/test/java"), "billing.core", "InvoiceTest", "java");
        assert_eq!(p, PathBuf::from("/p/src/test/java/billing/core/InvoiceTest.java"));
    }

    #[test]
    fn resolve_creates_dirs_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = resolve_path(dir.path(), "a.b.c", "XTest", "java").unwrap();
        let b = resolve_path(dir.path(), "a.b.c", "XTest", "java").unwrap();

        assert_eq!(a, b);
        assert!(dir.path().join("a/b/c").is_dir());
        assert!(!a.exists());
    }

    #[test]
    fn save_then_save_extends_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "src/test/java", "java");
        let mut state = RunState::quiet();

        let first = store
            .save(&mut state, &artifact("package billing.core;\npublic class InvoiceTest {\n    void a() {}\n}"))
            .unwrap();
        let second = store
            .save(&mut state, &artifact("package billing.core;\npublic class InvoiceTest {\n    void b() {}\n}"))
            .unwrap();

        assert_eq!(first, second);
        let text = fs::read_to_string(&first).unwrap();
        assert!(text.contains("void a()"));
        assert!(text.contains("void b()"));
        assert!(state.contains_log("mode=new"));
        assert!(state.contains_log("mode=extend"));
    }

    #[test]
    fn replace_overwrites_without_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "t", "java");
        let mut state = RunState::quiet();

        let path = store.save(&mut state, &artifact("old")).unwrap();
        store.replace(&mut state, &path, "new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert!(state.contains_log("mode=replace"));
    }
}
