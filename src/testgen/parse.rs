//! testgen/parse.rs
//!
//! Pulls a named test artifact out of raw generated text.
//!
//! Recognition is textual: a `package` line anchored at line start and the
//! first `public <kind> <Name>` declaration. No syntax tree is built.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

/// Generated test code with its resolved namespace and type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub namespace: String,
    pub name: String,
    pub body: String,
}

impl Artifact {
    /// `<namespace>.<name>`, the identifier handed to the build tool.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// What was missing when a body could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.namespace, &self.name) {
            (None, None) => f.write_str("no package and no public type declaration"),
            (None, Some(n)) => write!(f, "no package declaration (type {n})"),
            (Some(ns), None) => write!(f, "no public type declaration (package {ns})"),
            (Some(_), Some(_)) => f.write_str("resolved"),
        }
    }
}

impl std::error::Error for Unresolved {}

/// How many fenced blocks of one response become artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FenceMode {
    #[default]
    First,
    All,
}

/* ============================================================
   Patterns
   ============================================================ */

fn namespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*package\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*;")
            .expect("namespace pattern")
    })
}

pub(crate) fn type_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"public\s+(?:(?:final|abstract|static|sealed|strictfp)\s+)*(?:class|interface|enum|record|@interface)\s+([A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("type declaration pattern")
    })
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+#.\-]*[ \t]*\r?\n(.*?)```").expect("fence pattern")
    })
}

/* ============================================================
   Public API
   ============================================================ */

/// Bodies of all fenced code blocks, in order of appearance.
pub fn fenced_blocks(raw: &str) -> Vec<&str> {
    fence_re()
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// The first fenced block if there is one, otherwise the whole text; trimmed.
pub fn artifact_body(raw: &str) -> &str {
    match fenced_blocks(raw).first() {
        Some(block) => block.trim(),
        None => raw.trim(),
    }
}

pub fn extract_artifact(raw: &str) -> Result<Artifact, Unresolved> {
    resolve(artifact_body(raw))
}

/// One entry per candidate body. `First` always yields exactly one entry;
/// `All` yields one per fenced block (or one for the bare text).
pub fn extract_artifacts(raw: &str, mode: FenceMode) -> Vec<Result<Artifact, Unresolved>> {
    match mode {
        FenceMode::First => vec![extract_artifact(raw)],
        FenceMode::All => {
            let blocks = fenced_blocks(raw);
            if blocks.is_empty() {
                vec![resolve(raw.trim())]
            } else {
                blocks.into_iter().map(|b| resolve(b.trim())).collect()
            }
        }
    }
}

/// Namespace and type searches are independent; both must hit.
pub fn resolve(body: &str) -> Result<Artifact, Unresolved> {
    let namespace = namespace_re()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let name = type_decl_re()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    match (namespace, name) {
        (Some(namespace), Some(name)) => Ok(Artifact {
            namespace,
            name,
            body: body.to_string(),
        }),
        (namespace, name) => Err(Unresolved { namespace, name }),
    }
}
