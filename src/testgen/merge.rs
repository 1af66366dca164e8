//! testgen/merge.rs
//!
//! Textual merge of a freshly generated test class into an existing one.
//!
//! Heuristic, not structural: the existing file loses its final `}`, the
//! new class contributes the text between its first `{` after the type
//! declaration and its final `}`, and one `}` closes the result. Trailing
//! content after the last brace of the existing file (e.g. a comment) is
//! not recognized and yields an unbalanced result. Merging the same body
//! twice appends it twice.

use crate::testgen::parse::type_decl_re;

pub const EXTENSION_MARKER: &str = "// --- extended test content ---";

pub fn merge(existing: &str, new_body: &str) -> String {
    let open = strip_closing_brace(existing).trim_end();

    let appended = match inner_body(new_body) {
        Some(inner) => format!("    {inner}"),
        // lower fidelity: may duplicate package/type declarations
        None => new_body.trim().to_string(),
    };

    format!("{open}\n\n    {EXTENSION_MARKER}\n{appended}\n}}\n")
}

/// Everything before the last `}`, if the text ends in `}` plus whitespace.
fn strip_closing_brace(s: &str) -> &str {
    s.trim_end().strip_suffix('}').unwrap_or(s)
}

/// Members of the first public type in `body`, trimmed.
fn inner_body(body: &str) -> Option<&str> {
    let decl = type_decl_re().find(body)?;
    let open = decl.end() + body[decl.end()..].find('{')?;

    let close = body.trim_end().strip_suffix('}')?.len();
    if close <= open {
        return None;
    }

    Some(body[open + 1..close].trim())
}
