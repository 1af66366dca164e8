use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Initial,
    Repair,
}

/// One prompt, sent once and discarded.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub kind: RequestKind,
}

/* ============================================================
   Instructions (stable, reused)
   ============================================================ */

const GENERATE_INSTRUCTION: &str = "\
Generate unit test code for the following class.
Reply with one complete test class, including its package declaration.";

const REPAIR_INSTRUCTION: &str = "\
The following test code does not compile. This is the build output:";

const REPAIR_FOLLOWUP: &str = "\
Repair the test code so that it compiles. Reply with the complete corrected class:";

/* ============================================================
   Builders
   ============================================================ */

pub fn build_generation_prompt(unit_text: &str) -> GenerationRequest {
    GenerationRequest {
        prompt: format!("{GENERATE_INSTRUCTION}\n\n{unit_text}"),
        kind: RequestKind::Initial,
    }
}

/// Order is fixed: instruction, failure log, instruction, artifact.
pub fn build_repair_prompt(failure_log: &str, artifact_text: &str) -> GenerationRequest {
    let mut out = String::new();

    out.push_str(REPAIR_INSTRUCTION);
    out.push('\n');
    out.push_str(failure_log);
    out.push_str("\n\n");
    out.push_str(REPAIR_FOLLOWUP);
    out.push_str("\n\n");
    out.push_str(artifact_text);

    GenerationRequest {
        prompt: out,
        kind: RequestKind::Repair,
    }
}
