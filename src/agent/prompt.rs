//! Per-stage instruction templates.
//!
//! `build_prompt` is a pure function of the stage and the accumulated
//! context: no I/O, no clock, no randomness. Templates are data so tests
//! can assert the exact produced string.

use crate::config::PromptConfig;
use crate::workflow::WorkflowContext;

use super::Stage;

/// File name the planner writes the requirements artifact to inside the
/// workspace. Later stages read it and never write it.
pub const REQUIREMENTS_FILE: &str = "REQUIREMENTS.md";

/// Marker appended when a prior stage's output exceeds the excerpt budget.
const TRUNCATION_MARKER: &str = "\n[output truncated]";

const PLANNER_TEMPLATE: &str = "\
You are the Planner in a four-stage software delivery pipeline \
(Planner, Builder, QA, Production Readiness).

Turn the user's request into a concrete, implementable requirements \
document: scope, functional requirements, acceptance criteria and \
explicit non-goals. Do not write any implementation code.

User request:
{request}

Write the complete requirements document to {requirements_file} in the \
working directory, then print the full document as your final answer.";

const BUILDER_TEMPLATE: &str = "\
You are the Builder in a four-stage software delivery pipeline. The \
Planner has already produced the requirements below; treat them as \
read-only and do not rewrite them.

Requirements:
{requirements}

Planner notes:
{previous}

Implement the requirements in the working directory. Create or modify \
whatever source files are needed, then summarize what you built and how \
it satisfies each requirement.";

const QA_TEMPLATE: &str = "\
You are QA in a four-stage software delivery pipeline. The requirements \
below are read-only.

Requirements:
{requirements}

Builder report:
{previous}

Verify the implementation in the working directory against each \
requirement: run the code where possible, probe edge cases and check \
acceptance criteria. Report every defect found, or state explicitly \
that all requirements are satisfied.";

const PROD_READY_TEMPLATE: &str = "\
You are the Production Readiness reviewer in a four-stage software \
delivery pipeline. The requirements below are read-only.

Requirements:
{requirements}

QA report:
{previous}

Assess the work in the working directory for release: error handling, \
documentation, obvious operational gaps. Fix small issues directly and \
produce a final release summary stating whether the result is ready to \
ship.";

/// Build the instruction string for one stage from the current context.
///
/// Deterministic: identical inputs always produce byte-identical output.
pub fn build_prompt(stage: Stage, context: &WorkflowContext, config: &PromptConfig) -> String {
    let requirements = context.requirements().unwrap_or("(no requirements recorded)");
    let previous = previous_excerpt(stage, context, config.excerpt_budget);

    match stage {
        Stage::Planner => PLANNER_TEMPLATE
            .replace("{request}", context.original_request())
            .replace("{requirements_file}", REQUIREMENTS_FILE),
        Stage::Builder => fill(BUILDER_TEMPLATE, requirements, &previous),
        Stage::Qa => fill(QA_TEMPLATE, requirements, &previous),
        Stage::ProdReady => fill(PROD_READY_TEMPLATE, requirements, &previous),
    }
}

fn fill(template: &str, requirements: &str, previous: &str) -> String {
    template.replace("{requirements}", requirements).replace("{previous}", previous)
}

/// Bounded excerpt of the preceding stage's output. Excess is dropped
/// from the tail; the head carries the most instruction weight.
fn previous_excerpt(stage: Stage, context: &WorkflowContext, budget: usize) -> String {
    let Some(prev) = preceding(stage) else {
        return String::new();
    };
    let Some(output) = context.output_for(prev) else {
        return "(no prior stage output)".to_string();
    };
    truncate_tail(output, budget)
}

fn preceding(stage: Stage) -> Option<Stage> {
    Stage::ALL.iter().copied().take_while(|s| *s < stage).last()
}

fn truncate_tail(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let mut excerpt: String = text.chars().take(budget).collect();
    excerpt.push_str(TRUNCATION_MARKER);
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;

    fn context() -> WorkflowContext {
        let workspace = Workspace::open(&std::env::temp_dir()).unwrap();
        WorkflowContext::new("s1", workspace, "build a CLI that reverses strings")
    }

    #[test]
    fn planner_prompt_contains_request_verbatim() {
        let ctx = context();
        let prompt = build_prompt(Stage::Planner, &ctx, &PromptConfig::default());
        assert!(prompt.contains("build a CLI that reverses strings"));
        assert!(prompt.contains(REQUIREMENTS_FILE));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn builder_prompt_exact_string() {
        let mut ctx = context();
        ctx.set_requirements("R1: reverse input");
        ctx.record_output(Stage::Planner, "plan text".to_string());

        let prompt = build_prompt(Stage::Builder, &ctx, &PromptConfig::default());
        let expected = BUILDER_TEMPLATE
            .replace("{requirements}", "R1: reverse input")
            .replace("{previous}", "plan text");
        assert_eq!(prompt, expected);
    }

    #[test]
    fn later_stages_see_requirements_and_previous_output() {
        let mut ctx = context();
        ctx.set_requirements("R1: reverse input");
        ctx.record_output(Stage::Planner, "plan".to_string());
        ctx.record_output(Stage::Builder, "built it".to_string());

        let qa = build_prompt(Stage::Qa, &ctx, &PromptConfig::default());
        assert!(qa.contains("R1: reverse input"));
        assert!(qa.contains("built it"));
        assert!(!qa.contains("plan\n"), "QA excerpts the builder, not the planner");
    }

    #[test]
    fn prompt_building_is_deterministic() {
        let mut ctx = context();
        ctx.set_requirements("R1");
        ctx.record_output(Stage::Planner, "p".repeat(10_000));

        let config = PromptConfig::default();
        let a = build_prompt(Stage::Builder, &ctx, &config);
        let b = build_prompt(Stage::Builder, &ctx, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn excerpt_is_truncated_from_the_tail() {
        let mut ctx = context();
        ctx.set_requirements("R1");
        ctx.record_output(Stage::Planner, format!("HEAD{}TAIL", "x".repeat(10_000)));

        let config = PromptConfig { excerpt_budget: 100 };
        let prompt = build_prompt(Stage::Builder, &ctx, &config);
        assert!(prompt.contains("HEAD"));
        assert!(!prompt.contains("TAIL"));
        assert!(prompt.contains("[output truncated]"));
    }

    #[test]
    fn missing_previous_output_is_marked() {
        let mut ctx = context();
        ctx.set_requirements("R1");
        let prompt = build_prompt(Stage::Qa, &ctx, &PromptConfig::default());
        assert!(prompt.contains("(no prior stage output)"));
    }
}
