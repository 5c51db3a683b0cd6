//! Fix drafting.
//!
//! A [`Fixer`] proposes new file content; it never writes to disk. The
//! lifecycle engine decides whether a draft is applied.

pub mod templates;

use crate::context::MinimalContext;
use crate::session::BugRecord;
use anyhow::Result;
use std::fs;
use std::path::Path;

/// Everything a fixer gets to look at for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    pub project_root: &'a Path,
    pub bug: &'a BugRecord,
    pub context: Option<&'a MinimalContext>,
    /// Failure text from the previous attempt, for iterative refinement.
    pub feedback: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixProposal {
    /// Complete replacement content for the bug's file.
    Draft {
        new_content: String,
        confidence: f64,
        /// Numbered-line diff: `-N: old` / `+N: new`.
        diff: String,
        reasoning: String,
    },
    /// No automatic fix; `prompt` is ready to hand to a human or an LLM.
    ManualReview { prompt: String, reason: String },
}

pub trait Fixer {
    fn generate_fix(&self, request: &FixRequest<'_>) -> Result<FixProposal>;
}

/// Upper bound on context included in a manual-review prompt.
const PROMPT_CONTEXT_CHARS: usize = 2000;

/// Template and pattern based fixer.
///
/// Templates are deterministic, so once a template draft has failed
/// verification (feedback is present) another template draft would fail
/// the same way; the fixer hands the bug over for manual review instead.
#[derive(Debug, Default)]
pub struct TemplateFixer;

impl TemplateFixer {
    pub fn new() -> Self {
        Self
    }
}

impl Fixer for TemplateFixer {
    fn generate_fix(&self, request: &FixRequest<'_>) -> Result<FixProposal> {
        let bug = request.bug;
        let path = request.project_root.join(&bug.location.file);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return Ok(manual(request, "", format!("Cannot read {}: {e}", path.display())));
            }
        };

        let mut lines: Vec<&str> = content.split('\n').collect();
        let line_no = bug.location.line;
        if line_no == 0 || line_no > lines.len() {
            return Ok(manual(request, "", format!("Line {line_no} out of range")));
        }
        let original = lines[line_no - 1];

        if request.feedback.is_some() {
            return Ok(manual(
                request,
                original,
                "Template fix did not pass verification".to_string(),
            ));
        }

        let fix = bug
            .cwe
            .as_deref()
            .and_then(|cwe| templates::apply_cwe_template(original, &bug.language, cwe))
            .map(|f| {
                let reasoning = format!(
                    "Template fix for {}: {}",
                    bug.cwe.as_deref().unwrap_or_default(),
                    f.name
                );
                (f, reasoning)
            })
            .or_else(|| {
                templates::apply_pattern_fix(original, &bug.pattern_id).map(|f| {
                    let reasoning = f.name.clone();
                    (f, reasoning)
                })
            });

        let Some((fix, reasoning)) = fix else {
            return Ok(manual(request, original, "No template available".to_string()));
        };

        let diff = format!(
            "-{line_no}: {original}\n+{line_no}: {}",
            fix.fixed_line
        );
        lines[line_no - 1] = &fix.fixed_line;
        Ok(FixProposal::Draft {
            new_content: lines.join("\n"),
            confidence: fix.confidence,
            diff,
            reasoning,
        })
    }
}

fn manual(request: &FixRequest<'_>, original_line: &str, reason: String) -> FixProposal {
    FixProposal::ManualReview {
        prompt: manual_review_prompt(request, original_line),
        reason,
    }
}

/// Prompt in numbered-line diff form, carrying the minimal context and the
/// previous failure, suitable for an LLM or a reviewer.
pub fn manual_review_prompt(request: &FixRequest<'_>, original_line: &str) -> String {
    let bug = request.bug;
    let cwe = bug
        .cwe
        .as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default();
    let mut prompt = format!(
        "Fix the following {} vulnerability:\n\n**Bug**: {}{}\n**File**: {}\n**Line {}**: `{}`\n\n",
        bug.language.to_uppercase(),
        bug.description,
        cwe,
        bug.file_name(),
        bug.location.line,
        if original_line.is_empty() {
            bug.location.code.as_str()
        } else {
            original_line.trim()
        },
    );

    if let Some(ctx) = request.context.filter(|c| !c.code.is_empty()) {
        let code: String = ctx.code.chars().take(PROMPT_CONTEXT_CHARS).collect();
        prompt.push_str(&format!("**Context**:\n```{}\n{}\n```\n\n", bug.language, code));
    }

    if let Some(feedback) = request.feedback {
        prompt.push_str(&format!(
            "**Previous fix failed with**:\n{feedback}\n\nPlease fix the issue while addressing this error.\n\n"
        ));
    }

    prompt.push_str(
        "**Output format** (numbered line diff):\n```\n-LINE_NUM: original line\n+LINE_NUM: fixed line\n```\n\n\
         **Requirements**:\n1. Minimal fix (2-5 lines max)\n2. Preserve indentation\n\
         3. No new dependencies unless necessary\n4. Brief reasoning (1 sentence)\n\n**Fix**:",
    );
    prompt
}
