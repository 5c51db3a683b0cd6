//! Minimal-context extraction for a single finding.
//!
//! Instead of handing a whole file to the fixer, we cut out the imports and
//! the enclosing function (indentation-scoped for Python, brace-scoped
//! otherwise). The difference in estimated tokens is tracked per session.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use crate::session::BugRecord;

/// Rough token estimate: ~4 characters per token.
pub const CHARS_PER_TOKEN: usize = 4;
/// Lines of context kept on either side when no enclosing function is found.
const FALLBACK_RADIUS: usize = 10;
/// Upper bound on the extracted function body.
const MAX_BLOCK_LINES: usize = 100;
/// Import lines are only looked for near the top of the file.
const IMPORT_SCAN_LINES: usize = 50;

static PY_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(async\s+def|def|class)\s+\w+").unwrap());
static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(import\s+\S|from\s+\S+\s+import\s)").unwrap());
static JS_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:function\s+\w+\s*\(|(?:const|let|var)\s+\w+\s*=\s*(?:async\s*)?(?:\([^)]*\)\s*=>|function)|^\s*(?:async\s+)?\w+\s*\([^)]*\)\s*\{)",
    )
    .unwrap()
});
static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(import\s.*from\s+['"]|import\s+['"]|(const|let|var)\s+.*=\s*require\()"#).unwrap()
});
static CONTROL_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\}\s*)?(if|for|while|switch|catch|else)\b").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct MinimalContext {
    pub code: String,
    pub language: String,
    /// 1-based inclusive line range of the extracted block.
    pub start_line: usize,
    pub end_line: usize,
    pub original_tokens: usize,
    pub extracted_tokens: usize,
}

impl MinimalContext {
    pub fn tokens_saved(&self) -> usize {
        self.original_tokens.saturating_sub(self.extracted_tokens)
    }
}

#[derive(Debug, Default)]
pub struct ContextExtractor;

impl ContextExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, project_root: &Path, bug: &BugRecord) -> Result<MinimalContext> {
        let path = project_root.join(&bug.location.file);
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(extract_from(&content, &bug.language, bug.location.line))
    }
}

/// Extract the block enclosing 1-based `line` from `content`.
pub fn extract_from(content: &str, language: &str, line: usize) -> MinimalContext {
    let lines: Vec<&str> = content.lines().collect();
    let target = line.saturating_sub(1).min(lines.len().saturating_sub(1));

    let (imports, block) = if language == "python" {
        (
            collect_imports(&lines, &PY_IMPORT),
            python_block(&lines, target),
        )
    } else {
        (collect_imports(&lines, &JS_IMPORT), brace_block(&lines, target))
    };
    let (start, end) = block.unwrap_or_else(|| {
        (
            target.saturating_sub(FALLBACK_RADIUS),
            (target + FALLBACK_RADIUS).min(lines.len().saturating_sub(1)),
        )
    });

    let mut code = String::new();
    for import in imports.iter().filter(|(idx, _)| *idx < start) {
        code.push_str(import.1);
        code.push('\n');
    }
    if !code.is_empty() {
        code.push('\n');
    }
    if let Some(body) = lines.get(start..=end) {
        code.push_str(&body.join("\n"));
    }

    let original_tokens = content.len() / CHARS_PER_TOKEN;
    let extracted_tokens = (code.len() / CHARS_PER_TOKEN).min(original_tokens);
    MinimalContext {
        code,
        language: language.to_string(),
        start_line: start + 1,
        end_line: end + 1,
        original_tokens,
        extracted_tokens,
    }
}

fn collect_imports<'a>(lines: &[&'a str], pattern: &Regex) -> Vec<(usize, &'a str)> {
    lines
        .iter()
        .take(IMPORT_SCAN_LINES)
        .enumerate()
        .filter(|(_, l)| pattern.is_match(l.trim_start()))
        .map(|(i, l)| (i, l.trim_end()))
        .collect()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Innermost `def`/`class` whose indented body contains `target`.
fn python_block(lines: &[&str], target: usize) -> Option<(usize, usize)> {
    let target_indent = lines.get(target).map(|l| indent_of(l))?;
    let mut search = target;
    loop {
        let line = lines[search];
        if let Some(caps) = PY_DEF.captures(line) {
            let def_indent = caps.get(1).map_or(0, |m| m.as_str().len());
            if def_indent < target_indent || search == target {
                let end = python_block_end(lines, search, def_indent);
                if end >= target {
                    return Some((search, end.min(search + MAX_BLOCK_LINES)));
                }
            }
        }
        if search == 0 {
            return None;
        }
        search -= 1;
    }
}

fn python_block_end(lines: &[&str], start: usize, def_indent: usize) -> usize {
    let mut end = start;
    for (i, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= def_indent {
            break;
        }
        end = i;
    }
    end
}

/// Innermost function-looking line above `target` whose braces enclose it.
fn brace_block(lines: &[&str], target: usize) -> Option<(usize, usize)> {
    let mut search = target;
    loop {
        let line = lines.get(search)?;
        if JS_FUNC.is_match(line) && !CONTROL_KEYWORD.is_match(line) {
            let end = brace_block_end(lines, search);
            if end >= target {
                return Some((search, end));
            }
        }
        if search == 0 {
            return None;
        }
        search -= 1;
    }
}

fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth: i64 = 0;
    let mut opened = false;
    let limit = (start + MAX_BLOCK_LINES).min(lines.len());
    for (i, line) in lines.iter().enumerate().take(limit).skip(start) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return i;
        }
    }
    limit.saturating_sub(1)
}
