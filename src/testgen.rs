//! Regression test scaffolding for verified fixes.

use crate::session::BugRecord;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedTest {
    /// Path of the test file, relative to the project root.
    pub path: PathBuf,
    pub code: String,
}

pub trait TestGenerator {
    /// Write a regression test for `bug`. `diff` is the applied fix, if known.
    fn generate(&self, project_root: &Path, bug: &BugRecord, diff: Option<&str>) -> Result<GeneratedTest>;
}

/// Writes pytest or jest scaffolds from per-CWE payload templates.
#[derive(Debug, Default)]
pub struct TemplateTestGenerator;

impl TemplateTestGenerator {
    pub fn new() -> Self {
        Self
    }
}

struct Flavor {
    slug: &'static str,
    payloads: &'static [&'static str],
    check: &'static str,
}

fn flavor(cwe: Option<&str>) -> Flavor {
    match cwe {
        Some("CWE-89") => Flavor {
            slug: "sql_injection",
            payloads: &["admin'--", "' OR '1'='1", "'; DROP TABLE users;--"],
            check: "payload must be bound as a parameter, never concatenated into SQL",
        },
        Some("CWE-78") => Flavor {
            slug: "command_injection",
            payloads: &["; rm -rf /", "| cat /etc/passwd", "&& whoami", "$(whoami)"],
            check: "payload must reach the process as a single argument, never a shell",
        },
        Some("CWE-79") => Flavor {
            slug: "xss",
            payloads: &[
                "<script>alert('xss')</script>",
                "<img src=x onerror=alert('xss')>",
                "javascript:alert('xss')",
            ],
            check: "payload must be escaped or rendered as text",
        },
        Some("CWE-22") => Flavor {
            slug: "path_traversal",
            payloads: &["../../../etc/passwd", "....//....//etc/passwd", "%2e%2e%2fetc/passwd"],
            check: "resolved path must stay inside the allowed directory",
        },
        Some("CWE-798") => Flavor {
            slug: "hardcoded_secret",
            payloads: &[],
            check: "credentials must come from the environment",
        },
        _ => Flavor {
            slug: "fix",
            payloads: &[],
            check: "behavior must match the fixed version",
        },
    }
}

fn comment_block(prefix: &str, diff: Option<&str>) -> String {
    match diff {
        Some(d) if !d.trim().is_empty() => {
            let mut out = format!("{prefix} Fix applied:\n");
            for line in d.lines() {
                out.push_str(&format!("{prefix}   {line}\n"));
            }
            out
        }
        _ => String::new(),
    }
}

fn quote(s: &str) -> String {
    format!("{:?}", s)
}

fn python_test(bug: &BugRecord, diff: Option<&str>) -> String {
    let bid = bug.id.to_lowercase();
    let f = flavor(bug.cwe.as_deref());
    let tag = bug.cwe.as_deref().map(|c| format!(" ({c})")).unwrap_or_default();
    let mut code = format!(
        "\n\ndef test_{bid}_{slug}_regression():\n    \"\"\"Regression test: {desc}{tag}\n\n    Location: {file}:{line}\n    Expectation: {check}.\n    \"\"\"\n",
        slug = f.slug,
        desc = bug.description,
        file = bug.location.file.display(),
        line = bug.location.line,
        check = f.check,
    );
    code.push_str(&comment_block("    #", diff));
    if f.payloads.is_empty() {
        code.push_str("    # Exercise the fixed code path here; this must fail on the buggy version.\n    assert True\n");
    } else {
        let list: Vec<String> = f.payloads.iter().map(|p| quote(p)).collect();
        code.push_str(&format!(
            "    payloads = [{}]\n    for payload in payloads:\n        # Call the fixed code path with `payload` here.\n        assert isinstance(payload, str)\n",
            list.join(", ")
        ));
    }
    code
}

fn js_test(bug: &BugRecord, diff: Option<&str>) -> String {
    let f = flavor(bug.cwe.as_deref());
    let tag = bug.cwe.as_deref().map(|c| format!(" ({c})")).unwrap_or_default();
    let mut code = format!(
        "\n\n// {desc}{tag} at {file}:{line}\n// Expectation: {check}.\n",
        desc = bug.description,
        file = bug.location.file.display(),
        line = bug.location.line,
        check = f.check,
    );
    code.push_str(&comment_block("//", diff));
    let list: Vec<String> = f.payloads.iter().map(|p| quote(p)).collect();
    code.push_str(&format!(
        "test('{id} {slug} regression', () => {{\n  const payloads = [{}];\n  for (const payload of payloads) {{\n    // Call the fixed code path with `payload` here.\n    expect(typeof payload).toBe('string');\n  }}\n}});\n",
        list.join(", "),
        id = bug.id,
        slug = f.slug,
    ));
    code
}

const PY_HEADER: &str = "\"\"\"Regression tests generated by remedy.\n\nEach test should fail on the buggy version and pass on the fixed one.\n\"\"\"\nimport pytest";
const JS_HEADER: &str = "// Regression tests generated by remedy.\n// Each test should fail on the buggy version and pass on the fixed one.";

impl TestGenerator for TemplateTestGenerator {
    fn generate(&self, project_root: &Path, bug: &BugRecord, diff: Option<&str>) -> Result<GeneratedTest> {
        let (relative, header, code) = match bug.language.as_str() {
            "javascript" => (
                PathBuf::from("tests").join(format!("{}.regression.test.js", bug.id.to_lowercase())),
                JS_HEADER,
                js_test(bug, diff),
            ),
            "python" => (
                PathBuf::from("tests").join(format!("test_{}_regression.py", bug.id.to_lowercase())),
                PY_HEADER,
                python_test(bug, diff),
            ),
            other => anyhow::bail!("No test template for language '{other}'"),
        };

        let path = project_root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = if path.exists() {
            let existing =
                fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            format!("{}{}", existing.trim_end(), code)
        } else {
            format!("{header}{code}")
        };
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(GeneratedTest { path: relative, code })
    }
}
