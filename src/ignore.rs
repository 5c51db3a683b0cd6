//! Suppression rules applied to freshly scanned bugs.
//!
//! Rules live in `.remedy/ignore-rules.yaml`:
//!
//! ```yaml
//! rules:
//!   - id: test-files
//!     file_glob: "**/test_*.py"
//!     categories: [security]
//!     reason: Test files may contain intentional vulnerable patterns
//!   - id: todos
//!     pattern: "TODO:|FIXME:"
//!     categories: [quality]
//!     reason: Informational markers
//! ```
//!
//! A rule matches when its category filter is empty or contains the bug's
//! category, and either its glob matches the bug's file or its regex matches
//! the recorded snippet (case-insensitive). First match in document order wins.

use crate::errors::{RemedyError, Result};
use crate::session::{BugRecord, Category};
use glob::{MatchOptions, Pattern};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoreRule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_glob: Option<String>,
    /// Content regex, matched case-insensitively against the code snippet.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "content_regex")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub reason: String,
}

/// On-disk shape of the rules document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreRulesFile {
    #[serde(default)]
    pub rules: Vec<IgnoreRule>,
}

impl IgnoreRulesFile {
    /// Rules seeded into every new session.
    pub fn defaults() -> Self {
        let rule = |id: &str, glob: Option<&str>, pattern: Option<&str>, cat: Category, reason: &str| {
            IgnoreRule {
                id: id.to_string(),
                file_glob: glob.map(str::to_string),
                pattern: pattern.map(str::to_string),
                categories: vec![cat],
                reason: reason.to_string(),
            }
        };
        Self {
            rules: vec![
                rule(
                    "test-files",
                    Some("**/test_*.py"),
                    None,
                    Category::Security,
                    "Test files may contain intentional vulnerable patterns",
                ),
                rule(
                    "test-files-js",
                    Some("**/*.test.{js,ts}"),
                    None,
                    Category::Security,
                    "Test files",
                ),
                rule(
                    "todos",
                    None,
                    Some("TODO:|FIXME:"),
                    Category::Quality,
                    "Informational markers",
                ),
                rule(
                    "console",
                    None,
                    Some(r"console\.(log|error|warn)"),
                    Category::Logic,
                    "Development logging",
                ),
            ],
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| RemedyError::Store {
            action: "read",
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| RemedyError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the default rules unless a rules file already exists.
    pub fn write_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        let yaml = serde_yaml::to_string(&Self::defaults()).map_err(|source| RemedyError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, yaml).map_err(|source| RemedyError::Store {
            action: "write",
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }
}

/// A rule with its glob and regex compiled once.
#[derive(Debug)]
struct CompiledRule {
    rule: IgnoreRule,
    globs: Vec<Pattern>,
    regex: Option<Regex>,
    /// Set when the glob or regex failed to compile; such a rule never matches.
    broken: bool,
}

impl CompiledRule {
    fn compile(rule: IgnoreRule) -> Self {
        let mut broken = false;

        let globs = match &rule.file_glob {
            Some(glob) => expand_braces(glob)
                .iter()
                .filter_map(|g| match Pattern::new(g) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        tracing::warn!(rule = %rule.id, glob = %g, error = %e, "invalid file glob; rule disabled");
                        broken = true;
                        None
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        let regex = match &rule.pattern {
            Some(pattern) => match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(rule = %rule.id, pattern = %pattern, error = %e, "invalid content regex; rule disabled");
                    broken = true;
                    None
                }
            },
            None => None,
        };

        Self {
            rule,
            globs,
            regex,
            broken,
        }
    }

    fn matches(&self, bug: &BugRecord) -> bool {
        if self.broken {
            return false;
        }
        if !self.rule.categories.is_empty() && !self.rule.categories.contains(&bug.category) {
            return false;
        }

        let opts = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        if self
            .globs
            .iter()
            .any(|g| g.matches_path_with(&bug.location.file, opts))
        {
            return true;
        }

        self.regex
            .as_ref()
            .is_some_and(|re| re.is_match(&bug.location.code))
    }
}

/// Evaluates suppression rules. Holds nothing but the compiled rule set.
#[derive(Debug, Default)]
pub struct IgnoreFilter {
    rules: Vec<CompiledRule>,
}

impl IgnoreFilter {
    pub fn new(rules: Vec<IgnoreRule>) -> Self {
        Self {
            rules: rules.into_iter().map(CompiledRule::compile).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(IgnoreRulesFile::load(path)?.rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Id of the first rule matching `bug`, in document order.
    pub fn matches(&self, bug: &BugRecord) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.matches(bug))
            .map(|r| r.rule.id.as_str())
    }
}

/// Expand `{a,b}` alternations, which the glob crate does not support.
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close_rel) = pattern[open..].find('}') else {
        return vec![pattern.to_string()];
    };
    let close = open + close_rel;
    let (head, tail) = (&pattern[..open], &pattern[close + 1..]);
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{head}{alt}{tail}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::sample_bug;
    use crate::session::Severity;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn bug_at(file: &str, code: &str, category: Category) -> BugRecord {
        let mut bug = sample_bug("B123456", Severity::High, 0.8);
        bug.location.file = PathBuf::from(file);
        bug.location.code = code.to_string();
        bug.category = category;
        bug
    }

    fn glob_rule(id: &str, glob: &str, cats: Vec<Category>) -> IgnoreRule {
        IgnoreRule {
            id: id.to_string(),
            file_glob: Some(glob.to_string()),
            pattern: None,
            categories: cats,
            reason: String::new(),
        }
    }

    fn regex_rule(id: &str, pattern: &str, cats: Vec<Category>) -> IgnoreRule {
        IgnoreRule {
            id: id.to_string(),
            file_glob: None,
            pattern: Some(pattern.to_string()),
            categories: cats,
            reason: String::new(),
        }
    }

    #[test]
    fn test_glob_does_not_match_regular_file() {
        let filter = IgnoreFilter::new(vec![glob_rule(
            "test-files",
            "**/test_*.py",
            vec![Category::Security],
        )]);
        let bug = bug_at("src/app.py", "os.system(user_cmd)", Category::Security);
        assert_eq!(filter.matches(&bug), None);
    }

    #[test]
    fn test_glob_matches_nested_test_file() {
        let filter = IgnoreFilter::new(vec![glob_rule(
            "test-files",
            "**/test_*.py",
            vec![Category::Security],
        )]);
        let bug = bug_at("tests/unit/test_app.py", "os.system(x)", Category::Security);
        assert_eq!(filter.matches(&bug), Some("test-files"));
    }

    #[test]
    fn category_filter_excludes_other_categories() {
        let filter = IgnoreFilter::new(vec![glob_rule(
            "test-files",
            "**/test_*.py",
            vec![Category::Security],
        )]);
        let bug = bug_at("tests/test_app.py", "except:", Category::Logic);
        assert_eq!(filter.matches(&bug), None);
    }

    #[test]
    fn empty_category_filter_matches_any_category() {
        let filter = IgnoreFilter::new(vec![regex_rule("all-todo", "todo", vec![])]);
        let bug = bug_at("a.py", "# TODO: later", Category::Quality);
        assert_eq!(filter.matches(&bug), Some("all-todo"));
    }

    #[test]
    fn regex_is_case_insensitive() {
        let filter = IgnoreFilter::new(vec![regex_rule(
            "console",
            r"console\.(log|error|warn)",
            vec![Category::Logic],
        )]);
        let bug = bug_at("web/app.js", "CONSOLE.LOG('x')", Category::Logic);
        assert_eq!(filter.matches(&bug), Some("console"));
    }

    #[test]
    fn malformed_regex_is_skipped_not_fatal() {
        let filter = IgnoreFilter::new(vec![
            regex_rule("broken", "(unclosed", vec![]),
            regex_rule("fallback", "system", vec![]),
        ]);
        let bug = bug_at("src/app.py", "os.system(user_cmd)", Category::Security);
        assert_eq!(filter.matches(&bug), Some("fallback"));
    }

    #[test]
    fn malformed_regex_disables_whole_rule() {
        let mut rule = glob_rule("half-broken", "**/*.py", vec![]);
        rule.pattern = Some("[".to_string());
        let filter = IgnoreFilter::new(vec![rule]);
        let bug = bug_at("src/app.py", "os.system(x)", Category::Security);
        assert_eq!(filter.matches(&bug), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let filter = IgnoreFilter::new(vec![
            glob_rule("first", "**/*.py", vec![]),
            regex_rule("second", "system", vec![]),
        ]);
        let bug = bug_at("src/app.py", "os.system(x)", Category::Security);
        assert_eq!(filter.matches(&bug), Some("first"));
    }

    #[test]
    fn non_overlapping_rules_are_order_independent() {
        let a = glob_rule("js-tests", "**/*.test.js", vec![]);
        let b = regex_rule("pickle", "pickle", vec![]);
        let forward = IgnoreFilter::new(vec![a.clone(), b.clone()]);
        let reverse = IgnoreFilter::new(vec![b, a]);
        for bug in [
            bug_at("web/a.test.js", "eval(x)", Category::Security),
            bug_at("src/x.py", "pickle.load(f)", Category::Security),
            bug_at("src/y.py", "os.system(x)", Category::Security),
        ] {
            assert_eq!(forward.matches(&bug), reverse.matches(&bug));
        }
    }

    #[test]
    fn brace_alternation_is_expanded() {
        assert_eq!(
            expand_braces("**/*.test.{js,ts}"),
            vec!["**/*.test.js".to_string(), "**/*.test.ts".to_string()]
        );
        assert_eq!(expand_braces("plain/*.py"), vec!["plain/*.py".to_string()]);

        let filter = IgnoreFilter::new(IgnoreRulesFile::defaults().rules);
        let bug = bug_at("web/login.test.ts", "eval(input)", Category::Security);
        assert_eq!(filter.matches(&bug), Some("test-files-js"));
    }

    #[test]
    fn default_rules_roundtrip_through_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ignore-rules.yaml");
        assert!(IgnoreRulesFile::write_default_if_missing(&path).unwrap());
        assert!(!IgnoreRulesFile::write_default_if_missing(&path).unwrap());
        let filter = IgnoreFilter::load(&path).unwrap();
        assert_eq!(filter.len(), 4);
    }

    #[test]
    fn missing_rules_file_yields_empty_filter() {
        let dir = tempdir().unwrap();
        let filter = IgnoreFilter::load(&dir.path().join("nope.yaml")).unwrap();
        assert!(filter.is_empty());
    }
}
