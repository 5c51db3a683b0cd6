//! Candidate-bug discovery.
//!
//! The lifecycle engine only depends on the [`Scanner`] trait; the default
//! [`PatternScanner`] is a line-oriented indicator matcher over the
//! detector tables in [`patterns`].

pub mod patterns;

use crate::session::{BugRecord, BugStatus, Category, Location, Severity, derive_bug_id};
use anyhow::Result;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A finding before it becomes a [`crate::session::BugRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBug {
    pub category: Category,
    pub severity: Severity,
    pub confidence: f64,
    pub cwe: Option<String>,
    pub description: String,
    pub pattern_id: String,
    pub language: String,
    pub location: Location,
}

impl CandidateBug {
    pub fn id(&self) -> String {
        derive_bug_id(&self.location.file, self.location.line, &self.pattern_id)
    }

    /// A fresh `pending` record for this finding.
    pub fn into_record(self) -> BugRecord {
        BugRecord {
            id: self.id(),
            status: BugStatus::Pending,
            category: self.category,
            severity: self.severity,
            confidence: self.confidence,
            cwe: self.cwe,
            description: self.description,
            pattern_id: self.pattern_id,
            language: self.language,
            location: self.location,
            fix: None,
            verification: None,
            test_generated: None,
            checkpoint: None,
            fixed_checkpoint: None,
            ignore_rule: None,
            escalation: None,
            last_error: None,
        }
    }
}

pub trait Scanner {
    /// Discover candidates under `root`, ordered severity-major and
    /// confidence-minor, both descending. Must be deterministic.
    fn scan(&self, root: &Path, categories: &[Category]) -> Result<Vec<CandidateBug>>;
}

/// Directories never descended into.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "coverage",
    ".remedy",
    "vendor",
    "target",
    "out",
    ".idea",
    ".vscode",
];

const MAX_SNIPPET_CHARS: usize = 100;

#[derive(Debug, Default)]
pub struct PatternScanner;

impl PatternScanner {
    pub fn new() -> Self {
        Self
    }

    /// Source files under `root` in a stable order.
    fn collect_files(root: &Path) -> Vec<PathBuf> {
        if root.is_file() {
            return vec![root.to_path_buf()];
        }
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.depth() > 0
                    && EXCLUDED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
            })
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(patterns::language_for_extension)
                    .is_some()
            })
            .collect();
        files.sort();
        files
    }

    fn scan_file(
        &self,
        path: &Path,
        relative: &Path,
        categories: &[Category],
        seen: &mut HashSet<String>,
        out: &mut Vec<CandidateBug>,
    ) {
        let Some(language) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(patterns::language_for_extension)
        else {
            return;
        };
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "skipping unreadable file");
                return;
            }
        };
        let content = String::from_utf8_lossy(&bytes);

        for &category in categories {
            for detector in patterns::detectors(language, category) {
                for (idx, line) in content.lines().enumerate() {
                    let trimmed = line.trim();
                    if trimmed.starts_with('#') || trimmed.starts_with("//") {
                        continue;
                    }
                    if !detector.indicators.iter().any(|ind| line.contains(ind)) {
                        continue;
                    }

                    let candidate = CandidateBug {
                        category,
                        severity: detector.severity,
                        confidence: patterns::confidence(line, detector),
                        cwe: detector.cwe.map(str::to_string),
                        description: detector.description.to_string(),
                        pattern_id: detector.id.to_string(),
                        language: language.to_string(),
                        location: Location {
                            file: relative.to_path_buf(),
                            line: idx + 1,
                            code: trimmed.chars().take(MAX_SNIPPET_CHARS).collect(),
                        },
                    };
                    if seen.insert(candidate.id()) {
                        out.push(candidate);
                    }
                }
            }
        }
    }
}

impl Scanner for PatternScanner {
    fn scan(&self, root: &Path, categories: &[Category]) -> Result<Vec<CandidateBug>> {
        let files = Self::collect_files(root);
        tracing::debug!(root = %root.display(), files = files.len(), "scanning");

        let mut seen = HashSet::new();
        let mut bugs = Vec::new();
        for file in &files {
            let relative = if root.is_file() {
                file.file_name().map(PathBuf::from).unwrap_or_else(|| file.clone())
            } else {
                file.strip_prefix(root).unwrap_or(file).to_path_buf()
            };
            self.scan_file(file, &relative, categories, &mut seen, &mut bugs);
        }

        sort_candidates(&mut bugs);
        Ok(bugs)
    }
}

/// Severity-major, confidence-minor, both descending. Stable for ties.
pub fn sort_candidates(bugs: &mut [CandidateBug]) {
    bugs.sort_by(|a, b| {
        a.severity.cmp(&b.severity).then(
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
}
