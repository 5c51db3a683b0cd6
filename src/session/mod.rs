//! Session aggregate: the durable state of one remediation engagement.
//!
//! A [`SessionDocument`] holds session metadata, every [`BugRecord`] ever
//! discovered, aggregate statistics and the append-only checkpoint log. It is
//! passed explicitly to every operation and persisted by [`SessionStore`]
//! after each mutation.

pub mod store;

pub use store::SessionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// How the pipeline treats discovered bugs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Discover and record bugs, never touch files.
    ScanOnly,
    /// Ask the operator before each bug.
    Confirm,
    /// Process the whole queue unattended.
    #[default]
    Auto,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::ScanOnly => write!(f, "scan-only"),
            SessionMode::Confirm => write!(f, "confirm"),
            SessionMode::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for SessionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scan-only" | "scan_only" => Ok(SessionMode::ScanOnly),
            "confirm" => Ok(SessionMode::Confirm),
            "auto" => Ok(SessionMode::Auto),
            _ => anyhow::bail!(
                "Invalid mode '{}'. Valid values: auto, confirm, scan-only",
                s
            ),
        }
    }
}

/// Lifecycle status of a bug.
///
/// Happy path is `pending -> fixing -> fixed -> verified`. `needs_review` and
/// `ignored` are terminal for the remainder of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    Pending,
    Fixing,
    Fixed,
    Verified,
    NeedsReview,
    Ignored,
}

impl BugStatus {
    pub const ALL: [BugStatus; 6] = [
        BugStatus::Pending,
        BugStatus::Fixing,
        BugStatus::Fixed,
        BugStatus::Verified,
        BugStatus::NeedsReview,
        BugStatus::Ignored,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fixing => "fixing",
            Self::Fixed => "fixed",
            Self::Verified => "verified",
            Self::NeedsReview => "needs_review",
            Self::Ignored => "ignored",
        }
    }

    /// Whether a fix may be (re)drafted from this status.
    pub fn accepts_fix(self) -> bool {
        matches!(self, Self::Pending | Self::Fixing | Self::NeedsReview)
    }

    /// No further automatic transitions happen from these within a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::NeedsReview | Self::Ignored)
    }
}

impl fmt::Display for BugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Detector severity, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Detector category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Auth,
    Logic,
    Quality,
}

impl Category {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Auth => "auth",
            Self::Logic => "logic",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "security" => Ok(Category::Security),
            "auth" => Ok(Category::Auth),
            "logic" => Ok(Category::Logic),
            "quality" => Ok(Category::Quality),
            other => anyhow::bail!(
                "Unknown category '{}'. Valid values: security, auth, logic, quality",
                other
            ),
        }
    }
}

/// Parse a comma-separated category list such as `security,auth`.
pub fn parse_categories(list: &str) -> anyhow::Result<Vec<Category>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Immutable session metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub goal: String,
    pub mode: SessionMode,
    pub project: PathBuf,
    pub started: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: &str, mode: SessionMode, project: &Path) -> Self {
        let started = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("sess-{}-{}", started.format("%Y%m%d"), &suffix[..6]),
            goal: goal.to_string(),
            mode,
            project: project.to_path_buf(),
            started,
        }
    }
}

/// Source location of a finding. `file` is relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    /// Drafts produced so far, applied or rejected.
    #[serde(default)]
    pub attempts: u32,
    /// Reason the last draft was rejected by the pre-apply check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
    /// Prompt handed to a human (or an LLM) when no template applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_prompt: Option<String>,
}

/// Outcome of one verification stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// Tool unavailable or nothing to check; never deducts confidence.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default)]
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn passed(&self) -> bool {
        self.status != CheckStatus::Failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationMetadata {
    pub passed: bool,
    pub confidence: f64,
    #[serde(default)]
    pub checks: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// A discovered bug and everything the lifecycle engine learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugRecord {
    pub id: String,
    pub status: BugStatus,
    pub category: Category,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    pub description: String,
    pub pattern_id: String,
    pub language: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_generated: Option<PathBuf>,
    /// Checkpoint taken before the first fix of the current attempt cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// Checkpoint taken right after the last applied fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl BugRecord {
    /// A draft of this cycle was written to disk and not yet rolled back.
    pub fn has_applied_fix(&self) -> bool {
        self.fixed_checkpoint.is_some() || self.fix.as_ref().is_some_and(|f| f.diff.is_some())
    }

    /// Fix drafts produced so far in the current attempt cycle.
    pub fn attempts(&self) -> u32 {
        self.fix.as_ref().map(|f| f.attempts).unwrap_or(0)
    }

    /// Display name of the file, for compact output.
    pub fn file_name(&self) -> String {
        self.location
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.location.file.display().to_string())
    }
}

/// Deterministic bug identifier: `B` + 6 uppercase hex chars of
/// SHA-256(`file:line:pattern`). Unchanged code always reproduces the same id.
pub fn derive_bug_id(file: &Path, line: usize, pattern_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", file.display(), line, pattern_id).as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());
    format!("B{}", hash_hex[..6].to_uppercase())
}

/// An entry in the append-only checkpoint log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sha: String,
    pub msg: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub files_extracted: u64,
    pub tokens_saved: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: usize,
    pub pending: usize,
    pub fixing: usize,
    pub fixed: usize,
    pub verified: usize,
    pub needs_review: usize,
    pub ignored: usize,
    pub tokens_saved: u64,
    pub files_extracted: u64,
}

impl SessionStats {
    pub fn count(&self, status: BugStatus) -> usize {
        match status {
            BugStatus::Pending => self.pending,
            BugStatus::Fixing => self.fixing,
            BugStatus::Fixed => self.fixed,
            BugStatus::Verified => self.verified,
            BugStatus::NeedsReview => self.needs_review,
            BugStatus::Ignored => self.ignored,
        }
    }
}

/// The whole persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session: Session,
    #[serde(default)]
    pub context: ContextStats,
    #[serde(default)]
    pub bugs: Vec<BugRecord>,
    #[serde(default)]
    pub stats: SessionStats,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl SessionDocument {
    pub fn new(goal: &str, mode: SessionMode, project: &Path) -> Self {
        Self {
            session: Session::new(goal, mode, project),
            context: ContextStats::default(),
            bugs: Vec::new(),
            stats: SessionStats::default(),
            checkpoints: Vec::new(),
        }
    }

    pub fn bug(&self, id: &str) -> Option<&BugRecord> {
        self.bugs.iter().find(|b| b.id == id)
    }

    pub fn bug_mut(&mut self, id: &str) -> Option<&mut BugRecord> {
        self.bugs.iter_mut().find(|b| b.id == id)
    }

    /// Recompute `stats` from the bug set.
    pub fn refresh_stats(&mut self) {
        let mut stats = SessionStats {
            total: self.bugs.len(),
            tokens_saved: self.context.tokens_saved,
            files_extracted: self.context.files_extracted,
            ..Default::default()
        };
        for bug in &self.bugs {
            match bug.status {
                BugStatus::Pending => stats.pending += 1,
                BugStatus::Fixing => stats.fixing += 1,
                BugStatus::Fixed => stats.fixed += 1,
                BugStatus::Verified => stats.verified += 1,
                BugStatus::NeedsReview => stats.needs_review += 1,
                BugStatus::Ignored => stats.ignored += 1,
            }
        }
        self.stats = stats;
    }

    /// Ids with the given statuses, severity-major, confidence-minor, descending.
    pub fn queue(&self, statuses: &[BugStatus]) -> Vec<String> {
        let mut selected: Vec<&BugRecord> = self
            .bugs
            .iter()
            .filter(|b| statuses.contains(&b.status))
            .collect();
        selected.sort_by(|a, b| {
            a.severity.cmp(&b.severity).then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        selected.into_iter().map(|b| b.id.clone()).collect()
    }
}
