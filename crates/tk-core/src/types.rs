use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Closed => "closed",
        }
    }
}

impl std::str::FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "closed" => Ok(Status::Closed),
            other => Err(ValidationError::UnknownVariant {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// TickType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickType {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
}

impl TickType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickType::Bug => "bug",
            TickType::Feature => "feature",
            TickType::Task => "task",
            TickType::Epic => "epic",
            TickType::Chore => "chore",
        }
    }
}

impl std::str::FromStr for TickType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(TickType::Bug),
            "feature" => Ok(TickType::Feature),
            "task" => Ok(TickType::Task),
            "epic" => Ok(TickType::Epic),
            "chore" => Ok(TickType::Chore),
            other => Err(ValidationError::UnknownVariant {
                field: "type",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Requires — close gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requires {
    Approval,
    Review,
    Content,
}

impl Requires {
    /// The awaiting state a close attempt is routed into.
    pub fn awaiting(&self) -> Awaiting {
        match self {
            Requires::Approval => Awaiting::Approval,
            Requires::Review => Awaiting::Review,
            Requires::Content => Awaiting::Content,
        }
    }
}

impl std::str::FromStr for Requires {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval" => Ok(Requires::Approval),
            "review" => Ok(Requires::Review),
            "content" => Ok(Requires::Content),
            other => Err(ValidationError::UnknownVariant {
                field: "requires",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Awaiting — paused pending human action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Awaiting {
    Work,
    Approval,
    Input,
    Review,
    Content,
    Escalation,
    Checkpoint,
}

impl Awaiting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Awaiting::Work => "work",
            Awaiting::Approval => "approval",
            Awaiting::Input => "input",
            Awaiting::Review => "review",
            Awaiting::Content => "content",
            Awaiting::Escalation => "escalation",
            Awaiting::Checkpoint => "checkpoint",
        }
    }
}

impl std::str::FromStr for Awaiting {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work" => Ok(Awaiting::Work),
            "approval" => Ok(Awaiting::Approval),
            "input" => Ok(Awaiting::Input),
            "review" => Ok(Awaiting::Review),
            "content" => Ok(Awaiting::Content),
            "escalation" => Ok(Awaiting::Escalation),
            "checkpoint" => Ok(Awaiting::Checkpoint),
            other => Err(ValidationError::UnknownVariant {
                field: "awaiting",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("invalid tick id `{0}`: expected 3-4 base-36 characters")]
    BadId(String),
    #[error("priority {0} out of range 0-4")]
    BadPriority(u8),
    #[error("unknown {field} value `{value}`")]
    UnknownVariant { field: &'static str, value: String },
    #[error("closed tick `{0}` has no closed_at timestamp")]
    ClosedWithoutTimestamp(String),
    #[error("non-closed tick `{0}` carries a closed_at timestamp")]
    ClosedAtOnOpen(String),
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Returns `true` when `id` is a well-formed short tick id: 3 or 4
/// lowercase base-36 characters.
pub fn is_valid_id(id: &str) -> bool {
    (id.len() == 3 || id.len() == 4)
        && id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// The atomic work item, stored as one pretty-printed JSON file under
/// `.tick/issues/<id>.json`. Field declaration order is the serialization
/// order, which keeps Git diffs stable across writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,
    pub status: Status,
    pub priority: u8,
    #[serde(rename = "type")]
    pub tick_type: TickType,
    pub owner: String,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Requires>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting: Option<Awaiting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Legacy flag predating `awaiting`; equivalent to `awaiting = work`.
    /// Omitted from serialization when false to avoid churning old files.
    #[serde(default, skip_serializing_if = "is_false")]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub closed_reason: String,
}

impl Tick {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        tick_type: TickType,
        owner: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let owner = owner.into();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            notes: String::new(),
            acceptance_criteria: String::new(),
            status: Status::Open,
            priority: 2,
            tick_type,
            owner: owner.clone(),
            created_by: owner,
            labels: Vec::new(),
            blocked_by: Vec::new(),
            parent: None,
            discovered_from: None,
            project: None,
            requires: None,
            awaiting: None,
            verdict: None,
            manual: false,
            defer_until: None,
            external_ref: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            closed_reason: String::new(),
        }
    }

    /// Validate the structural invariants. Called after every parse and
    /// before every write; the store never persists a tick that fails here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }
        if !is_valid_id(&self.id) {
            return Err(ValidationError::BadId(self.id.clone()));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title"));
        }
        if self.owner.is_empty() {
            return Err(ValidationError::EmptyField("owner"));
        }
        if self.created_by.is_empty() {
            return Err(ValidationError::EmptyField("created_by"));
        }
        if self.priority > 4 {
            return Err(ValidationError::BadPriority(self.priority));
        }
        match (self.status, self.closed_at) {
            (Status::Closed, None) => {
                return Err(ValidationError::ClosedWithoutTimestamp(self.id.clone()))
            }
            (Status::Open | Status::InProgress, Some(_)) => {
                return Err(ValidationError::ClosedAtOnOpen(self.id.clone()))
            }
            _ => {}
        }
        Ok(())
    }

    /// Advance `updated_at`, never letting it move backwards even when the
    /// wall clock does.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::milliseconds(1)
        };
    }

    pub fn is_closed(&self) -> bool {
        self.status == Status::Closed
    }

    /// A tick is deferred while `defer_until` lies in the future.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.defer_until.is_some_and(|t| now < t)
    }

    /// The effective awaiting state, folding in the legacy `manual` flag.
    /// An explicit `awaiting` always wins; `manual` alone reads as `work`.
    pub fn effective_awaiting(&self) -> Option<Awaiting> {
        self.awaiting.or(if self.manual { Some(Awaiting::Work) } else { None })
    }

    /// True when the tick is paused on a human (awaiting set or manual).
    pub fn is_awaiting(&self) -> bool {
        self.effective_awaiting().is_some()
    }

    /// Set the awaiting state. Clears the legacy `manual` flag so the two
    /// representations never disagree.
    pub fn set_awaiting(&mut self, awaiting: Awaiting) {
        self.awaiting = Some(awaiting);
        self.manual = false;
        self.touch();
    }

    /// Clear both the awaiting state and the legacy `manual` flag.
    pub fn clear_awaiting(&mut self) {
        self.awaiting = None;
        self.manual = false;
        self.touch();
    }

    /// Close the tick directly, bypassing any gate.
    pub fn close(&mut self, reason: impl Into<String>) {
        self.status = Status::Closed;
        self.closed_at = Some(Utc::now());
        self.closed_reason = reason.into();
        self.awaiting = None;
        self.manual = false;
        self.verdict = None;
        self.touch();
    }

    /// Reopen a closed tick.
    pub fn reopen(&mut self) {
        self.status = Status::Open;
        self.closed_at = None;
        self.closed_reason = String::new();
        self.touch();
    }

    /// Append a timestamped note line. Notes are append-only; `author`
    /// becomes a marker like `[human]` or `(from: cloud)` before the text.
    pub fn append_note(&mut self, text: &str, author: Option<&str>) {
        let ts = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let line = match author {
            Some(a) => format!("[{ts}] {a} {text}"),
            None => format!("[{ts}] {text}"),
        };
        if !self.notes.is_empty() && !self.notes.ends_with('\n') {
            self.notes.push('\n');
        }
        self.notes.push_str(&line);
        self.notes.push('\n');
        self.touch();
    }

    /// Add a label, keeping the set deduplicated.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
            self.touch();
        }
    }

    pub fn remove_label(&mut self, label: &str) {
        let before = self.labels.len();
        self.labels.retain(|l| l != label);
        if self.labels.len() != before {
            self.touch();
        }
    }

    /// Add a blocker id, preserving first-appearance order.
    pub fn add_blocker(&mut self, blocker: impl Into<String>) {
        let blocker = blocker.into();
        if !self.blocked_by.contains(&blocker) {
            self.blocked_by.push(blocker);
            self.touch();
        }
    }

    pub fn remove_blocker(&mut self, blocker: &str) {
        let before = self.blocked_by.len();
        self.blocked_by.retain(|b| b != blocker);
        if self.blocked_by.len() != before {
            self.touch();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tick() -> Tick {
        Tick::new("a1b", "Fix the thing", TickType::Task, "alice")
    }

    #[test]
    fn new_tick_validates() {
        make_tick().validate().unwrap();
    }

    #[test]
    fn bad_id_rejected() {
        let mut t = make_tick();
        t.id = "ZZ".into();
        assert!(t.validate().is_err());
        t.id = "toolong".into();
        assert!(t.validate().is_err());
        t.id = "A1B".into(); // uppercase
        assert!(t.validate().is_err());
    }

    #[test]
    fn four_char_id_accepted() {
        let mut t = make_tick();
        t.id = "a1b2".into();
        t.validate().unwrap();
    }

    #[test]
    fn priority_range_enforced() {
        let mut t = make_tick();
        t.priority = 5;
        assert!(matches!(t.validate(), Err(ValidationError::BadPriority(5))));
    }

    #[test]
    fn closed_requires_closed_at() {
        let mut t = make_tick();
        t.status = Status::Closed;
        assert!(t.validate().is_err());
        t.closed_at = Some(Utc::now());
        t.validate().unwrap();
    }

    #[test]
    fn open_rejects_closed_at() {
        let mut t = make_tick();
        t.closed_at = Some(Utc::now());
        assert!(matches!(
            t.validate(),
            Err(ValidationError::ClosedAtOnOpen(_))
        ));
    }

    #[test]
    fn touch_is_monotonic() {
        let mut t = make_tick();
        t.updated_at = Utc::now() + Duration::seconds(60); // clock skew
        let before = t.updated_at;
        t.touch();
        assert!(t.updated_at > before);
    }

    #[test]
    fn manual_reads_as_awaiting_work() {
        let mut t = make_tick();
        t.manual = true;
        assert_eq!(t.effective_awaiting(), Some(Awaiting::Work));
        // Explicit awaiting wins over manual.
        t.awaiting = Some(Awaiting::Input);
        assert_eq!(t.effective_awaiting(), Some(Awaiting::Input));
    }

    #[test]
    fn set_awaiting_clears_manual() {
        let mut t = make_tick();
        t.manual = true;
        t.set_awaiting(Awaiting::Review);
        assert!(!t.manual);
        assert_eq!(t.awaiting, Some(Awaiting::Review));

        t.manual = true;
        t.clear_awaiting();
        assert!(!t.manual);
        assert_eq!(t.awaiting, None);
    }

    #[test]
    fn manual_false_not_serialized() {
        let t = make_tick();
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("manual"));

        let mut t2 = make_tick();
        t2.manual = true;
        let json2 = serde_json::to_string(&t2).unwrap();
        assert!(json2.contains("\"manual\":true"));
    }

    #[test]
    fn optional_fields_omitted() {
        let t = make_tick();
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("closed_at"));
        assert!(!json.contains("awaiting"));
        assert!(!json.contains("verdict"));
        assert!(!json.contains("defer_until"));
        assert!(!json.contains("parent"));
    }

    #[test]
    fn unknown_enum_value_rejected_at_load() {
        let t = make_tick();
        let json = serde_json::to_string(&t).unwrap().replace("open", "reticulating");
        assert!(serde_json::from_str::<Tick>(&json).is_err());
    }

    #[test]
    fn append_note_adds_timestamped_line() {
        let mut t = make_tick();
        t.append_note("first finding", None);
        t.append_note("needs rework", Some("[human]"));
        let lines: Vec<&str> = t.notes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("first finding"));
        assert!(lines[1].contains("[human] needs rework"));
    }

    #[test]
    fn deferred_until_future() {
        let mut t = make_tick();
        let now = Utc::now();
        assert!(!t.is_deferred(now));
        t.defer_until = Some(now + Duration::hours(1));
        assert!(t.is_deferred(now));
        t.defer_until = Some(now - Duration::hours(1));
        assert!(!t.is_deferred(now));
    }

    #[test]
    fn labels_dedupe() {
        let mut t = make_tick();
        t.add_label("infra");
        t.add_label("infra");
        assert_eq!(t.labels, vec!["infra"]);
    }

    #[test]
    fn blockers_keep_first_appearance_order() {
        let mut t = make_tick();
        t.add_blocker("x1y");
        t.add_blocker("z2w");
        t.add_blocker("x1y");
        assert_eq!(t.blocked_by, vec!["x1y", "z2w"]);
        t.remove_blocker("x1y");
        assert_eq!(t.blocked_by, vec!["z2w"]);
    }

    #[test]
    fn close_clears_gate_state() {
        let mut t = make_tick();
        t.awaiting = Some(Awaiting::Approval);
        t.verdict = Some(Verdict::Approved);
        t.close("done");
        assert_eq!(t.status, Status::Closed);
        assert!(t.closed_at.is_some());
        assert_eq!(t.closed_reason, "done");
        assert_eq!(t.awaiting, None);
        assert_eq!(t.verdict, None);
    }

    #[test]
    fn reopen_clears_terminal_state() {
        let mut t = make_tick();
        t.close("done");
        t.reopen();
        assert_eq!(t.status, Status::Open);
        assert_eq!(t.closed_at, None);
        assert!(t.closed_reason.is_empty());
        t.validate().unwrap();
    }

    #[test]
    fn round_trip_preserves_fields() {
        let mut t = make_tick();
        t.add_label("backend");
        t.add_blocker("q9r");
        t.parent = Some("e1c".into());
        t.requires = Some(Requires::Review);
        let json = serde_json::to_string_pretty(&t).unwrap();
        let back: Tick = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
