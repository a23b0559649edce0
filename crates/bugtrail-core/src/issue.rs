//! Issue data model for bugtrail
//!
//! An issue is a denormalized current state (`IssueState`) plus an
//! append-only log of `IssueUpdate`s. Folding the log in sequence order onto
//! the initial state gives back the current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The user id meaning "nobody is assigned".
pub const UNASSIGNED: Uuid = Uuid::nil();

/// Lowest (most urgent) priority.
pub const PRIORITY_MIN: i64 = 0;
/// Highest (least urgent) priority.
pub const PRIORITY_MAX: i64 = 4;

/// Storage form of a timestamp: nanoseconds since the Unix epoch.
pub fn to_nanos(t: DateTime<Utc>) -> crate::Result<i64> {
    t.timestamp_nanos_opt()
        .ok_or_else(|| crate::Error::invalid(format!("timestamp {t} is out of range")))
}

pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Issue type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    Bug,
    FeatureRequest,
    CustomerIssue,
    InternalCleanup,
    Process,
    Vulnerability,
}

impl IssueType {
    pub const ALL: [IssueType; 6] = [
        IssueType::Bug,
        IssueType::FeatureRequest,
        IssueType::CustomerIssue,
        IssueType::InternalCleanup,
        IssueType::Process,
        IssueType::Vulnerability,
    ];

    /// Stable storage code.
    pub fn code(self) -> i64 {
        match self {
            IssueType::Bug => 1,
            IssueType::FeatureRequest => 2,
            IssueType::CustomerIssue => 3,
            IssueType::InternalCleanup => 4,
            IssueType::Process => 5,
            IssueType::Vulnerability => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl std::str::FromStr for IssueType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bug" => Ok(IssueType::Bug),
            "feature" | "feature_request" | "feature-request" => Ok(IssueType::FeatureRequest),
            "customer" | "customer_issue" | "customer-issue" => Ok(IssueType::CustomerIssue),
            "cleanup" | "internal_cleanup" | "internal-cleanup" => Ok(IssueType::InternalCleanup),
            "process" => Ok(IssueType::Process),
            "vulnerability" | "vuln" => Ok(IssueType::Vulnerability),
            _ => Err(crate::Error::InvalidArgument(format!(
                "unsupported issue type {s:?}"
            ))),
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueType::Bug => write!(f, "bug"),
            IssueType::FeatureRequest => write!(f, "feature_request"),
            IssueType::CustomerIssue => write!(f, "customer_issue"),
            IssueType::InternalCleanup => write!(f, "internal_cleanup"),
            IssueType::Process => write!(f, "process"),
            IssueType::Vulnerability => write!(f, "vulnerability"),
        }
    }
}

/// Issue status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    /// Not yet picked up. The only status an unassigned issue may have.
    #[default]
    New,
    Assigned,
    Accepted,
    Fixed,
    FixedVerified,
    WontfixNotReproducible,
    WontfixIntended,
    WontfixObsolete,
    WontfixInfeasible,
    WontfixUnfortunate,
    Duplicate,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 11] = [
        IssueStatus::New,
        IssueStatus::Assigned,
        IssueStatus::Accepted,
        IssueStatus::Fixed,
        IssueStatus::FixedVerified,
        IssueStatus::WontfixNotReproducible,
        IssueStatus::WontfixIntended,
        IssueStatus::WontfixObsolete,
        IssueStatus::WontfixInfeasible,
        IssueStatus::WontfixUnfortunate,
        IssueStatus::Duplicate,
    ];

    /// Stable storage code.
    pub fn code(self) -> i64 {
        match self {
            IssueStatus::New => 1,
            IssueStatus::Assigned => 2,
            IssueStatus::Accepted => 3,
            IssueStatus::Fixed => 4,
            IssueStatus::FixedVerified => 5,
            IssueStatus::WontfixNotReproducible => 6,
            IssueStatus::WontfixIntended => 7,
            IssueStatus::WontfixObsolete => 8,
            IssueStatus::WontfixInfeasible => 9,
            IssueStatus::WontfixUnfortunate => 10,
            IssueStatus::Duplicate => 11,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_new(self) -> bool {
        self == IssueStatus::New
    }

    /// Parse human-provided text, accepting the short aliases used in search
    /// queries. Returns `None` when nothing matches.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "new" => Some(IssueStatus::New),
            "assigned" => Some(IssueStatus::Assigned),
            "accepted" => Some(IssueStatus::Accepted),
            "fixed" => Some(IssueStatus::Fixed),
            "verified" | "fixed_verified" => Some(IssueStatus::FixedVerified),
            "not_reproducible" | "wontfix_not_reproducible" => {
                Some(IssueStatus::WontfixNotReproducible)
            }
            "intended" | "wontfix_intended" => Some(IssueStatus::WontfixIntended),
            "obsolete" | "wontfix_obsolete" => Some(IssueStatus::WontfixObsolete),
            "infeasible" | "wontfix_infeasible" => Some(IssueStatus::WontfixInfeasible),
            "unfortunate" | "wontfix_unfortunate" => Some(IssueStatus::WontfixUnfortunate),
            "duplicate" => Some(IssueStatus::Duplicate),
            _ => None,
        }
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssueStatus::parse_loose(s)
            .ok_or_else(|| crate::Error::InvalidArgument(format!("unsupported status {s:?}")))
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueStatus::New => "new",
            IssueStatus::Assigned => "assigned",
            IssueStatus::Accepted => "accepted",
            IssueStatus::Fixed => "fixed",
            IssueStatus::FixedVerified => "fixed_verified",
            IssueStatus::WontfixNotReproducible => "wontfix_not_reproducible",
            IssueStatus::WontfixIntended => "wontfix_intended",
            IssueStatus::WontfixObsolete => "wontfix_obsolete",
            IssueStatus::WontfixInfeasible => "wontfix_infeasible",
            IssueStatus::WontfixUnfortunate => "wontfix_unfortunate",
            IssueStatus::Duplicate => "duplicate",
        };
        write!(f, "{s}")
    }
}

/// The mutable, denormalized part of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueState {
    pub title: String,

    /// `None` means unassigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Uuid>,

    #[serde(rename = "type")]
    pub issue_type: IssueType,

    /// 0 (most urgent) to 4
    pub priority: i64,

    #[serde(default)]
    pub status: IssueStatus,
}

impl IssueState {
    /// A fresh NEW, unassigned state.
    pub fn new(title: impl Into<String>, issue_type: IssueType, priority: i64) -> Self {
        Self {
            title: title.into(),
            assignee: None,
            issue_type,
            priority,
            status: IssueStatus::New,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assignee.is_some()
    }

    /// The state that results from naively applying `diff`.
    pub fn apply(&self, diff: &IssueDiff) -> IssueState {
        let mut next = self.clone();
        if let Some(title) = &diff.title {
            next.title = title.clone();
        }
        if let Some(change) = diff.assignee {
            next.assignee = change.target();
        }
        if let Some(issue_type) = diff.issue_type {
            next.issue_type = issue_type;
        }
        if let Some(priority) = diff.priority {
            next.priority = priority;
        }
        if let Some(status) = diff.status {
            next.status = status;
        }
        next
    }

    /// Fold a history onto an initial state, in sequence order.
    pub fn replay<'a>(initial: &IssueState, updates: impl IntoIterator<Item = &'a IssueUpdate>) -> IssueState {
        let mut updates: Vec<&IssueUpdate> = updates.into_iter().collect();
        updates.sort_by_key(|u| u.id);
        updates
            .into_iter()
            .fold(initial.clone(), |state, update| state.apply(&update.diff))
    }
}

/// A change to an issue's assignee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneeChange {
    Unassign,
    Assign(Uuid),
}

impl AssigneeChange {
    /// The assignee after the change, `None` for unassigned.
    pub fn target(self) -> Option<Uuid> {
        match self {
            AssigneeChange::Unassign => None,
            AssigneeChange::Assign(id) if id == UNASSIGNED => None,
            AssigneeChange::Assign(id) => Some(id),
        }
    }

    pub fn from_target(target: Option<Uuid>) -> Self {
        match target {
            Some(id) if id != UNASSIGNED => AssigneeChange::Assign(id),
            _ => AssigneeChange::Unassign,
        }
    }
}

/// A proposed change to an issue. Every `None` field means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<AssigneeChange>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
}

impl IssueDiff {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.assignee.is_none()
            && self.issue_type.is_none()
            && self.priority.is_none()
            && self.status.is_none()
    }
}

/// A stored issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Backend-assigned, monotonically increasing
    pub id: i64,

    /// Who filed the issue
    pub author: Uuid,

    pub created: DateTime<Utc>,

    /// Bumped whenever an update is appended
    pub last_updated: DateTime<Utc>,

    pub category: Uuid,

    /// Denormalized projection of the update log
    pub current: IssueState,
}

/// An issue that has not been stored yet. It has no id: the backend assigns
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub author: Uuid,

    /// Defaults to now
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    /// Defaults to the root category
    #[serde(default)]
    pub category: Option<Uuid>,

    pub state: IssueState,
}

/// One entry of an issue's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueUpdate {
    pub issue_id: i64,

    /// Sequence number within the issue, starting at 1
    pub id: i64,

    pub created: DateTime<Utc>,

    pub author: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    pub diff: IssueDiff,
}

/// An update about to be appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssueUpdate {
    pub issue_id: i64,
    pub author: Uuid,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub diff: IssueDiff,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} [P{}] [{}] {} - {}",
            self.id,
            self.current.priority,
            self.current.issue_type,
            self.current.status,
            self.current.title
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: i64, diff: IssueDiff) -> IssueUpdate {
        IssueUpdate {
            issue_id: 1,
            id,
            created: Utc::now(),
            author: Uuid::new_v4(),
            comment: None,
            diff,
        }
    }

    #[test]
    fn test_codes_are_stable() {
        for t in IssueType::ALL {
            assert_eq!(IssueType::from_code(t.code()), Some(t));
        }
        for s in IssueStatus::ALL {
            assert_eq!(IssueStatus::from_code(s.code()), Some(s));
        }
        assert_eq!(IssueStatus::from_code(0), None);
        assert_eq!(IssueType::from_code(7), None);
    }

    #[test]
    fn test_status_aliases() {
        assert_eq!(IssueStatus::parse_loose("Verified"), Some(IssueStatus::FixedVerified));
        assert_eq!(IssueStatus::parse_loose(" obsolete "), Some(IssueStatus::WontfixObsolete));
        assert_eq!(IssueStatus::parse_loose("open"), None);
        assert!("bogus".parse::<IssueStatus>().is_err());
    }

    #[test]
    fn test_replay_uses_sequence_order() {
        let initial = IssueState::new("foo", IssueType::Bug, 2);
        let q3k = Uuid::new_v4();
        let updates = vec![
            update(
                2,
                IssueDiff {
                    status: Some(IssueStatus::Accepted),
                    ..Default::default()
                },
            ),
            update(
                1,
                IssueDiff {
                    title: Some("foo in bar".into()),
                    assignee: Some(AssigneeChange::Assign(q3k)),
                    status: Some(IssueStatus::Assigned),
                    ..Default::default()
                },
            ),
        ];

        let end = IssueState::replay(&initial, &updates);
        assert_eq!(end.title, "foo in bar");
        assert_eq!(end.assignee, Some(q3k));
        assert_eq!(end.status, IssueStatus::Accepted);
    }

    #[test]
    fn test_nanos_roundtrip_keeps_precision() {
        let t = from_nanos(1_589_000_000_123_456_789);
        assert_eq!(to_nanos(t).unwrap(), 1_589_000_000_123_456_789);
        assert!(to_nanos(DateTime::<Utc>::MAX_UTC).is_err());
    }

    #[test]
    fn test_assign_to_sentinel_is_unassign() {
        assert_eq!(AssigneeChange::Assign(UNASSIGNED).target(), None);
        assert_eq!(AssigneeChange::from_target(Some(UNASSIGNED)), AssigneeChange::Unassign);
    }
}
