//! Request validation
//!
//! Runs before any write. Type and status are closed enums, so they are
//! already valid once a request has been decoded.

use uuid::Uuid;

use crate::issue::{IssueDiff, IssueState, PRIORITY_MAX, PRIORITY_MIN};
use crate::{Error, Result};

pub const MAX_TITLE_LEN: usize = 255;

/// A user reference must name a real user, never the unassigned sentinel.
pub fn user(field: &str, id: Uuid) -> Result<()> {
    if id.is_nil() {
        return Err(Error::invalid(format!("{field}: must be set")));
    }
    Ok(())
}

pub fn title(title: &str) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::invalid("issue title must be set"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::invalid(format!(
            "issue title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

pub fn priority(p: i64) -> Result<()> {
    if (PRIORITY_MIN..=PRIORITY_MAX).contains(&p) {
        Ok(())
    } else {
        Err(Error::invalid("priority: must be between P0 and P4"))
    }
}

/// Validate a new issue's author, initial state and cc list.
pub fn new_issue(author: Uuid, state: &IssueState, cc: &[Uuid]) -> Result<()> {
    user("author", author)?;
    title(&state.title)?;
    if let Some(assignee) = state.assignee {
        user("assignee", assignee)?;
    }
    for (i, u) in cc.iter().enumerate() {
        user(&format!("cc[{i}]"), *u)?;
    }
    priority(state.priority)
}

/// Validate the fields a diff sets. Assigning to the nil id means
/// unassignment and is accepted.
pub fn diff(diff: &IssueDiff) -> Result<()> {
    if let Some(t) = &diff.title {
        title(t)?;
    }
    if let Some(p) = diff.priority {
        priority(p)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{AssigneeChange, IssueType};

    #[test]
    fn test_user() {
        assert!(user("author", Uuid::new_v4()).is_ok());
        assert_eq!(
            user("author", Uuid::nil()),
            Err(Error::InvalidArgument("author: must be set".into()))
        );
    }

    #[test]
    fn test_title() {
        assert!(title("foo is broken").is_ok());
        assert!(title("   ").is_err());
        assert!(title(&"x".repeat(MAX_TITLE_LEN)).is_ok());
        assert!(title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn test_priority_bounds() {
        for p in 0..=4 {
            assert!(priority(p).is_ok());
        }
        assert!(priority(-1).is_err());
        assert!(priority(5).is_err());
    }

    #[test]
    fn test_new_issue() {
        let author = Uuid::new_v4();
        let state = IssueState::new("foo", IssueType::Bug, 2);
        assert!(new_issue(author, &state, &[Uuid::new_v4()]).is_ok());
        assert!(new_issue(Uuid::nil(), &state, &[]).is_err());

        let err = new_issue(author, &state, &[Uuid::new_v4(), Uuid::nil()]).unwrap_err();
        assert_eq!(err, Error::InvalidArgument("cc[1]: must be set".into()));

        let mut bad = state.clone();
        bad.priority = 9;
        assert!(new_issue(author, &bad, &[]).is_err());

        let mut bad = state;
        bad.assignee = Some(Uuid::nil());
        assert!(new_issue(author, &bad, &[]).is_err());
    }

    #[test]
    fn test_diff() {
        assert!(diff(&IssueDiff::default()).is_ok());
        assert!(
            diff(&IssueDiff {
                priority: Some(7),
                ..Default::default()
            })
            .is_err()
        );
        assert!(
            diff(&IssueDiff {
                title: Some(String::new()),
                ..Default::default()
            })
            .is_err()
        );
        assert!(
            diff(&IssueDiff {
                assignee: Some(AssigneeChange::Assign(Uuid::nil())),
                ..Default::default()
            })
            .is_ok()
        );
    }
}
