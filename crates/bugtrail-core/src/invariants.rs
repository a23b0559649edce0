//! Status/assignee invariant enforcement
//!
//! Stored issues must satisfy `status == NEW` iff unassigned. Every diff is
//! normalized here, against the issue's current state, before it reaches
//! storage. The engine is a pure function and never touches fields other
//! than `status` and `assignee`.

use crate::issue::{AssigneeChange, IssueDiff, IssueState, IssueStatus};

/// Normalize `diff` so that applying it to `current` yields a state that
/// respects the NEW/unassigned coupling.
///
/// Resolution rules, evaluated on the naively applied state:
///  - NEW but assigned:
///    - the diff sets NEW: drop the diff's assignment if the issue was
///      unassigned before, otherwise force unassignment;
///    - a NEW issue gets assigned without a status change: move it to
///      ASSIGNED;
///    - otherwise force unassignment.
///  - not NEW but unassigned:
///    - the diff moves a NEW issue off NEW: if it also unassigned someone,
///      keep the assignee; otherwise discard the status change;
///    - the diff unassigned someone: move back to NEW;
///    - otherwise force NEW and unassignment.
pub fn apply_invariants(current: &IssueState, diff: &mut IssueDiff) {
    let next = current.apply(diff);

    if next.status.is_new() && next.is_assigned() {
        if diff.status == Some(IssueStatus::New) {
            if diff.assignee.is_some() && !current.is_assigned() {
                diff.assignee = None;
            } else {
                diff.assignee = Some(AssigneeChange::Unassign);
            }
        } else if current.status.is_new()
            && diff.status.is_none()
            && matches!(diff.assignee, Some(AssigneeChange::Assign(_)))
        {
            diff.status = Some(IssueStatus::Assigned);
        } else {
            diff.assignee = Some(AssigneeChange::Unassign);
        }
    } else if !next.status.is_new() && !next.is_assigned() {
        if current.status.is_new() {
            if current.is_assigned() && diff.assignee.is_some() {
                diff.assignee = None;
            } else {
                diff.status = None;
            }
        } else if current.is_assigned() {
            diff.status = Some(IssueStatus::New);
        } else {
            diff.status = Some(IssueStatus::New);
            diff.assignee = Some(AssigneeChange::Unassign);
        }
    }
}

/// Normalize an initial issue state, treating it as a diff against a NEW,
/// unassigned baseline.
pub fn normalize_initial(state: &IssueState) -> IssueState {
    let baseline = IssueState {
        assignee: None,
        status: IssueStatus::New,
        ..state.clone()
    };
    let mut diff = IssueDiff {
        assignee: state.assignee.map(AssigneeChange::Assign),
        status: Some(state.status),
        ..Default::default()
    };
    apply_invariants(&baseline, &mut diff);
    baseline.apply(&diff)
}

/// True when `state` satisfies the NEW/unassigned coupling.
pub fn is_consistent(state: &IssueState) -> bool {
    state.status.is_new() != state.is_assigned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueType;
    use uuid::Uuid;

    fn state(status: IssueStatus, assignee: Option<Uuid>) -> IssueState {
        IssueState {
            title: "foo".into(),
            assignee,
            issue_type: IssueType::Bug,
            priority: 2,
            status,
        }
    }

    fn diff(status: Option<IssueStatus>, assignee: Option<AssigneeChange>) -> IssueDiff {
        IssueDiff {
            status,
            assignee,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_diff_stays_empty() {
        let q3k = Uuid::new_v4();
        let cur = state(IssueStatus::WontfixUnfortunate, Some(q3k));
        let mut d = IssueDiff::default();
        apply_invariants(&cur, &mut d);
        assert!(d.is_empty());
    }

    #[test]
    fn test_assigning_new_issue_moves_to_assigned() {
        let q3k = Uuid::new_v4();
        let cur = state(IssueStatus::New, None);
        let mut d = diff(None, Some(AssigneeChange::Assign(q3k)));
        apply_invariants(&cur, &mut d);
        assert_eq!(
            d,
            diff(Some(IssueStatus::Assigned), Some(AssigneeChange::Assign(q3k)))
        );
    }

    #[test]
    fn test_unassigning_moves_back_to_new() {
        let q3k = Uuid::new_v4();
        let cur = state(IssueStatus::Assigned, Some(q3k));
        let mut d = diff(None, Some(AssigneeChange::Unassign));
        apply_invariants(&cur, &mut d);
        assert_eq!(
            d,
            diff(Some(IssueStatus::New), Some(AssigneeChange::Unassign))
        );
    }

    #[test]
    fn test_status_new_unassigns() {
        let q3k = Uuid::new_v4();
        let cur = state(IssueStatus::Fixed, Some(q3k));
        let mut d = diff(Some(IssueStatus::New), None);
        apply_invariants(&cur, &mut d);
        assert_eq!(d, diff(Some(IssueStatus::New), Some(AssigneeChange::Unassign)));
    }

    #[test]
    fn test_status_new_with_assignment_drops_assignment() {
        let q3k = Uuid::new_v4();
        let cur = state(IssueStatus::New, None);
        let mut d = diff(Some(IssueStatus::New), Some(AssigneeChange::Assign(q3k)));
        apply_invariants(&cur, &mut d);
        assert_eq!(d, diff(Some(IssueStatus::New), None));
    }

    #[test]
    fn test_valid_transitions_untouched() {
        let q3k = Uuid::new_v4();
        let cur = state(IssueStatus::Assigned, Some(q3k));
        let mut d = diff(Some(IssueStatus::Accepted), None);
        apply_invariants(&cur, &mut d);
        assert_eq!(d, diff(Some(IssueStatus::Accepted), None));

        let cur = state(IssueStatus::New, None);
        let mut d = diff(Some(IssueStatus::Assigned), Some(AssigneeChange::Assign(q3k)));
        apply_invariants(&cur, &mut d);
        assert_eq!(
            d,
            diff(Some(IssueStatus::Assigned), Some(AssigneeChange::Assign(q3k)))
        );
    }

    #[test]
    fn test_status_change_without_assignee_is_discarded() {
        let cur = state(IssueStatus::New, None);
        let mut d = diff(Some(IssueStatus::Accepted), None);
        apply_invariants(&cur, &mut d);
        assert_eq!(d, IssueDiff::default());
    }

    #[test]
    fn test_other_fields_untouched() {
        let q3k = Uuid::new_v4();
        let cur = state(IssueStatus::Assigned, Some(q3k));
        let mut d = IssueDiff {
            title: Some("bar".into()),
            priority: Some(0),
            issue_type: Some(IssueType::Process),
            assignee: Some(AssigneeChange::Unassign),
            status: None,
        };
        apply_invariants(&cur, &mut d);
        assert_eq!(d.title.as_deref(), Some("bar"));
        assert_eq!(d.priority, Some(0));
        assert_eq!(d.issue_type, Some(IssueType::Process));
    }

    #[test]
    fn test_closure_over_all_inputs() {
        let q3k = Uuid::new_v4();
        let implr = Uuid::new_v4();
        let assignees = [None, Some(q3k)];
        let changes = [
            None,
            Some(AssigneeChange::Unassign),
            Some(AssigneeChange::Assign(q3k)),
            Some(AssigneeChange::Assign(implr)),
        ];
        let statuses: Vec<Option<IssueStatus>> = std::iter::once(None)
            .chain(IssueStatus::ALL.into_iter().map(Some))
            .collect();

        for cur_status in IssueStatus::ALL {
            for cur_assignee in assignees {
                let cur = state(cur_status, cur_assignee);
                for change in changes {
                    for status in &statuses {
                        let mut d = diff(*status, change);
                        apply_invariants(&cur, &mut d);
                        let next = cur.apply(&d);
                        assert!(
                            is_consistent(&next),
                            "cur={cur:?} diff={:?} normalized={d:?} gives {next:?}",
                            diff(*status, change)
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_normalize_initial() {
        let q3k = Uuid::new_v4();

        let s = normalize_initial(&state(IssueStatus::New, Some(q3k)));
        assert_eq!(s.assignee, None);
        assert_eq!(s.status, IssueStatus::New);

        let s = normalize_initial(&state(IssueStatus::Accepted, None));
        assert_eq!(s.status, IssueStatus::New);

        let s = normalize_initial(&state(IssueStatus::Accepted, Some(q3k)));
        assert_eq!(s.status, IssueStatus::Accepted);
        assert_eq!(s.assignee, Some(q3k));
    }

    #[test]
    fn test_issue_lifetime() {
        let q3k = Uuid::new_v4();
        let implr = Uuid::new_v4();
        let mut cur = state(IssueStatus::New, None);
        let steps = [
            diff(None, Some(AssigneeChange::Assign(q3k))),
            diff(Some(IssueStatus::Accepted), None),
            diff(Some(IssueStatus::Fixed), None),
            diff(Some(IssueStatus::New), None),
            diff(None, Some(AssigneeChange::Assign(q3k))),
            diff(Some(IssueStatus::Accepted), None),
            diff(Some(IssueStatus::Fixed), Some(AssigneeChange::Assign(implr))),
            diff(Some(IssueStatus::FixedVerified), None),
        ];
        for mut d in steps {
            apply_invariants(&cur, &mut d);
            cur = cur.apply(&d);
            assert!(is_consistent(&cur));
        }
        assert_eq!(cur.status, IssueStatus::FixedVerified);
        assert_eq!(cur.assignee, Some(implr));
    }
}
