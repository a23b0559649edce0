mod common;

use bugtrail_core::db::{FilterOpts, HistoryOpts, IssueFilter, IssueOrder, OrderBy};
use bugtrail_core::issue::{
    AssigneeChange, IssueDiff, IssueState, IssueStatus, IssueType, NewIssue, NewIssueUpdate,
};
use bugtrail_core::{Database, Error};
use chrono::{Duration, Utc};
use uuid::Uuid;

async fn file(db: &Database, author: Uuid, title: &str) -> i64 {
    db.auto()
        .issues()
        .create(NewIssue {
            author,
            created: None,
            category: None,
            state: IssueState::new(title, IssueType::Bug, 2),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_ids_increase() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let author = common::user(&db, "q3k").await;

    let mut last = 0;
    for i in 0..20 {
        let id = file(&db, author, &format!("issue {i}")).await;
        assert!(id > last, "{id} after {last}");
        last = id;
    }
}

#[tokio::test]
async fn test_create_and_get() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let author = common::user(&db, "q3k").await;
    let issues = db.auto().issues();

    let created = Utc::now() - Duration::days(3);
    let issue = issues
        .create(NewIssue {
            author,
            created: Some(created),
            category: None,
            state: IssueState::new("foo is broken", IssueType::Vulnerability, 0),
        })
        .await
        .unwrap();
    assert!(issue.last_updated > issue.created);

    let got = issues.get(issue.id).await.unwrap();
    assert_eq!(got, issue);
    assert_eq!(got.current.issue_type, IssueType::Vulnerability);
    assert_eq!(got.current.assignee, None);

    assert_eq!(
        issues.get(issue.id + 1000).await,
        Err(Error::NotFound("issue not found".into()))
    );

    let future = issues
        .create(NewIssue {
            author,
            created: Some(Utc::now() + Duration::days(1)),
            category: None,
            state: IssueState::new("from the future", IssueType::Bug, 2),
        })
        .await;
    assert!(matches!(future, Err(Error::InvalidArgument(_))));

    let lost = issues
        .create(NewIssue {
            author,
            created: None,
            category: Some(Uuid::new_v4()),
            state: IssueState::new("lost", IssueType::Bug, 2),
        })
        .await;
    assert_eq!(lost, Err(Error::NotFound("category not found".into())));
}

#[tokio::test]
async fn test_history_reconstructs_current_state() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let q3k = common::user(&db, "q3k").await;
    let implr = common::user(&db, "implr").await;
    let issues = db.auto().issues();

    let initial = IssueState::new("foo", IssueType::Bug, 2);
    let id = issues
        .create(NewIssue {
            author: q3k,
            created: None,
            category: None,
            state: initial.clone(),
        })
        .await
        .unwrap()
        .id;

    let diffs = [
        IssueDiff {
            assignee: Some(AssigneeChange::Assign(q3k)),
            status: Some(IssueStatus::Assigned),
            ..Default::default()
        },
        IssueDiff {
            title: Some("foo in bar".into()),
            priority: Some(1),
            ..Default::default()
        },
        IssueDiff::default(),
        IssueDiff {
            assignee: Some(AssigneeChange::Assign(implr)),
            issue_type: Some(IssueType::CustomerIssue),
            ..Default::default()
        },
        IssueDiff {
            status: Some(IssueStatus::Fixed),
            ..Default::default()
        },
    ];
    for (i, diff) in diffs.into_iter().enumerate() {
        let appended = issues
            .update(NewIssueUpdate {
                issue_id: id,
                author: q3k,
                comment: Some(format!("step {i}")),
                diff,
            })
            .await
            .unwrap();
        assert_eq!(appended.id, i as i64 + 1);
    }

    let history = issues.get_history(id, HistoryOpts::default()).await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[2].comment.as_deref(), Some("step 2"));
    assert!(history[2].diff.is_empty());

    let current = issues.get(id).await.unwrap();
    assert_eq!(IssueState::replay(&initial, &history), current.current);
    assert_eq!(current.current.title, "foo in bar");
    assert_eq!(current.current.assignee, Some(implr));
    assert_eq!(current.current.status, IssueStatus::Fixed);

    let page = issues
        .get_history(
            id,
            HistoryOpts {
                start: Some(2),
                count: Some(2),
            },
        )
        .await
        .unwrap();
    let seqs: Vec<i64> = page.iter().map(|u| u.id).collect();
    assert_eq!(seqs, vec![3, 4]);

    assert_eq!(
        issues
            .update(NewIssueUpdate {
                issue_id: id + 1000,
                author: q3k,
                comment: None,
                diff: IssueDiff::default(),
            })
            .await,
        Err(Error::NotFound("issue not found".into()))
    );
}

#[tokio::test]
async fn test_filter() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let q3k = common::user(&db, "q3k").await;
    let implr = common::user(&db, "implr").await;
    let issues = db.auto().issues();

    let mut by_q3k = Vec::new();
    for i in 0..5 {
        by_q3k.push(file(&db, q3k, &format!("q3k {i}")).await);
    }
    let by_implr = file(&db, implr, "implr 0").await;

    issues
        .update(NewIssueUpdate {
            issue_id: by_q3k[1],
            author: q3k,
            comment: None,
            diff: IssueDiff {
                assignee: Some(AssigneeChange::Assign(implr)),
                status: Some(IssueStatus::Assigned),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let ids = |found: Vec<bugtrail_core::Issue>| found.into_iter().map(|i| i.id).collect::<Vec<_>>();
    let asc = IssueOrder::default();
    let desc = IssueOrder {
        by: OrderBy::Created,
        descending: true,
    };

    let author = IssueFilter {
        author: Some("q3k".into()),
        ..Default::default()
    };
    let found = issues.filter(&author, asc, FilterOpts::default()).await.unwrap();
    assert_eq!(ids(found), by_q3k);

    let found = issues.filter(&author, desc, FilterOpts::default()).await.unwrap();
    let mut reversed = by_q3k.clone();
    reversed.reverse();
    assert_eq!(ids(found), reversed);

    let first_two = issues
        .filter(
            &author,
            asc,
            FilterOpts {
                start: None,
                count: Some(2),
            },
        )
        .await
        .unwrap();
    let cursor = OrderBy::Created.cursor(&first_two[1]).unwrap();
    let rest = issues
        .filter(
            &author,
            asc,
            FilterOpts {
                start: Some(cursor),
                count: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(first_two), by_q3k[..2].to_vec());
    assert_eq!(ids(rest), by_q3k[2..].to_vec());

    let assigned = IssueFilter {
        assignee: Some("implr".into()),
        status: Some(IssueStatus::Assigned),
        ..Default::default()
    };
    let found = issues.filter(&assigned, asc, FilterOpts::default()).await.unwrap();
    assert_eq!(ids(found), vec![by_q3k[1]]);

    let new = IssueFilter {
        status: Some(IssueStatus::New),
        ..Default::default()
    };
    let found = issues
        .filter(
            &new,
            IssueOrder {
                by: OrderBy::LastUpdated,
                descending: false,
            },
            FilterOpts::default(),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 5);
    assert_eq!(found.last().map(|i| i.id), Some(by_implr));

    let nobody = IssueFilter {
        author: Some("nobody".into()),
        ..Default::default()
    };
    assert!(issues.filter(&nobody, asc, FilterOpts::default()).await.unwrap().is_empty());

    assert!(matches!(
        issues.filter(&IssueFilter::default(), asc, FilterOpts::default()).await,
        Err(Error::Unimplemented(_))
    ));

    let none = issues
        .filter(
            &author,
            asc,
            FilterOpts {
                start: None,
                count: Some(0),
            },
        )
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_users() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let users = db.auto().users();

    let id = common::user(&db, "q3k").await;
    assert_eq!(users.resolve_username("q3k").await, Ok(id));
    assert_eq!(users.get(id).await.unwrap().username, "q3k");

    assert_eq!(
        users.resolve_username("nobody").await,
        Err(Error::NotFound("no such username".into()))
    );
    assert_eq!(
        users.get(Uuid::new_v4()).await.map(|u| u.id),
        Err(Error::NotFound("no such user".into()))
    );
    assert_eq!(
        users
            .create(bugtrail_core::db::NewUser::named("q3k"))
            .await
            .map(|u| u.id),
        Err(Error::AlreadyExists("duplicate username".into()))
    );
}
