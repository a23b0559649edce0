//! Issue tracking operations
//!
//! [`Service`] is what transports call. It validates requests, enforces the
//! status/assignee invariants and picks the transaction shape for each
//! operation. Streaming reads deliver chunks through a
//! `tokio::sync::mpsc::Sender`; a closed receiver stops the stream with
//! [`Error::Cancelled`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::{
    Category, CategoryNode, Database, FilterOpts, HistoryOpts, IssueFilter, IssueOrder, NewCategory,
    NewUser, OrderBy, Session, User,
};
use crate::invariants::{apply_invariants, normalize_initial};
use crate::issue::{Issue, IssueDiff, IssueState, IssueStatus, IssueUpdate, NewIssue, NewIssueUpdate};
use crate::pagination::{resample, PageRequest, Pagination};
use crate::search::{self, Query};
use crate::{validation, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssueRequest {
    pub author: Uuid,
    pub initial_state: IssueState,

    /// Users to notify. Validated, not stored yet.
    #[serde(default)]
    pub cc: Vec<Uuid>,

    /// Defaults to the root category
    #[serde(default)]
    pub category: Option<Uuid>,

    #[serde(default)]
    pub initial_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateIssueRequest {
    pub id: i64,
    pub author: Uuid,
    #[serde(default)]
    pub comment: Option<String>,
    pub diff: Option<IssueDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueQuery {
    ById(i64),
    BySearch(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetIssuesRequest {
    pub query: IssueQuery,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetIssueUpdatesRequest {
    pub id: i64,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesChunk {
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatesChunk {
    /// Only set on the first chunk of a stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Issue>,
    pub updates: Vec<IssueUpdate>,
}

/// What a search query turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SearchPlan {
    ById(i64),
    Filter(IssueFilter),
}

fn normalize_username(s: Option<&str>) -> Option<String> {
    s.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
}

fn plan_search(q: &Query) -> Result<SearchPlan> {
    let id = q
        .id
        .as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0);
    if id != 0 {
        return Ok(SearchPlan::ById(id));
    }

    let filter = IssueFilter {
        author: normalize_username(q.author.as_deref()),
        assignee: normalize_username(q.assignee.as_deref()),
        status: q.status.as_deref().and_then(IssueStatus::parse_loose),
    };
    if filter.is_empty() {
        return Err(Error::Unimplemented(
            "no keyword search implemented, use query filters".to_string(),
        ));
    }
    Ok(SearchPlan::Filter(filter))
}

fn receiver_gone() -> Error {
    Error::Cancelled("stream receiver closed".to_string())
}

#[derive(Debug, Clone)]
pub struct Service {
    db: Database,
}

impl Service {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect, and migrate when the config asks for it.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db = Database::connect_with(config).await?;
        if config.migrate_on_start {
            db.migrate().await?;
        }
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Bound `fut` by `timeout`. Expiry yields `DeadlineExceeded`.
    pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(timeout, fut).await?
    }

    /// File a new issue and return its id.
    pub async fn new_issue(&self, req: NewIssueRequest) -> Result<i64> {
        validation::new_issue(req.author, &req.initial_state, &req.cc)
            .map_err(|e| Error::invalid(format!("invalid issue: {}", detail(&e))))?;

        let mut session = self.db.begin().await?;
        let res = insert_issue(&mut session, req).await;
        let id = session.finish(res).await?;
        info!(id, "filed issue");
        Ok(id)
    }

    /// Apply a diff to an issue, after normalizing it against the issue's
    /// current state. Returns the appended history entry.
    pub async fn update_issue(&self, req: UpdateIssueRequest) -> Result<IssueUpdate> {
        validation::user("author", req.author)?;
        let diff = req.diff.ok_or_else(|| Error::invalid("diff must be set"))?;
        validation::diff(&diff)?;

        let mut session = self.db.begin().await?;
        let res = append_update(&mut session, req.id, req.author, req.comment, diff).await;
        session.finish(res).await
    }

    pub async fn get_issues(&self, req: GetIssuesRequest, sink: &mpsc::Sender<IssuesChunk>) -> Result<()> {
        let search = match req.query {
            IssueQuery::ById(id) => return self.send_issue(id, sink).await,
            IssueQuery::BySearch(search) => search,
        };

        let search = search.trim();
        if search.is_empty() {
            return Err(Error::invalid("search must be set and non-empty"));
        }
        let query = search::parse(search);
        debug!(?query, "query by search");

        let filter = match plan_search(&query)? {
            SearchPlan::ById(id) => return self.send_issue(id, sink).await,
            SearchPlan::Filter(filter) => filter,
        };

        let page = PageRequest::from_selector(req.pagination.as_ref())?;
        let order = IssueOrder {
            by: req.order_by,
            descending: req.direction == Direction::Descending,
        };

        resample(page.after, page.count, |_, start, count| {
            let db = self.db.clone();
            let filter = filter.clone();
            let sink = sink.clone();
            async move {
                let opts = FilterOpts {
                    start,
                    count: Some(count),
                };
                let issues = db.auto().issues().filter(&filter, order, opts).await?;
                let next = match issues.last() {
                    Some(last) => Some(order.by.cursor(last)?),
                    None => start,
                };
                let n = issues.len();
                sink.send(IssuesChunk { issues })
                    .await
                    .map_err(|_| receiver_gone())?;
                Ok((n, next))
            }
        })
        .await
    }

    async fn send_issue(&self, id: i64, sink: &mpsc::Sender<IssuesChunk>) -> Result<()> {
        let issue = self.db.auto().issues().get(id).await?;
        sink.send(IssuesChunk {
            issues: vec![issue],
        })
        .await
        .map_err(|_| receiver_gone())
    }

    /// Stream an issue's history. The first chunk also carries the issue.
    pub async fn get_issue_updates(
        &self,
        req: GetIssueUpdatesRequest,
        sink: &mpsc::Sender<UpdatesChunk>,
    ) -> Result<()> {
        let page = PageRequest::from_selector(req.pagination.as_ref())?;
        let id = req.id;

        resample(page.after, page.count, |first, start, count| {
            let db = self.db.clone();
            let sink = sink.clone();
            async move {
                let auto = db.auto();
                let current = if first {
                    Some(auto.issues().get(id).await?)
                } else {
                    None
                };
                let opts = HistoryOpts {
                    start,
                    count: Some(count),
                };
                let updates = auto.issues().get_history(id, opts).await?;
                let next = updates.last().map(|u| u.id).or(start);
                let n = updates.len();
                sink.send(UpdatesChunk { current, updates })
                    .await
                    .map_err(|_| receiver_gone())?;
                Ok((n, next))
            }
        })
        .await
    }

    pub async fn new_user(&self, new: NewUser) -> Result<User> {
        let new = NewUser {
            username: new.username.trim().to_lowercase(),
            ..new
        };
        self.db.auto().users().create(new).await
    }

    pub async fn resolve_username(&self, username: &str) -> Result<Uuid> {
        self.db
            .auto()
            .users()
            .resolve_username(&username.trim().to_lowercase())
            .await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        self.db.auto().users().get(id).await
    }

    pub async fn category_tree(&self, root: Uuid, levels: u32) -> Result<CategoryNode> {
        self.db.auto().categories().get_tree(root, levels).await
    }

    pub async fn new_category(&self, new: NewCategory) -> Result<Category> {
        self.db.auto().categories().create(new).await
    }

    pub async fn update_category(&self, category: &Category) -> Result<()> {
        self.db.auto().categories().update(category).await
    }

    pub async fn delete_category(&self, id: Uuid) -> Result<()> {
        self.db.auto().categories().delete(id).await
    }
}

/// The message of an `InvalidArgument`, without the variant prefix.
fn detail(err: &Error) -> String {
    match err {
        Error::InvalidArgument(msg) => msg.clone(),
        other => other.to_string(),
    }
}

async fn insert_issue(session: &mut Session, req: NewIssueRequest) -> Result<i64> {
    let issue = session
        .issues()
        .create(NewIssue {
            author: req.author,
            created: None,
            category: req.category,
            state: normalize_initial(&req.initial_state),
        })
        .await?;

    if let Some(comment) = req.initial_comment.filter(|c| !c.trim().is_empty()) {
        session
            .issues()
            .update(NewIssueUpdate {
                issue_id: issue.id,
                author: req.author,
                comment: Some(comment),
                diff: IssueDiff::default(),
            })
            .await?;
    }
    Ok(issue.id)
}

async fn append_update(
    session: &mut Session,
    id: i64,
    author: Uuid,
    comment: Option<String>,
    mut diff: IssueDiff,
) -> Result<IssueUpdate> {
    let issue = session.issues().get(id).await?;
    apply_invariants(&issue.current, &mut diff);

    session
        .issues()
        .update(NewIssueUpdate {
            issue_id: id,
            author,
            comment: comment.filter(|c| !c.trim().is_empty()),
            diff,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(s: &str) -> Result<SearchPlan> {
        plan_search(&search::parse(s))
    }

    #[test]
    fn test_numeric_id_is_lookup() {
        assert_eq!(plan("id:1234 author:q3k").unwrap(), SearchPlan::ById(1234));
    }

    #[test]
    fn test_zero_or_garbage_id_is_ignored() {
        assert!(matches!(plan("id:0"), Err(Error::Unimplemented(_))));
        assert!(matches!(
            plan("id:abc status:new").unwrap(),
            SearchPlan::Filter(IssueFilter {
                status: Some(IssueStatus::New),
                ..
            })
        ));
    }

    #[test]
    fn test_usernames_are_lowercased() {
        let SearchPlan::Filter(filter) = plan("Author:Q3K assignee:\" Implr \"").unwrap() else {
            panic!("expected a filter");
        };
        assert_eq!(filter.author.as_deref(), Some("q3k"));
        assert_eq!(filter.assignee.as_deref(), Some("implr"));
        assert_eq!(filter.status, None);
    }

    #[test]
    fn test_keywords_only_is_unimplemented() {
        let err = plan("segfault in parser").unwrap_err();
        assert_eq!(
            err,
            Error::Unimplemented("no keyword search implemented, use query filters".into())
        );
        assert!(matches!(plan("status:bogus"), Err(Error::Unimplemented(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_deadline_exceeded() {
        let res: Result<()> = Service::with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(Error::DeadlineExceeded(_))));

        let res = Service::with_timeout(Duration::from_secs(5), async { Ok(7) }).await;
        assert_eq!(res, Ok(7));
    }

    #[test]
    fn test_request_wire_format() {
        let req: GetIssuesRequest = serde_json::from_str(
            r#"{"query": {"by_search": "author:q3k"}, "direction": "descending",
                "pagination": {"after": "10", "count": 5}}"#,
        )
        .unwrap();
        assert_eq!(req.query, IssueQuery::BySearch("author:q3k".into()));
        assert_eq!(req.order_by, OrderBy::Created);
        assert_eq!(req.direction, Direction::Descending);
        assert_eq!(req.pagination.unwrap().count, 5);
    }
}
