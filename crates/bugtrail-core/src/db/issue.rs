//! Issue storage
//!
//! The `issues` table holds the current state of every issue. Every change
//! goes through [`IssueStore::update`], which rewrites the changed columns
//! and appends the change to `issue_updates` in the same transaction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use super::category::ROOT_CATEGORY;
use super::errors::ErrorConverter;
use crate::issue::{
    from_nanos, to_nanos, AssigneeChange, Issue, IssueDiff, IssueState, IssueStatus, IssueType,
    IssueUpdate, NewIssue, NewIssueUpdate, UNASSIGNED,
};
use crate::{Error, Result};

const ISSUE_COLUMNS: &str = "issues.id, issues.author, issues.created, issues.last_updated, \
    issues.category, issues.title, issues.assignee, issues.type, issues.priority, issues.status";

const UPDATE_COLUMNS: &str =
    "issue_id, id, created, author, comment, title, assignee, type, priority, status";

/// Equality predicates for [`IssueStore::filter`]. Users are given by
/// username.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFilter {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub status: Option<IssueStatus>,
}

impl IssueFilter {
    pub fn is_empty(&self) -> bool {
        self.author.is_none() && self.assignee.is_none() && self.status.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Created,
    #[serde(alias = "last_update")]
    LastUpdated,
}

impl OrderBy {
    fn column(self) -> &'static str {
        match self {
            OrderBy::Created => "issues.created",
            OrderBy::LastUpdated => "issues.last_updated",
        }
    }

    /// The cursor value of `issue` for this ordering.
    pub fn cursor(self, issue: &Issue) -> Result<i64> {
        match self {
            OrderBy::Created => to_nanos(issue.created),
            OrderBy::LastUpdated => to_nanos(issue.last_updated),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueOrder {
    pub by: OrderBy,
    pub descending: bool,
}

/// Window of a filter query. `start` is an exclusive bound on the order
/// field in nanoseconds; `count: None` means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOpts {
    pub start: Option<i64>,
    pub count: Option<u64>,
}

/// Window of a history query. `start` is an exclusive bound on the update
/// sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOpts {
    pub start: Option<i64>,
    pub count: Option<u64>,
}

#[derive(Debug, sqlx::FromRow)]
struct IssueRow {
    id: i64,
    author: Uuid,
    created: i64,
    last_updated: i64,
    category: Uuid,
    title: String,
    assignee: Uuid,
    #[sqlx(rename = "type")]
    issue_type: i64,
    priority: i64,
    status: i64,
}

fn decode_type(code: i64) -> Result<IssueType> {
    IssueType::from_code(code)
        .ok_or_else(|| Error::Internal(format!("stored issue type {code} is unknown")))
}

fn decode_status(code: i64) -> Result<IssueStatus> {
    IssueStatus::from_code(code)
        .ok_or_else(|| Error::Internal(format!("stored issue status {code} is unknown")))
}

impl TryFrom<IssueRow> for Issue {
    type Error = Error;

    fn try_from(row: IssueRow) -> Result<Self> {
        Ok(Issue {
            id: row.id,
            author: row.author,
            created: from_nanos(row.created),
            last_updated: from_nanos(row.last_updated),
            category: row.category,
            current: IssueState {
                title: row.title,
                assignee: (row.assignee != UNASSIGNED).then_some(row.assignee),
                issue_type: decode_type(row.issue_type)?,
                priority: row.priority,
                status: decode_status(row.status)?,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UpdateRow {
    issue_id: i64,
    id: i64,
    created: i64,
    author: Uuid,
    comment: Option<String>,
    title: Option<String>,
    assignee: Option<Uuid>,
    #[sqlx(rename = "type")]
    issue_type: Option<i64>,
    priority: Option<i64>,
    status: Option<i64>,
}

impl TryFrom<UpdateRow> for IssueUpdate {
    type Error = Error;

    fn try_from(row: UpdateRow) -> Result<Self> {
        Ok(IssueUpdate {
            issue_id: row.issue_id,
            id: row.id,
            created: from_nanos(row.created),
            author: row.author,
            comment: row.comment,
            diff: IssueDiff {
                title: row.title,
                assignee: row.assignee.map(|a| AssigneeChange::from_target(Some(a))),
                issue_type: row.issue_type.map(decode_type).transpose()?,
                priority: row.priority,
                status: row.status.map(decode_status).transpose()?,
            },
        })
    }
}

fn not_found() -> Error {
    Error::not_found("issue not found")
}

pub struct IssueStore<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> IssueStore<'a> {
    pub(crate) fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&mut self, id: i64) -> Result<Issue> {
        let row = sqlx::query_as::<_, IssueRow>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE issues.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.ok_or_else(not_found)?.try_into()
    }

    /// Issues matching every predicate of `filter`, ordered by `order`.
    pub async fn filter(
        &mut self,
        filter: &IssueFilter,
        order: IssueOrder,
        opts: FilterOpts,
    ) -> Result<Vec<Issue>> {
        if filter.is_empty() {
            return Err(Error::Unimplemented(
                "filter must set at least one of author, assignee or status".to_string(),
            ));
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ISSUE_COLUMNS} FROM issues"));
        if filter.author.is_some() {
            qb.push(" JOIN users AS author_user ON author_user.id = issues.author");
        }
        if filter.assignee.is_some() {
            qb.push(" JOIN users AS assignee_user ON assignee_user.id = issues.assignee");
        }

        qb.push(" WHERE TRUE");
        if let Some(author) = &filter.author {
            qb.push(" AND author_user.username = ").push_bind(author.clone());
        }
        if let Some(assignee) = &filter.assignee {
            qb.push(" AND assignee_user.username = ").push_bind(assignee.clone());
        }
        if let Some(status) = filter.status {
            qb.push(" AND issues.status = ").push_bind(status.code());
        }

        let column = order.by.column();
        let (cmp, dir) = if order.descending {
            ("<", "DESC")
        } else {
            (">", "ASC")
        };
        if let Some(start) = opts.start {
            qb.push(format!(" AND {column} {cmp} ")).push_bind(start);
        }
        qb.push(format!(" ORDER BY {column} {dir}, issues.id {dir}"));
        if let Some(count) = opts.count {
            qb.push(" LIMIT ").push_bind(count.min(i64::MAX as u64) as i64);
        }

        let rows = qb
            .build_query_as::<IssueRow>()
            .fetch_all(&mut *self.conn)
            .await?;
        debug!(?filter, ?order, ?opts, found = rows.len(), "filtered issues");

        rows.into_iter().map(Issue::try_from).collect()
    }

    /// Updates of one issue in sequence order.
    pub async fn get_history(&mut self, issue_id: i64, opts: HistoryOpts) -> Result<Vec<IssueUpdate>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {UPDATE_COLUMNS} FROM issue_updates WHERE issue_id = "
        ));
        qb.push_bind(issue_id);
        if let Some(start) = opts.start {
            qb.push(" AND id > ").push_bind(start);
        }
        qb.push(" ORDER BY id ASC");
        if let Some(count) = opts.count {
            qb.push(" LIMIT ").push_bind(count.min(i64::MAX as u64) as i64);
        }

        let rows = qb
            .build_query_as::<UpdateRow>()
            .fetch_all(&mut *self.conn)
            .await?;
        rows.into_iter().map(IssueUpdate::try_from).collect()
    }

    /// Store a new issue. The backend picks its id.
    pub async fn create(&mut self, new: NewIssue) -> Result<Issue> {
        let now = Utc::now();
        let created = new.created.unwrap_or(now);
        if created > now {
            return Err(Error::invalid(
                "issue creation time cannot be after last update time",
            ));
        }
        let category = new.category.unwrap_or(ROOT_CATEGORY);
        let conv = ErrorConverter::new().foreign_key_violation(Error::not_found("category not found"));

        let state = &new.state;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO issues \
             (author, created, last_updated, category, title, assignee, type, priority, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id",
        )
        .bind(new.author)
        .bind(to_nanos(created)?)
        .bind(to_nanos(now)?)
        .bind(category)
        .bind(&state.title)
        .bind(state.assignee.unwrap_or(UNASSIGNED))
        .bind(state.issue_type.code())
        .bind(state.priority)
        .bind(state.status.code())
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| conv.convert(e))?;

        info!(id, author = %new.author, "created issue");
        Ok(Issue {
            id,
            author: new.author,
            created: from_nanos(to_nanos(created)?),
            last_updated: from_nanos(to_nanos(now)?),
            category,
            current: new.state,
        })
    }

    /// Apply `update.diff` to the issue and append it to the history.
    /// Returns the appended entry.
    pub async fn update(&mut self, update: NewIssueUpdate) -> Result<IssueUpdate> {
        let now = to_nanos(Utc::now())?;
        let diff = &update.diff;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE issues SET last_updated = ");
        qb.push_bind(now);
        if let Some(title) = &diff.title {
            qb.push(", title = ").push_bind(title.clone());
        }
        if let Some(change) = diff.assignee {
            qb.push(", assignee = ")
                .push_bind(change.target().unwrap_or(UNASSIGNED));
        }
        if let Some(issue_type) = diff.issue_type {
            qb.push(", type = ").push_bind(issue_type.code());
        }
        if let Some(priority) = diff.priority {
            qb.push(", priority = ").push_bind(priority);
        }
        if let Some(status) = diff.status {
            qb.push(", status = ").push_bind(status.code());
        }
        qb.push(" WHERE id = ").push_bind(update.issue_id);

        let res = qb.build().execute(&mut *self.conn).await?;
        if res.rows_affected() == 0 {
            return Err(not_found());
        }

        let row = sqlx::query_as::<_, UpdateRow>(&format!(
            "INSERT INTO issue_updates ({UPDATE_COLUMNS}) VALUES \
             ($1, (SELECT COUNT(*) + 1 FROM issue_updates WHERE issue_id = $1), \
              $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {UPDATE_COLUMNS}"
        ))
        .bind(update.issue_id)
        .bind(now)
        .bind(update.author)
        .bind(&update.comment)
        .bind(&diff.title)
        .bind(diff.assignee.map(|c| c.target().unwrap_or(UNASSIGNED)))
        .bind(diff.issue_type.map(IssueType::code))
        .bind(diff.priority)
        .bind(diff.status.map(IssueStatus::code))
        .fetch_one(&mut *self.conn)
        .await?;

        let appended = IssueUpdate::try_from(row)?;
        debug!(issue = appended.issue_id, seq = appended.id, "appended issue update");
        Ok(appended)
    }
}
