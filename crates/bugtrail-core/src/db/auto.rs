//! Auto-committing sessions
//!
//! Every call opens a transaction, runs one store operation and commits
//! (rolling back on error). Meant for one-shot reads and writes where
//! atomicity across calls is not needed.

use uuid::Uuid;

use super::category::{Category, CategoryNode, NewCategory};
use super::issue::{FilterOpts, HistoryOpts, IssueFilter, IssueOrder};
use super::user::{NewUser, User};
use super::Database;
use crate::issue::{Issue, IssueUpdate, NewIssue, NewIssueUpdate};
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct AutoSession<'a> {
    db: &'a Database,
}

impl<'a> AutoSession<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn categories(&self) -> AutoCategoryStore<'a> {
        AutoCategoryStore { db: self.db }
    }

    pub fn issues(&self) -> AutoIssueStore<'a> {
        AutoIssueStore { db: self.db }
    }

    pub fn users(&self) -> AutoUserStore<'a> {
        AutoUserStore { db: self.db }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AutoCategoryStore<'a> {
    db: &'a Database,
}

impl AutoCategoryStore<'_> {
    pub async fn get(&self, id: Uuid) -> Result<Category> {
        let mut s = self.db.begin().await?;
        let res = s.categories().get(id).await;
        s.finish(res).await
    }

    pub async fn get_tree(&self, root: Uuid, levels: u32) -> Result<CategoryNode> {
        let mut s = self.db.begin().await?;
        let res = s.categories().get_tree(root, levels).await;
        s.finish(res).await
    }

    pub async fn create(&self, new: NewCategory) -> Result<Category> {
        let mut s = self.db.begin().await?;
        let res = s.categories().create(new).await;
        s.finish(res).await
    }

    pub async fn update(&self, category: &Category) -> Result<()> {
        let mut s = self.db.begin().await?;
        let res = s.categories().update(category).await;
        s.finish(res).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut s = self.db.begin().await?;
        let res = s.categories().delete(id).await;
        s.finish(res).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AutoIssueStore<'a> {
    db: &'a Database,
}

impl AutoIssueStore<'_> {
    pub async fn get(&self, id: i64) -> Result<Issue> {
        let mut s = self.db.begin().await?;
        let res = s.issues().get(id).await;
        s.finish(res).await
    }

    pub async fn filter(
        &self,
        filter: &IssueFilter,
        order: IssueOrder,
        opts: FilterOpts,
    ) -> Result<Vec<Issue>> {
        let mut s = self.db.begin().await?;
        let res = s.issues().filter(filter, order, opts).await;
        s.finish(res).await
    }

    pub async fn get_history(&self, issue_id: i64, opts: HistoryOpts) -> Result<Vec<IssueUpdate>> {
        let mut s = self.db.begin().await?;
        let res = s.issues().get_history(issue_id, opts).await;
        s.finish(res).await
    }

    pub async fn create(&self, new: NewIssue) -> Result<Issue> {
        let mut s = self.db.begin().await?;
        let res = s.issues().create(new).await;
        s.finish(res).await
    }

    pub async fn update(&self, update: NewIssueUpdate) -> Result<IssueUpdate> {
        let mut s = self.db.begin().await?;
        let res = s.issues().update(update).await;
        s.finish(res).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AutoUserStore<'a> {
    db: &'a Database,
}

impl AutoUserStore<'_> {
    pub async fn create(&self, new: NewUser) -> Result<User> {
        let mut s = self.db.begin().await?;
        let res = s.users().create(new).await;
        s.finish(res).await
    }

    pub async fn resolve_username(&self, username: &str) -> Result<Uuid> {
        let mut s = self.db.begin().await?;
        let res = s.users().resolve_username(username).await;
        s.finish(res).await
    }

    pub async fn get(&self, id: Uuid) -> Result<User> {
        let mut s = self.db.begin().await?;
        let res = s.users().get(id).await;
        s.finish(res).await
    }
}
