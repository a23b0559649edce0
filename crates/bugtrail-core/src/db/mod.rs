//! CockroachDB-backed storage
//!
//! A [`Database`] owns the connection pool and hands out units of work:
//!
//! - [`Session`] (`Database::begin`): one explicit transaction shared by all
//!   stores obtained from it. It must be consumed by [`Session::commit`] or
//!   [`Session::rollback`]; dropping it rolls back.
//! - [`AutoSession`] (`Database::auto`): every store call runs in its own
//!   transaction and commits on success. It has no commit or rollback.

mod auto;
mod category;
mod dsn;
mod errors;
mod issue;
mod user;

use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, Postgres, Transaction};
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::{Error, Result};

pub use auto::{AutoCategoryStore, AutoIssueStore, AutoSession, AutoUserStore};
pub use category::{Category, CategoryNode, CategoryStore, NewCategory, ROOT_CATEGORY};
pub use dsn::Dsn;
pub use errors::ErrorConverter;
pub use issue::{FilterOpts, HistoryOpts, IssueFilter, IssueOrder, IssueStore, OrderBy};
pub use user::{NewUser, User, UserStore};

/// Statement logging settings, fixed by the first connect in the process.
#[derive(Debug, Clone, Copy)]
struct StatementTracing {
    level: log::LevelFilter,
    slow_threshold: Duration,
}

static STATEMENT_TRACING: OnceLock<StatementTracing> = OnceLock::new();

impl StatementTracing {
    fn from_config(config: &DatabaseConfig) -> Self {
        let level = log::LevelFilter::from_str(&config.statement_log_level).unwrap_or_else(|_| {
            debug!(
                level = %config.statement_log_level,
                "unknown statement log level, using debug"
            );
            log::LevelFilter::Debug
        });
        Self {
            level,
            slow_threshold: Duration::from_millis(config.slow_statement_ms),
        }
    }

    fn registered(config: &DatabaseConfig) -> Self {
        *STATEMENT_TRACING.get_or_init(|| {
            let tracing = Self::from_config(config);
            info!(
                level = %tracing.level,
                slow_ms = tracing.slow_threshold.as_millis() as u64,
                "registered statement tracing"
            );
            tracing
        })
    }
}

/// Handle to the backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect with default pool settings.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let config = DatabaseConfig {
            dsn: dsn.to_string(),
            ..Default::default()
        };
        Self::connect_with(&config).await
    }

    pub async fn connect_with(config: &DatabaseConfig) -> Result<Self> {
        let dsn: Dsn = config.dsn.parse()?;
        Self::connect_dsn(&dsn, config).await
    }

    /// Connect to an already parsed DSN, taking pool settings from `config`.
    pub async fn connect_dsn(dsn: &Dsn, config: &DatabaseConfig) -> Result<Self> {
        let tracing = StatementTracing::registered(config);
        let options = dsn
            .connect_options()
            .log_statements(tracing.level)
            .log_slow_statements(log::LevelFilter::Warn, tracing.slow_threshold);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        info!(%dsn, "connected to database");
        Ok(Self { pool })
    }

    /// Apply pending schema migrations. A no-op when the schema is current.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        // CockroachDB has no advisory locks.
        migrator.set_locking(false);
        migrator.run(&self.pool).await.map_err(|e| {
            error!(error = %e, "migration failed");
            Error::Unavailable(format!("migration failed: {e}"))
        })?;
        info!("database schema is current");
        Ok(())
    }

    /// Start an explicit transaction.
    pub async fn begin(&self) -> Result<Session> {
        let tx = self.pool.begin().await?;
        Ok(Session { tx })
    }

    /// A session whose store calls each commit on their own.
    pub fn auto(&self) -> AutoSession<'_> {
        AutoSession::new(self)
    }

    /// Run a statement outside any transaction. Used by tests and tooling
    /// for `CREATE DATABASE` and the like.
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// One explicit transaction.
pub struct Session {
    tx: Transaction<'static, Postgres>,
}

impl Session {
    pub fn categories(&mut self) -> CategoryStore<'_> {
        CategoryStore::new(&mut *self.tx)
    }

    pub fn issues(&mut self) -> IssueStore<'_> {
        IssueStore::new(&mut *self.tx)
    }

    pub fn users(&mut self) -> UserStore<'_> {
        UserStore::new(&mut *self.tx)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Commit if `res` is `Ok`, roll back otherwise. The error in `res` wins
    /// over a rollback failure.
    pub async fn finish<T>(self, res: Result<T>) -> Result<T> {
        match res {
            Ok(v) => {
                self.commit().await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = self.rollback().await {
                    debug!(error = %rb, "rollback after failure also failed");
                }
                Err(e)
            }
        }
    }
}
