//! Shared setup for database-backed tests.
//!
//! Tests run against the CockroachDB (or PostgreSQL) server named by
//! `BUGTRAIL_TEST_DSN`, e.g. `cockroach://root@localhost:26257/defaultdb?sslmode=disable`.
//! Each test gets a fresh, migrated database. Without the variable the tests
//! are skipped.

#![allow(dead_code)]

use bugtrail_core::config::DatabaseConfig;
use bugtrail_core::db::{Dsn, NewUser};
use bugtrail_core::{Database, Service};
use uuid::Uuid;

pub const TEST_DSN_ENV: &str = "BUGTRAIL_TEST_DSN";

pub async fn test_db() -> Option<Database> {
    let Ok(dsn) = std::env::var(TEST_DSN_ENV) else {
        eprintln!("{TEST_DSN_ENV} not set, skipping");
        return None;
    };
    let base: Dsn = dsn.parse().expect("BUGTRAIL_TEST_DSN must be a valid cockroach:// dsn");
    let config = DatabaseConfig {
        max_connections: 4,
        ..Default::default()
    };

    let name = format!("bugtrail_test_{}", Uuid::new_v4().simple());
    let admin = Database::connect_dsn(&base, &config)
        .await
        .expect("could not connect to test server");
    admin
        .execute_raw(&format!("CREATE DATABASE {name}"))
        .await
        .expect("could not create test database");
    admin.close().await;

    let db = Database::connect_dsn(&base.with_database(&name), &config)
        .await
        .expect("could not connect to test database");
    db.migrate().await.expect("could not migrate test database");
    Some(db)
}

pub async fn test_service() -> Option<Service> {
    test_db().await.map(Service::new)
}

pub async fn user(db: &Database, username: &str) -> Uuid {
    db.auto()
        .users()
        .create(NewUser::named(username))
        .await
        .expect("could not create user")
        .id
}
