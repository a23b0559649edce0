//! User storage

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::errors::ErrorConverter;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub preferences: Vec<u8>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A user that has not been stored yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub preferences: Vec<u8>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl NewUser {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

pub struct UserStore<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> UserStore<'a> {
    pub(crate) fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&mut self, new: NewUser) -> Result<User> {
        if new.username.trim().is_empty() {
            return Err(Error::invalid("user must have a username"));
        }
        let conv = ErrorConverter::new()
            .unique_violation(Error::AlreadyExists("duplicate username".to_string()));

        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, preferences, email, display_name) VALUES ($1, $2, $3, $4) \
             RETURNING id, username, preferences, email, display_name",
        )
        .bind(&new.username)
        .bind(&new.preferences)
        .bind(&new.email)
        .bind(&new.display_name)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| conv.convert(e))?;

        info!(id = %user.id, username = %user.username, "created user");
        Ok(user)
    }

    pub async fn resolve_username(&mut self, username: &str) -> Result<Uuid> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *self.conn)
            .await?;
        id.ok_or_else(|| Error::not_found("no such username"))
    }

    pub async fn get(&mut self, id: Uuid) -> Result<User> {
        let conv = ErrorConverter::new().syntax_error(Error::not_found("no such user"));
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, preferences, email, display_name FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| conv.convert(e))?;
        user.ok_or_else(|| Error::not_found("no such user"))
    }
}
