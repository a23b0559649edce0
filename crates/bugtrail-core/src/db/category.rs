//! Category tree storage

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::errors::ErrorConverter;
use crate::{Error, Result};

/// The root of the category tree.
pub const ROOT_CATEGORY: Uuid = Uuid::nil();

/// Ancestor walks give up after this many hops.
const MAX_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    /// `None` only for the root
    pub parent_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A category that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub parent_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A category together with the part of its subtree that was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(CategoryNode::node_count).sum::<usize>()
    }

    /// Depth of the deepest node below this one (0 for a leaf).
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    fn build(category: Category, children: &mut HashMap<Uuid, Vec<Category>>) -> Self {
        let kids = children.remove(&category.id).unwrap_or_default();
        CategoryNode {
            category,
            children: kids
                .into_iter()
                .map(|c| CategoryNode::build(c, children))
                .collect(),
        }
    }
}

fn not_found() -> Error {
    Error::not_found("category not found")
}

fn parent_not_found() -> Error {
    Error::not_found("parent not found")
}

fn duplicate_name() -> Error {
    Error::AlreadyExists("duplicate category name".to_string())
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid("category must have a name"));
    }
    Ok(())
}

pub struct CategoryStore<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> CategoryStore<'a> {
    pub(crate) fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&mut self, id: Uuid) -> Result<Category> {
        let row = sqlx::query_as::<_, Category>(
            "SELECT id, parent_id, name, description FROM categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| ErrorConverter::new().syntax_error(not_found()).convert(e))?;

        row.ok_or_else(not_found)
    }

    async fn exists(&mut self, id: Uuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count > 0)
    }

    /// Fetch the subtree under `root`, at most `levels` levels deep. Level 0
    /// is the root alone.
    pub async fn get_tree(&mut self, root: Uuid, levels: u32) -> Result<CategoryNode> {
        let root = self.get(root).await?;

        let mut children: HashMap<Uuid, Vec<Category>> = HashMap::new();
        let mut frontier = vec![root.id];
        for _ in 0..levels {
            if frontier.is_empty() {
                break;
            }
            let rows = sqlx::query_as::<_, Category>(
                "SELECT id, parent_id, name, description FROM categories \
                 WHERE parent_id = ANY($1) ORDER BY name",
            )
            .bind(&frontier)
            .fetch_all(&mut *self.conn)
            .await?;

            frontier = rows.iter().map(|c| c.id).collect();
            for row in rows {
                if let Some(parent) = row.parent_id {
                    children.entry(parent).or_default().push(row);
                }
            }
        }

        let tree = CategoryNode::build(root, &mut children);
        debug!(root = %tree.category.id, levels, nodes = tree.node_count(), "fetched category tree");
        Ok(tree)
    }

    pub async fn create(&mut self, new: NewCategory) -> Result<Category> {
        check_name(&new.name)?;

        let conv = ErrorConverter::new()
            .syntax_error(parent_not_found())
            .foreign_key_violation(parent_not_found())
            .unique_violation(duplicate_name());

        if !self.exists(new.parent_id).await? {
            return Err(parent_not_found());
        }

        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (parent_id, name, description) VALUES ($1, $2, $3) \
             RETURNING id, parent_id, name, description",
        )
        .bind(new.parent_id)
        .bind(&new.name)
        .bind(&new.description)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| conv.convert(e))?;

        info!(id = %category.id, name = %category.name, "created category");
        Ok(category)
    }

    /// Save every field of `category` except its id.
    pub async fn update(&mut self, category: &Category) -> Result<()> {
        check_name(&category.name)?;
        let parent = category
            .parent_id
            .ok_or_else(|| Error::invalid("category must have a parent"))?;

        let conv = ErrorConverter::new()
            .syntax_error(parent_not_found())
            .foreign_key_violation(parent_not_found())
            .unique_violation(duplicate_name());

        if !self.exists(parent).await? {
            return Err(parent_not_found());
        }
        self.check_not_ancestor(category.id, parent).await?;

        let res = sqlx::query(
            "UPDATE categories SET parent_id = $1, name = $2, description = $3 WHERE id = $4",
        )
        .bind(parent)
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.id)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| conv.convert(e))?;

        if res.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    /// Fail if `id` is `parent` or one of its ancestors.
    async fn check_not_ancestor(&mut self, id: Uuid, parent: Uuid) -> Result<()> {
        let mut cursor = Some(parent);
        for _ in 0..MAX_DEPTH {
            let Some(current) = cursor else {
                return Ok(());
            };
            if current == id {
                return Err(Error::invalid("category cannot be its own ancestor"));
            }
            cursor = sqlx::query_scalar::<_, Option<Uuid>>(
                "SELECT parent_id FROM categories WHERE id = $1",
            )
            .bind(current)
            .fetch_optional(&mut *self.conn)
            .await?
            .flatten();
        }
        Err(Error::Internal("category tree is too deep".to_string()))
    }

    /// Remove a leaf category. Categories with children or issues stay.
    pub async fn delete(&mut self, id: Uuid) -> Result<()> {
        if id == ROOT_CATEGORY {
            return Err(Error::invalid("cannot delete root category"));
        }

        let conv = ErrorConverter::new().foreign_key_violation(Error::FailedPrecondition(
            "category has dependent data".to_string(),
        ));

        let res = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| conv.convert(e))?;

        if res.rows_affected() == 0 {
            return Err(not_found());
        }
        info!(%id, "deleted category");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: Uuid, parent: Option<Uuid>, name: &str) -> Category {
        Category {
            id,
            parent_id: parent,
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_build_tree() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let a1 = Uuid::new_v4();

        let mut children = HashMap::new();
        children.insert(
            ROOT_CATEGORY,
            vec![cat(a, Some(ROOT_CATEGORY), "A"), cat(b, Some(ROOT_CATEGORY), "B")],
        );
        children.insert(a, vec![cat(a1, Some(a), "A1")]);

        let tree = CategoryNode::build(cat(ROOT_CATEGORY, None, "root"), &mut children);
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.children[0].children[0].category.name, "A1");
        assert!(tree.children[1].children.is_empty());
        assert!(children.is_empty());
    }

    #[test]
    fn test_node_serializes_flat() {
        let node = CategoryNode {
            category: cat(ROOT_CATEGORY, None, "root"),
            children: vec![],
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["name"], "root");
        assert!(json["children"].as_array().unwrap().is_empty());
    }
}
