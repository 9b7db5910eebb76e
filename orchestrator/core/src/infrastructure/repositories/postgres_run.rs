// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Run
//!
//! `RunRepository` backed by the `runs` table. Parameters, datasets and
//! mounts are stored as JSONB; the tool's metadata document is kept verbatim
//! in `gotap_metadata`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;

use crate::domain::repository::{RepositoryError, RunRepository};
use crate::domain::run::{AdminSet, NewRun, Run, RunId, RunStatus, UserId};

const RUN_COLUMNS: &str = r#"
    id, name, title, description, docker_image, parameters, data, mounts,
    created_at, started_at, finished_at, status, has_errored, error_message,
    gotap_metadata, user_id
"#;

pub struct PostgresRunRepository {
    pool: PgPool,
    admins: AdminSet,
}

impl PostgresRunRepository {
    pub fn new(pool: PgPool, admins: AdminSet) -> Self {
        Self { pool, admins }
    }

    /// Creates the `runs` table when absent. Migrations are managed elsewhere.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                docker_image TEXT NOT NULL,
                parameters JSONB NOT NULL DEFAULT '{}'::jsonb,
                data JSONB NOT NULL DEFAULT '{}'::jsonb,
                mounts JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                started_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ,
                status TEXT NOT NULL DEFAULT 'pending',
                has_errored BOOLEAN NOT NULL DEFAULT FALSE,
                error_message TEXT,
                gotap_metadata TEXT,
                user_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to create runs table: {}", e)))?;
        Ok(())
    }

    fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }

    /// Explains why a conditional update touched no rows.
    async fn explain_noop(&self, id: RunId, user: Option<&UserId>, expected: &str) -> RepositoryError {
        let row = match user {
            Some(user) => {
                sqlx::query("SELECT status FROM runs WHERE id = $1 AND (user_id = $2 OR $3)")
                    .bind(id.0)
                    .bind(user.as_str())
                    .bind(self.is_admin(user))
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT status FROM runs WHERE id = $1")
                    .bind(id.0)
                    .fetch_optional(&self.pool)
                    .await
            }
        };
        match row {
            Ok(Some(row)) => {
                let status: String = row.get("status");
                RepositoryError::InvalidTransition(format!("run {} is {}, expected {}", id, status, expected))
            }
            Ok(None) => RepositoryError::NotFound(format!("run {}", id)),
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn create_run(&self, new: NewRun) -> Result<Run, RepositoryError> {
        let parameters = serde_json::to_value(&new.parameters)?;
        let data = serde_json::to_value(&new.data)?;
        let mounts = serde_json::to_value(&new.mounts)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO runs (
                name, title, description, docker_image, parameters, data, mounts,
                created_at, status, has_errored, user_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', FALSE, $9)
            RETURNING {}
            "#,
            RUN_COLUMNS
        ))
        .bind(&new.name)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.docker_image)
        .bind(parameters)
        .bind(data)
        .bind(mounts)
        .bind(Utc::now())
        .bind(new.user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to create run: {}", e)))?;

        parse_run_row(&row)
    }

    async fn get_run(&self, id: RunId, user: &UserId) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE id = $1 AND (user_id = $2 OR $3)",
            RUN_COLUMNS
        ))
        .bind(id.0)
        .bind(user.as_str())
        .bind(self.is_admin(user))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_run_row).transpose()
    }

    async fn list_runs(&self, user: &UserId, status: Option<RunStatus>) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM runs
            WHERE (user_id = $1 OR $2)
              AND ($3::TEXT IS NULL OR status = $3)
            ORDER BY created_at DESC, id DESC
            "#,
            RUN_COLUMNS
        ))
        .bind(user.as_str())
        .bind(self.is_admin(user))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_run_row).collect()
    }

    async fn delete_run(&self, id: RunId, user: &UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM runs WHERE id = $1 AND (user_id = $2 OR $3)")
            .bind(id.0)
            .bind(user.as_str())
            .bind(self.is_admin(user))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("run {}", id)));
        }
        Ok(())
    }

    async fn transition_to_running(&self, id: RunId, user: &UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'running', started_at = $4
            WHERE id = $1 AND (user_id = $2 OR $3) AND status = 'pending'
            "#,
        )
        .bind(id.0)
        .bind(user.as_str())
        .bind(self.is_admin(user))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_noop(id, Some(user), "pending").await);
        }
        Ok(())
    }

    async fn transition_to_finished(&self, id: RunId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'finished', finished_at = $2
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_noop(id, None, "pending or running").await);
        }
        Ok(())
    }

    async fn transition_to_errored(&self, id: RunId, message: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'errored', finished_at = $2, has_errored = TRUE, error_message = $3
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.0)
        .bind(Utc::now())
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_noop(id, None, "pending or running").await);
        }
        Ok(())
    }

    async fn set_tool_metadata(&self, id: RunId, metadata: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE runs SET gotap_metadata = $2 WHERE id = $1")
            .bind(id.0)
            .bind(metadata)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("run {}", id)));
        }
        Ok(())
    }
}

fn parse_run_row(row: &PgRow) -> Result<Run, RepositoryError> {
    let parameters: serde_json::Value = row.try_get("parameters")?;
    let data: serde_json::Value = row.try_get("data")?;
    let mounts: serde_json::Value = row.try_get("mounts")?;
    let status: String = row.try_get("status")?;

    Ok(Run {
        id: RunId(row.try_get("id")?),
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        docker_image: row.try_get("docker_image")?,
        parameters: serde_json::from_value::<BTreeMap<String, serde_json::Value>>(parameters)?,
        data: serde_json::from_value::<BTreeMap<String, String>>(data)?,
        mounts: serde_json::from_value::<BTreeMap<String, String>>(mounts)?,
        status: status
            .parse::<RunStatus>()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
        has_errored: row.try_get("has_errored")?,
        error_message: row.try_get("error_message")?,
        tool_metadata: row
            .try_get::<Option<String>, _>("gotap_metadata")?
            .filter(|m| !m.is_empty()),
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
    })
}
