//! Postgres-backed experiment store.
//!
//! ## Schema
//!
//! - `projects(name, baseline)`: `baseline` names the baseline experiment.
//! - `experiments(project, name, hypothesis, created)`
//! - `results(seq, id, project, experiment, result_key, payload, created)`:
//!   `seq` keeps insertion order; `result_key` is `set/ref` for job results
//!   and NULL otherwise. `UNIQUE (project, experiment, result_key)` turns a
//!   redelivered job into a no-op insert.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check / not-null) | `23514`, `23502` | `Invalid` |
//! | Anything else | - | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use evalhub_catalog::{AppendOutcome, EvalResult, Experiment, NewExperiment};
use evalhub_core::{ExperimentName, ProjectName};

use super::{ExperimentStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        name TEXT PRIMARY KEY,
        baseline TEXT NULL,
        created TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS experiments (
        project TEXT NOT NULL REFERENCES projects(name),
        name TEXT NOT NULL,
        hypothesis TEXT NULL,
        created TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (project, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS results (
        seq BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        project TEXT NOT NULL,
        experiment TEXT NOT NULL,
        result_key TEXT NULL,
        payload JSONB NOT NULL,
        created TIMESTAMPTZ NOT NULL,
        FOREIGN KEY (project, experiment) REFERENCES experiments(project, name),
        UNIQUE (project, experiment, result_key)
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresExperimentStore {
    pool: Arc<PgPool>,
}

impl PostgresExperimentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn load_experiments(
        &self,
        project: &ProjectName,
        only: Option<&ExperimentName>,
    ) -> Result<Vec<Experiment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT e.name, e.hypothesis, e.created, (p.baseline = e.name) AS is_baseline
            FROM experiments e
            JOIN projects p ON p.name = e.project
            WHERE e.project = $1 AND ($2::TEXT IS NULL OR e.name = $2)
            ORDER BY e.created ASC, e.name ASC
            "#,
        )
        .bind(project.as_str())
        .bind(only.map(|e| e.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_experiments", e))?;

        let mut experiments = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name").map_err(|e| map_sqlx_error("decode", e))?;
            let hypothesis: Option<String> =
                row.try_get("hypothesis").map_err(|e| map_sqlx_error("decode", e))?;
            let created: DateTime<Utc> =
                row.try_get("created").map_err(|e| map_sqlx_error("decode", e))?;
            let is_baseline: Option<bool> =
                row.try_get("is_baseline").map_err(|e| map_sqlx_error("decode", e))?;

            let name = ExperimentName::new(name)?;
            let results = self.load_results(project, &name).await?;
            experiments.push(Experiment {
                name,
                hypothesis,
                results,
                is_baseline: is_baseline.unwrap_or(false),
                created,
            });
        }
        Ok(experiments)
    }

    async fn load_results(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
    ) -> Result<Vec<EvalResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM results
            WHERE project = $1 AND experiment = $2
            ORDER BY seq ASC
            "#,
        )
        .bind(project.as_str())
        .bind(experiment.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_results", e))?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<Json<EvalResult>, _>("payload")
                    .map(|Json(r)| r)
                    .map_err(|e| StoreError::Invalid(format!("failed to decode result row: {e}")))
            })
            .collect()
    }
}

async fn ensure_project(
    tx: &mut Transaction<'_, Postgres>,
    project: &ProjectName,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO projects (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(project.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_project", e))?;
    Ok(())
}

#[async_trait]
impl ExperimentStore for PostgresExperimentStore {
    #[instrument(skip(self), fields(project = %project), err)]
    async fn list_experiments(&self, project: &ProjectName) -> Result<Vec<Experiment>, StoreError> {
        self.load_experiments(project, None).await
    }

    #[instrument(skip(self, experiment), fields(project = %project, experiment = %experiment.name), err)]
    async fn add_experiment(
        &self,
        project: &ProjectName,
        experiment: NewExperiment,
    ) -> Result<Experiment, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        ensure_project(&mut tx, project).await?;

        let created = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO experiments (project, name, hypothesis, created)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(project.as_str())
        .bind(experiment.name.as_str())
        .bind(experiment.hypothesis.as_deref())
        .bind(created)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_experiment", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Experiment {
            created,
            ..Experiment::from_request(experiment)
        })
    }

    #[instrument(skip(self), fields(project = %project, experiment = %experiment), err)]
    async fn set_baseline(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE projects SET baseline = $2
            WHERE name = $1
              AND EXISTS (SELECT 1 FROM experiments WHERE project = $1 AND name = $2)
            "#,
        )
        .bind(project.as_str())
        .bind(experiment.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_baseline", e))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "experiment {experiment} in project {project}"
            )));
        }
        Ok(())
    }

    #[instrument(
        skip(self, result),
        fields(project = %project, experiment = %experiment, result_id = %result.id),
        err
    )]
    async fn append_result(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
        result: EvalResult,
    ) -> Result<AppendOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        ensure_project(&mut tx, project).await?;

        sqlx::query(
            r#"
            INSERT INTO experiments (project, name, created)
            VALUES ($1, $2, $3)
            ON CONFLICT (project, name) DO NOTHING
            "#,
        )
        .bind(project.as_str())
        .bind(experiment.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_experiment", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO results (id, project, experiment, result_key, payload, created)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (project, experiment, result_key) DO NOTHING
            "#,
        )
        .bind(result.id.as_uuid())
        .bind(project.as_str())
        .bind(experiment.as_str())
        .bind(result.key().map(|k| k.to_string()))
        .bind(Json(&result))
        .bind(result.created)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_result", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(if inserted.rows_affected() == 0 {
            AppendOutcome::Duplicate
        } else {
            AppendOutcome::Appended
        })
    }

    #[instrument(skip(self), fields(project = %project), err)]
    async fn get_baseline(&self, project: &ProjectName) -> Result<Option<Experiment>, StoreError> {
        let baseline: Option<Option<String>> =
            sqlx::query_scalar("SELECT baseline FROM projects WHERE name = $1")
                .bind(project.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_baseline", e))?;

        match baseline.flatten() {
            Some(name) => self.get_experiment(project, &ExperimentName::new(name)?).await,
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(project = %project, experiment = %experiment), err)]
    async fn get_experiment(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
    ) -> Result<Option<Experiment>, StoreError> {
        Ok(self
            .load_experiments(project, Some(experiment))
            .await?
            .into_iter()
            .next())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                Some("23503") => StoreError::NotFound(msg),
                Some("23514") | Some("23502") => StoreError::Invalid(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Invalid(format!("failed to decode row in {operation}: {err}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
