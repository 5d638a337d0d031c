//! PostgreSQL pool backed by sqlx
//!
//! Pools are built lazily: construction does not open a connection, the
//! first query does. Rows come back as JSON objects so route handlers can
//! pass them straight into responses. `NUMERIC` values are rendered as
//! strings to keep their precision; a column type with no JSON mapping is a
//! decode error.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::types::BigDecimal;
use sqlx::{Column, Either, Executor, PgPool, Postgres, Row, TypeInfo, ValueRef};

use super::{RelationalConnector, RelationalPool, RowSet};
use crate::config::RelationalConfig;
use crate::error::DriverError;

/// Builds sqlx pools from [`RelationalConfig`].
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: RelationalConfig,
}

impl PgConnector {
    pub fn new(config: RelationalConfig) -> Self {
        Self { config }
    }

    fn connect_options(&self) -> Result<PgConnectOptions, DriverError> {
        let ssl_mode = PgSslMode::from_str(&self.config.ssl_mode)?;
        let options = PgConnectOptions::from_str(&self.config.url)?.ssl_mode(ssl_mode);
        Ok(options)
    }
}

#[async_trait]
impl RelationalConnector for PgConnector {
    async fn build_pool(&self) -> Result<Arc<dyn RelationalPool>, DriverError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .idle_timeout(self.config.idle_timeout())
            .connect_lazy_with(self.connect_options()?);

        tracing::debug!(
            max_connections = self.config.max_connections,
            idle_timeout_ms = self.config.idle_timeout_ms,
            "PostgreSQL pool configured"
        );
        Ok(Arc::new(PgPoolHandle { pool }))
    }
}

/// A live sqlx pool
#[derive(Debug, Clone)]
pub struct PgPoolHandle {
    pool: PgPool,
}

impl PgPoolHandle {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RelationalPool for PgPoolHandle {
    async fn execute(&self, text: &str, params: &[Value]) -> Result<RowSet, DriverError> {
        let query = params
            .iter()
            .fold(sqlx::query(text), |query, param| bind_json(query, param));

        let mut results = (&self.pool).fetch_many(query);
        let mut rows = Vec::new();
        let mut affected = 0u64;
        while let Some(step) = results.try_next().await? {
            match step {
                Either::Left(done) => affected += done.rows_affected(),
                Either::Right(row) => rows.push(row_to_json(&row)?),
            }
        }
        Ok(RowSet::with_row_count(rows, affected as usize))
    }

    async fn close(&self) -> Result<(), DriverError> {
        // Marks the pool closed immediately, then resolves once every
        // checked-out connection has been returned.
        self.pool.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(param.clone())),
    }
}

fn row_to_json(row: &PgRow) -> Result<Value, sqlx::Error> {
    let mut object = Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_to_json(row, idx, column.type_info().name())?;
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

fn column_to_json(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::from(row.try_get::<bool, _>(idx)?),
        "INT2" => Value::from(row.try_get::<i16, _>(idx)?),
        "INT4" => Value::from(row.try_get::<i32, _>(idx)?),
        "INT8" => Value::from(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => Value::from(row.try_get::<f32, _>(idx)?),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(idx)?),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx)?,
        "UUID" => Value::from(row.try_get::<uuid::Uuid, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => Value::from(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::from(row.try_get::<chrono::NaiveDateTime, _>(idx)?.to_string()),
        "DATE" => Value::from(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "TIME" => Value::from(row.try_get::<chrono::NaiveTime, _>(idx)?.to_string()),
        "NUMERIC" => Value::from(row.try_get::<BigDecimal, _>(idx)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "CITEXT" | "UNKNOWN" => {
            Value::from(row.try_get::<String, _>(idx)?)
        }
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: idx.to_string(),
                source: format!("no JSON mapping for column type {other}").into(),
            })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationalConfig;

    // Integration tests require a real database
    // Run with: DATABASE_URL=postgres://... cargo test -p fleetdb-core -- --ignored

    fn connector_from_env() -> PgConnector {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let mut config = RelationalConfig::new(url);
        config.ssl_mode = std::env::var("FLEETDB_PG_SSLMODE").unwrap_or_else(|_| "prefer".into());
        PgConnector::new(config)
    }

    #[test]
    fn rejects_unknown_ssl_mode() {
        let mut config = RelationalConfig::new("postgres://localhost/fleet");
        config.ssl_mode = "sometimes".into();
        assert!(PgConnector::new(config).connect_options().is_err());
    }

    #[tokio::test]
    async fn building_a_pool_does_not_connect() {
        // Nothing listens on port 1; a lazy pool must still build.
        let mut config = RelationalConfig::new("postgres://fleet@127.0.0.1:1/fleet");
        config.ssl_mode = "disable".into();
        let pool = PgConnector::new(config).build_pool().await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn select_returns_json_rows() {
        let pool = connector_from_env().build_pool().await.expect("pool");
        let rows = pool
            .execute(
                "SELECT $1::int8 AS n, $2::text AS label, NULL::text AS missing",
                &[Value::from(7), Value::from("truck")],
            )
            .await
            .expect("query failed");

        assert_eq!(rows.row_count, 1);
        let row = rows.first().unwrap();
        assert_eq!(row["n"], 7);
        assert_eq!(row["label"], "truck");
        assert!(row["missing"].is_null());
        pool.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn row_count_is_rows_affected() {
        let pool = connector_from_env().build_pool().await.expect("pool");
        let table = format!("camiones_{}", uuid::Uuid::new_v4().simple());
        pool.execute(&format!("CREATE TABLE {table} (id int PRIMARY KEY)"), &[])
            .await
            .expect("create");

        let inserted = pool
            .execute(&format!("INSERT INTO {table} VALUES (1), (2)"), &[])
            .await
            .expect("insert");
        assert!(inserted.is_empty());
        assert_eq!(inserted.row_count, 2);

        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let deleted = pool.execute(&sql, &[Value::from(1)]).await.expect("delete");
        assert!(deleted.is_empty());
        assert_eq!(deleted.row_count, 1);
        let missing = pool.execute(&sql, &[Value::from(99)]).await.expect("delete");
        assert_eq!(missing.row_count, 0);

        pool.execute(&format!("DROP TABLE {table}"), &[])
            .await
            .expect("drop");
        pool.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn numeric_columns_decode_as_strings() {
        let pool = connector_from_env().build_pool().await.expect("pool");
        let rows = pool
            .execute("SELECT 2 * 100.0 / 3 AS porcentaje_total", &[])
            .await
            .expect("query failed");
        let value = &rows.first().unwrap()["porcentaje_total"];
        assert!(value.as_str().unwrap().starts_with("66.66"));
        pool.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn unmapped_column_type_is_an_error() {
        let pool = connector_from_env().build_pool().await.expect("pool");
        assert!(pool.execute("SELECT '1 day'::interval AS span", &[]).await.is_err());
        pool.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn string_params_bind_as_text() {
        let pool = connector_from_env().build_pool().await.expect("pool");
        let err = pool
            .execute("SELECT 1 AS one WHERE 1 = $1", &[Value::from("1")])
            .await
            .err()
            .expect("text compared with integer");
        assert!(err.to_string().contains("operator does not exist"));

        let typed = pool
            .execute("SELECT 1 AS one WHERE 1 = $1", &[Value::from(1)])
            .await
            .expect("integer param");
        assert_eq!(typed.row_count, 1);
        let cast = pool
            .execute("SELECT 1 AS one WHERE 1 = $1::int", &[Value::from("1")])
            .await
            .expect("cast in SQL");
        assert_eq!(cast.row_count, 1);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn close_marks_pool_closed() {
        let pool = connector_from_env().build_pool().await.expect("pool");
        assert!(!pool.is_closed());
        pool.close().await.unwrap();
        assert!(pool.is_closed());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn malformed_statement_is_driver_error() {
        let pool = connector_from_env().build_pool().await.expect("pool");
        assert!(pool.execute("SELEC 1", &[]).await.is_err());
        pool.close().await.unwrap();
    }
}
