use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::model::{DateRange, Row};
use crate::platform::PlatformSource;
use crate::util::sql::quote_ident;

use super::RowSource;

/// Direct Postgres access to the platform tables.
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    /// Connections are opened on first use, so commands that never read rows never dial out.
    pub fn connect_lazy(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_lazy(dsn)
            .context("postgres connection string")?;
        Ok(Self { pool })
    }
}

fn count_sql(src: &PlatformSource) -> String {
    format!(
        "SELECT COUNT(*)::bigint FROM {} AS t WHERE t.{}::date BETWEEN $1 AND $2",
        quote_ident(&src.table),
        quote_ident(&src.date_column)
    )
}

// row_to_json keeps the table's column order; ctid breaks date ties so pages never overlap.
fn page_sql(src: &PlatformSource) -> String {
    let col = quote_ident(&src.date_column);
    format!(
        "SELECT row_to_json(t) FROM {} AS t WHERE t.{col}::date BETWEEN $1 AND $2 ORDER BY t.{col} ASC, t.ctid ASC OFFSET $3 LIMIT $4",
        quote_ident(&src.table)
    )
}

#[async_trait]
impl RowSource for PgSource {
    async fn count(&self, source: &PlatformSource, range: &DateRange) -> Result<i64> {
        let sql = count_sql(source);
        let n: Option<i64> = sqlx::query_scalar(&sql)
            .bind(range.start())
            .bind(range.end())
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("count {}", source.table))?;
        Ok(n.unwrap_or(0))
    }

    async fn fetch_page(&self, source: &PlatformSource, range: &DateRange, offset: i64, limit: i64) -> Result<Vec<Row>> {
        let sql = page_sql(source);
        let rows: Vec<Json<Value>> = sqlx::query_scalar(&sql)
            .bind(range.start())
            .bind(range.end())
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("select {} offset={} limit={}", source.table, offset, limit))?;
        Ok(rows
            .into_iter()
            .filter_map(|Json(v)| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect())
    }

    fn backend(&self) -> &'static str { "postgres" }
}
