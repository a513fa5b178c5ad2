//! Postgres implementation of the storage collaborators.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Connection, PgPool};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CandidateSelector, DerivedRecompute, Persister, StoreError};
use crate::category::Category;
use crate::eod::EodStore;
use crate::market;
use crate::types::{Collected, FundCandidate, Payload};

/// Run `fut` on its own task so dropping the caller cannot interrupt it.
async fn run_detached<T, F>(fut: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, StoreError>> + Send + 'static,
{
    tokio::spawn(fut).await?
}

/// Postgres-backed store shared by the selector, the workers and the EOD closer.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(max_connections, "PostgreSQL connected, migrations applied");

        Ok(Self { pool })
    }

    async fn write_payload(
        conn: &mut PgConnection,
        fund_code: &str,
        collected: &Collected,
    ) -> Result<(), StoreError> {
        let fetched_at = collected.fetched_at;

        match &collected.payload {
            Payload::FundList(listings) => {
                let codes: Vec<String> = listings.iter().map(|l| l.code.clone()).collect();
                let cnpjs: Vec<String> = listings.iter().map(|l| l.cnpj.clone()).collect();
                let external_ids: Vec<String> =
                    listings.iter().map(|l| l.external_id.clone()).collect();
                let names: Vec<String> = listings.iter().map(|l| l.name.clone()).collect();

                sqlx::query(
                    "INSERT INTO funds (code, cnpj, external_id, name, listed_at)
                     SELECT code, cnpj, external_id, name, $5
                     FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
                          AS t(code, cnpj, external_id, name)
                     ON CONFLICT (code) DO UPDATE SET
                         cnpj = COALESCE(NULLIF(EXCLUDED.cnpj, ''), funds.cnpj),
                         external_id = COALESCE(NULLIF(EXCLUDED.external_id, ''), funds.external_id),
                         name = COALESCE(NULLIF(EXCLUDED.name, ''), funds.name),
                         listed_at = EXCLUDED.listed_at",
                )
                .bind(&codes)
                .bind(&cnpjs)
                .bind(&external_ids)
                .bind(&names)
                .bind(fetched_at)
                .execute(&mut *conn)
                .await?;

                sqlx::query(
                    "INSERT INTO fund_state (fund_code)
                     SELECT UNNEST($1::text[])
                     ON CONFLICT (fund_code) DO NOTHING",
                )
                .bind(&codes)
                .execute(&mut *conn)
                .await?;
            }
            Payload::MarketSnapshot(snapshot) => {
                sqlx::query(
                    "INSERT INTO market_snapshots (taken_at, payload) VALUES ($1, $2)
                     ON CONFLICT (taken_at) DO UPDATE SET payload = EXCLUDED.payload",
                )
                .bind(fetched_at)
                .bind(Json(snapshot))
                .execute(&mut *conn)
                .await?;
            }
            Payload::Details(details) => {
                sqlx::query(
                    "INSERT INTO fund_details (fund_code, payload, fetched_at) VALUES ($1, $2, $3)
                     ON CONFLICT (fund_code) DO UPDATE SET
                         payload = EXCLUDED.payload, fetched_at = EXCLUDED.fetched_at",
                )
                .bind(fund_code)
                .bind(Json(details))
                .bind(fetched_at)
                .execute(&mut *conn)
                .await?;
            }
            Payload::Indicators(indicators) => {
                sqlx::query(
                    "INSERT INTO fund_indicators (fund_code, payload, fetched_at) VALUES ($1, $2, $3)
                     ON CONFLICT (fund_code) DO UPDATE SET
                         payload = EXCLUDED.payload, fetched_at = EXCLUDED.fetched_at",
                )
                .bind(fund_code)
                .bind(Json(indicators))
                .bind(fetched_at)
                .execute(&mut *conn)
                .await?;
            }
            Payload::Quotes(quote) => {
                if !quote.price.is_finite() || quote.price <= 0.0 {
                    return Err(StoreError::Invalid(format!(
                        "quote price {} for {}",
                        quote.price, fund_code
                    )));
                }
                sqlx::query(
                    "INSERT INTO intraday_quotes (fund_code, trade_date, observed_at, price)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (fund_code, observed_at) DO UPDATE SET price = EXCLUDED.price",
                )
                .bind(fund_code)
                .bind(market::trade_date(quote.observed_at))
                .bind(quote.observed_at)
                .bind(quote.price)
                .execute(&mut *conn)
                .await?;
            }
            Payload::Cotations(rows) => {
                let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
                let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
                let volumes: Vec<Option<f64>> = rows.iter().map(|r| r.volume).collect();

                sqlx::query(
                    "INSERT INTO daily_quotes (fund_code, trade_date, close, volume, source)
                     SELECT $1, trade_date, close, volume, 'history'
                     FROM UNNEST($2::date[], $3::float8[], $4::float8[]) AS t(trade_date, close, volume)
                     ON CONFLICT (fund_code, trade_date) DO UPDATE SET
                         close = EXCLUDED.close, volume = EXCLUDED.volume, source = EXCLUDED.source",
                )
                .bind(fund_code)
                .bind(&dates)
                .bind(&closes)
                .bind(&volumes)
                .execute(&mut *conn)
                .await?;
            }
            Payload::Documents(documents) => {
                let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
                let titles: Vec<String> = documents.iter().map(|d| d.title.clone()).collect();
                let kinds: Vec<String> = documents.iter().map(|d| d.kind.clone()).collect();
                let published: Vec<DateTime<Utc>> =
                    documents.iter().map(|d| d.published_at).collect();
                let urls: Vec<String> = documents.iter().map(|d| d.url.clone()).collect();

                sqlx::query(
                    "INSERT INTO fund_documents (fund_code, document_id, title, kind, published_at, url)
                     SELECT $1, id, title, kind, published_at, url
                     FROM UNNEST($2::text[], $3::text[], $4::text[], $5::timestamptz[], $6::text[])
                          AS t(id, title, kind, published_at, url)
                     ON CONFLICT (fund_code, document_id) DO UPDATE SET
                         title = EXCLUDED.title, kind = EXCLUDED.kind,
                         published_at = EXCLUDED.published_at, url = EXCLUDED.url",
                )
                .bind(fund_code)
                .bind(&ids)
                .bind(&titles)
                .bind(&kinds)
                .bind(&published)
                .bind(&urls)
                .execute(&mut *conn)
                .await?;
            }
            Payload::DividendYieldChart(points) => {
                let months: Vec<NaiveDate> = points.iter().map(|p| p.month).collect();
                let values: Vec<f64> = points.iter().map(|p| p.value).collect();

                sqlx::query(
                    "INSERT INTO dividend_yield_points (fund_code, month, value)
                     SELECT $1, month, value
                     FROM UNNEST($2::date[], $3::float8[]) AS t(month, value)
                     ON CONFLICT (fund_code, month) DO UPDATE SET value = EXCLUDED.value",
                )
                .bind(fund_code)
                .bind(&months)
                .bind(&values)
                .execute(&mut *conn)
                .await?;
            }
        }

        if let Some(column) = collected.payload.category().staleness_column() {
            sqlx::query(&mark_fresh_sql(column))
                .bind(fund_code)
                .bind(fetched_at)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    async fn close_day_with_lock(
        pool: PgPool,
        lock_key: i64,
        date: NaiveDate,
    ) -> Result<Option<u64>, StoreError> {
        let mut conn = pool.acquire().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(lock_key)
            .fetch_one(&mut *conn)
            .await?;
        if !locked {
            return Ok(None);
        }

        let result = Self::close_day_locked(&mut conn, date).await;

        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lock_key)
            .execute(&mut *conn)
            .await;
        if let Err(e) = unlocked {
            // Closing the connection releases a session lock; never return it to the pool held.
            warn!(error = %e, "Failed to release EOD advisory lock, closing connection");
            let _ = conn.detach().close().await;
        }

        result.map(Some)
    }

    async fn close_day_locked(conn: &mut PgConnection, date: NaiveDate) -> Result<u64, StoreError> {
        let mut tx = conn.begin().await?;

        let closed: Vec<String> = sqlx::query_scalar(
            "WITH latest AS (
                 SELECT DISTINCT ON (fund_code) fund_code, price
                 FROM intraday_quotes
                 WHERE trade_date = $1
                 ORDER BY fund_code, observed_at DESC
             )
             INSERT INTO daily_quotes (fund_code, trade_date, close, source)
             SELECT fund_code, $1, price, 'eod' FROM latest
             ON CONFLICT (fund_code, trade_date) DO UPDATE SET
                 close = EXCLUDED.close, source = EXCLUDED.source
             RETURNING fund_code",
        )
        .bind(date)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("UPDATE fund_state SET metrics_updated_at = NULL WHERE fund_code = ANY($1)")
            .bind(&closed)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(closed.len() as u64)
    }
}

/// Shared `WHERE` clause of the overdue queries.
fn overdue_predicate(column: &str) -> String {
    format!(
        "f.active AND (s.{column} IS NULL OR s.{column} < now() - make_interval(secs => $1))"
    )
}

fn select_overdue_sql(column: &str) -> String {
    format!(
        "SELECT f.code, COALESCE(f.cnpj, ''), COALESCE(f.external_id, '')
         FROM funds f
         LEFT JOIN fund_state s ON s.fund_code = f.code
         WHERE {}
         ORDER BY s.{column} ASC NULLS FIRST, f.code
         LIMIT $2",
        overdue_predicate(column)
    )
}

fn count_overdue_sql(column: &str) -> String {
    format!(
        "SELECT COUNT(*)
         FROM funds f
         LEFT JOIN fund_state s ON s.fund_code = f.code
         WHERE {}",
        overdue_predicate(column)
    )
}

fn mark_fresh_sql(column: &str) -> String {
    format!(
        "INSERT INTO fund_state (fund_code, {column}) VALUES ($1, $2)
         ON CONFLICT (fund_code) DO UPDATE SET {column} = EXCLUDED.{column}"
    )
}

fn staleness_column(category: Category) -> Result<&'static str, StoreError> {
    category.staleness_column().ok_or_else(|| {
        StoreError::Invalid(format!("{category} has no per-fund staleness"))
    })
}

#[async_trait]
impl CandidateSelector for PgStore {
    async fn select_overdue(
        &self,
        category: Category,
        interval: Duration,
        limit: usize,
    ) -> Result<Vec<FundCandidate>, StoreError> {
        let column = staleness_column(category)?;
        let rows: Vec<(String, String, String)> = sqlx::query_as(&select_overdue_sql(column))
            .bind(interval.as_secs_f64())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        debug!(category = %category, selected = rows.len(), "Selected overdue funds");

        Ok(rows
            .into_iter()
            .map(|(code, cnpj, external_id)| FundCandidate {
                code,
                cnpj,
                external_id,
            })
            .collect())
    }

    async fn count_overdue(
        &self,
        category: Category,
        interval: Duration,
    ) -> Result<u64, StoreError> {
        let column = staleness_column(category)?;
        let count: i64 = sqlx::query_scalar(&count_overdue_sql(column))
            .bind(interval.as_secs_f64())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl Persister for PgStore {
    async fn persist(&self, fund_code: &str, collected: &Collected) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::write_payload(&mut tx, fund_code, collected).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DerivedRecompute for PgStore {
    async fn recompute_dividend_yields(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO dividend_yield_aggregates (fund_code, dy_12m, dy_avg_12m, months, computed_at)
             SELECT fund_code, SUM(value), AVG(value), COUNT(*), now()
             FROM dividend_yield_points
             WHERE month >= (date_trunc('month', now()) - interval '12 months')::date
             GROUP BY fund_code
             ON CONFLICT (fund_code) DO UPDATE SET
                 dy_12m = EXCLUDED.dy_12m,
                 dy_avg_12m = EXCLUDED.dy_avg_12m,
                 months = EXCLUDED.months,
                 computed_at = EXCLUDED.computed_at",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EodStore for PgStore {
    async fn close_day_exclusive(
        &self,
        lock_key: i64,
        date: NaiveDate,
    ) -> Result<Option<u64>, StoreError> {
        // Lock and unlock must stay paired on one session even if the caller is cancelled
        let pool = self.pool.clone();
        run_detached(Self::close_day_with_lock(pool, lock_key, date)).await
    }
}
