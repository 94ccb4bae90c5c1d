//! Postgres sink implementation.
//!
//! Upserts are idempotent on the deterministic record id: re-harvesting
//! a product overwrites its row instead of inserting a new one. Each
//! chunk is one multi-row INSERT .. ON CONFLICT statement; chunks are
//! independent, there is no cross-chunk transaction.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::{SinkError, SinkResult};
use crate::traits::sink::RecordSink;
use crate::types::record::{Audience, PersistableRecord};

/// A `RecordSink` backed by a Postgres table.
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL.
    pub async fn connect(database_url: &str) -> SinkResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| SinkError::Unavailable(Box::new(e)))?;
        Ok(Self::new(pool))
    }

    /// Create the records table if it does not exist.
    pub async fn ensure_schema(&self) -> SinkResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                source_url TEXT NOT NULL,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                image_url TEXT NOT NULL,
                price DOUBLE PRECISION,
                currency TEXT NOT NULL,
                audience TEXT,
                brand TEXT,
                merchant TEXT,
                country TEXT NOT NULL,
                second_hand BOOLEAN NOT NULL,
                sizes TEXT NOT NULL,
                description TEXT,
                embedding TEXT,
                harvested_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::Unavailable(Box::new(e)))?;
        Ok(())
    }
}

fn parse_audience(value: &str) -> Option<Audience> {
    match value {
        "women" => Some(Audience::Women),
        "men" => Some(Audience::Men),
        _ => None,
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<PersistableRecord, sqlx::Error> {
    let audience: Option<String> = row.try_get("audience")?;
    let sizes_json: String = row.try_get("sizes")?;
    let embedding_json: Option<String> = row.try_get("embedding")?;
    let harvested_at: DateTime<Utc> = row.try_get("harvested_at")?;

    Ok(PersistableRecord {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        source_url: row.try_get("source_url")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        image_url: row.try_get("image_url")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        audience: audience.as_deref().and_then(parse_audience),
        brand: row.try_get("brand")?,
        merchant: row.try_get("merchant")?,
        country: row.try_get("country")?,
        second_hand: row.try_get("second_hand")?,
        sizes: serde_json::from_str(&sizes_json).unwrap_or_default(),
        description: row.try_get("description")?,
        embedding: embedding_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok()),
        harvested_at,
    })
}

#[async_trait::async_trait]
impl RecordSink for PostgresSink {
    async fn upsert_chunk(&self, records: &[PersistableRecord]) -> SinkResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        // Pre-serialize list fields so the bind closure stays infallible
        let rows: Vec<(String, Option<String>)> = records
            .iter()
            .map(|r| {
                (
                    serde_json::to_string(&r.sizes).unwrap_or_else(|_| "[]".to_string()),
                    r.embedding
                        .as_ref()
                        .and_then(|e| serde_json::to_string(e).ok()),
                )
            })
            .collect();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO records (id, source, source_url, external_id, title, image_url, \
             price, currency, audience, brand, merchant, country, second_hand, sizes, \
             description, embedding, harvested_at) ",
        );

        builder.push_values(records.iter().zip(rows.iter()), |mut b, (r, (sizes, embedding))| {
            b.push_bind(&r.id)
                .push_bind(&r.source)
                .push_bind(&r.source_url)
                .push_bind(&r.external_id)
                .push_bind(&r.title)
                .push_bind(&r.image_url)
                .push_bind(r.price)
                .push_bind(&r.currency)
                .push_bind(r.audience.map(|a| a.as_str()))
                .push_bind(&r.brand)
                .push_bind(&r.merchant)
                .push_bind(&r.country)
                .push_bind(r.second_hand)
                .push_bind(sizes)
                .push_bind(&r.description)
                .push_bind(embedding.as_deref())
                .push_bind(r.harvested_at);
        });

        builder.push(
            " ON CONFLICT (id) DO UPDATE SET \
             source_url = EXCLUDED.source_url, \
             external_id = EXCLUDED.external_id, \
             title = EXCLUDED.title, \
             image_url = EXCLUDED.image_url, \
             price = EXCLUDED.price, \
             currency = EXCLUDED.currency, \
             audience = EXCLUDED.audience, \
             brand = EXCLUDED.brand, \
             merchant = EXCLUDED.merchant, \
             country = EXCLUDED.country, \
             second_hand = EXCLUDED.second_hand, \
             sizes = EXCLUDED.sizes, \
             description = EXCLUDED.description, \
             embedding = EXCLUDED.embedding, \
             harvested_at = EXCLUDED.harvested_at",
        );

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| SinkError::ChunkRejected {
                reason: e.to_string(),
            })?;

        Ok(result.rows_affected())
    }

    async fn count(&self, source: Option<&str>) -> SinkResult<u64> {
        let count: i64 = match source {
            Some(source) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE source = $1")
                    .bind(source)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM records")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(|e| SinkError::Unavailable(Box::new(e)))?;

        Ok(count as u64)
    }

    async fn recent(&self, source: &str, limit: usize) -> SinkResult<Vec<PersistableRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM records WHERE source = $1 ORDER BY harvested_at DESC LIMIT $2",
        )
        .bind(source)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SinkError::Unavailable(Box::new(e)))?;

        rows.iter()
            .map(|row| record_from_row(row).map_err(|e| SinkError::Unavailable(Box::new(e))))
            .collect()
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
