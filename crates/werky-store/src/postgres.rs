use std::cmp::max;
use std::collections::HashSet;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;
use werky_core::{
    Document, DocumentStore, Filter, MarketError, OrderBy, Subscription, Timestamp, WriteOp,
};

use crate::feed::FeedRegistry;

const ENSURE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data JSONB NOT NULL,
    ts BIGINT NOT NULL,
    PRIMARY KEY (collection, id)
)
"#;

const ENSURE_TS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS documents_collection_ts_idx ON documents (collection, ts)";

/// Postgres-backed document store: one JSONB table, runtime queries.
/// Live feeds re-run each watcher's query after every local write; in the
/// deployed topology the gateway is the single writer, so in-process
/// invalidation is sufficient.
pub struct PgStore {
    pool: PgPool,
    feeds: FeedRegistry,
    last_ts: Mutex<i64>,
}

impl PgStore {
    pub async fn connect(pool: PgPool) -> anyhow::Result<Self> {
        sqlx::query(ENSURE_TABLE).execute(&pool).await?;
        sqlx::query(ENSURE_TS_INDEX).execute(&pool).await?;

        let seed: Option<i64> = sqlx::query_scalar("SELECT MAX(ts) FROM documents")
            .fetch_one(&pool)
            .await?;

        Ok(PgStore {
            pool,
            feeds: FeedRegistry::default(),
            last_ts: Mutex::new(seed.unwrap_or(0)),
        })
    }

    fn next_ts(&self) -> Timestamp {
        let mut last = self.last_ts.lock();
        *last = max(Utc::now().timestamp_micros(), *last + 1);
        Timestamp::from_micros(*last)
    }

    async fn run_query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> Result<Vec<Document>, MarketError> {
        let mut sql = String::from("SELECT id, data, ts FROM documents WHERE collection = $1");
        for position in 0..filters.len() {
            sql.push_str(&format!(" AND data @> ${}", position + 2));
        }
        sql.push_str(match order {
            OrderBy::Timestamp => " ORDER BY ts ASC",
            OrderBy::Unspecified => " ORDER BY id ASC",
        });

        let mut query = sqlx::query(&sql).bind(collection);
        for filter in filters {
            query = query.bind(containment(filter));
        }

        let rows = query.fetch_all(&self.pool).await.map_err(pg_err)?;
        rows.into_iter().map(document_from_row).collect()
    }

    async fn notify(&self, collections: &HashSet<String>) {
        for collection in collections {
            for feed in self.feeds.queries_for(collection) {
                match self
                    .run_query(&feed.collection, &feed.filters, feed.order)
                    .await
                {
                    Ok(snapshot) => {
                        let _ = feed.tx.send(snapshot);
                    }
                    Err(err) => warn!("feed re-query for {collection} failed: {err}"),
                }
            }
        }
    }
}

fn containment(filter: &Filter) -> Value {
    let mut object = serde_json::Map::new();
    object.insert(filter.field.clone(), filter.value.clone());
    Value::Object(object)
}

fn document_from_row(row: sqlx::postgres::PgRow) -> Result<Document, MarketError> {
    Ok(Document {
        id: row.try_get("id").map_err(pg_err)?,
        data: row.try_get("data").map_err(pg_err)?,
        ts: Timestamp::from_micros(row.try_get::<i64, _>("ts").map_err(pg_err)?),
    })
}

fn pg_err(err: sqlx::Error) -> MarketError {
    MarketError::Persistence(anyhow::Error::new(err))
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn create(
        &self,
        collection: &str,
        id: Option<String>,
        data: Value,
    ) -> Result<Document, MarketError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let ts = self.next_ts();

        let inserted = sqlx::query(
            "INSERT INTO documents (collection, id, data, ts) VALUES ($1, $2, $3, $4) \
             ON CONFLICT DO NOTHING",
        )
        .bind(collection)
        .bind(&id)
        .bind(&data)
        .bind(ts.as_micros())
        .execute(&self.pool)
        .await
        .map_err(pg_err)?;

        if inserted.rows_affected() == 0 {
            return Err(MarketError::Persistence(anyhow!(
                "{collection}/{id} already exists"
            )));
        }

        self.notify(&HashSet::from([collection.to_string()])).await;
        Ok(Document { id, data, ts })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, MarketError> {
        let row = sqlx::query("SELECT id, data, ts FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(pg_err)?;

        row.map(document_from_row).transpose()
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Document, MarketError> {
        let ts = self.next_ts();
        let row = sqlx::query(
            "UPDATE documents SET data = data || $3, ts = $4 \
             WHERE collection = $1 AND id = $2 RETURNING id, data, ts",
        )
        .bind(collection)
        .bind(id)
        .bind(&patch)
        .bind(ts.as_micros())
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_err)?;

        let Some(row) = row else {
            return Err(MarketError::not_found(collection, id));
        };
        let doc = document_from_row(row)?;

        self.notify(&HashSet::from([collection.to_string()])).await;
        Ok(doc)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), MarketError> {
        let deleted = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(pg_err)?;

        if deleted.rows_affected() == 0 {
            return Err(MarketError::not_found(collection, id));
        }

        self.notify(&HashSet::from([collection.to_string()])).await;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> Result<Vec<Document>, MarketError> {
        self.run_query(collection, filters, order).await
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> Result<Subscription, MarketError> {
        let (subscription, tx) = self.feeds.register(collection, filters, order);
        let initial = self.run_query(collection, filters, order).await?;
        let _ = tx.send(initial);
        Ok(subscription)
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), MarketError> {
        let mut tx = self.pool.begin().await.map_err(pg_err)?;
        let mut touched: HashSet<String> = HashSet::new();

        for op in ops {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    data,
                } => {
                    let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
                    let ts = self.next_ts();
                    let inserted = sqlx::query(
                        "INSERT INTO documents (collection, id, data, ts) \
                         VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(&data)
                    .bind(ts.as_micros())
                    .execute(&mut *tx)
                    .await
                    .map_err(pg_err)?;

                    if inserted.rows_affected() == 0 {
                        return Err(MarketError::Persistence(anyhow!(
                            "{collection}/{id} already exists"
                        )));
                    }
                    touched.insert(collection);
                }
                WriteOp::Update {
                    collection,
                    id,
                    patch,
                } => {
                    let ts = self.next_ts();
                    let updated = sqlx::query(
                        "UPDATE documents SET data = data || $3, ts = $4 \
                         WHERE collection = $1 AND id = $2",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(&patch)
                    .bind(ts.as_micros())
                    .execute(&mut *tx)
                    .await
                    .map_err(pg_err)?;

                    if updated.rows_affected() == 0 {
                        return Err(MarketError::not_found(&collection, &id));
                    }
                    touched.insert(collection);
                }
            }
        }

        tx.commit().await.map_err(pg_err)?;
        self.notify(&touched).await;
        Ok(())
    }
}
