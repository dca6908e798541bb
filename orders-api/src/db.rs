//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, the
//! [`PgOrderStorage`] adapter that persists the order aggregate across the
//! `orders`, `deliveries`, `payments` and `items` tables, and the
//! [`PgOffsetStore`] that keeps consumer positions in `consumer_offsets`.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime, Timeouts,
    Transaction,
};
use futures_util::future::try_join_all;
use orders_core::{
    truncate_timestamp, ConfigError, Delivery, IngestError, Item, Order, Payment, StorageError,
};
use orders_storage::OrderStorage;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::ingest::{OffsetStore, PartitionKey};

/// Embedded migrations, applied in order.
const MIGRATIONS: [(&str, &str); 2] = [
    ("V1__orders", include_str!("../migrations/V1__orders.sql")),
    (
        "V2__consumer_offsets",
        include_str!("../migrations/V2__consumer_offsets.sql"),
    ),
];

const INSERT_ORDER: &str = "INSERT INTO orders (order_uid, track_number, entry, locale, \
     internal_signature, customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_DELIVERY: &str = "INSERT INTO deliveries (order_uid, name, phone, zip, city, \
     address, region, email) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const INSERT_PAYMENT: &str = "INSERT INTO payments (order_uid, transaction, request_id, \
     currency, provider, amount, payment_dt, bank, delivery_cost, goods_total, custom_fee) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_ITEM: &str = "INSERT INTO items (order_uid, chrt_id, track_number, price, rid, \
     name, sale, size, total_price, nm_id, brand, status) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)";

const SELECT_HEADER: &str = "SELECT o.order_uid, o.track_number, o.entry, o.locale, \
     o.internal_signature, o.customer_id, o.delivery_service, o.shardkey, o.sm_id, \
     o.date_created, o.oof_shard, \
     d.name, d.phone, d.zip, d.city, d.address, d.region, d.email, \
     p.transaction, p.request_id, p.currency, p.provider, p.amount, p.payment_dt, p.bank, \
     p.delivery_cost, p.goods_total, p.custom_fee \
     FROM orders o \
     JOIN deliveries d ON d.order_uid = o.order_uid \
     JOIN payments p ON p.order_uid = o.order_uid \
     WHERE o.order_uid = $1";

const SELECT_ITEMS: &str = "SELECT chrt_id, track_number, price, rid, name, sale, size, \
     total_price, nm_id, brand, status \
     FROM items WHERE order_uid = $1 ORDER BY chrt_id, id";

const SELECT_OFFSET: &str = "SELECT next_offset FROM consumer_offsets \
     WHERE group_id = $1 AND topic = $2 AND partition_id = $3";

const UPSERT_OFFSET: &str = "INSERT INTO consumer_offsets (group_id, topic, partition_id, \
     next_offset) VALUES ($1, $2, $3, $4) \
     ON CONFLICT (group_id, topic, partition_id) \
     DO UPDATE SET next_offset = EXCLUDED.next_offset, updated_at = now()";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Connections opened eagerly at startup
    pub min_conns: usize,
    /// Maximum pool size
    pub max_conns: usize,
    /// Connection timeout
    pub timeout: Duration,
    /// Apply the embedded schema on startup
    pub run_migrations: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "orders".to_string(),
            user: "user".to_string(),
            password: "password".to_string(),
            min_conns: 5,
            max_conns: 10,
            timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("POSTGRES_HOST").unwrap_or(defaults.host),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("POSTGRES_DB").unwrap_or(defaults.dbname),
            user: std::env::var("POSTGRES_USER").unwrap_or(defaults.user),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or(defaults.password),
            min_conns: std::env::var("POSTGRES_MIN_CONNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_conns),
            max_conns: std::env::var("POSTGRES_MAX_CONNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_conns),
            timeout: Duration::from_secs(
                std::env::var("POSTGRES_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.as_secs()),
            ),
            run_migrations: std::env::var("ORDERS_RUN_MIGRATIONS")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.run_migrations),
        }
    }

    /// Check pool sizing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_conns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_conns".to_string(),
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }
        if self.min_conns > self.max_conns {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("min_conns={}", self.min_conns),
                option_b: format!("max_conns={}", self.max_conns),
            });
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, StorageError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig {
            max_size: self.max_conns,
            timeouts: Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..Default::default()
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::PoolUnavailable {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_error(err: PoolError) -> StorageError {
    tracing::error!(error = ?err, "Connection pool error");
    StorageError::PoolUnavailable {
        reason: err.to_string(),
    }
}

fn insert_error(table: &str, order_uid: &str, err: tokio_postgres::Error) -> StorageError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return StorageError::Duplicate {
            order_uid: order_uid.to_string(),
        };
    }
    StorageError::InsertFailed {
        table: table.to_string(),
        reason: err.to_string(),
    }
}

fn query_error(err: tokio_postgres::Error) -> StorageError {
    StorageError::QueryFailed {
        reason: err.to_string(),
    }
}

fn transaction_error(err: tokio_postgres::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: err.to_string(),
    }
}

// ============================================================================
// POSTGRES STORE
// ============================================================================

/// [`OrderStorage`] over a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgOrderStorage {
    pool: Pool,
}

impl PgOrderStorage {
    /// Wrap an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool described by `config`.
    pub fn from_config(config: &DbConfig) -> Result<Self, StorageError> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, StorageError> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.get_conn().await?;
        for (name, sql) in MIGRATIONS {
            conn.batch_execute(sql).await.map_err(query_error)?;
            tracing::debug!(migration = name, "Migration applied");
        }
        tracing::info!(migrations = MIGRATIONS.len(), "Database schema applied");
        Ok(())
    }

    /// Offset store sharing this pool.
    pub fn offset_store(&self) -> PgOffsetStore {
        PgOffsetStore::new(self.pool.clone())
    }

    /// Open `count` connections up front so the first requests do not pay
    /// for connection setup.
    pub async fn warm_up(&self, count: usize) -> Result<(), StorageError> {
        let conns = try_join_all((0..count).map(|_| self.pool.get()))
            .await
            .map_err(pool_error)?;
        tracing::debug!(connections = conns.len(), "Connection pool warmed");
        Ok(())
    }

    async fn insert_rows(tx: &Transaction<'_>, order: &Order) -> Result<(), StorageError> {
        let uid = &order.order_uid;
        let date_created = truncate_timestamp(order.date_created);

        tx.execute(
            INSERT_ORDER,
            &[
                uid,
                &order.track_number,
                &order.entry,
                &order.locale,
                &order.internal_signature,
                &order.customer_id,
                &order.delivery_service,
                &order.shardkey,
                &order.sm_id,
                &date_created,
                &order.oof_shard,
            ],
        )
        .await
        .map_err(|e| insert_error("orders", uid, e))?;

        let d = &order.delivery;
        tx.execute(
            INSERT_DELIVERY,
            &[uid, &d.name, &d.phone, &d.zip, &d.city, &d.address, &d.region, &d.email],
        )
        .await
        .map_err(|e| insert_error("deliveries", uid, e))?;

        let p = &order.payment;
        tx.execute(
            INSERT_PAYMENT,
            &[
                uid,
                &p.transaction,
                &p.request_id,
                &p.currency,
                &p.provider,
                &p.amount,
                &p.payment_dt,
                &p.bank,
                &p.delivery_cost,
                &p.goods_total,
                &p.custom_fee,
            ],
        )
        .await
        .map_err(|e| insert_error("payments", uid, e))?;

        if order.items.is_empty() {
            return Ok(());
        }

        // One prepared statement, pipelined over the transaction's connection.
        let stmt = tx
            .prepare_cached(INSERT_ITEM)
            .await
            .map_err(|e| insert_error("items", uid, e))?;
        let stmt = &stmt;
        try_join_all(order.items.iter().map(|item| async move {
            tx.execute(
                stmt,
                &[
                    uid,
                    &item.chrt_id,
                    &item.track_number,
                    &item.price,
                    &item.rid,
                    &item.name,
                    &item.sale,
                    &item.size,
                    &item.total_price,
                    &item.nm_id,
                    &item.brand,
                    &item.status,
                ],
            )
            .await
        }))
        .await
        .map_err(|e| insert_error("items", uid, e))?;

        Ok(())
    }
}

fn order_from_rows(header: &Row, items: &[Row]) -> Result<Order, tokio_postgres::Error> {
    let items = items
        .iter()
        .map(|row| -> Result<Item, tokio_postgres::Error> {
            Ok(Item {
                chrt_id: row.try_get("chrt_id")?,
                track_number: row.try_get("track_number")?,
                price: row.try_get("price")?,
                rid: row.try_get("rid")?,
                name: row.try_get("name")?,
                sale: row.try_get("sale")?,
                size: row.try_get("size")?,
                total_price: row.try_get("total_price")?,
                nm_id: row.try_get("nm_id")?,
                brand: row.try_get("brand")?,
                status: row.try_get("status")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Order {
        order_uid: header.try_get(0)?,
        track_number: header.try_get(1)?,
        entry: header.try_get(2)?,
        locale: header.try_get(3)?,
        internal_signature: header.try_get(4)?,
        customer_id: header.try_get(5)?,
        delivery_service: header.try_get(6)?,
        shardkey: header.try_get(7)?,
        sm_id: header.try_get(8)?,
        date_created: header.try_get(9)?,
        oof_shard: header.try_get(10)?,
        delivery: Delivery {
            name: header.try_get(11)?,
            phone: header.try_get(12)?,
            zip: header.try_get(13)?,
            city: header.try_get(14)?,
            address: header.try_get(15)?,
            region: header.try_get(16)?,
            email: header.try_get(17)?,
        },
        payment: Payment {
            transaction: header.try_get(18)?,
            request_id: header.try_get(19)?,
            currency: header.try_get(20)?,
            provider: header.try_get(21)?,
            amount: header.try_get(22)?,
            payment_dt: header.try_get(23)?,
            bank: header.try_get(24)?,
            delivery_cost: header.try_get(25)?,
            goods_total: header.try_get(26)?,
            custom_fee: header.try_get(27)?,
        },
        items,
    })
}

#[async_trait]
impl OrderStorage for PgOrderStorage {
    async fn save_order(&self, order: &Order) -> Result<(), StorageError> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(transaction_error)?;

        match Self::insert_rows(&tx, order).await {
            Ok(()) => {
                tx.commit().await.map_err(transaction_error)?;
                tracing::debug!(
                    order_uid = %order.order_uid,
                    items = order.items.len(),
                    "Order persisted"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        order_uid = %order.order_uid,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn get_order_by_id(&self, order_uid: &str) -> Result<Order, StorageError> {
        let conn = self.get_conn().await?;

        let header = conn
            .query_opt(SELECT_HEADER, &[&order_uid])
            .await
            .map_err(query_error)?
            .ok_or_else(|| StorageError::NotFound {
                order_uid: order_uid.to_string(),
            })?;

        let items = conn
            .query(SELECT_ITEMS, &[&order_uid])
            .await
            .map_err(query_error)?;

        order_from_rows(&header, &items).map_err(query_error)
    }
}

// ============================================================================
// CONSUMER OFFSETS
// ============================================================================

/// [`OffsetStore`] backed by the `consumer_offsets` table.
#[derive(Clone)]
pub struct PgOffsetStore {
    pool: Pool,
}

fn offset_error(e: impl std::fmt::Display) -> IngestError {
    IngestError::OffsetStore {
        reason: e.to_string(),
    }
}

impl PgOffsetStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OffsetStore for PgOffsetStore {
    async fn load(&self, key: &PartitionKey) -> Result<Option<i64>, IngestError> {
        let conn = self.pool.get().await.map_err(offset_error)?;
        let row = conn
            .query_opt(SELECT_OFFSET, &[&key.group_id, &key.topic, &key.partition])
            .await
            .map_err(offset_error)?;
        row.map(|row| row.try_get(0))
            .transpose()
            .map_err(offset_error)
    }

    async fn commit(&self, key: &PartitionKey, next_offset: i64) -> Result<(), IngestError> {
        let conn = self.pool.get().await.map_err(offset_error)?;
        conn.execute(
            UPSERT_OFFSET,
            &[&key.group_id, &key.topic, &key.partition, &next_offset],
        )
        .await
        .map_err(offset_error)?;
        Ok(())
    }
}
