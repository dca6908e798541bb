use deadpool_postgres::Pool;
use orders_api::{DbConfig, PgOrderStorage};

pub fn test_pool() -> Pool {
    DbConfig::from_env()
        .create_pool()
        .expect("Failed to create database pool")
}

pub async fn test_storage() -> (PgOrderStorage, Pool) {
    let pool = test_pool();
    let storage = PgOrderStorage::new(pool.clone());
    storage.migrate().await.expect("Failed to apply schema");
    (storage, pool)
}

/// Rows held for `order_uid` in orders, deliveries, payments and items.
pub async fn row_counts(pool: &Pool, order_uid: &str) -> [i64; 4] {
    let conn = pool.get().await.expect("Failed to get connection");
    let mut counts = [0i64; 4];
    for (slot, table) in ["orders", "deliveries", "payments", "items"].iter().enumerate() {
        let row = conn
            .query_one(
                &format!("SELECT COUNT(*) FROM {} WHERE order_uid = $1", table),
                &[&order_uid],
            )
            .await
            .expect("Failed to count rows");
        counts[slot] = row.get(0);
    }
    counts
}

pub fn unique_uid(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", prefix, nanos)
}
