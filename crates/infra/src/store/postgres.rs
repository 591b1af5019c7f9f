//! Postgres-backed store implementation.
//!
//! Products keep their batch array as JSONB so a ledger mutation stays a
//! single-row write. The `version` column carries the optimistic concurrency
//! token; `save_product` only updates when it matches.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Backend` |
//! | Decode / ColumnDecode | N/A | `Serialization` |
//! | Other | N/A | `Backend` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

use stockledger_core::{BatchId, ExpectedVersion, ProductId, StockRowId};
use stockledger_inventory::{Batch, Product, StockRow};
use stockledger_sales::Sale;

use super::{
    CursorPosition, ProductFilter, ProductProjection, ProductStore, ProjectionMode,
    ProjectionOutcome, SaleStore, StockRowUpsert, StockStore, StoreError, StoreResult,
};

/// Apply embedded migrations from `crates/infra/migrations`.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const PRODUCT_COLUMNS: &str = "product_id, name, barcode, category_id, brand_id, subcategory_id, \
     cost_price, selling_price, stock_qty, expiry_date, batches, deleted, version, created_at, updated_at";

const STOCK_COLUMNS: &str =
    "id, product_id, batch_id, name, stock_qty, expiry_date, created_at, updated_at";

fn push_product_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
    qb.push(" WHERE NOT deleted");
    if let Some(range) = filter.quantity {
        qb.push(" AND stock_qty >= ").push_bind(range.min);
        if let Some(max) = range.max {
            qb.push(" AND stock_qty <= ").push_bind(max);
        }
    }
}

/// `(updated_at < t) OR (updated_at = t AND <id> < id)`; timestamp-only for
/// legacy positions.
fn push_after(qb: &mut QueryBuilder<'_, Postgres>, id_column: &str, after: Option<&CursorPosition>) {
    let Some(position) = after else { return };
    match position.id.as_deref().filter(|s| !s.is_empty()) {
        Some(id) => {
            qb.push(" AND (updated_at < ")
                .push_bind(position.updated_at)
                .push(" OR (updated_at = ")
                .push_bind(position.updated_at)
                .push(format!(" AND {id_column} < "))
                .push_bind(id.to_string())
                .push("))");
        }
        None => {
            qb.push(" AND updated_at < ").push_bind(position.updated_at);
        }
    }
}

/// Rows per upsert statement. Each row binds 8 parameters and Postgres caps a
/// statement at 65535.
const UPSERT_CHUNK_ROWS: usize = 8000;

/// Last occurrence wins per `(product_id, batch_id)`; one statement may not
/// touch the same conflict key twice.
fn dedupe_upserts<'a>(rows: impl IntoIterator<Item = &'a StockRowUpsert>) -> Vec<&'a StockRowUpsert> {
    let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
    let mut unique: Vec<&StockRowUpsert> = Vec::new();
    for row in rows {
        let key = (row.stock.product_id.as_str(), row.stock.batch_id.as_str());
        match slots.get(&key) {
            Some(&slot) => unique[slot] = row,
            None => {
                slots.insert(key, unique.len());
                unique.push(row);
            }
        }
    }
    unique
}

async fn upsert_chunk(conn: &mut PgConnection, rows: &[&StockRowUpsert]) -> StoreResult<u64> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO stocks ({STOCK_COLUMNS}) "));
    qb.push_values(rows, |mut b, row| {
        let stock = &row.stock;
        b.push_bind(row.id_on_insert.as_str().to_string())
            .push_bind(stock.product_id.as_str().to_string())
            .push_bind(stock.batch_id.as_str().to_string())
            .push_bind(stock.name.clone())
            .push_bind(stock.stock_qty)
            .push_bind(stock.expiry_date)
            .push_bind(stock.created_at)
            .push_bind(stock.updated_at);
    });
    qb.push(
        " ON CONFLICT (product_id, batch_id) DO UPDATE SET \
         name = EXCLUDED.name, stock_qty = EXCLUDED.stock_qty, \
         expiry_date = EXCLUDED.expiry_date, updated_at = EXCLUDED.updated_at",
    );

    let result = qb
        .build()
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("upsert_chunk", e))?;
    Ok(result.rows_affected())
}

/// Raise the projected version of one product, locking its watermark row
/// until commit. `false` when a newer version is already projected.
async fn claim_projection(conn: &mut PgConnection, projection: &ProductProjection) -> StoreResult<bool> {
    let version = i64::try_from(projection.version)
        .map_err(|_| StoreError::Conflict(format!("version {} out of range", projection.version)))?;
    let claimed: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO stock_projection_versions (product_id, version)
        VALUES ($1, $2)
        ON CONFLICT (product_id) DO UPDATE SET version = EXCLUDED.version
        WHERE stock_projection_versions.version <= EXCLUDED.version
        RETURNING version
        "#,
    )
    .bind(projection.product_id.as_str())
    .bind(version)
    .fetch_optional(conn)
    .await
    .map_err(|e| map_sqlx_error("claim_projection", e))?;
    Ok(claimed.is_some())
}

async fn prune_product_rows(conn: &mut PgConnection, projection: &ProductProjection) -> StoreResult<u64> {
    let keep: Vec<String> = projection
        .rows
        .iter()
        .map(|r| r.stock.batch_id.as_str().to_string())
        .collect();
    let result = sqlx::query(
        "DELETE FROM stocks WHERE product_id = $1 \
         AND (batch_id IS NULL OR btrim(batch_id) = '' OR NOT (batch_id = ANY($2)))",
    )
    .bind(projection.product_id.as_str())
    .bind(keep)
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("prune_product_rows", e))?;
    Ok(result.rows_affected())
}

fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn count_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[async_trait]
impl ProductStore for PostgresStore {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn find_product(&self, id: &ProductId) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE product_id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_product", e))?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(skip(self, product), fields(product_id = %product.product_id), err)]
    async fn insert_product(&self, product: &Product) -> StoreResult<Product> {
        let batches = batches_json(&product.batches)?;
        sqlx::query(
            r#"
            INSERT INTO products (
                product_id, name, barcode, category_id, brand_id, subcategory_id,
                cost_price, selling_price, stock_qty, expiry_date, batches, deleted,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1, $13, $14)
            "#,
        )
        .bind(product.product_id.as_str())
        .bind(&product.name)
        .bind(&product.barcode)
        .bind(&product.category_id)
        .bind(&product.brand_id)
        .bind(&product.subcategory_id)
        .bind(product.cost_price)
        .bind(product.selling_price)
        .bind(product.stock_qty)
        .bind(product.expiry_date)
        .bind(batches)
        .bind(product.deleted)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        let mut stored = product.clone();
        stored.version = 1;
        Ok(stored)
    }

    #[instrument(
        skip(self, product),
        fields(product_id = %product.product_id, expected_version = ?expected),
        err
    )]
    async fn save_product(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> StoreResult<Product> {
        let batches = batches_json(&product.batches)?;
        let expected_version: Option<i64> = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(
                i64::try_from(v)
                    .map_err(|_| StoreError::Conflict(format!("version {v} out of range")))?,
            ),
        };

        let row = sqlx::query(
            r#"
            UPDATE products SET
                name = $2, barcode = $3, category_id = $4, brand_id = $5, subcategory_id = $6,
                cost_price = $7, selling_price = $8, stock_qty = $9, expiry_date = $10,
                batches = $11, deleted = $12, updated_at = $13, version = version + 1
            WHERE product_id = $1 AND ($14::BIGINT IS NULL OR version = $14)
            RETURNING version
            "#,
        )
        .bind(product.product_id.as_str())
        .bind(&product.name)
        .bind(&product.barcode)
        .bind(&product.category_id)
        .bind(&product.brand_id)
        .bind(&product.subcategory_id)
        .bind(product.cost_price)
        .bind(product.selling_price)
        .bind(product.stock_qty)
        .bind(product.expiry_date)
        .bind(batches)
        .bind(product.deleted)
        .bind(product.updated_at)
        .bind(expected_version)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_product", e))?;

        match row {
            Some(row) => {
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| map_sqlx_error("save_product", e))?;
                let mut stored = product.clone();
                stored.version = count_u64(version);
                Ok(stored)
            }
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE product_id = $1)")
                        .bind(product.product_id.as_str())
                        .fetch_one(&*self.pool)
                        .await
                        .map_err(|e| map_sqlx_error("save_product", e))?;
                if exists {
                    Err(StoreError::Conflict(format!(
                        "product {} was modified concurrently (expected {expected:?})",
                        product.product_id
                    )))
                } else {
                    Err(StoreError::NotFound(format!(
                        "product {} not found",
                        product.product_id
                    )))
                }
            }
        }
    }

    async fn scan_products(
        &self,
        filter: &ProductFilter,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products"));
        push_product_filter(&mut qb, filter);
        qb.push(" ORDER BY product_id ASC LIMIT ")
            .push_bind(limit_i64(limit))
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("scan_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    async fn page_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products"));
        push_product_filter(&mut qb, filter);
        push_after(&mut qb, "product_id", after);
        qb.push(" ORDER BY updated_at DESC, product_id DESC LIMIT ")
            .push_bind(limit_i64(limit));

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("page_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    async fn count_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
    ) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products");
        push_product_filter(&mut qb, filter);
        push_after(&mut qb, "product_id", after);

        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_products", e))?;
        Ok(count_u64(count))
    }
}

#[async_trait]
impl StockStore for PostgresStore {
    async fn rows_for_product(&self, product_id: &ProductId) -> StoreResult<Vec<StockRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stocks WHERE product_id = $1 ORDER BY id"
        ))
        .bind(product_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rows_for_product", e))?;
        rows.iter().map(stock_from_row).collect()
    }

    /// One transaction per call. Watermark rows are claimed in the order
    /// given, which is product id order for full resync pages.
    #[instrument(skip(self, projections), fields(products = projections.len()), err)]
    async fn apply_projections(
        &self,
        projections: &[ProductProjection],
        mode: ProjectionMode,
    ) -> StoreResult<ProjectionOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("apply_projections", e))?;
        let mut outcome = ProjectionOutcome::default();
        let mut claimed = Vec::with_capacity(projections.len());

        for projection in projections {
            if !claim_projection(&mut *tx, projection).await? {
                outcome.stale.push(projection.product_id.clone());
                continue;
            }
            if mode == ProjectionMode::Replace {
                outcome.rows_removed += prune_product_rows(&mut *tx, projection).await?;
            }
            claimed.push(projection);
        }

        let rows = dedupe_upserts(claimed.iter().flat_map(|p| p.rows.iter()));
        for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
            outcome.rows_written += upsert_chunk(&mut *tx, chunk).await?;
        }
        debug!(
            rows = rows.len(),
            statements = rows.len().div_ceil(UPSERT_CHUNK_ROWS),
            "projection upserts sent"
        );

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("apply_projections", e))?;
        Ok(outcome)
    }

    async fn count_orphaned_rows(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stocks WHERE batch_id IS NULL OR btrim(batch_id) = ''",
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_orphaned_rows", e))?;
        Ok(count_u64(count))
    }

    #[instrument(skip(self), err)]
    async fn delete_orphaned_rows(&self) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM stocks WHERE batch_id IS NULL OR btrim(batch_id) = ''")
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_orphaned_rows", e))?;
        Ok(result.rows_affected())
    }

    async fn count_rows(&self, after: Option<&CursorPosition>) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM stocks WHERE TRUE");
        push_after(&mut qb, "id", after);
        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_rows", e))?;
        Ok(count_u64(count))
    }

    async fn page_rows(
        &self,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<StockRow>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {STOCK_COLUMNS} FROM stocks WHERE TRUE"));
        push_after(&mut qb, "id", after);
        qb.push(" ORDER BY updated_at DESC, id DESC LIMIT ")
            .push_bind(limit_i64(limit));

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("page_rows", e))?;
        rows.iter().map(stock_from_row).collect()
    }

    async fn distinct_product_ids(&self) -> StoreResult<Vec<ProductId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT product_id FROM stocks ORDER BY product_id")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("distinct_product_ids", e))?;
        Ok(ids.into_iter().map(ProductId::from).collect())
    }
}

#[async_trait]
impl SaleStore for PostgresStore {
    #[instrument(skip(self, sale), fields(sale_id = %sale.sale_id), err)]
    async fn insert_sale(&self, sale: &Sale) -> StoreResult<()> {
        let document =
            serde_json::to_value(sale).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query("INSERT INTO sales (sale_id, document, created_at) VALUES ($1, $2, $3)")
            .bind(sale.sale_id.as_str())
            .bind(document)
            .bind(sale.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_sale", e))?;
        Ok(())
    }

    async fn sales_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Sale>> {
        let documents: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT document FROM sales WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sales_between", e))?;

        documents
            .into_iter()
            .map(|d| serde_json::from_value(d).map_err(|e| StoreError::Serialization(e.to_string())))
            .collect()
    }
}

fn batches_json(batches: &[Batch]) -> StoreResult<serde_json::Value> {
    serde_json::to_value(batches).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn product_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Product> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode product", e);
    let product_id: String = row.try_get("product_id").map_err(decode)?;
    let batches: serde_json::Value = row.try_get("batches").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;
    let cost_price: Decimal = row.try_get("cost_price").map_err(decode)?;
    let selling_price: Decimal = row.try_get("selling_price").map_err(decode)?;

    Ok(Product {
        product_id: ProductId::from(product_id.clone()),
        name: row.try_get("name").map_err(decode)?,
        barcode: row.try_get("barcode").map_err(decode)?,
        category_id: row.try_get("category_id").map_err(decode)?,
        brand_id: row.try_get("brand_id").map_err(decode)?,
        subcategory_id: row.try_get("subcategory_id").map_err(decode)?,
        cost_price,
        selling_price,
        stock_qty: row.try_get("stock_qty").map_err(decode)?,
        expiry_date: row.try_get("expiry_date").map_err(decode)?,
        batches: serde_json::from_value(batches)
            .map_err(|e| StoreError::Serialization(format!("product {product_id} batches: {e}")))?,
        deleted: row.try_get("deleted").map_err(decode)?,
        version: count_u64(version),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn stock_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<StockRow> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode stock row", e);
    let id: String = row.try_get("id").map_err(decode)?;
    let product_id: String = row.try_get("product_id").map_err(decode)?;
    let batch_id: Option<String> = row.try_get("batch_id").map_err(decode)?;

    Ok(StockRow {
        id: StockRowId::from(id),
        product_id: ProductId::from(product_id),
        batch_id: batch_id.map(BatchId::from),
        name: row.try_get("name").map_err(decode)?,
        stock_qty: row.try_get("stock_qty").map_err(decode)?,
        expiry_date: row.try_get("expiry_date").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
