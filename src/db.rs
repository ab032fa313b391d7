use crate::model::{InstanceOverride, Price, PriceMode};
use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert or replace the per-entity pricing row. The composite key
/// (entity_type, entity_id, view_mode) keeps rows for different view modes of
/// the same entity from clobbering each other.
#[instrument(skip_all)]
pub async fn upsert_instance_override(pool: &Pool, row: &InstanceOverride) -> Result<()> {
    sqlx::query(
        "INSERT INTO instance_overrides (entity_type, entity_id, view_mode, price_mode, price, currency_code) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(entity_type, entity_id, view_mode) DO UPDATE SET \
           price_mode = excluded.price_mode, \
           price = excluded.price, \
           currency_code = excluded.currency_code, \
           updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&row.entity_type)
    .bind(&row.entity_id)
    .bind(&row.view_mode)
    .bind(row.price_mode.as_str())
    .bind(&row.price.amount)
    .bind(&row.price.currency)
    .execute(pool)
    .await?;
    Ok(())
}

/// All pricing rows stored for one entity, across its view modes.
#[instrument(skip_all)]
pub async fn instance_overrides(
    pool: &Pool,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<InstanceOverride>> {
    let rows = sqlx::query(
        "SELECT view_mode, price_mode, price, currency_code FROM instance_overrides \
         WHERE entity_type = ? AND entity_id = ? ORDER BY view_mode",
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mode: String = row.get("price_mode");
        out.push(InstanceOverride {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            view_mode: row.get("view_mode"),
            // Unknown stored modes fall back to the default, same as absent config.
            price_mode: PriceMode::parse(&mode).unwrap_or_default(),
            price: Price::new(
                row.get::<String, _>("price"),
                row.get::<String, _>("currency_code"),
            ),
        });
    }
    Ok(out)
}

/// Record an externally issued invoice under its dedup hash. Insert-only;
/// re-recording the same (hash, invoice) pair is a no-op.
#[instrument(skip_all)]
pub async fn insert_invoice_record(pool: &Pool, invoice_id: &str, hash: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO invoice_records (invoice_id, hash) VALUES (?, ?) \
         ON CONFLICT(hash, invoice_id) DO NOTHING",
    )
    .bind(invoice_id)
    .bind(hash)
    .execute(pool)
    .await?;
    Ok(())
}

/// Invoice ids previously recorded under `hash`, oldest first.
#[instrument(skip_all)]
pub async fn invoice_ids_by_hash(pool: &Pool, hash: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT invoice_id FROM invoice_records WHERE hash = ? ORDER BY id",
    )
    .bind(hash)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Flag that invoices have been shown to this session. Gates a one-time UI
/// nudge elsewhere; repeated marking is a no-op.
#[instrument(skip_all)]
pub async fn mark_invoices_viewed(pool: &Pool, session_key: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO session_flags (session_key, invoices_viewed) VALUES (?, 1) \
         ON CONFLICT(session_key) DO UPDATE SET invoices_viewed = 1, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(session_key)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn invoices_viewed(pool: &Pool, session_key: &str) -> Result<bool> {
    let viewed = sqlx::query_scalar::<_, i64>(
        "SELECT invoices_viewed FROM session_flags WHERE session_key = ?",
    )
    .bind(session_key)
    .fetch_optional(pool)
    .await?;
    Ok(viewed.unwrap_or(0) != 0)
}
