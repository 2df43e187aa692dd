//! Knowledge base statistics.
//!
//! Prints a summary of the vector store: database size, record and
//! document counts, the embedding models present, and a per-document
//! breakdown with the time of the last ingestion.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Per-document row in the breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStats {
    pub source_document: String,
    pub chunks: i64,
    pub last_ingested: i64,
}

/// Collect the per-document breakdown, ordered by document name.
pub async fn document_stats(pool: &SqlitePool) -> Result<Vec<DocumentStats>> {
    let rows = sqlx::query(
        r#"
        SELECT source_document, COUNT(*) AS chunks, MAX(updated_at) AS last_ingested
        FROM vector_records
        GROUP BY source_document
        ORDER BY source_document
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DocumentStats {
            source_document: row.get("source_document"),
            chunks: row.get("chunks"),
            last_ingested: row.get("last_ingested"),
        })
        .collect())
}

/// Embedding models with their record counts.
async fn model_counts(pool: &SqlitePool) -> Result<Vec<(String, i64, i64)>> {
    let rows = sqlx::query(
        "SELECT model, dims, COUNT(*) AS records FROM vector_records GROUP BY model, dims ORDER BY model",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("model"), row.get("dims"), row.get("records")))
        .collect())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let totals = sqlx::query(
        "SELECT COUNT(*) AS records, COUNT(DISTINCT source_document) AS documents FROM vector_records",
    )
    .fetch_one(&pool)
    .await?;
    let records: i64 = totals.get("records");
    let documents: i64 = totals.get("documents");

    println!("Knowledge Base Stats");
    println!("====================");
    println!();
    println!("  Database:   {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!("  Domain:     {}", config.domain.name);
    println!();
    println!("  Documents:  {}", documents);
    println!("  Chunks:     {}", records);

    let models = model_counts(&pool).await?;
    for (model, dims, count) in &models {
        println!("  Model:      {} ({} dims, {} chunks)", model, dims, count);
    }
    if models.len() > 1 {
        println!("  Warning:    multiple embedding models present; run `supportbot ingest --full`");
    }

    let breakdown = document_stats(&pool).await?;
    if !breakdown.is_empty() {
        println!();
        println!("  By document:");
        println!("  {:<40} {:>8}   {}", "DOCUMENT", "CHUNKS", "LAST INGEST");
        println!("  {}", "-".repeat(70));

        for doc in &breakdown {
            println!(
                "  {:<40} {:>8}   {}",
                doc.source_document,
                doc.chunks,
                format_ts_relative(doc.last_ingested)
            );
        }
    } else {
        println!();
        println!("  The knowledge base is empty. Run `supportbot ingest` to load it.");
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
