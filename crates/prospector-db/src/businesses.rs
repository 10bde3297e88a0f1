//! Business rows produced by a session.

use crate::error::Result;
use chrono::Utc;
use prospector_core::{BusinessRecord, RecordId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

fn from_row(row: &SqliteRow) -> Result<BusinessRecord> {
    let id: String = row.try_get("id")?;
    Ok(BusinessRecord {
        id: RecordId::new(id).map_err(|e| crate::DatabaseError::Decode(e.to_string()))?,
        map_url: row.try_get("map_url")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        provider: row.try_get("provider")?,
        address: row.try_get("address")?,
        category: row.try_get("category")?,
        town: row.try_get("town")?,
        industry: row.try_get("industry")?,
        notes: row.try_get("notes")?,
    })
}

/// Insert the records of one town.
///
/// Rows whose `map_url` is already stored for the session are skipped.
/// Returns the number of rows actually inserted.
pub async fn insert_businesses(
    pool: &Pool<Sqlite>,
    session_id: &str,
    records: &[BusinessRecord],
) -> Result<u64> {
    let created_at = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for record in records {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO businesses (id, session_id, map_url, name, phone, provider, address, category, town, industry, notes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.as_str())
        .bind(session_id)
        .bind(&record.map_url)
        .bind(&record.name)
        .bind(&record.phone)
        .bind(&record.provider)
        .bind(&record.address)
        .bind(&record.category)
        .bind(&record.town)
        .bind(&record.industry)
        .bind(&record.notes)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    tracing::debug!(session_id, inserted, "business rows stored");
    Ok(inserted)
}

/// Write enrichment results back onto stored rows, matched by `map_url`.
pub async fn update_providers(
    pool: &Pool<Sqlite>,
    session_id: &str,
    records: &[BusinessRecord],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;

    for record in records {
        let Some(provider) = &record.provider else {
            continue;
        };
        let result =
            sqlx::query("UPDATE businesses SET provider = ? WHERE session_id = ? AND map_url = ?")
                .bind(provider)
                .bind(session_id)
                .bind(&record.map_url)
                .execute(&mut *tx)
                .await?;
        updated += result.rows_affected();
    }

    tx.commit().await?;
    Ok(updated)
}

/// All business rows of a session in insertion order.
pub async fn list_by_session(pool: &Pool<Sqlite>, session_id: &str) -> Result<Vec<BusinessRecord>> {
    let rows = sqlx::query(
        "SELECT id, map_url, name, phone, provider, address, category, town, industry, notes
         FROM businesses WHERE session_id = ? ORDER BY rowid",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

/// Number of business rows stored for a session.
pub async fn count_by_session(pool: &Pool<Sqlite>, session_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM businesses WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
