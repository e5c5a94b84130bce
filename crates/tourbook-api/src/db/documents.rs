//! Document persistence operations.
//!
//! All functions take a `&PgPool` and operate on the `documents` table.
//! Field rules and uniqueness are enforced by the application layer before
//! anything reaches SQL.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use tourbook_core::{BookingRecord, ReviewRecord, TourRecord, UserRecord};
use uuid::Uuid;

/// A record stored as one JSON document.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name in the `documents` table.
    const COLLECTION: &'static str;

    /// Primary key.
    fn id(&self) -> Uuid;
}

impl Document for UserRecord {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for TourRecord {
    const COLLECTION: &'static str = "tours";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for ReviewRecord {
    const COLLECTION: &'static str = "reviews";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for BookingRecord {
    const COLLECTION: &'static str = "bookings";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Insert or replace a document.
pub async fn upsert<D: Document>(pool: &PgPool, doc: &D) -> Result<(), sqlx::Error> {
    let body = serde_json::to_value(doc).map_err(|e| {
        sqlx::Error::Protocol(format!("failed to serialize {} document: {e}", D::COLLECTION))
    })?;

    sqlx::query(
        "INSERT INTO documents (collection, id, body, updated_at)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (collection, id) DO UPDATE SET body = EXCLUDED.body, updated_at = now()",
    )
    .bind(D::COLLECTION)
    .bind(doc.id())
    .bind(&body)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a document. Returns whether a row was removed.
pub async fn delete<D: Document>(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
        .bind(D::COLLECTION)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Load every document of a collection, oldest write first.
pub async fn load_all<D: Document>(pool: &PgPool) -> Result<Vec<D>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM documents WHERE collection = $1 ORDER BY updated_at",
    )
    .bind(D::COLLECTION)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(body,)| {
            serde_json::from_value(body).map_err(|e| {
                sqlx::Error::Protocol(format!(
                    "failed to deserialize {} document: {e}",
                    D::COLLECTION
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_distinct() {
        let names = [
            UserRecord::COLLECTION,
            TourRecord::COLLECTION,
            ReviewRecord::COLLECTION,
            BookingRecord::COLLECTION,
        ];
        let mut sorted = names.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
