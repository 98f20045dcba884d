use anyhow::Context;
use chrono::Utc;
use entities::kv_entries;
use migration::MigratorTrait;
use sea_orm::{ActiveValue::Set, Database, DatabaseConnection, EntityTrait, sea_query::OnConflict};

use super::{KeyValueStore, StoreError};

/// `KeyValueStore` backed by the `kv_entries` table.
#[derive(Clone, Debug)]
pub struct SqliteKvStore {
    db: DatabaseConnection,
}

impl SqliteKvStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connect and bring the schema up to date.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let db = Database::connect(connection_string)
            .await
            .with_context(|| "Failed to connect to database")?;

        migration::Migrator::up(&db, None)
            .await
            .with_context(|| "Failed to run database migrations")?;

        tracing::debug!("key-value store ready");
        Ok(Self::new(db))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for SqliteKvStore {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = kv_entries::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        Ok(row.map(|m| m.value))
    }

    #[tracing::instrument(level = "trace", skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let entry = kv_entries::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(Utc::now()),
        };
        kv_entries::Entity::insert(entry)
            .on_conflict(
                OnConflict::column(kv_entries::Column::Key)
                    .update_columns([kv_entries::Column::Value, kv_entries::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        kv_entries::Entity::delete_by_id(key.to_string())
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, SqliteKvStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("kv.sqlite").display());
        let store = SqliteKvStore::connect(&url).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_value() {
        let (_dir, store) = temp_store().await;
        store.set("app_access_token", "first").await.unwrap();
        store.set("app_access_token", "second").await.unwrap();
        assert_eq!(
            store.get("app_access_token").await.unwrap().as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn remove_deletes_only_that_key() {
        let (_dir, store) = temp_store().await;
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn values_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("kv.sqlite").display());
        {
            let store = SqliteKvStore::connect(&url).await.unwrap();
            store.set("ebook_reading_progress", "{}").await.unwrap();
        }
        let store = SqliteKvStore::connect(&url).await.unwrap();
        assert_eq!(
            store.get("ebook_reading_progress").await.unwrap().as_deref(),
            Some("{}")
        );
    }
}
