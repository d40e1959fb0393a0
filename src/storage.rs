//! SeaORM-backed document store: the concrete lookup collaborator the
//! binary wires into the evaluator. Documents live in a single table keyed
//! by slash-separated path, with the field map JSON-encoded.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use migration::MigratorTrait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{Database, DatabaseConnection, DbErr, EntityTrait, Set};

use crate::entities;
use crate::entities::document;
use crate::policy::errors::StoreError;
use crate::policy::store::DocumentStore;
use crate::policy::types::Snapshot;
use crate::settings::Database as DbCfg;

/// Connect and bring the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

pub struct DbStore {
    db: DatabaseConnection,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentStore for DbStore {
    async fn get(&self, path: &str) -> Result<Option<Snapshot>, StoreError> {
        let row = entities::Document::find_by_id(path)
            .one(&self.db)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let doc: Snapshot =
            serde_json::from_str(&row.data).map_err(|e| StoreError::Malformed {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(doc))
    }
}

/// Insert or replace a document. Used by seeding and tests; the evaluator
/// itself never writes.
pub async fn put_document(
    db: &DatabaseConnection,
    path: &str,
    doc: &Snapshot,
) -> Result<(), DbErr> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let model = document::ActiveModel {
        path: Set(path.to_string()),
        data: Set(serde_json::to_string(doc).expect("snapshot serializes")),
        updated_at: Set(now),
    };

    entities::Document::insert(model)
        .on_conflict(
            OnConflict::column(document::Column::Path)
                .update_columns([document::Column::Data, document::Column::UpdatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}
