use serde::{Deserialize, Serialize};

use crate::db::{Factory, Mode};
use crate::error::Result;

/// One object store of one database, as seen at inspection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSummary {
    pub db_name: String,
    pub db_version: u32,
    pub store: String,
    /// Comma-joined index names, empty when the store has none
    pub indexes: String,
    pub count: u64,
}

/// One row per object store of every database in the context, ordered by
/// database name then store name. Read-only.
pub async fn list_all(factory: &Factory) -> Result<Vec<DatabaseSummary>> {
    let mut rows = Vec::new();

    for info in factory.databases().await? {
        let db = factory.open(&info.name).await?;
        for name in db.object_store_names() {
            let tx = db.transaction(&[name], Mode::ReadOnly).await?;
            let store = tx.object_store(name)?;
            let count = store.count(None).await?;
            let indexes = store.index_names().join(",");
            tx.commit().await?;

            rows.push(DatabaseSummary {
                db_name: db.name().to_string(),
                db_version: db.version(),
                store: name.clone(),
                indexes,
                count,
            });
        }
    }

    tracing::debug!(rows = rows.len(), "inspected databases");
    Ok(rows)
}
