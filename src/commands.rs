//! Named commands and their replies.
//!
//! A [`Message`] is what an outside caller (UI, message bus, the CLI) sends;
//! [`Handler::handle`] runs it against the configured context and returns a
//! [`Reply`]. Both are plain serde types so any transport can carry them.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::Factory;
use crate::destructive::{self, ProcessingFlag};
use crate::error::{Error, Result};
use crate::inspect::{self, DatabaseSummary};
use crate::snapshot::SnapshotEngine;
use crate::store::{MetadataStore, Snapshot, SnapshotSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Message {
    /// Capture a database and persist the snapshot
    Snapshot { db_name: String, db_version: u32 },
    /// Delete every record, keep the stores
    Clear {
        db_name: String,
        #[serde(default)]
        db_version: u32,
    },
    /// Drop the database
    Delete {
        db_name: String,
        #[serde(default)]
        db_version: u32,
    },
    RestoreSnapshot { snapshot: Snapshot },
    GetOrigin,
    SnapshotDelete { id: u64 },
    /// Load a persisted snapshot and restore it
    KickoffSnapshotRestore { id: u64 },
    ListDatabases,
    /// Snapshots of the current origin, newest first
    ListSnapshots,
    /// Remove every snapshot of the current origin
    SnapshotDeleteAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "kebab-case")]
pub enum Reply {
    Done,
    /// Id of a newly persisted snapshot
    Created(u64),
    /// Records cleared, written, or snapshots removed
    Count(u64),
    Origin(String),
    Databases(Vec<DatabaseSummary>),
    Snapshots(Vec<SnapshotSummary>),
}

/// Runs commands for one context (origin) against one data directory.
#[derive(Clone)]
pub struct Handler {
    factory: Factory,
    engine: SnapshotEngine,
    metadata: MetadataStore,
    origin: String,
    processing: ProcessingFlag,
}

impl Handler {
    pub fn new(config: &Config) -> Self {
        let origin = config.resolved_origin();
        let factory = Factory::owned_by(config.databases_dir(), origin.clone());
        Handler {
            engine: SnapshotEngine::new(factory.clone(), origin.clone()),
            metadata: MetadataStore::new(config.metadata_dir()),
            factory,
            origin,
            processing: ProcessingFlag::new(),
        }
    }

    /// Databases of this handler's context.
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Raised while a `delete` command is running.
    pub fn processing(&self) -> &ProcessingFlag {
        &self.processing
    }

    pub async fn handle(&self, message: Message) -> Result<Reply> {
        match message {
            Message::Snapshot { db_name, db_version } => {
                let snapshot = self.engine.capture(&db_name, db_version).await?;
                let id = self.metadata.add(&snapshot).await?;
                Ok(Reply::Created(id))
            }
            Message::Clear { db_name, .. } => match destructive::clear(&self.factory, &db_name).await {
                Ok(cleared) => {
                    tracing::info!(db = %db_name, records = cleared, "cleared");
                    Ok(Reply::Count(cleared))
                }
                Err(err) => {
                    tracing::error!(db = %db_name, error = %err, "clear failed");
                    Err(err)
                }
            },
            Message::Delete { db_name, .. } => {
                match destructive::delete(&self.factory, &db_name, &self.processing).await {
                    Ok(_) => Ok(Reply::Done),
                    Err(err) => {
                        tracing::error!(db = %db_name, error = %err, "delete failed");
                        Err(err)
                    }
                }
            }
            Message::RestoreSnapshot { snapshot } => {
                let written = self.engine.restore(&snapshot).await?;
                Ok(Reply::Count(written))
            }
            Message::GetOrigin => Ok(Reply::Origin(self.origin.clone())),
            Message::SnapshotDelete { id } => {
                self.metadata.delete(id).await?;
                Ok(Reply::Done)
            }
            Message::KickoffSnapshotRestore { id } => {
                let snapshot = self
                    .metadata
                    .get(id)
                    .await?
                    .ok_or(Error::SnapshotNotFound(id))?;
                let written = self.engine.restore(&snapshot).await?;
                Ok(Reply::Count(written))
            }
            Message::ListDatabases => Ok(Reply::Databases(inspect::list_all(&self.factory).await?)),
            Message::ListSnapshots => Ok(Reply::Snapshots(
                self.metadata.list_by_origin(&self.origin).await?,
            )),
            Message::SnapshotDeleteAll => Ok(Reply::Count(
                self.metadata.delete_all_by_origin(&self.origin).await?,
            )),
        }
    }

    /// Parses a JSON message, handles it, and serializes the reply.
    pub async fn handle_json(&self, text: &str) -> Result<String> {
        let message: Message = serde_json::from_str(text)?;
        let reply = self.handle(message).await?;
        Ok(serde_json::to_string(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_use_command_tag_and_camel_case_fields() {
        let message: Message =
            serde_json::from_value(json!({"command": "snapshot", "dbName": "shop", "dbVersion": 2}))
                .unwrap();
        assert_eq!(
            message,
            Message::Snapshot { db_name: "shop".into(), db_version: 2 }
        );

        let message: Message =
            serde_json::from_value(json!({"command": "kickoff-snapshot-restore", "id": 4})).unwrap();
        assert_eq!(message, Message::KickoffSnapshotRestore { id: 4 });

        let message: Message = serde_json::from_value(json!({"command": "get-origin"})).unwrap();
        assert_eq!(message, Message::GetOrigin);
    }

    #[test]
    fn db_version_is_optional_for_destructive_commands() {
        let message: Message =
            serde_json::from_value(json!({"command": "clear", "dbName": "shop"})).unwrap();
        assert_eq!(message, Message::Clear { db_name: "shop".into(), db_version: 0 });
    }

    #[test]
    fn unknown_command_is_rejected() {
        let parsed = serde_json::from_value::<Message>(json!({"command": "format-disk"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn replies_are_adjacently_tagged() {
        assert_eq!(serde_json::to_value(Reply::Created(3)).unwrap(), json!({"result": "created", "value": 3}));
        assert_eq!(serde_json::to_value(Reply::Done).unwrap(), json!({"result": "done"}));
    }
}
