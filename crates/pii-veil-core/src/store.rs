//! Anonymization record storage using SQLite
//!
//! Persists the [`AnonymizationRecord`]s of an anonymization call under a
//! generated document id so records-mode deanonymization can run in a later
//! process. Only coordinates, entity types and operator names are stored;
//! original values never reach the database.

use crate::anonymizer::AnonymizationRecord;
use crate::config::{StoreConfig, IN_MEMORY_DATABASE};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct RecordStore {
    conn: Connection,
    config: StoreConfig,
}

#[derive(Debug)]
pub struct StoreStatistics {
    pub total_documents: usize,
    pub total_records: usize,
    pub records_by_type: HashMap<String, usize>,
    pub oldest_document_age: Option<u64>,
}

fn now() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

impl RecordStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let conn = if config.database_path == Path::new(IN_MEMORY_DATABASE) {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.database_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(&config.database_path)
                .with_context(|| format!("Failed to open record store {:?}", config.database_path))?
        };

        let mut store = Self { conn, config };
        store.initialize_schema()?;
        store.cleanup_expired_documents()?;

        info!("Initialized record store at {:?}", store.config.database_path);
        Ok(store)
    }

    fn initialize_schema(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                record_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                document_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                entity_type TEXT NOT NULL,
                original_start INTEGER NOT NULL,
                original_end INTEGER NOT NULL,
                new_start INTEGER NOT NULL,
                new_end INTEGER NOT NULL,
                operator_applied TEXT NOT NULL,
                PRIMARY KEY (document_id, position)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_created_at
             ON documents(created_at)",
            [],
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Stores `records` as a new document and returns its id.
    pub fn save_records(&mut self, records: &[AnonymizationRecord]) -> Result<String> {
        let document_id = Uuid::new_v4().to_string();
        let created_at = now()?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO documents (id, record_count, created_at) VALUES (?1, ?2, ?3)",
            params![document_id, records.len() as i64, created_at as i64],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO records
                 (document_id, position, entity_type, original_start, original_end, new_start, new_end, operator_applied)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for (position, record) in records.iter().enumerate() {
                stmt.execute(params![
                    document_id,
                    position as i64,
                    record.entity_type,
                    record.original_start as i64,
                    record.original_end as i64,
                    record.new_start as i64,
                    record.new_end as i64,
                    record.operator_applied,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Stored {} records under document {}", records.len(), document_id);
        Ok(document_id)
    }

    /// Records of a document in their original order, or `None` if unknown.
    pub fn load_records(&self, document_id: &str) -> Result<Option<Vec<AnonymizationRecord>>> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT record_count FROM documents WHERE id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_none() {
            debug!("No stored document {}", document_id);
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT entity_type, original_start, original_end, new_start, new_end, operator_applied
             FROM records WHERE document_id = ?1 ORDER BY position",
        )?;

        let rows = stmt.query_map(params![document_id], |row| {
            Ok(AnonymizationRecord {
                entity_type: row.get(0)?,
                original_start: row.get::<_, i64>(1)? as usize,
                original_end: row.get::<_, i64>(2)? as usize,
                new_start: row.get::<_, i64>(3)? as usize,
                new_end: row.get::<_, i64>(4)? as usize,
                operator_applied: row.get(5)?,
            })
        })?;

        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Loaded {} records for document {}", records.len(), document_id);
        Ok(Some(records))
    }

    /// Returns whether the document existed.
    pub fn delete_records(&mut self, document_id: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM records WHERE document_id = ?1", params![document_id])?;
        let deleted = tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;
        tx.commit()?;

        debug!("Deleted document {} ({} rows)", document_id, deleted);
        Ok(deleted > 0)
    }

    pub fn cleanup_expired_documents(&mut self) -> Result<usize> {
        let Some(retention_days) = self.config.retention_days else {
            return Ok(0);
        };

        let cutoff_time = now()?.saturating_sub(retention_days as u64 * 24 * 60 * 60) as i64;

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM records WHERE document_id IN
             (SELECT id FROM documents WHERE created_at < ?1)",
            params![cutoff_time],
        )?;
        let deleted = tx.execute("DELETE FROM documents WHERE created_at < ?1", params![cutoff_time])?;
        tx.commit()?;

        if deleted > 0 {
            info!("Cleaned up {} documents older than {} days", deleted, retention_days);
        }
        Ok(deleted)
    }

    pub fn get_statistics(&self) -> Result<StoreStatistics> {
        let total_documents: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let total_records: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;

        let mut records_by_type = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT entity_type, COUNT(*) FROM records GROUP BY entity_type")?;

        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        for row in rows {
            let (entity_type, count) = row?;
            records_by_type.insert(entity_type, count as usize);
        }

        let oldest_document: Option<i64> = self
            .conn
            .query_row("SELECT MIN(created_at) FROM documents", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();

        let current = now()?;
        Ok(StoreStatistics {
            total_documents: total_documents as usize,
            total_records: total_records as usize,
            records_by_type,
            oldest_document_age: oldest_document.map(|created| current.saturating_sub(created as u64)),
        })
    }

    pub fn clear_all(&mut self) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        let deleted = tx.execute("DELETE FROM documents", [])?;
        tx.commit()?;

        warn!("Cleared all {} documents from record store", deleted);
        Ok(deleted)
    }
}
