//! SQLite backend for the vector store.

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard};

use super::embeddings::{bytes_to_embedding, embedding_to_bytes, rank_by_similarity};
use super::schema::{COLUMNS, SCHEMA};
use super::{RecordFilter, VectorStore};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{epoch_now, EmbeddingRecord};

/// Spacing between write stamps inside one batch, so a bounded `get_after`
/// page never splits a group of identical timestamps.
const BATCH_STAMP_STEP: f64 = 1e-6;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimension: usize,
    page_size: usize,
    batch_chunk: usize,
}

impl SqliteStore {
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = config.sqlite_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Connectivity(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(&config.sqlite_path)?;
        Self::with_connection(conn, config)
    }

    pub fn open_in_memory(config: &StoreConfig) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, config)
    }

    fn with_connection(conn: Connection, config: &StoreConfig) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension: config.dimension,
            page_size: config.page_size.max(1),
            batch_chunk: config.batch_chunk.max(1),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Connectivity(format!("connection lock poisoned: {e}")))
    }

    fn validate(&self, record: &EmbeddingRecord) -> StoreResult<()> {
        if record.id.is_empty() {
            return Err(StoreError::Validation("record id is empty".into()));
        }
        let embedding = record
            .embedding
            .as_ref()
            .ok_or_else(|| StoreError::Validation(format!("record {} has no embedding", record.id)))?;
        if embedding.len() != self.dimension {
            return Err(StoreError::Validation(format!(
                "record {} has {} dimensions, store expects {}",
                record.id,
                embedding.len(),
                self.dimension
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::Validation(format!("record {} has a non-finite component", record.id)));
        }
        if matches!(record.gender, Some(g) if g > 1) {
            return Err(StoreError::Validation(format!("record {} has gender outside 0/1", record.id)));
        }
        Ok(())
    }

    fn find_by_id(conn: &Connection, id: &str, with_vectors: bool) -> rusqlite::Result<Option<EmbeddingRecord>> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM face_embeddings WHERE id = ?"),
            [id],
            |row| row_to_record(row, with_vectors),
        )
        .optional()
    }
}

/// Aggregates never get a `created_at`; observations keep theirs or take
/// `stamp`. Only applies to new rows: [`upsert`] never changes a stored
/// `created_at`.
fn write_stamp(record: &EmbeddingRecord, stamp: f64) -> Option<f64> {
    if record.is_aggregate() {
        None
    } else {
        Some(record.created_at.unwrap_or(stamp))
    }
}

fn upsert(conn: &Connection, record: &EmbeddingRecord, created_at: Option<f64>) -> rusqlite::Result<()> {
    let embedding = record.embedding.as_deref().unwrap_or_default();
    conn.execute(
        r#"
        INSERT INTO face_embeddings
            (id, photo_id, photo_title, face_index, age, gender, file_name,
             embedding, embedding_dim, created_at, num_people, last_processed_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            photo_id = excluded.photo_id,
            photo_title = excluded.photo_title,
            face_index = excluded.face_index,
            age = excluded.age,
            gender = excluded.gender,
            file_name = excluded.file_name,
            embedding = excluded.embedding,
            embedding_dim = excluded.embedding_dim,
            created_at = COALESCE(face_embeddings.created_at, excluded.created_at),
            num_people = excluded.num_people,
            last_processed_at = excluded.last_processed_at,
            updated_at = excluded.updated_at
        "#,
        params![
            record.id,
            record.photo_id,
            record.photo_title,
            record.face_index,
            record.age,
            record.gender,
            record.file_name,
            embedding_to_bytes(embedding),
            embedding.len() as i64,
            created_at,
            record.num_people.map(|n| n as i64),
            record.last_processed_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

/// One chunk of a batch, in its own transaction. `first` is the chunk's
/// position in the batch and spaces out the write stamps.
fn write_chunk(conn: &mut Connection, chunk: &[EmbeddingRecord], base: f64, first: usize) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    for (i, record) in chunk.iter().enumerate() {
        let stamp = base + (first + i) as f64 * BATCH_STAMP_STEP;
        upsert(&tx, record, write_stamp(record, stamp))?;
    }
    tx.commit()
}

fn row_to_record(row: &Row<'_>, with_vectors: bool) -> rusqlite::Result<EmbeddingRecord> {
    let embedding = if with_vectors {
        let bytes: Vec<u8> = row.get(11)?;
        Some(bytes_to_embedding(&bytes))
    } else {
        None
    };

    Ok(EmbeddingRecord {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        photo_title: row.get(2)?,
        face_index: row.get(3)?,
        age: row.get(4)?,
        gender: row.get(5)?,
        file_name: row.get(6)?,
        created_at: row.get(7)?,
        num_people: row.get::<_, Option<i64>>(8)?.map(|n| n.max(0) as u64),
        last_processed_at: row.get(9)?,
        updated_at: row.get(10)?,
        embedding,
        score: None,
    })
}

impl VectorStore for SqliteStore {
    fn save(&self, record: &EmbeddingRecord) -> StoreResult<()> {
        self.validate(record)?;
        let conn = self.conn()?;
        upsert(&conn, record, write_stamp(record, epoch_now()))?;
        Ok(())
    }

    fn save_batch(&self, records: &[EmbeddingRecord]) -> StoreResult<()> {
        for record in records {
            self.validate(record)?;
        }

        let total = records.len();
        let base = epoch_now();
        let mut written = 0;
        let mut conn = self.conn()?;

        for chunk in records.chunks(self.batch_chunk) {
            if let Err(e) = write_chunk(&mut conn, chunk, base, written) {
                tracing::warn!(written, total, error = %e, "Batch upsert interrupted");
                return Err(StoreError::PartialBatch {
                    written,
                    total,
                    reason: e.to_string(),
                });
            }
            written += chunk.len();
        }

        tracing::debug!(total, "Batch upserted");
        Ok(())
    }

    fn get(&self, filter: &RecordFilter, with_vectors: bool) -> StoreResult<Vec<EmbeddingRecord>> {
        filter.validate()?;

        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let text_fields = [
            ("photo_id", &filter.photo_id),
            ("photo_title", &filter.photo_title),
            ("file_name", &filter.file_name),
        ];
        for (column, value) in text_fields {
            if let Some(v) = value {
                clauses.push(format!("{column} = ?"));
                values.push(Value::Text(v.clone()));
            }
        }
        if let Some(gender) = filter.gender {
            clauses.push("gender = ?".to_string());
            values.push(Value::Integer(gender as i64));
        }
        if let Some(face_index) = filter.face_index {
            clauses.push("face_index = ?".to_string());
            values.push(Value::Integer(face_index));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        values.push(Value::Integer(self.page_size as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM face_embeddings {where_clause} ORDER BY created_at, id LIMIT ?"
        ))?;
        let records = stmt
            .query_map(rusqlite::params_from_iter(values), |row| row_to_record(row, with_vectors))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn get_by_id(&self, id: &str, with_vectors: bool) -> StoreResult<Option<EmbeddingRecord>> {
        let conn = self.conn()?;
        Ok(Self::find_by_id(&conn, id, with_vectors)?)
    }

    fn get_after(&self, timestamp: f64, with_vectors: bool) -> StoreResult<Vec<EmbeddingRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {COLUMNS} FROM face_embeddings
            WHERE created_at > ?
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#
        ))?;
        let records = stmt
            .query_map(params![timestamp, self.page_size as i64], |row| {
                row_to_record(row, with_vectors)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn search_page(&self, id: &str, limit: usize, offset: usize) -> StoreResult<Vec<EmbeddingRecord>> {
        let conn = self.conn()?;
        let query = match Self::find_by_id(&conn, id, true)?.and_then(|r| r.embedding) {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };

        let mut stmt = conn.prepare("SELECT id, embedding FROM face_embeddings")?;
        let candidates = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok((row.get::<_, String>(0)?, bytes_to_embedding(&bytes)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut page = Vec::with_capacity(limit);
        for (candidate_id, score) in rank_by_similarity(&query, candidates)
            .into_iter()
            .skip(offset)
            .take(limit)
        {
            if let Some(mut record) = Self::find_by_id(&conn, &candidate_id, false)? {
                record.score = Some(score);
                page.push(record);
            }
        }
        Ok(page)
    }

    fn count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM face_embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
