use crate::application::repositories::{IndexRepository, StorageError, StorageResult};
use crate::config::IndexConfig;
use crate::domain::aggregates::{IndexManifest, VectorIndex};
use crate::domain::base::DomainError;
use crate::domain::entities::{EmbeddingRecord, EntryMetadata, IndexEntry};
use crate::domain::value_objects::{
    ChunkId, ContentHash, EmbeddingVector, Institution, ModelIdentity, SimilarityMetric, SourceUrl,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

fn corrupt(reason: impl Into<String>) -> StorageError {
    StorageError::Domain(DomainError::IndexCorrupt(reason.into()))
}

/// SQLite-file implementation of [`IndexRepository`].
///
/// Each persist writes a complete new database next to the target and renames
/// it into place, so the file at `path` is always a finished index.
#[derive(Debug, Clone)]
pub struct SqliteIndexRepository {
    path: PathBuf,
}

impl SqliteIndexRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteIndexRepository { path: path.into() }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
    }

    fn write_all(tx: &Transaction<'_>, index: &VectorIndex) -> rusqlite::Result<()> {
        let manifest = index.manifest();
        tx.execute(
            "INSERT INTO manifest (id, model_id, model_version, dimension, metric, entry_count, created_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                manifest.model.id(),
                manifest.model.version(),
                manifest.dimension as i64,
                manifest.metric.as_str(),
                manifest.entry_count as i64,
                manifest.created_at.to_rfc3339(),
            ],
        )?;

        let mut insert_vector =
            tx.prepare("INSERT INTO vectors (position, chunk_id, vector) VALUES (?1, ?2, ?3)")?;
        let mut insert_entry = tx.prepare(
            "INSERT INTO entries (chunk_id, document_hash, institution, category, title, section_title,
                                  source_url, published_at, fetched_at, text, char_start, char_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;

        for (position, entry) in index.entries().iter().enumerate() {
            let meta = &entry.metadata;
            insert_vector.execute(params![
                position as i64,
                entry.chunk_id().as_str(),
                encode_vector(entry.record.vector.dimensions()),
            ])?;
            insert_entry.execute(params![
                entry.chunk_id().as_str(),
                meta.document_hash.as_str(),
                meta.institution.as_str(),
                meta.category,
                meta.title,
                meta.section_title,
                meta.source_url.as_str(),
                meta.published_at.map(|d| d.format("%Y-%m-%d").to_string()),
                meta.fetched_at.to_rfc3339(),
                meta.text,
                meta.char_start as i64,
                meta.char_end as i64,
            ])?;
        }

        Ok(())
    }

    fn read_manifest(conn: &Connection) -> StorageResult<IndexManifest> {
        let row = conn
            .query_row(
                "SELECT model_id, model_version, dimension, metric, entry_count, created_at
                 FROM manifest WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| corrupt(format!("manifest unreadable: {}", e)))?
            .ok_or_else(|| corrupt("manifest is missing"))?;

        let (model_id, model_version, dimension, metric, entry_count, created_at) = row;
        let model = ModelIdentity::new(model_id, model_version)
            .map_err(|e| corrupt(format!("manifest model: {}", e)))?;
        let metric: SimilarityMetric = metric
            .parse()
            .map_err(|_| corrupt(format!("unknown metric '{}'", metric)))?;
        let dimension = usize::try_from(dimension)
            .map_err(|_| corrupt(format!("negative dimension {}", dimension)))?;
        let entry_count = usize::try_from(entry_count)
            .map_err(|_| corrupt(format!("negative entry count {}", entry_count)))?;
        let created_at = parse_timestamp(&created_at)?;

        Ok(IndexManifest {
            model,
            dimension,
            metric,
            entry_count,
            created_at,
        })
    }

    fn read_entries(conn: &Connection, manifest: &IndexManifest) -> StorageResult<Vec<IndexEntry>> {
        let mut stmt = conn.prepare(
            "SELECT v.chunk_id, v.vector, e.chunk_id, e.document_hash, e.institution, e.category,
                    e.title, e.section_title, e.source_url, e.published_at, e.fetched_at, e.text,
                    e.char_start, e.char_end
             FROM vectors v LEFT JOIN entries e ON e.chunk_id = v.chunk_id
             ORDER BY v.position",
        )?;

        let rows = stmt.query_map([], StoredRow::from_row)?;
        let mut entries = Vec::with_capacity(manifest.entry_count);
        for row in rows {
            entries.push(row?.into_entry(manifest)?);
        }
        Ok(entries)
    }
}

impl IndexRepository for SqliteIndexRepository {
    fn persist(&self, index: &VectorIndex) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        let written = (|| -> StorageResult<()> {
            let mut conn = Connection::open(&temp)?;
            super::schema::initialize_database(&conn)?;
            let tx = conn.transaction()?;
            Self::write_all(&tx, index)?;
            tx.commit()?;
            conn.close().map_err(|(_, e)| StorageError::from(e))?;
            std::fs::rename(&temp, &self.path)?;
            Ok(())
        })();

        if let Err(e) = written {
            warn!("Persisting index to {} failed: {}", self.path.display(), e);
            if temp.exists() {
                std::fs::remove_file(&temp).ok();
            }
            return Err(e);
        }

        info!(
            "Persisted {} entries to {}",
            index.len(),
            self.path.display()
        );
        Ok(())
    }

    fn load(&self, expected: &ModelIdentity) -> StorageResult<VectorIndex> {
        if !self.exists() {
            return Err(StorageError::NotFound(self.path.display().to_string()));
        }

        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let manifest = Self::read_manifest(&conn)?;
        manifest.model.ensure_matches(expected).map_err(|_| {
            StorageError::Domain(DomainError::ModelMismatch {
                expected: expected.to_string(),
                found: manifest.model.to_string(),
            })
        })?;

        let count = |table: &str| -> StorageResult<usize> {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .map_err(|e| corrupt(format!("{} table unreadable: {}", table, e)))?;
            Ok(n as usize)
        };
        let vectors = count("vectors")?;
        let entries = count("entries")?;
        if vectors != manifest.entry_count || entries != manifest.entry_count {
            return Err(corrupt(format!(
                "manifest declares {} entries, found {} vectors and {} metadata rows",
                manifest.entry_count, vectors, entries
            )));
        }

        let stored = Self::read_entries(&conn, &manifest)?;
        debug!("Read {} entries from {}", stored.len(), self.path.display());

        let index = VectorIndex::restore(manifest, stored)?;
        info!(
            "Loaded index of {} entries ({}) from {}",
            index.len(),
            index.model(),
            self.path.display()
        );
        Ok(index)
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// One joined vectors/entries row before validation
struct StoredRow {
    chunk_id: String,
    vector: Vec<u8>,
    entry_chunk_id: Option<String>,
    document_hash: Option<String>,
    institution: Option<String>,
    category: Option<String>,
    title: Option<String>,
    section_title: Option<String>,
    source_url: Option<String>,
    published_at: Option<String>,
    fetched_at: Option<String>,
    text: Option<String>,
    char_start: Option<i64>,
    char_end: Option<i64>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredRow {
            chunk_id: row.get(0)?,
            vector: row.get(1)?,
            entry_chunk_id: row.get(2)?,
            document_hash: row.get(3)?,
            institution: row.get(4)?,
            category: row.get(5)?,
            title: row.get(6)?,
            section_title: row.get(7)?,
            source_url: row.get(8)?,
            published_at: row.get(9)?,
            fetched_at: row.get(10)?,
            text: row.get(11)?,
            char_start: row.get(12)?,
            char_end: row.get(13)?,
        })
    }

    fn into_entry(self, manifest: &IndexManifest) -> StorageResult<IndexEntry> {
        let chunk_label = self.chunk_id.clone();
        let missing = |field: &str| corrupt(format!("chunk {}: missing {}", chunk_label, field));

        if self.entry_chunk_id.is_none() {
            return Err(corrupt(format!("chunk {} has no metadata row", self.chunk_id)));
        }

        let values = decode_vector(&self.vector, manifest.dimension)
            .ok_or_else(|| {
                corrupt(format!(
                    "chunk {}: vector blob of {} bytes, expected {}",
                    chunk_label,
                    self.vector.len(),
                    manifest.dimension * 4
                ))
            })?;
        let vector = EmbeddingVector::new(values)
            .map_err(|e| corrupt(format!("chunk {}: {}", chunk_label, e)))?;
        let chunk_id =
            ChunkId::new(self.chunk_id).map_err(|e| corrupt(e.to_string()))?;

        let document_hash = ContentHash::from_hex(self.document_hash.ok_or_else(|| missing("document_hash"))?)
            .map_err(|e| corrupt(e.to_string()))?;
        let institution = Institution::new(self.institution.ok_or_else(|| missing("institution"))?)
            .map_err(|e| corrupt(e.to_string()))?;
        let source_url = SourceUrl::new(self.source_url.ok_or_else(|| missing("source_url"))?)
            .map_err(|e| corrupt(e.to_string()))?;
        let published_at = self
            .published_at
            .map(|d| {
                NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|e| corrupt(format!("chunk {}: published_at {}", chunk_label, e)))
            })
            .transpose()?;
        let fetched_at = parse_timestamp(&self.fetched_at.ok_or_else(|| missing("fetched_at"))?)?;
        let char_start = self.char_start.ok_or_else(|| missing("char_start"))?;
        let char_end = self.char_end.ok_or_else(|| missing("char_end"))?;

        Ok(IndexEntry {
            record: EmbeddingRecord {
                chunk_id,
                vector,
                model: manifest.model.clone(),
            },
            metadata: EntryMetadata {
                document_hash,
                institution,
                category: self.category,
                title: self.title.ok_or_else(|| missing("title"))?,
                section_title: self.section_title,
                source_url,
                published_at,
                fetched_at,
                text: self.text.ok_or_else(|| missing("text"))?,
                char_start: char_start.max(0) as usize,
                char_end: char_end.max(0) as usize,
            },
        })
    }
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
