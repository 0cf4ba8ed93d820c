use rusqlite::{Connection, Result};

/// Create the index tables on a fresh database file.
/// Idempotent, so it can be called on an existing file too.
pub fn initialize_database(conn: &Connection) -> Result<()> {
    // Single-row manifest describing the whole index
    conn.execute(
        "CREATE TABLE IF NOT EXISTS manifest (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model_id TEXT NOT NULL,
            model_version TEXT NOT NULL,
            dimension INTEGER NOT NULL,
            metric TEXT NOT NULL,
            entry_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Vectors as little-endian f32 blobs, in insertion order
    conn.execute(
        "CREATE TABLE IF NOT EXISTS vectors (
            position INTEGER PRIMARY KEY,
            chunk_id TEXT NOT NULL UNIQUE,
            vector BLOB NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entries (
            chunk_id TEXT PRIMARY KEY,
            document_hash TEXT NOT NULL,
            institution TEXT NOT NULL,
            category TEXT,
            title TEXT NOT NULL,
            section_title TEXT,
            source_url TEXT NOT NULL,
            published_at TEXT,
            fetched_at TEXT NOT NULL,
            text TEXT NOT NULL,
            char_start INTEGER NOT NULL,
            char_end INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_document ON entries(document_hash)",
        [],
    )?;

    Ok(())
}
