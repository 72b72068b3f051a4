//! Schema definition and versioning.
//!
//! There is no external migration framework: `init` lays down the schema
//! at `CURRENT_VERSION` in one go, and `upgrade` applies the ordered
//! statements in [`MIGRATIONS`] one version at a time. This mirrors how
//! the store crates this workspace is built from stand up their own
//! on-disk schemas rather than reach for a migrations crate.

use rusqlite::Connection;

use crate::MetaStoreError;

pub const CURRENT_VERSION: i64 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE schema_version (version INTEGER NOT NULL);

CREATE TABLE content_item (
    id            INTEGER PRIMARY KEY,
    sha256        TEXT NOT NULL UNIQUE,
    filename      TEXT NOT NULL,
    size_bytes    INTEGER NOT NULL,
    content_type  TEXT NOT NULL,
    name          TEXT NOT NULL,
    version       TEXT NOT NULL,
    metadata      TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL
);
CREATE INDEX idx_content_item_type_name ON content_item(content_type, name);
CREATE INDEX idx_content_item_type_name_version ON content_item(content_type, name, version);

CREATE TABLE repository (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    repo_type     TEXT NOT NULL,
    feed_url      TEXT NOT NULL,
    enabled       INTEGER NOT NULL DEFAULT 1,
    mode          TEXT NOT NULL DEFAULT 'filtered',
    last_sync_at  TEXT
);

CREATE TABLE repository_content (
    repository_id  TEXT NOT NULL REFERENCES repository(id) ON DELETE CASCADE,
    content_item_id INTEGER NOT NULL REFERENCES content_item(id) ON DELETE CASCADE,
    PRIMARY KEY (repository_id, content_item_id)
);

CREATE TABLE repository_file (
    id              INTEGER PRIMARY KEY,
    repository_id   TEXT NOT NULL REFERENCES repository(id) ON DELETE CASCADE,
    file_category   TEXT NOT NULL,
    file_type       TEXT NOT NULL,
    sha256          TEXT NOT NULL,
    size_bytes      INTEGER NOT NULL,
    original_path   TEXT NOT NULL,
    metadata        TEXT NOT NULL DEFAULT '{}',
    UNIQUE (repository_id, original_path)
);

CREATE TABLE snapshot (
    id                 INTEGER PRIMARY KEY,
    repository_id      TEXT NOT NULL REFERENCES repository(id) ON DELETE CASCADE,
    name               TEXT NOT NULL,
    description        TEXT,
    created_at         TEXT NOT NULL,
    package_count      INTEGER NOT NULL,
    total_size_bytes   INTEGER NOT NULL,
    UNIQUE (repository_id, name)
);

CREATE TABLE snapshot_content (
    snapshot_id      INTEGER NOT NULL REFERENCES snapshot(id) ON DELETE CASCADE,
    content_item_id  INTEGER NOT NULL REFERENCES content_item(id) ON DELETE CASCADE,
    PRIMARY KEY (snapshot_id, content_item_id)
);

CREATE TABLE view_snapshot (
    id                INTEGER PRIMARY KEY,
    view_name         TEXT NOT NULL,
    name              TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    package_count     INTEGER NOT NULL,
    total_size_bytes  INTEGER NOT NULL,
    UNIQUE (view_name, name)
);

CREATE TABLE view_snapshot_member (
    view_snapshot_id  INTEGER NOT NULL REFERENCES view_snapshot(id) ON DELETE CASCADE,
    position          INTEGER NOT NULL,
    repository_id     TEXT NOT NULL,
    snapshot_id       INTEGER NOT NULL REFERENCES snapshot(id) ON DELETE CASCADE,
    PRIMARY KEY (view_snapshot_id, position)
);

CREATE TABLE sync_run (
    id               INTEGER PRIMARY KEY,
    repository_id    TEXT NOT NULL REFERENCES repository(id) ON DELETE CASCADE,
    started_at       TEXT NOT NULL,
    completed_at     TEXT,
    status           TEXT NOT NULL DEFAULT 'running',
    downloaded       INTEGER NOT NULL DEFAULT 0,
    skipped          INTEGER NOT NULL DEFAULT 0,
    failed           INTEGER NOT NULL DEFAULT 0,
    bytes_transferred INTEGER NOT NULL DEFAULT 0,
    error_message    TEXT
);
"#;

/// Ordered `(from_version, statements)` pairs applied by `upgrade`.
/// Empty today: `init` always creates `CURRENT_VERSION` directly, so
/// there is nothing yet to migrate *from*.
const MIGRATIONS: &[(i64, &str)] = &[];

pub fn init(conn: &Connection) -> Result<(), MetaStoreError> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
        .ok();
    if version.is_some() {
        return Ok(());
    }
    conn.execute_batch(SCHEMA_V1)?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [CURRENT_VERSION])?;
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64, MetaStoreError> {
    Ok(conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))?)
}

pub fn upgrade(conn: &Connection) -> Result<i64, MetaStoreError> {
    let mut version = current_version(conn)?;
    for (from, stmts) in MIGRATIONS {
        if version == *from {
            conn.execute_batch(stmts)?;
            version += 1;
            conn.execute("UPDATE schema_version SET version = ?1", [version])?;
        }
    }
    Ok(version)
}
