use rusqlite::{Connection, Result};
use tracing::{debug, info};

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    debug!("Initializing repograph schema v{}", SCHEMA_VERSION);

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    debug!("Current schema version: {}", current_version);

    if current_version < SCHEMA_VERSION {
        info!("Upgrading schema from v{} to v{}", current_version, SCHEMA_VERSION);
        apply_migrations(conn, current_version)?;
    }

    Ok(())
}

/// Apply migrations from current version to latest
fn apply_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration v{}", version);
        if version == 1 {
            create_v1_schema(conn)?;
        }

        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }

    Ok(())
}

fn create_v1_schema(conn: &Connection) -> Result<()> {
    // One row per indexed repository
    conn.execute(
        "CREATE TABLE IF NOT EXISTS repos (
            repo_id TEXT PRIMARY KEY,
            repo_url TEXT NOT NULL,
            branch TEXT,
            framework TEXT,
            file_count INTEGER NOT NULL DEFAULT 0,
            node_count INTEGER NOT NULL DEFAULT 0,
            link_count INTEGER NOT NULL DEFAULT 0,
            snippet_count INTEGER NOT NULL DEFAULT 0,
            languages TEXT NOT NULL DEFAULT '[]',
            indexed_at TEXT,
            last_job_id TEXT
        )",
        [],
    )?;

    // Graph nodes; `attrs` holds the label-specific fields as JSON
    conn.execute(
        "CREATE TABLE IF NOT EXISTS graph_nodes (
            repo_id TEXT NOT NULL,
            id TEXT NOT NULL,
            label TEXT NOT NULL,
            name TEXT NOT NULL,
            file TEXT NOT NULL,
            start_line INTEGER,
            end_line INTEGER,
            attrs TEXT NOT NULL,
            PRIMARY KEY (repo_id, id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_graph_nodes_file
         ON graph_nodes(repo_id, file)",
        [],
    )?;

    // Graph links, owned by the file whose parse produced them
    conn.execute(
        "CREATE TABLE IF NOT EXISTS graph_links (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id TEXT NOT NULL,
            source TEXT NOT NULL,
            target TEXT NOT NULL,
            type TEXT NOT NULL,
            weight INTEGER,
            line INTEGER,
            symbols TEXT,
            origin TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_graph_links_origin
         ON graph_links(repo_id, origin)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_graph_links_source
         ON graph_links(repo_id, source)",
        [],
    )?;

    // Embeddable snippets; embedding is little-endian f32
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snippets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id TEXT NOT NULL,
            name TEXT NOT NULL,
            file TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            code TEXT NOT NULL,
            embedding BLOB
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snippets_file
         ON snippets(repo_id, file)",
        [],
    )?;

    info!("v1 schema created");

    Ok(())
}

/// Drop all tables (for rebuilding)
pub fn drop_schema(conn: &Connection) -> Result<()> {
    info!("Dropping all schema tables");

    conn.execute("DROP TABLE IF EXISTS snippets", [])?;
    conn.execute("DROP TABLE IF EXISTS graph_links", [])?;
    conn.execute("DROP TABLE IF EXISTS graph_nodes", [])?;
    conn.execute("DROP TABLE IF EXISTS repos", [])?;
    conn.execute("DROP TABLE IF EXISTS schema_version", [])?;

    Ok(())
}
