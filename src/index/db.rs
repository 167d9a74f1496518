use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::schema::init_schema;
use super::CodeSnippet;
use crate::error::{Error, Result};
use crate::graph::{FileGraph, GraphData, GraphLink, GraphNode, GraphView, LinkType, NodeKind};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Repository metadata kept alongside its graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub repo_id: String,
    pub repo_url: String,
    pub branch: Option<String>,
    pub framework: Option<String>,
    pub file_count: usize,
    pub node_count: usize,
    pub link_count: usize,
    pub snippet_count: usize,
    pub languages: Vec<String>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub last_job_id: Option<String>,
}

/// Snippet row with its storage id, as handed to the embedder
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnippet {
    pub id: i64,
    pub snippet: CodeSnippet,
}

/// Database-wide counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub repos: usize,
    pub nodes: usize,
    pub links: usize,
    pub snippets: usize,
    pub embedded_snippets: usize,
}

/// Graph, snippet and repository storage over a pooled SQLite file
#[derive(Clone)]
pub struct GraphDatabase {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl GraphDatabase {
    /// Create or open a database
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening database at: {}", db_path.display());

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // WAL lets the HTTP handlers read while a job writes
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        {
            let conn = pool.get()?;
            init_schema(&conn)?;
        }

        Ok(Self { pool, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Drop every node and link of the repository and store `graphs` instead
    pub fn replace_graph(&self, repo_id: &str, graphs: &[FileGraph]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM graph_links WHERE repo_id = ?1", [repo_id])?;
        tx.execute("DELETE FROM graph_nodes WHERE repo_id = ?1", [repo_id])?;
        for graph in graphs {
            insert_file_graph(&tx, repo_id, graph)?;
        }
        tx.commit()?;
        debug!("Stored full graph for {} ({} files)", repo_id, graphs.len());
        Ok(())
    }

    /// Replace the rows owned by each changed file; rows of other files are untouched.
    ///
    /// `removed` lists changed files that no longer exist: their rows are deleted
    /// and nothing is inserted for them.
    pub fn merge_files(&self, repo_id: &str, graphs: &[FileGraph], removed: &[String]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let changed = graphs.iter().map(|g| g.file.as_str()).chain(removed.iter().map(String::as_str));
        for file in changed {
            tx.execute("DELETE FROM graph_links WHERE repo_id = ?1 AND origin = ?2", params![repo_id, file])?;
            tx.execute("DELETE FROM graph_nodes WHERE repo_id = ?1 AND file = ?2", params![repo_id, file])?;
        }
        for graph in graphs {
            insert_file_graph(&tx, repo_id, graph)?;
        }
        tx.commit()?;
        debug!(
            "Merged {} changed and {} removed files into {}",
            graphs.len(),
            removed.len(),
            repo_id
        );
        Ok(())
    }

    pub fn load_nodes(&self, repo_id: &str) -> Result<Vec<GraphNode>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, file, start_line, end_line, attrs
             FROM graph_nodes WHERE repo_id = ?1 ORDER BY file, rowid",
        )?;
        let nodes = stmt
            .query_map([repo_id], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    pub fn load_links(&self, repo_id: &str) -> Result<Vec<GraphLink>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT source, target, type, weight, line, symbols, origin
             FROM graph_links WHERE repo_id = ?1 ORDER BY seq",
        )?;
        let links = stmt
            .query_map([repo_id], row_to_link)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    pub fn load_graph(&self, repo_id: &str) -> Result<(Vec<GraphNode>, Vec<GraphLink>)> {
        Ok((self.load_nodes(repo_id)?, self.load_links(repo_id)?))
    }

    /// The repository graph in the requested view; unknown repositories are `NotFound`
    pub fn graph_view(&self, repo_id: &str, view: GraphView) -> Result<GraphData> {
        if self.get_repo(repo_id)?.is_none() {
            return Err(Error::NotFound(format!("repository {}", repo_id)));
        }
        let (nodes, links) = self.load_graph(repo_id)?;
        Ok(GraphData::view(nodes, links, view))
    }

    /// Paths of every file node stored for the repository
    pub fn repo_files(&self, repo_id: &str) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT file FROM graph_nodes WHERE repo_id = ?1 AND label = 'File' ORDER BY file")?;
        let files = stmt
            .query_map([repo_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(files)
    }

    /// Distinct languages of the repository's file nodes, sorted
    pub fn repo_languages(&self, repo_id: &str) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT json_extract(attrs, '$.language') AS language
             FROM graph_nodes
             WHERE repo_id = ?1 AND label = 'File' AND json_extract(attrs, '$.language') IS NOT NULL
             ORDER BY language",
        )?;
        let languages = stmt
            .query_map([repo_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(languages)
    }

    pub fn replace_snippets(&self, repo_id: &str, snippets: &[CodeSnippet]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM snippets WHERE repo_id = ?1", [repo_id])?;
        insert_snippets(&tx, repo_id, snippets)?;
        tx.commit()?;
        Ok(())
    }

    /// Snippets (and their embeddings) of `files` are replaced by `snippets`
    pub fn merge_snippets(&self, repo_id: &str, files: &[String], snippets: &[CodeSnippet]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for file in files {
            tx.execute("DELETE FROM snippets WHERE repo_id = ?1 AND file = ?2", params![repo_id, file])?;
        }
        insert_snippets(&tx, repo_id, snippets)?;
        tx.commit()?;
        Ok(())
    }

    pub fn snippets_without_embedding(&self, repo_id: &str, limit: usize) -> Result<Vec<StoredSnippet>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, code, file, start_line, end_line FROM snippets
             WHERE repo_id = ?1 AND embedding IS NULL ORDER BY id LIMIT ?2",
        )?;
        let snippets = stmt
            .query_map(params![repo_id, limit as i64], |row| {
                Ok(StoredSnippet {
                    id: row.get(0)?,
                    snippet: row_to_snippet(row, 1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(snippets)
    }

    pub fn store_embedding(&self, snippet_id: i64, embedding: &[f32]) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE snippets SET embedding = ?1 WHERE id = ?2",
            params![embedding_to_blob(embedding), snippet_id],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, snippet_id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.get_conn()?;
        let blob: Option<Option<Vec<u8>>> = conn
            .query_row("SELECT embedding FROM snippets WHERE id = ?1", [snippet_id], |row| row.get(0))
            .optional()?;
        Ok(blob.flatten().map(|b| blob_to_embedding(&b)))
    }

    pub fn snippets_for_files(&self, repo_id: &str, files: &[String]) -> Result<Vec<CodeSnippet>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, code, file, start_line, end_line FROM snippets
             WHERE repo_id = ?1 AND file = ?2 ORDER BY start_line",
        )?;
        let mut snippets = Vec::new();
        for file in files {
            let rows = stmt.query_map(params![repo_id, file], |row| row_to_snippet(row, 0))?;
            for row in rows {
                snippets.push(row?);
            }
        }
        Ok(snippets)
    }

    /// Graph, snippets, embeddings and metadata of one repository
    pub fn delete_repo(&self, repo_id: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM graph_links WHERE repo_id = ?1", [repo_id])?;
        tx.execute("DELETE FROM graph_nodes WHERE repo_id = ?1", [repo_id])?;
        tx.execute("DELETE FROM snippets WHERE repo_id = ?1", [repo_id])?;
        tx.execute("DELETE FROM repos WHERE repo_id = ?1", [repo_id])?;
        tx.commit()?;
        info!("Deleted repository {}", repo_id);
        Ok(())
    }

    pub fn upsert_repo(&self, info: &RepoInfo) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO repos (
                repo_id, repo_url, branch, framework, file_count, node_count, link_count,
                snippet_count, languages, indexed_at, last_job_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                info.repo_id,
                info.repo_url,
                info.branch,
                info.framework,
                info.file_count as i64,
                info.node_count as i64,
                info.link_count as i64,
                info.snippet_count as i64,
                serde_json::to_string(&info.languages)?,
                info.indexed_at.map(|t| t.to_rfc3339()),
                info.last_job_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_repo(&self, repo_id: &str) -> Result<Option<RepoInfo>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT repo_id, repo_url, branch, framework, file_count, node_count, link_count,
                    snippet_count, languages, indexed_at, last_job_id
             FROM repos WHERE repo_id = ?1",
        )?;
        Ok(stmt.query_row([repo_id], row_to_repo).optional()?)
    }

    pub fn list_repos(&self) -> Result<Vec<RepoInfo>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT repo_id, repo_url, branch, framework, file_count, node_count, link_count,
                    snippet_count, languages, indexed_at, last_job_id
             FROM repos ORDER BY repo_url",
        )?;
        let repos = stmt
            .query_map([], row_to_repo)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    /// Current node, link and snippet counts of one repository
    pub fn repo_counts(&self, repo_id: &str) -> Result<(usize, usize, usize)> {
        let conn = self.get_conn()?;
        let count = |sql: &str| -> rusqlite::Result<usize> {
            conn.query_row(sql, [repo_id], |row| row.get::<_, i64>(0)).map(|n| n as usize)
        };
        Ok((
            count("SELECT COUNT(*) FROM graph_nodes WHERE repo_id = ?1")?,
            count("SELECT COUNT(*) FROM graph_links WHERE repo_id = ?1")?,
            count("SELECT COUNT(*) FROM snippets WHERE repo_id = ?1")?,
        ))
    }

    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.get_conn()?;
        let count = |sql: &str| -> rusqlite::Result<usize> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0)).map(|n| n as usize)
        };
        Ok(StorageStats {
            repos: count("SELECT COUNT(*) FROM repos")?,
            nodes: count("SELECT COUNT(*) FROM graph_nodes")?,
            links: count("SELECT COUNT(*) FROM graph_links")?,
            snippets: count("SELECT COUNT(*) FROM snippets")?,
            embedded_snippets: count("SELECT COUNT(*) FROM snippets WHERE embedding IS NOT NULL")?,
        })
    }
}

fn insert_file_graph(conn: &Connection, repo_id: &str, graph: &FileGraph) -> Result<()> {
    let mut node_stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO graph_nodes (repo_id, id, label, name, file, start_line, end_line, attrs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for node in &graph.nodes {
        node_stmt.execute(params![
            repo_id,
            node.id,
            node.kind.label(),
            node.name,
            node.file,
            node.start_line.map(|l| l as i64),
            node.end_line.map(|l| l as i64),
            serde_json::to_string(&node.kind)?,
        ])?;
    }

    let mut link_stmt = conn.prepare_cached(
        "INSERT INTO graph_links (repo_id, source, target, type, weight, line, symbols, origin)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for link in &graph.links {
        let symbols = link.symbols.as_ref().map(serde_json::to_string).transpose()?;
        link_stmt.execute(params![
            repo_id,
            link.source,
            link.target,
            link.link_type.as_str(),
            link.weight,
            link.line.map(|l| l as i64),
            symbols,
            graph.file,
        ])?;
    }
    Ok(())
}

fn insert_snippets(conn: &Connection, repo_id: &str, snippets: &[CodeSnippet]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO snippets (repo_id, name, file, start_line, end_line, code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for snippet in snippets {
        stmt.execute(params![
            repo_id,
            snippet.name,
            snippet.file,
            snippet.start_line as i64,
            snippet.end_line as i64,
            snippet.code,
        ])?;
    }
    Ok(())
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_node(row: &Row) -> rusqlite::Result<GraphNode> {
    let kind: NodeKind = json_column(row, 5)?;
    Ok(GraphNode {
        id: row.get(0)?,
        name: row.get(1)?,
        file: row.get(2)?,
        start_line: row.get::<_, Option<i64>>(3)?.map(|l| l as usize),
        end_line: row.get::<_, Option<i64>>(4)?.map(|l| l as usize),
        kind,
        connection_count: 0,
    })
}

fn row_to_link(row: &Row) -> rusqlite::Result<GraphLink> {
    let type_str: String = row.get(2)?;
    let link_type = LinkType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, format!("unknown link type {}", type_str).into())
    })?;
    let symbols = match row.get::<_, Option<String>>(5)? {
        Some(_) => Some(json_column(row, 5)?),
        None => None,
    };
    Ok(GraphLink {
        source: row.get(0)?,
        target: row.get(1)?,
        link_type,
        weight: row.get(3)?,
        line: row.get::<_, Option<i64>>(4)?.map(|l| l as usize),
        symbols,
        origin: row.get(6)?,
    })
}

/// Reads name, code, file, start_line, end_line starting at column `first`
fn row_to_snippet(row: &Row, first: usize) -> rusqlite::Result<CodeSnippet> {
    Ok(CodeSnippet {
        name: row.get(first)?,
        code: row.get(first + 1)?,
        file: row.get(first + 2)?,
        start_line: row.get::<_, i64>(first + 3)? as usize,
        end_line: row.get::<_, i64>(first + 4)? as usize,
    })
}

fn row_to_repo(row: &Row) -> rusqlite::Result<RepoInfo> {
    let indexed_at = row
        .get::<_, Option<String>>(9)?
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc));
    Ok(RepoInfo {
        repo_id: row.get(0)?,
        repo_url: row.get(1)?,
        branch: row.get(2)?,
        framework: row.get(3)?,
        file_count: row.get::<_, i64>(4)? as usize,
        node_count: row.get::<_, i64>(5)? as usize,
        link_count: row.get::<_, i64>(6)? as usize,
        snippet_count: row.get::<_, i64>(7)? as usize,
        languages: json_column(row, 8)?,
        indexed_at,
        last_job_id: row.get(10)?,
    })
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Files whose nodes are linked to or from any of `files`, excluding `files` themselves
pub fn neighbour_files(nodes: &[GraphNode], links: &[GraphLink], files: &[String]) -> Vec<String> {
    let wanted: HashSet<&str> = files.iter().map(String::as_str).collect();
    let owner: HashMap<&str, &str> = nodes.iter().map(|n| (n.id.as_str(), n.file.as_str())).collect();

    let mut neighbours: Vec<String> = Vec::new();
    for link in links {
        let (Some(src), Some(dst)) = (owner.get(link.source.as_str()), owner.get(link.target.as_str())) else {
            continue;
        };
        let other: &str = match (wanted.contains(src), wanted.contains(dst)) {
            (true, false) => dst,
            (false, true) => src,
            _ => continue,
        };
        if !neighbours.iter().any(|n| n == other) {
            neighbours.push(other.to_string());
        }
    }
    neighbours.sort();
    neighbours
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphAssembler;
    use crate::index::{FunctionInfo, ParsedFile};
    use tempfile::tempdir;

    fn parsed(path: &str, functions: &[(&str, &str)]) -> ParsedFile {
        let mut file = ParsedFile::empty(path, "python");
        for (idx, (name, body)) in functions.iter().enumerate() {
            file.functions.push(FunctionInfo {
                name: name.to_string(),
                body: body.to_string(),
                start_line: idx * 10 + 1,
                end_line: idx * 10 + 2,
                ..Default::default()
            });
        }
        file
    }

    fn repo() -> Vec<ParsedFile> {
        vec![
            parsed("a.py", &[("load", "def load():\n    return parse()")]),
            parsed("b.py", &[("parse", "def parse():\n    return 1")]),
        ]
    }

    fn rows_of(db: &GraphDatabase, repo_id: &str, file: &str) -> (Vec<GraphNode>, Vec<GraphLink>) {
        let (nodes, links) = db.load_graph(repo_id).unwrap();
        (
            nodes.into_iter().filter(|n| n.file == file).collect(),
            links.into_iter().filter(|l| l.origin == file).collect(),
        )
    }

    #[test]
    fn test_create_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("graph.db");
        let db = GraphDatabase::new(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(db.path(), db_path.as_path());
    }

    #[test]
    fn test_replace_and_load_graph() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let files = repo();
        let graphs = GraphAssembler::new(&files).assemble(&files);
        db.replace_graph("r1", &graphs).unwrap();

        let (nodes, links) = db.load_graph("r1").unwrap();
        assert_eq!(nodes.len(), 4);
        assert!(links.iter().any(|l| l.link_type == LinkType::Calls
            && l.source == "fn:a.py#load"
            && l.target == "fn:b.py#parse"));
        assert_eq!(db.repo_files("r1").unwrap(), vec!["a.py", "b.py"]);
        assert!(db.load_nodes("other").unwrap().is_empty());
    }

    #[test]
    fn test_repo_languages_are_distinct() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let mut files = repo();
        files.push(ParsedFile::empty("web/app.ts", "typescript"));
        let graphs = GraphAssembler::new(&files).assemble(&files);
        db.replace_graph("r1", &graphs).unwrap();

        assert_eq!(db.repo_languages("r1").unwrap(), vec!["python", "typescript"]);
        assert!(db.repo_languages("other").unwrap().is_empty());
    }

    #[test]
    fn test_merge_leaves_other_files_untouched() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let files = repo();
        db.replace_graph("r1", &GraphAssembler::new(&files).assemble(&files)).unwrap();
        let before = rows_of(&db, "r1", "a.py");

        let changed = vec![parsed("b.py", &[("parse", "def parse():\n    return 2"), ("extra", "def extra():\n    pass")])];
        let existing: Vec<GraphNode> = db.load_nodes("r1").unwrap().into_iter().filter(|n| n.file != "b.py").collect();
        let graphs = GraphAssembler::with_existing(&existing, &changed).assemble(&changed);
        db.merge_files("r1", &graphs, &[]).unwrap();

        assert_eq!(rows_of(&db, "r1", "a.py"), before);
        let (b_nodes, _) = rows_of(&db, "r1", "b.py");
        assert_eq!(b_nodes.len(), 3);
    }

    #[test]
    fn test_merge_removes_deleted_files() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let files = repo();
        db.replace_graph("r1", &GraphAssembler::new(&files).assemble(&files)).unwrap();

        db.merge_files("r1", &[], &["b.py".to_string()]).unwrap();
        let (nodes, links) = db.load_graph("r1").unwrap();
        assert!(nodes.iter().all(|n| n.file == "a.py"));
        // a.py's call into b.py is kept but hidden by the full view
        assert!(links.iter().any(|l| l.target == "fn:b.py#parse"));
        let view = GraphData::view(nodes, links, GraphView::Full);
        assert!(view.links.iter().all(|l| l.target != "fn:b.py#parse"));
    }

    #[test]
    fn test_snippets_and_embeddings() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let snippet = |name: &str, file: &str| CodeSnippet {
            name: name.into(),
            code: format!("def {}(): pass", name),
            file: file.into(),
            start_line: 1,
            end_line: 1,
        };
        db.replace_snippets("r1", &[snippet("a", "a.py"), snippet("b", "b.py")]).unwrap();

        let pending = db.snippets_without_embedding("r1", 10).unwrap();
        assert_eq!(pending.len(), 2);
        db.store_embedding(pending[0].id, &[0.5, -1.25]).unwrap();
        assert_eq!(db.get_embedding(pending[0].id).unwrap(), Some(vec![0.5, -1.25]));
        assert_eq!(db.snippets_without_embedding("r1", 10).unwrap().len(), 1);

        db.merge_snippets("r1", &["a.py".to_string()], &[snippet("a2", "a.py")]).unwrap();
        let a = db.snippets_for_files("r1", &["a.py".to_string()]).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].name, "a2");
        assert_eq!(db.stats().unwrap().embedded_snippets, 0);
    }

    #[test]
    fn test_repo_metadata_round_trip() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let info = RepoInfo {
            repo_id: "r1".into(),
            repo_url: "https://example.com/acme/shop.git".into(),
            branch: Some("main".into()),
            framework: Some("django".into()),
            file_count: 2,
            node_count: 4,
            link_count: 3,
            snippet_count: 2,
            languages: vec!["python".into()],
            indexed_at: Some(DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc)),
            last_job_id: Some("job-1".into()),
        };
        db.upsert_repo(&info).unwrap();
        assert_eq!(db.get_repo("r1").unwrap(), Some(info.clone()));
        assert_eq!(db.list_repos().unwrap(), vec![info]);
        assert!(db.get_repo("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_repo_and_missing_view() {
        let dir = tempdir().unwrap();
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let files = repo();
        db.replace_graph("r1", &GraphAssembler::new(&files).assemble(&files)).unwrap();
        db.upsert_repo(&RepoInfo { repo_id: "r1".into(), ..Default::default() }).unwrap();
        assert_eq!(db.graph_view("r1", GraphView::Overview).unwrap().nodes.len(), 2);

        db.delete_repo("r1").unwrap();
        assert_eq!(db.repo_counts("r1").unwrap(), (0, 0, 0));
        assert!(matches!(db.graph_view("r1", GraphView::Full), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_neighbour_files() {
        let files = repo();
        let graphs = GraphAssembler::new(&files).assemble(&files);
        let nodes: Vec<GraphNode> = graphs.iter().flat_map(|g| g.nodes.clone()).collect();
        let links: Vec<GraphLink> = graphs.iter().flat_map(|g| g.links.clone()).collect();
        assert_eq!(neighbour_files(&nodes, &links, &["b.py".to_string()]), vec!["a.py"]);
        assert!(neighbour_files(&nodes, &links, &["c.py".to_string()]).is_empty());
    }
}
