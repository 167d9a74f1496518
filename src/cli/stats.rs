use std::path::Path;

use anyhow::Result;

use repograph::config::Config;
use repograph::index::db::GraphDatabase;

pub fn show_stats(config: &Config, detailed: bool) -> Result<()> {
    let db_path = config.db_path();
    println!("repograph statistics");
    println!("Database: {}", db_path.display());

    if !db_path.exists() {
        println!("\nNo index yet. Run 'repograph index <path>' first.");
        return Ok(());
    }

    let db = GraphDatabase::new(&db_path)?;
    let stats = db.stats()?;

    println!("\nIndex Statistics:");
    println!("  Repositories: {}", stats.repos);
    println!("  Graph nodes: {}", stats.nodes);
    println!("  Graph links: {}", stats.links);
    println!("  Snippets: {} ({} embedded)", stats.snippets, stats.embedded_snippets);
    println!("  Index size: {:.2} MB", get_db_size(&db_path)?);

    if detailed {
        println!("\nRepositories:");
        for repo in db.list_repos()? {
            let indexed = repo
                .indexed_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {} {} [{}] {} files, {} nodes, {} links, indexed {}",
                repo.repo_id,
                repo.repo_url,
                repo.languages.join(", "),
                repo.file_count,
                repo.node_count,
                repo.link_count,
                indexed
            );
        }

        let nodes_by_label = count_grouped(&db, "SELECT label, COUNT(*) AS n FROM graph_nodes GROUP BY label ORDER BY n DESC")?;
        if !nodes_by_label.is_empty() {
            println!("\nNodes by label:");
            for (label, count) in nodes_by_label {
                println!("    {}: {}", label, count);
            }
        }

        let links_by_type = count_grouped(&db, "SELECT type, COUNT(*) AS n FROM graph_links GROUP BY type ORDER BY n DESC")?;
        if !links_by_type.is_empty() {
            println!("\nLinks by type:");
            for (link_type, count) in links_by_type {
                println!("    {}: {}", link_type, count);
            }
        }
    }

    Ok(())
}

fn get_db_size(db_path: &Path) -> Result<f64> {
    let size_bytes = std::fs::metadata(db_path)?.len() as f64;
    Ok(size_bytes / (1024.0 * 1024.0))
}

fn count_grouped(db: &GraphDatabase, sql: &str) -> Result<Vec<(String, usize)>> {
    let conn = db.get_conn()?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((key, count as usize))
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}
