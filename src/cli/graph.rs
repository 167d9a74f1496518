use std::str::FromStr;

use anyhow::{bail, Result};

use repograph::config::Config;
use repograph::graph::{GraphData, GraphView};
use repograph::index::db::GraphDatabase;

pub fn show_graph(config: &Config, repo_id: &str, view: &str, format: &str) -> Result<()> {
    let view = GraphView::from_str(view)?;
    let db = GraphDatabase::new(config.db_path())?;
    let graph = db.graph_view(repo_id, view)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&graph)?),
        "text" => print_text(&graph, view),
        other => bail!("unknown format '{}', expected json or text", other),
    }
    Ok(())
}

fn print_text(graph: &GraphData, view: GraphView) {
    println!("{} view: {} nodes, {} links", view, graph.nodes.len(), graph.links.len());

    println!("\nNodes:");
    for node in &graph.nodes {
        let line = node.start_line.map(|l| format!(":{}", l)).unwrap_or_default();
        println!(
            "  [{}] {} ({}{}) {} connections",
            node.kind.label(),
            node.name,
            node.file,
            line,
            node.connection_count
        );
    }

    println!("\nLinks:");
    for link in &graph.links {
        let weight = link.weight.map(|w| format!(" x{}", w)).unwrap_or_default();
        println!("  {} -{}-> {}{}", link.source, link.link_type.as_str(), link.target, weight);
    }
}
