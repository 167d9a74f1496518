// Repository checkouts through the git CLI, or straight from a local directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub repo_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub branch: Option<String>,
}

/// A working tree ready to be collected
#[derive(Debug, Clone, PartialEq)]
pub struct Checkout {
    pub root: PathBuf,
    pub revision: Option<String>,
}

#[async_trait]
pub trait RepoSource: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Checkout>;
}

/// Stable repository id: first 16 hex chars of the blake3 hash of the normalized URL
pub fn repo_id_for(repo_url: &str) -> String {
    let normalized = normalize_url(repo_url);
    blake3::hash(normalized.as_bytes()).to_hex().as_str()[..16].to_string()
}

fn normalize_url(repo_url: &str) -> String {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

/// `file://` URLs and plain paths to existing directories
fn local_path(repo_url: &str) -> Option<PathBuf> {
    if let Some(path) = repo_url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if repo_url.contains("://") || repo_url.starts_with("git@") {
        return None;
    }
    let path = PathBuf::from(repo_url);
    path.is_dir().then_some(path)
}

/// Network URLs git reaches over http(s), ssh or the git protocol, plus
/// scp-like `user@host:path`. Everything else resolves on this machine.
pub fn is_remote_url(repo_url: &str) -> bool {
    let url = repo_url.trim();
    if let Some((scheme, _)) = url.split_once("://") {
        return matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https" | "ssh" | "git");
    }
    match url.split_once(':') {
        // `transport::address` and drive letters are not hosts
        Some((host, path)) => host.len() > 1 && !host.contains('/') && !path.starts_with(':'),
        None => false,
    }
}

/// Per-command git config carrying the token as an HTTP header. Nothing is
/// written to `.git/config`, so the checkout never holds the credential.
fn credential_env(token: Option<&str>) -> Vec<(&'static str, String)> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Vec::new();
    };
    let basic = STANDARD.encode(format!("x-access-token:{}", token));
    vec![
        ("GIT_CONFIG_COUNT", "1".to_string()),
        ("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()),
        ("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {}", basic)),
    ]
}

/// Git CLI backed source; remote repositories are cloned under `workdir/<repo id>`
pub struct GitSource {
    workdir: PathBuf,
}

impl GitSource {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self { workdir: workdir.into() }
    }

    pub fn checkout_dir(&self, repo_url: &str) -> PathBuf {
        self.workdir.join(repo_id_for(repo_url))
    }
}

#[async_trait]
impl RepoSource for GitSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Checkout> {
        if let Some(root) = local_path(&request.repo_url) {
            if !root.is_dir() {
                return Err(Error::NotFound(format!("directory {}", root.display())));
            }
            debug!("Using local checkout {}", root.display());
            let revision = run_git(&["rev-parse", "HEAD"], Some(&root), None).await.ok();
            return Ok(Checkout { root, revision });
        }

        let dir = self.checkout_dir(&request.repo_url);
        self.sync(&request.repo_url, &dir, request.branch.as_deref(), request.token.as_deref())
            .await?;

        let revision = run_git(&["rev-parse", "HEAD"], Some(&dir), None).await.ok();
        Ok(Checkout { root: dir, revision })
    }
}

impl GitSource {
    /// Clone `url` into `dir`, or bring an existing clone up to date. The origin
    /// remote always holds the plain URL.
    async fn sync(&self, url: &str, dir: &Path, branch: Option<&str>, token: Option<&str>) -> Result<()> {
        if dir.join(".git").is_dir() {
            info!("Updating checkout of {}", url);
            let refspec = branch.unwrap_or("HEAD");
            run_git(&["remote", "set-url", "origin", url], Some(dir), None).await?;
            run_git(&["fetch", "--depth", "1", "origin", refspec], Some(dir), token).await?;
            run_git(&["reset", "--hard", "FETCH_HEAD"], Some(dir), None).await?;
            return Ok(());
        }

        info!("Cloning {}", url);
        tokio::fs::create_dir_all(&self.workdir).await?;
        let target = dir.to_string_lossy().to_string();
        let mut args = vec!["clone", "--depth", "1"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend([url, target.as_str()]);
        if let Err(e) = run_git(&args, None, token).await {
            // a half-written clone would be mistaken for a checkout next time
            let _ = tokio::fs::remove_dir_all(dir).await;
            return Err(e);
        }
        Ok(())
    }
}

async fn run_git(args: &[&str], cwd: Option<&Path>, token: Option<&str>) -> Result<String> {
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .envs(credential_env(token))
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = command
        .output()
        .await
        .map_err(|e| Error::Config(format!("cannot run git: {}", e)))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }
    let stderr = redact(String::from_utf8_lossy(&output.stderr).trim(), token);
    Err(classify_git_failure(args.first().copied().unwrap_or("git"), &stderr))
}

fn redact(message: &str, token: Option<&str>) -> String {
    match token.filter(|t| !t.is_empty()) {
        Some(token) => message.replace(token, "***"),
        None => message.to_string(),
    }
}

/// Missing repositories and rejected credentials are not worth retrying
fn classify_git_failure(subcommand: &str, stderr: &str) -> Error {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("not found") || lower.contains("does not exist") || lower.contains("couldn't find remote ref")
    {
        Error::NotFound(format!("git {}: {}", subcommand, stderr))
    } else if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("permission denied")
    {
        Error::Validation(format!("repository access denied: {}", stderr))
    } else {
        Error::network("vcs", format!("git {}: {}", subcommand, stderr))
    }
}
