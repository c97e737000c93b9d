//! Fetchers: stage a job's input artifact in local storage.
//!
//! Every fetcher writes into a temp file inside the destination directory and
//! renames it into place, so a reader never observes partial content.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::create_private_dir;
use crate::error::{MetlError, Result};

const FALLBACK_FILE_NAME: &str = "input";

/// A parsed `<scheme>://<path>` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `file:///absolute/path`
    File(PathBuf),
    /// `http://...` or `https://...`, kept as the full URL.
    Http(String),
}

impl Locator {
    /// Parse a locator. Unknown schemes are configuration errors.
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw.split_once("://").ok_or_else(|| {
            MetlError::Config(format!(
                "fetch locator '{}' must be of the form <scheme>://<path>",
                raw
            ))
        })?;
        if rest.is_empty() {
            return Err(MetlError::Config(format!(
                "fetch locator '{}' has an empty path",
                raw
            )));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "file" => Ok(Locator::File(PathBuf::from(rest))),
            "http" | "https" => Ok(Locator::Http(raw.to_string())),
            other => Err(MetlError::Config(format!(
                "fetch engine '{}' does not exist",
                other
            ))),
        }
    }

    /// Name of the staged file: the last path segment of the locator.
    pub fn file_name(&self) -> String {
        let name = match self {
            Locator::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Locator::Http(url) => {
                let without_query = url.split(['?', '#']).next().unwrap_or_default();
                let path = without_query
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(without_query);
                match path.split_once('/') {
                    Some((_, path)) => path.rsplit('/').next().unwrap_or_default().to_string(),
                    None => String::new(),
                }
            }
        };
        if name.is_empty() {
            FALLBACK_FILE_NAME.to_string()
        } else {
            name
        }
    }

    fn display(&self) -> String {
        match self {
            Locator::File(path) => format!("file://{}", path.display()),
            Locator::Http(url) => url.clone(),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

/// Retrieves an artifact into a staging directory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `locator` into `dest_dir` and return the staged path.
    async fn fetch(&self, locator: &Locator, dest_dir: &Path) -> Result<PathBuf>;
}

/// Copies a local file.
#[derive(Debug, Default)]
pub struct FileFetcher;

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, locator: &Locator, dest_dir: &Path) -> Result<PathBuf> {
        let Locator::File(source) = locator else {
            return Err(MetlError::Config(format!(
                "file fetcher cannot handle '{}'",
                locator
            )));
        };

        let source = source.clone();
        let dest_dir = dest_dir.to_path_buf();
        let name = locator.file_name();
        let label = locator.to_string();

        tokio::task::spawn_blocking(move || {
            let mut input = std::fs::File::open(&source)
                .map_err(|e| MetlError::transport(label.as_str(), e))?;
            let mut staged = stage(&dest_dir, &label)?;
            std::io::copy(&mut input, staged.as_file_mut())
                .map_err(|e| MetlError::transport(label.as_str(), e))?;
            commit(staged, &dest_dir.join(name), &label)
        })
        .await
        .map_err(|e| MetlError::transport(locator.to_string(), e))?
    }
}

/// Downloads over HTTP(S).
#[derive(Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &Locator, dest_dir: &Path) -> Result<PathBuf> {
        let Locator::Http(url) = locator else {
            return Err(MetlError::Config(format!(
                "http fetcher cannot handle '{}'",
                locator
            )));
        };

        debug!(url = %url, "Requesting input");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MetlError::transport(url.as_str(), e))?;

        let mut staged = stage(dest_dir, url)?;
        let mut bytes = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MetlError::transport(url.as_str(), e))?
        {
            bytes += chunk.len();
            staged
                .write_all(&chunk)
                .map_err(|e| MetlError::transport(url.as_str(), e))?;
        }
        debug!(url = %url, bytes, "Download complete");

        commit(staged, &dest_dir.join(locator.file_name()), url)
    }
}

/// Resolve the fetcher for a locator's scheme.
pub fn fetcher_for(locator: &Locator) -> Box<dyn Fetcher> {
    match locator {
        Locator::File(_) => Box::new(FileFetcher),
        Locator::Http(_) => Box::new(HttpFetcher::default()),
    }
}

/// Parse `raw`, pick the matching fetcher and stage the artifact in `dest_dir`.
pub async fn fetch(raw: &str, dest_dir: &Path) -> Result<PathBuf> {
    let locator = Locator::parse(raw)?;
    info!(file = %locator, dir = %dest_dir.display(), "Fetching input");
    fetcher_for(&locator).fetch(&locator, dest_dir).await
}

fn stage(dest_dir: &Path, label: &str) -> Result<NamedTempFile> {
    create_private_dir(dest_dir).map_err(|e| MetlError::transport(label, e))?;
    NamedTempFile::new_in(dest_dir).map_err(|e| MetlError::transport(label, e))
}

fn commit(staged: NamedTempFile, dest: &Path, label: &str) -> Result<PathBuf> {
    staged
        .as_file()
        .sync_all()
        .map_err(|e| MetlError::transport(label, e))?;
    staged
        .persist(dest)
        .map_err(|e| MetlError::transport(label, e.error))?;
    Ok(dest.to_path_buf())
}
