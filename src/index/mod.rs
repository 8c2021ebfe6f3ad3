//! Remote package index.
//!
//! The index is a "simple" HTML index: `<index_url>/<name>/` is a page of
//! `<a href>` links, one per artifact file. Only links whose file name
//! parses to the requested package and carries a known artifact suffix are
//! considered.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Url;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alias::name_version_from_path;
use crate::http::HttpClient;
use crate::runtime::Runtime;
use crate::version::VersionResolver;

/// Suffixes of files the installer knows how to handle.
const ARTIFACT_SUFFIXES: &[&str] = &[".dist", ".zip", ".tar.gz", ".tgz", ".tar", ".unit"];

/// One downloadable artifact listed by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    pub file_name: String,
    pub url: String,
}

/// A place artifacts can be listed and fetched from.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Artifacts published for `name`, newest first.
    async fn list_versions(&self, name: &str) -> Result<Vec<IndexEntry>>;

    /// Download `name` at `version` (newest when `None`) into `dest_dir` and
    /// return the file's path.
    async fn download(&self, name: &str, version: Option<&str>, dest_dir: &Path)
    -> Result<PathBuf>;
}

pub struct IndexClient<R: Runtime> {
    runtime: Arc<R>,
    http: HttpClient,
    index_url: String,
}

/// Names compare case-insensitively with `-`, `_` and `.` treated alike.
fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['-', '_', '.'], "-")
}

fn has_artifact_suffix(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    ARTIFACT_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Extract the artifacts of `name` from an index page.
pub fn parse_index_page(page_url: &str, html: &str, name: &str) -> Result<Vec<IndexEntry>> {
    let base = Url::parse(page_url).with_context(|| format!("Invalid index URL {}", page_url))?;
    let selector =
        Selector::parse("a[href]").map_err(|e| anyhow!("Invalid link selector: {:?}", e))?;
    let wanted = normalize_name(name);

    let document = Html::parse_document(html);
    let mut entries = Vec::new();
    for link in document.select(&selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href) else {
            debug!("Skipping unparsable link {}", href);
            continue;
        };
        url.set_fragment(None);
        let Some(file_name) = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        if !has_artifact_suffix(&file_name) {
            continue;
        }
        let (parsed_name, version) = name_version_from_path(Path::new(&file_name));
        let Some(version) = version else {
            continue;
        };
        if normalize_name(&parsed_name) != wanted {
            continue;
        }
        entries.push(IndexEntry {
            name: parsed_name,
            version,
            file_name,
            url: url.to_string(),
        });
    }
    VersionResolver::sort_newest_first(&mut entries, |e| e.version.as_str());
    Ok(entries)
}

impl<R: Runtime> IndexClient<R> {
    pub fn new(runtime: Arc<R>, http: HttpClient, index_url: impl Into<String>) -> Self {
        Self {
            runtime,
            http,
            index_url: index_url.into(),
        }
    }

    fn page_url(&self, name: &str) -> String {
        format!(
            "{}/{}/",
            self.index_url.trim_end_matches('/'),
            normalize_name(name)
        )
    }
}

#[async_trait]
impl<R: Runtime> PackageIndex for IndexClient<R> {
    #[tracing::instrument(skip(self))]
    async fn list_versions(&self, name: &str) -> Result<Vec<IndexEntry>> {
        let url = self.page_url(name);
        let html = self
            .http
            .get_text(&url)
            .await
            .with_context(|| format!("Failed to fetch index page for {}", name))?;
        parse_index_page(&url, &html, name)
    }

    #[tracing::instrument(skip(self))]
    async fn download(
        &self,
        name: &str,
        version: Option<&str>,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let entries = self.list_versions(name).await?;
        let entry = match version {
            Some(v) => entries
                .iter()
                .find(|e| VersionResolver::versions_match(&e.version, v)),
            None => entries.first(),
        };
        let Some(entry) = entry else {
            bail!(
                "No artifact for {}{} on the index",
                name,
                version.map(|v| format!(" {}", v)).unwrap_or_default()
            );
        };

        self.runtime.create_dir_all(dest_dir)?;
        let target = dest_dir.join(&entry.file_name);
        let partial = dest_dir.join(format!("{}.part", entry.file_name));
        info!("Downloading {} from {}", entry.file_name, entry.url);

        let result = self
            .http
            .download_file(&entry.url, || {
                self.runtime
                    .create_file(&partial)
                    .with_context(|| format!("Failed to create {:?}", partial))
            })
            .await;
        if let Err(e) = result {
            if self.runtime.exists(&partial) {
                let _ = self.runtime.remove_file(&partial);
            }
            return Err(e);
        }

        self.runtime.rename(&partial, &target)?;
        Ok(target)
    }
}
