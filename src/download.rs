use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{error, info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use sanitize_filename::{sanitize_with_options, Options};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::Result;
use crate::form::{DownloadForm, FormData, FormFactory, FormModel};

pub const FORM_NAME: &str = "DownloadForm";
const MAX_FILENAME_LEN: usize = 255;
const FALLBACK_FILENAME: &str = "download";
const SUFFIX_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 16;

/// What a finished download left on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadReceipt {
    pub filename: String,
    pub size: u64,
    pub checksum: String,
    pub content_type: String,
    pub completed_at: DateTime<Utc>,
}

/// Fetches a remote URL into the download directory.
pub struct UrlDownloadForm {
    client: Client,
    download_dir: PathBuf,
    max_bytes: Option<u64>,
    model: FormModel,
    url: Option<Url>,
    filename: Option<String>,
}

enum Fetch {
    Done {
        size: u64,
        checksum: String,
        content_type: Option<String>,
    },
    Failed(String),
}

impl UrlDownloadForm {
    pub fn new(client: Client, download_dir: impl Into<PathBuf>, max_bytes: Option<u64>) -> Self {
        Self {
            client,
            download_dir: download_dir.into(),
            max_bytes,
            model: FormModel::new(FORM_NAME),
            url: None,
            filename: None,
        }
    }

    fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.model
            .errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    fn validate(&mut self) -> bool {
        self.model.errors.clear();
        self.url = None;
        self.filename = None;

        let raw_url = self
            .model
            .fields
            .get("url")
            .map(|u| u.trim().to_string())
            .unwrap_or_default();
        if raw_url.is_empty() {
            self.add_error("url", "Url cannot be blank.");
        } else {
            match Url::parse(&raw_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
                    self.url = Some(url)
                }
                _ => self.add_error("url", "Url is not a valid URL."),
            }
        }

        let raw_name = self
            .model
            .fields
            .get("filename")
            .map(|f| f.trim().to_string())
            .unwrap_or_default();
        if !raw_name.is_empty() {
            let safe = sanitize_name(&raw_name);
            if safe.is_empty() {
                self.add_error("filename", "Save as is not a valid file name.");
            } else if safe.len() > MAX_FILENAME_LEN {
                self.add_error(
                    "filename",
                    format!("Save as should contain at most {} characters.", MAX_FILENAME_LEN),
                );
            } else {
                self.filename = Some(safe);
            }
        } else if let Some(url) = &self.url {
            self.filename = Some(filename_from_url(url));
        }

        !self.model.has_errors()
    }

    async fn fetch(&self, url: Url, part_path: &Path) -> Result<Fetch> {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {} failed: {}", url, e);
                return Ok(Fetch::Failed(format!("Could not reach {}.", url)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Request to {} returned {}", url, status);
            return Ok(Fetch::Failed(format!("The server responded with {}.", status)));
        }

        if let (Some(limit), Some(length)) = (self.max_bytes, response.content_length()) {
            if length > limit {
                return Ok(Fetch::Failed(too_large(limit)));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let mut file = File::create(part_path).await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    warn!("Transfer from {} interrupted: {}", url, e);
                    return Ok(Fetch::Failed("The transfer was interrupted.".to_string()));
                }
            };

            size += chunk.len() as u64;
            if self.max_bytes.is_some_and(|limit| size > limit) {
                return Ok(Fetch::Failed(too_large(self.max_bytes.unwrap_or_default())));
            }

            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }
        file.flush().await?;

        Ok(Fetch::Done {
            size,
            checksum: format!("{:x}", hasher.finalize()),
            content_type,
        })
    }
}

#[async_trait]
impl DownloadForm for UrlDownloadForm {
    fn load(&mut self, data: &FormData) -> bool {
        let fields = data.scoped(FORM_NAME);
        if fields.is_empty() {
            return false;
        }
        for (key, value) in fields {
            if key == "url" || key == "filename" {
                self.model.fields.insert(key, value);
            }
        }
        self.validate()
    }

    async fn download(&mut self) -> Result<bool> {
        let (Some(url), Some(filename)) = (self.url.clone(), self.filename.clone()) else {
            return Ok(false);
        };

        fs::create_dir_all(&self.download_dir).await?;
        let part_path = self
            .download_dir
            .join(format!(".{}.part", Uuid::new_v4().simple()));

        let fetched = self.fetch(url.clone(), &part_path).await;
        let (size, checksum, served_type) = match fetched {
            Ok(Fetch::Done {
                size,
                checksum,
                content_type,
            }) => (size, checksum, content_type),
            Ok(Fetch::Failed(message)) => {
                remove_partial(&part_path).await;
                self.add_error("url", message);
                return Ok(false);
            }
            Err(e) => {
                remove_partial(&part_path).await;
                return Err(e);
            }
        };

        let (filename, target) = match claim_name(&self.download_dir, &filename).await {
            Ok(claimed) => claimed,
            Err(e) => {
                remove_partial(&part_path).await;
                return Err(e);
            }
        };
        // Replaces the empty placeholder this request created.
        if let Err(e) = fs::rename(&part_path, &target).await {
            error!("Failed to move download into place: {}", e);
            remove_partial(&part_path).await;
            remove_partial(&target).await;
            return Err(e.into());
        }

        let content_type = mime_guess::from_path(&target)
            .first()
            .map(|m| m.essence_str().to_string())
            .or(served_type)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let receipt = DownloadReceipt {
            filename,
            size,
            checksum,
            content_type,
            completed_at: Utc::now(),
        };
        info!(
            "Downloaded {} to {} ({} bytes, sha256 {})",
            url,
            target.display(),
            receipt.size,
            receipt.checksum
        );
        self.model.result = Some(serde_json::to_value(&receipt)?);
        Ok(true)
    }

    fn model(&self) -> FormModel {
        self.model.clone()
    }
}

/// Builds a [`UrlDownloadForm`] per request, sharing one HTTP client.
#[derive(Clone)]
pub struct UrlDownloadFormFactory {
    client: Client,
    download_dir: PathBuf,
    max_bytes: Option<u64>,
}

impl UrlDownloadFormFactory {
    pub fn new(client: Client, download_dir: impl Into<PathBuf>, max_bytes: Option<u64>) -> Self {
        Self {
            client,
            download_dir: download_dir.into(),
            max_bytes,
        }
    }
}

impl FormFactory for UrlDownloadFormFactory {
    fn create(&self) -> Box<dyn DownloadForm> {
        Box::new(UrlDownloadForm::new(
            self.client.clone(),
            self.download_dir.clone(),
            self.max_bytes,
        ))
    }
}

fn too_large(limit: u64) -> String {
    format!("The file is larger than the {} byte limit.", limit)
}

/// Strips characters that are unsafe in file names without truncating, so
/// over-long names can be reported instead of silently cut.
fn sanitize_name(name: &str) -> String {
    sanitize_with_options(
        name,
        Options {
            truncate: false,
            ..Options::default()
        },
    )
}

fn filename_from_url(url: &Url) -> String {
    let candidate = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .map(sanitize_name)
        .unwrap_or_default();
    if candidate.is_empty() || candidate.len() > MAX_FILENAME_LEN {
        FALLBACK_FILENAME.to_string()
    } else {
        candidate
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `name` with `-<suffix>` before the extension, shortening the stem so the
/// result stays within `MAX_FILENAME_LEN` bytes.
fn suffixed_name(name: &str, suffix: &str) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str());
    let ext = path.extension().and_then(|e| e.to_str());

    match (stem, ext) {
        (Some(stem), Some(ext)) if ext.len() + suffix.len() + 3 <= MAX_FILENAME_LEN => {
            let budget = MAX_FILENAME_LEN - ext.len() - suffix.len() - 2;
            format!("{}-{}.{}", truncate_at_boundary(stem, budget), suffix, ext)
        }
        _ => {
            let budget = MAX_FILENAME_LEN - suffix.len() - 1;
            format!("{}-{}", truncate_at_boundary(name, budget), suffix)
        }
    }
}

/// Reserves a free name in `dir` by creating an empty placeholder with
/// `create_new`, so concurrent downloads never share a target.
async fn claim_name(dir: &Path, name: &str) -> Result<(String, PathBuf)> {
    let mut candidate = name.to_string();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let target = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(_) => return Ok((candidate, target)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let suffix = Uuid::new_v4().simple().to_string();
                candidate = suffixed_name(name, &suffix[..SUFFIX_LEN]);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", name),
    )
    .into())
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!("Failed to delete partial file {}: {}", path.display(), e);
        }
    }
}
