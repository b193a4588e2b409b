use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILE_FIELDS: &str = "id,name,mimeType,parents,size,webViewLink,webContentLink";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("upload session response carried no location")]
    MissingUploadLocation,
    #[error("base url cannot carry path segments")]
    CannotBeABase,
}

/// Metadata of one node of the drive tree, restricted to the fields the
/// daemon asks for.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub web_content_link: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// First parent, or the node itself when it has none. Only the drive
    /// root is parentless, so a self-parent marks the top of the tree.
    pub fn parent_id(&self) -> &str {
        self.parents
            .first()
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => (self.downloaded.saturating_mul(100) / total).min(100) as u8,
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewFile<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Same endpoint and credentials on a new HTTP connection pool.
    pub fn fresh(&self) -> Self {
        Self {
            http: Client::new(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
        }
    }

    pub async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        let query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        self.list_files(&query).await
    }

    pub async fn search_by_name(&self, name: &str) -> Result<Vec<DriveFile>, DriveError> {
        let query = format!("name = '{}' and trashed = false", escape_query(name));
        self.list_files(&query).await
    }

    pub async fn list_files(&self, query: &str) -> Result<Vec<DriveFile>, DriveError> {
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut page_token: Option<String> = None;
        let mut files = Vec::new();
        loop {
            let mut url = self.endpoint("/drive/v3/files")?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("q", query);
                pairs.append_pair("fields", &fields);
                if let Some(token) = page_token.as_deref() {
                    pairs.append_pair("pageToken", token);
                }
            }
            let response = self
                .http
                .get(url)
                .header("Authorization", self.auth_header_value())
                .send()
                .await?;
            let page: FileListResponse = Self::handle_response(response).await?;
            files.extend(page.files);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(files)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.file_url(file_id)?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn parent_of(&self, file_id: &str) -> Result<String, DriveError> {
        let file = self.get_file(file_id).await?;
        Ok(file.parent_id().to_string())
    }

    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        let body = NewFile {
            name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: vec![parent_id],
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Uploads a local file under `parent_id`, or under the drive's default
    /// root when no parent is given. The body is streamed from disk.
    pub async fn upload_file(
        &self,
        source: &Path,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.to_string_lossy().into_owned());
        let len = tokio::fs::metadata(source).await?.len();
        let session = self.start_upload(&name, parent_id, len).await?;
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(session)
            .header(header::CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn upload_bytes(
        &self,
        name: &str,
        parent_id: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<DriveFile, DriveError> {
        let len = bytes.len() as u64;
        let session = self.start_upload(name, parent_id, len).await?;
        let response = self
            .http
            .put(session)
            .header(header::CONTENT_LENGTH, len)
            .body(bytes)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Streams the file's content into `dest_folder/<name>`, reporting after
    /// every chunk and once more with `done = true` after the final rename.
    pub async fn download_file<F>(
        &self,
        file: &DriveFile,
        dest_folder: &Path,
        mut on_progress: F,
    ) -> Result<PathBuf, DriveError>
    where
        F: FnMut(DownloadProgress, bool) + Send,
    {
        let mut url = self.file_url(&file.id)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        tokio::fs::create_dir_all(dest_folder).await?;
        let target = dest_folder.join(local_file_name(&file.name));
        let partial = partial_path(&target);
        let mut out = tokio::fs::File::create(&partial).await?;
        let total = file.size.or(response.content_length());
        let mut progress = DownloadProgress {
            downloaded: 0,
            total,
        };
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            progress.downloaded += chunk.len() as u64;
            on_progress(progress, false);
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        tokio::fs::rename(&partial, &target).await?;
        on_progress(progress, true);
        Ok(target)
    }

    async fn start_upload(
        &self,
        name: &str,
        parent_id: Option<&str>,
        len: u64,
    ) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", FILE_FIELDS);
        let body = NewFile {
            name,
            mime_type: None,
            parents: parent_id.into_iter().collect(),
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header("X-Upload-Content-Length", len)
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingUploadLocation)?;
        Ok(self.base_url.join(location)?)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    fn file_url(&self, file_id: &str) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.path_segments_mut()
            .map_err(|_| DriveError::CannotBeABase)?
            .push(file_id);
        Ok(url)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, DriveError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn local_file_name(name: &str) -> String {
    let cleaned = name.replace(['/', '\\'], "_");
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

// The API encodes int64 values as strings; accept both forms.
fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) => text.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
