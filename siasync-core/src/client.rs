use std::path::Path;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use siasync_integrations::ids::{DEFAULT_API_URL, SIA_USER_AGENT};
use thiserror::Error;
use url::Url;

use crate::store::RemoteStore;

#[derive(Debug, Error)]
pub enum SiaError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("base url cannot carry a logical path: {0}")]
    CannotBeBase(Url),
    #[error("logical path is empty")]
    EmptyPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The service could not be reached at all.
    Transport,
    /// The service answered, but with a failure or an unreadable body.
    Service,
}

#[derive(Clone)]
pub struct SiaClient {
    http: Client,
    base_url: Url,
    api_password: Option<String>,
}

impl SiaClient {
    pub fn new() -> Result<Self, SiaError> {
        Self::with_base_url(DEFAULT_API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, SiaError> {
        Ok(Self {
            http: Client::builder().user_agent(SIA_USER_AGENT).build()?,
            base_url: Url::parse(base_url)?,
            api_password: None,
        })
    }

    pub fn with_api_password(mut self, password: impl Into<String>) -> Self {
        self.api_password = Some(password.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get_consensus(&self) -> Result<ConsensusInfo, SiaError> {
        let url = self.endpoint("/consensus")?;
        let response = self.request(Method::GET, url).send().await?;
        Self::handle_response(response).await
    }

    pub async fn get_wallet(&self) -> Result<WalletInfo, SiaError> {
        let url = self.endpoint("/wallet")?;
        let response = self.request(Method::GET, url).send().await?;
        Self::handle_response(response).await
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_password {
            Some(password) => builder.basic_auth("", Some(password)),
            None => builder,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, SiaError> {
        Ok(self.base_url.join(path)?)
    }

    fn logical_endpoint(&self, prefix: &str, logical_path: &str) -> Result<Url, SiaError> {
        let trimmed = logical_path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(SiaError::EmptyPath);
        }
        let mut url = self.endpoint(prefix)?;
        url.path_segments_mut()
            .map_err(|_| SiaError::CannotBeBase(self.base_url.clone()))?
            .pop_if_empty()
            .extend(trimmed.split('/'));
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SiaError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn handle_empty_response(response: reqwest::Response) -> Result<(), SiaError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> SiaError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // siad wraps failures as {"message": "..."}; keep the raw body otherwise.
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|parsed| parsed.message)
            .unwrap_or(body);
        SiaError::Api { status, message }
    }
}

impl RemoteStore for SiaClient {
    async fn list_files(&self) -> Result<Vec<RemoteFileRecord>, SiaError> {
        let url = self.endpoint("/renter/files")?;
        let response = self.request(Method::GET, url).send().await?;
        let payload: FileListResponse = Self::handle_response(response).await?;
        Ok(payload.into_records())
    }

    async fn upload(
        &self,
        logical_path: &str,
        source: &Path,
        duration: u64,
        renew: bool,
    ) -> Result<(), SiaError> {
        let url = self.logical_endpoint("/renter/upload", logical_path)?;
        let source = source.to_string_lossy();
        let duration = duration.to_string();
        let form = [
            ("source", source.as_ref()),
            ("duration", duration.as_str()),
            ("renew", if renew { "true" } else { "false" }),
        ];
        let response = self.request(Method::POST, url).form(&form).send().await?;
        Self::handle_empty_response(response).await
    }

    async fn delete(&self, logical_path: &str) -> Result<(), SiaError> {
        let url = self.logical_endpoint("/renter/delete", logical_path)?;
        let response = self.request(Method::POST, url).send().await?;
        Self::handle_empty_response(response).await
    }

    async fn download_metadata(&self, logical_path: &str, destination: &Path) -> Result<(), SiaError> {
        if logical_path.trim_matches('/').is_empty() {
            return Err(SiaError::EmptyPath);
        }
        let mut url = self.endpoint("/renter/share")?;
        url.query_pairs_mut()
            .append_pair("siapaths", logical_path)
            .append_pair("destination", &destination.to_string_lossy());
        let response = self.request(Method::GET, url).send().await?;
        Self::handle_empty_response(response).await
    }
}

impl SiaError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            SiaError::Request(err) if err.is_decode() => ErrorClass::Service,
            SiaError::Request(_) => ErrorClass::Transport,
            _ => ErrorClass::Service,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.classification() == ErrorClass::Transport
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteFileRecord {
    #[serde(rename = "siapath")]
    pub path: String,
    #[serde(rename = "filesize", default)]
    pub size_bytes: u64,
    #[serde(rename = "uploadprogress", default)]
    pub upload_progress_percent: f64,
    #[serde(default)]
    pub available: bool,
    #[serde(rename = "expiration", default)]
    pub expiration_block: u64,
    #[serde(default)]
    pub renewing: bool,
    #[serde(default)]
    pub redundancy: f64,
}

impl RemoteFileRecord {
    pub fn is_complete(&self) -> bool {
        self.upload_progress_percent >= 100.0
    }

    /// Blocks left until expiration; zero or negative once expired.
    pub fn remaining_blocks(&self, current_height: u64) -> i64 {
        let expiration = i64::try_from(self.expiration_block).unwrap_or(i64::MAX);
        let height = i64::try_from(current_height).unwrap_or(i64::MAX);
        expiration.saturating_sub(height)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsensusInfo {
    pub height: u64,
    #[serde(default)]
    pub synced: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub unlocked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileListResponse {
    Wrapped {
        #[serde(default)]
        files: Option<Vec<RemoteFileRecord>>,
    },
    Bare(Vec<RemoteFileRecord>),
}

impl FileListResponse {
    fn into_records(self) -> Vec<RemoteFileRecord> {
        match self {
            FileListResponse::Wrapped { files } => files.unwrap_or_default(),
            FileListResponse::Bare(files) => files,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}
