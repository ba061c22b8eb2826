/// `azure` module: [`BlobTransport`] implementation for Azure Blob Storage, over its REST API.
///
/// Requests are authorised with a SAS token appended to every URL; obtaining
/// that token is left to the operator. The endpoint defaults to
/// `https://{account}.blob.core.windows.net` and can be overridden (emulator, tests).
///
/// # Responsibilities
/// - Map the four transport operations onto Put Container, List Blobs, Delete Blob and Put Blob
/// - Follow `NextMarker` until a listing is exhausted, decoding `Encoded="true"` names
/// - Surface the `x-ms-error-code` header as [`BlobError::code`]
use async_trait::async_trait;
use blob_deploy_core::config::{BlobMetadata, ContainerOptions, PublicAccessLevel};
use blob_deploy_core::contract::{BlobEntry, BlobError, BlobTransport};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::Path;

pub const API_VERSION: &str = "2021-08-06";
pub const ENV_ACCOUNT: &str = "AZURE_STORAGE_ACCOUNT";
pub const ENV_SAS_TOKEN: &str = "AZURE_STORAGE_SAS_TOKEN";

const ERROR_CODE_HEADER: &str = "x-ms-error-code";
const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

/// Connection settings for the blob service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Storage account name.
    #[serde(default)]
    pub account: Option<String>,
    /// Explicit service endpoint, e.g. `http://127.0.0.1:10000/devstoreaccount1`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Shared access signature query string, with or without the leading `?`.
    #[serde(default, skip_deserializing)]
    pub sas_token: Option<String>,
}

impl StorageConfig {
    /// Fills `account` and `sas_token` from the environment where they are unset.
    pub fn with_env(mut self) -> Self {
        if self.account.is_none() {
            self.account = std::env::var(ENV_ACCOUNT).ok().filter(|v| !v.is_empty());
        }
        if self.sas_token.is_none() {
            self.sas_token = std::env::var(ENV_SAS_TOKEN).ok().filter(|v| !v.is_empty());
        }
        self
    }

    pub fn endpoint_url(&self) -> Result<Url, BlobError> {
        let raw = match (&self.endpoint, &self.account) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(account)) => format!("https://{account}.blob.core.windows.net"),
            (None, None) => {
                return Err(BlobError::new(format!(
                    "no storage endpoint: set storage.account, storage.endpoint or {ENV_ACCOUNT}"
                )))
            }
        };
        Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| BlobError::new(format!("invalid storage endpoint {raw:?}: {e}")))
    }
}

pub struct AzureBlobClient {
    http: reqwest::Client,
    endpoint: Url,
    sas_token: Option<String>,
}

/// One page of a List Blobs response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    blob: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
struct BlobItem {
    #[serde(rename = "Name")]
    name: BlobName,
}

/// `<Name Encoded="true">` carries a percent-encoded name (characters not valid in XML).
#[derive(Debug, Deserialize)]
struct BlobName {
    #[serde(rename = "@Encoded", default)]
    encoded: bool,
    #[serde(rename = "$text", default)]
    content: String,
}

impl BlobName {
    fn decoded(self) -> Result<String, BlobError> {
        if !self.encoded {
            return Ok(self.content);
        }
        urlencoding::decode(&self.content)
            .map(Cow::into_owned)
            .map_err(|e| BlobError::new(format!("invalid encoded blob name {:?}: {e}", self.content)))
    }
}

/// Names and continuation marker of one listing page.
pub fn parse_listing(body: &str) -> Result<(Vec<BlobEntry>, Option<String>), BlobError> {
    let page: EnumerationResults = quick_xml::de::from_str(body.trim_start_matches('\u{feff}'))
        .map_err(|e| BlobError::new(format!("malformed blob listing: {e}")))?;
    let entries = page
        .blobs
        .blob
        .into_iter()
        .map(|item| item.name.decoded().map(BlobEntry::new))
        .collect::<Result<Vec<_>, _>>()?;
    let marker = page
        .next_marker
        .map(|marker| marker.trim().to_string())
        .filter(|marker| !marker.is_empty());
    Ok((entries, marker))
}

impl AzureBlobClient {
    pub fn new(config: &StorageConfig) -> Result<Self, BlobError> {
        let endpoint = config.endpoint_url()?;
        tracing::info!(endpoint = %endpoint, sas = config.sas_token.is_some(), "Azure blob client initialised");
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            sas_token: config
                .sas_token
                .as_ref()
                .map(|t| t.trim_start_matches('?').to_string()),
        })
    }

    /// URL for `container` (and optionally a blob inside it), with `query` and the SAS token.
    fn url(&self, container: &str, blob: Option<&str>, query: &[(&str, &str)]) -> Result<Url, BlobError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BlobError::new(format!("endpoint {} cannot be a base", self.endpoint)))?;
            segments.pop_if_empty().push(container);
            if let Some(blob) = blob {
                segments.extend(blob.split('/'));
            }
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        if let Some(sas) = &self.sas_token {
            let joined = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{sas}"),
                _ => sas.clone(),
            };
            url.set_query(Some(&joined));
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).header("x-ms-version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BlobError> {
        let response = request
            .send()
            .await
            .map_err(|e| BlobError::new(format!("request failed: {e}")))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> BlobError {
    let status = response.status();
    let code = response
        .headers()
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.trim())
    };
    BlobError { code, message }
}

fn public_access_header(level: PublicAccessLevel) -> Option<&'static str> {
    match level {
        PublicAccessLevel::Private => None,
        PublicAccessLevel::Blob => Some("blob"),
        PublicAccessLevel::Container => Some("container"),
    }
}

#[async_trait]
impl BlobTransport for AzureBlobClient {
    async fn create_container_if_not_exists(
        &self,
        container: &str,
        options: &ContainerOptions,
    ) -> Result<(), BlobError> {
        tracing::info!(container, "Creating container if missing");
        let url = self.url(container, None, &[("restype", "container")])?;
        let mut request = self.request(Method::PUT, url).header("content-length", "0");
        if let Some(level) = public_access_header(options.public_access_level) {
            request = request.header("x-ms-blob-public-access", level);
        }

        match self.send(request).await {
            Ok(_) => {
                tracing::info!(container, "Container created");
                Ok(())
            }
            Err(e) if e.is(CONTAINER_ALREADY_EXISTS) => {
                tracing::info!(container, "Container already exists");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = ?e, container, "Failed to create container");
                Err(e)
            }
        }
    }

    async fn list_all_with_prefix(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobEntry>, BlobError> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut query = vec![("restype", "container"), ("comp", "list"), ("prefix", prefix)];
            if let Some(marker) = marker.as_deref() {
                query.push(("marker", marker));
            }
            let url = self.url(container, None, &query)?;
            let response = self.send(self.request(Method::GET, url)).await?;
            let body = response
                .text()
                .await
                .map_err(|e| BlobError::new(format!("failed to read listing: {e}")))?;

            let (page, next) = match parse_listing(&body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::error!(error = ?e, container, prefix, "Failed to parse blob listing");
                    return Err(e);
                }
            };
            tracing::debug!(container, prefix, page = page.len(), more = next.is_some(), "Listed blob page");
            entries.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        tracing::info!(container, prefix, count = entries.len(), "Listed blobs");
        Ok(entries)
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<(), BlobError> {
        tracing::info!(container, blob = name, "Deleting blob");
        let url = self.url(container, Some(name), &[])?;
        match self.send(self.request(Method::DELETE, url)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(error = ?e, container, blob = name, "Failed to delete blob");
                Err(e)
            }
        }
    }

    async fn upload_local_file(
        &self,
        container: &str,
        dest_key: &str,
        local_path: &Path,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobError> {
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| BlobError::new(format!("failed to read {}: {e}", local_path.display())))?;
        tracing::info!(container, key = dest_key, size = body.len(), "Uploading blob");

        let url = self.url(container, Some(dest_key), &[])?;
        let mut request = self
            .request(Method::PUT, url)
            .header("x-ms-blob-type", "BlockBlob");
        let settings = [
            ("x-ms-blob-cache-control", &metadata.cache_control),
            ("x-ms-blob-content-type", &metadata.content_type),
            ("x-ms-blob-content-encoding", &metadata.content_encoding),
            ("x-ms-blob-content-language", &metadata.content_language),
            ("x-ms-blob-content-disposition", &metadata.content_disposition),
        ];
        for (header, value) in settings {
            if let Some(value) = value {
                request = request.header(header, value.as_str());
            }
        }
        for (key, value) in &metadata.user {
            request = request.header(format!("x-ms-meta-{key}"), value.as_str());
        }

        match self.send(request.body(body)).await {
            Ok(_) => {
                tracing::info!(container, key = dest_key, "Uploaded blob");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = ?e, container, key = dest_key, "Failed to upload blob");
                Err(e)
            }
        }
    }
}
