//! Prism Central v3 API client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use prism_ova_protocol::constants::{
    API_BASE_PATH, API_REQUEST_TIMEOUT, CHECKSUM_ALGORITHM, DEFAULT_PRISM_PORT, HEADER_CHECKSUM_BYTES,
    HEADER_CHECKSUM_TYPE, HEADER_CONTENT_LENGTH, HEADER_UPLOAD_OFFSET, KIND_VM, LIST_PAGE_LENGTH,
};
use prism_ova_protocol::{
    EntityCreateRequest, EntityCreateResponse, ListRequest, ListResponse, NamedEntity,
    OvaCreateRequest, TaskReference, TaskResponse, VmEntity, VmExportRequest,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest silence tolerated while reading any response body.
const READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Errors from the Prism client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

impl Error {
    /// `true` for connection-level failures (no HTTP status was received).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(e) if e.status().is_none())
    }
}

/// Prism Central v3 client.
///
/// Cheap to share by reference; holds one connection pool.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl Client {
    /// Creates a client for `host` (`name`, `name:port` or a full URL).
    ///
    /// `insecure_tls` accepts self-signed certificates, which Prism ships with.
    pub fn new(
        host: &str,
        username: &str,
        password: &str,
        insecure_tls: bool,
    ) -> Result<Self, Error> {
        if host.trim().is_empty() {
            return Err(Error::InvalidCredentials("empty Prism host".into()));
        }
        if username.is_empty() {
            return Err(Error::InvalidCredentials("empty username".into()));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url_for(host),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Base URL every endpoint is appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .request(Method::POST, endpoint)
            .timeout(API_REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    async fn get_json<R: DeserializeOwned>(&self, endpoint: &str) -> Result<R, Error> {
        let resp = self
            .request(Method::GET, endpoint)
            .timeout(API_REQUEST_TIMEOUT)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    // -----------------------------------------------------------------------
    // OVA upload
    // -----------------------------------------------------------------------

    /// Registers a new OVA upload. Returns the registration task reference.
    pub async fn create_ova(&self, req: &OvaCreateRequest) -> Result<TaskReference, Error> {
        debug!(name = %req.name, upload_length = req.upload_length, "registering OVA");
        self.post_json("/ovas", req).await
    }

    /// Uploads one chunk of an OVA's bytes at `offset`.
    ///
    /// No overall deadline is applied here; callers bound each attempt.
    pub async fn put_ova_chunk(
        &self,
        ova_uuid: &str,
        offset: u64,
        checksum: &str,
        data: Bytes,
    ) -> Result<(), Error> {
        let length = data.len();
        let resp = self
            .request(Method::PUT, &format!("/ovas/{ova_uuid}/chunks"))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(HEADER_CHECKSUM_TYPE, CHECKSUM_ALGORITHM)
            .header(HEADER_CHECKSUM_BYTES, checksum)
            .header(HEADER_CONTENT_LENGTH, length.to_string())
            .header(HEADER_UPLOAD_OFFSET, offset.to_string())
            .body(data)
            .send()
            .await?;
        check(resp).await?;
        debug!(ova = %ova_uuid, offset, length, "chunk accepted");
        Ok(())
    }

    /// Asks Prism to assemble and validate all uploaded chunks.
    pub async fn concatenate_ova(&self, ova_uuid: &str) -> Result<TaskReference, Error> {
        let resp = self
            .request(Method::POST, &format!("/ovas/{ova_uuid}/chunks/concatenate"))
            .timeout(API_REQUEST_TIMEOUT)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    /// Fetches the VM spec embedded in an uploaded OVA.
    pub async fn get_ova_vm_spec(&self, ova_uuid: &str) -> Result<serde_json::Value, Error> {
        self.get_json(&format!("/ovas/{ova_uuid}/vm_spec")).await
    }

    /// Streams an OVA's file to `dest`, reporting bytes written so far.
    ///
    /// Data lands in a `.part` sibling first and is renamed on success. The
    /// partial file is removed if the download fails or is dropped.
    pub async fn download_ova(
        &self,
        ova_uuid: &str,
        dest: &Path,
        mut on_bytes: impl FnMut(u64, Option<u64>),
    ) -> Result<u64, Error> {
        let mut resp = check(
            self.request(Method::GET, &format!("/ovas/{ova_uuid}/file"))
                .send()
                .await?,
        )
        .await?;
        let total = resp.content_length();

        let part = PartFile::new(dest.with_extension("ova.part"));
        let mut file = tokio::fs::File::create(&part.path).await?;
        let mut written = 0u64;
        while let Some(bytes) = resp.chunk().await? {
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
            on_bytes(written, total);
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part.path, dest).await?;
        part.keep();

        debug!(ova = %ova_uuid, bytes = written, dest = %dest.display(), "OVA downloaded");
        Ok(written)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Returns the current state of an asynchronous task.
    pub async fn get_task(&self, task_uuid: &str) -> Result<TaskResponse, Error> {
        self.get_json(&format!("/tasks/{task_uuid}")).await
    }

    // -----------------------------------------------------------------------
    // VMs
    // -----------------------------------------------------------------------

    /// Submits a VM create request.
    pub async fn create_vm(&self, req: &EntityCreateRequest) -> Result<EntityCreateResponse, Error> {
        self.post_json("/vms", req).await
    }

    /// Starts exporting a VM to an OVA.
    pub async fn export_vm(
        &self,
        vm_uuid: &str,
        req: &VmExportRequest,
    ) -> Result<TaskReference, Error> {
        self.post_json(&format!("/vms/{vm_uuid}/export"), req).await
    }

    /// Lists every VM visible to the user.
    pub async fn list_vms(&self) -> Result<Vec<VmEntity>, Error> {
        self.list_all("/vms/list", KIND_VM).await
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn list_subnets(&self) -> Result<Vec<NamedEntity>, Error> {
        self.list_all("/subnets/list", "subnet").await
    }

    pub async fn list_projects(&self) -> Result<Vec<NamedEntity>, Error> {
        self.list_all("/projects/list", "project").await
    }

    pub async fn list_ovas(&self) -> Result<Vec<NamedEntity>, Error> {
        self.list_all("/ovas/list", "ova").await
    }

    /// Walks every page of a `*/list` endpoint.
    async fn list_all<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        kind: &str,
    ) -> Result<Vec<T>, Error> {
        let mut out: Vec<T> = Vec::new();
        loop {
            let mut req = ListRequest::new(kind, LIST_PAGE_LENGTH);
            req.offset = out.len() as u32;
            let page: ListResponse<T> = self.post_json(endpoint, &req).await?;
            let received = page.entities.len();
            out.extend(page.entities);
            if received == 0 || out.len() as u32 >= page.metadata.total_matches {
                break;
            }
        }
        Ok(out)
    }
}

/// Removes a partial download unless [`PartFile::keep`] is called.
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Turns a host setting into the API base URL.
fn base_url_for(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let root = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else if host.contains(':') {
        format!("https://{host}")
    } else {
        format!("https://{host}:{DEFAULT_PRISM_PORT}")
    };
    format!("{root}{API_BASE_PATH}")
}

/// Maps non-2xx responses to [`Error::Api`] carrying the remote's explanation.
async fn check(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        body,
    })
}

async fn decode<R: DeserializeOwned>(resp: Response) -> Result<R, Error> {
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
