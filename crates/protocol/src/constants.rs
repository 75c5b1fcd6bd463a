use std::time::Duration;

/// Root of every Prism Central v3 endpoint.
pub const API_BASE_PATH: &str = "/api/nutanix/v3";

/// Default HTTPS port for Prism Central.
pub const DEFAULT_PRISM_PORT: u16 = 9440;

/// Checksum algorithm name announced in registration bodies and chunk headers.
///
/// The remote validates both with the same algorithm, so the two must never
/// disagree.
pub const CHECKSUM_ALGORITHM: &str = "SHA_1";

/// Chunk upload header: checksum algorithm name.
pub const HEADER_CHECKSUM_TYPE: &str = "X-Nutanix-Checksum-Type";

/// Chunk upload header: hex digest of this chunk's bytes.
pub const HEADER_CHECKSUM_BYTES: &str = "X-Nutanix-Checksum-Bytes";

/// Chunk upload header: byte length of this chunk.
pub const HEADER_CONTENT_LENGTH: &str = "X-Nutanix-Content-Length";

/// Chunk upload header: byte offset at which this chunk starts.
pub const HEADER_UPLOAD_OFFSET: &str = "X-Nutanix-Upload-Offset";

/// `api_version` sent with entity-create payloads.
pub const API_VERSION: &str = "3.1";

/// Page size used for the `*/list` endpoints.
pub const LIST_PAGE_LENGTH: u32 = 1000;

/// Project name Prism uses for its own infrastructure VMs.
pub const INTERNAL_PROJECT: &str = "_internal";

/// Default chunk size for OVA uploads: 100 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Default number of concurrent chunk uploads per item.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Default bound on one chunk PUT, from first byte sent to response.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Bound on a single JSON API request.
pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default interval between task status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound on time spent waiting for one remote task.
pub const DEFAULT_MAX_TASK_WAIT: Duration = Duration::from_secs(2 * 60 * 60);

/// Disk format requested when exporting a VM to an OVA.
pub const DEFAULT_EXPORT_DISK_FORMAT: &str = "QCOW2";

/// Entity kind for OVAs in entity references.
pub const KIND_OVA: &str = "ova";

/// Entity kind for VMs in entity references.
pub const KIND_VM: &str = "vm";
