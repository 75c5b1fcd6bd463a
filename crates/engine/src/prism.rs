//! Engine seams backed by the Prism Central HTTP client.

use std::path::Path;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use prism_ova_client::{Client, Error};
use prism_ova_protocol::constants::KIND_OVA;
use prism_ova_protocol::{
    Checksum, EntityCreateRequest, OvaCreateRequest, TaskReference, TaskResponse, VmExportRequest,
};
use prism_ova_transfer::ChunkRange;

use crate::client::{CreatedEntity, ExportClient, TransferClient, VmSpecSource};
use crate::error::TransferError;

impl From<Error> for TransferError {
    fn from(e: Error) -> Self {
        if e.is_transport() {
            return Self::Transfer(e.to_string());
        }
        match e {
            Error::Api { status, body } => Self::RemoteRejected(format!("HTTP {status}: {body}")),
            Error::Json(e) => Self::RemoteRejected(format!("malformed response: {e}")),
            Error::Io(e) => Self::Io(e.to_string()),
            Error::InvalidCredentials(msg) => Self::InvalidConfiguration(msg),
            Error::Http(e) => Self::Transfer(e.to_string()),
        }
    }
}

fn task_uuid(reference: TaskReference, what: &str) -> Result<String, TransferError> {
    reference
        .task_uuid
        .ok_or_else(|| TransferError::RemoteRejected(format!("{what} response carried no task id")))
}

impl TransferClient for Client {
    fn register_entity<'a>(
        &'a self,
        name: &'a str,
        size_bytes: u64,
        checksum: &'a str,
    ) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(async move {
            let req = OvaCreateRequest {
                name: name.to_string(),
                upload_length: size_bytes,
                checksum: Checksum::sha1(checksum),
            };
            task_uuid(self.create_ova(&req).await?, "OVA create")
        })
    }

    fn task_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> BoxFuture<'a, Result<TaskResponse, TransferError>> {
        Box::pin(async move { Ok(self.get_task(task_id).await?) })
    }

    fn put_chunk<'a>(
        &'a self,
        entity_id: &'a str,
        range: ChunkRange,
        checksum: &'a str,
        data: Bytes,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            // Any chunk failure is a transfer failure; resending a range is safe.
            self.put_ova_chunk(entity_id, range.offset, checksum, data)
                .await
                .map_err(|e| TransferError::Transfer(e.to_string()))
        })
    }

    fn concatenate<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(async move { task_uuid(self.concatenate_ova(entity_id).await?, "concatenate") })
    }

    fn create_dependent_entity<'a>(
        &'a self,
        payload: &'a EntityCreateRequest,
    ) -> BoxFuture<'a, Result<CreatedEntity, TransferError>> {
        Box::pin(async move {
            let created = self.create_vm(payload).await?;
            let task_id = created.status.execution_context.task_uuid.ok_or_else(|| {
                TransferError::RemoteRejected("VM create response carried no task id".into())
            })?;
            Ok(CreatedEntity {
                entity_id: created.metadata.uuid,
                task_id,
            })
        })
    }
}

impl ExportClient for Client {
    fn submit_export<'a>(
        &'a self,
        vm_id: &'a str,
        ova_name: &'a str,
        disk_format: &'a str,
    ) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(async move {
            let req = VmExportRequest {
                disk_file_format: disk_format.to_string(),
                name: ova_name.to_string(),
            };
            task_uuid(self.export_vm(vm_id, &req).await?, "VM export")
        })
    }

    fn find_artifact<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TransferError>> {
        Box::pin(async move {
            let ovas = self.list_ovas().await?;
            Ok(ovas
                .into_iter()
                .find(|o| o.name() == name)
                .map(|o| o.uuid().to_string()))
        })
    }

    fn download_artifact<'a>(
        &'a self,
        entity_id: &'a str,
        dest: &'a Path,
        on_bytes: &'a (dyn Fn(u64, Option<u64>) + Send + Sync),
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        Box::pin(async move {
            Ok(self
                .download_ova(entity_id, dest, |written, total| on_bytes(written, total))
                .await?)
        })
    }
}

impl VmSpecSource for Client {
    fn artifact_vm_spec<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> BoxFuture<'a, Result<serde_json::Value, TransferError>> {
        Box::pin(async move {
            self.get_ova_vm_spec(entity_id).await.map_err(|e| match e {
                Error::Api { status: 404, .. } => TransferError::RemoteRejected(format!(
                    "{KIND_OVA} {entity_id} has no VM spec"
                )),
                other => other.into(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_are_remote_rejections() {
        let e: TransferError = Error::Api {
            status: 409,
            body: "duplicate name".into(),
        }
        .into();
        assert_eq!(
            e,
            TransferError::RemoteRejected("HTTP 409: duplicate name".into())
        );
        assert!(!e.is_retryable());
    }

    #[test]
    fn malformed_json_is_remote_rejection() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e: TransferError = Error::Json(json).into();
        assert!(matches!(e, TransferError::RemoteRejected(m) if m.starts_with("malformed")));
    }

    #[test]
    fn credentials_error_is_configuration() {
        let e: TransferError = Error::InvalidCredentials("empty username".into()).into();
        assert!(matches!(e, TransferError::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_task_id_is_rejected() {
        let err = task_uuid(TaskReference { task_uuid: None }, "OVA create").unwrap_err();
        assert!(matches!(err, TransferError::RemoteRejected(_)));
        assert_eq!(
            task_uuid(
                TaskReference {
                    task_uuid: Some("t-1".into())
                },
                "x"
            )
            .unwrap(),
            "t-1"
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_retryable() {
        // Port 1 on loopback refuses connections.
        let client = Client::new("http://127.0.0.1:1", "admin", "pw", true).unwrap();
        let err = client
            .put_chunk(
                "ova-1",
                ChunkRange { offset: 0, length: 1 },
                "00",
                Bytes::from_static(b"x"),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");

        let err = TransferClient::task_status(&client, "t-1").await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }
}
