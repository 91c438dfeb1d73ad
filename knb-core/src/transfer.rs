//! Streamed transfer of monitor files into local files.

use crate::error::{KnbError, Result, TransferCause};
use crate::observability::metrics;
use knb_api::monitor::File as FileChunk;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Drain `stream` into the file at `path`.
///
/// The file is opened in append mode and created if absent; existing content
/// is never truncated, so repeated transfers to the same path accumulate.
/// Returns the number of bytes written by this call.
pub async fn copy_stream_to_file<S>(path: &Path, mut stream: S) -> Result<u64>
where
    S: Stream<Item = std::result::Result<FileChunk, Status>> + Unpin,
{
    let transfer_err = |cause: TransferCause| KnbError::Transfer {
        path: path.to_path_buf(),
        source: cause,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| transfer_err(e.into()))?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|status| transfer_err(status.into()))?;
        file.write_all(&chunk.data).await.map_err(|e| transfer_err(e.into()))?;
        written += chunk.data.len() as u64;
    }
    file.flush().await.map_err(|e| transfer_err(e.into()))?;

    metrics::record_transfer_bytes(written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &[u8]) -> std::result::Result<FileChunk, Status> {
        Ok(FileChunk { data: data.to_vec() })
    }

    #[tokio::test]
    async fn test_clean_end_writes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-a.sysinfo");

        let stream = tokio_stream::iter(vec![chunk(b"kernel: 6.1\n"), chunk(b"cpus: 8\n")]);
        let written = copy_stream_to_file(&path, stream).await.unwrap();

        assert_eq!(written, 20);
        assert_eq!(std::fs::read(&path).unwrap(), b"kernel: 6.1\ncpus: 8\n");
    }

    #[tokio::test]
    async fn test_empty_stream_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");

        let stream = tokio_stream::iter(Vec::<std::result::Result<FileChunk, Status>>::new());
        assert_eq!(copy_stream_to_file(&path, stream).await.unwrap(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_receive_error_keeps_partial_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf-node-a.tar.bz2");

        let stream = tokio_stream::iter(vec![
            chunk(b"abc"),
            chunk(b"def"),
            Err(Status::unavailable("connection reset")),
            chunk(b"never"),
        ]);
        let err = copy_stream_to_file(&path, stream).await.unwrap_err();

        match &err {
            KnbError::Transfer { path: p, source: TransferCause::Receive(status) } => {
                assert_eq!(p, &path);
                assert_eq!(status.code(), tonic::Code::Unavailable);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_retry_after_partial_failure_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-a.sysinfo");

        let failing =
            tokio_stream::iter(vec![chunk(b"abc"), Err(Status::internal("agent crashed"))]);
        assert!(copy_stream_to_file(&path, failing).await.is_err());

        let full = tokio_stream::iter(vec![chunk(b"abc"), chunk(b"def")]);
        assert_eq!(copy_stream_to_file(&path, full).await.unwrap(), 6);

        // No truncation: the partial pass stays in front of the full one.
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content.len(), 3 + 6);
        assert!(content.ends_with(b"abcdef"));
        assert_eq!(content, b"abcabcdef");
    }

    #[tokio::test]
    async fn test_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-run").join("perf-node-a.tar.bz2");

        let stream = tokio_stream::iter(vec![chunk(b"abc")]);
        let err = copy_stream_to_file(&path, stream).await.unwrap_err();
        match &err {
            KnbError::Transfer { path: p, source: TransferCause::Write(io) } => {
                assert_eq!(p, &path);
                assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!path.exists());
    }
}
