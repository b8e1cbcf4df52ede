use std::sync::Arc;
use std::time::Instant;

use medrec_contracts::fingerprint::fingerprint;
use medrec_contracts::{UploadOutcome, UploadResult, UploadSlot};
use tokio::task::JoinSet;
use tracing::Instrument;

mod pinata;

pub use pinata::{AttachmentFile, ContentStore, PinataClient, PinataConfig, PinningError};

/// Pushes a batch of attachments to the content store. Individual failures
/// never fail the batch; they show up as empty slots in the result.
pub struct UploadCoordinator<S: ContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> Clone for UploadCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ContentStore> UploadCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Uploads every file concurrently. The result has one slot per input
    /// file, in input order, whatever order the uploads complete in.
    pub async fn upload_batch(&self, files: Vec<AttachmentFile>) -> UploadResult {
        let span = tracing::info_span!(
            "upload.batch",
            files = files.len(),
            uploaded = tracing::field::Empty,
            failed = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let started = Instant::now();
            let mut slots = files
                .iter()
                .map(|file| UploadSlot {
                    file_ref: file.name.clone(),
                    content_id: None,
                })
                .collect::<Vec<_>>();

            let mut tasks = JoinSet::new();
            for (index, file) in files.into_iter().enumerate() {
                if file.is_absent() {
                    continue;
                }
                let store = self.store.clone();
                let file_span = tracing::info_span!(
                    "upload.file",
                    index,
                    file = %fingerprint(&file.name),
                    bytes = file.bytes.len(),
                    latency_ms = tracing::field::Empty,
                    outcome = tracing::field::Empty,
                );
                tasks.spawn(
                    async move {
                        let started = Instant::now();
                        let result = store.pin(file).await;

                        let latency_ms = started.elapsed().as_millis() as u64;
                        tracing::Span::current().record("latency_ms", latency_ms);

                        match result {
                            Ok(content_id) => {
                                tracing::Span::current().record("outcome", "ok");
                                (index, Some(content_id))
                            }
                            Err(err) => {
                                let outcome = match err {
                                    PinningError::Timeout => "timeout",
                                    _ => "error",
                                };
                                tracing::Span::current().record("outcome", outcome);
                                tracing::warn!(error = %err, "upload.file_failed");
                                (index, None)
                            }
                        }
                    }
                    .instrument(file_span),
                );
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, content_id)) => slots[index].content_id = content_id,
                    // The slot stays empty.
                    Err(err) => tracing::warn!(error = %err, "upload.task_aborted"),
                }
            }

            let result = UploadResult { slots };
            let latency_ms = started.elapsed().as_millis() as u64;
            let span = tracing::Span::current();
            span.record("latency_ms", latency_ms);
            span.record("uploaded", result.success_count());
            span.record("failed", result.failed_count());
            span.record(
                "outcome",
                match result.outcome() {
                    UploadOutcome::Empty | UploadOutcome::Complete { .. } => "ok",
                    UploadOutcome::Partial { .. } => "partial",
                    UploadOutcome::AllFailed { .. } => "error",
                },
            );
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    const KEY: &str = "test-key";
    const SECRET: &str = "test-secret";

    fn uploaded_name(body: &[u8]) -> String {
        let body = String::from_utf8_lossy(body);
        body.split("filename=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default()
            .to_string()
    }

    async fn pin_handler(headers: HeaderMap, body: Bytes) -> Response {
        let key_ok = headers.get("pinata_api_key").and_then(|v| v.to_str().ok()) == Some(KEY);
        let secret_ok =
            headers.get("pinata_secret_api_key").and_then(|v| v.to_str().ok()) == Some(SECRET);
        if !key_ok || !secret_ok {
            return StatusCode::UNAUTHORIZED.into_response();
        }

        let name = uploaded_name(&body);
        if name.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        if name.starts_with("hang") {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        if name.starts_with("fail") {
            return (StatusCode::TOO_MANY_REQUESTS, "quota exceeded").into_response();
        }
        if name.starts_with("garbled") {
            return Json(serde_json::json!({"unexpected": true})).into_response();
        }

        Json(serde_json::json!({
            "IpfsHash": format!("Q-{}", name),
            "PinSize": body.len(),
        }))
        .into_response()
    }

    async fn spawn_pinata() -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let app = Router::new().route("/pinning/pinFileToIPFS", post(pin_handler));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().expect("local_addr should succeed");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        (addr, shutdown_tx, handle)
    }

    fn coordinator(addr: SocketAddr, api_key: &str, timeout: Duration) -> UploadCoordinator<PinataClient> {
        let client = PinataClient::new(PinataConfig {
            upload_url: format!("http://{}/pinning/pinFileToIPFS", addr),
            api_key: api_key.to_string(),
            api_secret: SECRET.to_string(),
            timeout,
        })
        .expect("client should build");
        UploadCoordinator::new(client)
    }

    fn file(name: &str) -> AttachmentFile {
        AttachmentFile::new(name, format!("contents of {}", name).into_bytes())
    }

    fn content_ids(result: &UploadResult) -> Vec<Option<&str>> {
        result
            .slots
            .iter()
            .map(|slot| slot.content_id.as_deref())
            .collect()
    }

    #[tokio::test]
    async fn batch_keeps_input_order_and_length_with_mixed_failures() {
        let (addr, shutdown, task) = spawn_pinata().await;
        let uploads = coordinator(addr, KEY, Duration::from_secs(2));

        let result = uploads
            .upload_batch(vec![
                file("slow-scan.pdf"),
                file("fail-xray.png"),
                file("notes.txt").with_content_type("text/plain"),
                AttachmentFile::new("", Vec::new()),
            ])
            .await;

        shutdown.send(()).ok();
        let _ = task.await;
        assert_eq!(result.len(), 4);
        assert_eq!(
            content_ids(&result),
            vec![Some("Q-slow-scan.pdf"), None, Some("Q-notes.txt"), None]
        );
        assert_eq!(result.slots[1].file_ref, "fail-xray.png");
        assert_eq!(
            result.outcome(),
            UploadOutcome::Partial {
                uploaded: 2,
                failed: 2
            }
        );
    }

    #[tokio::test]
    async fn every_failure_mode_collapses_to_an_empty_slot() {
        let (addr, shutdown, task) = spawn_pinata().await;
        let uploads = coordinator(addr, KEY, Duration::from_millis(300));

        let result = uploads
            .upload_batch(vec![file("fail-1"), file("garbled-2"), file("hang-3")])
            .await;

        shutdown.send(()).ok();
        let _ = task.await;
        assert_eq!(content_ids(&result), vec![None, None, None]);
        assert_eq!(result.outcome(), UploadOutcome::AllFailed { failed: 3 });
        assert!(result.attachment_ids().is_err());
    }

    #[tokio::test]
    async fn rejected_credentials_fail_every_slot() {
        let (addr, shutdown, task) = spawn_pinata().await;
        let uploads = coordinator(addr, "wrong-key", Duration::from_secs(2));

        let result = uploads.upload_batch(vec![file("a"), file("b")]).await;

        shutdown.send(()).ok();
        let _ = task.await;
        assert_eq!(result.success_count(), 0);
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_empty_result() {
        let (addr, shutdown, task) = spawn_pinata().await;
        let uploads = coordinator(addr, KEY, Duration::from_secs(2));

        let result = uploads.upload_batch(Vec::new()).await;

        shutdown.send(()).ok();
        let _ = task.await;
        assert!(result.is_empty());
        assert_eq!(result.outcome(), UploadOutcome::Empty);
    }
}
