//! Mixpanel import API destination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::retry::{with_retries, Attempt, RETRY_DELAYS_MS};
use super::{ApiBatchStream, UploadResponse, Uploader};
use crate::bulk::{BulkMode, Bulker, BulkerStream, StreamOptions};
use crate::config::MixpanelConfig;
use crate::error::{BulkerError, ErrorKind, ErrorPayload, Result};
use crate::staging::BatchFile;

pub const MIXPANEL_TYPE_ID: &str = "mixpanel";
pub const MIXPANEL_UNSUPPORTED: &str = "Only 'batch' mode is supported";

/// Marker of a 400 response that still imported the valid rows.
const PARTIAL_FAILURE_MARKER: &str = "some data points in the request failed validation";

struct MixpanelUploader {
    client: reqwest::Client,
    import_url: String,
    project_id: String,
    authorization: String,
    retry_delays_ms: Vec<u64>,
    closed: AtomicBool,
}

impl MixpanelUploader {
    fn payload(&self, table: &str) -> ErrorPayload {
        ErrorPayload::new(MIXPANEL_TYPE_ID).table("", table)
    }

    async fn attempt(&self, data: &Bytes, table: &str) -> Attempt<UploadResponse> {
        let sent = self
            .client
            .post(&self.import_url)
            .query(&[("strict", "1"), ("project_id", self.project_id.as_str())])
            .header(CONTENT_TYPE, "application/x-ndjson")
            .header(ACCEPT, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(AUTHORIZATION, &self.authorization)
            .body(data.clone())
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry(BulkerError::destination(
                    ErrorKind::Upload,
                    self.payload(table),
                    e,
                ))
            }
        };
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            200 => Attempt::Done(UploadResponse {
                status,
                body,
                warning: None,
            }),
            400 if body.contains(PARTIAL_FAILURE_MARKER) => Attempt::Done(UploadResponse {
                status,
                warning: Some(format!("partial import: {}", body)),
                body,
            }),
            500 | 502 | 503 => {
                Attempt::Retry(BulkerError::http(status, body, self.payload(table)))
            }
            _ => Attempt::Fatal(BulkerError::http(status, body, self.payload(table))),
        }
    }
}

#[async_trait]
impl Uploader for MixpanelUploader {
    fn type_id(&self) -> &str {
        MIXPANEL_TYPE_ID
    }

    fn batch_file(&self) -> BatchFile {
        BatchFile::ndjson_gzip()
    }

    async fn upload(
        &self,
        table: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BulkerError::destination_msg(
                ErrorKind::Upload,
                self.payload(table),
                "attempt to use closed Mixpanel instance",
            ));
        }
        debug!("Importing {} bytes into Mixpanel project {}", data.len(), self.project_id);
        let data = &data;
        with_retries(&self.retry_delays_ms, cancel, move |_| async move {
            tokio::select! {
                _ = cancel.cancelled() => Attempt::Fatal(BulkerError::Cancelled),
                outcome = self.attempt(data, table) => outcome,
            }
        })
        .await
    }
}

/// Imports events through `POST /import`. Only Batch mode is supported.
pub struct MixpanelBulker {
    uploader: Arc<MixpanelUploader>,
}

impl MixpanelBulker {
    pub fn new(config: &MixpanelConfig) -> Result<Self> {
        Self::with_retry_delays(config, RETRY_DELAYS_MS.to_vec())
    }

    /// Same as [`MixpanelBulker::new`] with a custom retry schedule.
    pub fn with_retry_delays(config: &MixpanelConfig, retry_delays_ms: Vec<u64>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BulkerError::Config(format!("failed to build HTTP client: {}", e)))?;
        let credentials = format!(
            "{}:{}",
            config.service_account_username, config.service_account_password
        );
        Ok(Self {
            uploader: Arc::new(MixpanelUploader {
                client,
                import_url: format!("{}/import", config.api_url.trim_end_matches('/')),
                project_id: config.project_id.clone(),
                authorization: format!("Basic {}", BASE64.encode(credentials)),
                retry_delays_ms,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

#[async_trait]
impl Bulker for MixpanelBulker {
    fn type_id(&self) -> &str {
        MIXPANEL_TYPE_ID
    }

    async fn create_stream(
        &self,
        id: &str,
        table: &str,
        mode: BulkMode,
        options: StreamOptions,
    ) -> Result<Box<dyn BulkerStream>> {
        if self.uploader.closed.load(Ordering::SeqCst) {
            return Err(BulkerError::StreamClosed(format!(
                "{} bulker is closed",
                MIXPANEL_TYPE_ID
            )));
        }
        match mode {
            BulkMode::Batch => Ok(Box::new(ApiBatchStream::new(
                self.uploader.clone(),
                id,
                table,
                options,
            ))),
            BulkMode::Stream | BulkMode::ReplaceTable | BulkMode::ReplacePartition => Err(
                BulkerError::unsupported_mode(MIXPANEL_TYPE_ID, mode, MIXPANEL_UNSUPPORTED),
            ),
        }
    }

    async fn close(&self) -> Result<()> {
        self.uploader.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::StreamStatus;
    use crate::core::Object;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> MixpanelConfig {
        MixpanelConfig {
            project_id: "42".to_string(),
            service_account_username: "svc".to_string(),
            service_account_password: "pw".to_string(),
            api_url: server.uri(),
            timeout_secs: 5,
        }
    }

    fn bulker(server: &MockServer) -> MixpanelBulker {
        MixpanelBulker::with_retry_delays(&config(server), vec![0; 5]).unwrap()
    }

    fn event(name: &str) -> Object {
        match json!({"event": name, "properties": {"distinct_id": "u1"}}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    async fn load(bulker: &MixpanelBulker, events: &[&str]) -> Result<crate::bulk::State> {
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await?;
        for name in events {
            stream.consume(event(name)).await?;
        }
        stream.complete().await
    }

    #[tokio::test]
    async fn test_import_sends_gzip_ndjson() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/import"))
            .and(query_param("strict", "1"))
            .and(query_param("project_id", "42"))
            .and(header("content-type", "application/x-ndjson"))
            .and(header("accept", "application/json"))
            .and(header("content-encoding", "gzip"))
            .and(header("authorization", "Basic c3ZjOnB3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"code\":200}"))
            .expect(1)
            .mount(&server)
            .await;

        let state = load(&bulker(&server), &["signup", "login"]).await.unwrap();
        assert_eq!(state.status, StreamStatus::Completed);
        assert_eq!(state.successful_rows, 2);

        let requests = server.received_requests().await.unwrap();
        let mut body = String::new();
        GzDecoder::new(&requests[0].body[..])
            .read_to_string(&mut body)
            .unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"signup\""));
    }

    #[tokio::test]
    async fn test_partial_validation_failure_is_a_warning() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "{\"error\":\"some data points in the request failed validation\"}",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let state = load(&bulker(&server), &["signup"]).await.unwrap();
        assert_eq!(state.status, StreamStatus::Completed);
        assert_eq!(state.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid project"))
            .expect(1)
            .mount(&server)
            .await;

        let err = load(&bulker(&server), &["signup"]).await.unwrap_err();
        assert!(matches!(err, BulkerError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(5)
            .mount(&server)
            .await;

        let err = load(&bulker(&server), &["signup"]).await.unwrap_err();
        assert!(matches!(err, BulkerError::Http { status: 503, .. }));
        let payload = err.payload().unwrap();
        assert_eq!(payload.destination, MIXPANEL_TYPE_ID);
        assert_eq!(payload.table.as_deref(), Some("events"));
        assert!(err.to_string().contains("destination=mixpanel table=events"));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let state = load(&bulker(&server), &["signup"]).await.unwrap();
        assert_eq!(state.successful_rows, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let state = load(&bulker(&server), &[]).await.unwrap();
        assert_eq!(state.status, StreamStatus::Completed);
        assert_eq!(state.successful_rows, 0);
    }

    #[tokio::test]
    async fn test_only_batch_mode_is_supported() {
        let server = MockServer::start().await;
        let bulker = bulker(&server);
        for mode in [BulkMode::Stream, BulkMode::ReplaceTable, BulkMode::ReplacePartition] {
            let err = bulker
                .create_stream("s1", "events", mode, StreamOptions::new())
                .await
                .err()
                .unwrap();
            assert!(err.to_string().contains(MIXPANEL_UNSUPPORTED));
        }
    }

    #[tokio::test]
    async fn test_closed_instance_rejects_uploads() {
        let server = MockServer::start().await;
        let bulker = bulker(&server);
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(event("signup")).await.unwrap();
        bulker.close().await.unwrap();

        let err = stream.complete().await.unwrap_err();
        assert!(err.to_string().contains("attempt to use closed Mixpanel instance"));
        assert_eq!(stream.state().status, StreamStatus::Failed);
        assert!(matches!(
            bulker
                .create_stream("s2", "events", BulkMode::Batch, StreamOptions::new())
                .await,
            Err(BulkerError::StreamClosed(_))
        ));
    }
}
