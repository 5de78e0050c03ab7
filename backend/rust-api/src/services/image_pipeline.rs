//! Background stylization of student photos.
//!
//! Registration and photo updates push a [`StylizeJob`] onto a bounded queue
//! and return immediately. A single [`ImageWorker`] drains the queue, asks the
//! configured [`ImageStylizer`] for a cartoon version and records the result on
//! the student row. Failures are logged and counted, never retried.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::StylizerSettings;
use crate::metrics::{track_db_operation, STYLIZE_JOBS_TOTAL, STYLIZE_QUEUE_DEPTH};

const STYLIZE_PROMPT: &str = "Turn this photo of a student into a 3D animated character in a \
    Pixar-like style. Keep the person's main features, with big expressive eyes and very vivid, \
    bright colours. The result should be fun and friendly. Return only the image, without any text.";

/// Photo waiting to be stylized. `photo_file` is the file name inside the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylizeJob {
    pub user_id: i64,
    pub photo_file: String,
}

#[async_trait]
pub trait ImageStylizer: Send + Sync {
    /// Returns the stylized image as PNG bytes.
    async fn stylize(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>>;
}

/// Stylizer backed by the Gemini `generateContent` REST endpoint.
pub struct GeminiStylizer {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl GeminiStylizer {
    /// `Ok(None)` when no API key is configured.
    pub fn from_settings(settings: &StylizerSettings) -> Result<Option<Self>> {
        let Some(api_key) = settings.api_key.clone() else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build stylizer HTTP client")?;

        Ok(Some(Self {
            client,
            api_key,
            url: format!(
                "{}/models/{}:generateContent",
                settings.endpoint.trim_end_matches('/'),
                settings.model
            ),
        }))
    }
}

#[async_trait]
impl ImageStylizer for GeminiStylizer {
    async fn stylize(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": STYLIZE_PROMPT },
                    {
                        "inline_data": {
                            "mime_type": mime_type,
                            "data": general_purpose::STANDARD.encode(image),
                        }
                    }
                ]
            }]
        });

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call stylization API")?;

        if !response.status().is_success() {
            anyhow::bail!("Stylization API returned status: {}", response.status());
        }

        let body: Value = response.json().await?;
        extract_inline_image(&body)
    }
}

/// First inline image of the first candidate, decoded.
fn extract_inline_image(body: &Value) -> Result<Vec<u8>> {
    let parts = body["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| anyhow!("Stylization response has no content parts"))?;

    let data = parts
        .iter()
        .find_map(|part| {
            part.get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(|inline| inline["data"].as_str())
        })
        .ok_or_else(|| anyhow!("Stylization response contains no image"))?;

    general_purpose::STANDARD
        .decode(data)
        .context("Stylized image is not valid base64")
}

/// Producer side of the stylization queue. Cheap to clone.
#[derive(Clone)]
pub struct ImageQueue {
    sender: Option<mpsc::Sender<StylizeJob>>,
}

impl ImageQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StylizeJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender: Some(sender) }, receiver)
    }

    /// Queue that accepts nothing; used when stylization is not configured.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Hands a job to the worker without waiting. Returns whether it was queued.
    pub fn enqueue(&self, job: StylizeJob) -> bool {
        let Some(sender) = &self.sender else {
            STYLIZE_JOBS_TOTAL.with_label_values(&["skipped"]).inc();
            tracing::debug!(user_id = job.user_id, "Stylization disabled, photo kept as is");
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => {
                STYLIZE_QUEUE_DEPTH.inc();
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                STYLIZE_JOBS_TOTAL.with_label_values(&["dropped"]).inc();
                tracing::warn!(user_id = job.user_id, "Stylization queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                STYLIZE_JOBS_TOTAL.with_label_values(&["dropped"]).inc();
                tracing::error!(user_id = job.user_id, "Stylization worker is gone, job dropped");
                false
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Stored(String),
    /// The student's photo changed while the job was running.
    Stale,
}

/// Consumer side of the stylization queue.
pub struct ImageWorker {
    db: PgPool,
    stylizer: Arc<dyn ImageStylizer>,
    upload_dir: PathBuf,
    receiver: mpsc::Receiver<StylizeJob>,
}

impl ImageWorker {
    pub fn new(
        db: PgPool,
        stylizer: Arc<dyn ImageStylizer>,
        upload_dir: impl Into<PathBuf>,
        receiver: mpsc::Receiver<StylizeJob>,
    ) -> Self {
        Self {
            db,
            stylizer,
            upload_dir: upload_dir.into(),
            receiver,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!("Image stylization worker started");

        while let Some(job) = self.receiver.recv().await {
            STYLIZE_QUEUE_DEPTH.dec();

            match self.process(&job).await {
                Ok(JobOutcome::Stored(file)) => {
                    STYLIZE_JOBS_TOTAL.with_label_values(&["success"]).inc();
                    tracing::info!(user_id = job.user_id, file = %file, "Stylized photo stored");
                }
                Ok(JobOutcome::Stale) => {
                    STYLIZE_JOBS_TOTAL.with_label_values(&["stale"]).inc();
                    tracing::info!(user_id = job.user_id, "Photo replaced meanwhile, result discarded");
                }
                Err(e) => {
                    STYLIZE_JOBS_TOTAL.with_label_values(&["failed"]).inc();
                    tracing::error!(user_id = job.user_id, "Stylization failed: {:#}", e);
                }
            }
        }

        tracing::info!("Image stylization worker stopped");
    }

    async fn process(&self, job: &StylizeJob) -> Result<JobOutcome> {
        let source = self.upload_dir.join(&job.photo_file);
        let image = tokio::fs::read(&source)
            .await
            .with_context(|| format!("Failed to read photo {}", source.display()))?;

        let stylized = self
            .stylizer
            .stylize(&image, mime_for(&job.photo_file))
            .await?;

        let file_name = cartoon_file_name(&job.photo_file, chrono::Utc::now().timestamp_millis());
        let target = self.upload_dir.join(&file_name);
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::write(&target, &stylized)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        // Only attach the cartoon if the photo it was made from is still current.
        let updated = track_db_operation(
            "users.set_cartoon",
            sqlx::query(
                "UPDATE users SET cartoon_image_path = $1 WHERE id = $2 AND photo_path = $3",
            )
            .bind(&file_name)
            .bind(job.user_id)
            .bind(&job.photo_file)
            .execute(&self.db),
        )
        .await
        .context("Failed to record stylized photo")?;

        if updated.rows_affected() == 0 {
            if let Err(e) = tokio::fs::remove_file(&target).await {
                tracing::warn!("Failed to remove discarded file {}: {}", target.display(), e);
            }
            return Ok(JobOutcome::Stale);
        }

        Ok(JobOutcome::Stored(file_name))
    }
}

/// `cartoon-{stem}-{millis}.png`, next to the source photo.
pub fn cartoon_file_name(photo_file: &str, millis: i64) -> String {
    let stem = Path::new(photo_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("photo");
    format!("cartoon-{}-{}.png", stem, millis)
}

fn mime_for(file: &str) -> &'static str {
    let ext = Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(user_id: i64) -> StylizeJob {
        StylizeJob {
            user_id,
            photo_file: format!("photo-{}.jpg", user_id),
        }
    }

    #[test]
    fn cartoon_name_keeps_photo_stem() {
        assert_eq!(
            cartoon_file_name("photo-1700000000000-42.jpg", 1700000000123),
            "cartoon-photo-1700000000000-42-1700000000123.png"
        );
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(mime_for("a.JPG"), "image/jpeg");
        assert_eq!(mime_for("a.webp"), "image/webp");
        assert_eq!(mime_for("a.png"), "image/png");
        assert_eq!(mime_for("noext"), "image/png");
    }

    #[test]
    fn inline_image_is_extracted_from_first_candidate() {
        let encoded = general_purpose::STANDARD.encode(b"png-bytes");
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "here you go" },
                        { "inlineData": { "mimeType": "image/png", "data": encoded } }
                    ]
                }
            }]
        });
        assert_eq!(extract_inline_image(&body).unwrap(), b"png-bytes".to_vec());
    }

    #[test]
    fn text_only_response_is_an_error() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }]
        });
        assert!(extract_inline_image(&body).is_err());
        assert!(extract_inline_image(&json!({})).is_err());
    }

    #[test]
    fn missing_api_key_disables_stylizer() {
        let settings = StylizerSettings {
            api_key: None,
            endpoint: "http://localhost".to_string(),
            model: "m".to_string(),
            timeout_secs: 1,
        };
        assert!(GeminiStylizer::from_settings(&settings).unwrap().is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (queue, mut receiver) = ImageQueue::channel(1);
        assert!(queue.enqueue(job(1)));
        assert!(!queue.enqueue(job(2)));

        assert_eq!(receiver.recv().await, Some(job(1)));
    }

    #[tokio::test]
    async fn closed_or_disabled_queue_rejects_jobs() {
        let (queue, receiver) = ImageQueue::channel(4);
        drop(receiver);
        assert!(!queue.enqueue(job(1)));

        assert!(!ImageQueue::disabled().enqueue(job(2)));
    }
}
