//! Client for the downstream picture-processing API.
//!
//! After an upload succeeds the service POSTs a JSON description of the image
//! so the processing side can pick it up. The returned status is reported to
//! the caller and logged; it never triggers a retry.

use crate::config::NotifyConfig;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur while notifying the processing API.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("Notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Everything known about one uploaded image. Built after a successful
/// upload and consumed by the notification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub event_id: String,
    pub image_name: String,
    pub mime_type: String,
    /// Version id assigned by object storage
    pub object_store_id: String,
    pub path: String,
    pub user_id: String,
    pub width: u32,
    pub height: u32,
}

/// Wire body of the uploaded-image notification.
#[derive(Debug, Serialize)]
pub struct UploadNotification<'a> {
    pub event_id: &'a str,
    pub image_name: &'a str,
    pub mime_type: &'a str,
    pub b2_id: &'a str,
    pub path: &'a str,
    pub user_id: &'a str,
    pub height: u32,
    pub width: u32,
    pub collection_ids: &'a [i64],
}

impl<'a> UploadNotification<'a> {
    pub fn new(record: &'a UploadRecord, collection_ids: &'a [i64]) -> Self {
        Self {
            event_id: &record.event_id,
            image_name: &record.image_name,
            mime_type: &record.mime_type,
            b2_id: &record.object_store_id,
            path: &record.path,
            user_id: &record.user_id,
            height: record.height,
            width: record.width,
            collection_ids,
        }
    }
}

/// Tells the processing API that a new image is available.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the notification and return the HTTP status code received.
    async fn notify(&self, record: &UploadRecord) -> Result<u16, NotifyError>;
}

/// [`Notifier`] that POSTs JSON over HTTP with a static Basic credential.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    api_key: String,
    collection_ids: Vec<i64>,
}

impl HttpNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(NotifyError::Client)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            collection_ids: config.collection_ids.clone(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, record), fields(image = %record.image_name))]
    async fn notify(&self, record: &UploadRecord) -> Result<u16, NotifyError> {
        let body = UploadNotification::new(record, &self.collection_ids);
        debug!(url = %self.url, "Sending upload notification");

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Basic {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        // Drain the body so the connection can be reused.
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            info!(status = status.as_u16(), "Processing API accepted notification");
        } else {
            warn!(
                status = status.as_u16(),
                body = %text,
                "Processing API rejected notification"
            );
        }

        Ok(status.as_u16())
    }
}
