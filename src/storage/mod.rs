//! Object storage for submission images (`/storage/v1` endpoints).

use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

/// Upload limit for a single image.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Please select an image file")]
    NotAnImage,
    #[error("Image must be less than 5MB")]
    TooLarge,
    #[error("storage rejected upload ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("storage unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid storage url: {0}")]
    Url(#[from] url::ParseError),
}

impl StorageError {
    /// Errors caused by the upload itself rather than the storage backend.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::NotAnImage | Self::TooLarge)
    }
}

/// An image ready for upload.
#[derive(Debug)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// # Errors
    /// Returns an error if the payload is not an image or exceeds [`MAX_IMAGE_BYTES`].
    pub fn validate(&self) -> Result<(), StorageError> {
        if !self.content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(StorageError::NotAnImage);
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(StorageError::TooLarge);
        }
        Ok(())
    }

    /// Extension from the file name, else from the content subtype.
    #[must_use]
    pub fn extension(&self) -> String {
        let from_name = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.trim())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

        let ext = from_name.unwrap_or_else(|| {
            let subtype = self
                .content_type
                .split_once('/')
                .map_or("bin", |(_, subtype)| subtype);
            match subtype.split(';').next().map(str::trim) {
                Some("jpeg") => "jpg",
                Some("svg+xml") => "svg",
                Some(other) if !other.is_empty() => other,
                _ => "bin",
            }
        });
        ext.to_ascii_lowercase()
    }
}

/// Object key for an upload: `<auth_id>/<unix_millis>.<ext>`.
#[must_use]
pub fn object_path(auth_id: Uuid, unix_millis: u128, extension: &str) -> String {
    format!("{auth_id}/{unix_millis}.{extension}")
}

pub struct ObjectStorage {
    client: Client,
    storage_url: Url,
    anon_key: SecretString,
    bucket: String,
}

impl ObjectStorage {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the URL is invalid.
    pub fn new(
        backend_url: &Url,
        anon_key: SecretString,
        bucket: String,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;

        let mut base = backend_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            storage_url: base.join("storage/v1/")?,
            anon_key,
            bucket,
        })
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Public URL of an object in the bucket.
    ///
    /// # Errors
    /// Returns an error if the path does not form a valid URL.
    pub fn public_url(&self, path: &str) -> Result<Url, StorageError> {
        Ok(self
            .storage_url
            .join(&format!("object/public/{}/{path}", self.bucket))?)
    }

    /// Upload on behalf of the signed-in user and return the public URL.
    ///
    /// # Errors
    /// Returns an error if the image is invalid or the backend refuses it.
    #[instrument(skip(self, access_token, image), fields(bucket = %self.bucket, size = image.bytes.len()))]
    pub async fn upload(
        &self,
        access_token: &SecretString,
        path: &str,
        image: ImageUpload,
    ) -> Result<Url, StorageError> {
        image.validate()?;

        let url = self
            .storage_url
            .join(&format!("object/{}/{path}", self.bucket))?;
        let response = self
            .client
            .post(url)
            .header("apikey", self.anon_key.expose_secret())
            .header(
                AUTHORIZATION,
                format!("Bearer {}", access_token.expose_secret()),
            )
            .header(CONTENT_TYPE, image.content_type)
            .header("x-upsert", "false")
            .body(image.bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = ["message", "error"]
                .iter()
                .find_map(|field| body.get(field).and_then(Value::as_str))
                .unwrap_or("upload failed")
                .to_string();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(path, "image uploaded");
        self.public_url(path)
    }
}
