//! S3-compatible ObjectStore (MinIO, AWS)
//!
//! Path-style addressing with static credentials, which is what MinIO
//! expects. Every request is bounded by the configured operation timeout.

use crate::domain::ObjectStore;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Config {
    /// `host:port` or full URL; `http://` is assumed when no scheme is given
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub timeout: Duration,
}

impl S3Config {
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.endpoint.trim_end_matches('/'))
        }
    }
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "datapipe-static",
        );

        let sdk_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.timeout)
                    .build(),
            )
            .build();

        Self {
            client: Client::from_conf(sdk_config),
        }
    }
}

fn sdk_error<E, R>(context: &str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = format!("{}: {}", context, DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) => StorageError::timeout(message).with_source(err),
        _ => StorageError::unavailable(message).with_source(err),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(sdk_error(&format!("head bucket {}", bucket), err))
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let exists = err
                    .as_service_error()
                    .map(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists())
                    .unwrap_or(false);
                if exists {
                    Err(StorageError::already_exists(bucket))
                } else {
                    Err(sdk_error(&format!("create bucket {}", bucket), err))
                }
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("put {}/{}", bucket, key), e))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    return Err(StorageError::not_found(format!("{}/{}", bucket, key)));
                }
                return Err(sdk_error(&format!("get {}/{}", bucket, key), err));
            }
        };

        let data = output.body.collect().await.map_err(|e| {
            StorageError::unavailable(format!("reading {}/{}: {}", bucket, key, e)).with_source(e)
        })?;
        Ok(data.into_bytes().to_vec())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| sdk_error("list buckets", e))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> S3Config {
        S3Config {
            endpoint: endpoint.to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio123".to_string(),
            region: "us-east-1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_endpoint_url_adds_scheme() {
        assert_eq!(config("minio:9000").endpoint_url(), "http://minio:9000");
        assert_eq!(
            config("https://s3.example.com/").endpoint_url(),
            "https://s3.example.com"
        );
    }
}
