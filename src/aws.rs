//! AWS client construction and resource provisioning.
//!
//! Clients are built from one shared configuration: region, optional
//! endpoint override (LocalStack/MinIO), and optional static credentials
//! falling back to the default provider chain. Provisioning is idempotent
//! create-if-absent for both queues and the bucket; failures here are
//! startup failures and the process exits non-zero.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;

/// Errors that can occur while provisioning queue and bucket resources.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to create queue '{name}': {message}")]
    Queue { name: String, message: String },

    #[error("failed to create bucket '{name}': {message}")]
    Bucket { name: String, message: String },

    #[error("cannot derive a queue name from URL '{0}'")]
    QueueName(String),
}

/// What provisioning found or created, one flag per resource.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionSummary {
    pub queue_url: String,
    pub queue_created: bool,
    pub dead_letter_queue_url: String,
    pub dead_letter_queue_created: bool,
    pub bucket: String,
    pub bucket_created: bool,
}

/// Builds SQS and S3 clients from the shared AWS configuration.
///
/// S3 uses path-style addressing when an endpoint override is configured;
/// virtual-hosted addressing does not resolve against local stacks.
pub async fn build_clients(config: &AppConfig) -> (aws_sdk_sqs::Client, aws_sdk_s3::Client) {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(key, secret, None, None, "static"));
    }

    let shared = loader.load().await;

    let sqs = aws_sdk_sqs::Client::new(&shared);
    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(config.endpoint.is_some())
        .build();
    let s3 = aws_sdk_s3::Client::from_conf(s3_config);

    (sqs, s3)
}

/// Creates the source queue, dead-letter queue, and bucket if absent.
pub async fn provision(
    sqs: &aws_sdk_sqs::Client,
    s3: &aws_sdk_s3::Client,
    config: &AppConfig,
) -> Result<ProvisionSummary, ProvisionError> {
    info!("provisioning queue and bucket resources");

    let (queue_url, queue_created) =
        create_queue_if_missing(sqs, queue_name_from_url(&config.queue_url)?).await?;
    let (dead_letter_queue_url, dead_letter_queue_created) =
        create_queue_if_missing(sqs, queue_name_from_url(&config.dead_letter_queue_url)?).await?;
    let bucket_created = create_bucket_if_missing(s3, &config.bucket).await?;

    Ok(ProvisionSummary {
        queue_url,
        queue_created,
        dead_letter_queue_url,
        dead_letter_queue_created,
        bucket: config.bucket.clone(),
        bucket_created,
    })
}

/// Last path segment of a queue URL, which SQS uses as the queue name.
fn queue_name_from_url(url: &str) -> Result<&str, ProvisionError> {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProvisionError::QueueName(url.to_string()))
}

/// Returns the queue URL and whether the queue had to be created.
async fn create_queue_if_missing(
    sqs: &aws_sdk_sqs::Client,
    name: &str,
) -> Result<(String, bool), ProvisionError> {
    match sqs.get_queue_url().queue_name(name).send().await {
        Ok(output) => {
            info!(queue = name, "queue already exists");
            Ok((output.queue_url.unwrap_or_default(), false))
        }
        Err(_) => {
            info!(queue = name, "creating queue");
            let output = sqs
                .create_queue()
                .queue_name(name)
                .send()
                .await
                .map_err(|e| ProvisionError::Queue {
                    name: name.to_string(),
                    message: aws_sdk_sqs::error::DisplayErrorContext(&e).to_string(),
                })?;
            Ok((output.queue_url.unwrap_or_default(), true))
        }
    }
}

/// Returns whether the bucket had to be created.
async fn create_bucket_if_missing(
    s3: &aws_sdk_s3::Client,
    name: &str,
) -> Result<bool, ProvisionError> {
    match s3.head_bucket().bucket(name).send().await {
        Ok(_) => {
            info!(bucket = name, "bucket already exists");
            Ok(false)
        }
        Err(_) => {
            info!(bucket = name, "creating bucket");
            s3.create_bucket()
                .bucket(name)
                .send()
                .await
                .map_err(|e| ProvisionError::Bucket {
                    name: name.to_string(),
                    message: aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
                })?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_is_the_last_url_segment() {
        let name = queue_name_from_url("http://localhost:4566/000000000000/sluice-queue")
            .expect("should derive a name");
        assert_eq!(name, "sluice-queue");
    }

    #[test]
    fn bare_queue_names_pass_through() {
        assert_eq!(queue_name_from_url("sluice-dlq").expect("bare name"), "sluice-dlq");
    }

    #[test]
    fn trailing_slash_is_rejected() {
        assert!(queue_name_from_url("http://localhost:4566/queues/").is_err());
    }
}
