use super::BatchWriter;
use crate::model::ReviewRecord;
use async_trait::async_trait;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use ingester_core::config::S3OutputConfig;
use ingester_core::{Error, Result};
use tracing::{debug, instrument};

/// Writes each batch as one Parquet object. A single `PutObject` is atomic,
/// so a failed write leaves nothing behind.
pub struct S3BatchWriter {
    client: S3Client,
    bucket: String,
    prefix: String,
}

/// S3 client for the configured endpoint; MinIO needs path-style addressing.
pub async fn build_client(config: &S3OutputConfig) -> S3Client {
    let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));

    if let Some(profile) = &config.aws_profile {
        config_loader = config_loader.profile_name(profile);
    }

    if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        config_loader = config_loader.credentials_provider(Credentials::new(
            key.clone(),
            secret.clone(),
            None,
            None,
            "ingester-static",
        ));
    }

    let sdk_config = config_loader.load().await;

    let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(config.force_path_style);
    if let Some(endpoint) = &config.endpoint_url {
        s3_config = s3_config.endpoint_url(endpoint);
    }

    S3Client::from_conf(s3_config.build())
}

/// `name` under `prefix`, with surrounding slashes on the prefix ignored.
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

impl S3BatchWriter {
    pub async fn new(config: &S3OutputConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config).await,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        })
    }
}

#[async_trait]
impl BatchWriter for S3BatchWriter {
    #[instrument(skip(self, records), fields(bucket = %self.bucket, count = records.len()))]
    async fn write(&self, records: &[ReviewRecord], destination: &str) -> Result<String> {
        let body = super::encoding::encode(records)?;
        let size = body.len();
        let key = object_key(&self.prefix, destination);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/vnd.apache.parquet")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                let details = match e {
                    aws_sdk_s3::error::SdkError::ServiceError(ref err) => {
                        format!("S3 service error for key '{}': {:?}", key, err)
                    }
                    _ => format!("Failed to put S3 key '{}': {}", key, e),
                };
                Error::Storage(details)
            })?;

        debug!(key = %key, bytes = size, "Uploaded batch");
        Ok(format!("s3://{}/{}", self.bucket, key))
    }

    fn name(&self) -> &str {
        "s3"
    }
}
