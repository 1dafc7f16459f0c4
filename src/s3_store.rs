use crate::config::S3StoreConfig;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::store::{validate_id_component, FrameStore};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// S3-compatible backend: one object per frame ID under the configured key
/// prefix. Every call carries an operation timeout so the purge loop can
/// never block indefinitely on a wedged provider.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    key_prefix: String,
}

impl S3Store {
    pub async fn new(config: &S3StoreConfig) -> Result<Self> {
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.request_timeout_secs))
            .build();

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .timeout_config(timeouts)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack.
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Path-style access for MinIO compatibility.
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            key_prefix = %config.key_prefix,
            "S3 frame store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.trim_matches('/').to_string(),
        })
    }

    fn object_key(&self, id: &str) -> String {
        let file = format!("frames/{}.json.gz", id);

        if self.key_prefix.is_empty() {
            file
        } else {
            format!("{}/{}", self.key_prefix, file)
        }
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(Error::internal("failed to check frame existence in s3", err))
                }
            }
        }
    }
}

#[async_trait]
impl FrameStore for S3Store {
    #[instrument(skip(self, frame), fields(id = %frame.metadata.id))]
    async fn save_frame(&self, frame: &Frame) -> Result<()> {
        validate_id_component(&frame.metadata.id)?;

        let key = self.object_key(&frame.metadata.id);

        if self.object_exists(&key).await? {
            return Err(Error::FrameAlreadyStored);
        }

        let blob = frame.to_gzip_json()?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(blob))
            .content_type("application/gzip")
            .metadata("node", &frame.metadata.node)
            .metadata("wall-clock-slot", frame.metadata.wall_clock_slot.to_string())
            .metadata("fetched-at", frame.metadata.fetched_at.to_rfc3339())
            .send()
            .await
            .map_err(|err| Error::internal("failed to upload frame to s3", err))?;

        debug!(key = %key, "Saved frame to s3 store");

        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn get_frame(&self, id: &str) -> Result<Frame> {
        validate_id_component(id)?;

        let key = self.object_key(id);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(Error::FrameNotFound);
                }

                return Err(Error::internal("failed to fetch frame from s3", err));
            }
        };

        let blob = output
            .body
            .collect()
            .await
            .map_err(|err| Error::internal("failed to read frame body from s3", err))?
            .into_bytes();

        Frame::from_gzip_json(&blob)
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete_frame(&self, id: &str) -> Result<()> {
        validate_id_component(id)?;

        let key = self.object_key(id);

        // S3 deletes are silent no-ops on missing keys; probe first so the
        // not-found contract holds on this backend too.
        if !self.object_exists(&key).await? {
            return Err(Error::FrameNotFound);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| Error::internal("failed to delete frame from s3", err))?;

        debug!(key = %key, "Deleted frame from s3 store");

        Ok(())
    }
}
