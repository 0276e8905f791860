//! Amazon S3 backend. Credentials and region come from the standard `AWS_*` environment.

use crate::object::{new_runtime, Bucket, ObjectRepository};
use ks_core::{Error, Result};
use object_store::aws::{AmazonS3, AmazonS3Builder, AmazonS3ConfigKey};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::info;

const DEFAULT_REGION: &str = "us-east-1";

pub type S3Repository = ObjectRepository<S3Bucket>;

pub struct S3Bucket {
    client: Arc<AmazonS3>,
    region: String,
}

impl S3Repository {
    pub fn new(bucket: &str, root: &str) -> Result<S3Repository> {
        let builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        let region = builder
            .get_config_value(&AmazonS3ConfigKey::Region)
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let client = builder
            .with_region(&region)
            .build()
            .map_err(|e| {
                Error::RepositoryConfiguration(format!("Failed to connect to S3: {}", e))
            })?;
        let client = Arc::new(client);
        Ok(ObjectRepository {
            runtime: new_runtime()?,
            store: client.clone(),
            bucket_name: bucket.to_string(),
            root: root.trim_matches('/').to_string(),
            bucket: S3Bucket { client, region },
        })
    }
}

impl Bucket for S3Bucket {
    fn scheme(&self) -> &'static str {
        "s3"
    }

    fn create(&self, runtime: &Runtime, bucket: &str) -> Result<()> {
        info!("Creating bucket s3://{} in region {}", bucket, self.region);
        let fail = |e: &dyn std::fmt::Display| {
            Error::RepositoryConfiguration(format!(
                "Failed to create bucket s3://{}: {}",
                bucket, e
            ))
        };
        let body = if self.region == DEFAULT_REGION {
            String::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.region
            )
        };
        runtime.block_on(async {
            let url = self
                .client
                .signed_url(Method::PUT, &ObjectPath::from(""), Duration::from_secs(300))
                .await
                .map_err(|e| fail(&e))?;
            let resp = reqwest::Client::new()
                .put(url)
                .body(body)
                .send()
                .await
                .map_err(|e| fail(&e))?;
            let status = resp.status();
            // 409 means the bucket already exists and is ours
            if status.is_success() || status == StatusCode::CONFLICT {
                return Ok(());
            }
            let text = resp.text().await.unwrap_or_default();
            Err(fail(&format!("{}: {}", status, text)))
        })
    }
}
