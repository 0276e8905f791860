//! Google Cloud Storage backend.
//!
//! Credentials come from the usual Google environment, or from a service account key passed
//! inline in `GOOGLE_APPLICATION_CREDENTIALS_JSON`.

use crate::object::{new_runtime, Bucket, ObjectRepository};
use ks_core::{Error, Result};
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::CredentialProvider;
use std::process::Command;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tracing::info;

const CREATE_BUCKET_URL: &str = "https://storage.googleapis.com/storage/v1/b";

pub type GcsRepository = ObjectRepository<GcsBucket>;

pub struct GcsBucket {
    client: Arc<GoogleCloudStorage>,
    project_id: Mutex<Option<String>>,
}

impl GcsRepository {
    pub fn new(bucket: &str, root: &str) -> Result<GcsRepository> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Ok(key) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS_JSON") {
            if !key.is_empty() {
                builder = builder.with_service_account_key(key);
            }
        }
        let client = builder.build().map_err(|e| {
            Error::RepositoryConfiguration(format!(
                "Failed to connect to Google Cloud Storage: {}",
                e
            ))
        })?;
        let client = Arc::new(client);
        Ok(ObjectRepository {
            runtime: new_runtime()?,
            store: client.clone(),
            bucket_name: bucket.to_string(),
            root: root.trim_matches('/').to_string(),
            bucket: GcsBucket {
                client,
                project_id: Mutex::new(None),
            },
        })
    }
}

impl GcsBucket {
    fn project_id(&self) -> Result<String> {
        if let Ok(project) = std::env::var("GOOGLE_CLOUD_PROJECT") {
            if !project.is_empty() {
                return Ok(project);
            }
        }
        let mut cached = self
            .project_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(project) = cached.as_ref() {
            return Ok(project.clone());
        }
        let project = discover_project_id()?;
        *cached = Some(project.clone());
        Ok(project)
    }
}

/// Asks gcloud for the default project.
fn discover_project_id() -> Result<String> {
    let fail = |detail: String| {
        Error::RepositoryConfiguration(format!(
            "Failed to determine default GCP project (using gcloud config config-helper): {}",
            detail
        ))
    };
    let output = Command::new("gcloud")
        .args([
            "config",
            "config-helper",
            "--format=value(configuration.properties.core.project)",
        ])
        .output()
        .map_err(|e| fail(e.to_string()))?;
    if !output.status.success() {
        return Err(fail(format!(
            "{}\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl Bucket for GcsBucket {
    fn scheme(&self) -> &'static str {
        "gs"
    }

    fn create(&self, runtime: &Runtime, bucket: &str) -> Result<()> {
        let project = self.project_id()?;
        info!("Creating bucket gs://{} in project {}", bucket, project);
        let fail = |e: &dyn std::fmt::Display| {
            Error::RepositoryConfiguration(format!(
                "Failed to create bucket gs://{}: {}",
                bucket, e
            ))
        };
        runtime.block_on(async {
            let credential = self
                .client
                .credentials()
                .get_credential()
                .await
                .map_err(|e| fail(&e))?;
            let resp = reqwest::Client::new()
                .post(CREATE_BUCKET_URL)
                .query(&[("project", project.as_str())])
                .bearer_auth(&credential.bearer)
                .json(&serde_json::json!({ "name": bucket }))
                .send()
                .await
                .map_err(|e| fail(&e))?;
            let status = resp.status();
            if status.is_success() {
                return Ok(());
            }
            let text = resp.text().await.unwrap_or_default();
            Err(fail(&format!("{}: {}", status, text)))
        })
    }
}
