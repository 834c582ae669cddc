//! Kubernetes Job submission through kubectl.
//!
//! Each unit of work becomes a `batch/v1` Job with a single
//! `action-runner` container. The manifest is rendered as YAML and piped
//! into `kubectl apply -f -`. In dry-run mode the manifest is only logged.

use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ComputeFabric, EnvValue, FabricError, JobRequest};
use crate::config::FabricConfig;

/// Name of the container running the action.
pub const CONTAINER_NAME: &str = "action-runner";

/// Submits units of work as Kubernetes Jobs.
#[derive(Debug, Clone)]
pub struct KubectlFabric {
    kubectl_path: String,
    namespace: String,
    image_pull_secret: Option<String>,
    dry_run: bool,
}

impl KubectlFabric {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            namespace: namespace.into(),
            image_pull_secret: None,
            dry_run: false,
        }
    }

    pub fn from_config(config: &FabricConfig, dry_run: bool) -> Self {
        Self {
            kubectl_path: config.kubectl_path.clone(),
            namespace: config.namespace.clone(),
            image_pull_secret: config.image_pull_secret.clone(),
            dry_run,
        }
    }

    pub fn with_kubectl_path(mut self, path: impl Into<String>) -> Self {
        self.kubectl_path = path.into();
        self
    }

    pub fn with_image_pull_secret(mut self, secret: impl Into<String>) -> Self {
        self.image_pull_secret = Some(secret.into());
        self
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Builds the Job manifest for a request.
    ///
    /// The Job never retries: a non-zero exit fails it, and pod disruption
    /// is ignored rather than counted as a failure.
    pub fn manifest(&self, request: &JobRequest) -> Value {
        let env: Vec<Value> = request
            .env
            .iter()
            .map(|var| match &var.value {
                EnvValue::Literal(value) => json!({ "name": var.name, "value": value }),
                EnvValue::PodName => json!({
                    "name": var.name,
                    "valueFrom": { "fieldRef": { "fieldPath": "metadata.name" } }
                }),
            })
            .collect();

        let mut pod_spec = json!({
            "containers": [{
                "name": CONTAINER_NAME,
                "image": request.image,
                "env": env,
            }],
            "restartPolicy": "Never",
        });
        if let Some(secret) = &self.image_pull_secret {
            pod_spec["imagePullSecrets"] = json!([{ "name": secret }]);
        }

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": request.job_id,
                "namespace": self.namespace,
            },
            "spec": {
                "template": { "spec": pod_spec },
                "backoffLimit": 0,
                "podFailurePolicy": {
                    "rules": [
                        {
                            "action": "FailJob",
                            "onExitCodes": {
                                "containerName": CONTAINER_NAME,
                                "operator": "NotIn",
                                "values": [0],
                            },
                        },
                        {
                            "action": "Ignore",
                            "onPodConditions": [{ "type": "DisruptionTarget" }],
                        },
                    ],
                },
            },
        })
    }

    /// Renders the Job manifest as YAML.
    pub fn render(&self, request: &JobRequest) -> Result<String, FabricError> {
        Ok(serde_yaml::to_string(&self.manifest(request))?)
    }
}

#[async_trait]
impl ComputeFabric for KubectlFabric {
    async fn submit(&self, request: &JobRequest) -> Result<(), FabricError> {
        let manifest = self.render(request)?;

        if self.dry_run {
            info!("[DRY RUN] Job '{}' not applied:\n{}", request.job_id, manifest);
            return Ok(());
        }

        debug!(
            "Applying job '{}' in namespace '{}'",
            request.job_id, self.namespace
        );

        let mut child = Command::new(&self.kubectl_path)
            .arg("apply")
            .arg("-n")
            .arg(&self.namespace)
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(manifest.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            info!("Job '{}' accepted", request.job_id);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(FabricError::Rejected {
                job_id: request.job_id.clone(),
                message: stderr.trim().to_string(),
            })
        }
    }
}
