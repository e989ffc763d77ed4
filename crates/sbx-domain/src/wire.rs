//! Request and response bodies exchanged with the sandbox service.
//!
//! Field names match what is transmitted; several are camelCase on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::fingerprint::Fingerprint;
use crate::status::{BuildStatus, TemplateStatus};
use crate::step::Step;
use crate::template::{BuildSpecification, RegistryCredentials};

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UploadLinkRequest {
    pub files_hash: Fingerprint,
    pub content_length: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UploadLinkResponse {
    pub present: bool,
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub files_hash: Option<String>,
}

/// One build step as the service expects it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireStep {
    #[serde(rename = "COPY")]
    Copy {
        args: Vec<String>,
        #[serde(rename = "filesHash")]
        files_hash: Option<Fingerprint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permissions: Option<String>,
        #[serde(rename = "skipCache", default, skip_serializing_if = "is_false")]
        skip_cache: bool,
    },
    #[serde(rename = "RUN")]
    Run {
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(rename = "skipCache", default, skip_serializing_if = "is_false")]
        skip_cache: bool,
    },
    #[serde(rename = "env")]
    Env { key: String, value: String },
    #[serde(rename = "workdir")]
    Workdir { path: String },
    #[serde(rename = "user")]
    User { name: String },
}

impl WireStep {
    /// Encodes `step`. Copy steps take the fingerprint computed for them;
    /// it is ignored for every other kind.
    pub fn encode(step: &Step, fingerprint: Option<&Fingerprint>) -> Self {
        match step {
            Step::Copy(copy) => {
                let mut args = copy.sources.clone();
                args.push(copy.destination.clone());
                Self::Copy {
                    args,
                    files_hash: fingerprint.cloned(),
                    owner: copy.owner.clone(),
                    permissions: copy.permissions.clone(),
                    skip_cache: copy.skip_cache,
                }
            }
            Step::Run(run) => Self::Run {
                args: vec![run.command.clone()],
                user: run.user.clone(),
                skip_cache: run.skip_cache,
            },
            Step::Env(env) => Self::Env {
                key: env.key.clone(),
                value: env.value.clone(),
            },
            Step::Workdir(workdir) => Self::Workdir {
                path: workdir.path.clone(),
            },
            Step::User(user) => Self::User {
                name: user.name.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubmitBuildRequest {
    pub from_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_credentials: Option<RegistryCredentials>,
    pub steps: Vec<WireStep>,
    pub cpu: u32,
    pub memory: u32,
    #[serde(rename = "diskGB")]
    pub disk_gb: u32,
    #[serde(rename = "skipCache")]
    pub skip_cache: bool,
    pub update: bool,
    #[serde(rename = "startCmd", default, skip_serializing_if = "Option::is_none")]
    pub start_cmd: Option<String>,
    #[serde(rename = "readyCmd", default, skip_serializing_if = "Option::is_none")]
    pub ready_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl SubmitBuildRequest {
    /// Wraps already-encoded steps with the specification's top-level fields.
    pub fn new(spec: &BuildSpecification, steps: Vec<WireStep>) -> Self {
        Self {
            from_image: spec.base_image.clone(),
            registry_credentials: spec.registry_credentials.clone(),
            steps,
            cpu: spec.resources.cpu,
            memory: spec.resources.memory_mb,
            disk_gb: spec.resources.disk_gb,
            skip_cache: spec.skip_cache,
            update: spec.update_existing,
            start_cmd: spec.start_command.clone(),
            ready_cmd: spec.ready_command(),
            alias: spec.alias.clone(),
        }
    }
}

impl BuildSpecification {
    /// The body the service would receive, with every `filesHash` left null.
    /// Useful for inspection; the service rejects it.
    pub fn to_wire_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let steps = self
            .steps
            .iter()
            .map(|step| WireStep::encode(step, None))
            .collect();
        serde_json::to_value(SubmitBuildRequest::new(self, steps))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubmitBuildResponse {
    pub build_id: String,
    pub template_id: String,
    pub status: BuildStatus,
    #[serde(default)]
    pub logs_url: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<String>,
    pub offset: u64,
    #[serde(default)]
    pub status: Option<BuildStatus>,
    #[serde(default)]
    pub complete: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildStatusResponse {
    pub build_id: String,
    pub template_id: String,
    pub status: BuildStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TemplateStatusResponse {
    pub status: BuildStatus,
    #[serde(default)]
    pub is_active: bool,
}

impl From<TemplateStatusResponse> for TemplateStatus {
    fn from(value: TemplateStatusResponse) -> Self {
        Self {
            status: value.status,
            is_active: value.is_active,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    pub auth_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub token_expires_at: OffsetDateTime,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CreateSandboxRequest {
    pub template_id: String,
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CreateSandboxResponse {
    pub sandbox_id: String,
    pub template_id: String,
    pub auth_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub token_expires_at: OffsetDateTime,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SandboxInfoResponse {
    pub sandbox_id: String,
    pub template_id: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::step::{CopyStep, RunStep};
    use crate::template::TemplateBuilder;
    use crate::ReadinessProbe;

    #[test]
    fn each_step_kind_encodes_with_its_wire_tag() -> anyhow::Result<()> {
        let fp = Fingerprint::from_digest(&[0x11; 32]);
        let mut copy = CopyStep::new(vec!["src".into(), "README.md".into()], "/app");
        copy.owner = Some("app:app".into());
        let mut run = RunStep::new("make build");
        run.user = Some("root".into());

        let encoded = serde_json::to_value(vec![
            WireStep::encode(&Step::Copy(copy), Some(&fp)),
            WireStep::encode(&Step::Run(run), None),
            WireStep::encode(&Step::env("PORT", "80"), None),
            WireStep::encode(&Step::workdir("/app"), None),
            WireStep::encode(&Step::user("app"), None),
        ])?;
        assert_eq!(
            encoded,
            json!([
                {"type": "COPY", "args": ["src", "README.md", "/app"],
                 "filesHash": fp.as_str(), "owner": "app:app"},
                {"type": "RUN", "args": ["make build"], "user": "root"},
                {"type": "env", "key": "PORT", "value": "80"},
                {"type": "workdir", "path": "/app"},
                {"type": "user", "name": "app"},
            ])
        );
        Ok(())
    }

    #[test]
    fn wire_json_uses_service_field_names() -> anyhow::Result<()> {
        let spec = TemplateBuilder::from_image("node:20")
            .copy("package.json", "/app/")
            .run("npm ci")
            .start_command("npm start", ReadinessProbe::port(3000))
            .cpu(4)
            .memory_mb(2048)
            .disk_gb(10)
            .alias("web")
            .build();
        let value = spec.to_wire_json()?;
        assert_eq!(value["from_image"], "node:20");
        assert_eq!(value["memory"], 2048);
        assert_eq!(value["diskGB"], 10);
        assert_eq!(value["skipCache"], false);
        assert_eq!(value["update"], false);
        assert_eq!(value["startCmd"], "npm start");
        assert_eq!(value["readyCmd"], "ss -tuln | grep :3000");
        assert_eq!(value["alias"], "web");
        assert!(value["steps"][0]["filesHash"].is_null());
        assert!(value.get("registry_credentials").is_none());
        Ok(())
    }

    #[test]
    fn responses_decode_with_optional_fields_missing() -> anyhow::Result<()> {
        let link: UploadLinkResponse = serde_json::from_value(json!({"present": true}))?;
        assert!(link.present);
        assert!(link.upload_url.is_none());

        let status: BuildStatusResponse = serde_json::from_value(json!({
            "build_id": "b1",
            "template_id": "t1",
            "status": "failed",
            "error_message": "exit code 1",
            "started_at": "2024-05-01T10:00:00Z"
        }))?;
        assert!(status.status.is_failed());
        assert_eq!(status.error_message.as_deref(), Some("exit code 1"));
        assert!(status.started_at.is_some());

        let token: RefreshTokenResponse = serde_json::from_value(json!({
            "auth_token": "tok",
            "token_expires_at": "2030-01-01T00:00:00Z"
        }))?;
        assert_eq!(token.token_expires_at.year(), 2030);
        Ok(())
    }
}
