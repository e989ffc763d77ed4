//! Build specification of a template and the fluent builder that authors it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::probe::ReadinessProbe;
use crate::step::{shell_join, shell_quote, CopyStep, RunStep, Step};

pub const DEFAULT_CPU: u32 = 2;
pub const DEFAULT_MEMORY_MB: u32 = 1024;
pub const DEFAULT_DISK_GB: u32 = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU,
            memory_mb: DEFAULT_MEMORY_MB,
            disk_gb: DEFAULT_DISK_GB,
        }
    }
}

/// Local directory copy sources are resolved against, plus patterns whose
/// matches are never fingerprinted or uploaded.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileContext {
    pub root: PathBuf,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl Default for FileContext {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            ignore_patterns: Vec::new(),
        }
    }
}

/// Credentials for pulling a private base image.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryCredentials {
    #[serde(rename = "registry")]
    Basic { username: String, password: String },
    Aws {
        #[serde(rename = "awsAccessKeyId")]
        access_key_id: String,
        #[serde(rename = "awsSecretAccessKey")]
        secret_access_key: String,
        #[serde(rename = "awsRegion")]
        region: String,
    },
    Gcp {
        #[serde(rename = "serviceAccountJson")]
        service_account_json: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BuildSpecification {
    pub base_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_credentials: Option<RegistryCredentials>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ReadinessProbe>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub skip_cache: bool,
    #[serde(default)]
    pub update_existing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub context: FileContext,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SpecificationError {
    #[error("template specification is missing a base image")]
    MissingBaseImage,
    #[error("template specification has no build steps beyond env/workdir/user configuration")]
    NoEffectiveSteps,
    #[error("copy step #{index} has no sources")]
    EmptyCopySources { index: usize },
    #[error("copy step #{index} has an empty destination")]
    EmptyCopyDestination { index: usize },
    #[error("run step #{index} has an empty command")]
    EmptyRunCommand { index: usize },
    #[error("resource `{field}` must be greater than zero")]
    ZeroResource { field: &'static str },
    #[error("readiness probe requires a start command")]
    ProbeWithoutStartCommand,
}

impl BuildSpecification {
    pub fn builder(base_image: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder::from_image(base_image)
    }

    /// Local checks that must pass before any network call is made.
    pub fn validate(&self) -> Result<(), SpecificationError> {
        if self.base_image.trim().is_empty() {
            return Err(SpecificationError::MissingBaseImage);
        }
        if !self.steps.iter().any(|step| !step.is_configuration_only()) {
            return Err(SpecificationError::NoEffectiveSteps);
        }
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Copy(copy) => {
                    if copy.sources.iter().all(|src| src.trim().is_empty()) {
                        return Err(SpecificationError::EmptyCopySources { index });
                    }
                    if copy.destination.trim().is_empty() {
                        return Err(SpecificationError::EmptyCopyDestination { index });
                    }
                }
                Step::Run(run) if run.command.trim().is_empty() => {
                    return Err(SpecificationError::EmptyRunCommand { index });
                }
                _ => {}
            }
        }
        let resources = [
            ("cpu", self.resources.cpu),
            ("memory_mb", self.resources.memory_mb),
            ("disk_gb", self.resources.disk_gb),
        ];
        if let Some((field, _)) = resources.iter().find(|(_, value)| *value == 0) {
            return Err(SpecificationError::ZeroResource { field });
        }
        if self.readiness_probe.is_some() && self.start_command.is_none() {
            return Err(SpecificationError::ProbeWithoutStartCommand);
        }
        Ok(())
    }

    pub fn copy_steps(&self) -> impl Iterator<Item = (usize, &CopyStep)> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(idx, step)| step.as_copy().map(|copy| (idx, copy)))
    }

    pub fn ready_command(&self) -> Option<String> {
        self.readiness_probe.as_ref().map(ReadinessProbe::to_command)
    }
}

/// Fluent authoring of a [`BuildSpecification`]. Steps are appended in call
/// order.
#[derive(Clone, Debug)]
pub struct TemplateBuilder {
    spec: BuildSpecification,
}

impl TemplateBuilder {
    pub fn from_image(base_image: impl Into<String>) -> Self {
        Self {
            spec: BuildSpecification {
                base_image: base_image.into(),
                registry_credentials: None,
                steps: Vec::new(),
                start_command: None,
                readiness_probe: None,
                resources: Resources::default(),
                skip_cache: false,
                update_existing: false,
                alias: None,
                context: FileContext::default(),
            },
        }
    }

    #[must_use]
    pub fn registry_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.spec.registry_credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.spec.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn context_root(mut self, root: impl AsRef<Path>) -> Self {
        self.spec.context.root = root.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.spec.context.ignore_patterns.push(pattern.into());
        self
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.spec.steps.push(step);
        self
    }

    #[must_use]
    pub fn copy(self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.step(Step::copy(source, destination))
    }

    #[must_use]
    pub fn copy_many<I, S>(self, sources: I, destination: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources = sources.into_iter().map(Into::into).collect();
        self.step(Step::Copy(CopyStep::new(sources, destination)))
    }

    #[must_use]
    pub fn copy_step(self, step: CopyStep) -> Self {
        self.step(Step::Copy(step))
    }

    #[must_use]
    pub fn run(self, command: impl Into<String>) -> Self {
        self.step(Step::run(command))
    }

    #[must_use]
    pub fn run_as(self, command: impl Into<String>, user: impl Into<String>) -> Self {
        let mut step = RunStep::new(command);
        step.user = Some(user.into());
        self.step(Step::Run(step))
    }

    #[must_use]
    pub fn env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.step(Step::env(key, value))
    }

    #[must_use]
    pub fn envs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            self = self.env(key, value);
        }
        self
    }

    #[must_use]
    pub fn workdir(self, path: impl Into<String>) -> Self {
        self.step(Step::workdir(path))
    }

    #[must_use]
    pub fn user(self, name: impl Into<String>) -> Self {
        self.step(Step::user(name))
    }

    #[must_use]
    pub fn pip_install<I, S>(self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages: Vec<String> = packages.into_iter().map(|p| p.as_ref().to_string()).collect();
        self.run(format!("pip install {}", shell_join(&packages)))
    }

    #[must_use]
    pub fn npm_install<I, S>(self, packages: I, global: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages: Vec<String> = packages.into_iter().map(|p| p.as_ref().to_string()).collect();
        let flag = if global { " -g" } else { "" };
        if packages.is_empty() {
            self.run(format!("npm install{flag}"))
        } else {
            self.run(format!("npm install{flag} {}", shell_join(&packages)))
        }
    }

    #[must_use]
    pub fn apt_install<I, S>(self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages: Vec<String> = packages.into_iter().map(|p| p.as_ref().to_string()).collect();
        self.run_as(
            format!(
                "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {}",
                shell_join(&packages)
            ),
            "root",
        )
    }

    #[must_use]
    pub fn git_clone(self, url: &str, path: Option<&str>, branch: Option<&str>) -> Self {
        let mut command = String::from("git clone");
        if let Some(branch) = branch {
            command.push_str(&format!(" --branch {} --single-branch", shell_quote(branch)));
        }
        command.push(' ');
        command.push_str(&shell_quote(url));
        if let Some(path) = path {
            command.push(' ');
            command.push_str(&shell_quote(path));
        }
        self.run(command)
    }

    #[must_use]
    pub fn remove(self, path: &str, recursive: bool) -> Self {
        let flags = if recursive { "-rf" } else { "-f" };
        self.run(format!("rm {flags} {}", shell_quote(path)))
    }

    #[must_use]
    pub fn rename(self, from: &str, to: &str) -> Self {
        self.run(format!("mv {} {}", shell_quote(from), shell_quote(to)))
    }

    #[must_use]
    pub fn make_dir(self, path: &str) -> Self {
        self.run(format!("mkdir -p {}", shell_quote(path)))
    }

    #[must_use]
    pub fn make_symlink(self, target: &str, link: &str) -> Self {
        self.run(format!("ln -s {} {}", shell_quote(target), shell_quote(link)))
    }

    #[must_use]
    pub fn start_command(mut self, command: impl Into<String>, probe: ReadinessProbe) -> Self {
        self.spec.start_command = Some(command.into());
        self.spec.readiness_probe = Some(probe);
        self
    }

    #[must_use]
    pub fn cpu(mut self, cpu: u32) -> Self {
        self.spec.resources.cpu = cpu;
        self
    }

    #[must_use]
    pub fn memory_mb(mut self, memory_mb: u32) -> Self {
        self.spec.resources.memory_mb = memory_mb;
        self
    }

    #[must_use]
    pub fn disk_gb(mut self, disk_gb: u32) -> Self {
        self.spec.resources.disk_gb = disk_gb;
        self
    }

    #[must_use]
    pub fn skip_cache(mut self) -> Self {
        self.spec.skip_cache = true;
        self
    }

    #[must_use]
    pub fn update_existing(mut self) -> Self {
        self.spec.update_existing = true;
        self
    }

    pub fn build(self) -> BuildSpecification {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_only_specification_is_rejected() {
        let spec = TemplateBuilder::from_image("ubuntu:22.04")
            .env("A", "1")
            .workdir("/app")
            .user("app")
            .build();
        assert_eq!(spec.validate(), Err(SpecificationError::NoEffectiveSteps));
    }

    #[test]
    fn missing_base_image_is_rejected_first() {
        let spec = TemplateBuilder::from_image("  ").run("true").build();
        assert_eq!(spec.validate(), Err(SpecificationError::MissingBaseImage));
    }

    #[test]
    fn zero_resources_and_orphan_probe_are_rejected() {
        let spec = TemplateBuilder::from_image("alpine").run("true").cpu(0).build();
        assert_eq!(
            spec.validate(),
            Err(SpecificationError::ZeroResource { field: "cpu" })
        );

        let mut spec = TemplateBuilder::from_image("alpine").run("true").build();
        spec.readiness_probe = Some(ReadinessProbe::port(80));
        assert_eq!(
            spec.validate(),
            Err(SpecificationError::ProbeWithoutStartCommand)
        );
    }

    #[test]
    fn builder_preserves_step_order_and_expands_helpers() {
        let spec = TemplateBuilder::from_image("python:3.12")
            .copy("requirements.txt", "/app/")
            .pip_install(["-r", "/app/requirements.txt"])
            .envs([("A", "1"), ("B", "2")])
            .apt_install(["curl"])
            .git_clone("https://github.com/org/repo.git", Some("/src"), Some("main"))
            .build();
        assert!(spec.validate().is_ok());
        let kinds: Vec<_> = spec.steps.iter().map(|s| s.kind().as_str()).collect();
        assert_eq!(kinds, ["copy", "run", "env", "env", "run", "run"]);
        match &spec.steps[1] {
            Step::Run(run) => assert_eq!(run.command, "pip install -r /app/requirements.txt"),
            other => panic!("unexpected step {other:?}"),
        }
        match &spec.steps[4] {
            Step::Run(run) => assert_eq!(run.user.as_deref(), Some("root")),
            other => panic!("unexpected step {other:?}"),
        }
        match &spec.steps[5] {
            Step::Run(run) => assert_eq!(
                run.command,
                "git clone --branch main --single-branch https://github.com/org/repo.git /src"
            ),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn registry_credentials_serialize_with_type_tag() -> anyhow::Result<()> {
        let creds = RegistryCredentials::Basic {
            username: "u".into(),
            password: "p".into(),
        };
        let value = serde_json::to_value(&creds)?;
        assert_eq!(
            value,
            serde_json::json!({"type": "registry", "username": "u", "password": "p"})
        );
        Ok(())
    }
}
