//! Build steps, one variant per step kind.
//!
//! Steps keep the order in which they were authored; that order is the
//! execution order of the remote build and feeds the content fingerprints.

use serde::{Deserialize, Serialize};

/// Content copied from the local build context into the image.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CopyStep {
    /// Globs relative to the build context root. A directory match copies
    /// its whole tree.
    pub sources: Vec<String>,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default)]
    pub skip_cache: bool,
}

impl CopyStep {
    pub fn new(sources: Vec<String>, destination: impl Into<String>) -> Self {
        Self {
            sources,
            destination: destination.into(),
            owner: None,
            permissions: None,
            skip_cache: false,
        }
    }

    /// The literal command text that seeds the fingerprint of this step.
    pub fn command_text(&self) -> String {
        format!("COPY {} {}", self.sources.join(" "), self.destination)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub skip_cache: bool,
}

impl RunStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            user: None,
            skip_cache: false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EnvStep {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkdirStep {
    pub path: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserStep {
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Step {
    Copy(CopyStep),
    Run(RunStep),
    Env(EnvStep),
    Workdir(WorkdirStep),
    User(UserStep),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Copy,
    Run,
    Env,
    Workdir,
    User,
}

impl StepKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Run => "run",
            Self::Env => "env",
            Self::Workdir => "workdir",
            Self::User => "user",
        }
    }
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Copy(_) => StepKind::Copy,
            Self::Run(_) => StepKind::Run,
            Self::Env(_) => StepKind::Env,
            Self::Workdir(_) => StepKind::Workdir,
            Self::User(_) => StepKind::User,
        }
    }

    /// Steps that only adjust the image configuration and produce no layer
    /// of their own.
    pub fn is_configuration_only(&self) -> bool {
        matches!(self, Self::Env(_) | Self::Workdir(_) | Self::User(_))
    }

    pub fn as_copy(&self) -> Option<&CopyStep> {
        match self {
            Self::Copy(step) => Some(step),
            _ => None,
        }
    }

    pub fn copy(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::Copy(CopyStep::new(vec![source.into()], destination))
    }

    pub fn run(command: impl Into<String>) -> Self {
        Self::Run(RunStep::new(command))
    }

    pub fn env(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Env(EnvStep {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn workdir(path: impl Into<String>) -> Self {
        Self::Workdir(WorkdirStep { path: path.into() })
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self::User(UserStep { name: name.into() })
    }
}

/// Quotes a single shell word when it contains anything outside a safe set.
pub(crate) fn shell_quote(word: &str) -> String {
    let safe_char =
        |c: char| c.is_ascii_alphanumeric() || "-_./:=@+,".contains(c);
    if !word.is_empty() && word.chars().all(safe_char) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

pub(crate) fn shell_join<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_only_steps_are_detected() {
        assert!(Step::env("A", "1").is_configuration_only());
        assert!(Step::workdir("/app").is_configuration_only());
        assert!(Step::user("root").is_configuration_only());
        assert!(!Step::run("true").is_configuration_only());
        assert!(!Step::copy("src", "/app").is_configuration_only());
    }

    #[test]
    fn copy_command_text_joins_sources() {
        let step = CopyStep::new(vec!["a.txt".into(), "dir".into()], "/app");
        assert_eq!(step.command_text(), "COPY a.txt dir /app");
    }

    #[test]
    fn shell_quote_wraps_unsafe_words() {
        assert_eq!(shell_quote("requests==2.0"), "requests==2.0");
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
