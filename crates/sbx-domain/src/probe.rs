//! Readiness probes rendered to the shell command the service runs to decide
//! when a started sandbox is ready.

use serde::{Deserialize, Serialize};

use crate::step::shell_quote;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReadinessProbe {
    PortOpen { port: u16 },
    UrlReachable { url: String, status: u16 },
    FilePresent { path: String },
    ProcessRunning { name: String },
    Command { command: String },
    Timeout { millis: u64 },
}

impl ReadinessProbe {
    pub fn port(port: u16) -> Self {
        Self::PortOpen { port }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::UrlReachable {
            url: url.into(),
            status: 200,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::FilePresent { path: path.into() }
    }

    pub fn process(name: impl Into<String>) -> Self {
        Self::ProcessRunning { name: name.into() }
    }

    pub fn command(command: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
        }
    }

    pub fn timeout(millis: u64) -> Self {
        Self::Timeout { millis }
    }

    pub fn to_command(&self) -> String {
        match self {
            Self::PortOpen { port } => format!("ss -tuln | grep :{port}"),
            Self::UrlReachable { url, status } => format!(
                "curl -s -o /dev/null -w \"%{{http_code}}\" {} | grep -q \"{status}\"",
                shell_quote(url)
            ),
            Self::FilePresent { path } => format!("[ -f {} ]", shell_quote(path)),
            Self::ProcessRunning { name } => format!("pgrep {} > /dev/null", shell_quote(name)),
            Self::Command { command } => command.clone(),
            Self::Timeout { millis } => {
                let seconds = (*millis).max(1000) / 1000;
                format!("sleep {seconds}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_render_shell_commands() {
        assert_eq!(ReadinessProbe::port(8080).to_command(), "ss -tuln | grep :8080");
        assert_eq!(
            ReadinessProbe::url("http://localhost:3000/health").to_command(),
            "curl -s -o /dev/null -w \"%{http_code}\" http://localhost:3000/health | grep -q \"200\""
        );
        assert_eq!(
            ReadinessProbe::file("/tmp/ready flag").to_command(),
            "[ -f '/tmp/ready flag' ]"
        );
        assert_eq!(
            ReadinessProbe::process("nginx").to_command(),
            "pgrep nginx > /dev/null"
        );
        assert_eq!(ReadinessProbe::command("true").to_command(), "true");
        assert_eq!(ReadinessProbe::timeout(2500).to_command(), "sleep 2");
        assert_eq!(ReadinessProbe::timeout(10).to_command(), "sleep 1");
    }
}
