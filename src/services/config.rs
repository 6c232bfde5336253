use crate::constants::{buffers, network, pool};
use crate::errors::{FabricError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One source repository of a program, processed in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub uninstall: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProgramSection {
    name: String,
    targethost: Option<String>,
    targetroot: Option<String>,
    user: Option<String>,
    #[serde(default)]
    repository: Vec<Repository>,
    #[serde(default)]
    environ: BTreeMap<String, String>,
    command: Option<String>,
    #[serde(default)]
    commandargs: Vec<String>,
    #[serde(rename = "log.color")]
    log_color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Document {
    user: Option<String>,
    #[serde(rename = "ssh.pool.size")]
    ssh_pool_size: Option<usize>,
    #[serde(rename = "ssh.pool.overflow")]
    ssh_pool_overflow: Option<usize>,
    #[serde(rename = "ssh.pool.timeout_ms")]
    ssh_pool_timeout_ms: Option<u64>,
    #[serde(rename = "ssh.pool.availwait_ms")]
    ssh_pool_availwait_ms: Option<u64>,
    #[serde(rename = "ssh.port")]
    ssh_port: Option<u16>,
    #[serde(rename = "log.maxsize")]
    log_maxsize: Option<usize>,
    #[serde(default)]
    programs: Vec<ProgramSection>,
}

/// Read-only accessor over a fully merged configuration document.
#[derive(Debug, Clone)]
pub struct Config {
    doc: Arc<Document>,
}

fn env_millis(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

impl Config {
    pub fn from_value(value: Value) -> Result<Self> {
        let doc: Document = serde_json::from_value(value)
            .map_err(|err| FabricError::InvalidConfig(err.to_string()))?;
        Ok(Self { doc: Arc::new(doc) })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            FabricError::InvalidConfig(format!("{}: {}", path.display(), err))
        })?;
        Self::from_value(value)
    }

    fn program(&self, name: &str) -> Result<&ProgramSection> {
        self.doc
            .programs
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| FabricError::missing(Some(name), "programs"))
    }

    pub fn program_names(&self) -> Vec<String> {
        self.doc.programs.iter().map(|p| p.name.clone()).collect()
    }

    pub fn target_host(&self, name: &str) -> Result<String> {
        self.program(name)?
            .targethost
            .clone()
            .ok_or_else(|| FabricError::missing(Some(name), "targethost"))
    }

    pub fn target_root(&self, name: &str) -> Result<String> {
        self.program(name)?
            .targetroot
            .clone()
            .ok_or_else(|| FabricError::missing(Some(name), "targetroot"))
    }

    /// Program's ssh user, falling back to the shell-wide user.
    pub fn user(&self, name: &str) -> Result<String> {
        if !name.is_empty() {
            let program = self.program(name)?;
            if let Some(user) = program.user.as_ref().filter(|u| !u.is_empty()) {
                return Ok(user.clone());
            }
        }
        self.default_user()
    }

    pub fn default_user(&self) -> Result<String> {
        self.doc
            .user
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| FabricError::missing(None, "user"))
    }

    pub fn repositories(&self, name: &str) -> Result<Vec<Repository>> {
        Ok(self.program(name)?.repository.clone())
    }

    pub fn environ(&self, name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.program(name)?.environ.clone())
    }

    /// Remote command line with its arguments appended.
    pub fn command(&self, name: &str) -> Result<String> {
        let program = self.program(name)?;
        let command = program
            .command
            .clone()
            .ok_or_else(|| FabricError::missing(Some(name), "command"))?;
        Ok(std::iter::once(command)
            .chain(program.commandargs.iter().cloned())
            .collect::<Vec<_>>()
            .join(" "))
    }

    pub fn log_color(&self, name: &str) -> Result<Option<String>> {
        Ok(self.program(name)?.log_color.clone())
    }

    pub fn ssh_pool_size(&self) -> usize {
        self.doc.ssh_pool_size.unwrap_or(pool::DEFAULT_SIZE)
    }

    pub fn ssh_pool_overflow(&self) -> usize {
        self.doc.ssh_pool_overflow.unwrap_or(pool::DEFAULT_OVERFLOW)
    }

    pub fn ssh_port(&self) -> u16 {
        self.doc.ssh_port.unwrap_or(network::SSH_DEFAULT_PORT)
    }

    pub fn log_max_size(&self) -> usize {
        self.doc
            .log_maxsize
            .unwrap_or(buffers::DEFAULT_LOG_MAX_SIZE)
    }

    pub fn pool_timeout(&self) -> Duration {
        let ms = env_millis("SSHFABRIC_POOL_TIMEOUT_MS")
            .or(self.doc.ssh_pool_timeout_ms)
            .unwrap_or(pool::DEFAULT_ACQUIRE_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn pool_avail_wait(&self) -> Duration {
        let ms = env_millis("SSHFABRIC_POOL_AVAILWAIT_MS")
            .or(self.doc.ssh_pool_availwait_ms)
            .unwrap_or(pool::DEFAULT_AVAIL_WAIT_MS);
        Duration::from_millis(ms)
    }
}
