#![allow(dead_code)]

use async_trait::async_trait;
use sshfabric::errors::{FabricError, Result};
use sshfabric::services::logger::{LogLevel, Logger};
use sshfabric::transport::{Connection, Connector, RemoteConnection, RemoteSession, SessionRequest};
use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn quiet_logger() -> Logger {
    let mut logger = Logger::new("test");
    logger.set_level(LogLevel::Error);
    logger
}

/// How the scripted remote answers a command containing `pattern`.
#[derive(Clone, Debug)]
pub struct Rule {
    pub pattern: String,
    pub stdout: String,
    pub stderr: String,
    pub exit: i32,
    /// Keep the session open until it is closed from our side.
    pub hold_open: bool,
    /// `send_eof` reports WouldBlock this many times before succeeding.
    pub eof_would_block: usize,
}

impl Rule {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit: 0,
            hold_open: false,
            eof_would_block: 0,
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_string();
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit = code;
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn eof_would_block(mut self, times: usize) -> Self {
        self.eof_would_block = times;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executed {
    pub host: String,
    pub user: String,
    pub command: String,
    pub pty: bool,
    pub environ: Vec<(String, String)>,
}

#[derive(Default)]
pub struct RemoteState {
    pub existing_dirs: HashSet<String>,
    pub rules: Vec<Rule>,
    pub executed: Vec<Executed>,
    pub stdin_received: Vec<String>,
    pub created: usize,
    pub closed: usize,
    pub max_live: usize,
    pub terminated: usize,
    pub fail_connect: bool,
    /// Connection numbers (1-based, in creation order) whose sessions never open.
    pub broken_connections: HashSet<usize>,
}

impl RemoteState {
    pub fn live(&self) -> usize {
        self.created - self.closed
    }
}

/// In-memory stand-in for remote hosts. Directory probes answer from
/// `existing_dirs`; other commands follow the first matching rule.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub state: Arc<Mutex<RemoteState>>,
    pub connect_delay: Duration,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, dir: &str) -> Self {
        self.state.lock().unwrap().existing_dirs.insert(dir.to_string());
        self
    }

    pub fn with_rule(self, rule: Rule) -> Self {
        self.state.lock().unwrap().rules.push(rule);
        self
    }

    pub fn with_broken_connection(self, number: usize) -> Self {
        self.state.lock().unwrap().broken_connections.insert(number);
        self
    }

    pub fn failing(self) -> Self {
        self.state.lock().unwrap().fail_connect = true;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.command).collect()
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&RemoteState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, host: &str, user: &str) -> Result<Connection> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_connect {
            return Err(FabricError::ConnectionCreate {
                host: host.to_string(),
                user: user.to_string(),
                message: "connection refused".to_string(),
            });
        }
        state.created += 1;
        state.max_live = state.max_live.max(state.live());
        Ok(Box::new(ScriptedConnection {
            number: state.created,
            host: host.to_string(),
            user: user.to_string(),
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    number: usize,
    host: String,
    user: String,
    state: Arc<Mutex<RemoteState>>,
    closed: bool,
}

impl RemoteConnection for ScriptedConnection {
    fn open_session(&mut self, request: &SessionRequest) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.state.lock().unwrap();
        if state.broken_connections.contains(&self.number) {
            return Err(FabricError::session("channel open failed"));
        }
        state.executed.push(Executed {
            host: self.host.clone(),
            user: self.user.clone(),
            command: request.command.clone(),
            pty: request.pty,
            environ: request
                .environ
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        });

        let rule = if request.command.starts_with("if [ -d ") {
            let exists = state
                .existing_dirs
                .iter()
                .any(|dir| request.command.contains(&format!("'{}'", dir)));
            Rule::new("").stdout(if exists { "true\n" } else { "false\n" })
        } else {
            state
                .rules
                .iter()
                .find(|rule| request.command.contains(&rule.pattern))
                .cloned()
                .unwrap_or_else(|| Rule::new(""))
        };

        Ok(Box::new(ScriptedSession {
            eof_blocks: rule.eof_would_block,
            stdout: rule.stdout.clone().into_bytes(),
            stderr: rule.stderr.clone().into_bytes(),
            rule,
            stdin: Vec::new(),
            stdin_closed: false,
            terminated: false,
            state: self.state.clone(),
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().closed += 1;
        }
    }
}

struct ScriptedSession {
    rule: Rule,
    eof_blocks: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdin: Vec<u8>,
    stdin_closed: bool,
    terminated: bool,
    state: Arc<Mutex<RemoteState>>,
}

fn drain_into(source: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    let n = source.len().min(buf.len());
    buf[..n].copy_from_slice(&source[..n]);
    source.drain(..n);
    n
}

impl RemoteSession for ScriptedSession {
    fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn send_eof(&mut self) -> io::Result<()> {
        if self.eof_blocks > 0 {
            self.eof_blocks -= 1;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        if !self.stdin_closed {
            self.stdin_closed = true;
            if !self.stdin.is_empty() {
                let text = String::from_utf8_lossy(&self.stdin).into_owned();
                self.state.lock().unwrap().stdin_received.push(text);
            }
        }
        Ok(())
    }

    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.stdout.is_empty() && self.rule.hold_open && !self.terminated {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(drain_into(&mut self.stdout, buf))
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(drain_into(&mut self.stderr, buf))
    }

    fn eof(&self) -> bool {
        self.stdout.is_empty()
            && self.stderr.is_empty()
            && self.stdin_closed
            && (!self.rule.hold_open || self.terminated)
    }

    fn signal_term(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.state.lock().unwrap().terminated += 1;
        }
    }

    fn close(&mut self) -> Result<Option<i32>> {
        Ok(Some(self.rule.exit))
    }
}

/// Collects everything sent to a sink until all senders are dropped.
pub fn collecting_sink() -> (mpsc::Sender<String>, tokio::task::JoinHandle<Vec<String>>) {
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let handle = tokio::spawn(async move {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    });
    (tx, handle)
}

/// Asserts `needles` occur in `haystack` in order (not necessarily adjacent).
pub fn assert_in_order(haystack: &[String], needles: &[&str]) {
    let mut from = 0;
    for needle in needles {
        match haystack[from..].iter().position(|line| line.contains(needle)) {
            Some(offset) => from += offset + 1,
            None => panic!("expected {:?} after position {} in {:#?}", needle, from, haystack),
        }
    }
}

pub fn sample_config() -> sshfabric::Config {
    sshfabric::Config::from_value(serde_json::json!({
        "user": "couchbase",
        "ssh.pool.size": 2,
        "ssh.pool.overflow": 2,
        "ssh.pool.timeout_ms": 5000,
        "log.maxsize": 3,
        "programs": [
            {
                "name": "idx",
                "targethost": "h1",
                "targetroot": "/opt",
                "repository": [
                    {
                        "source": "ssh://h/repo",
                        "target": "/opt/idx",
                        "install": ["make"],
                        "uninstall": ["make clean"]
                    }
                ],
                "environ": {"GOPATH": "/opt/go"},
                "command": "/opt/idx/bin/indexer",
                "commandargs": ["-vbuckets", "8"],
                "log.color": "cyan"
            },
            {
                "name": "local",
                "targethost": "h2",
                "targetroot": "/opt",
                "repository": [
                    {"source": "/home/dev/repo", "target": "/opt/local", "install": ["make"]}
                ],
                "command": "sleep 1000"
            }
        ]
    }))
    .expect("sample config")
}

pub fn fabric(connector: &ScriptedConnector) -> sshfabric::Fabric {
    sshfabric::Fabric::with_connector(sample_config(), Arc::new(connector.clone()), quiet_logger())
}
