use super::{Fabric, LineSink};
use crate::constants::{buffers, network as network_constants};
use crate::errors::{FabricError, Result};
use crate::managers::pool::PooledConnection;
use crate::services::logger::Logger;
use crate::transport::{RemoteSession, SessionRequest};
use crate::utils::cancel::Cancel;
use crate::utils::lines::LineSplitter;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::sync::mpsc;

/// One logical remote command. Built fresh for every invocation.
#[derive(Debug, Default)]
pub struct RemoteCommand {
    pub host: String,
    pub user: String,
    pub environ: BTreeMap<String, String>,
    pub command: String,
    pub stdin: Option<mpsc::Receiver<String>>,
    pub stdout: Option<LineSink>,
    pub stderr: Option<LineSink>,
    pub cancel: Option<Cancel>,
}

impl RemoteCommand {
    pub fn new(host: &str, user: &str, command: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn environ(mut self, environ: BTreeMap<String, String>) -> Self {
        self.environ = environ;
        self
    }

    pub fn stdin(mut self, stdin: mpsc::Receiver<String>) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn stdout(mut self, sink: LineSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    pub fn stderr(mut self, sink: LineSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Sends both output streams to the same sink.
    pub fn output(self, sink: &LineSink) -> Self {
        self.stdout(sink.clone()).stderr(sink.clone())
    }

    pub fn cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

enum Outcome {
    Exited(Option<i32>),
    Cancelled,
}

struct Pumps {
    stdin: Option<mpsc::Receiver<String>>,
    stdout: Option<LineSink>,
    stderr: Option<LineSink>,
    cancel: Option<Cancel>,
}

impl Fabric {
    /// Runs `cmd` on its host. One-shot commands block until the remote exits;
    /// daemon commands get a pseudo-terminal and also return once `cancel`
    /// fires, tearing the session down.
    pub async fn execute(&self, cmd: RemoteCommand, daemon: bool) -> Result<()> {
        let RemoteCommand {
            host,
            user,
            environ,
            command,
            stdin,
            stdout,
            stderr,
            cancel,
        } = cmd;

        let pool = self.pool_for(&host, &user)?;
        let mut lease = PooledConnection::acquire(&pool).await?;

        let request = SessionRequest {
            command: command.clone(),
            environ,
            pty: daemon,
        };
        let error_sink = stderr.clone();
        let pumps = Pumps {
            stdin,
            stdout,
            stderr,
            cancel: if daemon { cancel } else { None },
        };
        let logger = self.logger().child("exec");
        logger.debug(
            "execute",
            Some(&serde_json::json!({"host": host, "command": command, "daemon": daemon})),
        );

        let outcome = tokio::task::spawn_blocking(move || {
            let conn = lease.connection()?;
            let mut session = match conn.open_session(&request) {
                Ok(session) => session,
                Err(err) => {
                    lease.discard();
                    return Err(err);
                }
            };
            let outcome = run_session(session.as_mut(), pumps, &logger);
            drop(session);
            // Transport failures leave the connection in an unknown state.
            if outcome.is_err() {
                lease.discard();
            }
            outcome
        })
        .await
        .map_err(|_| FabricError::session("remote command task failed"))?;

        let result = match outcome {
            Ok(Outcome::Exited(Some(0))) | Ok(Outcome::Exited(None)) | Ok(Outcome::Cancelled) => {
                Ok(())
            }
            Ok(Outcome::Exited(Some(code))) => Err(FabricError::remote_exit(
                &command,
                format!("exit status {}", code),
            )),
            Err(err) => Err(err),
        };
        if let (Err(err), Some(sink)) = (result.as_ref(), error_sink.as_ref()) {
            let _ = sink.send(format!("{}\n", err)).await;
        }
        result
    }
}

fn forward(sink: &Option<LineSink>, lines: Vec<String>) {
    if let Some(sink) = sink {
        for line in lines {
            // A dropped consumer only loses display; keep pumping.
            let _ = sink.blocking_send(line);
        }
    }
}

fn report(sink: &Option<LineSink>, message: String) {
    forward(sink, vec![format!("{}\n", message)]);
}

/// Polls stdin, stdout and stderr on a non-blocking session until the remote
/// side closes or cancellation fires. Runs on a blocking thread.
fn run_session(session: &mut dyn RemoteSession, mut pumps: Pumps, logger: &Logger) -> Result<Outcome> {
    let mut stdin_done = pumps.stdin.is_none();
    // Non-blocking send_eof may need several passes.
    let mut eof_pending = stdin_done;
    let mut stdin_pending: Vec<u8> = Vec::new();
    let mut stdout_lines = LineSplitter::new();
    let mut stderr_lines = LineSplitter::new();
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut buf = vec![0u8; buffers::READ_CHUNK_BYTES];

    loop {
        if pumps
            .cancel
            .as_ref()
            .map(|cancel| cancel.is_fired())
            .unwrap_or(false)
        {
            logger.debug("cancelled", None);
            session.signal_term();
            let _ = session.close();
            return Ok(Outcome::Cancelled);
        }

        let mut progressed = false;

        if eof_pending {
            match session.send_eof() {
                Ok(()) => {
                    eof_pending = false;
                    progressed = true;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => {
                    report(&pumps.stderr, err.to_string());
                    eof_pending = false;
                }
            }
        }

        if !stdin_done {
            if stdin_pending.is_empty() {
                if let Some(rx) = pumps.stdin.as_mut() {
                    match rx.try_recv() {
                        Ok(text) => stdin_pending = text.into_bytes(),
                        Err(mpsc::error::TryRecvError::Empty) => {}
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            stdin_done = true;
                            eof_pending = true;
                        }
                    }
                }
            }
            if !stdin_pending.is_empty() {
                match session.write_stdin(&stdin_pending) {
                    Ok(n) if n > 0 => {
                        stdin_pending.drain(..n);
                        progressed = true;
                    }
                    Ok(_) => {}
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) => {
                        report(&pumps.stderr, err.to_string());
                        stdin_pending.clear();
                        stdin_done = true;
                        eof_pending = true;
                    }
                }
            }
        }

        if !stdout_done {
            match session.read_stdout(&mut buf) {
                Ok(n) if n > 0 => {
                    forward(&pumps.stdout, stdout_lines.feed(&buf[..n]));
                    progressed = true;
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => {
                    report(&pumps.stderr, format!("stdout: {}", err));
                    stdout_done = true;
                }
            }
        }

        if !stderr_done {
            match session.read_stderr(&mut buf) {
                Ok(n) if n > 0 => {
                    forward(&pumps.stderr, stderr_lines.feed(&buf[..n]));
                    progressed = true;
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => {
                    report(&pumps.stderr, format!("stderr: {}", err));
                    stderr_done = true;
                }
            }
        }

        if !progressed && (session.eof() || (stdout_done && stderr_done)) {
            break;
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(network_constants::POLL_IDLE_SLEEP_MS));
        }
    }

    forward(&pumps.stdout, stdout_lines.finish().into_iter().collect());
    forward(&pumps.stderr, stderr_lines.finish().into_iter().collect());
    session.signal_term();
    let status = session.close()?;
    Ok(Outcome::Exited(status))
}
