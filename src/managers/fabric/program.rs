use super::{Fabric, LineSink, RemoteCommand};
use crate::constants::buffers;
use crate::errors::Result;
use crate::services::logger::Logger;
use crate::utils::cancel::Cancel;
use crate::utils::color::LogColor;
use crate::utils::rolling_log::RollingLog;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct Logs {
    out: RollingLog,
    err: RollingLog,
}

struct ProgramInner {
    name: String,
    color: LogColor,
    output: LineSink,
    errors: LineSink,
    logs: Mutex<Logs>,
    cancel: Cancel,
    healthy: AtomicBool,
    logger: Logger,
}

/// Supervisor of one daemon-mode remote command.
///
/// Lines from the remote stdout and stderr are kept in two rolling logs and
/// forwarded, tagged with `[name]`, to the sinks supplied at start. The
/// supervising task lives until the remote command exits or the program is
/// killed; it never outlives the fabric's pools.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

enum Stream {
    Out,
    Err,
}

impl Program {
    fn new(name: &str, color: LogColor, sink: &LineSink, log_max: usize, logger: Logger) -> Self {
        Self {
            inner: Arc::new(ProgramInner {
                name: name.to_string(),
                color,
                output: sink.clone(),
                errors: sink.clone(),
                logs: Mutex::new(Logs {
                    out: RollingLog::new(log_max),
                    err: RollingLog::new(log_max),
                }),
                cancel: Cancel::new(),
                healthy: AtomicBool::new(true),
                logger: logger.child(name),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_fired()
    }

    /// Resolves once the program is killed or its remote command exits.
    pub async fn closed(&self) {
        self.inner.cancel.fired().await
    }

    pub fn out_log(&self) -> Vec<String> {
        self.lock_logs().out.snapshot()
    }

    pub fn err_log(&self) -> Vec<String> {
        self.lock_logs().err.snapshot()
    }

    /// Last `n` retained stderr lines.
    pub fn err_tail(&self, n: usize) -> Vec<String> {
        self.lock_logs().err.tail(n)
    }

    pub(crate) fn same_as(&self, other: &Program) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock_logs(&self) -> std::sync::MutexGuard<'_, Logs> {
        self.inner.logs.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// `[name] ` tagged copy of `text`.
    pub fn tagged(&self, text: &str) -> String {
        format!("{}{}", self.inner.color.tag(&self.inner.name), text)
    }

    /// Closes the program and announces it on the output sink. Only the call
    /// that actually closes it announces.
    pub async fn kill(&self) {
        if !self.shut() {
            return;
        }
        let _ = self
            .inner
            .output
            .send(self.tagged("Getting killed\n"))
            .await;
    }

    /// Fires the cancellation signal once; later calls do nothing.
    pub fn close(&self) {
        self.shut();
    }

    fn shut(&self) -> bool {
        if !self.inner.cancel.fire() {
            return false;
        }
        self.inner.healthy.store(false, Ordering::SeqCst);
        self.inner.logger.debug("closed", None);
        true
    }

    async fn record(&self, stream: Stream, line: String) {
        let sink = {
            let mut logs = self.lock_logs();
            match stream {
                Stream::Out => {
                    logs.out.push(line.clone());
                    &self.inner.output
                }
                Stream::Err => {
                    logs.err.push(line.clone());
                    &self.inner.errors
                }
            }
        };
        let _ = sink.send(self.tagged(&line)).await;
    }

    async fn drain(self, mut out_rx: mpsc::Receiver<String>, mut err_rx: mpsc::Receiver<String>) {
        let mut out_open = true;
        let mut err_open = true;
        while out_open || err_open {
            tokio::select! {
                line = out_rx.recv(), if out_open => match line {
                    Some(line) => self.record(Stream::Out, line).await,
                    None => out_open = false,
                },
                line = err_rx.recv(), if err_open => match line {
                    Some(line) => self.record(Stream::Err, line).await,
                    None => err_open = false,
                },
                _ = self.inner.cancel.fired() => break,
            }
        }
    }

    async fn supervise(self, fabric: Fabric, cmd: RemoteCommand) {
        let (out_tx, out_rx) = mpsc::channel(buffers::SINK_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(buffers::SINK_CAPACITY);
        let drain = tokio::spawn(self.clone().drain(out_rx, err_rx));

        let cmd = cmd
            .stdout(out_tx)
            .stderr(err_tx)
            .cancel(self.inner.cancel.clone());
        if let Err(err) = fabric.execute(cmd, true).await {
            self.inner.logger.warn(
                "remote command ended with error",
                Some(&serde_json::json!({"error": err.to_string()})),
            );
        }
        let _ = drain.await;
        self.close();
        let summary = {
            let logs = self.lock_logs();
            serde_json::json!({
                "stdout_lines": logs.out.total(),
                "stderr_lines": logs.err.total(),
                "stderr_tail": logs.err.tail(buffers::EXIT_TAIL_LINES),
            })
        };
        self.inner.logger.info("exited", Some(&summary));
        fabric.unregister_program(&self);
    }
}

impl Fabric {
    /// Starts `name` as a supervised daemon and returns without waiting for
    /// the remote command to come up. A previous instance is killed first.
    pub async fn run_program(&self, name: &str, sink: &LineSink) -> Result<Program> {
        let config = self.config();
        let cmd = RemoteCommand::new(
            &config.target_host(name)?,
            &config.user(name)?,
            config.command(name)?,
        )
        .environ(config.environ(name)?);
        let color = LogColor::from(config.log_color(name)?.as_deref());

        if let Some(previous) = self.delete_program(name) {
            previous.kill().await;
        }

        let program = Program::new(
            name,
            color,
            sink,
            config.log_max_size(),
            self.logger().child("program"),
        );
        self.set_program(name, program.clone());
        tokio::spawn(program.clone().supervise(self.clone(), cmd));
        Ok(program)
    }
}
