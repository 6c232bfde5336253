use crate::constants::buffers;
use crate::errors::{FabricError, Result};
use crate::managers::fabric::{Fabric, LineSink};
use crate::services::config::Config;
use crate::services::logger::Logger;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "sshfabric")]
#[command(version, about = "Install, run and kill configured programs on remote hosts over ssh")]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List configured programs
    List,
    /// Clone, patch and install a program on its target host
    Install {
        program: String,
        /// Reinstall even if the target checkout exists
        #[arg(short, long)]
        force: bool,
    },
    /// Remove a program's checkouts and run its uninstall commands
    Uninstall { program: String },
    /// Run a program and stream its output until it exits or Ctrl-C
    Run { program: String },
    /// Check whether a directory exists on a program's target host
    Isdir { program: String, dir: String },
}

/// Prints sink lines to stdout until every sender is gone.
fn spawn_printer() -> (LineSink, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<String>(buffers::SINK_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(line) = rx.recv().await {
            let _ = stdout.write_all(line.as_bytes());
            let _ = stdout.flush();
        }
    });
    (tx, handle)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let fabric = Fabric::start(config, Logger::new("sshfabric"));
    let (sink, printer) = spawn_printer();

    let result = dispatch(&fabric, cli.command, &sink).await;
    if let Err(err) = &result {
        let _ = sink.send(format!("{}\n", err)).await;
    }
    fabric.killall().await;
    fabric.close().await;
    drop(sink);
    let _ = printer.await;
    result
}

async fn dispatch(fabric: &Fabric, command: Command, sink: &LineSink) -> Result<()> {
    match command {
        Command::List => {
            for name in fabric.config().program_names() {
                let _ = sink.send(format!("{}\n", name)).await;
            }
            Ok(())
        }
        Command::Install { program, force } => fabric.install_program(&program, sink, force).await,
        Command::Uninstall { program } => fabric.uninstall_program(&program, sink).await,
        Command::Run { program } => {
            let handle = fabric.run_program(&program, sink).await?;
            tokio::select! {
                _ = handle.closed() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    match fabric.kill_program(&program).await {
                        Ok(()) | Err(FabricError::ProgramNotFound(_)) => Ok(()),
                        Err(err) => Err(err),
                    }
                }
            }
        }
        Command::Isdir { program, dir } => {
            let config = fabric.config();
            let exists = fabric
                .is_dir(&config.target_host(&program)?, &config.user(&program)?, &dir)
                .await;
            let _ = sink.send(format!("{}\n", exists)).await;
            Ok(())
        }
    }
}
