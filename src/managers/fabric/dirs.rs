use super::{Fabric, LineSink, RemoteCommand};
use crate::errors::Result;
use crate::utils::shell::{is_dir_command, mkdir_command, rmdir_command};
use tokio::sync::mpsc;

impl Fabric {
    pub async fn make_remote_dirs(
        &self,
        host: &str,
        user: &str,
        dir: &str,
        sink: &LineSink,
    ) -> Result<()> {
        let _ = sink.send(format!("Creating directory {:?}\n", dir)).await;
        self.execute(
            RemoteCommand::new(host, user, mkdir_command(dir)).output(sink),
            false,
        )
        .await
    }

    pub async fn remove_remote_dir(
        &self,
        host: &str,
        user: &str,
        dir: &str,
        sink: &LineSink,
    ) -> Result<()> {
        let _ = sink.send(format!("Removing directory {:?}\n", dir)).await;
        self.execute(
            RemoteCommand::new(host, user, rmdir_command(dir)).output(sink),
            false,
        )
        .await
    }

    /// Probes `dir` on the remote host. Anything but a clean "true" is false.
    pub async fn is_dir(&self, host: &str, user: &str, dir: &str) -> bool {
        let (tx, mut rx) = mpsc::channel::<String>(1);
        let cmd = RemoteCommand::new(host, user, is_dir_command(dir)).stdout(tx);
        let (result, first_line) = tokio::join!(self.execute(cmd, false), async move {
            rx.recv().await
        });
        if let Err(err) = result {
            self.logger().debug(
                "is_dir probe failed",
                Some(&serde_json::json!({"host": host, "dir": dir, "error": err.to_string()})),
            );
            return false;
        }
        first_line
            .map(|line| line.trim() == "true")
            .unwrap_or(false)
    }
}
