use super::{Fabric, LineSink, RemoteCommand};
use crate::constants::buffers;
use crate::errors::{FabricError, Result};
use crate::services::config::Repository;
use crate::utils::shell::{apply_command, clone_command, diff_command};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use percent_encoding::percent_decode_str;
use url::Url;

/// Where the program's commands run.
struct Target {
    host: String,
    user: String,
    environ: BTreeMap<String, String>,
}

impl Fabric {
    fn target(&self, program: &str) -> Result<Target> {
        let config = self.config();
        Ok(Target {
            host: config.target_host(program)?,
            user: config.user(program)?,
            environ: config.environ(program)?,
        })
    }

    async fn run_echoed(&self, target: &Target, command: &str, sink: &LineSink) -> Result<()> {
        let _ = sink.send(format!("{}\n", command)).await;
        self.execute(
            RemoteCommand::new(&target.host, &target.user, command)
                .environ(target.environ.clone())
                .output(sink),
            false,
        )
        .await
    }

    /// Clones and patches every repository of `program` (skipping existing
    /// checkouts unless `force`), then runs its install commands. Stops at
    /// the first failure; earlier remote effects are left in place.
    pub async fn install_program(&self, program: &str, sink: &LineSink, force: bool) -> Result<()> {
        let target = self.target(program)?;
        let repos = self.config().repositories(program)?;
        for repo in &repos {
            if force || !self.is_dir(&target.host, &target.user, &repo.target).await {
                self.clone_repository(&target.host, program, repo, sink)
                    .await?;
                self.patch_repository(&target.host, program, repo, sink)
                    .await?;
            } else {
                let _ = sink
                    .send(format!("target {:?} already exists\n", repo.target))
                    .await;
            }
            for command in &repo.install {
                self.run_echoed(&target, command, sink).await?;
            }
        }
        Ok(())
    }

    pub async fn uninstall_program(&self, program: &str, sink: &LineSink) -> Result<()> {
        let target = self.target(program)?;
        let repos = self.config().repositories(program)?;
        for repo in &repos {
            self.remove_remote_dir(&target.host, &target.user, &repo.target, sink)
                .await?;
            for command in &repo.uninstall {
                self.run_echoed(&target, command, sink).await?;
            }
        }
        Ok(())
    }

    /// Replaces the repository's target directory with a fresh clone.
    pub async fn clone_repository(
        &self,
        host: &str,
        program: &str,
        repo: &Repository,
        sink: &LineSink,
    ) -> Result<()> {
        let mut target = self.target(program)?;
        target.host = host.to_string();
        self.remove_remote_dir(host, &target.user, &repo.target, sink)
            .await?;
        self.make_remote_dirs(host, &target.user, &repo.target, sink)
            .await?;
        self.run_echoed(&target, &clone_command(&repo.source, &repo.target), sink)
            .await
    }

    /// Applies the source checkout's uncommitted changes to the fresh clone.
    pub async fn patch_repository(
        &self,
        host: &str,
        program: &str,
        repo: &Repository,
        sink: &LineSink,
    ) -> Result<()> {
        let diff = self.diff_repository(program, repo, sink).await?;
        if diff.is_empty() {
            return Ok(());
        }
        let target = self.target(program)?;
        let command = apply_command(&repo.target);
        let _ = sink.send(format!("{}\n", command)).await;

        let (stdin_tx, stdin_rx) = mpsc::channel(buffers::STDIN_CAPACITY);
        let _ = stdin_tx.send(diff).await;
        drop(stdin_tx);
        self.execute(
            RemoteCommand::new(host, &target.user, command)
                .environ(target.environ)
                .stdin(stdin_rx)
                .output(sink),
            false,
        )
        .await
    }

    /// `git diff` of the source checkout. Only `ssh://[user@]host/path`
    /// sources can be inspected; anything else is refused.
    pub async fn diff_repository(
        &self,
        program: &str,
        repo: &Repository,
        sink: &LineSink,
    ) -> Result<String> {
        let unsupported = || FabricError::UnsupportedSource {
            source_locator: repo.source.clone(),
        };
        let url = Url::parse(&repo.source).map_err(|_| unsupported())?;
        let host = match (url.scheme(), url.host_str()) {
            ("ssh", Some(host)) if !host.is_empty() => host.to_string(),
            _ => return Err(unsupported()),
        };
        let user = if url.username().is_empty() {
            self.config().user(program)?
        } else {
            url.username().to_string()
        };

        let path = percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|_| unsupported())?;
        let command = diff_command(&path);
        let _ = sink.send(format!("{}\n", command)).await;

        let (diff_tx, mut diff_rx) = mpsc::channel::<String>(buffers::SINK_CAPACITY);
        let cmd = RemoteCommand::new(&host, &user, command)
            .stdout(diff_tx)
            .stderr(sink.clone());
        let (result, diff) = tokio::join!(self.execute(cmd, false), async move {
            let mut diff = String::new();
            while let Some(chunk) = diff_rx.recv().await {
                diff.push_str(&chunk);
            }
            diff
        });
        result?;
        Ok(diff)
    }
}
