use crate::errors::{FabricError, Result};
use crate::managers::pool::{ConnectionPool, PoolSettings};
use crate::services::config::Config;
use crate::services::logger::Logger;
use crate::transport::{Connector, Ssh2Connector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

mod deploy;
mod dirs;
mod exec;
mod program;

pub use exec::RemoteCommand;
pub use program::Program;

/// Caller-supplied channel receiving newline-terminated progress and log text.
pub type LineSink = mpsc::Sender<String>;

#[derive(Default)]
struct Registry {
    pools: HashMap<String, Arc<ConnectionPool>>,
    programs: HashMap<String, Program>,
}

struct FabricInner {
    config: Config,
    connector: Arc<dyn Connector>,
    logger: Logger,
    // `None` once closed: every lookup then reports absence.
    registry: Mutex<Option<Registry>>,
}

/// Owner of every connection pool and running program for one loaded
/// configuration. Cloning yields another handle to the same fabric.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Fabric {
    /// Starts a fabric talking ssh through the local agent.
    pub fn start(config: Config, logger: Logger) -> Self {
        let connector = Arc::new(Ssh2Connector::new(logger.clone(), config.ssh_port()));
        Self::with_connector(config, connector, logger)
    }

    pub fn with_connector(config: Config, connector: Arc<dyn Connector>, logger: Logger) -> Self {
        Self {
            inner: Arc::new(FabricInner {
                config,
                connector,
                logger: logger.child("fabric"),
                registry: Mutex::new(Some(Registry::default())),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    pub fn is_healthy(&self) -> bool {
        self.with_registry(|_| ()).is_some()
    }

    fn with_registry<T>(&self, f: impl FnOnce(&mut Registry) -> T) -> Option<T> {
        let mut guard = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        guard.as_mut().map(f)
    }

    pub fn get_program(&self, name: &str) -> Option<Program> {
        self.with_registry(|r| r.programs.get(name).cloned())
            .flatten()
    }

    pub fn set_program(&self, name: &str, program: Program) {
        self.with_registry(|r| r.programs.insert(name.to_string(), program));
    }

    pub fn delete_program(&self, name: &str) -> Option<Program> {
        self.with_registry(|r| r.programs.remove(name)).flatten()
    }

    /// Removes `program` only if it is still the registered instance.
    pub(crate) fn unregister_program(&self, program: &Program) {
        self.with_registry(|r| {
            if r
                .programs
                .get(program.name())
                .map(|current| current.same_as(program))
                .unwrap_or(false)
            {
                r.programs.remove(program.name());
            }
        });
    }

    pub fn program_names(&self) -> Vec<String> {
        let mut names = self
            .with_registry(|r| r.programs.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn get_pool(&self, host: &str) -> Option<Arc<ConnectionPool>> {
        self.with_registry(|r| r.pools.get(host).cloned()).flatten()
    }

    pub fn set_pool(&self, host: &str, pool: Arc<ConnectionPool>) {
        self.with_registry(|r| r.pools.insert(host.to_string(), pool));
    }

    pub fn delete_pool(&self, host: &str) -> Option<Arc<ConnectionPool>> {
        self.with_registry(|r| r.pools.remove(host)).flatten()
    }

    /// Pool for `host`, created on first use and sized from configuration.
    pub fn pool_for(&self, host: &str, user: &str) -> Result<Arc<ConnectionPool>> {
        let config = &self.inner.config;
        let created = self.with_registry(|r| {
            r.pools
                .entry(host.to_string())
                .or_insert_with(|| {
                    Arc::new(ConnectionPool::new(
                        host,
                        user,
                        PoolSettings {
                            size: config.ssh_pool_size(),
                            overflow: config.ssh_pool_overflow(),
                            timeout: config.pool_timeout(),
                            avail_wait: config.pool_avail_wait(),
                        },
                        self.inner.connector.clone(),
                        self.inner.logger.clone(),
                    ))
                })
                .clone()
        });
        created.ok_or_else(|| FabricError::PoolClosed {
            host: host.to_string(),
        })
    }

    /// Asks every registered program to terminate. Programs stay registered
    /// until their supervisors exit.
    pub async fn killall(&self) {
        let programs = self
            .with_registry(|r| r.programs.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for program in programs {
            program.kill().await;
        }
    }

    pub async fn kill_program(&self, name: &str) -> Result<()> {
        let program = self
            .delete_program(name)
            .ok_or_else(|| FabricError::ProgramNotFound(name.to_string()))?;
        program.kill().await;
        Ok(())
    }

    /// Closes every pool and kills every program. Safe to call twice.
    pub async fn close(&self) {
        let registry = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        let Some(registry) = registry else {
            return;
        };
        self.inner.logger.info(
            "closing",
            Some(&serde_json::json!({
                "pools": registry.pools.len(),
                "programs": registry.programs.len(),
            })),
        );
        futures::future::join_all(registry.pools.values().map(|pool| pool.close())).await;
        for program in registry.programs.values() {
            program.kill().await;
        }
    }
}
