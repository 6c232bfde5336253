//! Remote-execution fabric: pooled ssh connections, one-shot and daemon
//! remote commands, supervised programs with rolling logs, and
//! clone/patch/install deployment of configured programs.

pub mod cli;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod services;
pub mod transport;
pub mod utils;

pub use errors::{FabricError, FabricErrorKind};
pub use managers::fabric::{Fabric, LineSink, Program, RemoteCommand};
pub use managers::pool::{ConnectionPool, PoolSettings, PoolStats};
pub use services::config::{Config, Repository};
