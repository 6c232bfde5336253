//! Transport seam between the fabric and the wire. The fabric only ever sees
//! these traits; `ssh` provides the agent-authenticated ssh2 implementation.

mod ssh;

pub use ssh::Ssh2Connector;

use crate::errors::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;

/// What to run on a freshly opened session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    pub command: String,
    pub environ: BTreeMap<String, String>,
    /// Allocate a pseudo-terminal with local echo disabled.
    pub pty: bool,
}

/// A running remote command. All stream calls are non-blocking and report
/// `io::ErrorKind::WouldBlock` when nothing is ready.
pub trait RemoteSession: Send {
    fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn send_eof(&mut self) -> io::Result<()>;
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Remote side has closed its output.
    fn eof(&self) -> bool;
    fn signal_term(&mut self);
    /// Closes the channel and waits for the exit status.
    fn close(&mut self) -> Result<Option<i32>>;
}

/// An authenticated connection that can host many sequential sessions.
pub trait RemoteConnection: Send {
    fn open_session(&mut self, request: &SessionRequest) -> Result<Box<dyn RemoteSession>>;
    fn close(&mut self);
}

pub type Connection = Box<dyn RemoteConnection>;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, host: &str, user: &str) -> Result<Connection>;
}
