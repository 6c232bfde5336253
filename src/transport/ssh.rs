use super::{Connection, Connector, RemoteConnection, RemoteSession, SessionRequest};
use crate::constants::{network as network_constants, pty as pty_constants};
use crate::errors::{FabricError, Result};
use crate::services::logger::Logger;
use async_trait::async_trait;
use ssh2::{Channel, PtyModeOpcode, PtyModes, Session, Stream};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connects with ssh2 and authenticates through the running ssh-agent
/// (`SSH_AUTH_SOCK`). No credentials are read or stored here.
#[derive(Clone)]
pub struct Ssh2Connector {
    logger: Logger,
    port: u16,
    ready_timeout: Duration,
}

impl Ssh2Connector {
    pub fn new(logger: Logger, port: u16) -> Self {
        Self {
            logger: logger.child("ssh"),
            port,
            ready_timeout: Duration::from_millis(network_constants::TIMEOUT_SSH_READY_MS),
        }
    }
}

#[async_trait]
impl Connector for Ssh2Connector {
    async fn connect(&self, host: &str, user: &str) -> Result<Connection> {
        let host_owned = host.to_string();
        let user_owned = user.to_string();
        let port = self.port;
        let ready_timeout = self.ready_timeout;
        self.logger.debug(
            "connect",
            Some(&serde_json::json!({"host": host, "user": user, "port": port})),
        );
        let session = tokio::task::spawn_blocking(move || {
            connect_session(&host_owned, port, &user_owned, ready_timeout)
        })
        .await
        .map_err(|_| FabricError::session("SSH connect task failed"))?
        .map_err(|err| FabricError::ConnectionCreate {
            host: host.to_string(),
            user: user.to_string(),
            message: err.to_string(),
        })?;
        Ok(Box::new(Ssh2Connection {
            session,
            logger: self.logger.clone(),
        }))
    }
}

fn connect_session(host: &str, port: u16, user: &str, ready_timeout: Duration) -> Result<Session> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| FabricError::session(format!("cannot resolve {}:{}", host, port)))?;
    let tcp = TcpStream::connect_timeout(&addr, ready_timeout)?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(ready_timeout.as_millis() as u32);
    session.handshake()?;
    session.userauth_agent(user)?;
    if !session.authenticated() {
        return Err(FabricError::session("SSH agent authentication failed"));
    }
    // Commands may legitimately stay silent for a long time.
    session.set_timeout(0);
    let interval = std::cmp::max(1, (network_constants::KEEPALIVE_INTERVAL_MS / 1000) as u32);
    session.set_keepalive(true, interval);
    Ok(session)
}

struct Ssh2Connection {
    session: Session,
    logger: Logger,
}

impl RemoteConnection for Ssh2Connection {
    fn open_session(&mut self, request: &SessionRequest) -> Result<Box<dyn RemoteSession>> {
        self.session.set_blocking(true);
        let mut channel = self.session.channel_session()?;
        if request.pty {
            let mut modes = PtyModes::new();
            modes.set_boolean(PtyModeOpcode::ECHO, false);
            modes.set_u32(PtyModeOpcode::TTY_OP_ISPEED, pty_constants::SPEED_BAUD);
            modes.set_u32(PtyModeOpcode::TTY_OP_OSPEED, pty_constants::SPEED_BAUD);
            channel.request_pty(
                pty_constants::TERM,
                Some(modes),
                Some((pty_constants::COLUMNS, pty_constants::ROWS, 0, 0)),
            )?;
        }
        for (key, value) in &request.environ {
            if let Err(err) = channel.setenv(key, value) {
                self.logger.debug(
                    "setenv refused",
                    Some(&serde_json::json!({"name": key, "error": err.to_string()})),
                );
            }
        }
        channel.exec(&request.command)?;
        let stderr = channel.stderr();
        self.session.set_blocking(false);
        Ok(Box::new(Ssh2Session {
            session: self.session.clone(),
            channel,
            stderr,
            pty: request.pty,
        }))
    }

    fn close(&mut self) {
        self.session.set_blocking(true);
        let _ = self.session.disconnect(None, "pool closed", None);
    }
}

struct Ssh2Session {
    session: Session,
    channel: Channel,
    stderr: Stream,
    pty: bool,
}

impl RemoteSession for Ssh2Session {
    fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn send_eof(&mut self) -> io::Result<()> {
        self.channel.send_eof().map_err(io::Error::from)
    }

    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr.read(buf)
    }

    fn eof(&self) -> bool {
        self.channel.eof()
    }

    fn signal_term(&mut self) {
        // libssh2 has no signal request; an interrupt on the terminal reaches
        // the foreground process, and closing the channel hangs it up.
        if self.pty {
            self.session.set_blocking(true);
            let _ = self.channel.write_all(b"\x03");
            let _ = self.channel.flush();
        }
    }

    fn close(&mut self) -> Result<Option<i32>> {
        self.session.set_blocking(true);
        self.channel.close()?;
        self.channel.wait_close()?;
        Ok(self.channel.exit_status().ok())
    }
}
