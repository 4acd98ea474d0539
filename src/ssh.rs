use std::io::{self, Read as _};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use crate::error::GerritError;
use crate::stream::EventFeed;

fn get_pub_key_path(priv_key_path: &Path) -> PathBuf {
    let mut pub_key_path = priv_key_path.to_path_buf();
    pub_key_path.set_extension("pub");
    pub_key_path
}

/// Quote a string so the remote shell sees it as one argument.
pub fn escape_string(string: &str) -> String {
    format!("\"{}\"", string.replace('\\', "\\\\").replace('"', "\\\""))
}

/// An authenticated SSH session to the Gerrit server.
pub struct Connection {
    pub session: ssh2::Session,
    // Data needed for reconnection in case this connection was terminated.
    host: String,
    username: String,
    priv_key_path: PathBuf,
}

impl Connection {
    fn connect_session(
        host: &str,
        username: &str,
        pub_key_path: &Path,
        priv_key_path: &Path,
    ) -> Result<ssh2::Session, GerritError> {
        debug!("Connecting to tcp: {}", host);
        let tcp = TcpStream::connect(host).map_err(|err| {
            GerritError::Connection(format!("could not connect to gerrit at {}: {}", host, err))
        })?;

        let mut session = ssh2::Session::new().map_err(|err| {
            GerritError::Connection(format!("could not create ssh session: {}", err))
        })?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| GerritError::Connection(format!("could not connect to gerrit: {}", err)))?;

        // Try to authenticate
        session
            .userauth_pubkey_file(username, Some(pub_key_path), priv_key_path, None)
            .map_err(|err| GerritError::Connection(format!("could not authenticate: {}", err)))?;

        Ok(session)
    }

    pub fn connect(
        host: String,
        username: String,
        priv_key_path: PathBuf,
    ) -> Result<Self, GerritError> {
        let pub_key_path = get_pub_key_path(&priv_key_path);
        debug!("Will use public key: {}", pub_key_path.display());

        let session = Self::connect_session(&host, &username, &pub_key_path, &priv_key_path)?;

        Ok(Self {
            session,
            host,
            username,
            priv_key_path,
        })
    }

    /// Reconnect once.
    pub fn reconnect(&mut self) -> Result<(), GerritError> {
        let pub_key_path = get_pub_key_path(&self.priv_key_path);
        self.session =
            Self::connect_session(&self.host, &self.username, &pub_key_path, &self.priv_key_path)?;
        Ok(())
    }

    /// Execute `gerrit stream-events` and turn this connection into the
    /// feed for a stream consumer.
    pub fn stream_events(self) -> Result<SshFeed, GerritError> {
        let mut channel = self.session.channel_session().map_err(|err| {
            GerritError::Connection(format!("could not open ssh channel: {}", err))
        })?;
        channel.exec("gerrit stream-events").map_err(|err| {
            GerritError::Connection(format!(
                "could not execute gerrit stream-events command over ssh: {}",
                err
            ))
        })?;

        Ok(SshFeed {
            session: self.session,
            channel,
            buffer: LineBuffer::default(),
        })
    }
}

/// Feed over a live `gerrit stream-events` channel.
///
/// The libssh2 session timeout bounds every blocking read; that is what
/// turns the blocking channel into the poll contract of [`EventFeed`].
pub struct SshFeed {
    session: ssh2::Session,
    channel: ssh2::Channel,
    buffer: LineBuffer,
}

impl SshFeed {
    /// The remote closed the stream; try to recover its parting message
    /// from stderr.
    fn close_reason(&mut self) -> GerritError {
        let mut message = String::new();
        let _ = self.channel.stderr().read_to_string(&mut message);
        let message = message.trim();
        if message.is_empty() {
            GerritError::Connection("remote server connection closed".to_string())
        } else {
            GerritError::Connection(message.to_string())
        }
    }
}

impl EventFeed for SshFeed {
    fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>, GerritError> {
        if let Some(line) = self.buffer.next_line() {
            return Ok(Some(line));
        }

        // Bound the blocking read, so a stop request is honored in time.
        self.session.set_timeout(timeout.as_millis() as u32);

        let mut chunk = [0; 4096];
        match self.channel.read(&mut chunk) {
            Ok(0) => Err(self.close_reason()),
            Ok(n) => {
                self.buffer.push(&chunk[..n]);
                Ok(self.buffer.next_line())
            }
            Err(ref err) if is_timeout(err) => Ok(None),
            Err(err) => Err(GerritError::Io(err)),
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut || err.kind() == io::ErrorKind::WouldBlock
}

/// Splits a raw byte stream into newline-terminated lines.
#[derive(Default)]
struct LineBuffer {
    data: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Take the next complete line, without its terminator.
    fn next_line(&mut self) -> Option<String> {
        let newline = self.data.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.data.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Runs finite `gerrit` commands over a dedicated connection.
///
/// A failed channel marks the connection as unhealthy; the next command
/// reconnects once before giving up.
pub struct CommandRunner {
    connection: Connection,
    connection_healthy: bool,
}

impl CommandRunner {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            connection_healthy: true,
        }
    }

    /// Run one remote command and collect its stdout. A non-zero exit
    /// status is an error.
    pub fn run_command(&mut self, command: &str) -> Result<String, GerritError> {
        if !self.connection_healthy {
            info!("reconnecting");
            self.connection.reconnect()?;
            self.connection_healthy = true;
        }

        // Commands run to completion, no read timeout.
        self.connection.session.set_timeout(0);

        let mut channel = match self.connection.session.channel_session() {
            Ok(channel) => channel,
            Err(err) => {
                self.connection_healthy = false;
                return Err(GerritError::Command(format!(
                    "failed to create ssh session channel: {}",
                    err
                )));
            }
        };

        if let Err(err) = channel.exec(command) {
            self.connection_healthy = false;
            return Err(GerritError::Command(format!(
                "failed to request exec channel: {}",
                err
            )));
        }

        let mut data = String::new();
        if let Err(err) = channel.read_to_string(&mut data) {
            self.connection_healthy = false;
            return Err(GerritError::Command(format!(
                "failed to read from channel: {}",
                err
            )));
        }

        match channel
            .close()
            .and_then(|()| channel.wait_close())
            .and_then(|()| channel.exit_status())
        {
            Ok(0) => Ok(data),
            Ok(status) => Err(GerritError::Command(format!(
                "command exited with status {}",
                status
            ))),
            Err(err) => {
                self.connection_healthy = false;
                Err(GerritError::Command(format!(
                    "failed to close command channel: {}",
                    err
                )))
            }
        }
    }
}
