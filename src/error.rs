use std::error::Error;
use std::fmt;
use std::io;

/// Everything that can go wrong in the client, the event registry and the
/// stream machinery.
#[derive(Debug)]
pub enum GerritError {
    /// Establishing or re-establishing the SSH connection failed, or the
    /// remote side closed it.
    Connection(String),
    /// Reading from the remote stream failed.
    Io(io::Error),
    /// A remote command could not be run or exited with a non-zero status.
    Command(String),
    /// A query returned an error record or undecodable output.
    Query(String),
    /// An event object without a usable `type` discriminator.
    MalformedEvent(String),
    /// The registered constructor rejected the event object.
    InvalidEvent(String /* kind */, serde_json::Error),
    /// The event kind is already registered.
    DuplicateEvent(String /* kind */),
    /// The hand-off queue is at capacity.
    QueueFull,
}

impl fmt::Display for GerritError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GerritError::Connection(reason) => write!(f, "connection failed: {}", reason),
            GerritError::Io(err) => write!(f, "read failed: {}", err),
            GerritError::Command(reason) => write!(f, "command failed: {}", reason),
            GerritError::Query(reason) => write!(f, "query failed: {}", reason),
            GerritError::MalformedEvent(reason) => write!(f, "malformed event: {}", reason),
            GerritError::InvalidEvent(kind, err) => write!(f, "invalid {} event: {}", kind, err),
            GerritError::DuplicateEvent(kind) => {
                write!(f, "event kind {} is already registered", kind)
            }
            GerritError::QueueFull => write!(f, "event queue is full"),
        }
    }
}

impl Error for GerritError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GerritError::Io(err) => Some(err),
            GerritError::InvalidEvent(_, err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GerritError {
    fn from(err: io::Error) -> GerritError {
        GerritError::Io(err)
    }
}
