use thiserror::Error;

/// Possible errors for the package.
///
/// None of these are retried internally: any error raised while a
/// connection was usable tears the connection down, and the client
/// refuses further traffic until it is explicitly reconnected.
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if the host is down, unresolvable or behind a firewall.
    #[error("cannot establish a connection to the rcon server")]
    Connect(#[source] std::io::Error),
    /// Returned if the authentication exchange broke down before the
    /// server delivered a verdict on the password.
    #[error("failed to complete the authentication exchange")]
    Handshake(#[source] Box<RconError>),
    /// Returned if you can't remember the password.
    #[error("bad rcon password")]
    InvalidPassword,
    /// Returned if we received a packet that does not have a type known to us.
    #[error("unknown rcon packet type: {0}")]
    UnknownPacketType(i32),
    /// Returned if a packet of a recognized type showed up where it makes
    /// no sense, e.g. a command response in reply to an auth request.
    #[error("server returned a response of an unexpected type")]
    UnexpectedType,
    /// Returned if a response carries an id that matches no request we
    /// sent. This means either the server or this library is buggy, and
    /// the connection can no longer be trusted.
    #[error("server returned a response with unknown id {0}")]
    UnexpectedId(i32),
    /// Returned if the framing is mangled in some way (truncated payload,
    /// missing terminators, negative declared length).
    #[error("packet malformed: {0}")]
    MalformedPacket(&'static str),
    /// Returned if the body is mangled in some way.
    #[error("packet body malformed (not valid utf-8)")]
    MalformedBody(#[from] std::str::Utf8Error),
    /// Returned when an operation is attempted while the client is not
    /// connected, including after an earlier error. Reconnect to recover.
    #[error("client is not connected to the rcon server")]
    NotConnected,
    /// Returned if the server closed the connection.
    #[error("server closed the connection")]
    Closed,
    /// Internal error used if the stream was successfully established, but
    /// there was a problem writing to the socket (timeouts included).
    #[error("cannot send message to host")]
    Send(#[source] std::io::Error),
    /// Internal error used if the stream was successfully established, but
    /// there was a problem reading from the socket (timeouts included).
    #[error("cannot receive response from host")]
    Receive(#[source] std::io::Error),
    /// Returned when a second batch of commands is issued while another is
    /// still in flight on the same connection.
    #[error("another command batch is already in flight on this connection")]
    Busy,
}

impl RconError {
    /// Classify a read failure: EOF means the peer hung up on us,
    /// everything else is a receive problem.
    pub(crate) fn from_read_error(error: std::io::Error) -> RconError {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            RconError::Closed
        } else {
            RconError::Receive(error)
        }
    }
}
