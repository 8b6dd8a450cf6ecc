//! Blocking flavor of the client, for callers without an async runtime.
//! Protocol behavior is identical to [crate::client]; only the socket
//! calls differ, and a socket timeout takes the place of cancellation.

use std::{
    collections::HashMap,
    hash::Hash,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::trace;
use parking_lot::Mutex;

use crate::{
    error::RconError,
    packet::{Packet, PacketType},
    protocol::{verify_auth, IdSequence, PendingBatch, AUTH_ID},
};

/// Blocking rcon client. Operations run on the caller's thread and block
/// on socket I/O up to the configured timeout.
///
/// A timeout of `None` or zero blocks indefinitely (zero never means
/// non-blocking mode). The server will not answer while it is saving the
/// map, so set a timeout if you are not prepared to wait those seconds
/// out. Timeouts surface as [RconError::Send] or [RconError::Receive]
/// and, like every other error, leave the client disconnected until
/// [RconClient::reconnect] is called.
///
/// ## Example
/// ```no_run
/// use factorio_rcon::blocking::RconClient;
/// use std::{error::Error, time::Duration};
///
/// fn main() -> Result<(), Box<dyn Error>> {
///     let client = RconClient::connect(
///         "127.0.0.1:27015",
///         "<rcon password>",
///         Some(Duration::from_secs(5)),
///     )?;
///     let response = client.send_command("/version")?;
///
///     println!("{}", response.unwrap_or_default());
///     Ok(())
/// }
/// ```
pub struct RconClient {
    address: String,
    password: String,
    timeout: Option<Duration>,
    conn: Mutex<Connection>,
}

#[derive(Default)]
struct Connection {
    stream: Option<TcpStream>,
    ids: IdSequence,
    failed: bool,
}

impl RconClient {
    /// Create a client without connecting. Call
    /// [RconClient::reconnect] before issuing commands.
    pub fn new(
        address: impl Into<String>,
        password: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        RconClient {
            address: address.into(),
            password: password.into(),
            // zero disables the timeout instead of making the socket
            // non-blocking
            timeout: timeout.filter(|limit| !limit.is_zero()),
            conn: Mutex::new(Connection::default()),
        }
    }

    /// Create a client and eagerly connect and authenticate.
    pub fn connect(
        address: impl Into<String>,
        password: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, RconError> {
        let client = Self::new(address, password, timeout);
        client.reconnect()?;
        Ok(client)
    }

    /// (Re)establish the connection and authenticate. This is the only
    /// way back to a usable client after an error.
    pub fn reconnect(&self) -> Result<(), RconError> {
        let mut conn = self.conn.try_lock().ok_or(RconError::Busy)?;
        match conn.connect(&self.address, &self.password, self.timeout) {
            Ok(()) => Ok(()),
            Err(error) => {
                conn.fail();
                Err(error)
            }
        }
    }

    /// Drop the connection. Always succeeds, even when already closed;
    /// waits for an in-flight batch instead of interleaving with it.
    /// The client can be connected again afterwards. Dropping the client
    /// closes the socket as well.
    pub fn close(&self) {
        self.conn.lock().shutdown();
    }

    /// Run a single command. `None` means the command produced no output.
    ///
    /// When issuing several commands at once, prefer
    /// [RconClient::send_commands]: it pipelines all requests before
    /// waiting on any response.
    pub fn send_command(&self, command: &str) -> Result<Option<String>, RconError> {
        let mut results = self.send_commands([((), command)])?;
        Ok(results.remove(&()).flatten())
    }

    /// Run a batch of commands keyed by arbitrary identifiers, returning
    /// each response under its original key. All requests are written
    /// before any response is awaited, and responses are matched by
    /// correlation id, so server-side reordering is harmless.
    ///
    /// The batch is all-or-nothing: any failure aborts the whole call,
    /// tears the connection down and returns no partial results. A call
    /// made from another thread while a batch is in flight fails with
    /// [RconError::Busy] without writing anything to the socket.
    pub fn send_commands<K, S, I>(&self, commands: I) -> Result<HashMap<K, Option<String>>, RconError>
    where
        K: Eq + Hash,
        S: AsRef<str>,
        I: IntoIterator<Item = (K, S)>,
    {
        let mut conn = self.conn.try_lock().ok_or(RconError::Busy)?;
        conn.ensure_ready()?;
        match conn.send_commands(commands) {
            Ok(results) => Ok(results),
            Err(error) => {
                conn.fail();
                Err(error)
            }
        }
    }
}

impl Connection {
    fn ensure_ready(&self) -> Result<(), RconError> {
        if self.stream.is_none() || self.failed {
            return Err(RconError::NotConnected);
        }
        Ok(())
    }

    fn fail(&mut self) {
        self.failed = true;
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn connect(
        &mut self,
        address: &str,
        password: &str,
        timeout: Option<Duration>,
    ) -> Result<(), RconError> {
        self.shutdown();
        self.failed = false;

        let addr = resolve(address)?;
        let stream = match timeout {
            Some(limit) => TcpStream::connect_timeout(&addr, limit),
            None => TcpStream::connect(addr),
        }
        .map_err(RconError::Connect)?;
        stream.set_read_timeout(timeout).map_err(RconError::Connect)?;
        stream.set_write_timeout(timeout).map_err(RconError::Connect)?;
        trace!("opened tcp stream to {}, attempting auth", address);

        self.stream = Some(stream);
        self.ids.reset();

        let reply = self
            .exchange_auth(password)
            .map_err(|error| RconError::Handshake(Box::new(error)))?;
        verify_auth(&reply)?;
        trace!("auth complete");
        Ok(())
    }

    fn exchange_auth(&mut self, password: &str) -> Result<Packet, RconError> {
        self.send_packet(&Packet::new(AUTH_ID, PacketType::Auth, password))?;
        self.receive_packet()
    }

    fn send_commands<K, S, I>(&mut self, commands: I) -> Result<HashMap<K, Option<String>>, RconError>
    where
        K: Eq + Hash,
        S: AsRef<str>,
        I: IntoIterator<Item = (K, S)>,
    {
        let mut batch = PendingBatch::new();
        for (key, command) in commands {
            let id = self.ids.next();
            self.send_packet(&Packet::new(id, PacketType::Exec, command.as_ref()))?;
            batch.expect(id, key);
        }
        while !batch.is_done() {
            let reply = self.receive_packet()?;
            batch.resolve(&reply)?;
        }
        Ok(batch.into_results())
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), RconError> {
        let stream = self.stream.as_mut().ok_or(RconError::NotConnected)?;
        trace!("sending packet id {} to server", packet.id());
        stream.write_all(&packet.pack()).map_err(RconError::Send)
    }

    fn receive_packet(&mut self) -> Result<Packet, RconError> {
        let stream = self.stream.as_mut().ok_or(RconError::NotConnected)?;

        let mut prefix = [0u8; 4];
        stream
            .read_exact(&mut prefix)
            .map_err(RconError::from_read_error)?;
        let length = usize::try_from(i32::from_le_bytes(prefix))
            .map_err(|_| RconError::MalformedPacket("negative declared length"))?;

        let mut payload = vec![0u8; length];
        stream
            .read_exact(&mut payload)
            .map_err(RconError::from_read_error)?;

        let packet = Packet::unpack(&payload)?;
        trace!("received packet id {}", packet.id());
        Ok(packet)
    }
}

fn resolve(address: &str) -> Result<SocketAddr, RconError> {
    address
        .to_socket_addrs()
        .map_err(RconError::Connect)?
        .next()
        .ok_or_else(|| {
            RconError::Connect(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "address resolved to no usable socket address",
            ))
        })
}
