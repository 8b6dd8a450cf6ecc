use std::collections::HashMap;
use std::hash::Hash;

use log::trace;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
};

use crate::{
    error::RconError,
    packet::{Packet, PacketType},
    protocol::{verify_auth, IdSequence, PendingBatch, AUTH_ID},
};

/// Asynchronous rcon client. Call `connect()` to establish a connection
/// and authenticate, then issue commands with [RconClient::send_command]
/// or batch several into one round trip with [RconClient::send_commands].
///
/// After any error the connection is torn down and every further call
/// fails with [RconError::NotConnected] until [RconClient::reconnect]
/// succeeds; a half-failed session is never silently reused. Timeouts
/// are the caller's business: wrap calls in `tokio::time::timeout` (or
/// whatever cancellation your runtime provides) as needed.
///
/// ## Example
/// ```no_run
/// use factorio_rcon::client::RconClient;
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let client = RconClient::connect("127.0.0.1:27015", "<rcon password>").await?;
///     let response = client.send_command("/players online count").await?;
///
///     println!("{}", response.unwrap_or_default());
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct RconClient {
    address: String,
    password: String,
    conn: Mutex<Connection>,
}

/// Everything that must never be touched by two callers at once: the
/// stream, the id sequence and the failure flag. The facade hands this
/// out through `try_lock`, which is what makes concurrent batches fail
/// fast instead of interleaving frames on the wire.
#[derive(Default)]
struct Connection {
    stream: Option<TcpStream>,
    ids: IdSequence,
    failed: bool,
}

impl RconClient {
    /// Create a client without connecting. Call
    /// [RconClient::reconnect] before issuing commands.
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        RconClient {
            address: address.into(),
            password: password.into(),
            conn: Mutex::new(Connection::default()),
        }
    }

    /// Create a client and eagerly connect and authenticate.
    pub async fn connect(
        address: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RconError> {
        let client = Self::new(address, password);
        client.reconnect().await?;
        Ok(client)
    }

    /// (Re)establish the connection and authenticate. This is the only
    /// way back to a usable client after an error.
    pub async fn reconnect(&self) -> Result<(), RconError> {
        let mut conn = self.conn.try_lock().map_err(|_| RconError::Busy)?;
        match conn.connect(&self.address, &self.password).await {
            Ok(()) => Ok(()),
            Err(error) => {
                conn.fail().await;
                Err(error)
            }
        }
    }

    /// Drop the connection. Always succeeds, even when already closed;
    /// waits for an in-flight batch instead of interleaving with it.
    /// The client can be connected again afterwards.
    pub async fn close(&self) {
        self.conn.lock().await.shutdown().await;
    }

    /// Run a single command. `None` means the command produced no output.
    ///
    /// When issuing several commands at once, prefer
    /// [RconClient::send_commands]: it pipelines all requests before
    /// waiting on any response.
    pub async fn send_command(&self, command: &str) -> Result<Option<String>, RconError> {
        let mut results = self.send_commands([((), command)]).await?;
        Ok(results.remove(&()).flatten())
    }

    /// Run a batch of commands keyed by arbitrary identifiers, returning
    /// each response under its original key. All requests are written
    /// before any response is awaited, and responses are matched by
    /// correlation id, so server-side reordering is harmless.
    ///
    /// The batch is all-or-nothing: any failure aborts the whole call,
    /// tears the connection down and returns no partial results. A call
    /// made while another batch is in flight fails with
    /// [RconError::Busy] without writing anything to the socket.
    pub async fn send_commands<K, S, I>(
        &self,
        commands: I,
    ) -> Result<HashMap<K, Option<String>>, RconError>
    where
        K: Eq + Hash,
        S: AsRef<str>,
        I: IntoIterator<Item = (K, S)>,
    {
        let mut conn = self.conn.try_lock().map_err(|_| RconError::Busy)?;
        conn.ensure_ready()?;
        match conn.send_commands(commands).await {
            Ok(results) => Ok(results),
            Err(error) => {
                conn.fail().await;
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

    async fn fail(&mut self) {
        self.failed = true;
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn connect(&mut self, address: &str, password: &str) -> Result<(), RconError> {
        self.shutdown().await;
        self.failed = false;

        let stream = TcpStream::connect(address)
            .await
            .map_err(RconError::Connect)?;
        trace!("opened tcp stream to {}, attempting auth", address);

        self.stream = Some(stream);
        self.ids.reset();

        let reply = self
            .exchange_auth(password)
            .await
            .map_err(|error| RconError::Handshake(Box::new(error)))?;
        verify_auth(&reply)?;
        trace!("auth complete");
        Ok(())
    }

    async fn exchange_auth(&mut self, password: &str) -> Result<Packet, RconError> {
        self.send_packet(&Packet::new(AUTH_ID, PacketType::Auth, password))
            .await?;
        self.receive_packet().await
    }

    async fn send_commands<K, S, I>(
        &mut self,
        commands: I,
    ) -> Result<HashMap<K, Option<String>>, RconError>
    where
        K: Eq + Hash,
        S: AsRef<str>,
        I: IntoIterator<Item = (K, S)>,
    {
        let mut batch = PendingBatch::new();
        for (key, command) in commands {
            let id = self.ids.next();
            self.send_packet(&Packet::new(id, PacketType::Exec, command.as_ref()))
                .await?;
            batch.expect(id, key);
        }
        while !batch.is_done() {
            let reply = self.receive_packet().await?;
            batch.resolve(&reply)?;
        }
        Ok(batch.into_results())
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), RconError> {
        let stream = self.stream.as_mut().ok_or(RconError::NotConnected)?;
        trace!("sending packet id {} to server", packet.id());
        stream
            .write_all(&packet.pack())
            .await
            .map_err(RconError::Send)
    }

    async fn receive_packet(&mut self) -> Result<Packet, RconError> {
        let stream = self.stream.as_mut().ok_or(RconError::NotConnected)?;

        let mut prefix = [0u8; 4];
        stream
            .read_exact(&mut prefix)
            .await
            .map_err(RconError::from_read_error)?;
        let length = usize::try_from(i32::from_le_bytes(prefix))
            .map_err(|_| RconError::MalformedPacket("negative declared length"))?;

        let mut payload = vec![0u8; length];
        stream
            .read_exact(&mut payload)
            .await
            .map_err(RconError::from_read_error)?;

        let packet = Packet::unpack(&payload)?;
        trace!("received packet id {}", packet.id());
        Ok(packet)
    }
}
