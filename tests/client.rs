//! Integration tests for the async client, driven against a fake
//! in-process rcon server on the tokio runtime.

use std::sync::Arc;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
};

use factorio_rcon::{
    client::RconClient,
    error::RconError,
    packet::{Packet, PacketType},
};

async fn read_packet(stream: &mut TcpStream) -> Packet {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.unwrap();
    let length = i32::from_le_bytes(prefix) as usize;
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await.unwrap();
    Packet::unpack(&payload).unwrap()
}

async fn write_packet(stream: &mut TcpStream, packet: &Packet) {
    stream.write_all(&packet.pack()).await.unwrap();
}

async fn approve_auth(stream: &mut TcpStream) {
    let auth = read_packet(stream).await;
    assert_eq!(auth.packet_type(), PacketType::Auth);
    write_packet(stream, &Packet::new(auth.id(), PacketType::AuthResponse, "")).await;
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    (listener, address)
}

fn spawn_session<F, Fut>(listener: TcpListener, session: F) -> JoinHandle<()>
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        session(stream).await;
    })
}

#[tokio::test]
async fn batch_is_keyed_correctly_despite_reordered_responses() {
    let (listener, address) = bind().await;
    let server = spawn_session(listener, |mut stream| async move {
        approve_auth(&mut stream).await;
        let first = read_packet(&mut stream).await;
        let second = read_packet(&mut stream).await;
        assert_eq!(first.body(), "time");
        assert_eq!(second.body(), "version");
        write_packet(
            &mut stream,
            &Packet::new(second.id(), PacketType::Response, "b-text"),
        )
        .await;
        write_packet(
            &mut stream,
            &Packet::new(first.id(), PacketType::Response, "a-text\n"),
        )
        .await;
    });

    let client = RconClient::connect(&address, "pass").await.unwrap();
    let results = client
        .send_commands([("a", "time"), ("b", "version")])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results["a"].as_deref(), Some("a-text"));
    assert_eq!(results["b"].as_deref(), Some("b-text"));
    server.await.unwrap();
}

#[tokio::test]
async fn command_with_no_output_returns_none() {
    let (listener, address) = bind().await;
    let server = spawn_session(listener, |mut stream| async move {
        approve_auth(&mut stream).await;
        let command = read_packet(&mut stream).await;
        write_packet(
            &mut stream,
            &Packet::new(command.id(), PacketType::Response, "\n"),
        )
        .await;
    });

    let client = RconClient::connect(&address, "pass").await.unwrap();
    assert_eq!(client.send_command("/silent-command x").await.unwrap(), None);
    server.await.unwrap();
}

#[tokio::test]
async fn wrong_password_is_rejected_and_client_stays_unusable() {
    let (listener, address) = bind().await;
    let server = spawn_session(listener, |mut stream| async move {
        let _ = read_packet(&mut stream).await;
        write_packet(&mut stream, &Packet::new(-1, PacketType::AuthResponse, "")).await;
    });

    let client = RconClient::new(&address, "hunter3");
    assert!(matches!(
        client.reconnect().await,
        Err(RconError::InvalidPassword)
    ));
    assert!(matches!(
        client.send_command("/version").await,
        Err(RconError::NotConnected)
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn disconnect_mid_length_prefix_fails_with_closed() {
    let (listener, address) = bind().await;
    let server = spawn_session(listener, |mut stream| async move {
        approve_auth(&mut stream).await;
        let _ = read_packet(&mut stream).await;
        stream.write_all(&[1, 0, 0]).await.unwrap();
    });

    let client = RconClient::connect(&address, "pass").await.unwrap();
    assert!(matches!(
        client.send_command("/players").await,
        Err(RconError::Closed)
    ));
    assert!(matches!(
        client.send_command("/players").await,
        Err(RconError::NotConnected)
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn unknown_response_id_fails_the_whole_batch() {
    let (listener, address) = bind().await;
    let server = spawn_session(listener, |mut stream| async move {
        approve_auth(&mut stream).await;
        let _ = read_packet(&mut stream).await;
        write_packet(&mut stream, &Packet::new(999, PacketType::Response, "?")).await;
    });

    let client = RconClient::connect(&address, "pass").await.unwrap();
    assert!(matches!(
        client.send_commands([("only", "/time")]).await,
        Err(RconError::UnexpectedId(999))
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn negative_length_prefix_is_rejected_as_malformed() {
    let (listener, address) = bind().await;
    let server = spawn_session(listener, |mut stream| async move {
        approve_auth(&mut stream).await;
        let _ = read_packet(&mut stream).await;
        stream.write_all(&(-1i32).to_le_bytes()).await.unwrap();
    });

    let client = RconClient::connect(&address, "pass").await.unwrap();
    assert!(matches!(
        client.send_command("/time").await,
        Err(RconError::MalformedPacket(_))
    ));
    assert!(matches!(
        client.send_command("/time").await,
        Err(RconError::NotConnected)
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn hangup_during_auth_exchange_is_a_handshake_error() {
    let (listener, address) = bind().await;
    let server = spawn_session(listener, |mut stream| async move {
        // read the auth request, then hang up without a verdict
        let _ = read_packet(&mut stream).await;
    });

    let client = RconClient::new(&address, "pass");
    assert!(matches!(
        client.reconnect().await,
        Err(RconError::Handshake(_))
    ));
    assert!(matches!(
        client.send_command("/version").await,
        Err(RconError::NotConnected)
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn reconnect_restores_service_after_a_failure() {
    let (listener, address) = bind().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        approve_auth(&mut stream).await;
        let _ = read_packet(&mut stream).await;
        drop(stream);

        let (mut stream, _) = listener.accept().await.unwrap();
        approve_auth(&mut stream).await;
        let command = read_packet(&mut stream).await;
        write_packet(
            &mut stream,
            &Packet::new(command.id(), PacketType::Response, "back"),
        )
        .await;
    });

    let client = RconClient::connect(&address, "pass").await.unwrap();
    assert!(matches!(
        client.send_command("/version").await,
        Err(RconError::Closed)
    ));
    client.reconnect().await.unwrap();
    assert_eq!(
        client.send_command("/version").await.unwrap().as_deref(),
        Some("back")
    );
    server.await.unwrap();
}

#[tokio::test]
async fn concurrent_batch_fails_fast_with_busy() {
    let (listener, address) = bind().await;
    let (got_command_tx, got_command_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let server = spawn_session(listener, move |mut stream| async move {
        approve_auth(&mut stream).await;
        let command = read_packet(&mut stream).await;
        got_command_tx.send(()).unwrap();
        release_rx.await.unwrap();
        write_packet(
            &mut stream,
            &Packet::new(command.id(), PacketType::Response, "done"),
        )
        .await;
    });

    let client = Arc::new(RconClient::connect(&address, "pass").await.unwrap());

    let in_flight = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.send_command("/slow").await })
    };

    // wait until the first batch is demonstrably on the wire
    got_command_rx.await.unwrap();
    assert!(matches!(
        client.send_command("/second").await,
        Err(RconError::Busy)
    ));

    release_tx.send(()).unwrap();
    assert_eq!(
        in_flight.await.unwrap().unwrap().as_deref(),
        Some("done")
    );
    server.await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_reconnectable() {
    let (listener, address) = bind().await;
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().await.unwrap();
            approve_auth(&mut stream).await;
        }
    });

    let client = RconClient::connect(&address, "pass").await.unwrap();
    client.close().await;
    client.close().await;
    assert!(matches!(
        client.send_command("/version").await,
        Err(RconError::NotConnected)
    ));
    client.reconnect().await.unwrap();
    server.await.unwrap();
}
