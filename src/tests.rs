//! End-to-end coverage of the server loop itself, as opposed to the
//! per-module unit tests living alongside `codec`, `request`, `handshake`
//! and `session`. These exercise a real `Server` bound to a loopback
//! socket and a real client `TcpStream`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec;
use crate::handler::Handler;
use crate::opcode::Opcode;
use crate::request::Request;
use crate::server::Server;
use crate::session::ClientSession;

#[derive(Clone, Default)]
struct Counters {
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    reject_next: Arc<AtomicBool>,
}

struct RecordingHandler(Counters);

#[async_trait]
impl Handler for RecordingHandler {
    async fn on_client_connect(&self, _session: &mut ClientSession, _request: &Request) -> bool {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        !self.0.reject_next.load(Ordering::SeqCst)
    }

    async fn on_client_disconnect(&self, _session_id: uuid::Uuid) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_data_receive(&self, session: &mut ClientSession, payload: Vec<u8>) -> bool {
        let _ = session.send_textual_data(payload).await;
        true
    }
}

fn mask_payload(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect()
}

fn masked_frame(fin: bool, opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut out = vec![(fin as u8) << 7 | opcode.as_u8(), 0x80 | payload.len() as u8];
    out.extend_from_slice(&mask);
    out.extend_from_slice(&mask_payload(payload, mask));
    out
}

fn handshake_request(key: &str) -> Vec<u8> {
    format!(
        "GET /chat HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes()
}

async fn read_http_response(stream: &mut TcpStream) -> String {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[tokio::test]
async fn full_handshake_and_echo_round_trip() {
    let counters = Counters::default();
    let server = Server::bind_plain("127.0.0.1:0", RecordingHandler(counters.clone())).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server_handle = server.handle();
    let join = tokio::spawn(server.run());

    let mut client = TcpStream::connect(addr).await.unwrap();
    let key = base64::prelude::BASE64_STANDARD.encode(b"0123456789abcdef");
    client.write_all(&handshake_request(&key)).await.unwrap();

    let response = read_http_response(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols"));
    assert!(response.to_ascii_lowercase().contains("sec-websocket-accept:"));
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);

    client
        .write_all(&masked_frame(true, Opcode::Text, b"hello server", [1, 2, 3, 4]))
        .await
        .unwrap();

    let echoed = codec::receive(&mut client).await;
    assert_eq!(echoed.opcode, Opcode::Text);
    assert_eq!(echoed.payload, b"hello server");

    drop(client);
    server_handle.stop();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_connection_gets_400_and_closes() {
    let counters = Counters::default();
    counters.reject_next.store(true, Ordering::SeqCst);
    let server = Server::bind_plain("127.0.0.1:0", RecordingHandler(counters.clone())).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server_handle = server.handle();
    let join = tokio::spawn(server.run());

    let mut client = TcpStream::connect(addr).await.unwrap();
    let key = base64::prelude::BASE64_STANDARD.encode(b"0123456789abcdef");
    client.write_all(&handshake_request(&key)).await.unwrap();

    let response = read_http_response(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 400"));

    let mut probe = [0u8; 1];
    let n = client.read(&mut probe).await.unwrap_or(0);
    assert_eq!(n, 0, "server should have closed the socket after rejecting it");
    assert_eq!(
        counters.disconnects.load(Ordering::SeqCst),
        0,
        "a rejected request was never accepted, so clientDisconnect must not fire"
    );

    server_handle.stop();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn close_frame_fires_disconnect_callback() {
    let counters = Counters::default();
    let server = Server::bind_plain("127.0.0.1:0", RecordingHandler(counters.clone())).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server_handle = server.handle();
    let join = tokio::spawn(server.run());

    let mut client = TcpStream::connect(addr).await.unwrap();
    let key = base64::prelude::BASE64_STANDARD.encode(b"0123456789abcdef");
    client.write_all(&handshake_request(&key)).await.unwrap();
    read_http_response(&mut client).await;
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);

    client
        .write_all(&masked_frame(true, Opcode::Close, b"", [0, 0, 0, 0]))
        .await
        .unwrap();

    for _ in 0..50 {
        if counters.disconnects.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);

    server_handle.stop();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn p5_online_counts_accepted_sessions_not_yet_disconnected() {
    let counters = Counters::default();
    let server = Server::bind_plain("127.0.0.1:0", RecordingHandler(counters.clone())).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server_handle = server.handle();
    let join = tokio::spawn(server.run());

    assert_eq!(server_handle.online(), 0);

    let mut client = TcpStream::connect(addr).await.unwrap();
    let key = base64::prelude::BASE64_STANDARD.encode(b"0123456789abcdef");
    client.write_all(&handshake_request(&key)).await.unwrap();
    read_http_response(&mut client).await;

    for _ in 0..50 {
        if server_handle.online() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(server_handle.online(), 1, "accepted session should count as online");

    client
        .write_all(&masked_frame(true, Opcode::Close, b"", [0, 0, 0, 0]))
        .await
        .unwrap();

    for _ in 0..50 {
        if server_handle.online() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(server_handle.online(), 0, "closed session should no longer count as online");

    server_handle.stop();
    join.await.unwrap().unwrap();
}
