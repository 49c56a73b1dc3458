//! Minimal plain-TCP echo server built on the public `Server`/`Handler` API.
//!
//! Run with `cargo run --example echo_server`, then connect any RFC 6455
//! client to `ws://127.0.0.1:9000`.

use async_trait::async_trait;
use switchboard::request::Request;
use switchboard::{ClientSession, Config, Handler, Server};

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn on_client_connect(&self, _session: &mut ClientSession, request: &Request) -> bool {
        println!("client connecting to {}", request.path);
        true
    }

    async fn on_client_disconnect(&self, session_id: uuid::Uuid) {
        println!("client {session_id} disconnected");
    }

    async fn on_data_receive(&self, session: &mut ClientSession, payload: Vec<u8>) -> bool {
        let _ = session.send_textual_data(payload).await;
        true
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config { port: 9000, ..Config::default() };
    let server = Server::bind(config, EchoHandler).await.expect("failed to bind");
    println!("echoing on ws://{}", server.local_addr().unwrap());
    server.run().await.expect("server loop failed");
}
