//! TLS echo server. Run with `cargo run --example echo_server_tls --
//! <cert.pem> <key.pem>`, then connect a client to
//! `wss://127.0.0.1:9443`.

use async_trait::async_trait;
use switchboard::config::{SslCertPaths, Transport};
use switchboard::request::Request;
use switchboard::{ClientSession, Config, Handler, Server};

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn on_client_connect(&self, _session: &mut ClientSession, request: &Request) -> bool {
        println!("client connecting to {}", request.path);
        true
    }

    async fn on_data_receive(&self, session: &mut ClientSession, payload: Vec<u8>) -> bool {
        let _ = session.send_textual_data(payload).await;
        true
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let crt = args.next().expect("usage: echo_server_tls <cert.pem> <key.pem>");
    let key = args.next().expect("usage: echo_server_tls <cert.pem> <key.pem>");

    let config = Config {
        transport: Transport::Tls,
        port: 9443,
        enable_ssl: true,
        ssl_cert_path: Some(SslCertPaths { crt: crt.into(), key: key.into() }),
        ..Config::default()
    };

    let server = Server::bind(config, EchoHandler).await.expect("failed to bind");
    println!("echoing on wss://{}", server.local_addr().unwrap());
    server.run().await.expect("server loop failed");
}
