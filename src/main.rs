use async_trait::async_trait;
use switchboard::{ClientSession, Config, Handler, Server};

/// The binary's default behaviour: log every lifecycle event and echo
/// whatever a client sends back to it. A real deployment would swap this
/// out for its own `Handler`; this one exists so `switchboard-server` is
/// useful out of the box and so the crate has an end-to-end smoke test
/// outside of `cargo test`.
struct LoggingEchoHandler;

#[async_trait]
impl Handler for LoggingEchoHandler {
    async fn on_server_start(&self) {
        log::info!("server started");
    }

    async fn on_server_stop(&self) {
        log::info!("server stopped");
    }

    async fn on_client_connect(&self, session: &mut ClientSession, request: &switchboard::request::Request) -> bool {
        log::info!("client {} connecting to {}", session.id, request.path);
        true
    }

    async fn on_client_disconnect(&self, session_id: uuid::Uuid) {
        log::info!("client {session_id} disconnected");
    }

    async fn on_data_receive(&self, session: &mut ClientSession, payload: Vec<u8>) -> bool {
        log::debug!("client {} sent {} bytes", session.id, payload.len());
        if session.send_textual_data(payload).await.is_err() {
            log::warn!("failed to echo payload back to {}", session.id);
        }
        true
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "switchboard.toml".to_string());
    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) if !std::path::Path::new(&config_path).exists() => {
            log::warn!("no config file at {config_path}, using defaults ({e})");
            Config::default()
        }
        Err(e) => {
            eprintln!("failed to load config from {config_path}: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let server = match Server::bind(config, LoggingEchoHandler).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start server: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let handle = server.handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("received shutdown signal");
        handle.stop();
    });

    match server.run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("server loop exited with an error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
