use thiserror::Error;

/// Unified error type for the core library.
///
/// Per-session errors (framing, handshake, per-connection I/O) never escape
/// a session on their own — `server.rs` catches them at the point a
/// session's future resolves and turns them into a `client_disconnect`
/// callback. Only the server-wide variants below (`Bind`, `AlreadyLocked`,
/// `MissingCertificate`, ...) are returned from `Server::bind`/`Server::run`.
///
/// Per-frame protocol violations (unknown opcode, fragmented control frame,
/// oversize payload, ...) never reach this type at all — `codec::receive`
/// degrades them straight to a synthetic `CLOSE` frame (spec §4.B), and the
/// session's own fragmentation bookkeeping (continuation-without-start,
/// reassembly overflow, interleaved messages) disconnects directly rather
/// than routing through a typed error, since there's no caller that needs
/// to distinguish one close reason from another.
#[derive(Error, Debug)]
pub enum Error {
    // General / IO errors
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    // Framing errors
    #[error("unknown opcode: {0:#x}")]
    InvalidOpcode(u8),

    // Handshake / request errors
    #[error("malformed HTTP upgrade request")]
    MalformedRequest,

    #[error("request line is not a GET request")]
    NotAGetRequest,

    #[error("request target contains a URI fragment")]
    FragmentInTarget,

    #[error("required header missing or invalid: {0}")]
    MissingRequiredHeader(&'static str),

    #[error("request exceeded the {0} byte handshake budget")]
    RequestTooLarge(usize),

    #[error("client did not complete the handshake in time")]
    HandshakeTimeout,

    // Server-wide errors
    #[error("could not bind listener on {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("TLS is enabled but no certificate/key pair was configured")]
    MissingCertificate,

    #[error("{source}")]
    Tls {
        #[from]
        source: rustls::Error,
    },

    // Single-instance lock errors
    #[error("{source}")]
    Lock {
        #[from]
        source: serde_json::Error,
    },

    #[error("another instance is already running (pid {0})")]
    AlreadyLocked(u32),

    // Configuration errors
    #[error("{source}")]
    Config {
        #[from]
        source: toml::de::Error,
    },

    #[error("port {0} is outside the allowed 1024-49151 range")]
    InvalidPort(u16),
}

pub type Result<T> = std::result::Result<T, Error>;
