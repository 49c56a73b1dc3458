use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// Server configuration, loaded from a TOML file (spec §6). Every field
/// has a sensible default so a minimal file only needs to set what it
/// actually wants to change.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub enable_ssl: bool,
    pub ssl_cert_path: Option<SslCertPaths>,
    pub lock_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            transport: Transport::Tcp,
            host: "0.0.0.0".to_string(),
            port: 9000,
            enable_ssl: false,
            ssl_cert_path: None,
            lock_file: PathBuf::from("./LOCK"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Tls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SslCertPaths {
    pub crt: PathBuf,
    pub key: PathBuf,
}

impl Config {
    /// Parses a TOML configuration file, falling back to `Config::default`
    /// for anything the file leaves unset.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(Error::from)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(1024..=49151).contains(&self.port) {
            return Err(Error::InvalidPort(self.port));
        }
        if (self.enable_ssl || self.transport == Transport::Tls) && self.ssl_cert_path.is_none() {
            return Err(Error::MissingCertificate);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_plain_tcp_on_all_interfaces() {
        let config = Config::default();
        assert_eq!(config.transport, Transport::Tcp);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert!(!config.enable_ssl);
    }

    #[test]
    fn parses_a_minimal_tls_file() {
        let toml = r#"
            enable_ssl = true
            port = 8443

            [ssl_cert_path]
            crt = "cert.pem"
            key = "key.pem"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.enable_ssl);
        assert_eq!(config.port, 8443);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_ssl_without_a_certificate() {
        let config = Config { enable_ssl: true, ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::MissingCertificate)));
    }

    #[test]
    fn rejects_a_privileged_port() {
        let config = Config { port: 80, ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidPort(80))));
    }
}
