use crate::storage::RoleStorage;
use anyhow::{Context as _, Result};
use fairx_network::{
    tls::{self, Credentials, TrustPolicy},
    ProtocolConfig, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// configuration of one role (one party) of the exchange
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// name of the role, this is the identity commitments are signed
    /// with
    pub name: String,

    /// the address to listen to for inbound connections, also the
    /// address of the remote listener when connecting as a client
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// the name expected in the remote listener's certificate
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// size of the chunks files are streamed with
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_separator")]
    pub separator: char,

    /// width of the length header of control messages
    #[serde(default = "default_header_size")]
    pub header_size: usize,

    /// root of the role's working directories (`temp`, `files`,
    /// `exchange` and `verification`)
    pub storage: PathBuf,

    pub tls: TlsConfig,

    /// maximum number of connections served concurrently
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// deadline for every read and write on a connection (in seconds)
    #[serde(default = "default_io_timeout", with = "seconds")]
    pub io_timeout: Duration,

    /// number of attempts to connect to a remote listener
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// time to wait between two connection attempts (in seconds)
    #[serde(default = "default_retry_delay", with = "seconds")]
    pub retry_delay: Duration,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// certificate and key presented when listening
    pub server: Credentials,

    /// certificate and key presented when connecting to a listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Credentials>,

    /// CA certificates the remote peers' certificates are checked against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// require a client certificate on inbound connections
    #[serde(default = "default_mutual_auth")]
    pub mutual_auth: bool,

    /// accept peers without verifying their certificates when no CA
    /// certificate is available
    #[serde(default)]
    pub allow_unverified_peers: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8290
}

fn default_server_name() -> String {
    "localhost".to_owned()
}

fn default_buffer_size() -> usize {
    4096
}

fn default_separator() -> char {
    ':'
}

fn default_header_size() -> usize {
    10
}

fn default_max_connections() -> usize {
    64
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_mutual_auth() -> bool {
    true
}

mod seconds {
    use serde::{Deserialize as _, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl Config {
    pub const EXAMPLE: &'static str = include_str!("config.yaml");

    pub fn from_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open file: {}", path.display()))?;
        serde_yaml::from_reader(file)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            buffer_size: self.buffer_size,
            separator: self.separator,
            header_size: self.header_size,
            io_timeout: self.io_timeout,
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_retries,
            delay: self.retry_delay,
        }
    }

    pub fn storage(&self) -> RoleStorage {
        RoleStorage::new(&self.storage)
    }

    fn trust(&self) -> Result<TrustPolicy> {
        TrustPolicy::from_ca(self.tls.ca_cert.as_deref(), self.tls.allow_unverified_peers)
    }

    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        tls::acceptor(&self.tls.server, &self.trust()?, self.tls.mutual_auth)
            .with_context(|| format!("Cannot load {}'s server TLS configuration", self.name))
    }

    pub fn connector(&self) -> Result<TlsConnector> {
        tls::connector(self.tls.client.as_ref(), &self.trust()?)
            .with_context(|| format!("Cannot load {}'s client TLS configuration", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_example() {
        let example = Config::EXAMPLE;

        let config: Config = serde_yaml::from_str(example).expect("Valid example");

        assert_eq!(config.name, "alice");
        assert_eq!(config.port, 8290);
        assert_eq!(config.separator, ':');
        assert_eq!(config.io_timeout, Duration::from_secs(30));
        assert!(config.tls.mutual_auth);
        assert!(!config.tls.allow_unverified_peers);
        assert_eq!(
            config.tls.server.key_password.as_deref(),
            Some("change me")
        );
    }

    #[test]
    fn defaults() {
        let config: Config = serde_yaml::from_str(
            "name: bob\nstorage: /tmp/bob\ntls:\n  server:\n    cert_chain: a.pem\n    key: b.pem\n",
        )
        .expect("Valid minimal config");

        assert_eq!(config.address(), "127.0.0.1:8290");
        assert_eq!(config.protocol(), ProtocolConfig::default());
        assert_eq!(config.retry(), RetryPolicy::default());
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.tls.client, None);
    }

    #[test]
    fn reject_unknown_fields() {
        let result: Result<Config, _> = serde_yaml::from_str(
            "name: bob\nstorage: /tmp/bob\nuse_ssl: false\ntls:\n  server:\n    cert_chain: a.pem\n    key: b.pem\n",
        );

        assert!(result.is_err());
    }
}
