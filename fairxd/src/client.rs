use crate::{storage::RoleStorage, Config};
use anyhow::{anyhow, Context as _, Result};
use fairx_lib::NotFound;
use fairx_network::{tls, Channel, Command, Error, ProtocolConfig, Response, RetryPolicy};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{client::TlsStream, rustls::pki_types::ServerName, TlsConnector};

/// client side of the protocol
///
/// Every round trip (`send_and_receive_encrypted_file`,
/// `exchange_encrypted_file` or `request_file`) is a single interaction,
/// the listener closes the connection at the end of it.
pub struct Client<S = TlsStream<TcpStream>> {
    role: String,
    protocol: ProtocolConfig,
    storage: RoleStorage,
    endpoint: Option<Endpoint>,
    channel: Option<Channel<S>>,
}

struct Endpoint {
    address: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    retry: RetryPolicy,
}

/// outcome of [`Client::exchange_encrypted_file`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReceipt {
    /// number of bytes of our file that were sent
    pub sent: u64,
    /// where the counterpart's file was stored
    pub received: PathBuf,
    pub received_size: u64,
}

impl Endpoint {
    async fn open(&self, timeout: Duration) -> Result<TlsStream<TcpStream>> {
        let connecting = async {
            let stream = TcpStream::connect(&self.address)
                .await
                .with_context(|| format!("Cannot connect to {}", self.address))?;
            self.connector
                .connect(self.server_name.clone(), stream)
                .await
                .with_context(|| format!("TLS handshake with {} failed", self.address))
        };

        match tokio::time::timeout(timeout, connecting).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout).into()),
        }
    }
}

impl Client {
    /// client of the listener configured in `config`
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_address(config, config.address())
    }

    /// client of the listener at `address`, with the TLS material and
    /// the storage of `config`
    pub fn with_address(config: &Config, address: impl Into<String>) -> Result<Self> {
        let endpoint = Endpoint {
            address: address.into(),
            server_name: tls::server_name(&config.server_name)?,
            connector: config.connector()?,
            retry: config.retry(),
        };

        Ok(Self {
            role: config.name.clone(),
            protocol: config.protocol(),
            storage: config.storage(),
            endpoint: Some(endpoint),
            channel: None,
        })
    }

    /// open the connection, retrying according to the configured policy
    ///
    /// Does nothing if the client is already connected.
    #[tracing::instrument(skip(self), fields(role = %self.role), level = "info")]
    pub async fn connect(&mut self) -> Result<()> {
        if self.channel.is_some() {
            tracing::debug!("already connected");
            return Ok(());
        }

        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| anyhow!("No remote endpoint configured"))?;
        let timeout = self.protocol.io_timeout;

        let stream = endpoint
            .retry
            .run(&endpoint.address, |_| endpoint.open(timeout))
            .await?;

        tracing::info!(address = %endpoint.address, "connected");
        self.channel = Some(Channel::new(stream, self.protocol));
        Ok(())
    }
}

fn local_file(path: &Path) -> Result<(String, u64)> {
    let metadata = std::fs::metadata(path).map_err(|_| NotFound {
        path: path.to_path_buf(),
    })?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid file name {}", path.display()))?
        .to_owned();
    Ok((name, metadata.len()))
}

async fn prepare_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Cannot create directory {}", dir.display()))
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// client over an already established stream
    pub fn from_stream(
        role: impl Into<String>,
        stream: S,
        protocol: ProtocolConfig,
        storage: RoleStorage,
    ) -> Self {
        Self {
            role: role.into(),
            protocol,
            storage,
            endpoint: None,
            channel: Some(Channel::new(stream, protocol)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn channel(&mut self) -> Result<&mut Channel<S>> {
        self.channel
            .as_mut()
            .ok_or_else(|| Error::protocol("Not connected").into())
    }

    /// send the command, wait for `READY` and stream the file
    async fn upload(&mut self, command: Command, path: &Path, size: u64) -> Result<Response> {
        let channel = self.channel()?;

        channel.send_command(&command).await?;
        match channel.receive_response().await? {
            Response::Ready => (),
            Response::Error(message) => return Err(Error::Remote(message).into()),
            other => {
                return Err(Error::protocol(format!("Server is not ready: {:?}", other)).into())
            }
        }

        channel.send_file(path, size).await?;
        channel.receive_response().await
    }

    /// upload `path` to the attestable service and download the encrypted
    /// file into the role's `files` directory
    #[tracing::instrument(skip(self), fields(role = %self.role), level = "info")]
    pub async fn send_and_receive_encrypted_file(&mut self, path: &Path) -> Result<PathBuf> {
        let (name, size) = local_file(path)?;

        let response = self
            .upload(Command::EncryptFile { name, size }, path, size)
            .await?;
        let (name, size) = match response {
            Response::EncryptedFile { name, size } => (name, size),
            Response::Error(message) => return Err(Error::Remote(message).into()),
            other => {
                return Err(Error::protocol(format!("Unexpected response: {:?}", other)).into())
            }
        };

        let files = self.storage.files();
        prepare_dir(&files).await?;
        let target = files.join(&name);
        self.channel()?.receive_file(&target, size).await?;

        tracing::info!(file = %name, size, "encrypted file received");
        Ok(target)
    }

    /// send `path` to the counterpart's listener and receive its file in
    /// exchange, stored in the role's `exchange` directory
    #[tracing::instrument(skip(self), fields(role = %self.role), level = "info")]
    pub async fn exchange_encrypted_file(&mut self, path: &Path) -> Result<ExchangeReceipt> {
        let (name, sent) = local_file(path)?;

        let response = self
            .upload(Command::ExchangeFile { name, size: sent }, path, sent)
            .await?;
        let (name, size) = match response {
            Response::IncomingFile { name, size } => (name, size),
            Response::Error(message) => return Err(Error::Remote(message).into()),
            other => {
                return Err(Error::protocol(format!("Unexpected response: {:?}", other)).into())
            }
        };

        let exchange = self.storage.exchange();
        prepare_dir(&exchange).await?;
        let received = exchange.join(&name);
        let received_size = self.channel()?.receive_file(&received, size).await?;

        tracing::info!(sent, file = %name, size, "exchange completed");
        Ok(ExchangeReceipt {
            sent,
            received,
            received_size,
        })
    }

    /// download a file from the listener's `files` directory into the
    /// role's `files` directory
    #[tracing::instrument(skip(self), fields(role = %self.role), level = "info")]
    pub async fn request_file(&mut self, name: &str) -> Result<PathBuf> {
        let separator = self.protocol.separator;
        if !fairx_network::is_valid_file_name(name, separator) {
            return Err(Error::protocol(format!("Invalid file name: {}", name)).into());
        }

        let channel = self.channel()?;
        channel
            .send_command(&Command::RequestFile {
                name: name.to_owned(),
            })
            .await?;
        let size = match channel.receive_response().await? {
            Response::FileInfo { size, .. } => size,
            Response::Error(message) => return Err(Error::Remote(message).into()),
            other => {
                return Err(Error::protocol(format!("Unexpected response: {:?}", other)).into())
            }
        };

        let files = self.storage.files();
        prepare_dir(&files).await?;
        let target = files.join(name);
        self.channel()?.receive_file(&target, size).await?;

        Ok(target)
    }

    /// notify the listener and close the connection, errors are ignored
    pub async fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(error) = channel.send_command(&Command::Disconnect).await {
                tracing::debug!(reason = %error, "cannot notify the listener");
            }
            if let Err(error) = channel.close().await {
                tracing::debug!(reason = %error, "connection not closed cleanly");
            }
        }
    }
}
