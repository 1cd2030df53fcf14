use crate::{
    encryption::{FileEncryptor, IdentityCopy},
    gate::ExchangeOffer,
    storage::RoleStorage,
    Config,
};
use anyhow::{anyhow, Context as _, Result};
use fairx_network::{Channel, Command, ProtocolConfig, Response};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// everything the sessions of a listener share: the role they serve,
/// its storage and what the role offers in an exchange
pub struct Handler {
    role: String,
    protocol: ProtocolConfig,
    storage: RoleStorage,
    encryptor: Arc<dyn FileEncryptor>,
    exchange: Option<ExchangeOffer>,
}

/// progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    CommandRead,
    Responding,
    Closed,
}

/// server side of one connection: read a single command, serve it and
/// close the connection
pub struct Session<S> {
    id: u64,
    peer: String,
    identity: Option<String>,
    channel: Channel<S>,
    state: State,
}

impl Handler {
    pub fn new(config: &Config) -> Self {
        Self {
            role: config.name.clone(),
            protocol: config.protocol(),
            storage: config.storage(),
            encryptor: Arc::new(IdentityCopy),
            exchange: None,
        }
    }

    pub fn with_storage(self, storage: RoleStorage) -> Self {
        Self { storage, ..self }
    }

    pub fn with_encryptor(self, encryptor: Arc<dyn FileEncryptor>) -> Self {
        Self { encryptor, ..self }
    }

    pub fn with_exchange(self, offer: ExchangeOffer) -> Self {
        Self {
            exchange: Some(offer),
            ..self
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn protocol(&self) -> ProtocolConfig {
        self.protocol
    }

    pub fn storage(&self) -> &RoleStorage {
        &self.storage
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        id: u64,
        peer: impl Into<String>,
        identity: Option<String>,
        stream: S,
        protocol: ProtocolConfig,
    ) -> Self {
        Self {
            id,
            peer: peer.into(),
            identity,
            channel: Channel::new(stream, protocol),
            state: State::Start,
        }
    }

    /// serve the connection until completion
    ///
    /// Failures are reported to the peer with an `ERROR` response, the
    /// connection is always closed at the end.
    #[tracing::instrument(
        skip(self, handler),
        fields(
            session = self.id,
            peer = %self.peer,
            identity = self.identity.as_deref().unwrap_or("none"),
            role = %handler.role,
        ),
        level = "info"
    )]
    pub async fn run(mut self, handler: &Handler) -> State {
        tracing::info!("connection established");

        if let Err(error) = self.serve(handler).await {
            tracing::warn!(
                reason = %format!("{:#}", error),
                state = ?self.state,
                "session failed"
            );
            let message = error.root_cause().to_string();
            if let Err(error) = self.respond(&Response::Error(message)).await {
                tracing::debug!(reason = %error, "cannot report the failure to the peer");
            }
        }

        self.state = State::Closed;
        if let Err(error) = self.channel.close().await {
            tracing::debug!(reason = %error, "connection not closed cleanly");
        }
        tracing::info!("connection closed");

        self.state
    }

    async fn serve(&mut self, handler: &Handler) -> Result<()> {
        let command = match self.channel.receive_command().await? {
            Some(command) => command,
            None => {
                tracing::debug!("peer left without sending a command");
                return Ok(());
            }
        };
        self.state = State::CommandRead;
        tracing::debug!(?command, "command received");

        match command {
            Command::EncryptFile { name, size } => self.encrypt_file(handler, name, size).await,
            Command::RequestFile { name } => self.request_file(handler, name).await,
            Command::ExchangeFile { name, size } => self.exchange_file(handler, name, size).await,
            Command::Disconnect => {
                tracing::info!("peer requested to disconnect");
                Ok(())
            }
            Command::Malformed { line, reason } => {
                tracing::warn!(%line, %reason, "rejecting command");
                self.respond(&Response::Error(reason.to_string())).await
            }
        }
    }

    async fn respond(&mut self, response: &Response) -> Result<()> {
        self.state = State::Responding;
        self.channel.send_response(response).await
    }

    async fn encrypt_file(&mut self, handler: &Handler, name: String, size: u64) -> Result<()> {
        self.respond(&Response::Ready).await?;

        let upload = handler
            .storage
            .temp()
            .join(format!("{}-{}", self.id, name));
        self.channel.receive_file(&upload, size).await?;

        let encrypted = {
            let encryptor = Arc::clone(&handler.encryptor);
            let input = upload.clone();
            let name = name.clone();
            let output_dir = handler.storage.files();
            tokio::task::spawn_blocking(move || encryptor.encrypt(&input, &name, &output_dir))
                .await
                .map_err(|error| anyhow!(error))
                .and_then(|result| result)
        };
        let encrypted = match encrypted {
            Ok(encrypted) => encrypted,
            Err(error) => {
                tracing::error!(file = %name, reason = %format!("{:#}", error), "encryption failed");
                return self
                    .respond(&Response::Error("Failed to encrypt file".to_owned()))
                    .await;
            }
        };

        let encrypted_name = encrypted
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("Invalid encrypted file name {}", encrypted.display()))?
            .to_owned();
        let encrypted_size = tokio::fs::metadata(&encrypted)
            .await
            .with_context(|| format!("Cannot read {}", encrypted.display()))?
            .len();

        self.respond(&Response::EncryptedFile {
            name: encrypted_name,
            size: encrypted_size,
        })
        .await?;
        self.channel.send_file(&encrypted, encrypted_size).await?;

        tokio::fs::remove_file(&upload)
            .await
            .with_context(|| format!("Cannot remove {}", upload.display()))?;
        tracing::info!(file = %name, size = encrypted_size, "encryption completed");

        Ok(())
    }

    async fn request_file(&mut self, handler: &Handler, name: String) -> Result<()> {
        let path = handler.storage.files().join(&name);
        if !path.is_file() {
            return self
                .respond(&Response::Error(format!("File not found: {}", name)))
                .await;
        }

        let size = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?
            .len();
        self.respond(&Response::FileInfo {
            name: name.clone(),
            size,
        })
        .await?;
        self.channel.send_file(&path, size).await?;
        tracing::info!(file = %name, size, "file sent");

        Ok(())
    }

    async fn exchange_file(&mut self, handler: &Handler, name: String, size: u64) -> Result<()> {
        self.respond(&Response::Ready).await?;

        // kept apart until it passed the gate, a rejected upload stays there
        let upload = handler
            .storage
            .temp()
            .join(format!("{}-{}", self.id, name));
        self.channel.receive_file(&upload, size).await?;
        tracing::info!(file = %name, size, "counterpart's file received");

        let offer = match handler.exchange.as_ref() {
            Some(offer) if offer.file.is_file() => offer,
            _ => {
                return self
                    .respond(&Response::Error(
                        "No file available for exchange".to_owned(),
                    ))
                    .await;
            }
        };

        if let Some(gate) = offer.gate.as_ref() {
            if let Err(failure) = gate.check(&upload).await {
                tracing::warn!(file = %name, %failure, "holding back our file");
                return self
                    .respond(&Response::Error(format!("Verification failed: {}", failure)))
                    .await;
            }
        }

        let received = handler.storage.received(&name);
        tokio::fs::rename(&upload, &received)
            .await
            .with_context(|| format!("Cannot store {}", received.display()))?;

        let offered_name = offer
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("Invalid file name {}", offer.file.display()))?
            .to_owned();
        let offered_size = tokio::fs::metadata(&offer.file)
            .await
            .with_context(|| format!("Cannot read {}", offer.file.display()))?
            .len();

        self.respond(&Response::IncomingFile {
            name: offered_name.clone(),
            size: offered_size,
        })
        .await?;
        self.channel.send_file(&offer.file, offered_size).await?;
        tracing::info!(file = %offered_name, size = offered_size, "exchange completed");

        Ok(())
    }
}
