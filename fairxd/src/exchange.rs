/*!
fair exchange of two encrypted files between two roles

The two roles commit to their file before any byte is transferred. The
receiver listens and only releases its own file once the one it received
matches the sender's commitment and proof. The sender checks the file it
gets back against the receiver's commitment.

```text
CommitmentsGenerated -> CommitmentsExchanged -> ReceiverListening
  -> SenderConnecting -> ProofAttached -> FileSent -> FileReceived
  -> Verified -> Complete
```

Any failure moves the exchange to [`ExchangeState::Failed`], the
history up to that point is kept in the returned [`ExchangeFailed`].
*/

use crate::{
    client::Client,
    gate::{ExchangeOffer, Expectation, FairnessGate},
    listener::Listener,
    session::Handler,
    Config,
};
use anyhow::{anyhow, Context as _, Result};
use fairx_lib::{Challenge, Commitment, CommitmentService};
use fairx_network::Error as NetworkError;
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    CommitmentsGenerated,
    CommitmentsExchanged,
    ReceiverListening,
    SenderConnecting,
    ProofAttached,
    FileSent,
    FileReceived,
    Verified,
    Complete,
    Failed(String),
}

/// one side of the exchange: its configuration and the encrypted file
/// it gives away
#[derive(Debug, Clone)]
pub struct Party {
    pub config: Config,
    pub file: PathBuf,
}

/// what each role ended up with
#[derive(Debug, Clone)]
pub struct ExchangeReport {
    pub receiver_commitment: Commitment,
    pub sender_commitment: Commitment,
    /// the sender's file, as stored by the receiver
    pub received_by_receiver: PathBuf,
    /// the receiver's file, as stored by the sender
    pub received_by_sender: PathBuf,
    pub history: Vec<ExchangeState>,
}

/// an exchange that ended in [`ExchangeState::Failed`]
#[derive(Debug, Error)]
#[error("Exchange between {receiver} and {sender} failed")]
pub struct ExchangeFailed {
    pub receiver: String,
    pub sender: String,
    /// every state reached, the last one is always [`ExchangeState::Failed`]
    pub history: Vec<ExchangeState>,
    #[source]
    error: anyhow::Error,
}

/// drive a single exchange, consumed by [`ExchangeCoordinator::run`]
pub struct ExchangeCoordinator {
    receiver: Party,
    sender: Party,
    history: Vec<ExchangeState>,
    progress: Option<mpsc::Sender<ExchangeState>>,
}

impl Party {
    pub fn new(config: Config, file: impl Into<PathBuf>) -> Self {
        Self {
            config,
            file: file.into(),
        }
    }

    fn commitment_service(&self) -> CommitmentService {
        CommitmentService::new(&self.config.name, self.config.storage().verification())
    }
}

/// check a file received through an exchange against the counterpart's
/// commitment kept in the role's `exchange` directory
pub async fn verify_received_file(config: &Config, received: &Path) -> Result<bool> {
    let storage = config.storage();
    let service = CommitmentService::new(&config.name, storage.verification());
    let commitment = service
        .load_commitment(&storage.received_commitment())
        .await
        .context("No commitment received from the counterpart")?;

    Ok(service.verify_commitment(received, &commitment).await)
}

impl ExchangeFailed {
    /// what made the exchange fail
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl ExchangeCoordinator {
    pub fn new(receiver: Party, sender: Party) -> Self {
        Self {
            receiver,
            sender,
            history: Vec::new(),
            progress: None,
        }
    }

    /// report every state as it is reached
    ///
    /// The exchange does not move on until the state was accepted by the
    /// channel, a closed channel is ignored.
    pub fn with_progress(self, progress: mpsc::Sender<ExchangeState>) -> Self {
        Self {
            progress: Some(progress),
            ..self
        }
    }

    async fn transition(&mut self, state: ExchangeState) {
        tracing::info!(?state, "exchange progressed");
        self.history.push(state.clone());
        if let Some(progress) = self.progress.as_ref() {
            if progress.send(state).await.is_err() {
                tracing::debug!("nobody follows the exchange's progress anymore");
                self.progress = None;
            }
        }
    }

    #[tracing::instrument(
        skip(self),
        fields(receiver = %self.receiver.config.name, sender = %self.sender.config.name),
        level = "info"
    )]
    pub async fn run(mut self) -> Result<ExchangeReport, ExchangeFailed> {
        match self.drive().await {
            Ok(report) => Ok(report),
            Err(error) => {
                let reason = format!("{:#}", error);
                tracing::error!(%reason, "exchange failed");
                self.transition(ExchangeState::Failed(reason)).await;
                Err(ExchangeFailed {
                    receiver: self.receiver.config.name,
                    sender: self.sender.config.name,
                    history: self.history,
                    error,
                })
            }
        }
    }

    async fn drive(&mut self) -> Result<ExchangeReport> {
        let receiver_storage = self.receiver.config.storage();
        let sender_storage = self.sender.config.storage();
        receiver_storage.prepare().await?;
        sender_storage.prepare().await?;

        let receiver_service = self.receiver.commitment_service();
        let sender_service = self.sender.commitment_service();

        let receiver_commitment = receiver_service
            .generate_commitment(&self.receiver.file)
            .await
            .context("Cannot commit to the receiver's file")?;
        let mut sender_commitment = sender_service
            .generate_commitment(&self.sender.file)
            .await
            .context("Cannot commit to the sender's file")?;
        self.transition(ExchangeState::CommitmentsGenerated).await;

        receiver_service
            .exchange_commitments(&receiver_commitment, &sender_commitment)
            .context("Receiver rejected the sender's commitment")?;
        sender_service
            .exchange_commitments(&sender_commitment, &receiver_commitment)
            .context("Sender rejected the receiver's commitment")?;
        sender_commitment
            .save(receiver_storage.received_commitment())
            .await?;
        receiver_commitment
            .save(sender_storage.received_commitment())
            .await?;
        self.transition(ExchangeState::CommitmentsExchanged).await;

        let (expectation, gate) =
            FairnessGate::new(receiver_service.clone(), self.receiver.config.io_timeout);
        let handler = Handler::new(&self.receiver.config)
            .with_exchange(ExchangeOffer::new(&self.receiver.file).with_gate(gate));
        let listener = Listener::bind(&self.receiver.config, handler).await?;
        self.transition(ExchangeState::ReceiverListening).await;

        let mut client = Client::with_address(
            &self.sender.config,
            listener.local_address().to_string(),
        )?;

        let transfer = async {
            client.connect().await?;
            self.transition(ExchangeState::SenderConnecting).await;

            let challenge = Challenge::generate(OsRng);
            let proof = sender_service
                .generate_proof(&self.sender.file, &challenge)
                .await?;
            sender_commitment.attach_proof(proof);
            sender_commitment
                .save(receiver_storage.received_commitment())
                .await?;
            expectation
                .send(Some(Expectation {
                    commitment: sender_commitment.clone(),
                    challenge: challenge.clone(),
                }))
                .map_err(|_| anyhow!("The receiver's listener is gone"))?;
            self.transition(ExchangeState::ProofAttached).await;

            let receipt = client.exchange_encrypted_file(&self.sender.file).await?;
            if receipt.sent != sender_commitment.file_size {
                return Err(NetworkError::Transfer {
                    expected: sender_commitment.file_size,
                    transferred: receipt.sent,
                }
                .into());
            }
            self.transition(ExchangeState::FileSent).await;
            self.transition(ExchangeState::FileReceived).await;

            Ok::<_, anyhow::Error>((receipt, challenge))
        }
        .await;

        client.close().await;
        if let Err(error) = listener.shutdown().await {
            tracing::warn!(reason = %error, "receiver's listener did not stop cleanly");
        }
        let (receipt, challenge) = transfer?;

        let received_by_receiver = receiver_storage.received(&sender_commitment.file_name);
        receiver_service
            .check_commitment(&received_by_receiver, &sender_commitment)
            .await
            .context("The receiver's copy does not match the sender's commitment")?;
        let proof = sender_commitment
            .proof
            .as_ref()
            .context("The sender's commitment has no proof")?;
        receiver_service
            .check_proof(proof, &challenge, &sender_commitment)
            .context("The sender's proof is not valid")?;
        sender_service
            .check_commitment(&receipt.received, &receiver_commitment)
            .await
            .context("The sender's copy does not match the receiver's commitment")?;
        self.transition(ExchangeState::Verified).await;

        self.transition(ExchangeState::Complete).await;
        Ok(ExchangeReport {
            receiver_commitment,
            sender_commitment,
            received_by_receiver,
            received_by_sender: receipt.received,
            history: self.history.clone(),
        })
    }
}
