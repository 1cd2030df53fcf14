use fairx_lib::{Challenge, Commitment, CommitmentService, VerificationFailure};
use std::{path::Path, path::PathBuf, time::Duration};
use tokio::sync::watch;

/// what a listener expects the counterpart's file to match
#[derive(Debug, Clone)]
pub struct Expectation {
    /// the counterpart's commitment, with its proof attached
    pub commitment: Commitment,
    /// the challenge the proof must have been computed for
    pub challenge: Challenge,
}

/// holds back a listener's own file until the file it received from the
/// counterpart matches the counterpart's commitment and proof
///
/// The expectation is delivered through a [`watch`] channel as it is
/// only known once the counterpart attached its proof.
pub struct FairnessGate {
    service: CommitmentService,
    expected: watch::Receiver<Option<Expectation>>,
    wait: Duration,
}

/// the file a listener hands over in exchange of the counterpart's one
pub struct ExchangeOffer {
    pub file: PathBuf,
    pub gate: Option<FairnessGate>,
}

impl FairnessGate {
    /// `wait` bounds the time to wait for the expectation to be delivered
    pub fn new(
        service: CommitmentService,
        wait: Duration,
    ) -> (watch::Sender<Option<Expectation>>, Self) {
        let (sender, expected) = watch::channel(None);
        (
            sender,
            Self {
                service,
                expected,
                wait,
            },
        )
    }

    async fn expectation(&self) -> Option<Expectation> {
        let mut expected = self.expected.clone();
        let waiting = async move {
            loop {
                let current = expected.borrow().clone();
                if current.is_some() {
                    return current;
                }
                if expected.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(self.wait, waiting).await.ok().flatten()
    }

    pub async fn check(&self, received: &Path) -> Result<(), VerificationFailure> {
        let expectation = self
            .expectation()
            .await
            .ok_or(VerificationFailure::MissingCommitment)?;
        let commitment = &expectation.commitment;

        self.service.check_commitment(received, commitment).await?;

        let proof = commitment
            .proof
            .as_ref()
            .ok_or(VerificationFailure::MissingProof)?;
        self.service
            .check_proof(proof, &expectation.challenge, commitment)
    }
}

impl ExchangeOffer {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            gate: None,
        }
    }

    pub fn with_gate(self, gate: FairnessGate) -> Self {
        Self {
            gate: Some(gate),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairx_lib::Proof;
    use rand::rngs::OsRng;

    async fn setup() -> (tempfile::TempDir, CommitmentService, PathBuf, Commitment) {
        let dir = tempfile::tempdir().unwrap();
        let bob = CommitmentService::new("bob", dir.path().join("verification"));
        let file = dir.path().join("bob.bin");
        tokio::fs::write(&file, b"bob's encrypted file").await.unwrap();
        let commitment = bob.generate_commitment(&file).await.unwrap();
        (dir, bob, file, commitment)
    }

    #[tokio::test]
    async fn release_on_match() {
        let (dir, bob, file, mut commitment) = setup().await;
        let alice = CommitmentService::new("alice", dir.path().join("alice"));
        let challenge = Challenge::generate(OsRng);
        commitment.attach_proof(bob.generate_proof(&file, &challenge).await.unwrap());

        let (sender, gate) = FairnessGate::new(alice, Duration::from_secs(1));
        sender
            .send(Some(Expectation {
                commitment,
                challenge,
            }))
            .unwrap();

        assert_eq!(gate.check(&file).await, Ok(()));
    }

    #[tokio::test]
    async fn hold_on_mismatch() {
        let (dir, _bob, file, mut commitment) = setup().await;
        let alice = CommitmentService::new("alice", dir.path().join("alice"));
        let challenge = Challenge::generate(OsRng);
        commitment.attach_proof(Proof::compute(&commitment.file_hash, &challenge));

        let (sender, gate) = FairnessGate::new(alice, Duration::from_secs(1));
        sender
            .send(Some(Expectation {
                commitment,
                challenge,
            }))
            .unwrap();

        tokio::fs::write(&file, b"something else entirely").await.unwrap();
        assert!(matches!(
            gate.check(&file).await,
            Err(VerificationFailure::SizeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn hold_on_missing_proof() {
        let (dir, _bob, file, commitment) = setup().await;
        let alice = CommitmentService::new("alice", dir.path().join("alice"));

        let (sender, gate) = FairnessGate::new(alice, Duration::from_secs(1));
        sender
            .send(Some(Expectation {
                commitment,
                challenge: Challenge::generate(OsRng),
            }))
            .unwrap();

        assert_eq!(
            gate.check(&file).await,
            Err(VerificationFailure::MissingProof)
        );
    }

    #[tokio::test]
    async fn hold_without_expectation() {
        let (dir, _bob, file, _) = setup().await;
        let alice = CommitmentService::new("alice", dir.path().join("alice"));

        let (_sender, gate) = FairnessGate::new(alice, Duration::from_millis(20));

        assert_eq!(
            gate.check(&file).await,
            Err(VerificationFailure::MissingCommitment)
        );
    }
}
