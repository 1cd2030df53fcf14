use crate::{Challenge, Commitment, FileHash, Proof};
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// the file a commitment or a proof was requested for does not exist
#[derive(Debug, Error)]
#[error("File not found: {}", .path.display())]
pub struct NotFound {
    pub path: PathBuf,
}

/// the reason a file or a counterpart's commitment was not accepted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("file size is {actual} bytes, {expected} bytes were committed")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("file hash is {actual}, {expected} was committed")]
    HashMismatch { expected: FileHash, actual: FileHash },

    #[error("invalid signature on {owner}'s commitment")]
    InvalidSignature { owner: String },

    #[error("no commitment to check against")]
    MissingCommitment,

    #[error("commitment carries no proof")]
    MissingProof,

    #[error("proof was made for the challenge {actual}, expected {expected}")]
    ChallengeMismatch {
        expected: Challenge,
        actual: Challenge,
    },

    #[error("proof does not match the committed file hash")]
    ProofMismatch,

    #[error("cannot read file: {0}")]
    Unreadable(String),
}

/// generate commitments for a given owner and check the ones received
/// from counterparts
///
/// Every generated commitment is persisted as
/// `<verification dir>/<file name>.commitment.json`.
#[derive(Debug, Clone)]
pub struct CommitmentService {
    owner: String,
    verification_dir: PathBuf,
}

impl CommitmentService {
    pub const COMMITMENT_EXTENSION: &'static str = "commitment.json";

    pub fn new(owner: impl Into<String>, verification_dir: impl Into<PathBuf>) -> Self {
        Self {
            owner: owner.into(),
            verification_dir: verification_dir.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn commitment_path(&self, file_name: &str) -> PathBuf {
        self.verification_dir
            .join(format!("{}.{}", file_name, Self::COMMITMENT_EXTENSION))
    }

    /// hash `file`, sign a new commitment over it and persist it
    #[tracing::instrument(skip(self), fields(owner = %self.owner), level = "debug")]
    pub async fn generate_commitment(&self, file: &Path) -> Result<Commitment> {
        if !file.is_file() {
            return Err(NotFound {
                path: file.to_path_buf(),
            }
            .into());
        }

        let file_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("Invalid file name {}", file.display()))?
            .to_owned();
        let (file_hash, file_size) = FileHash::compute(file).await?;
        let timestamp = chrono::Local::now().to_rfc3339();

        let commitment = Commitment::new(file_name, file_size, file_hash, &self.owner, timestamp)?;

        tokio::fs::create_dir_all(&self.verification_dir)
            .await
            .with_context(|| {
                format!(
                    "Cannot create verification directory {}",
                    self.verification_dir.display()
                )
            })?;
        commitment
            .save(self.commitment_path(&commitment.file_name))
            .await?;

        tracing::info!(
            file = %commitment.file_name,
            size = commitment.file_size,
            hash = %commitment.file_hash,
            "commitment generated"
        );

        Ok(commitment)
    }

    /// load a persisted commitment
    pub async fn load_commitment(&self, path: &Path) -> Result<Commitment> {
        Commitment::load(path).await
    }

    /// check `file` against `commitment`: size, hash and signature
    pub async fn check_commitment(
        &self,
        file: &Path,
        commitment: &Commitment,
    ) -> Result<(), VerificationFailure> {
        if !file.is_file() {
            return Err(VerificationFailure::MissingFile(file.to_path_buf()));
        }

        let (actual_hash, actual_size) = FileHash::compute(file)
            .await
            .map_err(|error| VerificationFailure::Unreadable(format!("{:#}", error)))?;

        if actual_size != commitment.file_size {
            return Err(VerificationFailure::SizeMismatch {
                expected: commitment.file_size,
                actual: actual_size,
            });
        }

        if actual_hash != commitment.file_hash {
            return Err(VerificationFailure::HashMismatch {
                expected: commitment.file_hash,
                actual: actual_hash,
            });
        }

        self.check_signature(commitment)
    }

    /// same as [`Self::check_commitment`], reporting the failure in the
    /// logs only
    pub async fn verify_commitment(&self, file: &Path, commitment: &Commitment) -> bool {
        match self.check_commitment(file, commitment).await {
            Ok(()) => true,
            Err(failure) => {
                tracing::warn!(
                    file = %file.display(),
                    owner = %commitment.owner,
                    %failure,
                    "file does not match its commitment"
                );
                false
            }
        }
    }

    /// hash `file` and bind it to `challenge`
    pub async fn generate_proof(&self, file: &Path, challenge: &Challenge) -> Result<Proof> {
        if !file.is_file() {
            return Err(NotFound {
                path: file.to_path_buf(),
            }
            .into());
        }

        let (file_hash, _) = FileHash::compute(file).await?;
        Ok(Proof::compute(&file_hash, challenge))
    }

    /// check `proof` was computed for `challenge` over the file committed
    /// to in `commitment`
    pub fn check_proof(
        &self,
        proof: &Proof,
        challenge: &Challenge,
        commitment: &Commitment,
    ) -> Result<(), VerificationFailure> {
        if &proof.challenge != challenge {
            return Err(VerificationFailure::ChallengeMismatch {
                expected: challenge.clone(),
                actual: proof.challenge.clone(),
            });
        }
        if !proof.matches(&commitment.file_hash, challenge) {
            return Err(VerificationFailure::ProofMismatch);
        }
        Ok(())
    }

    pub fn verify_proof(&self, proof: &Proof, challenge: &Challenge, commitment: &Commitment) -> bool {
        match self.check_proof(proof, challenge, commitment) {
            Ok(()) => true,
            Err(failure) => {
                tracing::warn!(owner = %commitment.owner, %failure, "proof rejected");
                false
            }
        }
    }

    /// accept a counterpart's commitment after checking its signature
    pub fn check_signature(&self, commitment: &Commitment) -> Result<(), VerificationFailure> {
        if commitment.signature_is_valid() {
            Ok(())
        } else {
            Err(VerificationFailure::InvalidSignature {
                owner: commitment.owner.clone(),
            })
        }
    }

    /// check the two commitments of an exchange before any byte is
    /// transferred: ours must be our own and theirs must carry a valid
    /// signature
    pub fn exchange_commitments(
        &self,
        ours: &Commitment,
        theirs: &Commitment,
    ) -> Result<(), VerificationFailure> {
        if ours.owner != self.owner {
            return Err(VerificationFailure::InvalidSignature {
                owner: ours.owner.clone(),
            });
        }
        self.check_signature(ours)?;
        self.check_signature(theirs)?;

        tracing::info!(
            owner = %self.owner,
            counterpart = %theirs.owner,
            file = %theirs.file_name,
            "commitments exchanged"
        );
        Ok(())
    }
}
