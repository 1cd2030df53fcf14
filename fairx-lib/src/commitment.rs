use crate::{FileHash, Proof, Signature};
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// public record binding a file's name, size and content hash to its
/// owner at a point in time
///
/// The `signature` covers every other field except `proof`, which is
/// attached later on once a challenge is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Commitment {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: FileHash,
    pub owner: String,
    pub timestamp: String,
    pub signature: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// the signed part of a [`Commitment`], fields in lexicographic order
#[derive(Serialize)]
struct Body<'a> {
    file_hash: &'a FileHash,
    file_name: &'a str,
    file_size: u64,
    owner: &'a str,
    timestamp: &'a str,
}

impl Commitment {
    /// build and sign a new commitment
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        file_hash: FileHash,
        owner: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<Self> {
        let mut commitment = Self {
            file_name: file_name.into(),
            file_size,
            file_hash,
            owner: owner.into(),
            timestamp: timestamp.into(),
            signature: Signature::from([0; Signature::SIZE]),
            proof: None,
        };
        commitment.signature = Signature::sign(&commitment.owner, &commitment.canonical_body()?);
        Ok(commitment)
    }

    /// canonical serialisation of the signed fields: compact JSON with
    /// the keys sorted
    pub fn canonical_body(&self) -> Result<Vec<u8>> {
        let body = Body {
            file_hash: &self.file_hash,
            file_name: &self.file_name,
            file_size: self.file_size,
            owner: &self.owner,
            timestamp: &self.timestamp,
        };
        serde_json::to_vec(&body).context("Cannot serialise the commitment's body")
    }

    /// recompute the identity keyed tag of the commitment and check it
    /// against `signature`
    pub fn signature_is_valid(&self) -> bool {
        match self.canonical_body() {
            Ok(body) => self.signature.verify(&self.owner, &body),
            Err(_) => false,
        }
    }

    pub fn attach_proof(&mut self, proof: Proof) {
        self.proof = Some(proof);
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Cannot read commitment {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Cannot parse commitment {}", path.display()))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(self).context("Cannot serialise the commitment")?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Cannot write commitment {}", path.display()))
    }
}
