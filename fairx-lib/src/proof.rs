use crate::{Challenge, FileHash};
use serde::{Deserialize, Serialize};

/// proof that the holder of a file could hash it together with a
/// given challenge
///
/// `proof` is the hex encoded SHA-256 of `"<file hash hex>:<challenge>"`.
/// This is a hash binding, it does not hide anything about the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Proof {
    pub proof: String,
    pub challenge: Challenge,
}

impl Proof {
    pub fn compute(file_hash: &FileHash, challenge: &Challenge) -> Self {
        Self {
            proof: Self::binding(file_hash, challenge),
            challenge: challenge.clone(),
        }
    }

    /// check the proof was made for the given `challenge` and for a
    /// file of the given hash
    pub fn matches(&self, file_hash: &FileHash, challenge: &Challenge) -> bool {
        &self.challenge == challenge && self.proof == Self::binding(file_hash, challenge)
    }

    fn binding(file_hash: &FileHash, challenge: &Challenge) -> String {
        FileHash::digest(format!("{}:{}", file_hash, challenge)).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn proof_is_bound_to_hash_and_challenge() {
        let hash = FileHash::digest(b"the file");
        let other_hash = FileHash::digest(b"another file");
        let challenge = Challenge::generate(OsRng);
        let other_challenge = Challenge::generate(OsRng);

        let proof = Proof::compute(&hash, &challenge);

        assert!(proof.matches(&hash, &challenge));
        assert!(!proof.matches(&other_hash, &challenge));
        assert!(!proof.matches(&hash, &other_challenge));
    }

    #[test]
    fn binding_format() {
        let hash = FileHash::digest(b"abc");
        let challenge: Challenge = "0123456789abcdef".parse().unwrap();

        let proof = Proof::compute(&hash, &challenge);

        assert_eq!(
            proof.proof,
            FileHash::digest(format!("{}:0123456789abcdef", hash)).to_string()
        );
    }
}
