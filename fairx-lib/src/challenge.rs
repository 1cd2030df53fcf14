use rand::{distributions::Alphanumeric, CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    fmt::{self, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// random nonce a proof of possession is bound to
///
/// Generated challenges are [`Challenge::LENGTH`] characters drawn
/// from `[A-Za-z0-9]`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Challenge(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("A challenge must be a non empty alphanumeric string")]
pub struct InvalidChallenge;

impl Challenge {
    pub const LENGTH: usize = 16;

    pub fn generate<RNG>(rng: RNG) -> Self
    where
        RNG: Rng + CryptoRng,
    {
        Self(
            rng.sample_iter(&Alphanumeric)
                .take(Self::LENGTH)
                .map(char::from)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for Challenge {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<Challenge> for String {
    fn from(challenge: Challenge) -> Self {
        challenge.0
    }
}

impl TryFrom<String> for Challenge {
    type Error = InvalidChallenge;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidChallenge);
        }
        Ok(Self(value))
    }
}

impl FromStr for Challenge {
    type Err = InvalidChallenge;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Challenge").field(&self.0).finish()
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
