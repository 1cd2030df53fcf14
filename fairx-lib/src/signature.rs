use cryptoxide::{
    hmac::Hmac,
    mac::{Mac as _, MacResult},
    sha2::Sha256,
};
use serde::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    fmt::{self, Formatter},
    str::FromStr,
};

/// HMAC-SHA256 tag over a commitment's canonical body, keyed by the
/// owner's identity string
///
/// Anyone knowing the owner's name can recompute the tag. It detects
/// tampering of a commitment in transit, it does not authenticate the
/// owner.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature([u8; Self::SIZE]);

impl Signature {
    pub const SIZE: usize = 32;

    pub fn sign(owner: &str, message: &[u8]) -> Self {
        let mut hmac = Hmac::new(Sha256::new(), owner.as_bytes());
        hmac.input(message);

        let mut bytes = [0; Self::SIZE];
        hmac.raw_result(&mut bytes);
        Self(bytes)
    }

    /// recompute the tag for `owner` and `message` and compare it in
    /// constant time
    pub fn verify(&self, owner: &str, message: &[u8]) -> bool {
        let expected = Self::sign(owner, message);
        MacResult::new(&expected.0) == MacResult::new(&self.0)
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl From<[u8; Self::SIZE]> for Signature {
    fn from(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Signature> for String {
    fn from(signature: Signature) -> Self {
        signature.to_string()
    }
}

impl TryFrom<String> for Signature {
    type Error = <Self as FromStr>::Err;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Signature {
    type Err = hex::FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc4231_test_case_2() {
        let signature = Signature::sign("Jefe", b"what do ya want for nothing?");

        assert_eq!(
            signature.to_string(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[quickcheck]
    fn verify_own_signature(owner: String, message: Vec<u8>) -> bool {
        Signature::sign(&owner, &message).verify(&owner, &message)
    }

    #[quickcheck]
    fn reject_other_owner(owner: String, message: Vec<u8>) -> bool {
        let other = format!("{}-other", owner);
        !Signature::sign(&owner, &message).verify(&other, &message)
    }
}
