use anyhow::{Context as _, Result};
use cryptoxide::{digest::Digest as _, sha2::Sha256};
use serde::{Deserialize, Serialize};
use std::{
    array::TryFromSliceError,
    convert::{TryFrom, TryInto as _},
    fmt::{self, Formatter},
    path::Path,
    str::FromStr,
};
use tokio::{fs::File, io::AsyncReadExt as _};

/// SHA-256 digest of a file's content
///
/// Displayed and serialised as lowercase hexadecimal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash([u8; Self::SIZE]);

impl FileHash {
    pub const SIZE: usize = 32;

    /// files are hashed by blocks of this many bytes
    pub const BLOCK_SIZE: usize = 4096;

    /// hash an in memory byte slice
    pub fn digest(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.input(bytes.as_ref());
        Self::finish(hasher)
    }

    /// hash the content of the file at `path`, returning the digest and
    /// the number of bytes that were read
    ///
    /// The file is streamed by blocks of [`Self::BLOCK_SIZE`] so the
    /// memory usage does not depend on the size of the file.
    pub async fn compute(path: impl AsRef<Path>) -> Result<(Self, u64)> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Cannot open file {}", path.display()))?;

        let mut hasher = Sha256::new();
        let mut block = vec![0; Self::BLOCK_SIZE];
        let mut size = 0u64;
        loop {
            let read = file
                .read(&mut block)
                .await
                .with_context(|| format!("Cannot read file {}", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.input(&block[..read]);
            size += read as u64;
        }

        Ok((Self::finish(hasher), size))
    }

    fn finish(mut hasher: Sha256) -> Self {
        let mut bytes = [0; Self::SIZE];
        hasher.result(&mut bytes);
        Self(bytes)
    }
}

impl AsRef<[u8]> for FileHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl From<[u8; Self::SIZE]> for FileHash {
    fn from(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.to_string()
    }
}

impl<'a> TryFrom<&'a [u8]> for FileHash {
    type Error = TryFromSliceError;
    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        value.try_into().map(Self)
    }
}

impl TryFrom<String> for FileHash {
    type Error = <Self as FromStr>::Err;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileHash").field(&hex::encode(&self.0)).finish()
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for FileHash {
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
    use quickcheck::{Arbitrary, Gen};
    use std::io::Write as _;

    impl Arbitrary for FileHash {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut bytes = [0; Self::SIZE];
            bytes.iter_mut().for_each(|byte| *byte = u8::arbitrary(g));
            Self(bytes)
        }
    }

    #[quickcheck]
    fn to_string_from_str(hash: FileHash) -> bool {
        let s = hash.to_string();
        let decoded = s.parse::<FileHash>().unwrap();

        decoded == hash
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            FileHash::digest(b"abc").to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn streamed_digest_matches_in_memory_digest() {
        let content: Vec<u8> = (0..(3 * FileHash::BLOCK_SIZE + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let (first, size) = FileHash::compute(file.path()).await.unwrap();
        let (second, _) = FileHash::compute(file.path()).await.unwrap();

        assert_eq!(size, content.len() as u64);
        assert_eq!(first, second);
        assert_eq!(first, FileHash::digest(&content));
    }

    #[tokio::test]
    async fn empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (hash, size) = FileHash::compute(file.path()).await.unwrap();

        assert_eq!(size, 0);
        assert_eq!(
            hash.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
