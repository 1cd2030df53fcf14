use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

/// transformation applied by the attestable service to uploaded files
pub trait FileEncryptor: Send + Sync {
    /// encrypt `input` (uploaded as `name`) into `output_dir`, returning
    /// the path of the encrypted file
    fn encrypt(&self, input: &Path, name: &str, output_dir: &Path) -> Result<PathBuf>;
}

/// stand-in encryptor copying the file as is under its encrypted name
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCopy;

/// `doc.txt` becomes `doc_encrypted.txt`
pub fn encrypted_name(name: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name);
    match path.extension().and_then(|extension| extension.to_str()) {
        Some(extension) => format!("{}_encrypted.{}", stem, extension),
        None => format!("{}_encrypted", stem),
    }
}

impl FileEncryptor for IdentityCopy {
    fn encrypt(&self, input: &Path, name: &str, output_dir: &Path) -> Result<PathBuf> {
        let output = output_dir.join(encrypted_name(name));
        std::fs::copy(input, &output).with_context(|| {
            format!("Cannot copy {} to {}", input.display(), output.display())
        })?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(encrypted_name("doc.txt"), "doc_encrypted.txt");
        assert_eq!(encrypted_name("archive.tar.gz"), "archive.tar_encrypted.gz");
        assert_eq!(encrypted_name("README"), "README_encrypted");
        assert_eq!(encrypted_name(".profile"), ".profile_encrypted");
    }

    #[test]
    fn identity_copy() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("upload");
        std::fs::write(&input, b"plain").unwrap();

        let output = IdentityCopy
            .encrypt(&input, "doc.txt", dir.path())
            .unwrap();

        assert_eq!(output, dir.path().join("doc_encrypted.txt"));
        assert_eq!(std::fs::read(output).unwrap(), b"plain");
    }
}
