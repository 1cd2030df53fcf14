use crate::{
    client::Client, encryption::FileEncryptor, listener::Listener, session::Handler, Config,
};
use anyhow::{Context as _, Result};
use std::{path::Path, path::PathBuf, sync::Arc};

/// name of the attestable service's storage, nested in the role's one
pub const ATTESTABLE: &str = "attestable";

/// encrypt `plaintext` through an attestable service run on behalf of
/// the role configured in `config`
///
/// The service listens with the role's server credentials and works in
/// `<storage>/attestable`. The role connects to it as a client, uploads
/// the file and stores the encrypted result in its `files` directory.
#[tracing::instrument(skip(config, encryptor), fields(role = %config.name), level = "info")]
pub async fn encrypt_file(
    config: &Config,
    plaintext: &Path,
    encryptor: Arc<dyn FileEncryptor>,
) -> Result<PathBuf> {
    let handler = Handler::new(config)
        .with_storage(config.storage().scoped(ATTESTABLE))
        .with_encryptor(encryptor);
    let listener = Listener::bind(config, handler)
        .await
        .context("Cannot start the attestable service")?;

    let result = async {
        let mut client = Client::with_address(config, listener.local_address().to_string())?;
        client.connect().await?;
        let encrypted = client.send_and_receive_encrypted_file(plaintext).await;
        client.close().await;
        encrypted
    }
    .await;

    if let Err(error) = listener.shutdown().await {
        tracing::warn!(reason = %error, "attestable service did not stop cleanly");
    }

    result
}
