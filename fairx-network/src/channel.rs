use crate::{codec::ControlCodec, Command, Error, ProtocolConfig, Response};
use anyhow::{Context as _, Result};
use futures::prelude::*;
use std::{cmp, path::Path, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
};
use tokio_util::codec::Framed;

/// one end of a connection speaking the exchange protocol
///
/// Control messages go through the [`ControlCodec`]. File bodies are
/// raw bytes written to and read from the underlying stream directly,
/// whatever the codec already buffered is handed to the file first.
pub struct Channel<S> {
    framed: Framed<S, ControlCodec>,
    config: ProtocolConfig,
}

async fn deadline<F, T, E>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::Timeout(timeout).into()),
    }
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: ProtocolConfig) -> Self {
        let codec = ControlCodec::new(config.header_size, config.buffer_size);
        Self {
            framed: Framed::new(stream, codec),
            config,
        }
    }

    pub async fn send_message(&mut self, message: String) -> Result<()> {
        let timeout = self.config.io_timeout;
        deadline(timeout, self.framed.send(message))
            .await
            .context("Cannot send control message")
    }

    /// receive the next control message, `None` if the peer closed the
    /// connection
    pub async fn receive_message(&mut self) -> Result<Option<String>> {
        let timeout = self.config.io_timeout;
        deadline(timeout, self.framed.next().map(Option::transpose))
            .await
            .context("Cannot receive control message")
    }

    pub async fn send_command(&mut self, command: &Command) -> Result<()> {
        let line = command.to_line(self.config.separator);
        tracing::trace!(%line, "sending command");
        self.send_message(line).await
    }

    pub async fn receive_command(&mut self) -> Result<Option<Command>> {
        let separator = self.config.separator;
        Ok(self
            .receive_message()
            .await?
            .map(|line| Command::parse(&line, separator)))
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<()> {
        let line = response.to_line(self.config.separator);
        tracing::trace!(%line, "sending response");
        self.send_message(line).await
    }

    pub async fn receive_response(&mut self) -> Result<Response> {
        let line = self
            .receive_message()
            .await?
            .ok_or_else(|| Error::protocol("Connection closed by the peer"))?;
        Ok(Response::parse(&line, self.config.separator)?)
    }

    /// stream exactly `size` bytes of the file at `path` to the peer
    ///
    /// Fails with [`Error::Transfer`] if the file holds less than `size`
    /// bytes.
    pub async fn send_file(&mut self, path: &Path, size: u64) -> Result<u64> {
        let timeout = self.config.io_timeout;
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Cannot open file {}", path.display()))?;
        let mut buffer = vec![0; self.config.buffer_size];
        let stream = self.framed.get_mut();

        let mut sent = 0u64;
        while sent < size {
            let want = cmp::min(buffer.len() as u64, size - sent) as usize;
            let read = file
                .read(&mut buffer[..want])
                .await
                .with_context(|| format!("Cannot read file {}", path.display()))?;
            if read == 0 {
                break;
            }
            deadline(timeout, stream.write_all(&buffer[..read]))
                .await
                .context("Cannot send file content")?;
            sent += read as u64;
        }
        deadline(timeout, stream.flush())
            .await
            .context("Cannot send file content")?;

        if sent < size {
            return Err(Error::Transfer {
                expected: size,
                transferred: sent,
            }
            .into());
        }

        tracing::debug!(file = %path.display(), size, "file sent");
        Ok(sent)
    }

    /// receive exactly `size` bytes from the peer into `path`
    ///
    /// Fails with [`Error::Transfer`] if the peer closes the connection
    /// early, the partially received file is left in place.
    pub async fn receive_file(&mut self, path: &Path, size: u64) -> Result<u64> {
        let timeout = self.config.io_timeout;
        let mut file = File::create(path)
            .await
            .with_context(|| format!("Cannot create file {}", path.display()))?;

        let mut received = 0u64;
        let buffered = self.framed.read_buffer_mut();
        if !buffered.is_empty() && size > 0 {
            let take = cmp::min(buffered.len() as u64, size) as usize;
            let chunk = buffered.split_to(take);
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Cannot write file {}", path.display()))?;
            received += take as u64;
        }

        let mut buffer = vec![0; self.config.buffer_size];
        let stream = self.framed.get_mut();
        while received < size {
            let want = cmp::min(buffer.len() as u64, size - received) as usize;
            let read = deadline(timeout, stream.read(&mut buffer[..want]))
                .await
                .context("Cannot receive file content")?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .await
                .with_context(|| format!("Cannot write file {}", path.display()))?;
            received += read as u64;
        }
        file.flush()
            .await
            .with_context(|| format!("Cannot write file {}", path.display()))?;

        if received < size {
            tracing::warn!(file = %path.display(), received, expected = size, "incomplete file");
            return Err(Error::Transfer {
                expected: size,
                transferred: received,
            }
            .into());
        }

        tracing::debug!(file = %path.display(), size, "file received");
        Ok(received)
    }

    /// shutdown the writing side of the connection
    pub async fn close(&mut self) -> Result<()> {
        let timeout = self.config.io_timeout;
        deadline(timeout, self.framed.get_mut().shutdown())
            .await
            .context("Cannot close the connection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            buffer_size: 64,
            io_timeout: Duration::from_secs(5),
            ..ProtocolConfig::default()
        }
    }

    fn content(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 253) as u8).collect()
    }

    #[tokio::test]
    async fn control_then_body_then_control() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        let body = content(1000);
        tokio::fs::write(&source, &body).await.unwrap();

        let (left, right) = duplex(256);
        let mut sender = Channel::new(left, config());
        let mut receiver = Channel::new(right, config());

        let send = async {
            sender
                .send_command(&Command::ExchangeFile {
                    name: "source".to_owned(),
                    size: body.len() as u64,
                })
                .await
                .unwrap();
            sender.send_file(&source, body.len() as u64).await.unwrap();
            sender.send_response(&Response::Ready).await.unwrap();
        };
        let receive = async {
            let command = receiver.receive_command().await.unwrap().unwrap();
            let size = match command {
                Command::ExchangeFile { size, .. } => size,
                other => panic!("unexpected command {:?}", other),
            };
            let received = receiver.receive_file(&target, size).await.unwrap();
            let response = receiver.receive_response().await.unwrap();
            (received, response)
        };

        let ((), (received, response)) = tokio::join!(send, receive);

        assert_eq!(received, body.len() as u64);
        assert_eq!(response, Response::Ready);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), body);
    }

    #[tokio::test]
    async fn empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("empty");
        let target = dir.path().join("target");
        tokio::fs::write(&source, b"").await.unwrap();

        let (left, right) = duplex(256);
        let mut sender = Channel::new(left, config());
        let mut receiver = Channel::new(right, config());

        assert_eq!(sender.send_file(&source, 0).await.unwrap(), 0);
        assert_eq!(receiver.receive_file(&target, 0).await.unwrap(), 0);
        assert!(target.exists());
    }

    #[tokio::test]
    async fn peer_closing_half_way() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("half");
        let target = dir.path().join("target");
        tokio::fs::write(&source, content(500)).await.unwrap();

        let (left, right) = duplex(4096);
        let mut sender = Channel::new(left, config());
        let mut receiver = Channel::new(right, config());

        sender.send_file(&source, 500).await.unwrap();
        sender.close().await.unwrap();
        drop(sender);

        let error = receiver.receive_file(&target, 1000).await.unwrap_err();

        assert!(matches!(
            Error::find(&error),
            Some(Error::Transfer {
                expected: 1000,
                transferred: 500
            })
        ));
        assert_eq!(tokio::fs::metadata(&target).await.unwrap().len(), 500);
    }

    #[tokio::test]
    async fn file_shorter_than_announced() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("short");
        tokio::fs::write(&source, content(10)).await.unwrap();

        let (left, _right) = duplex(4096);
        let mut sender = Channel::new(left, config());

        let error = sender.send_file(&source, 20).await.unwrap_err();
        assert!(matches!(Error::find(&error), Some(Error::Transfer { .. })));
    }

    #[tokio::test]
    async fn receive_times_out() {
        let (left, _right) = duplex(64);
        let mut channel = Channel::new(
            left,
            ProtocolConfig {
                io_timeout: Duration::from_millis(50),
                ..config()
            },
        );

        let error = channel.receive_message().await.unwrap_err();
        assert!(matches!(Error::find(&error), Some(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn closed_connection() {
        let (left, right) = duplex(64);
        drop(right);
        let mut channel = Channel::new(left, config());

        assert_eq!(channel.receive_command().await.unwrap(), None);
    }
}
