use crate::{connections::Connections, session::Handler, session::Session, Config};
use anyhow::{anyhow, bail, Context as _, Result};
use fairx_network::tls;
use std::{fmt::Display, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

/// accept TLS connections and serve each of them in its own task
///
/// At most `max_connections` connections are served concurrently, the
/// others wait in the backlog.
pub struct Listener {
    command: mpsc::Sender<Command>,
    handle: JoinHandle<Result<()>>,
    local_address: SocketAddr,
    connections: Connections,
}

enum Command {
    Shutdown,
}

struct Runner {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: Arc<Handler>,
    connections: Connections,
    permits: Arc<Semaphore>,
    command: mpsc::Receiver<Command>,
    next_id: u64,
}

impl Listener {
    /// listen on the configured address with the configured TLS material
    pub async fn bind(config: &Config, handler: Handler) -> Result<Self> {
        let acceptor = config.acceptor()?;
        Self::bind_with(config.address(), acceptor, handler, config.max_connections).await
    }

    pub async fn bind_with<A>(
        address: A,
        acceptor: TlsAcceptor,
        handler: Handler,
        max_connections: usize,
    ) -> Result<Self>
    where
        A: ToSocketAddrs + Display,
    {
        handler.storage().prepare().await?;

        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Cannot listen to {}", address))?;
        let local_address = listener
            .local_addr()
            .context("Cannot retrieve the listening address")?;
        let max_connections = max_connections.max(1);

        tracing::info!(
            %local_address,
            max_connections,
            role = %handler.role(),
            "listening for inbound connections"
        );

        let (command_sender, command_receiver) = mpsc::channel(1);
        let connections = Connections::default();

        let runner = Runner {
            listener,
            acceptor,
            handler: Arc::new(handler),
            connections: connections.clone(),
            permits: Arc::new(Semaphore::new(max_connections)),
            command: command_receiver,
            next_id: 0,
        };

        let handle = tokio::spawn(runner.run());

        Ok(Self {
            command: command_sender,
            handle,
            local_address,
            connections,
        })
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// stop accepting connections and abort the ones still being served
    pub async fn shutdown(self) -> Result<()> {
        self.command
            .send(Command::Shutdown)
            .await
            .map_err(|_| anyhow!("Cannot send shutdown command to the listener"))?;

        let mut handle = self.handle;

        tokio::select! {
            result = &mut handle => {
                match result {
                    Ok(result) => result,
                    Err(error) => bail!("error while waiting for the listener to shutdown: {}", error)
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                handle.abort();
                bail!("shutdown timedout, aborting instead...")
            }
        }
    }
}

impl Runner {
    #[tracing::instrument(
        skip(self),
        fields(role = %self.handler.role()),
        level = "info"
    )]
    async fn run(mut self) -> Result<()> {
        loop {
            let permit = tokio::select! {
                _ = self.command.recv() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    permit.context("connection permits are closed")?
                }
            };

            tokio::select! {
                _ = self.command.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn(stream, peer, permit),
                    Err(error) => {
                        tracing::warn!(reason = %error, "Cannot accept inbound connection");
                    }
                }
            }
        }

        if !self.connections.is_empty() {
            let peers = self.connections.peers();
            tracing::debug!(?peers, "aborting remaining connections");
            let aborted = self.connections.abort_all();
            tracing::info!(aborted, "connections aborted");
        }
        tracing::info!("listener stopped");

        Ok(())
    }

    fn spawn(&mut self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) {
        self.next_id += 1;
        let id = self.next_id;
        let acceptor = self.acceptor.clone();
        let handler = Arc::clone(&self.handler);
        let connections = self.connections.clone();
        let timeout = handler.protocol().io_timeout;

        self.connections.insert(id, peer);

        let task = tokio::spawn(async move {
            let _permit = permit;

            match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
                Err(_) => tracing::warn!(%peer, "TLS handshake timed out"),
                Ok(Err(error)) => tracing::warn!(%peer, reason = %error, "TLS handshake failed"),
                Ok(Ok(stream)) => {
                    let identity = tls::peer_identity(stream.get_ref().1.peer_certificates());
                    Session::new(id, peer.to_string(), identity, stream, handler.protocol())
                        .run(&handler)
                        .await;
                }
            }

            connections.remove(id);
        });

        self.connections.attach(id, task.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::Client, testing};
    use fairx_network::{Channel, Error};
    use std::path::Path;

    /// alice listens, the returned configuration is bob's
    async fn serve(root: &Path) -> (Config, Listener) {
        let pki = testing::Pki::generate(&root.join("pki"));
        let alice = testing::config("alice", root, &pki);
        let listener = Listener::bind(&alice, Handler::new(&alice)).await.unwrap();
        (testing::config("bob", root, &pki), listener)
    }

    async fn write(path: &Path, size: usize) -> Vec<u8> {
        let content = testing::content(size);
        tokio::fs::write(path, &content).await.unwrap();
        content
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutual_tls_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (config, listener) = serve(dir.path()).await;
        let source = dir.path().join("doc.txt");
        let content = write(&source, 100_000).await;

        let mut client =
            Client::with_address(&config, listener.local_address().to_string()).unwrap();
        client.connect().await.unwrap();
        let encrypted = client.send_and_receive_encrypted_file(&source).await.unwrap();
        client.close().await;

        assert_eq!(encrypted, config.storage().files().join("doc_encrypted.txt"));
        assert_eq!(tokio::fs::read(&encrypted).await.unwrap(), content);
        assert!(dir.path().join("alice/files/doc_encrypted.txt").is_file());
        tokio::fs::remove_file(&encrypted).await.unwrap();

        let mut client =
            Client::with_address(&config, listener.local_address().to_string()).unwrap();
        client.connect().await.unwrap();
        let requested = client.request_file("doc_encrypted.txt").await.unwrap();
        client.close().await;
        assert_eq!(tokio::fs::read(&requested).await.unwrap(), content);

        listener.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_clients() {
        const CLIENTS: usize = 8;

        let dir = tempfile::tempdir().unwrap();
        let (config, listener) = serve(dir.path()).await;
        let address = listener.local_address().to_string();

        let mut tasks = Vec::new();
        for index in 0..CLIENTS {
            let source = dir.path().join(format!("doc{}.bin", index));
            let content = write(&source, 10_000 + index * 1_000).await;
            let config = config.clone();
            let address = address.clone();
            tasks.push(tokio::spawn(async move {
                let mut client = Client::with_address(&config, address).unwrap();
                client.connect().await.unwrap();
                let encrypted = client.send_and_receive_encrypted_file(&source).await.unwrap();
                client.close().await;
                (content, encrypted)
            }));
        }

        for (index, task) in tasks.into_iter().enumerate() {
            let (content, encrypted) = task.await.unwrap();
            assert_eq!(
                encrypted.file_name().unwrap().to_str().unwrap(),
                format!("doc{}_encrypted.bin", index)
            );
            assert_eq!(tokio::fs::read(&encrypted).await.unwrap(), content);
        }

        listener.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn misbehaving_client_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let (config, listener) = serve(dir.path()).await;
        let address = listener.local_address().to_string();

        // plain TCP garbage, the handshake fails
        let mut garbage = TcpStream::connect(&address).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut garbage, b"HELLO\n").await.unwrap();

        // valid TLS, unknown command
        let mut client = Client::with_address(&config, address.clone()).unwrap();
        client.connect().await.unwrap();
        let connector = config.connector().unwrap();
        let stream = TcpStream::connect(&address).await.unwrap();
        let stream = connector
            .connect(tls::server_name("localhost").unwrap(), stream)
            .await
            .unwrap();
        let mut channel = Channel::new(stream, config.protocol());
        channel.send_message("HELLO".to_owned()).await.unwrap();
        assert_eq!(
            channel.receive_message().await.unwrap().as_deref(),
            Some("ERROR:Unknown command")
        );

        // the first client is still served
        let source = dir.path().join("doc.txt");
        let content = write(&source, 5_000).await;
        let encrypted = client.send_and_receive_encrypted_file(&source).await.unwrap();
        assert_eq!(tokio::fs::read(&encrypted).await.unwrap(), content);

        drop(garbage);
        listener.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_without_certificate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, listener) = serve(dir.path()).await;
        config.tls.client = None;
        config.connect_retries = 1;

        let mut client =
            Client::with_address(&config, listener.local_address().to_string()).unwrap();
        let source = dir.path().join("doc.txt");
        write(&source, 10).await;

        // TLS 1.3 reports the missing client certificate after the
        // client considers the handshake done
        let outcome = async {
            client.connect().await?;
            client.send_and_receive_encrypted_file(&source).await
        }
        .await;

        assert!(outcome.is_err());
        listener.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn untrusted_server_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, listener) = serve(dir.path()).await;
        let other = testing::Pki::generate(&dir.path().join("other-pki"));
        config.tls.ca_cert = Some(other.ca_cert);
        config.connect_retries = 2;

        let mut client =
            Client::with_address(&config, listener.local_address().to_string()).unwrap();
        let error = client.connect().await.unwrap_err();

        assert!(matches!(
            Error::find(&error),
            Some(Error::Connection { attempts: 2, .. })
        ));
        assert!(!client.is_connected());
        listener.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_ca_requires_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let pki = testing::Pki::generate(&dir.path().join("pki"));
        let mut alice = testing::config("alice", dir.path(), &pki);
        alice.tls.ca_cert = Some(dir.path().join("missing.pem"));

        assert!(Listener::bind(&alice, Handler::new(&alice)).await.is_err());

        alice.tls.allow_unverified_peers = true;
        let listener = Listener::bind(&alice, Handler::new(&alice)).await.unwrap();
        let mut config = testing::config("bob", dir.path(), &pki);
        config.tls.ca_cert = None;
        config.tls.allow_unverified_peers = true;
        let source = dir.path().join("doc.txt");
        let content = write(&source, 2_000).await;

        let mut client =
            Client::with_address(&config, listener.local_address().to_string()).unwrap();
        client.connect().await.unwrap();
        let encrypted = client.send_and_receive_encrypted_file(&source).await.unwrap();
        assert_eq!(tokio::fs::read(&encrypted).await.unwrap(), content);

        listener.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_aborts_connections() {
        let dir = tempfile::tempdir().unwrap();
        let (config, listener) = serve(dir.path()).await;

        // connected but silent, the session waits for its command
        let address = listener.local_address().to_string();
        let stream = TcpStream::connect(&address).await.unwrap();
        let stream = config
            .connector()
            .unwrap()
            .connect(tls::server_name("localhost").unwrap(), stream)
            .await
            .unwrap();
        let mut channel = Channel::new(stream, config.protocol());
        for _ in 0..100 {
            if listener.active_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(listener.active_connections(), 1);

        listener.shutdown().await.unwrap();

        // the session is gone well before its own I/O timeout
        let received = tokio::time::timeout(Duration::from_secs(5), channel.receive_message())
            .await
            .expect("the connection is still open");
        match received {
            Ok(None) => {}
            Err(error) => assert!(!matches!(Error::find(&error), Some(Error::Timeout(_)))),
            Ok(Some(message)) => panic!("unexpected message {:?}", message),
        }
    }
}
