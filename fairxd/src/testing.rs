use crate::{config::TlsConfig, Config};
use fairx_network::tls::Credentials;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::{path::Path, time::Duration};

/// a throw away CA with a server and a client certificate signed by it
pub struct Pki {
    pub ca_cert: std::path::PathBuf,
    pub server: Credentials,
    pub client: Credentials,
}

fn write(path: &Path, content: String) {
    std::fs::write(path, content).expect("write test PKI material");
}

impl Pki {
    pub fn generate(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).expect("create PKI directory");

        let ca_key = KeyPair::generate().expect("generate CA key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "fairx test root CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&ca_key).expect("self sign CA");

        let leaf = |name: &str, usage: ExtendedKeyUsagePurpose| {
            let key = KeyPair::generate().expect("generate leaf key");
            let mut params =
                CertificateParams::new(vec!["localhost".to_owned()]).expect("leaf params");
            params.distinguished_name.push(DnType::CommonName, name);
            params.extended_key_usages = vec![usage];
            let certificate = params
                .signed_by(&key, &ca, &ca_key)
                .expect("sign leaf certificate");

            let cert_chain = dir.join(format!("{}.chain.pem", name));
            let key_path = dir.join(format!("{}.key.pem", name));
            write(&cert_chain, format!("{}{}", certificate.pem(), ca.pem()));
            write(&key_path, key.serialize_pem());

            Credentials {
                cert_chain,
                key: key_path,
                key_password: None,
            }
        };

        let server = leaf("server", ExtendedKeyUsagePurpose::ServerAuth);
        let client = leaf("client", ExtendedKeyUsagePurpose::ClientAuth);

        let ca_cert = dir.join("rootca.cert.pem");
        write(&ca_cert, ca.pem());

        Self {
            ca_cert,
            server,
            client,
        }
    }
}

/// configuration of a role listening on an ephemeral port of the
/// loopback interface
pub fn config(name: &str, root: &Path, pki: &Pki) -> Config {
    Config {
        name: name.to_owned(),
        host: "127.0.0.1".to_owned(),
        port: 0,
        server_name: "localhost".to_owned(),
        buffer_size: 1024,
        separator: ':',
        header_size: 10,
        storage: root.join(name),
        tls: TlsConfig {
            server: pki.server.clone(),
            client: Some(pki.client.clone()),
            ca_cert: Some(pki.ca_cert.clone()),
            mutual_auth: true,
            allow_unverified_peers: false,
        },
        max_connections: 16,
        io_timeout: Duration::from_secs(10),
        connect_retries: 3,
        retry_delay: Duration::from_millis(50),
    }
}

/// deterministic content of the given size
pub fn content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 251) as u8).collect()
}
