use crate::Result;
use async_trait::async_trait;
use sha1::{Digest, Sha1};

/// Retrieves the TLS certificate thumbprint of an endpoint over a raw socket.
#[async_trait]
pub trait Thumbprinter: Send + Sync {
    async fn retrieve_sha1(&self, host: &str, port: u16) -> Result<String>;
}

/// SHA-1 over the certificate's DER encoding, rendered the way vSphere
/// expects it: uppercase hex pairs joined by colons.
pub fn sha1_colon_hex(der: &[u8]) -> String {
    let sum = Sha1::digest(der);
    sum.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Used when no TLS stack is linked into the build.
pub struct NullThumbprinter;

#[async_trait]
impl Thumbprinter for NullThumbprinter {
    async fn retrieve_sha1(&self, host: &str, port: u16) -> Result<String> {
        Err(crate::MigrateError::TransportError(format!(
            "no TLS stack is linked into this build, cannot fingerprint {}:{}",
            host, port
        )))
    }
}
