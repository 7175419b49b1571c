// Copyright 2020 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The libp2p TLS handshake core.
//!
//! A self-signed TLS 1.3 certificate carries an extra X.509 extension that
//! binds the certificate's ephemeral key to a long-lived libp2p identity
//! key. This crate builds those certificates, verifies them, derives the
//! remote [`PeerId`](peer_id::PeerId) from a verified certificate, and
//! bridges a duplex byte stream (what a TLS engine wants) to the
//! `Stream`/`Sink` duplex shape the rest of a libp2p transport speaks.
//!
//! Certificate chain validation, session resumption and cipher-suite policy
//! beyond the TLS 1.3 defaults are out of scope: certificates here are
//! always self-signed, depth 1, and only TLS 1.3 is ever negotiated.

#![forbid(unsafe_code)]

mod certificate;
mod identity;
mod peer_id;
mod pem;
mod signature_payload;
mod stream_bridge;
mod verifier;

pub use certificate::{generate_certificate, CertificateError};
pub use identity::{IdentityError, Keypair, KeyType, PublicKey};
pub use peer_id::PeerId;
pub use signature_payload::encode_signature_payload;
pub use stream_bridge::{byte_stream, duplex_stream};
pub use verifier::{verify_peer_certificate, Libp2pCertificateVerifier, VerificationError};

use std::sync::Arc;

/// The libp2p extension OID, `1.3.6.1.4.1.53594.1.1`, DER-encoded as relative
/// subidentifiers.
pub(crate) const LIBP2P_OID_BYTES: &[u8] = &[43, 6, 1, 4, 1, 131, 162, 90, 1, 1];

/// The fixed ASCII prefix prepended to the certificate's SubjectPublicKeyInfo
/// before it is signed by the libp2p identity key. No trailing NUL.
pub(crate) const LIBP2P_SIGNING_PREFIX: [u8; 21] = *b"libp2p-tls-handshake:";

/// Error building a client/server TLS configuration.
#[derive(Debug, err_derive::Error)]
pub enum ConfigError {
    /// TLS private key or certificate rejected by rustls.
    #[error(display = "TLS private key or certificate rejected: {}", _0)]
    Rustls(#[error(source)] rustls::Error),
    /// Certificate generation failed.
    #[error(display = "certificate generation failed: {}", _0)]
    Certificate(#[error(source)] CertificateError),
}

fn make_client_config(
    certificate: rustls::Certificate,
    key: rustls::PrivateKey,
    verifier: Arc<Libp2pCertificateVerifier>,
) -> Result<rustls::ClientConfig, rustls::Error> {
    let mut crypto = rustls::ClientConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(vec![certificate], key)?;
    crypto.alpn_protocols = vec![b"libp2p".to_vec()];
    crypto.enable_early_data = false;
    Ok(crypto)
}

fn make_server_config(
    certificate: rustls::Certificate,
    key: rustls::PrivateKey,
    verifier: Arc<Libp2pCertificateVerifier>,
) -> Result<rustls::ServerConfig, rustls::Error> {
    let mut crypto = rustls::ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![certificate], key)?;
    crypto.alpn_protocols = vec![b"libp2p".to_vec()];
    Ok(crypto)
}

/// Build a client and server `rustls` configuration authenticated with
/// `keypair`'s libp2p identity, optionally pinning the expected remote
/// [`PeerId`] (client side only; a listening server accepts any valid
/// libp2p certificate and lets the caller inspect the derived `PeerId`
/// afterwards).
pub fn make_tls_config(
    keypair: &Keypair,
    expected_remote_peer_id: Option<PeerId>,
) -> Result<(rustls::ClientConfig, rustls::ServerConfig), ConfigError> {
    let (cert_pem, key_pem) = generate_certificate(keypair).map_err(ConfigError::Certificate)?;
    let cert_der = pem::decode(&cert_pem).expect("we just generated this PEM; qed");
    let key_der = pem::decode(&key_pem).expect("we just generated this PEM; qed");

    let cert = rustls::Certificate(cert_der);
    let key = rustls::PrivateKey(key_der);
    let verifier = Arc::new(Libp2pCertificateVerifier::new(expected_remote_peer_id));

    Ok((
        make_client_config(cert.clone(), key.clone(), verifier.clone())?,
        make_server_config(cert, key, verifier)?,
    ))
}
