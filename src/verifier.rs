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

//! `CertificateVerifier`: parse a peer's certificate, check its validity
//! window and self-signature, extract and verify the libp2p extension,
//! derive the remote `PeerId`, and match it against an expected identity.
//!
//! Wired into `rustls` as [`Libp2pCertificateVerifier`], which implements
//! both `ServerCertVerifier` and `ClientCertVerifier` by delegating to the
//! same [`verify_peer_certificate`] core — mirroring how the teacher's own
//! `misc/x509` crate has a single `Libp2pCertificateVerifier` implement
//! both traits against one `verify_presented_certs` function.

use crate::identity::{IdentityError, PublicKey};
use crate::peer_id::PeerId;
use crate::signature_payload::{encode_signature_payload, InvalidSpki};
use crate::LIBP2P_OID_BYTES;
use log::{debug, warn};
use std::sync::Arc;
use std::time::SystemTime;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::time::ASN1Time;

/// Failures verifying a peer certificate. Every variant here is fatal to
/// the handshake; none are retried inside this crate.
#[derive(Debug, err_derive::Error)]
pub enum VerificationError {
    #[error(display = "invalid certificate: {}", _0)]
    InvalidCertificate(&'static str),
    #[error(display = "certificate is not yet valid")]
    CertificateNotYetValid,
    #[error(display = "certificate has expired")]
    CertificateExpired,
    #[error(display = "certificate's self-signature does not verify")]
    InvalidSelfSignature,
    #[error(display = "certificate subject does not match its issuer (not self-signed)")]
    NotSelfSigned,
    #[error(display = "certificate is missing the libp2p extension")]
    MissingLibp2pExtension,
    #[error(display = "the libp2p extension value is malformed")]
    MalformedLibp2pExtension,
    #[error(display = "the libp2p public key is malformed or unsupported: {}", _0)]
    Key(#[error(source)] IdentityError),
    #[error(display = "the libp2p cross-signature does not verify")]
    InvalidCrossSignature,
    #[error(
        display = "derived PeerId {} does not match the expected peer {}",
        derived,
        expected
    )]
    UnexpectedPeer { derived: PeerId, expected: PeerId },
}

/// Verify `raw_cert` as a libp2p TLS certificate and return the remote
/// `PeerId` it asserts. If `expected_peer_id` is supplied, the derived
/// `PeerId` must match it exactly.
pub fn verify_peer_certificate(
    raw_cert: &[u8],
    expected_peer_id: Option<&PeerId>,
) -> Result<PeerId, VerificationError> {
    match verify_peer_certificate_inner(raw_cert, expected_peer_id) {
        Ok(peer_id) => {
            debug!("verified libp2p TLS certificate for peer {}", peer_id);
            Ok(peer_id)
        }
        Err(err) => {
            warn!("rejected peer certificate: {}", err);
            Err(err)
        }
    }
}

fn verify_peer_certificate_inner(
    raw_cert: &[u8],
    expected_peer_id: Option<&PeerId>,
) -> Result<PeerId, VerificationError> {
    let (_, cert) = X509Certificate::from_der(raw_cert)
        .map_err(|_| VerificationError::InvalidCertificate("malformed X.509 DER"))?;

    let now = ASN1Time::from(OffsetDateTime::now_utc());
    if cert.validity().not_before > now {
        return Err(VerificationError::CertificateNotYetValid);
    }
    if cert.validity().not_after < now {
        return Err(VerificationError::CertificateExpired);
    }

    cert.verify_signature(None)
        .map_err(|_| VerificationError::InvalidSelfSignature)?;

    if cert.subject() != cert.issuer() {
        return Err(VerificationError::NotSelfSigned);
    }

    let extension_value = find_libp2p_extension(&cert)?;
    let (public_key_proto, signature) = parse_libp2p_extension(extension_value)?;

    let public_key =
        PublicKey::decode_protobuf(&public_key_proto).map_err(VerificationError::Key)?;

    let spki_der = extract_spki_der(raw_cert)?;
    let payload = encode_signature_payload(&spki_der).map_err(|_: InvalidSpki| {
        VerificationError::InvalidCertificate("malformed SubjectPublicKeyInfo")
    })?;

    if !public_key.verify(&payload, &signature) {
        return Err(VerificationError::InvalidCrossSignature);
    }

    let derived = PeerId::from_public_key(&public_key);
    if let Some(expected) = expected_peer_id {
        if expected != &derived {
            return Err(VerificationError::UnexpectedPeer {
                derived,
                expected: expected.clone(),
            });
        }
    }

    Ok(derived)
}

fn find_libp2p_extension<'a>(
    cert: &'a X509Certificate<'a>,
) -> Result<&'a [u8], VerificationError> {
    cert.extensions()
        .iter()
        .find(|ext| ext.oid.as_bytes() == LIBP2P_OID_BYTES)
        .map(|ext| ext.value)
        .ok_or(VerificationError::MissingLibp2pExtension)
}

fn parse_libp2p_extension(value: &[u8]) -> Result<(Vec<u8>, Vec<u8>), VerificationError> {
    yasna::parse_der(value, |reader| {
        reader.read_sequence(|reader| {
            let public_key = reader.next().read_bytes()?;
            let signature = reader.next().read_bytes()?;
            Ok((public_key, signature))
        })
    })
    .map_err(|_| VerificationError::MalformedLibp2pExtension)
}

/// Walk the certificate's ASN.1 shape down to the exact `subjectPublicKeyInfo`
/// bytes, without trusting any higher-level parser's notion of "the public
/// key" — we need the untouched original DER so re-serializing it for the
/// signature payload is a pure canonicalization, never a reinterpretation.
///
/// Assumes a v3 certificate (the version field is present), which every
/// libp2p TLS certificate is by construction.
fn extract_spki_der(raw_cert: &[u8]) -> Result<Vec<u8>, VerificationError> {
    let bad = || VerificationError::InvalidCertificate("malformed certificate DER");

    let tbs_der = yasna::parse_der(raw_cert, |reader| {
        reader.read_sequence(|reader| {
            let tbs = reader.next().read_der()?;
            reader.next().read_der()?; // signatureAlgorithm
            reader.next().read_der()?; // signatureValue
            Ok(tbs)
        })
    })
    .map_err(|_| bad())?;

    yasna::parse_der(&tbs_der, |reader| {
        reader.read_sequence(|reader| {
            reader.next().read_der()?; // version [0]
            reader.next().read_der()?; // serialNumber
            reader.next().read_der()?; // signature AlgorithmIdentifier
            reader.next().read_der()?; // issuer
            reader.next().read_der()?; // validity
            reader.next().read_der()?; // subject
            reader.next().read_der() // subjectPublicKeyInfo
        })
    })
    .map_err(|_| bad())
}

/// `rustls` certificate verifier wiring: implements both `ServerCertVerifier`
/// and `ClientCertVerifier` against [`verify_peer_certificate`].
pub struct Libp2pCertificateVerifier {
    expected_peer_id: Option<PeerId>,
}

impl Libp2pCertificateVerifier {
    pub fn new(expected_peer_id: Option<PeerId>) -> Self {
        Libp2pCertificateVerifier { expected_peer_id }
    }

    fn verify_chain(
        &self,
        end_entity: &rustls::Certificate,
        intermediates: &[rustls::Certificate],
    ) -> Result<PeerId, rustls::Error> {
        if !intermediates.is_empty() {
            return Err(rustls::Error::General(
                "libp2p-tls requires exactly one certificate".into(),
            ));
        }
        verify_peer_certificate(end_entity.as_ref(), self.expected_peer_id.as_ref())
            .map_err(to_rustls_error)
    }
}

fn to_rustls_error(e: VerificationError) -> rustls::Error {
    use rustls::CertificateError as CE;
    match e {
        VerificationError::InvalidSelfSignature | VerificationError::InvalidCrossSignature => {
            rustls::Error::InvalidCertificate(CE::BadSignature)
        }
        VerificationError::CertificateNotYetValid => {
            rustls::Error::InvalidCertificate(CE::NotValidYet)
        }
        VerificationError::CertificateExpired => rustls::Error::InvalidCertificate(CE::Expired),
        other => rustls::Error::General(other.to_string()),
    }
}

/// Schemes this verifier accepts on the TLS 1.3 `CertificateVerify`
/// message, in priority order. The spec pins the certificate's own key to
/// ECDSA P-256, but a libp2p TLS certificate is not required to use the
/// same algorithm as its signer's identity key, so we verify whatever the
/// leaf certificate's own SPKI actually is.
fn supported_schemes() -> Vec<rustls::SignatureScheme> {
    vec![
        rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
        rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
        rustls::SignatureScheme::ED25519,
    ]
}

/// Verify the TLS 1.3 `CertificateVerify` signature itself — proof that the
/// peer holds the private key matching the certificate's own SPKI. This is
/// unrelated to the libp2p cross-signature checked in
/// [`verify_peer_certificate`]; both must pass.
fn verify_handshake_signature(
    cert: &rustls::Certificate,
    scheme: rustls::SignatureScheme,
    message: &[u8],
    signature: &[u8],
) -> Result<rustls::client::HandshakeSignatureValid, rustls::Error> {
    let bad_sig = || rustls::Error::InvalidCertificate(rustls::CertificateError::BadSignature);

    let spki_der = extract_spki_der(cert.as_ref()).map_err(to_rustls_error)?;
    let key_bytes = crate::signature_payload::spki_subject_public_key(&spki_der)
        .map_err(|_| rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding))?;

    let alg: &dyn ring::signature::VerificationAlgorithm = match scheme {
        rustls::SignatureScheme::ECDSA_NISTP256_SHA256 => &ring::signature::ECDSA_P256_SHA256_ASN1,
        rustls::SignatureScheme::ECDSA_NISTP384_SHA384 => &ring::signature::ECDSA_P384_SHA384_ASN1,
        rustls::SignatureScheme::ED25519 => &ring::signature::ED25519,
        _ => return Err(rustls::Error::General("unsupported signature scheme".into())),
    };

    ring::signature::UnparsedPublicKey::new(alg, &key_bytes)
        .verify(message, signature)
        .map_err(|_| bad_sig())?;
    Ok(rustls::client::HandshakeSignatureValid::assertion())
}

impl rustls::client::ServerCertVerifier for Libp2pCertificateVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::Certificate,
        intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        self.verify_chain(end_entity, intermediates)?;
        Ok(rustls::client::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::Certificate,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::HandshakeSignatureValid, rustls::Error> {
        unreachable!("this verifier only ever negotiates TLS 1.3")
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::Certificate,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::HandshakeSignatureValid, rustls::Error> {
        verify_handshake_signature(cert, dss.scheme, message, dss.signature())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        supported_schemes()
    }

    fn request_scts(&self) -> bool {
        false
    }
}

impl rustls::server::ClientCertVerifier for Libp2pCertificateVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_root_subjects(&self) -> &[rustls::DistinguishedName] {
        &[][..]
    }

    fn verify_client_cert(
        &self,
        end_entity: &rustls::Certificate,
        intermediates: &[rustls::Certificate],
        _now: SystemTime,
    ) -> Result<rustls::server::ClientCertVerified, rustls::Error> {
        self.verify_chain(end_entity, intermediates)?;
        Ok(rustls::server::ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::Certificate,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::HandshakeSignatureValid, rustls::Error> {
        unreachable!("this verifier only ever negotiates TLS 1.3")
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::Certificate,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::HandshakeSignatureValid, rustls::Error> {
        verify_handshake_signature(cert, dss.scheme, message, dss.signature())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::generate_certificate;
    use crate::identity::Keypair;
    use crate::pem;

    fn fresh_cert() -> (Vec<u8>, PeerId) {
        let keypair = Keypair::generate_ed25519().unwrap();
        let peer_id = PeerId::from_public_key(&keypair.public());
        let (cert_pem, _key_pem) = generate_certificate(&keypair).unwrap();
        (pem::decode(&cert_pem).unwrap(), peer_id)
    }

    #[test]
    fn accepts_a_freshly_generated_certificate() {
        let (cert_der, peer_id) = fresh_cert();
        let derived = verify_peer_certificate(&cert_der, Some(&peer_id)).unwrap();
        assert_eq!(derived, peer_id);
    }

    #[test]
    fn rejects_wrong_expected_peer() {
        let (cert_der, _peer_id) = fresh_cert();
        let other = Keypair::generate_ed25519().unwrap();
        let other_peer_id = PeerId::from_public_key(&other.public());
        let err = verify_peer_certificate(&cert_der, Some(&other_peer_id)).unwrap_err();
        assert!(matches!(err, VerificationError::UnexpectedPeer { .. }));
    }

    #[test]
    fn rejects_tampered_extension_signature() {
        let (mut cert_der, peer_id) = fresh_cert();
        *cert_der.last_mut().unwrap() ^= 0x01;
        let err = verify_peer_certificate(&cert_der, Some(&peer_id)).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::InvalidCrossSignature
                | VerificationError::InvalidCertificate(_)
                | VerificationError::InvalidSelfSignature
        ));
    }

    #[test]
    fn rejects_truncated_certificate() {
        let (cert_der, _peer_id) = fresh_cert();
        let truncated = &cert_der[..cert_der.len() / 2];
        let err = verify_peer_certificate(truncated, None).unwrap_err();
        assert!(matches!(err, VerificationError::InvalidCertificate(_)));
    }
}
