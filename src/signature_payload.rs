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

//! `SignaturePayload`: the exact bytes the libp2p identity key signs over —
//! the fixed ASCII prefix followed by the certificate's SubjectPublicKeyInfo,
//! re-serialized to canonical DER.

use crate::LIBP2P_SIGNING_PREFIX;

/// Failure re-encoding a SubjectPublicKeyInfo.
#[derive(Debug, err_derive::Error)]
#[error(display = "invalid SubjectPublicKeyInfo: {}", _0)]
pub struct InvalidSpki(&'static str);

/// A parsed `SubjectPublicKeyInfo`: an algorithm identifier (OID plus
/// optional parameters) and the subject public key bit string. Modeled
/// explicitly, rather than re-using whatever shape an X.509 parser happens
/// to expose, so re-serialization is always canonical DER regardless of how
/// the original bytes were encoded (e.g. indefinite-length BER quirks).
struct SubjectPublicKeyInfo {
    algorithm_der: Vec<u8>,
    subject_public_key: Vec<u8>,
}

fn parse_spki(der: &[u8]) -> Result<SubjectPublicKeyInfo, InvalidSpki> {
    yasna::parse_der(der, |reader| {
        reader.read_sequence(|reader| {
            let algorithm_der = reader.next().read_der()?;
            let subject_public_key = reader.next().read_bitvec_bytes()?.0;
            Ok(SubjectPublicKeyInfo {
                algorithm_der,
                subject_public_key,
            })
        })
    })
    .map_err(|_| InvalidSpki("malformed SubjectPublicKeyInfo DER"))
}

fn reencode_spki(spki: &SubjectPublicKeyInfo) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_der(&spki.algorithm_der);
            writer
                .next()
                .write_bitvec_bytes(&spki.subject_public_key, spki.subject_public_key.len() * 8);
        })
    })
}

/// The raw `subjectPublicKey` BIT STRING content of `spki_der` — for EC and
/// Ed25519 keys this is exactly the bytes `ring` wants for signature
/// verification (an uncompressed point, or a raw Ed25519 key).
pub(crate) fn spki_subject_public_key(spki_der: &[u8]) -> Result<Vec<u8>, InvalidSpki> {
    parse_spki(spki_der).map(|spki| spki.subject_public_key)
}

/// Parse `spki_der` as a `SubjectPublicKeyInfo`, re-serialize it to
/// canonical DER (tolerating non-canonical input), and prepend the fixed
/// `libp2p-tls-handshake:` prefix. This is the exact byte sequence both
/// sides sign/verify.
pub fn encode_signature_payload(spki_der: &[u8]) -> Result<Vec<u8>, InvalidSpki> {
    let spki = parse_spki(spki_der)?;
    let canonical = reencode_spki(&spki);
    let mut out = Vec::with_capacity(LIBP2P_SIGNING_PREFIX.len() + canonical.len());
    out.extend_from_slice(&LIBP2P_SIGNING_PREFIX);
    out.extend_from_slice(&canonical);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ecdsa_p256_spki() -> Vec<u8> {
        // A syntactically valid (if not a real curve point) SPKI shape is
        // enough to exercise re-serialization: SEQUENCE(AlgorithmIdentifier, BIT STRING).
        yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                let alg = yasna::construct_der(|w| {
                    w.write_sequence(|w| {
                        w.next().write_oid(&yasna::models::ObjectIdentifier::from_slice(&[
                            1, 2, 840, 10045, 2, 1,
                        ]));
                        w.next().write_oid(&yasna::models::ObjectIdentifier::from_slice(&[
                            1, 2, 840, 10045, 3, 1, 7,
                        ]));
                    })
                });
                writer.next().write_der(&alg);
                writer.next().write_bitvec_bytes(&[0x04; 65], 65 * 8);
            })
        })
    }

    #[test]
    fn deterministic_for_equal_input() {
        let spki = sample_ecdsa_p256_spki();
        let a = encode_signature_payload(&spki).unwrap();
        let b = encode_signature_payload(&spki).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn prefix_is_exact() {
        let spki = sample_ecdsa_p256_spki();
        let payload = encode_signature_payload(&spki).unwrap();
        assert_eq!(&payload[..21], b"libp2p-tls-handshake:");
    }

    #[test]
    fn rejects_garbage() {
        assert!(encode_signature_payload(b"not a der spki at all").is_err());
    }
}
