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

//! The libp2p identity key abstraction: a tagged union over
//! {Ed25519, Secp256k1, RSA}, each able to marshal its public half to the
//! libp2p `PublicKey` protobuf (`KeyCodec`), sign, and verify.
//!
//! This plays the role the spec calls `KeyCodec` + `IdentityKey`: the wire
//! codec is the `encode_protobuf`/`decode_protobuf` pair below, and the
//! polymorphic signing/verifying key is the `Keypair`/`PublicKey` pair,
//! mirroring how `libp2p-identity` splits `Keypair` (has a private half,
//! can sign) from `PublicKey` (verify only).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rsa::pkcs1v15::{SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::signature::{RandomizedSigner, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// The three key types libp2p identities can have. Values match the wire
/// protobuf enum exactly: Ed25519=0, RSA=1, Secp256k1=2.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyType {
    Ed25519 = 0,
    Rsa = 1,
    Secp256k1 = 2,
}

impl KeyType {
    fn from_wire(v: u64) -> Option<Self> {
        match v {
            0 => Some(KeyType::Ed25519),
            1 => Some(KeyType::Rsa),
            2 => Some(KeyType::Secp256k1),
            _ => None,
        }
    }

    fn to_wire(self) -> u64 {
        self as u64
    }
}

/// Failure modes for key construction, (de)serialization and decoding.
#[derive(Debug, err_derive::Error)]
pub enum IdentityError {
    /// The protobuf enum value did not match one of {0, 1, 2}.
    #[error(display = "unsupported key type tag {}", _0)]
    UnsupportedKeyType(u64),
    /// The protobuf framing itself was truncated or malformed.
    #[error(display = "malformed key protobuf: {}", _0)]
    MalformedProtobuf(&'static str),
    /// `data` decoded but was not well-formed for its claimed key type.
    #[error(display = "key bytes do not match the {:?} encoding", _0)]
    MalformedKey(KeyType),
    /// Signing failed (e.g. the underlying crypto provider rejected the key).
    #[error(display = "signing failed: {}", _0)]
    SigningFailed(&'static str),
}

/// The libp2p public key, in its wire (protobuf) shape once decoded into
/// typed key material. `marshal()` reproduces the per-variant `data` byte
/// form (raw-32 / compressed-33 / SPKI-DER); `encode_protobuf()` wraps that
/// in the `{type, data}` protobuf envelope.
#[derive(Clone)]
pub enum PublicKey {
    Ed25519([u8; 32]),
    Secp256k1(k256::ecdsa::VerifyingKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Ed25519(_) => KeyType::Ed25519,
            PublicKey::Secp256k1(_) => KeyType::Secp256k1,
            PublicKey::Rsa(_) => KeyType::Rsa,
        }
    }

    /// The per-variant `data` encoding: raw 32 bytes for Ed25519, a 33-byte
    /// compressed point for Secp256k1, DER SubjectPublicKeyInfo for RSA.
    pub fn marshal(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(raw) => raw.to_vec(),
            PublicKey::Secp256k1(vk) => vk.to_encoded_point(true).as_bytes().to_vec(),
            PublicKey::Rsa(pk) => {
                use rsa::pkcs8::EncodePublicKey;
                pk.to_public_key_der()
                    .expect("in-memory RSA key always re-encodes")
                    .as_bytes()
                    .to_vec()
            }
        }
    }

    /// Construct a typed public key from `(type, data)`, validating `data`
    /// against the variant's expected encoding.
    pub fn from_type_and_data(key_type: KeyType, data: &[u8]) -> Result<Self, IdentityError> {
        match key_type {
            KeyType::Ed25519 => {
                let raw: [u8; 32] = data
                    .try_into()
                    .map_err(|_| IdentityError::MalformedKey(KeyType::Ed25519))?;
                Ok(PublicKey::Ed25519(raw))
            }
            KeyType::Secp256k1 => {
                let vk = k256::ecdsa::VerifyingKey::from_sec1_bytes(data)
                    .map_err(|_| IdentityError::MalformedKey(KeyType::Secp256k1))?;
                Ok(PublicKey::Secp256k1(vk))
            }
            KeyType::Rsa => {
                use rsa::pkcs8::DecodePublicKey;
                let pk = RsaPublicKey::from_public_key_der(data)
                    .map_err(|_| IdentityError::MalformedKey(KeyType::Rsa))?;
                Ok(PublicKey::Rsa(pk))
            }
        }
    }

    /// Verify `signature` over `msg`. Any decoding or algorithm failure is
    /// folded into `false` — callers must never treat verification failure
    /// as a distinguishable success path.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(raw) => {
                let key = ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, raw);
                key.verify(msg, signature).is_ok()
            }
            PublicKey::Secp256k1(vk) => {
                use k256::ecdsa::signature::Verifier as _;
                match k256::ecdsa::Signature::from_der(signature) {
                    Ok(sig) => vk.verify(msg, &sig).is_ok(),
                    Err(_) => false,
                }
            }
            PublicKey::Rsa(pk) => {
                let verifying_key = RsaVerifyingKey::<Sha256>::new(pk.clone());
                match rsa::pkcs1v15::Signature::try_from(signature) {
                    Ok(sig) => verifying_key.verify(msg, &sig).is_ok(),
                    Err(_) => false,
                }
            }
        }
    }

    /// `KeyCodec` encode: `{type: varint tag 1, data: bytes tag 2}`.
    pub fn encode_protobuf(&self) -> Vec<u8> {
        let data = self.marshal();
        let mut out = BytesMut::with_capacity(data.len() + 8);
        write_varint_field(&mut out, 1, self.key_type().to_wire());
        write_bytes_field(&mut out, 2, &data);
        out.to_vec()
    }

    /// `KeyCodec` decode: fills in defaults (`type = Ed25519`, `data = []`)
    /// for absent fields, skips unknown field numbers by wire type, and
    /// fails on truncated length-delimited fields or unrecognized enum
    /// values.
    pub fn decode_protobuf(bytes: &[u8]) -> Result<Self, IdentityError> {
        let mut buf = Bytes::copy_from_slice(bytes);
        let mut key_type_wire: u64 = KeyType::Ed25519.to_wire();
        let mut data: Vec<u8> = Vec::new();

        while buf.has_remaining() {
            let tag = read_varint(&mut buf)?;
            let field_number = tag >> 3;
            let wire_type = tag & 0x7;
            match (field_number, wire_type) {
                (1, 0) => key_type_wire = read_varint(&mut buf)?,
                (2, 2) => data = read_length_delimited(&mut buf)?,
                (_, 0) => {
                    read_varint(&mut buf)?;
                }
                (_, 2) => {
                    read_length_delimited(&mut buf)?;
                }
                _ => return Err(IdentityError::MalformedProtobuf("unsupported wire type")),
            }
        }

        let key_type = KeyType::from_wire(key_type_wire)
            .ok_or(IdentityError::UnsupportedKeyType(key_type_wire))?;
        Self::from_type_and_data(key_type, &data)
    }
}

/// The full libp2p identity keypair: a `PublicKey` plus the private
/// material needed to sign. Never serialized as a whole; only the public
/// half and signatures ever cross the wire.
pub enum Keypair {
    Ed25519(ring::signature::Ed25519KeyPair),
    Secp256k1(k256::ecdsa::SigningKey),
    Rsa(RsaPrivateKey),
}

impl Keypair {
    pub fn key_type(&self) -> KeyType {
        match self {
            Keypair::Ed25519(_) => KeyType::Ed25519,
            Keypair::Secp256k1(_) => KeyType::Secp256k1,
            Keypair::Rsa(_) => KeyType::Rsa,
        }
    }

    /// Generate a fresh Ed25519 keypair. Convenience for tests and callers
    /// that do not already hold a persisted libp2p identity.
    pub fn generate_ed25519() -> Result<Self, IdentityError> {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = ring::signature::Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| IdentityError::SigningFailed("Ed25519 keygen failed"))?;
        let kp = ring::signature::Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| IdentityError::SigningFailed("Ed25519 keygen failed"))?;
        Ok(Keypair::Ed25519(kp))
    }

    /// Generate a fresh Secp256k1 keypair.
    pub fn generate_secp256k1() -> Self {
        let signing_key = k256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        Keypair::Secp256k1(signing_key)
    }

    /// Import an RSA keypair from a PKCS#8 DER private key.
    pub fn from_rsa_pkcs8_der(der: &[u8]) -> Result<Self, IdentityError> {
        use rsa::pkcs8::DecodePrivateKey;
        let key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|_| IdentityError::MalformedKey(KeyType::Rsa))?;
        Ok(Keypair::Rsa(key))
    }

    pub fn public(&self) -> PublicKey {
        match self {
            Keypair::Ed25519(kp) => {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(kp.public_key().as_ref());
                PublicKey::Ed25519(raw)
            }
            Keypair::Secp256k1(sk) => PublicKey::Secp256k1(*sk.verifying_key()),
            Keypair::Rsa(sk) => PublicKey::Rsa(sk.to_public_key()),
        }
    }

    /// Sign `msg`. Deterministic (EdDSA) for Ed25519; randomized for
    /// Secp256k1 ECDSA and RSA PKCS#1 v1.5, both acceptable per spec.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, IdentityError> {
        match self {
            Keypair::Ed25519(kp) => Ok(kp.sign(msg).as_ref().to_vec()),
            Keypair::Secp256k1(sk) => {
                use k256::ecdsa::signature::Signer as _;
                let sig: k256::ecdsa::Signature = sk.sign(msg);
                Ok(sig.to_der().as_bytes().to_vec())
            }
            Keypair::Rsa(sk) => {
                let signing_key = RsaSigningKey::<Sha256>::new(sk.clone());
                let sig = signing_key.sign_with_rng(&mut rand::thread_rng(), msg);
                use rsa::signature::SignatureEncoding;
                Ok(sig.to_vec())
            }
        }
    }
}

fn write_varint_field(out: &mut BytesMut, field_number: u32, value: u64) {
    write_varint(out, ((field_number as u64) << 3) | 0);
    write_varint(out, value);
}

fn write_bytes_field(out: &mut BytesMut, field_number: u32, value: &[u8]) {
    write_varint(out, ((field_number as u64) << 3) | 2);
    write_varint(out, value.len() as u64);
    out.put_slice(value);
}

fn write_varint(out: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(buf: &mut Bytes) -> Result<u64, IdentityError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        if !buf.has_remaining() {
            return Err(IdentityError::MalformedProtobuf("truncated varint"));
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(IdentityError::MalformedProtobuf("varint too long"));
        }
    }
}

fn read_length_delimited(buf: &mut Bytes) -> Result<Vec<u8>, IdentityError> {
    let len = read_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(IdentityError::MalformedProtobuf(
            "length-delimited field runs past buffer end",
        ));
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_round_trips_through_protobuf() {
        let kp = Keypair::generate_ed25519().unwrap();
        let pubkey = kp.public();
        let encoded = pubkey.encode_protobuf();
        let decoded = PublicKey::decode_protobuf(&encoded).unwrap();
        assert_eq!(decoded.marshal(), pubkey.marshal());
        assert_eq!(decoded.key_type(), KeyType::Ed25519);
    }

    #[test]
    fn secp256k1_round_trips_and_verifies() {
        let kp = Keypair::generate_secp256k1();
        let pubkey = kp.public();
        assert_eq!(pubkey.marshal().len(), 33);
        let sig = kp.sign(b"hello").unwrap();
        assert!(pubkey.verify(b"hello", &sig));
        assert!(!pubkey.verify(b"goodbye", &sig));
    }

    #[test]
    fn decode_rejects_unsupported_key_type() {
        // type = 7 (invalid), data = empty
        let mut out = BytesMut::new();
        write_varint_field(&mut out, 1, 7);
        let err = PublicKey::decode_protobuf(&out).unwrap_err();
        assert!(matches!(err, IdentityError::UnsupportedKeyType(7)));
    }

    #[test]
    fn decode_rejects_truncated_length_delimited_field() {
        let mut out = BytesMut::new();
        write_varint(&mut out, (2u64 << 3) | 2);
        write_varint(&mut out, 10); // claims 10 bytes of data, but buffer ends here
        let err = PublicKey::decode_protobuf(&out).unwrap_err();
        assert!(matches!(err, IdentityError::MalformedProtobuf(_)));
    }

    #[test]
    fn decode_skips_unknown_fields() {
        let mut out = BytesMut::new();
        write_varint_field(&mut out, 99, 42); // unknown varint field
        write_varint_field(&mut out, 1, 0); // type = Ed25519
        write_bytes_field(&mut out, 2, &[0u8; 32]);
        let decoded = PublicKey::decode_protobuf(&out).unwrap();
        assert_eq!(decoded.key_type(), KeyType::Ed25519);
    }

    #[test]
    fn ed25519_rejects_wrong_length() {
        let err = PublicKey::from_type_and_data(KeyType::Ed25519, &[0u8; 31]).unwrap_err();
        assert!(matches!(err, IdentityError::MalformedKey(KeyType::Ed25519)));
    }
}
