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

//! `PeerIdDerivation`: computing the canonical libp2p `PeerId` from a
//! public key, and comparing peer identities.

use crate::identity::PublicKey;
use sha2::{Digest, Sha256};

/// Multihash code for the `identity` hash function (no hashing, bytes are
/// embedded verbatim).
const MULTIHASH_IDENTITY: u64 = 0x00;
/// Multihash code for SHA-256.
const MULTIHASH_SHA256: u64 = 0x12;

/// Below this many marshaled protobuf bytes, libp2p embeds the public key
/// in the PeerId verbatim (identity multihash) instead of hashing it. This
/// threshold is part of the wire protocol, not a tunable.
const IDENTITY_HASH_MAX_LEN: usize = 42;

/// A libp2p peer identity: the multihash of that peer's marshaled public
/// key protobuf. Two `PeerId`s are equal iff their multihash bytes match.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId {
    multihash: Vec<u8>,
}

impl PeerId {
    /// Derive the `PeerId` for `public_key`, choosing the identity or
    /// SHA-256 multihash branch per the marshaled protobuf length.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let protobuf = public_key.encode_protobuf();
        let multihash = if protobuf.len() <= IDENTITY_HASH_MAX_LEN {
            encode_multihash(MULTIHASH_IDENTITY, &protobuf)
        } else {
            let digest = Sha256::digest(&protobuf);
            encode_multihash(MULTIHASH_SHA256, &digest)
        };
        PeerId { multihash }
    }

    /// The raw multihash bytes backing this identity.
    pub fn as_bytes(&self) -> &[u8] {
        &self.multihash
    }

    /// Parse a `PeerId` back out of its raw multihash bytes, without
    /// validating that the digest actually matches some public key (callers
    /// that need that guarantee should derive the `PeerId` themselves via
    /// [`PeerId::from_public_key`] and compare).
    pub fn from_bytes(multihash: Vec<u8>) -> Self {
        PeerId { multihash }
    }

    /// The standard libp2p textual form: base58btc of the multihash bytes.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.multihash).into_string()
    }

    /// Parse the standard libp2p textual form.
    pub fn from_base58(s: &str) -> Result<Self, bs58::decode::Error> {
        bs58::decode(s).into_vec().map(PeerId::from_bytes)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

fn encode_multihash(code: u64, digest: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(digest.len() + 4);
    write_uvarint(&mut out, code);
    write_uvarint(&mut out, digest.len() as u64);
    out.extend_from_slice(digest);
    out
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}
