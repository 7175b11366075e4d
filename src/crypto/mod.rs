// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-packet wire crypto framing (§4.1 "Wire framer").
//!
//! Every outbound datagram begins with a fixed security header: a 20-byte
//! hash digest and a 16-byte random salt. For each packet: fill the salt
//! from a PRNG; derive 48 bytes of keying material by seeding a fresh
//! key-derivation PRNG with `(private_key, salt)` and extracting 16 bytes
//! IV, 16 bytes cipher key, 16 bytes MAC key; encrypt bytes after the
//! security header with a stream cipher keyed by `(cipher_key, IV)`;
//! compute a keyed hash over everything after the digest using the MAC key;
//! write the digest into the header. Inbound packets are validated by
//! recomputing the digest and comparing in constant time; on mismatch the
//! packet is silently dropped at `LogLevel::Security`.
//!
//! ring exposes no raw stream-cipher primitive, so the "stream cipher" here
//! is a counter-mode keystream built from repeated `ring::hmac` calls keyed
//! by the derived cipher key — it reuses the same primitive as the digest
//! rather than pulling in an unrelated crate (see DESIGN.md).

pub mod framer;
pub mod pool;

pub use framer::Framer;
pub use pool::{FramerPool, WorkerFramer};

use crate::error::{Error, Result};
use ring::hkdf;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

/// Length of the private key shared by the whole ring out-of-band.
pub const PRIVATE_KEY_LEN: usize = 32;
/// Length of the per-packet random salt.
pub const SALT_LEN: usize = 16;
/// Length of the packet digest.
pub const DIGEST_LEN: usize = 20;
/// Length of the security header (`digest || salt`).
pub const SECURITY_HEADER_LEN: usize = DIGEST_LEN + SALT_LEN;

struct KeyMaterial {
    iv: [u8; 16],
    cipher_key: [u8; 16],
    mac_key: [u8; 16],
}

struct ExpandLen(usize);
impl hkdf::KeyType for ExpandLen {
    fn len(&self) -> usize {
        self.0
    }
}

const HKDF_INFO: &[u8] = b"totem wire framing v1";

fn derive_keys(private_key: &[u8; PRIVATE_KEY_LEN], salt: &[u8; SALT_LEN]) -> KeyMaterial {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt);
    let prk = salt.extract(private_key);
    let okm = prk
        .expand(&[HKDF_INFO], ExpandLen(48))
        .expect("HKDF expand of 48 bytes never fails");
    let mut material = [0u8; 48];
    okm.fill(&mut material)
        .expect("HKDF fill of 48 bytes never fails");

    let mut iv = [0u8; 16];
    let mut cipher_key = [0u8; 16];
    let mut mac_key = [0u8; 16];
    iv.copy_from_slice(&material[0..16]);
    cipher_key.copy_from_slice(&material[16..32]);
    mac_key.copy_from_slice(&material[32..48]);
    KeyMaterial {
        iv,
        cipher_key,
        mac_key,
    }
}

/// Generate `len` bytes of keystream from `(cipher_key, iv)` via counter-mode
/// HMAC-SHA256 blocks, then XOR it into `data` in place.
fn apply_keystream(cipher_key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let key = hmac::Key::new(hmac::HMAC_SHA256, cipher_key);
    let mut counter: u64 = 0;
    let mut offset = 0;
    while offset < data.len() {
        let mut block_input = Vec::with_capacity(24);
        block_input.extend_from_slice(iv);
        block_input.extend_from_slice(&counter.to_le_bytes());
        let tag = hmac::sign(&key, &block_input);
        let block = tag.as_ref();
        let take = block.len().min(data.len() - offset);
        for i in 0..take {
            data[offset + i] ^= block[i];
        }
        offset += take;
        counter += 1;
    }
}

/// Keyed hash over `body` (everything after the digest field), truncated to
/// [`DIGEST_LEN`] bytes.
fn compute_digest(mac_key: &[u8; 16], body: &[u8]) -> [u8; DIGEST_LEN] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key);
    let tag = hmac::sign(&key, body);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&tag.as_ref()[0..DIGEST_LEN]);
    digest
}

/// Seal `plaintext` into a wire-ready packet: `digest[20] || salt[16] ||
/// ciphertext`.
fn seal(private_key: &[u8; PRIVATE_KEY_LEN], rng: &SystemRandom, plaintext: &[u8]) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .expect("system RNG failure is unrecoverable");

    let keys = derive_keys(private_key, &salt);

    let mut ciphertext = plaintext.to_vec();
    apply_keystream(&keys.cipher_key, &keys.iv, &mut ciphertext);

    let mut body = Vec::with_capacity(SALT_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&ciphertext);

    let digest = compute_digest(&keys.mac_key, &body);

    let mut packet = Vec::with_capacity(DIGEST_LEN + body.len());
    packet.extend_from_slice(&digest);
    packet.extend_from_slice(&body);
    packet
}

/// Open a wire packet: validate the digest in constant time, then decrypt.
/// Returns [`Error::Truncated`] if shorter than the security header, or
/// [`Error::AuthFailed`] on digest mismatch (packet silently dropped by the
/// caller at `LogLevel::Security`, per §7).
fn open(private_key: &[u8; PRIVATE_KEY_LEN], packet: &[u8]) -> Result<Vec<u8>> {
    if packet.len() < SECURITY_HEADER_LEN {
        return Err(Error::Truncated);
    }

    let digest = &packet[0..DIGEST_LEN];
    let body = &packet[DIGEST_LEN..];
    let salt: [u8; SALT_LEN] = body[0..SALT_LEN].try_into().unwrap();
    let keys = derive_keys(private_key, &salt);

    let expected = compute_digest(&keys.mac_key, body);
    if ring::constant_time::verify_slices_are_equal(digest, &expected).is_err() {
        return Err(Error::AuthFailed);
    }

    let mut plaintext = body[SALT_LEN..].to_vec();
    apply_keystream(&keys.cipher_key, &keys.iv, &mut plaintext);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; PRIVATE_KEY_LEN] {
        [7u8; PRIVATE_KEY_LEN]
    }

    #[test]
    fn seal_then_open_roundtrips() {
        let rng = SystemRandom::new();
        let plaintext = b"ORF token payload";
        let packet = seal(&key(), &rng, plaintext);
        let opened = open(&key(), &packet).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_packet_fails_auth() {
        let rng = SystemRandom::new();
        let mut packet = seal(&key(), &rng, b"hello ring");
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;
        assert!(matches!(open(&key(), &packet), Err(Error::AuthFailed)));
    }

    #[test]
    fn wrong_key_fails_auth() {
        let rng = SystemRandom::new();
        let packet = seal(&key(), &rng, b"hello ring");
        let wrong_key = [9u8; PRIVATE_KEY_LEN];
        assert!(matches!(open(&wrong_key, &packet), Err(Error::AuthFailed)));
    }

    #[test]
    fn truncated_packet_is_rejected() {
        assert!(matches!(open(&key(), &[0u8; 4]), Err(Error::Truncated)));
    }

    #[test]
    fn two_seals_of_same_plaintext_differ() {
        // Different random salts must produce different ciphertext/digest.
        let rng = SystemRandom::new();
        let a = seal(&key(), &rng, b"same plaintext");
        let b = seal(&key(), &rng, b"same plaintext");
        assert_ne!(a, b);
    }
}
