//! Three-message identity handshake over the raw transport (spec §4.5,
//! §6.1 `HANDSHAKE_HELLO`/`HANDSHAKE_RESPONSE`/`HANDSHAKE_FINISH`).
//!
//! Ed25519 signs, X25519 agrees. Signatures self-authenticate the
//! ephemeral keys, so these three packets are exempt from the AEAD
//! layer that wraps everything after them.

use crate::crypto::auth::AuthPolicy;
use crate::crypto::kdf::derive_directional_keys;
use crate::errors::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};

pub const HELLO_LEN: usize = 32 + 32 + 24 + 64;
pub const RESPONSE_LEN: usize = 32 + 32 + 64;
pub const FINISH_LEN: usize = 64;

pub struct SessionKeys {
    pub c2s: [u8; 32],
    pub s2c: [u8; 32],
}

/// Wire-encoded `HANDSHAKE_HELLO` payload, parsed field-by-field.
struct Hello {
    identity_pub: VerifyingKey,
    ephemeral_pub: X25519Public,
    nonce: [u8; 24],
    signature: Signature,
}

fn parse_hello(buf: &[u8]) -> Result<Hello, CryptoError> {
    if buf.len() != HELLO_LEN {
        return Err(CryptoError::BadSignature);
    }
    let identity_pub = VerifyingKey::from_bytes(buf[0..32].try_into().unwrap())
        .map_err(|_| CryptoError::BadSignature)?;
    let ephemeral_pub = X25519Public::from(<[u8; 32]>::try_from(&buf[32..64]).unwrap());
    let mut nonce = [0u8; 24];
    nonce.copy_from_slice(&buf[64..88]);
    let signature = Signature::from_bytes(buf[88..152].try_into().unwrap());
    Ok(Hello { identity_pub, ephemeral_pub, nonce, signature })
}

fn signed_message_hello(ephemeral_pub: &X25519Public, nonce: &[u8; 24]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(32 + 24);
    msg.extend_from_slice(ephemeral_pub.as_bytes());
    msg.extend_from_slice(nonce);
    msg
}

fn signed_message_response(client_nonce: &[u8; 24], server_ephemeral_pub: &X25519Public) -> Vec<u8> {
    let mut msg = Vec::with_capacity(24 + 32);
    msg.extend_from_slice(client_nonce);
    msg.extend_from_slice(server_ephemeral_pub.as_bytes());
    msg
}

/// Server-side handshake driver: receives `HELLO`, emits `RESPONSE`,
/// receives `FINISH`.
pub struct ServerHandshake {
    identity: SigningKey,
}

impl ServerHandshake {
    pub fn new(identity: SigningKey) -> Self {
        Self { identity }
    }

    /// Process a received `HELLO`, check it against `policy`, and
    /// produce the `RESPONSE` bytes to send back plus the session keys.
    /// The caller still has to receive and verify `FINISH` before
    /// accepting any streaming packet.
    pub fn respond(
        &self,
        hello_bytes: &[u8],
        policy: &AuthPolicy,
    ) -> Result<(Vec<u8>, SessionKeys, VerifyingKey), CryptoError> {
        let hello = parse_hello(hello_bytes)?;
        let signed = signed_message_hello(&hello.ephemeral_pub, &hello.nonce);
        hello
            .identity_pub
            .verify(&signed, &hello.signature)
            .map_err(|_| CryptoError::BadSignature)?;
        policy.check_client(&hello.identity_pub)?;

        let server_ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let server_ephemeral_pub = X25519Public::from(&server_ephemeral);
        let shared = server_ephemeral.diffie_hellman(&hello.ephemeral_pub);
        let (c2s, s2c) = derive_directional_keys(shared.as_bytes());

        let response_signed = signed_message_response(&hello.nonce, &server_ephemeral_pub);
        let signature = self.identity.sign(&response_signed);

        let mut out = Vec::with_capacity(RESPONSE_LEN);
        out.extend_from_slice(self.identity.verifying_key().as_bytes());
        out.extend_from_slice(server_ephemeral_pub.as_bytes());
        out.extend_from_slice(&signature.to_bytes());

        Ok((out, SessionKeys { c2s, s2c }, hello.identity_pub))
    }

    /// Verify the client's `FINISH` signature over an empty message,
    /// confirming mutual authentication.
    pub fn verify_finish(&self, finish_bytes: &[u8], client_identity: &VerifyingKey) -> Result<(), CryptoError> {
        if finish_bytes.len() != FINISH_LEN {
            return Err(CryptoError::BadSignature);
        }
        let signature = Signature::from_bytes(finish_bytes.try_into().unwrap());
        client_identity
            .verify(&[], &signature)
            .map_err(|_| CryptoError::BadSignature)
    }
}

/// Client-side handshake driver: emits `HELLO`, receives `RESPONSE`,
/// emits `FINISH`.
pub struct ClientHandshake {
    identity: SigningKey,
    ephemeral: Option<EphemeralSecret>,
    nonce: [u8; 24],
    pinned_server_key: Option<VerifyingKey>,
}

impl ClientHandshake {
    pub fn new(identity: SigningKey, pinned_server_key: Option<VerifyingKey>) -> Self {
        let mut nonce = [0u8; 24];
        rand::RngCore::fill_bytes(&mut OsRng, &mut nonce);
        Self { identity, ephemeral: None, nonce, pinned_server_key }
    }

    pub fn hello(&mut self) -> Vec<u8> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pub = X25519Public::from(&ephemeral);
        let signed = signed_message_hello(&ephemeral_pub, &self.nonce);
        let signature = self.identity.sign(&signed);

        let mut out = Vec::with_capacity(HELLO_LEN);
        out.extend_from_slice(self.identity.verifying_key().as_bytes());
        out.extend_from_slice(ephemeral_pub.as_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&signature.to_bytes());

        self.ephemeral = Some(ephemeral);
        out
    }

    /// Verify the server's `RESPONSE`, derive session keys, and produce
    /// the `FINISH` bytes to send.
    pub fn finish(&mut self, response_bytes: &[u8]) -> Result<(Vec<u8>, SessionKeys), CryptoError> {
        if response_bytes.len() != RESPONSE_LEN {
            return Err(CryptoError::BadSignature);
        }
        let server_identity = VerifyingKey::from_bytes(response_bytes[0..32].try_into().unwrap())
            .map_err(|_| CryptoError::BadSignature)?;
        if let Some(pinned) = &self.pinned_server_key {
            if pinned.as_bytes() != server_identity.as_bytes() {
                return Err(CryptoError::ServerIdentityMismatch);
            }
        }
        let server_ephemeral_pub = X25519Public::from(<[u8; 32]>::try_from(&response_bytes[32..64]).unwrap());
        let signature = Signature::from_bytes(response_bytes[64..128].try_into().unwrap());
        let signed = signed_message_response(&self.nonce, &server_ephemeral_pub);
        server_identity
            .verify(&signed, &signature)
            .map_err(|_| CryptoError::BadSignature)?;

        let ephemeral = self.ephemeral.take().expect("hello() must run before finish()");
        let shared = ephemeral.diffie_hellman(&server_ephemeral_pub);
        let (c2s, s2c) = derive_directional_keys(shared.as_bytes());

        let finish_sig = self.identity.sign(&[]);
        Ok((finish_sig.to_bytes().to_vec(), SessionKeys { c2s, s2c }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::auth::AuthPolicy;

    #[test]
    fn full_handshake_derives_matching_keys() {
        let server_identity = SigningKey::generate(&mut OsRng);
        let client_identity = SigningKey::generate(&mut OsRng);

        let server = ServerHandshake::new(server_identity);
        let mut client = ClientHandshake::new(client_identity, None);

        let hello = client.hello();
        let policy = AuthPolicy::AllowAny;
        let (response, server_keys, _client_id) = server.respond(&hello, &policy).unwrap();
        let (_finish, client_keys) = client.finish(&response).unwrap();

        assert_eq!(server_keys.c2s, client_keys.c2s);
        assert_eq!(server_keys.s2c, client_keys.s2c);
    }

    #[test]
    fn tampered_hello_signature_rejected() {
        let server_identity = SigningKey::generate(&mut OsRng);
        let client_identity = SigningKey::generate(&mut OsRng);
        let server = ServerHandshake::new(server_identity);
        let mut client = ClientHandshake::new(client_identity, None);

        let mut hello = client.hello();
        let last = hello.len() - 1;
        hello[last] ^= 0xff;
        let policy = AuthPolicy::AllowAny;
        assert!(server.respond(&hello, &policy).is_err());
    }

    #[test]
    fn pinned_server_key_mismatch_rejected() {
        let server_identity = SigningKey::generate(&mut OsRng);
        let client_identity = SigningKey::generate(&mut OsRng);
        let wrong_pin = SigningKey::generate(&mut OsRng).verifying_key();

        let server = ServerHandshake::new(server_identity);
        let mut client = ClientHandshake::new(client_identity, Some(wrong_pin));

        let hello = client.hello();
        let policy = AuthPolicy::AllowAny;
        let (response, _, _) = server.respond(&hello, &policy).unwrap();
        assert!(matches!(
            client.finish(&response),
            Err(CryptoError::ServerIdentityMismatch)
        ));
    }
}
