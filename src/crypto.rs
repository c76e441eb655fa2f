use anyhow::{anyhow, bail};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

/// X25519 key size, both for the recipient's long-lived keypair and the
///  ephemeral key embedded in each sealed box.
pub const SEAL_KEY_BYTES: usize = 32;

/// Ciphertext overhead of a sealed box: the ephemeral X25519 public key
///  prepended to the ciphertext, plus the Poly1305 authentication tag.
pub const SEAL_OVERHEAD: usize = SEAL_KEY_BYTES + 16;

pub const SIGN_PUBLIC_KEY_BYTES: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;

/// Sign private keys use the seed-then-public-key layout, so a keypair can be
///  reconstructed (and cross-checked) from the private key alone.
pub const SIGN_PRIVATE_KEY_BYTES: usize = ed25519_dalek::KEYPAIR_LENGTH;

pub const SIGNATURE_BYTES: usize = ed25519_dalek::SIGNATURE_LENGTH;

pub const MAC_KEY_BYTES: usize = 32;
pub const MAC_BYTES: usize = 32;

/// The cryptographic operations the wire protocol is built on, as an abstract
///  seam: protocol code never names a primitive library, it calls through this
///  trait, and any conforming implementation can supply the operations.
///
/// A conforming implementation produces [SIGNATURE_BYTES] signatures and
///  [MAC_BYTES] MACs - those two lengths are part of the wire contract. The
///  sealed-box overhead is implementation-defined and only ever obtained from
///  [WireCrypto::seal_overhead].
pub trait WireCrypto: Send + Sync {
    /// number of bytes a sealed box adds on top of its plaintext
    fn seal_overhead(&self) -> usize;

    /// length of a detached signature
    fn signature_bytes(&self) -> usize;

    /// length of a keyed MAC
    fn mac_bytes(&self) -> usize;

    /// Encrypt `plaintext` so that only the holder of the private key matching
    ///  `public_key` can read it. The sender stays anonymous: no sender key is
    ///  involved, anyone can produce a valid sealed box.
    fn seal(&self, plaintext: &[u8], public_key: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Inverse of [WireCrypto::seal]. Fails on any truncation or tampering.
    fn unseal(&self, ciphertext: &[u8], public_key: &[u8], private_key: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Produce a detached signature over `data`.
    fn sign(&self, data: &[u8], private_key: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Verify a detached signature. Malformed keys or signatures verify as
    ///  `false`, never as an error.
    fn verify(&self, data: &[u8], public_key: &[u8], signature: &[u8]) -> bool;

    /// Produce a keyed MAC over `data`.
    fn mac(&self, data: &[u8], key: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Verify a keyed MAC in constant time. Malformed input verifies as `false`.
    fn mac_verify(&self, data: &[u8], mac: &[u8], key: &[u8]) -> bool;
}

type HmacSha256 = Hmac<Sha256>;

/// [WireCrypto] implementation on the NaCl primitive family: X25519 +
///  XSalsa20-Poly1305 sealed boxes, Ed25519 detached signatures, HMAC-SHA-256
///  keyed MACs.
pub struct NaclCrypto;

impl WireCrypto for NaclCrypto {
    fn seal_overhead(&self) -> usize {
        SEAL_OVERHEAD
    }

    fn signature_bytes(&self) -> usize {
        SIGNATURE_BYTES
    }

    fn mac_bytes(&self) -> usize {
        MAC_BYTES
    }

    fn seal(&self, plaintext: &[u8], public_key: &[u8]) -> anyhow::Result<Vec<u8>> {
        let public_key: [u8; SEAL_KEY_BYTES] = public_key.try_into()
            .map_err(|_| anyhow!("expected {} byte seal public key, got {} bytes", SEAL_KEY_BYTES, public_key.len()))?;
        let public_key = crypto_box::PublicKey::from(public_key);

        public_key.seal(&mut OsRng, plaintext)
            .map_err(|_| anyhow!("sealed box encryption failed"))
    }

    fn unseal(&self, ciphertext: &[u8], public_key: &[u8], private_key: &[u8]) -> anyhow::Result<Vec<u8>> {
        if public_key.len() != SEAL_KEY_BYTES {
            bail!("expected {} byte seal public key, got {} bytes", SEAL_KEY_BYTES, public_key.len());
        }
        let private_key: [u8; SEAL_KEY_BYTES] = private_key.try_into()
            .map_err(|_| anyhow!("expected {} byte seal private key, got {} bytes", SEAL_KEY_BYTES, private_key.len()))?;
        let private_key = crypto_box::SecretKey::from(private_key);

        if ciphertext.len() <= SEAL_OVERHEAD {
            bail!("{} byte ciphertext has no data after the sealed box header", ciphertext.len());
        }

        private_key.unseal(ciphertext)
            .map_err(|_| anyhow!("failed to open sealed box"))
    }

    fn sign(&self, data: &[u8], private_key: &[u8]) -> anyhow::Result<Vec<u8>> {
        let keypair_bytes: [u8; SIGN_PRIVATE_KEY_BYTES] = private_key.try_into()
            .map_err(|_| anyhow!("expected {} byte sign private key, got {} bytes", SIGN_PRIVATE_KEY_BYTES, private_key.len()))?;
        let signing_key = SigningKey::from_keypair_bytes(&keypair_bytes)
            .map_err(|_| anyhow!("sign private key halves do not match"))?;

        Ok(signing_key.sign(data).to_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], public_key: &[u8], signature: &[u8]) -> bool {
        let public_key = match <[u8; SIGN_PUBLIC_KEY_BYTES]>::try_from(public_key) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let verifying_key = match VerifyingKey::from_bytes(&public_key) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let signature = match <[u8; SIGNATURE_BYTES]>::try_from(signature) {
            Ok(sig) => Signature::from_bytes(&sig),
            Err(_) => return false,
        };

        verifying_key.verify_strict(data, &signature).is_ok()
    }

    fn mac(&self, data: &[u8], key: &[u8]) -> anyhow::Result<Vec<u8>> {
        if key.len() != MAC_KEY_BYTES {
            bail!("expected {} byte mac key, got {} bytes", MAC_KEY_BYTES, key.len());
        }
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| anyhow!("invalid mac key"))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn mac_verify(&self, data: &[u8], mac: &[u8], key: &[u8]) -> bool {
        if key.len() != MAC_KEY_BYTES || mac.len() != MAC_BYTES {
            return false;
        }
        let mut expected = match HmacSha256::new_from_slice(key) {
            Ok(m) => m,
            Err(_) => return false,
        };
        expected.update(data);
        expected.verify_slice(mac).is_ok()
    }
}

/// Generate an X25519 keypair for sealed boxes, as `(public, private)` bytes.
pub fn generate_seal_keypair() -> (Vec<u8>, Vec<u8>) {
    let private_key = crypto_box::SecretKey::generate(&mut OsRng);
    let public_key = private_key.public_key();
    (public_key.as_bytes().to_vec(), private_key.to_bytes().to_vec())
}

/// Generate an Ed25519 keypair for detached signatures, as `(public, private)`
///  bytes with the private key in the 64-byte seed-then-public-key layout.
pub fn generate_sign_keypair() -> (Vec<u8>, Vec<u8>) {
    let signing_key = SigningKey::generate(&mut OsRng);
    (signing_key.verifying_key().to_bytes().to_vec(), signing_key.to_keypair_bytes().to_vec())
}

/// Generate a random key for keyed MACs.
pub fn generate_mac_key() -> Vec<u8> {
    let mut key = vec![0u8; MAC_KEY_BYTES];
    OsRng.fill_bytes(&mut key);
    key
}
