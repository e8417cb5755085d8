//! Authenticated encryption of tenant secrets at rest.
//!
//! Refresh tokens (and, for symmetry, cached access tokens) are never persisted in the clear.
//! [`CryptoBox`] derives one AES-256-GCM subkey per tenant from a 256-bit master key via
//! HKDF-SHA-256, so compromising one tenant's stored blob never yields another tenant's key.

// crates.io
use aes_gcm::{
	Aes256Gcm, Key, Nonce,
	aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
// self
use crate::{_prelude::*, auth::TenantId};

const MASTER_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HKDF_SALT: &[u8] = b"tenant-key-v1";
const BLOB_VERSION: u8 = 1;

/// 256-bit master key loaded once at startup from `SDP_BROKER_MASTER_KEY`.
#[derive(Clone)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);
impl MasterKey {
	/// Builds a master key from raw bytes; fails if the length is not exactly 256 bits.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
		let array: [u8; MASTER_KEY_LEN] =
			bytes.try_into().map_err(|_| CryptoError::InvalidMasterKeyLength { got: bytes.len() })?;

		Ok(Self(array))
	}

	/// Parses a hex-encoded 256-bit master key, as carried by `SDP_BROKER_MASTER_KEY`.
	pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
		let bytes = hex_decode(hex).ok_or(CryptoError::InvalidMasterKeyHex)?;

		Self::from_bytes(&bytes)
	}
}
impl Debug for MasterKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("MasterKey").field(&"<redacted>").finish()
	}
}

/// Opaque, self-describing ciphertext produced by [`CryptoBox::encrypt`].
///
/// Layout: one version byte, a 96-bit nonce, then the AES-GCM output (ciphertext with the
/// 128-bit tag appended). The version byte lets a future algorithm change ship without
/// breaking blobs already on disk; decrypting an unrecognised version is a hard failure, never
/// a silent fallback.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CipherBlob(Vec<u8>);
impl CipherBlob {
	fn new(version: u8, nonce: &[u8], ciphertext_with_tag: &[u8]) -> Self {
		let mut bytes = Vec::with_capacity(1 + nonce.len() + ciphertext_with_tag.len());

		bytes.push(version);
		bytes.extend_from_slice(nonce);
		bytes.extend_from_slice(ciphertext_with_tag);

		Self(bytes)
	}

	fn version(&self) -> Option<u8> {
		self.0.first().copied()
	}

	fn nonce(&self) -> Option<&[u8]> {
		self.0.get(1..1 + NONCE_LEN)
	}

	fn ciphertext_with_tag(&self) -> Option<&[u8]> {
		self.0.get(1 + NONCE_LEN..)
	}
}
impl AsRef<[u8]> for CipherBlob {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}
impl From<CipherBlob> for String {
	fn from(value: CipherBlob) -> Self {
		base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &value.0)
	}
}
impl TryFrom<String> for CipherBlob {
	type Error = CryptoError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &value)
			.map_err(|_| CryptoError::MalformedBlob)?;

		if bytes.len() < 1 + NONCE_LEN + TAG_LEN {
			return Err(CryptoError::MalformedBlob);
		}

		Ok(Self(bytes))
	}
}
impl Debug for CipherBlob {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("CipherBlob").field(&"<redacted>").finish()
	}
}

/// Errors raised by [`CryptoBox`] operations.
#[derive(Debug, ThisError)]
pub enum CryptoError {
	/// `SDP_BROKER_MASTER_KEY` was not valid hex.
	#[error("Master key is not valid hex.")]
	InvalidMasterKeyHex,
	/// The decoded master key was not exactly 256 bits.
	#[error("Master key must be 256 bits (32 bytes); got {got} bytes.")]
	InvalidMasterKeyLength {
		/// Decoded byte length that was rejected.
		got: usize,
	},
	/// A stored blob's envelope (version/nonce/tag framing) was malformed.
	#[error("Ciphertext blob is malformed.")]
	MalformedBlob,
	/// The blob's version byte does not match any cipher this build understands.
	#[error("Ciphertext blob uses an unsupported version byte: {version}.")]
	UnsupportedVersion {
		/// The unrecognised version byte.
		version: u8,
	},
	/// Authenticated decryption failed: wrong key, or the blob was tampered with.
	#[error("Decryption failed: wrong key or tampered ciphertext.")]
	DecryptionFailed,
}

/// Authenticated, per-tenant symmetric encryption of secrets at rest.
pub struct CryptoBox {
	master_key: MasterKey,
}
impl CryptoBox {
	/// Builds a crypto box around a loaded master key.
	pub fn new(master_key: MasterKey) -> Self {
		Self { master_key }
	}

	/// Encrypts `plaintext` under a subkey derived for `tenant_id`.
	///
	/// Never logs the plaintext, the nonce, or the derived key; only the resulting opaque
	/// blob is safe to pass to a logger or a store.
	pub fn encrypt(&self, tenant_id: &TenantId, plaintext: &[u8]) -> Result<CipherBlob, CryptoError> {
		let cipher = self.cipher_for(tenant_id);
		let mut nonce_bytes = [0_u8; NONCE_LEN];

		rand::rng().fill_bytes(&mut nonce_bytes);

		let nonce = Nonce::from_slice(&nonce_bytes);
		let ciphertext =
			cipher.encrypt(nonce, plaintext).map_err(|_| CryptoError::DecryptionFailed)?;

		Ok(CipherBlob::new(BLOB_VERSION, &nonce_bytes, &ciphertext))
	}

	/// Decrypts a blob produced by [`CryptoBox::encrypt`] for the same `tenant_id`.
	pub fn decrypt(&self, tenant_id: &TenantId, blob: &CipherBlob) -> Result<Vec<u8>, CryptoError> {
		let version = blob.version().ok_or(CryptoError::MalformedBlob)?;

		if version != BLOB_VERSION {
			return Err(CryptoError::UnsupportedVersion { version });
		}

		let nonce_bytes = blob.nonce().ok_or(CryptoError::MalformedBlob)?;
		let ciphertext = blob.ciphertext_with_tag().ok_or(CryptoError::MalformedBlob)?;
		let cipher = self.cipher_for(tenant_id);
		let nonce = Nonce::from_slice(nonce_bytes);

		cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::DecryptionFailed)
	}

	fn cipher_for(&self, tenant_id: &TenantId) -> Aes256Gcm {
		let info = format!("tenant:{tenant_id}");
		let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.master_key.0);
		let mut subkey = [0_u8; MASTER_KEY_LEN];

		hk.expand(info.as_bytes(), &mut subkey)
			.expect("HKDF-SHA-256 output length is valid for a 256-bit AES key by construction.");

		Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&subkey))
	}
}
impl Debug for CryptoBox {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CryptoBox").finish_non_exhaustive()
	}
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
	if s.len() % 2 != 0 {
		return None;
	}

	let mut out = Vec::with_capacity(s.len() / 2);
	let bytes = s.as_bytes();
	let mut idx = 0;

	while idx < bytes.len() {
		let hi = (bytes[idx] as char).to_digit(16)?;
		let lo = (bytes[idx + 1] as char).to_digit(16)?;

		out.push(((hi << 4) | lo) as u8);
		idx += 2;
	}

	Some(out)
}
