//! Key material at rest.
//!
//! Private keys are sealed with ChaCha20-Poly1305 before they reach the
//! persistent store or disk. The stored form is `nonce ‖ ciphertext`.
//! [`KeyFiles`] keeps the on-disk copies (private file, public file, public
//! key set document) consistent with the persisted records and recreates
//! any that go missing.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use chacha20poly1305::{
    ChaCha20Poly1305, Key, KeyInit, Nonce,
    aead::{Aead, AeadCore},
};
use keyward_storage::{Zeroizing, auth::SigningKeyRecord};
use rand_core::OsRng;

use crate::{
    config::KeyFilesConfig,
    error::{AuthError, Result},
    jwks::Jwks,
    key::KeyMetadata,
};

const NONCE_LEN: usize = 12;

/// Allocates identifiers for new keys.
pub type KidGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Default kid allocator: 16 hex characters from a random UUID.
#[must_use]
pub fn default_kid_generator() -> KidGenerator {
    Arc::new(|| uuid::Uuid::new_v4().simple().to_string()[..16].to_owned())
}

/// Symmetric cipher for private keys at rest.
#[derive(Clone)]
pub struct KeyCipher {
    cipher: ChaCha20Poly1305,
}

impl fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCipher").finish_non_exhaustive()
    }
}

impl KeyCipher {
    /// Creates a cipher from a 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self { cipher: ChaCha20Poly1305::new(Key::from_slice(key)) }
    }

    /// Creates a cipher from the configured base64url key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the key is malformed.
    pub fn from_config(config: &KeyFilesConfig) -> Result<Self> {
        Ok(Self::new(&*config.encryption_key_bytes()?))
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if encryption fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| AuthError::key_material("private key encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a value produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if the value is truncated, was
    /// sealed under another key, or was tampered with.
    pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() <= NONCE_LEN {
            return Err(AuthError::key_material("sealed private key is truncated"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| AuthError::key_material("private key decryption failed"))
    }

    /// Seals a key into its persistent record.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if encryption fails.
    pub fn seal_record(&self, key: &KeyMetadata) -> Result<SigningKeyRecord> {
        let sealed = self.seal(key.private_pem().as_bytes())?;
        Ok(SigningKeyRecord::builder()
            .kid(key.kid())
            .alg(key.algorithm())
            .epoch(key.epoch())
            .maybe_rotated_out_at(key.rotated_at())
            .private_pem(sealed)
            .public_pem(key.public_pem())
            .build())
    }

    /// Opens a persistent record into a usable key.
    ///
    /// The record's `rotated_out_at` becomes the key's `rotated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if decryption fails or the
    /// material is invalid.
    pub fn open_record(&self, record: &SigningKeyRecord) -> Result<KeyMetadata> {
        let plaintext = self.open(&record.private_pem)?;
        let private_pem = std::str::from_utf8(&plaintext)
            .map_err(|_| AuthError::key_material(format!("private key for {} is not UTF-8", record.kid)))?;

        KeyMetadata::builder()
            .kid(record.kid.as_str())
            .algorithm(record.alg.as_str())
            .public_pem(record.public_pem.as_str())
            .private_pem(private_pem)
            .epoch(record.epoch)
            .maybe_rotated_at(record.rotated_out_at)
            .build()
    }
}

/// On-disk key material: private and public key files plus the public key
/// set document.
#[derive(Debug, Clone)]
pub struct KeyFiles {
    config: KeyFilesConfig,
}

impl KeyFiles {
    /// Creates a file manager for the configured locations.
    #[must_use]
    pub fn new(config: KeyFilesConfig) -> Self {
        Self { config }
    }

    /// Path of the encrypted private-key file for `kid`.
    #[must_use]
    pub fn private_path(&self, kid: &str) -> PathBuf {
        self.config.private_dir.join(format!("private_{kid}_key.pem"))
    }

    /// Path of the public-key file for `kid`.
    #[must_use]
    pub fn public_path(&self, kid: &str) -> PathBuf {
        self.config.public_dir.join(format!("public_{kid}_key.pem"))
    }

    /// Path of the public key set document.
    #[must_use]
    pub fn jwks_path(&self) -> &Path {
        &self.config.jwks_path
    }

    /// Writes both key files for a freshly persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if a write fails.
    #[tracing::instrument(skip(self, record), fields(kid = %record.kid))]
    pub async fn write_key(&self, record: &SigningKeyRecord) -> Result<()> {
        self.write_private(&record.kid, &record.private_pem).await?;
        write_file(&self.public_path(&record.kid), record.public_pem.as_bytes()).await
    }

    /// Recreates the public-key file if it is missing. Returns `true` if
    /// the file was written.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the check or write fails.
    pub async fn ensure_public(&self, record: &SigningKeyRecord) -> Result<bool> {
        let path = self.public_path(&record.kid);
        if exists(&path).await? {
            return Ok(false);
        }
        tracing::info!(kid = %record.kid, "recreating missing public key file");
        write_file(&path, record.public_pem.as_bytes()).await?;
        Ok(true)
    }

    /// Recreates the private-key file if it is missing. Returns `true` if
    /// the file was written.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the check or write fails.
    pub async fn ensure_private(&self, record: &SigningKeyRecord) -> Result<bool> {
        if exists(&self.private_path(&record.kid)).await? {
            return Ok(false);
        }
        tracing::info!(kid = %record.kid, "recreating missing private key file");
        self.write_private(&record.kid, &record.private_pem).await?;
        Ok(true)
    }

    /// Deletes the private-key file of `kid`. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the removal fails for a reason other
    /// than the file being absent.
    pub async fn remove_private(&self, kid: &str) -> Result<bool> {
        remove_file(&self.private_path(kid)).await
    }

    /// Deletes both key files of `kid`. Returns `true` if either existed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if a removal fails for a reason other than
    /// the file being absent.
    pub async fn purge(&self, kid: &str) -> Result<bool> {
        let private = remove_file(&self.private_path(kid)).await?;
        let public = remove_file(&self.public_path(kid)).await?;
        if private || public {
            tracing::debug!(kid, "purged key files");
        }
        Ok(private || public)
    }

    /// Writes the public key set document atomically: a temporary file in
    /// the same directory is written and then renamed over the target.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if writing or renaming fails.
    pub async fn write_jwks(&self, jwks: &Jwks) -> Result<()> {
        let path = self.jwks_path();
        let json = jwks.to_json()?;
        let tmp = tmp_path(path);

        write_file(&tmp, json.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = remove_file(&tmp).await;
            return Err(AuthError::io(path, e));
        }
        tracing::debug!(kids = ?jwks.kids(), "wrote public key set");
        Ok(())
    }

    /// Reads the public key set document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if reading fails, or
    /// [`AuthError::KeyMaterial`] if the document is malformed.
    pub async fn read_jwks(&self) -> Result<Jwks> {
        let path = self.jwks_path();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| AuthError::io(path, e))?;
        Jwks::from_json(&json)
    }

    async fn write_private(&self, kid: &str, sealed: &[u8]) -> Result<()> {
        let path = self.private_path(kid);
        write_file(&path, sealed).await?;
        restrict_permissions(&path).await
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| AuthError::io(parent, e))?;
    }
    tokio::fs::write(path, contents).await.map_err(|e| AuthError::io(path, e))
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path).await.map_err(|e| AuthError::io(path, e))
}

async fn remove_file(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AuthError::io(path, e)),
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| AuthError::io(path, e))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn cipher() -> KeyCipher {
        KeyCipher::new(&[7u8; 32])
    }

    fn files(dir: &Path) -> KeyFiles {
        KeyFiles::new(
            KeyFilesConfig::builder()
                .jwks_path(dir.join("jwks.json"))
                .private_dir(dir.join("private"))
                .public_dir(dir.join("public"))
                .encryption_key("BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_default_kid_generator_allocates_distinct_hex() {
        let generate = default_kid_generator();
        let a = generate();
        let b = generate();

        assert_eq!(a.len(), 16);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_seal_open() {
        let cipher = cipher();
        let sealed = cipher.seal(b"secret pem").unwrap();

        assert_ne!(&sealed[NONCE_LEN..], b"secret pem");
        assert_eq!(cipher.open(&sealed).unwrap().as_slice(), b"secret pem");
    }

    #[test]
    fn test_cipher_from_config_uses_decoded_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = files(dir.path()).config.clone();
        let from_config = KeyCipher::from_config(&config).unwrap();

        let sealed = cipher().seal(b"secret pem").unwrap();
        assert_eq!(from_config.open(&sealed).unwrap().as_slice(), b"secret pem");
    }

    #[test]
    fn test_open_rejects_wrong_key_and_tampering() {
        let sealed = cipher().seal(b"secret pem").unwrap();

        assert!(KeyCipher::new(&[8u8; 32]).open(&sealed).is_err());

        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(cipher().open(&tampered).is_err());

        assert!(cipher().open(&sealed[..NONCE_LEN]).is_err());
    }

    #[test]
    fn test_record_conversion_preserves_key() {
        let cipher = cipher();
        let key = KeyMetadata::generate("abc").unwrap();
        let record = cipher.seal_record(&key).unwrap();

        assert!(!record.manual_rotation);
        assert!(record.rotated_out_by.is_none());
        assert!(record.is_active());
        assert!(!String::from_utf8_lossy(&record.private_pem).contains("PRIVATE KEY"));

        let opened = cipher.open_record(&record).unwrap();
        assert_eq!(opened.kid(), "abc");
        assert_eq!(opened.public_pem(), key.public_pem());
        assert_eq!(opened.private_pem(), key.private_pem());
    }

    #[test]
    fn test_open_record_carries_rotation() {
        let cipher = cipher();
        let key = KeyMetadata::generate("abc").unwrap();
        let mut record = cipher.seal_record(&key).unwrap();
        record.rotated_out_at = Some(key.epoch() + chrono::Duration::minutes(1));

        let opened = cipher.open_record(&record).unwrap();
        assert!(!opened.is_active());
    }

    #[tokio::test]
    async fn test_key_files_write_ensure_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(dir.path());
        let key = KeyMetadata::generate("abc").unwrap();
        let record = cipher().seal_record(&key).unwrap();

        files.write_key(&record).await.unwrap();
        assert!(!files.ensure_public(&record).await.unwrap());
        assert!(!files.ensure_private(&record).await.unwrap());

        tokio::fs::remove_file(files.public_path("abc")).await.unwrap();
        assert!(files.ensure_public(&record).await.unwrap());
        let public = tokio::fs::read_to_string(files.public_path("abc")).await.unwrap();
        assert_eq!(public, key.public_pem());

        assert!(files.remove_private("abc").await.unwrap());
        assert!(!files.remove_private("abc").await.unwrap());
        assert!(files.ensure_private(&record).await.unwrap());

        assert!(files.purge("abc").await.unwrap());
        assert!(!files.purge("abc").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let files = files(dir.path());
        let record = cipher().seal_record(&KeyMetadata::generate("abc").unwrap()).unwrap();

        files.write_key(&record).await.unwrap();

        let mode = std::fs::metadata(files.private_path("abc")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_write_jwks_replaces_document() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(dir.path());
        let a = KeyMetadata::generate("a").unwrap();
        let b = KeyMetadata::generate("b").unwrap();

        files.write_jwks(&Jwks::from_keys([&a], 3).unwrap()).await.unwrap();
        files.write_jwks(&Jwks::from_keys([&a, &b], 3).unwrap()).await.unwrap();

        let jwks = files.read_jwks().await.unwrap();
        assert_eq!(jwks.kids(), vec!["a", "b"]);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
