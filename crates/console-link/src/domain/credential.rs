//! Login credentials and their local persistence.
//!
//! The plaintext secret only exists long enough to be hashed; what travels
//! over the wire and what lands on disk is the SHA-256 hex digest.

use crate::domain::error::CredentialError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroize;

/// Length of a hex-encoded SHA-256 digest
pub const PASSWORD_HASH_LEN: usize = 64;

/// Hash a secret the way the server expects it.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Login name plus one-way hashed secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    login: String,
    password_hash: String,
}

impl Credential {
    /// Hash `password` and wipe the plaintext buffer.
    pub fn from_password(
        login: impl Into<String>,
        mut password: String,
    ) -> Result<Self, CredentialError> {
        let password_hash = hash_password(&password);
        password.zeroize();
        Self::from_hash(login, password_hash)
    }

    /// Build from an already-hashed secret, e.g. one read from the store.
    pub fn from_hash(
        login: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let login = login.into();
        if login.trim().is_empty() {
            return Err(CredentialError::EmptyLogin);
        }
        let password_hash = password_hash.into().to_ascii_lowercase();
        if password_hash.len() != PASSWORD_HASH_LEN
            || !password_hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(CredentialError::InvalidHash);
        }
        Ok(Self {
            login,
            password_hash,
        })
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("login", &self.login)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// What the local store keeps between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub login: String,
    pub password_hash: String,
    #[serde(default)]
    pub remember: bool,
}

impl CredentialRecord {
    pub fn new(credential: &Credential, remember: bool) -> Self {
        Self {
            login: credential.login.clone(),
            password_hash: credential.password_hash.clone(),
            remember,
        }
    }

    /// Validate the stored fields back into a credential.
    pub fn credential(&self) -> Result<Credential, CredentialError> {
        Credential::from_hash(self.login.clone(), self.password_hash.clone())
    }
}

/// JSON file holding at most one [`CredentialRecord`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/netconsole/credentials.json`, when the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("netconsole").join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record; `None` if nothing has been saved.
    pub fn load(&self) -> Result<Option<CredentialRecord>, CredentialError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        let record = serde_json::from_str(&text).map_err(|source| CredentialError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Write the record, creating parent directories as needed.
    pub fn save(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let text = serde_json::to_string_pretty(record).map_err(|source| {
            CredentialError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        let mut file = open_private(&self.path).map_err(|source| self.io_error(source))?;
        file.write_all(text.as_bytes())
            .map_err(|source| self.io_error(source))?;
        debug!(path = %self.path.display(), login = %record.login, "Saved credential record");
        Ok(())
    }

    /// Remove the record; succeeds if there was none.
    pub fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Cleared credential record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Open for writing, owner-only. `mode` applies only on creation, so a
/// pre-existing file is tightened explicitly.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
