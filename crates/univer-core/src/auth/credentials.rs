use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};

use super::profile::Profile;
use crate::config::Config;

const SERVICE_NAME: &str = "univer";

/// Keychain account the password is stored under
const PASSWORD_ACCOUNT: &str = "password";

/// Identity material a login needs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(rename = "orgId")]
    pub org_id: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        org_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            org_id: org_id.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("org_id", &self.org_id)
            .field("password", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    Username,
    OrgId,
    /// Kept in protected storage
    Password,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 3] = [
        CredentialKey::Username,
        CredentialKey::OrgId,
        CredentialKey::Password,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKey::Username => "username",
            CredentialKey::OrgId => "orgId",
            CredentialKey::Password => "password",
        }
    }
}

/// Key/value persistence for login credentials.
///
/// Username and org id go to ordinary storage; the password goes to
/// whatever protected storage the implementation has.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> Result<Option<String>>;

    fn set(&self, key: CredentialKey, value: &str) -> Result<()>;

    /// Removing a key that is not stored succeeds.
    fn remove(&self, key: CredentialKey) -> Result<()>;

    /// All three credentials, or `None` if any is missing.
    fn credentials(&self) -> Result<Option<Credentials>> {
        let username = self.get(CredentialKey::Username)?;
        let org_id = self.get(CredentialKey::OrgId)?;
        let password = self.get(CredentialKey::Password)?;
        Ok(match (username, org_id, password) {
            (Some(username), Some(org_id), Some(password)) => Some(Credentials {
                username,
                org_id,
                password,
            }),
            _ => None,
        })
    }

    /// Store all three credentials. Every write is attempted; the first
    /// failure is returned.
    fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        let writes = [
            (CredentialKey::Password, &credentials.password),
            (CredentialKey::Username, &credentials.username),
            (CredentialKey::OrgId, &credentials.org_id),
        ];
        let mut first_err = None;
        for (key, value) in writes {
            if let Err(e) = self.set(key, value) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Remove every stored credential. All removals are attempted; the
    /// first failure is returned.
    fn clear(&self) -> Result<()> {
        let mut first_err = None;
        for key in CredentialKey::ALL {
            if let Err(e) = self.remove(key) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: &Credentials) -> Result<Self> {
        let store = Self::new();
        store.save_credentials(credentials)?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CredentialKey, String>>> {
        self.values
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        Ok(self.lock()?.get(&key).cloned())
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        self.lock()?.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: CredentialKey) -> Result<()> {
        self.lock()?.remove(&key);
        Ok(())
    }
}

/// Username and org id in a JSON profile on disk, password in the OS keychain.
pub struct SystemCredentialStore {
    profile_path: PathBuf,
}

impl SystemCredentialStore {
    /// Store using the default profile location under the user's config dir.
    pub fn new() -> Result<Self> {
        Ok(Self::with_profile_dir(Config::config_dir()?))
    }

    pub fn with_profile_dir(dir: PathBuf) -> Self {
        Self {
            profile_path: Profile::path_in(&dir),
        }
    }

    fn password_entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, PASSWORD_ACCOUNT).context("Failed to create keyring entry")
    }

    fn update_profile(&self, apply: impl FnOnce(&mut Profile)) -> Result<()> {
        let mut profile = Profile::load(&self.profile_path)?.unwrap_or_default();
        apply(&mut profile);
        if profile.is_empty() {
            Profile::delete(&self.profile_path)
        } else {
            profile.save(&self.profile_path)
        }
    }
}

impl CredentialStore for SystemCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        match key {
            CredentialKey::Password => match Self::password_entry()?.get_password() {
                Ok(password) => Ok(Some(password)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e).context("Failed to retrieve password from keychain"),
            },
            CredentialKey::Username => {
                Ok(Profile::load(&self.profile_path)?.and_then(|p| p.username))
            }
            CredentialKey::OrgId => Ok(Profile::load(&self.profile_path)?.and_then(|p| p.org_id)),
        }
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        match key {
            CredentialKey::Password => Self::password_entry()?
                .set_password(value)
                .context("Failed to store password in keychain"),
            CredentialKey::Username => {
                self.update_profile(|p| p.username = Some(value.to_string()))
            }
            CredentialKey::OrgId => self.update_profile(|p| p.org_id = Some(value.to_string())),
        }
    }

    fn remove(&self, key: CredentialKey) -> Result<()> {
        match key {
            CredentialKey::Password => match Self::password_entry()?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e).context("Failed to delete credential from keychain"),
            },
            CredentialKey::Username => self.update_profile(|p| p.username = None),
            CredentialKey::OrgId => self.update_profile(|p| p.org_id = None),
        }
    }
}
