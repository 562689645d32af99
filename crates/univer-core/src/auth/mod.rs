//! Authentication module for logins and stored credentials.
//!
//! This module provides:
//! - `CredentialStore`: get/set/remove of username, org id and password
//! - `SystemCredentialStore`: profile file plus OS keychain via keyring
//! - `SingleFlightLogin`: one outstanding login at a time, shared by all callers

pub mod credentials;
pub mod login;
pub mod profile;

pub use credentials::{
    CredentialKey, CredentialStore, Credentials, MemoryCredentialStore, SystemCredentialStore,
};
pub use login::SingleFlightLogin;
pub use profile::Profile;
