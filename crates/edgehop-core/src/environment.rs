//! Per-process environment threaded into every subsystem.
//!
//! Replaces process-global state with one value constructed in `main` (or a
//! test) and handed to each constructor, so teardown is deterministic.
//! The profile directory follows platform conventions unless overridden:
//! `$XDG_DATA_HOME/Edgehop` on Linux, `%LOCALAPPDATA%\Edgehop` on Windows,
//! `~/Library/Application Support/Edgehop` on macOS.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while resolving the environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("could not determine the platform profile directory")]
    NoProfileDirectory,
}

/// Paths and settings shared by all subsystems.
#[derive(Debug, Clone)]
pub struct Environment {
    profile_dir: PathBuf,
    /// When false the transport is plain TCP and no trust store is consulted.
    pub crypto_enabled: bool,
}

impl Environment {
    /// Resolves the environment, honoring a `--profile-dir` override.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::NoProfileDirectory`] when no override is
    /// given and the platform directory cannot be determined.
    pub fn new(
        profile_dir_override: Option<PathBuf>,
        crypto_enabled: bool,
    ) -> Result<Environment, EnvironmentError> {
        let profile_dir = match profile_dir_override {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .map(|d| d.join("Edgehop"))
                .ok_or(EnvironmentError::NoProfileDirectory)?,
        };
        Ok(Environment {
            profile_dir,
            crypto_enabled,
        })
    }

    /// An environment rooted at an explicit directory, for tests.
    pub fn at(profile_dir: impl Into<PathBuf>) -> Environment {
        Environment {
            profile_dir: profile_dir.into(),
            crypto_enabled: true,
        }
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// The self-signed certificate plus private key, PEM-encoded.
    pub fn certificate_path(&self) -> PathBuf {
        self.profile_dir.join("SSL").join("Edgehop.pem")
    }

    /// Our own certificate fingerprints, for display in accept dialogs.
    pub fn local_fingerprints_path(&self) -> PathBuf {
        self.fingerprints_dir().join("Local.txt")
    }

    /// Servers this installation trusts (consulted by the client).
    pub fn trusted_servers_path(&self) -> PathBuf {
        self.fingerprints_dir().join("TrustedServers.txt")
    }

    /// Clients this installation trusts (consulted by the server).
    pub fn trusted_clients_path(&self) -> PathBuf {
        self.fingerprints_dir().join("TrustedClients.txt")
    }

    fn fingerprints_dir(&self) -> PathBuf {
        self.profile_dir.join("SSL").join("Fingerprints")
    }
}
