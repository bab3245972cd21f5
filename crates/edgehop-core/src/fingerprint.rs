//! Certificate fingerprints and the trust-on-first-use database.
//!
//! Peers are authenticated solely by the SHA-256 digest of their DER
//! certificate. Each trust file holds one fingerprint per line in the form
//! `v2:<algorithm>:<lowercase hex>`. A legacy line of 20 colon-separated hex
//! pairs is read as a SHA-1 fingerprint; SHA-1 entries are kept for display
//! continuity but never satisfy a trust check.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Digest algorithm of a stored fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintAlgorithm {
    Sha1,
    Sha256,
}

impl FingerprintAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            FingerprintAlgorithm::Sha1 => "sha1",
            FingerprintAlgorithm::Sha256 => "sha256",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "sha1" => Some(FingerprintAlgorithm::Sha1),
            "sha256" => Some(FingerprintAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// A peer certificate digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub algorithm: FingerprintAlgorithm,
    pub data: Vec<u8>,
}

impl Fingerprint {
    /// SHA-256 fingerprint of a DER-encoded certificate.
    pub fn sha256_of_der(der: &[u8]) -> Fingerprint {
        Fingerprint {
            algorithm: FingerprintAlgorithm::Sha256,
            data: Sha256::digest(der).to_vec(),
        }
    }

    /// Parses one database line. Returns `None` for lines that are not
    /// valid fingerprints (callers skip those).
    pub fn parse_line(line: &str) -> Option<Fingerprint> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        // Legacy format: 20 colon-separated hex pairs, read as SHA-1.
        if line.len() == 59 && line.bytes().filter(|b| *b == b':').count() == 19 {
            let joined: String = line.split(':').collect();
            let data = hex::decode(joined).ok()?;
            return Some(Fingerprint {
                algorithm: FingerprintAlgorithm::Sha1,
                data,
            });
        }

        let mut parts = line.splitn(3, ':');
        if parts.next() != Some("v2") {
            return None;
        }
        let algorithm = FingerprintAlgorithm::parse(parts.next()?)?;
        let data = hex::decode(parts.next()?).ok()?;
        if data.is_empty() {
            return None;
        }
        Some(Fingerprint { algorithm, data })
    }

    /// Renders the `v2:<algo>:<hex>` database line.
    pub fn to_line(&self) -> String {
        format!("v2:{}:{}", self.algorithm.as_str(), hex::encode(&self.data))
    }
}

impl fmt::Display for Fingerprint {
    /// Colon-separated uppercase hex, the form shown to users for manual
    /// comparison.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for byte in &self.data {
            if !first {
                write!(f, ":")?;
            }
            write!(f, "{byte:02X}")?;
            first = false;
        }
        Ok(())
    }
}

/// Errors raised by trust-store file operations.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("cannot access fingerprint store {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An ordered set of fingerprints backed by one trust file.
#[derive(Debug, Clone, Default)]
pub struct FingerprintDatabase {
    fingerprints: Vec<Fingerprint>,
}

impl FingerprintDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a database from a trust file. A missing file yields an empty
    /// database; unparseable lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Io`] for failures other than "not found".
    pub fn load(path: &Path) -> Result<FingerprintDatabase, FingerprintError> {
        match std::fs::File::open(path) {
            Ok(file) => {
                let mut db = FingerprintDatabase::new();
                db.read_from(file).map_err(|source| FingerprintError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(db)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FingerprintDatabase::new()),
            Err(source) => Err(FingerprintError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Writes the database back to a trust file, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Io`] on any file-system failure.
    pub fn save(&self, path: &Path) -> Result<(), FingerprintError> {
        let io_err = |source| FingerprintError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        for fingerprint in &self.fingerprints {
            writeln!(file, "{}", fingerprint.to_line()).map_err(io_err)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(&mut self, reader: R) -> std::io::Result<()> {
        for line in BufReader::new(reader).lines() {
            if let Some(fingerprint) = Fingerprint::parse_line(&line?) {
                self.fingerprints.push(fingerprint);
            }
        }
        Ok(())
    }

    /// Adds a fingerprint unless an equal one is already present.
    pub fn add_trusted(&mut self, fingerprint: Fingerprint) {
        if !self.fingerprints.contains(&fingerprint) {
            self.fingerprints.push(fingerprint);
        }
    }

    /// Whether this exact fingerprint is trusted. Only SHA-256 entries
    /// participate in trust decisions.
    pub fn is_trusted(&self, fingerprint: &Fingerprint) -> bool {
        fingerprint.algorithm == FingerprintAlgorithm::Sha256
            && self.fingerprints.contains(fingerprint)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.fingerprints.iter()
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn clear(&mut self) {
        self.fingerprints.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
