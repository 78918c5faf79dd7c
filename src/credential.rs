//! Directory credential sources.
//!
//! The credential is re-resolved on every refresh cycle so that rotating the
//! file contents or environment value takes effect without a restart.

use std::path::PathBuf;

use crate::error::DnsError;

/// Where the directory credential comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Trimmed contents of a file.
    File(PathBuf),
    /// Trimmed value of a named environment variable.
    Env(String),
    /// Literal value from the configuration (development only).
    Inline(String),
}

impl CredentialSource {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialSource::File(_) => "file",
            CredentialSource::Env(_) => "env",
            CredentialSource::Inline(_) => "inline",
        }
    }

    /// Resolve the current credential value.
    pub fn load(&self) -> Result<String, DnsError> {
        let raw = match self {
            CredentialSource::File(path) => {
                std::fs::read_to_string(path).map_err(|e| self.unavailable(format!(
                    "read {}: {e}",
                    path.display()
                )))?
            }
            CredentialSource::Env(name) => std::env::var(name)
                .map_err(|e| self.unavailable(format!("{name}: {e}")))?,
            CredentialSource::Inline(value) => value.clone(),
        };

        let token = raw.trim();
        if token.is_empty() {
            return Err(self.unavailable("empty value".to_string()));
        }
        Ok(token.to_string())
    }

    fn unavailable(&self, reason: String) -> DnsError {
        DnsError::CredentialUnavailable {
            source_kind: self.kind(),
            reason,
        }
    }
}
