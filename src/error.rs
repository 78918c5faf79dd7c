//! Error types for ztnet-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server and its refresh pipeline.
#[derive(Debug, Error)]
pub enum DnsError {
    /// A CIDR entry (configured or derived from routes) failed to parse.
    #[error("invalid CIDR {entry:?}: {reason}")]
    InvalidCidr {
        /// The offending entry as it was supplied.
        entry: String,
        /// Parser message.
        reason: String,
    },

    /// The directory rejected the credential (HTTP 401/403).
    #[error("directory rejected credential for {path}")]
    Unauthorized {
        /// Request path that was rejected.
        path: String,
    },

    /// Transport failure after all retries.
    #[error("directory unreachable for {path}: {source}")]
    DirectoryUnreachable {
        /// Request path.
        path: String,
        /// Last transport error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP 5xx after all retries.
    #[error("directory server error for {path}: status {status}")]
    DirectoryServerError {
        /// Request path.
        path: String,
        /// Last status code seen.
        status: u16,
    },

    /// HTTP 4xx other than 401/403.
    #[error("directory rejected request {path}: status {status}")]
    DirectoryBadRequest {
        /// Request path.
        path: String,
        /// Status code.
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("decode {path}: {reason}")]
    Decode {
        /// Request path.
        path: String,
        /// Decoder message.
        reason: String,
    },

    /// Credential source was empty or unreadable.
    #[error("credential unavailable from {source_kind}: {reason}")]
    CredentialUnavailable {
        /// Source kind (`file`, `env`, `inline`).
        source_kind: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// A network or node identifier is not valid hex of the required length.
    #[error("invalid {kind} {value:?}")]
    InvalidIdentifier {
        /// `network id` or `node id`.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Shutdown was requested while a call was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// The refresh cycle deadline fired while a call was in flight.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

impl DnsError {
    /// True when the directory rejected the credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DnsError::Unauthorized { .. })
    }

    /// True when the failure came from shutdown rather than the directory.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DnsError::Cancelled)
    }
}
