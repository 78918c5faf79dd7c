//! ZTNET DNS - An authoritative DNS server for ZeroTier networks managed by ZTNET.
//!
//! This crate serves A/AAAA records for the members of a ZeroTier network,
//! built from the ZTNET directory API. A background loop periodically fetches
//! members and routes, derives records and a source-address allowlist, and
//! publishes them atomically; queries are answered from that snapshot only.
//!
//! ## Features
//!
//! - `<node_id>.<zone>` and `<display_name>.<zone>` records for authorized members
//! - Source allowlisting from configured CIDRs and directly reachable routes
//! - Stale-serving: a failed refresh never replaces the current snapshot
//! - Optional short (single-label) names and derived RFC4193 / 6PLANE addresses
//! - Credential hot-reload from file or environment on every refresh
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           ztnet-dns                             │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │ Directory Client │───▶│  Refresh Loop    │                  │
//! │  │ (ZTNET HTTP API) │    │  (timer, single  │                  │
//! │  └──────────────────┘    │   writer)        │                  │
//! │                          └────────┬─────────┘                  │
//! │                                   │ publish                     │
//! │                                   ▼                             │
//! │                          ┌──────────────────┐                  │
//! │                          │ Snapshot Cache   │                  │
//! │                          │ (records +       │                  │
//! │                          │  allowlist)      │                  │
//! │                          └────────┬─────────┘                  │
//! │                                   │ load                        │
//! │                                   ▼                             │
//! │                          ┌──────────────────┐                  │
//! │                          │ Resolver /       │◀── UDP/TCP       │
//! │                          │ Hickory Catalog  │                  │
//! │                          └──────────────────┘                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use ztnet_dns::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_config();
//!     config.validate().unwrap();
//!
//!     let cancel = CancellationToken::new();
//!     let server = DnsServer::new(config);
//!     server.run(cancel).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod addressing;
pub mod allowlist;
pub mod authority;
pub mod config;
pub mod credential;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod refresh;
pub mod resolver;
pub mod server;
pub mod state;
pub mod telemetry;

// Re-export main types
pub use allowlist::Allowlist;
pub use authority::ZtnetAuthority;
pub use config::{Config, DirectoryConfig, DnsConfig, TelemetryConfig};
pub use error::DnsError;
pub use resolver::{Question, Resolution, ZoneResolver};
pub use server::DnsServer;
pub use state::SnapshotCache;
