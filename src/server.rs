//! DNS server setup and lifecycle management.

use hickory_proto::rr::{LowerName, Name};
use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::authority::ZtnetAuthority;
use crate::config::Config;
use crate::credential::CredentialSource;
use crate::directory::DirectoryClient;
use crate::error::DnsError;
use crate::refresh::{RefreshLoop, RefreshSettings};
use crate::resolver::ZoneResolver;
use crate::state::SnapshotCache;

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a catalog with `authority` serving its zone.
///
/// With `short_names` the authority also sits first at the root so bare
/// names reach it; `next` authorities follow it there and receive every
/// query it passes through.
pub fn build_catalog(
    authority: Arc<dyn AuthorityObject>,
    short_names: bool,
    next: Vec<Arc<dyn AuthorityObject>>,
) -> Catalog {
    let mut catalog = Catalog::new();
    catalog.upsert(authority.origin().clone(), vec![authority.clone()]);

    let mut root = Vec::with_capacity(next.len() + 1);
    if short_names {
        root.push(authority);
    }
    root.extend(next);
    if !root.is_empty() {
        catalog.upsert(LowerName::from(Name::root()), root);
    }
    catalog
}

/// DNS server answering for a ZTNET network.
pub struct DnsServer {
    config: Config,
    cache: Arc<SnapshotCache>,
    next: Vec<Arc<dyn AuthorityObject>>,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: Arc::new(SnapshotCache::new()),
            next: Vec::new(),
        }
    }

    /// Hand passed-through queries to `next`, in order.
    pub fn with_next(mut self, next: Vec<Arc<dyn AuthorityObject>>) -> Self {
        self.next = next;
        self
    }

    /// The snapshot cache served by this instance.
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// Run the DNS server until `cancel` fires.
    ///
    /// Queries are served immediately; until the first refresh publishes a
    /// snapshot they are governed by `strict_start`.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DnsError> {
        let dns = &self.config.dns;
        info!(
            listen_addr = %dns.listen_addr,
            zone = %dns.zone_fqdn(),
            api_url = %self.config.directory.api_url,
            "Starting ztnet-dns server"
        );

        let settings = RefreshSettings::from_config(&self.config)?;
        if matches!(settings.credential, CredentialSource::Inline(_)) {
            warn!("using inline api_token; prefer token_file or token_env outside development");
        }

        let client = DirectoryClient::new(&self.config.directory)?;
        let refresh = RefreshLoop::new(client, self.cache.clone(), settings);
        let refresh_handle = tokio::spawn(refresh.run(cancel.clone()));

        let resolver = ZoneResolver::new(dns, self.cache.clone())?;
        let authority: Arc<dyn AuthorityObject> = Arc::new(ZtnetAuthority::new(resolver));
        let catalog = build_catalog(authority, dns.allow_short_names, self.next);

        let mut server = ServerFuture::new(catalog);

        let udp_socket = UdpSocket::bind(dns.listen_addr).await?;
        info!(addr = %dns.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(dns.listen_addr).await?;
        info!(addr = %dns.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
                cancel.cancel();
            }
        }

        info!("Waiting for refresh loop to stop...");
        if let Err(e) = refresh_handle.await {
            error!("Refresh loop task panicked: {}", e);
        }

        info!("DNS server stopped");
        Ok(())
    }
}
