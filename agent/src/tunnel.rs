use crate::device::{LinkManager, WgAdapter};
use backend::{Backend, BackendError};
use backoff::{backoff::Backoff as _, ExponentialBackoff};
use ipnet::Ipv4Net;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};
use shared::{chmod, Endpoint, InvalidEndpoint, Peer};
use std::{
    convert::Infallible,
    fs::{self, File},
    io::{self, Write},
    net::Ipv4Addr,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};
use thiserror::Error;
use wgtool::{Configuration, InterfaceConfig, InterfaceName, InvalidInterfaceName, PeerConfig,
    ToolError};

const MAX_BACKOFF_INTERVAL: Duration = Duration::from_secs(120);
const MAX_BACKOFF_ELAPSED: Duration = Duration::from_secs(15 * 60);
const TUNNEL_PREFIX_LEN: u8 = 24;

/// Errors that stop or restart the reconciliation engine.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    InvalidEndpoint(#[from] InvalidEndpoint),

    #[error(transparent)]
    InvalidInterfaceName(#[from] InvalidInterfaceName),

    #[error("{0:?} is not a valid IPv4 tunnel address")]
    InvalidAddress(String),

    #[error("error generating the private key for wireguard: {0}")]
    KeyGeneration(#[source] ToolError),

    #[error("error writing private key file: {0}")]
    PrivateKeyWrite(#[source] io::Error),

    #[error("error opening private key file: {0}")]
    PrivateKeyRead(#[source] io::Error),

    #[error("error extracting the public key: {0}")]
    PublicKeyDerivation(#[source] ToolError),

    #[error("address already taken: {0}")]
    AddressAlreadyTaken(Ipv4Addr),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("error adding the wireguard link: {0}")]
    LinkCreation(#[source] io::Error),

    #[error("error building the tunnel address: {0}")]
    AddressParse(#[from] ipnet::PrefixLenError),

    #[error("error setting the configuration for wireguard: {0}")]
    ConfigurationApply(#[source] ToolError),

    #[error("error assigning the tunnel address: {0}")]
    AddressAssign(#[source] io::Error),

    #[error("error bringing the link up: {0}")]
    LinkUp(#[source] io::Error),
}

impl TunnelError {
    /// Whether the engine should restart from the address claim rather
    /// than exit. Everything else is terminal: validation failures mean a
    /// corrupted local setup, and registry errors only surface here once
    /// the retry budget is spent.
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TunnelError::LinkCreation(_)
                | TunnelError::AddressParse(_)
                | TunnelError::ConfigurationApply(_)
                | TunnelError::AddressAssign(_)
                | TunnelError::LinkUp(_)
        )
    }
}

/// Operator-supplied settings for one tunnel.
pub struct TunnelConfig {
    pub ifname: String,
    /// `host:port` the other members will dial.
    pub endpoint: String,
    /// This node's address inside the tunnel, e.g. `10.0.0.3`.
    pub ipaddr: String,
    pub private_key_path: PathBuf,
    pub peer_check_ttl: Duration,
    pub allowed_ips: Vec<String>,
}

/// The reconciliation engine for one interface: claims the tunnel address
/// in the registry, advertises the local peer, and keeps the kernel
/// configuration converged with the observed membership.
pub struct Tunnel {
    registry: Box<dyn Backend>,
    links: Box<dyn LinkManager>,
    wg: Box<dyn WgAdapter>,
    name: InterfaceName,
    peer_check_ttl: Duration,
    local_peer: Peer,
    local_ip: Ipv4Addr,
    private_key: Vec<u8>,
    fingerprint: String,
    rng: StdRng,
}

impl Tunnel {
    /// Validate the operator-supplied settings and materialize the local
    /// identity, generating a private key on first run.
    pub fn new(
        registry: Box<dyn Backend>,
        links: Box<dyn LinkManager>,
        wg: Box<dyn WgAdapter>,
        config: TunnelConfig,
    ) -> Result<Self, TunnelError> {
        let endpoint: Endpoint = config.endpoint.parse()?;
        let name: InterfaceName = config.ifname.parse()?;

        if !config.private_key_path.exists() {
            let key = wg.generate_private_key().map_err(TunnelError::KeyGeneration)?;
            write_private_key(&config.private_key_path, &key)
                .map_err(TunnelError::PrivateKeyWrite)?;
        }

        let private_key =
            fs::read(&config.private_key_path).map_err(TunnelError::PrivateKeyRead)?;
        let public_key = wg
            .derive_public_key(&private_key)
            .map_err(TunnelError::PublicKeyDerivation)?;

        let local_ip: Ipv4Addr = config
            .ipaddr
            .parse()
            .map_err(|_| TunnelError::InvalidAddress(config.ipaddr.clone()))?;

        let local_peer = Peer {
            public_key,
            endpoint,
            ip: Some(local_ip),
            allowed_ips: config.allowed_ips,
        };

        Ok(Self {
            registry,
            links,
            wg,
            name,
            peer_check_ttl: config.peer_check_ttl,
            local_peer,
            local_ip,
            private_key,
            fingerprint: String::new(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Drive the tunnel toward the observed membership, forever.
    ///
    /// Transient registry failures are retried with exponential backoff,
    /// and a failed re-apply restarts from the address claim. Returns only
    /// when a terminal error occurs or a retry budget is exhausted.
    pub fn connect(&mut self) -> TunnelError {
        let mut restart: Option<ExponentialBackoff> = None;
        loop {
            let error = match self.run(&mut restart) {
                Ok(never) => match never {},
                Err(e) => e,
            };

            if !error.is_recoverable() {
                return error;
            }

            let backoff = restart.get_or_insert_with(|| self.new_backoff());
            match backoff.next_backoff() {
                Some(delay) => {
                    log::warn!("tunnel setup failed ({error}), restarting in {delay:?}");
                    thread::sleep(delay);
                },
                None => return error,
            }
        }
    }

    fn run(
        &mut self,
        restart: &mut Option<ExponentialBackoff>,
    ) -> Result<Infallible, TunnelError> {
        self.fingerprint.clear();

        self.claim_address()?;
        self.advertise()?;

        loop {
            let peers = self.fetch_peers()?;
            if self.synchronize(&peers)? {
                // A successful re-apply ends any restart streak.
                restart.take();
            } else {
                thread::sleep(self.peer_check_ttl);
            }
        }
    }

    /// Phase one: make sure no other member already advertises our tunnel
    /// address. A conflict is terminal; an unreachable registry is not.
    fn claim_address(&mut self) -> Result<(), TunnelError> {
        let backoff = self.new_backoff();
        let name = self.name.to_string();

        let operation = || {
            let peers = self
                .registry
                .get_peers(&name)
                .map_err(TunnelError::from)?;

            for peer in &peers {
                if peer.ip == Some(self.local_ip) && peer.public_key != self.local_peer.public_key
                {
                    return Err(backoff::Error::permanent(TunnelError::AddressAlreadyTaken(
                        self.local_ip,
                    )));
                }
            }
            Ok(())
        };

        backoff::retry_notify(backoff, operation, notify_retry).map_err(unwrap_backoff)
    }

    /// Phase two: upsert our own record so other members can see us.
    fn advertise(&mut self) -> Result<(), TunnelError> {
        let backoff = self.new_backoff();
        let name = self.name.to_string();

        backoff::retry_notify(
            backoff,
            || {
                self.registry
                    .join(&name, &self.local_peer)
                    .map_err(TunnelError::from)?;
                Ok(())
            },
            notify_retry,
        )
        .map_err(unwrap_backoff)
    }

    fn fetch_peers(&mut self) -> Result<Vec<Peer>, TunnelError> {
        let backoff = self.new_backoff();
        let name = self.name.to_string();

        backoff::retry_notify(
            backoff,
            || Ok(self.registry.get_peers(&name).map_err(TunnelError::from)?),
            notify_retry,
        )
        .map_err(unwrap_backoff)
    }

    /// One observation cycle: compare the snapshot's fingerprint against
    /// the last applied one and rebuild the interface when it moved.
    /// Returns whether a re-apply happened.
    fn synchronize(&mut self, peers: &[Peer]) -> Result<bool, TunnelError> {
        let fingerprint = membership_fingerprint(peers);
        if fingerprint == self.fingerprint {
            return Ok(false);
        }

        log::info!("the peer list changed, reconfiguring {}", self.name);
        self.fingerprint = fingerprint;
        self.reapply(peers)?;
        Ok(true)
    }

    /// Tear down and rebuild the interface to match `peers`. The sequence
    /// is treated as atomic: any failure restarts the engine.
    fn reapply(&mut self, peers: &[Peer]) -> Result<(), TunnelError> {
        match self.links.find_by_name(&self.name) {
            Ok(Some(_)) => {
                log::debug!("deleting old link {}", self.name);
                if let Err(e) = self.links.delete(&self.name) {
                    log::warn!("failed to delete old link {}: {e}", self.name);
                }
            },
            Ok(None) => {},
            Err(e) => log::warn!("failed to look up link {}: {e}", self.name),
        }

        self.links
            .create(&self.name)
            .map_err(TunnelError::LinkCreation)?;

        let config = self.build_config(peers);
        self.wg
            .apply_config(&self.name, &config)
            .map_err(TunnelError::ConfigurationApply)?;

        let address = Ipv4Net::new(self.local_ip, TUNNEL_PREFIX_LEN)?;
        self.links
            .assign_address(&self.name, address)
            .map_err(TunnelError::AddressAssign)?;

        self.links.set_up(&self.name).map_err(TunnelError::LinkUp)?;
        log::info!("link {} is up", self.name);

        Ok(())
    }

    /// Build the configuration for a snapshot, excluding ourselves:
    /// WireGuard rejects loopback peering.
    fn build_config(&self, peers: &[Peer]) -> Configuration {
        let mut sections = Vec::new();
        for peer in peers {
            if peer.public_key == self.local_peer.public_key {
                continue;
            }

            let ip = match peer.ip {
                Some(ip) => ip,
                None => {
                    log::warn!(
                        "skipping a peer with no tunnel address (endpoint {})",
                        peer.endpoint
                    );
                    continue;
                },
            };

            let allowed_ips = if peer.allowed_ips.is_empty() {
                format!("{ip}/32")
            } else {
                format!("{ip}/32,{}", peer.allowed_ips.join(","))
            };

            sections.push(PeerConfig {
                public_key: String::from_utf8_lossy(&peer.public_key).into_owned(),
                allowed_ips,
                endpoint: peer.endpoint.to_string(),
            });
        }

        Configuration {
            interface: InterfaceConfig {
                listen_port: self.local_peer.endpoint.port(),
                private_key: String::from_utf8_lossy(&self.private_key).into_owned(),
            },
            peers: sections,
        }
    }

    fn new_backoff(&mut self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_secs(self.rng.gen_range(1..=5)),
            max_interval: MAX_BACKOFF_INTERVAL,
            max_elapsed_time: Some(MAX_BACKOFF_ELAPSED),
            ..ExponentialBackoff::default()
        }
    }
}

fn notify_retry(error: TunnelError, delay: Duration) {
    log::warn!("transient registry failure ({error}), retrying in {delay:?}");
}

fn unwrap_backoff(error: backoff::Error<TunnelError>) -> TunnelError {
    match error {
        backoff::Error::Permanent(e) | backoff::Error::Transient { err: e, .. } => e,
    }
}

fn write_private_key(path: &Path, key: &[u8]) -> Result<(), io::Error> {
    let mut file = File::create(path)?;
    chmod(&file, 0o600)?;
    file.write_all(key)
}

/// Content hash of a membership snapshot, used as the re-apply edge
/// trigger. Peers are ordered by public key (descending) before hashing so
/// the registry's arbitrary ordering cannot produce spurious changes.
pub(crate) fn membership_fingerprint(peers: &[Peer]) -> String {
    let mut sorted: Vec<&Peer> = peers.iter().collect();
    sorted.sort_by(|a, b| b.public_key.cmp(&a.public_key));

    let mut digests = String::new();
    for peer in sorted {
        let peer_json = serde_json::to_vec(peer).expect("peer records serialize to JSON");
        digests.push_str(&hex::encode(Sha256::digest(&peer_json)));
    }

    hex::encode(Sha256::digest(digests.as_bytes()))
}
