use anyhow::{anyhow, bail, Error};
use backend::{Backend, BasicAuth, ConsulBackend, EtcdBackend, HttpBackend};
use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use ipnet::IpNet;
use shared::Timestring;
use std::path::PathBuf;

mod device;
mod tunnel;
mod util;

use device::{SystemLinkManager, SystemWg};
use tunnel::{Tunnel, TunnelConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug, Parser)]
#[command(name = "wirey", version, about = "manage local wireguard interfaces in a distributed system")]
#[command(group(ArgGroup::new("registry").args(["etcd", "consul", "http"])))]
struct Opts {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output, use -vv for even higher verbositude
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Endpoint for this machine, e.g: 192.168.1.3
    #[arg(long, env = "WIREY_ENDPOINT")]
    endpoint: Option<String>,

    /// Endpoint port for this machine
    #[arg(long, env = "WIREY_ENDPOINT_PORT", default_value_t = 2345)]
    endpoint_port: u16,

    /// The ip for this node inside the tunnel, e.g: 10.0.0.3
    #[arg(long, env = "WIREY_IPADDR")]
    ipaddr: Option<String>,

    /// The name to use for the interface (must be the same in all the peers)
    #[arg(long, env = "WIREY_IFNAME", default_value = "wg0")]
    ifname: String,

    /// The local path to load the private key from; a key is generated
    /// there on first run
    #[arg(long, env = "WIREY_PRIVATE_KEY_PATH", default_value = "/etc/wirey/privkey")]
    private_key_path: PathBuf,

    /// The time to wait between checks for new peers in the registry
    #[arg(long, env = "WIREY_PEER_CHECK_TTL", default_value = "30s")]
    peer_check_ttl: Timestring,

    /// Extra allowed ips (CIDR) this peer routes for
    #[arg(long, env = "WIREY_ALLOWED_IPS", value_delimiter = ',')]
    allowed_ips: Vec<String>,

    /// etcd endpoints to use as the registry
    #[arg(long, env = "WIREY_ETCD", value_delimiter = ',')]
    etcd: Vec<String>,

    /// Consul address to use as the registry, e.g: http://127.0.0.1:8500
    #[arg(long, env = "WIREY_CONSUL")]
    consul: Option<String>,

    /// Consul ACL token
    #[arg(long, env = "WIREY_CONSUL_TOKEN")]
    consul_token: Option<String>,

    /// Base URL of an HTTP registry, see also --http-basic-auth if you
    /// need basic authentication
    #[arg(long, env = "WIREY_HTTP")]
    http: Option<String>,

    /// Basic auth for the HTTP registry, in form username:password
    #[arg(long, env = "WIREY_HTTP_BASIC_AUTH")]
    http_basic_auth: Option<String>,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Print the current wirey version
    Version,
}

fn main() {
    let opts = Opts::parse();
    util::init_logger(opts.verbose);

    if let Some(Command::Version) = opts.command {
        println!("{VERSION}");
        return;
    }

    if let Err(e) = run(&opts) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(opts: &Opts) -> Result<(), Error> {
    let registry = backend_factory(opts)?;

    let endpoint = opts
        .endpoint
        .as_deref()
        .ok_or_else(|| anyhow!("--endpoint is required"))?;
    let ipaddr = opts
        .ipaddr
        .as_deref()
        .ok_or_else(|| anyhow!("--ipaddr is required"))?;

    if let Some(parent) = opts.private_key_path.parent() {
        shared::ensure_dirs_exist(&[parent], 0o600).map_err(|e| {
            anyhow!(
                "unable to create the base directory for the wirey private key: {} - {}",
                parent.to_string_lossy(),
                e
            )
        })?;
    }

    // Screen the allowed-IPs up front; a bad entry is dropped, not fatal.
    let mut allowed_ips = Vec::new();
    for cidr in &opts.allowed_ips {
        match cidr.parse::<IpNet>() {
            Ok(_) => allowed_ips.push(cidr.clone()),
            Err(e) => log::error!("not valid allowed ip {cidr:?}: {e}"),
        }
    }

    let mut tunnel = Tunnel::new(
        registry,
        Box::new(SystemLinkManager),
        Box::new(SystemWg),
        TunnelConfig {
            ifname: opts.ifname.clone(),
            endpoint: format!("{}:{}", endpoint, opts.endpoint_port),
            ipaddr: ipaddr.to_string(),
            private_key_path: opts.private_key_path.clone(),
            peer_check_ttl: opts.peer_check_ttl.clone().into(),
            allowed_ips,
        },
    )?;

    // connect() blocks for the lifetime of the process; it only hands an
    // error back once the engine has given up.
    Err(tunnel.connect().into())
}

fn backend_factory(opts: &Opts) -> Result<Box<dyn Backend>, Error> {
    if !opts.etcd.is_empty() {
        return Ok(Box::new(EtcdBackend::new(opts.etcd.clone())));
    }

    if let Some(consul) = &opts.consul {
        let backend = ConsulBackend::new(consul.clone(), opts.consul_token.clone())?;
        return Ok(Box::new(backend));
    }

    if let Some(http) = &opts.http {
        let mut backend = HttpBackend::new(http.clone());
        if let Some(credentials) = &opts.http_basic_auth {
            let (username, password) = credentials.split_once(':').ok_or_else(|| {
                anyhow!("the provided basic auth credentials are not in format username:password")
            })?;
            backend = backend.with_basic_auth(BasicAuth {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
        return Ok(Box::new(backend));
    }

    bail!("no registry backend selected, available backends: [etcd, consul, http]")
}
