use ipnet::Ipv4Net;
use netlink_link::OperState;
use std::io;
use wgtool::{Configuration, InterfaceName, ToolError};

/// Capability the engine uses to manipulate the kernel link.
///
/// Abstracted so the engine treats the link as a capability rather than an
/// OS detail, and so tests can substitute a recorder for the netlink
/// plumbing.
pub trait LinkManager {
    /// `Ok(None)` when no link with that name exists.
    fn find_by_name(&self, name: &InterfaceName) -> Result<Option<OperState>, io::Error>;

    /// Tear down the link. Idempotent.
    fn delete(&self, name: &InterfaceName) -> Result<(), io::Error>;

    /// Create a link of kind `wireguard`; fails if one already exists.
    fn create(&self, name: &InterfaceName) -> Result<(), io::Error>;

    fn assign_address(&self, name: &InterfaceName, address: Ipv4Net) -> Result<(), io::Error>;

    fn set_up(&self, name: &InterfaceName) -> Result<(), io::Error>;
}

/// Key generation and device configuration through the WireGuard tool.
pub trait WgAdapter {
    fn generate_private_key(&self) -> Result<Vec<u8>, ToolError>;

    fn derive_public_key(&self, private_key: &[u8]) -> Result<Vec<u8>, ToolError>;

    fn apply_config(&self, name: &InterfaceName, config: &Configuration) -> Result<(), ToolError>;
}

/// The netlink-backed link manager.
pub struct SystemLinkManager;

impl LinkManager for SystemLinkManager {
    fn find_by_name(&self, name: &InterfaceName) -> Result<Option<OperState>, io::Error> {
        netlink_link::find_link(name)
    }

    fn delete(&self, name: &InterfaceName) -> Result<(), io::Error> {
        netlink_link::del_link(name)
    }

    fn create(&self, name: &InterfaceName) -> Result<(), io::Error> {
        netlink_link::add_link(name)
    }

    fn assign_address(&self, name: &InterfaceName, address: Ipv4Net) -> Result<(), io::Error> {
        netlink_link::set_addr(name, address)
    }

    fn set_up(&self, name: &InterfaceName) -> Result<(), io::Error> {
        netlink_link::set_up(name)
    }
}

/// The real `wg` subprocess adapter.
pub struct SystemWg;

impl WgAdapter for SystemWg {
    fn generate_private_key(&self) -> Result<Vec<u8>, ToolError> {
        wgtool::generate_private_key()
    }

    fn derive_public_key(&self, private_key: &[u8]) -> Result<Vec<u8>, ToolError> {
        wgtool::derive_public_key(private_key)
    }

    fn apply_config(&self, name: &InterfaceName, config: &Configuration) -> Result<(), ToolError> {
        wgtool::set_config(name, config)
    }
}
