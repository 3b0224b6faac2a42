use std::fmt::Write as _;

/// The `[Interface]` section of a rendered configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub listen_port: u16,
    /// Private key text as emitted by the key tool.
    pub private_key: String,
}

/// One `[Peer]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: String,
    /// Comma-joined CIDR list.
    pub allowed_ips: String,
    pub endpoint: String,
}

/// An in-memory WireGuard configuration, ready to be rendered for
/// `wg setconf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub interface: InterfaceConfig,
    pub peers: Vec<PeerConfig>,
}

impl Configuration {
    /// Serialize to the text format consumed by `wg setconf`.
    ///
    /// Identical inputs produce byte-identical output, and peers are
    /// emitted in the order supplied. Key material is trimmed of the
    /// trailing newline the tool emits.
    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "[Interface]").ok();
        writeln!(out, "ListenPort = {}", self.interface.listen_port).ok();
        writeln!(out, "PrivateKey = {}", self.interface.private_key.trim_end()).ok();

        for peer in &self.peers {
            writeln!(out).ok();
            writeln!(out, "[Peer]").ok();
            writeln!(out, "PublicKey = {}", peer.public_key.trim_end()).ok();
            writeln!(out, "AllowedIPs = {}", peer.allowed_ips).ok();
            writeln!(out, "Endpoint = {}", peer.endpoint).ok();
        }

        out
    }
}
