use crate::{classify, user_agent, Backend, BackendError};
use serde::Deserialize;
use shared::{public_key_sha256, Peer};
use std::time::Duration;
use ureq::{Agent, AgentBuilder};

const KV_PREFIX: &str = "wirey";

/// One entry of a Consul KV read. The API base64-encodes stored values.
#[derive(Debug, Deserialize)]
struct KvPair {
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Driver for the Consul KV store, spoken over its HTTP API.
pub struct ConsulBackend {
    agent: Agent,
    address: String,
    token: Option<String>,
}

impl ConsulBackend {
    /// Connect to the Consul agent at `address` (scheme included, e.g.
    /// `http://127.0.0.1:8500`), checking that it is reachable before
    /// returning.
    pub fn new(
        address: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, BackendError> {
        let agent = AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .user_agent(&user_agent())
            .build();

        let backend = Self {
            agent,
            address: address.into().trim_end_matches('/').to_string(),
            token,
        };

        log::info!("connecting to consul on {}", backend.address);
        backend
            .request("GET", &format!("{}/v1/status/leader", backend.address))
            .call()
            .map_err(|e| classify("consul health check", e))?;

        Ok(backend)
    }

    fn request(&self, verb: &str, url: &str) -> ureq::Request {
        let mut request = self.agent.request(verb, url);
        if let Some(token) = &self.token {
            request = request.set("X-Consul-Token", token);
        }
        request
    }

    fn key_url(&self, ifname: &str, peer: &Peer) -> String {
        format!(
            "{}/v1/kv/{}/{}/{}",
            self.address,
            KV_PREFIX,
            ifname,
            public_key_sha256(&peer.public_key)
        )
    }
}

impl Backend for ConsulBackend {
    fn join(&self, ifname: &str, peer: &Peer) -> Result<(), BackendError> {
        let url = self.key_url(ifname, peer);
        log::debug!("inserting peer at {url}");

        self.request("PUT", &url)
            .send_json(serde_json::to_value(peer)?)
            .map_err(|e| classify("join", e))?;

        Ok(())
    }

    fn get_peers(&self, ifname: &str) -> Result<Vec<Peer>, BackendError> {
        let url = format!(
            "{}/v1/kv/{}/{}?recurse=true",
            self.address, KV_PREFIX, ifname
        );

        let response = match self.request("GET", &url).call() {
            Ok(response) => response,
            // No keys under the prefix yet.
            Err(ureq::Error::Status(404, _)) => return Ok(Vec::new()),
            Err(e) => return Err(classify("get peers", e)),
        };

        let pairs: Vec<KvPair> = response.into_json()?;
        decode_pairs(pairs)
    }
}

fn decode_pairs(pairs: Vec<KvPair>) -> Result<Vec<Peer>, BackendError> {
    let mut peers = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let value = match pair.value {
            Some(value) => value,
            None => continue,
        };
        let raw = base64::decode(&value)?;
        let peer: Peer = serde_json::from_slice(&raw)?;
        log::debug!("detected peer with endpoint {}", peer.endpoint);
        peers.push(peer);
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn decodes_base64_kv_values() {
        let peer = Peer {
            public_key: b"abc".to_vec(),
            endpoint: "192.168.1.3:2345".parse().unwrap(),
            ip: Some(Ipv4Addr::new(10, 0, 0, 3)),
            allowed_ips: vec![],
        };
        let pairs: Vec<KvPair> = serde_json::from_str(&format!(
            r#"[{{"Key": "wirey/wg0/abc", "Value": "{}"}}, {{"Key": "wirey/wg0/", "Value": null}}]"#,
            base64::encode(serde_json::to_vec(&peer).unwrap())
        ))
        .unwrap();

        let peers = decode_pairs(pairs).unwrap();
        assert_eq!(peers, vec![peer]);
    }
}
