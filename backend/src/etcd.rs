use crate::{classify, user_agent, Backend, BackendError};
use serde::Deserialize;
use serde_json::json;
use shared::Peer;
use std::time::Duration;
use ureq::{Agent, AgentBuilder};

const KV_PREFIX: &str = "/wirey";

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    value: String,
}

/// Driver for etcd v3, spoken over its gRPC JSON gateway. Endpoints are
/// tried in order until one answers.
pub struct EtcdBackend {
    agent: Agent,
    endpoints: Vec<String>,
}

impl EtcdBackend {
    pub fn new(endpoints: Vec<String>) -> Self {
        // Membership records are tiny; store operations carry a short
        // deadline and the engine retries on its own schedule.
        let agent = AgentBuilder::new()
            .timeout(Duration::from_secs(1))
            .user_agent(&user_agent())
            .build();

        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| {
                let endpoint = endpoint.trim_end_matches('/').to_string();
                if endpoint.contains("://") {
                    endpoint
                } else {
                    format!("http://{endpoint}")
                }
            })
            .collect();

        Self { agent, endpoints }
    }

    fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        operation: &'static str,
    ) -> Result<ureq::Response, BackendError> {
        let mut last = None;
        for endpoint in &self.endpoints {
            match self.agent.post(&format!("{endpoint}{path}")).send_json(body.clone()) {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log::debug!("etcd endpoint {endpoint} failed: {e}");
                    last = Some(classify(operation, e));
                },
            }
        }
        Err(last.unwrap_or(BackendError::NoEndpoints))
    }
}

/// The exclusive upper bound of a prefix scan, per the etcd convention:
/// the prefix with its last non-0xff byte incremented.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    for i in (0..end.len()).rev() {
        if end[i] < 0xff {
            end[i] += 1;
            end.truncate(i + 1);
            return end;
        }
    }
    vec![0]
}

impl Backend for EtcdBackend {
    fn join(&self, ifname: &str, peer: &Peer) -> Result<(), BackendError> {
        let key_text = String::from_utf8_lossy(&peer.public_key);
        let key = format!("{}/{}/{}", KV_PREFIX, ifname, key_text.trim_end());
        let body = json!({
            "key": base64::encode(key),
            "value": base64::encode(serde_json::to_vec(peer)?),
        });

        self.post("/v3/kv/put", body, "join")?;
        Ok(())
    }

    fn get_peers(&self, ifname: &str) -> Result<Vec<Peer>, BackendError> {
        let prefix = format!("{}/{}/", KV_PREFIX, ifname);
        let body = json!({
            "key": base64::encode(&prefix),
            "range_end": base64::encode(prefix_range_end(prefix.as_bytes())),
        });

        let response = self.post("/v3/kv/range", body, "get peers")?;
        let range: RangeResponse = response.into_json()?;

        let mut peers = Vec::with_capacity(range.kvs.len());
        for kv in range.kvs {
            let raw = base64::decode(&kv.value)?;
            peers.push(serde_json::from_slice(&raw)?);
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_end_increments_the_last_byte() {
        assert_eq!(prefix_range_end(b"/wirey/wg0/"), b"/wirey/wg0\x30");
        assert_eq!(prefix_range_end(b"a"), b"b");
        assert_eq!(prefix_range_end(b"a\xff"), b"b");
        assert_eq!(prefix_range_end(b"\xff"), b"\x00");
    }

    #[test]
    fn endpoints_are_normalized_with_a_scheme() {
        let backend = EtcdBackend::new(vec![
            "127.0.0.1:2379".to_string(),
            "https://etcd.internal:2379/".to_string(),
        ]);
        assert_eq!(
            backend.endpoints,
            vec![
                "http://127.0.0.1:2379".to_string(),
                "https://etcd.internal:2379".to_string(),
            ]
        );
    }
}
