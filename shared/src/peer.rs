use crate::Endpoint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::Ipv4Addr;

/// The advertised record of one tunnel member, as stored in the registry.
///
/// Field names and their order are the wire schema: every driver stores
/// exactly this JSON, and the membership fingerprint hashes it, so changes
/// here are protocol changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Public key material, exactly as emitted by the key tool.
    #[serde(rename = "PublicKey", with = "base64_bytes")]
    pub public_key: Vec<u8>,

    /// The underlay UDP address this peer is reachable at.
    #[serde(rename = "Endpoint")]
    pub endpoint: Endpoint,

    /// The peer's address inside the tunnel. Optional so that a record
    /// that never claimed an address is distinguishable from one that did.
    #[serde(rename = "IP")]
    pub ip: Option<Ipv4Addr>,

    /// Extra networks this peer routes for, beyond its tunnel address.
    #[serde(
        rename = "AllowedIPs",
        default,
        deserialize_with = "null_to_empty"
    )]
    pub allowed_ips: Vec<String>,
}

/// Lowercase hex SHA-256 of public-key bytes, used as the key component
/// in registry layouts that cannot carry raw key text.
pub fn public_key_sha256(key: &[u8]) -> String {
    hex::encode(Sha256::digest(key))
}

mod base64_bytes {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::decode(&encoded).map_err(D::Error::custom)
    }
}

// Some writers emit `null` rather than `[]` for an absent list.
fn null_to_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_peer() -> Peer {
        Peer {
            public_key: b"Rg3XQfzH0LWuUBy/MHZxMcCLxiMaE5BS1hY/pncQ0G4=\n".to_vec(),
            endpoint: "172.31.23.163:50113".parse().unwrap(),
            ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            allowed_ips: vec!["10.1.0.0/24".to_string()],
        }
    }

    #[test]
    fn peer_json_round_trip() {
        let peer = sample_peer();
        let encoded = serde_json::to_string(&peer).unwrap();
        let decoded: Peer = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, peer);

        let unset = Peer {
            ip: None,
            allowed_ips: vec![],
            ..sample_peer()
        };
        let encoded = serde_json::to_string(&unset).unwrap();
        let decoded: Peer = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, unset);
    }

    #[test]
    fn peer_json_field_order_is_canonical() {
        let encoded = serde_json::to_string(&sample_peer()).unwrap();
        let public_key = encoded.find("\"PublicKey\"").unwrap();
        let endpoint = encoded.find("\"Endpoint\"").unwrap();
        let ip = encoded.find("\"IP\"").unwrap();
        let allowed_ips = encoded.find("\"AllowedIPs\"").unwrap();
        assert!(public_key < endpoint && endpoint < ip && ip < allowed_ips);
    }

    #[test]
    fn peer_json_wire_shapes() {
        let encoded = serde_json::to_string(&sample_peer()).unwrap();
        // Key bytes are base64-encoded, the tunnel IP is a dotted quad.
        assert!(encoded.contains(&format!(
            "\"PublicKey\":\"{}\"",
            base64::encode(sample_peer().public_key)
        )));
        assert!(encoded.contains("\"IP\":\"10.0.0.1\""));
        assert!(encoded.contains("\"Endpoint\":\"172.31.23.163:50113\""));
    }

    #[test]
    fn allowed_ips_null_decodes_as_empty() {
        let encoded = serde_json::to_string(&sample_peer())
            .unwrap()
            .replace("[\"10.1.0.0/24\"]", "null");
        let decoded: Peer = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.allowed_ips.is_empty());
    }

    #[test]
    fn public_key_sha256_known_vector() {
        assert_eq!(
            public_key_sha256(b"test"),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }
}
