use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    net::Ipv4Addr,
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// Why an endpoint string failed validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidEndpoint {
    #[error("endpoint must be in format <ip>:<port>, like 192.168.1.3:3459")]
    Format,

    #[error("endpoint host {0:?} is not a valid IPv4 address")]
    Host(String),

    #[error("port not valid {0:?}")]
    Port(String),
}

/// An underlay endpoint: the IPv4 address and UDP port a peer is
/// reachable at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    host: Ipv4Addr,
    port: u16,
}

impl Endpoint {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    /// Parses `host:port`. Validation order matters to callers: the shape
    /// of the string is checked first, then the host, then the port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (host, port) = match parts.as_slice() {
            [host, port] => (*host, *port),
            _ => return Err(InvalidEndpoint::Format),
        };

        let host: Ipv4Addr = host
            .parse()
            .map_err(|_| InvalidEndpoint::Host(host.to_string()))?;

        let port = match port.parse::<u32>() {
            Ok(n) if n <= u16::MAX as u32 => n as u16,
            _ => return Err(InvalidEndpoint::Port(port.to_string())),
        };

        Ok(Self { host, port })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EndpointVisitor;
        impl<'de> serde::de::Visitor<'de> for EndpointVisitor {
            type Value = Endpoint;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a valid host:port endpoint")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                s.parse().map_err(serde::de::Error::custom)
            }
        }
        deserializer.deserialize_str(EndpointVisitor)
    }
}

/// A duration flag value: a number followed by a unit character,
/// e.g. `30s` or `5m`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timestring {
    timestring: String,
    seconds: u64,
}

impl Display for Timestring {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.timestring)
    }
}

impl FromStr for Timestring {
    type Err = &'static str;

    fn from_str(timestring: &str) -> Result<Self, Self::Err> {
        if timestring.len() < 2 {
            Err("timestring isn't long enough!")
        } else {
            let (n, suffix) = timestring.split_at(timestring.len() - 1);
            let n: u64 = n.parse().map_err(|_| {
                "invalid timestring (a number followed by a time unit character, eg. '30s')"
            })?;
            let multiplier = match suffix {
                "s" => Ok(1),
                "m" => Ok(60),
                "h" => Ok(60 * 60),
                "d" => Ok(60 * 60 * 24),
                "w" => Ok(60 * 60 * 24 * 7),
                _ => Err("invalid timestring suffix (must be one of 's', 'm', 'h', 'd', or 'w')"),
            }?;

            Ok(Self {
                timestring: timestring.to_string(),
                seconds: n * multiplier,
            })
        }
    }
}

impl From<Timestring> for Duration {
    fn from(timestring: Timestring) -> Self {
        Duration::from_secs(timestring.seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_validation_order() {
        assert_eq!(
            "192.168.1.3".parse::<Endpoint>(),
            Err(InvalidEndpoint::Format)
        );
        assert_eq!(
            "10.0.0.1:2345:6789".parse::<Endpoint>(),
            Err(InvalidEndpoint::Format)
        );
        assert_eq!(
            "notanip:2345".parse::<Endpoint>(),
            Err(InvalidEndpoint::Host("notanip".to_string()))
        );
        assert_eq!(
            "192.168.1.3:70000".parse::<Endpoint>(),
            Err(InvalidEndpoint::Port("70000".to_string()))
        );
        assert_eq!(
            "192.168.1.3:".parse::<Endpoint>(),
            Err(InvalidEndpoint::Port("".to_string()))
        );

        let endpoint = "192.168.1.3:2345".parse::<Endpoint>().unwrap();
        assert_eq!(endpoint.host(), Ipv4Addr::new(192, 168, 1, 3));
        assert_eq!(endpoint.port(), 2345);
    }

    #[test]
    fn endpoint_display_round_trip() {
        let endpoint: Endpoint = "172.31.23.163:50113".parse().unwrap();
        assert_eq!(endpoint.to_string(), "172.31.23.163:50113");
        assert_eq!(endpoint.to_string().parse::<Endpoint>().unwrap(), endpoint);
    }

    #[test]
    fn timestring_parsing() {
        let ttl: Timestring = "30s".parse().unwrap();
        assert_eq!(Duration::from(ttl), Duration::from_secs(30));

        let ttl: Timestring = "5m".parse().unwrap();
        assert_eq!(Duration::from(ttl), Duration::from_secs(300));

        assert!("30".parse::<Timestring>().is_err());
        assert!("s".parse::<Timestring>().is_err());
        assert!("30x".parse::<Timestring>().is_err());
    }
}
