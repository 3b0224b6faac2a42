use crate::{classify, user_agent, Backend, BackendError};
use shared::{public_key_sha256, Peer};
use std::time::Duration;
use ureq::{Agent, AgentBuilder};

/// Credentials for HTTP basic authentication.
#[derive(Clone, Debug)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Driver for any server implementing the wirey HTTP registry contract:
/// `POST <base>/<ifname>/<publickeysha>` to join, `GET <base>/<ifname>`
/// to list.
pub struct HttpBackend {
    agent: Agent,
    base_url: String,
    basic_auth: Option<BasicAuth>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .timeout_connect(Duration::from_secs(5))
            .user_agent(&user_agent())
            .redirects(0)
            .build();

        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            basic_auth: None,
        }
    }

    pub fn with_basic_auth(mut self, auth: BasicAuth) -> Self {
        self.basic_auth = Some(auth);
        self
    }

    fn request(&self, verb: &str, url: &str) -> ureq::Request {
        let mut request = self.agent.request(verb, url);
        if let Some(auth) = &self.basic_auth {
            let credentials = base64::encode(format!("{}:{}", auth.username, auth.password));
            request = request.set("Authorization", &format!("Basic {credentials}"));
        }
        request
    }
}

impl Backend for HttpBackend {
    fn join(&self, ifname: &str, peer: &Peer) -> Result<(), BackendError> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            ifname,
            public_key_sha256(&peer.public_key)
        );

        let response = self
            .request("POST", &url)
            .set("Content-Type", "application/json")
            .send_json(serde_json::to_value(peer)?)
            .map_err(|e| classify("join", e))?;

        if response.status() != 201 {
            return Err(BackendError::Status {
                operation: "join",
                status: response.status(),
            });
        }
        Ok(())
    }

    fn get_peers(&self, ifname: &str) -> Result<Vec<Peer>, BackendError> {
        let url = format!("{}/{}", self.base_url, ifname);

        let response = self
            .request("GET", &url)
            .call()
            .map_err(|e| classify("get peers", e))?;

        if response.status() != 200 {
            return Err(BackendError::Status {
                operation: "get peers",
                status: response.status(),
            });
        }

        Ok(response.into_json()?)
    }
}
