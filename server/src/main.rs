//! An ephemeral in-memory registry implementing the wirey HTTP backend
//! contract: `POST /<ifname>/<publickeysha>` upserts a peer, and
//! `GET /<ifname>` lists the members of that tunnel.

use clap::Parser;
use hyper::{header, http, server::conn::AddrStream, Body, Method, Request, Response, StatusCode};
use parking_lot::RwLock;
use shared::Peer;
use std::{collections::HashMap, env, net::SocketAddr, sync::Arc};
use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Peer records are a few hundred bytes of JSON; anything bigger is
/// rejected before parsing.
const MAX_PEER_BODY: usize = 8 * 1024;

#[derive(Debug, Parser)]
#[command(name = "wirey-server", version, about = "reference HTTP registry for wirey agents")]
struct Opts {
    /// Address to listen on
    #[arg(short, long, env = "WIREY_SERVER_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

/// Peers per interface name, keyed by the public-key SHA the agent puts in
/// the join URL. The key collapses duplicate joins into upserts.
type Store = Arc<RwLock<HashMap<String, HashMap<String, Peer>>>>;

#[derive(Debug, Error)]
enum ServerError {
    #[error("object not found")]
    NotFound,

    #[error("peer body too large")]
    BodyTooLarge,

    #[error("JSON parsing/serialization error")]
    Json(#[from] serde_json::Error),

    #[error("generic HTTP error")]
    Http(#[from] http::Error),

    #[error("generic hyper error")]
    Hyper(#[from] hyper::Error),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Json(_) => StatusCode::BAD_REQUEST,
            ServerError::Http(_) | ServerError::Hyper(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_response(self) -> Result<Response<Body>, http::Error> {
        Response::builder().status(self.status()).body(Body::empty())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();
    let opts = Opts::parse();

    // Just an ephemeral store; agents re-advertise themselves anyway.
    let store: Store = Arc::new(RwLock::new(HashMap::new()));

    let make_svc = hyper::service::make_service_fn(move |socket: &AddrStream| {
        let remote_addr = socket.remote_addr();
        let store = store.clone();
        async move {
            Ok::<_, http::Error>(hyper::service::service_fn(move |req: Request<Body>| {
                log::debug!("{} - {} {}", &remote_addr, req.method(), req.uri());
                service(req, store.clone())
            }))
        }
    });

    log::info!("wirey-server {} listening on {}", VERSION, opts.listen);
    hyper::Server::bind(&opts.listen).serve(make_svc).await?;

    Ok(())
}

async fn service(req: Request<Body>, store: Store) -> Result<Response<Body>, http::Error> {
    match routes(req, store).await {
        Ok(response) => Ok(response),
        Err(error) => error.into_response(),
    }
}

async fn routes(req: Request<Body>, store: Store) -> Result<Response<Body>, ServerError> {
    let components: Vec<String> = req
        .uri()
        .path()
        .trim_start_matches('/')
        .split('/')
        .map(String::from)
        .collect();

    let method = req.method().clone();
    match (&method, components.as_slice()) {
        (&Method::GET, [ifname]) if !ifname.is_empty() => list_peers(ifname, store),
        (&Method::POST, [ifname, key_sha]) if !ifname.is_empty() && !key_sha.is_empty() => {
            let (ifname, key_sha) = (ifname.clone(), key_sha.clone());
            join(ifname, key_sha, req.into_body(), store).await
        },
        _ => Err(ServerError::NotFound),
    }
}

fn list_peers(ifname: &str, store: Store) -> Result<Response<Body>, ServerError> {
    let store = store.read();
    let peers: Vec<&Peer> = store
        .get(ifname)
        .map(|members| members.values().collect())
        .unwrap_or_default();

    let json = serde_json::to_string(&peers)?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))?)
}

async fn join(
    ifname: String,
    key_sha: String,
    body: Body,
    store: Store,
) -> Result<Response<Body>, ServerError> {
    let peer = read_peer(body).await?;
    log::debug!("join from {} under {}", peer.endpoint, ifname);

    store.write().entry(ifname).or_default().insert(key_sha, peer);

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .body(Body::empty())?)
}

async fn read_peer(body: Body) -> Result<Peer, ServerError> {
    let bytes = hyper::body::to_bytes(body).await?;
    if bytes.len() > MAX_PEER_BODY {
        return Err(ServerError::BodyTooLarge);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn empty_store() -> Store {
        Arc::new(RwLock::new(HashMap::new()))
    }

    fn sample_peer() -> Peer {
        Peer {
            public_key: b"Rg3XQfzH0LWuUBy/MHZxMcCLxiMaE5BS1hY/pncQ0G4=\n".to_vec(),
            endpoint: "172.31.23.163:50113".parse().unwrap(),
            ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            allowed_ips: vec![],
        }
    }

    fn join_request(ifname: &str, sha: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("http://registry/{ifname}/{sha}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn join_then_list() {
        let store = empty_store();
        let peer = sample_peer();
        let body = serde_json::to_string(&peer).unwrap();

        let res = routes(join_request("wg0", "abc123", body), store.clone())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let req = Request::builder()
            .uri("http://registry/wg0")
            .body(Body::empty())
            .unwrap();
        let res = routes(req, store).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let peers: Vec<Peer> = serde_json::from_slice(&body).unwrap();
        assert_eq!(peers, vec![peer]);
    }

    #[tokio::test]
    async fn joining_twice_under_the_same_key_upserts() {
        let store = empty_store();
        let mut peer = sample_peer();

        let body = serde_json::to_string(&peer).unwrap();
        routes(join_request("wg0", "abc123", body), store.clone())
            .await
            .unwrap();

        peer.endpoint = "172.31.23.163:50999".parse().unwrap();
        let body = serde_json::to_string(&peer).unwrap();
        routes(join_request("wg0", "abc123", body), store.clone())
            .await
            .unwrap();

        assert_eq!(store.read().get("wg0").unwrap().len(), 1);
        assert_eq!(
            store.read().get("wg0").unwrap()["abc123"].endpoint,
            peer.endpoint
        );
    }

    #[tokio::test]
    async fn unknown_interfaces_list_as_empty() {
        let req = Request::builder()
            .uri("http://registry/missing")
            .body(Body::empty())
            .unwrap();
        let res = routes(req, empty_store()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let peers: Vec<Peer> = serde_json::from_slice(&body).unwrap();
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn unroutable_paths_are_not_found() {
        for (method, uri) in [
            (Method::GET, "http://registry/"),
            (Method::GET, "http://registry/wg0/abc123/extra"),
            (Method::PUT, "http://registry/wg0"),
        ] {
            let req = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let error = routes(req, empty_store()).await.unwrap_err();
            assert!(matches!(error, ServerError::NotFound));
        }
    }

    #[tokio::test]
    async fn malformed_join_bodies_are_rejected() {
        let res = routes(
            join_request("wg0", "abc123", "not json".to_string()),
            empty_store(),
        )
        .await;
        assert!(matches!(res, Err(ServerError::Json(_))));
    }

    #[tokio::test]
    async fn oversized_join_bodies_are_rejected() {
        let res = routes(
            join_request("wg0", "abc123", "x".repeat(MAX_PEER_BODY + 1)),
            empty_store(),
        )
        .await;
        assert!(matches!(res, Err(ServerError::BodyTooLarge)));
    }
}
