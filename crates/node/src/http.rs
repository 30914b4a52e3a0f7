//! The HTTP listener: POST carries service envelopes, GET answers a
//! short status document.
//!
//! A request whose body does not decode into an envelope gets no
//! answer at all; the connection is dropped so the caller sees the
//! stream end, matching how the socket side destroys violators.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::types::AgentClass;
use sharemesh_transport::{Transmit, json_response};
use sharemesh_websocket::MAX_PAYLOAD;

use crate::NodeError;
use crate::node::{LinkAddresses, Node};

/// What GET reports about a node.
#[derive(Serialize)]
struct NodeInfo {
    agents: AgentCounts,
    name: String,
    version: &'static str,
}

#[derive(Serialize)]
struct AgentCounts {
    device: usize,
    user: usize,
}

pub(crate) async fn run(node: Arc<Node>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = node.cancel().cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let local = stream
                        .local_addr()
                        .map_or_else(|_| peer.ip(), |address| address.ip());
                    let link = LinkAddresses { local, remote: peer.ip() };
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |request| {
                            let node = Arc::clone(&node);
                            async move { handle(node, link, request).await }
                        });
                        if let Err(error) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(remote = %link.remote, "http exchange ended: {error}");
                        }
                    });
                }
                Err(error) => warn!("http accept failed: {error}"),
            },
        }
    }
}

/// One request. Returning an error makes hyper hang up without
/// writing a response, which is exactly what protocol violations get.
async fn handle(
    node: Arc<Node>,
    link: LinkAddresses,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, NodeError> {
    let method = request.method().clone();
    match method {
        Method::POST => post(node, link, request).await,
        Method::GET => info(&node),
        _ => Ok(json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            String::new(),
        )),
    }
}

async fn post(
    node: Arc<Node>,
    link: LinkAddresses,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, NodeError> {
    let body = Limited::new(request.into_body(), MAX_PAYLOAD)
        .collect()
        .await
        .map_err(|error| NodeError::Body(error.to_string()))?
        .to_bytes();
    let envelope: ServiceMessage =
        serde_json::from_slice(&body).map_err(|error| NodeError::Body(error.to_string()))?;

    let (transmit, receiver) = Transmit::http();
    crate::dispatch::apply(&node, envelope, &transmit, link).await;
    receiver.await.map_err(|_| NodeError::NoResponse)
}

/// The status document: node name, build version and directory sizes.
fn info(node: &Node) -> Result<Response<Full<Bytes>>, NodeError> {
    let info = NodeInfo {
        agents: AgentCounts {
            device: node.directory.all(AgentClass::Device).len(),
            user: node.directory.all(AgentClass::User).len(),
        },
        name: node.identity.name_device.clone(),
        version: env!("CARGO_PKG_VERSION"),
    };
    Ok(json_response(StatusCode::OK, serde_json::to_string(&info)?))
}
