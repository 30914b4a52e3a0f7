//! The reply channel handed to every service handler.

use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use tokio::sync::oneshot;

use sharemesh_websocket::SocketConnection;

use crate::TransportError;

type ResponseSlot = Arc<StdMutex<Option<oneshot::Sender<Response<Full<Bytes>>>>>>;

/// How a reply reaches the requester.
///
/// Handlers stay oblivious to the inbound channel: a request that came
/// in as an HTTP POST completes that exchange, one that arrived over a
/// socket goes back out as a text frame on the same socket.
#[derive(Clone)]
pub enum Transmit {
    /// A pending HTTP exchange, completed at most once.
    Http(ResponseSlot),
    /// A registered socket.
    Socket(Arc<SocketConnection>),
}

impl Transmit {
    /// Creates an HTTP transmit plus the receiver the server loop
    /// awaits while the handler runs.
    pub fn http() -> (Self, oneshot::Receiver<Response<Full<Bytes>>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Transmit::Http(Arc::new(StdMutex::new(Some(sender)))),
            receiver,
        )
    }

    pub fn socket(socket: Arc<SocketConnection>) -> Self {
        Transmit::Socket(socket)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Transmit::Http(_))
    }

    /// Sends a JSON body back to the requester.
    ///
    /// Completing an HTTP exchange twice reports
    /// [`TransportError::ResponseAlreadySent`] rather than panicking;
    /// a requester that hung up before the reply is only a debug note.
    pub async fn respond(&self, body: String) -> Result<(), TransportError> {
        match self {
            Transmit::Http(slot) => {
                let sender = slot
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or(TransportError::ResponseAlreadySent)?;
                let status = response_status(&body);
                if sender.send(json_response(status, body)).is_err() {
                    tracing::debug!("http requester went away before the response");
                }
                Ok(())
            }
            Transmit::Socket(socket) => {
                socket.send_text(&body).await?;
                Ok(())
            }
        }
    }

    /// Sends a fully built response, used for file payloads that carry
    /// transfer headers. File pulls only ever arrive over HTTP, so a
    /// socket transmit here is a routing bug.
    pub fn respond_raw(&self, response: Response<Full<Bytes>>) -> Result<(), TransportError> {
        match self {
            Transmit::Http(slot) => {
                let sender = slot
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or(TransportError::ResponseAlreadySent)?;
                if sender.send(response).is_err() {
                    tracing::debug!("http requester went away before the response");
                }
                Ok(())
            }
            Transmit::Socket(_) => Err(TransportError::ChannelMismatch),
        }
    }
}

/// Builds a JSON response. The builder cannot fail with these inputs.
pub fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Chooses the HTTP status from the reply text.
///
/// Handlers answer in prose as often as JSON, so the transport maps
/// the well-known failure phrases onto statuses for plain HTTP
/// callers. A phrase only counts when it opens the message (within
/// the first ten characters), otherwise any file listing mentioning
/// "not found" would turn into a 404.
fn response_status(body: &str) -> StatusCode {
    let head: String = body.chars().take(32).collect::<String>().to_lowercase();
    let opens_with = |phrase: &str| head.find(phrase).is_some_and(|at| at < 10);
    if opens_with("enoent") || opens_with("not found") {
        StatusCode::NOT_FOUND
    } else if opens_with("forbidden") || body == "Unexpected user." {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::OK
    }
}
