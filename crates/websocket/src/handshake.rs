//! WebSocket opening handshake, both directions.
//!
//! Device and user peers identify themselves with `agent` and
//! `agent-type` request headers. Browsers cannot set custom headers,
//! so they smuggle their identity through the subprotocol instead:
//! `Sec-WebSocket-Protocol: browser-<hash>`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use sharemesh_protocol::constants::{
    BROWSER_PROTOCOL_PREFIX, HANDSHAKE_GUID, TEST_BROWSER_PROTOCOL,
};
use sharemesh_protocol::types::AgentClass;

use crate::error::SocketError;

/// Identity claimed by the connecting peer during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub agent: String,
    pub class: AgentClass,
    pub key: String,
    /// Echoed back in the accept response when present.
    pub protocol: Option<String>,
    /// Set for the `test-browser` subprotocol, which bypasses the
    /// directory membership check.
    pub test: bool,
}

/// Derives the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Reads and validates an upgrade request, extracting the peer's
/// identity.
pub async fn read_offer<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Offer, SocketError> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let request = line.trim_end();
    if !request.starts_with("GET ") {
        return Err(SocketError::Handshake(format!(
            "expected an upgrade request, got {request:?}"
        )));
    }

    let mut agent = None;
    let mut class = None;
    let mut key = None;
    let mut protocol = None;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "agent" => agent = Some(value.to_string()),
            "agent-type" => class = Some(value.to_string()),
            "sec-websocket-key" => key = Some(value.to_string()),
            "sec-websocket-protocol" => protocol = Some(value.to_string()),
            _ => {}
        }
    }

    let key = key.ok_or_else(|| SocketError::Handshake("missing Sec-WebSocket-Key".into()))?;

    // Browser tabs identify through the subprotocol.
    if let Some(protocol) = &protocol {
        if protocol == TEST_BROWSER_PROTOCOL {
            return Ok(Offer {
                agent: protocol.clone(),
                class: AgentClass::Browser,
                key,
                protocol: Some(protocol.clone()),
                test: true,
            });
        }
        if let Some(hash) = protocol.strip_prefix(BROWSER_PROTOCOL_PREFIX) {
            return Ok(Offer {
                agent: hash.to_string(),
                class: AgentClass::Browser,
                key,
                protocol: Some(protocol.clone()),
                test: false,
            });
        }
    }

    let agent = agent.ok_or_else(|| SocketError::Handshake("missing agent header".into()))?;
    let class = match class.as_deref() {
        Some("device") => AgentClass::Device,
        Some("user") => AgentClass::User,
        Some(other) => {
            return Err(SocketError::Handshake(format!(
                "unsupported agent-type {other:?}"
            )));
        }
        None => return Err(SocketError::Handshake("missing agent-type header".into())),
    };

    Ok(Offer {
        agent,
        class,
        key,
        protocol,
        test: false,
    })
}

/// Writes the 101 Switching Protocols response for an accepted offer.
pub async fn write_accept<W: AsyncWrite + Unpin>(
    writer: &mut W,
    offer: &Offer,
) -> Result<(), SocketError> {
    let mut response = String::from("HTTP/1.1 101 Switching Protocols\r\n");
    response.push_str("Upgrade: websocket\r\n");
    response.push_str("Connection: Upgrade\r\n");
    response.push_str(&format!(
        "Sec-WebSocket-Accept: {}\r\n",
        accept_key(&offer.key)
    ));
    if let Some(protocol) = &offer.protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    response.push_str("\r\n");
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes a refusal and a reason, for offers that fail validation.
pub async fn write_refusal<W: AsyncWrite + Unpin>(
    writer: &mut W,
    reason: &str,
) -> Result<(), SocketError> {
    let response = format!(
        "HTTP/1.1 403 Forbidden\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{reason}",
        reason.len()
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Produces a fresh base64 `Sec-WebSocket-Key` for an outbound dial.
pub fn generate_key() -> String {
    BASE64.encode(uuid::Uuid::new_v4().as_bytes())
}

/// Writes the client side of the handshake, identifying this node.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    host: &str,
    key: &str,
    agent: &str,
    class: AgentClass,
) -> Result<(), SocketError> {
    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         agent: {agent}\r\n\
         agent-type: {class}\r\n\r\n"
    );
    writer.write_all(request.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the server's accept response and checks the key digest.
pub async fn read_accept<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    key: &str,
) -> Result<(), SocketError> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let status = line.trim_end();
    if !status.contains("101") {
        return Err(SocketError::Handshake(format!(
            "upgrade refused: {status:?}"
        )));
    }

    let expected = accept_key(key);
    let mut accepted = false;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-accept") {
                accepted = value.trim() == expected;
            }
        }
    }
    if !accepted {
        return Err(SocketError::Handshake(
            "accept key does not match the offered key".into(),
        ));
    }
    Ok(())
}
