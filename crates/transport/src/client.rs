//! Outbound HTTP to peer nodes.

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::{
    HEADER_AGENT_HASH, HEADER_AGENT_NAME, HEADER_AGENT_TYPE, HEADER_COMPRESSION, HEADER_CUT_PATH,
    HEADER_FILE_NAME, HEADER_FILE_SIZE, HEADER_HASH, HEADER_REQUEST_TYPE,
};
use sharemesh_protocol::types::AgentClass;

use crate::{TransportError, compress};

/// Local identity presented on outbound requests.
///
/// The hash and name offered match the class of the peer being
/// addressed: device peers see the device identity, user peers the
/// user identity.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub hash_device: String,
    pub hash_user: String,
    pub name_device: String,
    pub name_user: String,
}

impl NodeIdentity {
    fn hash_for(&self, class: AgentClass) -> &str {
        match class {
            AgentClass::User => &self.hash_user,
            AgentClass::Device | AgentClass::Browser => &self.hash_device,
        }
    }

    fn name_for(&self, class: AgentClass) -> &str {
        match class {
            AgentClass::User => &self.name_user,
            AgentClass::Device | AgentClass::Browser => &self.name_device,
        }
    }
}

/// One file pulled from a source agent, bytes still in wire form.
#[derive(Debug)]
pub struct FilePayload {
    bytes: Vec<u8>,
    pub compressed: bool,
    /// Absolute path on the source, echoed for cut bookkeeping.
    pub cut_path: String,
    /// Destination path relative to the write root.
    pub file_name: String,
    pub file_size: u64,
    /// SHA3-512 of the uncompressed bytes, computed by the source.
    pub hash: String,
}

impl FilePayload {
    /// The file bytes, decompressed when the source compressed them.
    pub fn into_bytes(self) -> Result<Vec<u8>, TransportError> {
        if self.compressed {
            Ok(compress::decompress(&self.bytes)?)
        } else {
            Ok(self.bytes)
        }
    }

    /// The bytes exactly as they travelled, for relaying without a
    /// decompress/recompress cycle.
    pub fn into_wire_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// HTTP client for node-to-node traffic.
///
/// Every request carries the identity headers plus `request-type`
/// naming the service, and the per-service timeout.
pub struct NodeClient {
    client: reqwest::Client,
    identity: NodeIdentity,
}

impl NodeClient {
    pub fn new(identity: NodeIdentity) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, identity })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    fn post(
        &self,
        address: &str,
        target: AgentClass,
        message: &ServiceMessage,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let body = serde_json::to_string(message)?;
        Ok(self
            .client
            .post(format!("http://{address}/"))
            .header(HEADER_AGENT_HASH, self.identity.hash_for(target))
            .header(HEADER_AGENT_NAME, self.identity.name_for(target))
            .header(HEADER_AGENT_TYPE, target.as_str())
            .header(HEADER_REQUEST_TYPE, message.service.as_str())
            .timeout(message.service.timeout())
            .body(body))
    }

    /// Sends an envelope and returns the reply body.
    ///
    /// For manifest deliveries the reply is the write side's final
    /// status, so this call can be outstanding for as long as the
    /// copy timeout allows.
    pub async fn send(
        &self,
        address: &str,
        target: AgentClass,
        message: &ServiceMessage,
    ) -> Result<String, TransportError> {
        let response = self.post(address, target, message)?.send().await?;
        Ok(response.text().await?)
    }

    /// Pulls one file's bytes, reading the transfer metadata from the
    /// response headers.
    pub async fn fetch_file(
        &self,
        address: &str,
        target: AgentClass,
        message: &ServiceMessage,
    ) -> Result<FilePayload, TransportError> {
        let response = self.post(address, target, message)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::RemoteStatus(status.as_u16()));
        }
        let compressed = header_value(&response, HEADER_COMPRESSION)? == "true";
        let cut_path = header_value(&response, HEADER_CUT_PATH)?;
        let file_name = header_value(&response, HEADER_FILE_NAME)?;
        let file_size = header_value(&response, HEADER_FILE_SIZE)?
            .parse::<u64>()
            .unwrap_or(0);
        let hash = header_value(&response, HEADER_HASH)?;
        let bytes = response.bytes().await?.to_vec();
        Ok(FilePayload {
            bytes,
            compressed,
            cut_path,
            file_name,
            file_size,
            hash,
        })
    }
}

fn header_value(response: &reqwest::Response, name: &'static str) -> Result<String, TransportError> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or(TransportError::MissingHeader(name))
}
