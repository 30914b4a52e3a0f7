use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::Service;

/// Envelope wrapping every message that crosses the wire, over HTTP
/// bodies and socket text frames alike.
///
/// The `data` field uses `serde_json::value::RawValue` so the payload is
/// decoded once, by the handler that knows its shape. Decoding the
/// envelope itself is the fail-closed gate: an unknown `service` name
/// fails here and the connection is destroyed without a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub service: Service,
    pub data: Box<RawValue>,
}

impl ServiceMessage {
    /// Wraps a payload for the given service.
    pub fn new<T: Serialize>(service: Service, data: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(data)?;
        Ok(Self {
            service,
            data: RawValue::from_string(json)?,
        })
    }

    /// Decodes the payload into the handler's type.
    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.data.get())
    }
}
