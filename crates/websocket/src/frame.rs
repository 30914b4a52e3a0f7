//! RFC 6455 frame codec.
//!
//! # Frame layout
//!
//! ```text
//! byte 0: [fin:1][rsv:3][opcode:4]
//! byte 1: [mask:1][len:7]
//!   len 0..=125   payload length as-is
//!   len 126       next 2 bytes BE: extended length
//!   len 127       next 8 bytes; only the low 6 are read (48-bit BE)
//! [4 bytes masking key, when mask=1]
//! [payload, XOR-masked with key byte i % 4 when mask=1]
//! ```
//!
//! Lengths above 48 bits are outside this codec's supported range.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SocketError;

/// Upper bound on a single frame payload and on a reassembled message.
pub const MAX_PAYLOAD: usize = 50 * 1024 * 1024;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Decodes the 4-bit opcode field.
    pub fn from_bits(bits: u8) -> Result<Self, SocketError> {
        match bits {
            0 => Ok(Opcode::Continuation),
            1 => Ok(Opcode::Text),
            2 => Ok(Opcode::Binary),
            8 => Ok(Opcode::Close),
            9 => Ok(Opcode::Ping),
            10 => Ok(Opcode::Pong),
            other => Err(SocketError::Protocol(format!("unknown opcode {other}"))),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0,
            Opcode::Text => 1,
            Opcode::Binary => 2,
            Opcode::Close => 8,
            Opcode::Ping => 9,
            Opcode::Pong => 10,
        }
    }

    /// Control frames are never fragmented and never buffered.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One decoded frame; the payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    /// The three reserved bits, kept so control replies can echo them.
    pub reserved: u8,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final unmasked frame carrying the whole payload.
    pub fn message(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            reserved: 0,
            opcode,
            masked: false,
            payload,
        }
    }
}

/// XORs the payload with the masking key; applying it twice restores
/// the original bytes.
pub fn mask_payload(payload: &mut [u8], key: [u8; 4]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[index % 4];
    }
}

/// Reads one complete frame from the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, SocketError> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = header[0] & 0x80 != 0;
    let reserved = (header[0] >> 4) & 0x07;
    let opcode = Opcode::from_bits(header[0] & 0x0F)?;
    let masked = header[1] & 0x80 != 0;

    let length = match header[1] & 0x7F {
        126 => {
            let mut extended = [0u8; 2];
            reader.read_exact(&mut extended).await?;
            u16::from_be_bytes(extended) as u64
        }
        127 => {
            let mut extended = [0u8; 8];
            reader.read_exact(&mut extended).await?;
            // 48-bit big-endian; the two high bytes are ignored.
            let mut length = 0u64;
            for byte in &extended[2..8] {
                length = (length << 8) | u64::from(*byte);
            }
            length
        }
        small => u64::from(small),
    };

    if length > MAX_PAYLOAD as u64 {
        return Err(SocketError::OversizedFrame(length));
    }

    let key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = key {
        mask_payload(&mut payload, key);
    }

    Ok(Frame {
        fin,
        reserved,
        opcode,
        masked,
        payload,
    })
}

/// Writes one frame, masking the payload when a key is given.
///
/// Server-to-client frames pass `None`; client-to-server frames must
/// mask.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    key: Option<[u8; 4]>,
) -> Result<(), SocketError> {
    let mut header = Vec::with_capacity(14);
    let first = (u8::from(frame.fin) << 7) | (frame.reserved << 4) | frame.opcode.bits();
    header.push(first);

    let mask_bit = if key.is_some() { 0x80u8 } else { 0 };
    let length = frame.payload.len();
    if length <= 125 {
        header.push(mask_bit | length as u8);
    } else if length <= u16::MAX as usize {
        header.push(mask_bit | 126);
        header.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        header.push(mask_bit | 127);
        header.extend_from_slice(&(length as u64).to_be_bytes());
    }

    match key {
        Some(key) => {
            header.extend_from_slice(&key);
            writer.write_all(&header).await?;
            let mut masked = frame.payload.clone();
            mask_payload(&mut masked, key);
            writer.write_all(&masked).await?;
        }
        None => {
            writer.write_all(&header).await?;
            writer.write_all(&frame.payload).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

/// Splits a payload across frames when it exceeds `threshold`, writing
/// each piece in order. A threshold of 0 disables fragmentation.
pub async fn write_fragmented<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: Opcode,
    payload: &[u8],
    threshold: usize,
    key: Option<[u8; 4]>,
) -> Result<(), SocketError> {
    if threshold == 0 || payload.len() <= threshold {
        return write_frame(writer, &Frame::message(opcode, payload.to_vec()), key).await;
    }

    let mut chunks = payload.chunks(threshold).peekable();
    let mut first = true;
    while let Some(chunk) = chunks.next() {
        let frame = Frame {
            fin: chunks.peek().is_none(),
            reserved: 0,
            opcode: if first { opcode } else { Opcode::Continuation },
            masked: key.is_some(),
            payload: chunk.to_vec(),
        };
        write_frame(writer, &frame, key).await?;
        first = false;
    }
    Ok(())
}
