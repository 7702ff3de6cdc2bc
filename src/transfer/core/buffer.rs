use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::error::{Result, TransferError};

/// Length of the parameter header at the front of a synthesized packet.
pub const HEADER_LEN: usize = 8;

/// Transfer parameters carried in the first bytes of a raw-packet payload.
///
/// Layout: `packet_count` then `packet_size`, both `u32` little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_count: u32,
    pub packet_size: u32,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.packet_count.to_le_bytes());
        out[4..].copy_from_slice(&self.packet_size.to_le_bytes());
        out
    }

    /// Reads the header from the front of `payload`. Returns `None` when the
    /// payload is too short to carry one.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < HEADER_LEN {
            return None;
        }
        let packet_count = u32::from_le_bytes(payload[0..4].try_into().ok()?);
        let packet_size = u32::from_le_bytes(payload[4..8].try_into().ok()?);
        Some(Self {
            packet_count,
            packet_size,
        })
    }
}

/// Where the bytes of a [`TransferBuffer`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSource {
    File,
    Synthetic,
    Receive,
}

/// The single buffer a session posts for every operation.
#[derive(Debug)]
pub struct TransferBuffer {
    data: Vec<u8>,
    source: BufferSource,
}

impl TransferBuffer {
    /// Loads a whole file. The buffer is exactly as long as the file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| TransferError::io("open", path, e))?;
        let len = file
            .metadata()
            .map_err(|e| TransferError::io("stat", path, e))?
            .len() as usize;

        let mut data = allocate(len)?;
        file.read_to_end(&mut data)
            .map_err(|e| TransferError::io("read", path, e))?;

        log::debug!("Loaded {} bytes from {}", data.len(), path.display());
        Ok(Self {
            data,
            source: BufferSource::File,
        })
    }

    /// Builds one packet of `packet_size` bytes filled with `fill`, with the
    /// transfer parameters written over the first [`HEADER_LEN`] bytes.
    pub fn synthesize(fill: u8, packet_size: u32, packet_count: u32) -> Result<Self> {
        let size = packet_size as usize;
        if size < HEADER_LEN {
            return Err(TransferError::InvalidParameters(format!(
                "packet size {} is smaller than the {} byte header",
                packet_size, HEADER_LEN
            )));
        }

        let mut data = allocate(size)?;
        data.resize(size, fill);

        let header = PacketHeader {
            packet_count,
            packet_size,
        };
        data[..HEADER_LEN].copy_from_slice(&header.encode());

        Ok(Self {
            data,
            source: BufferSource::Synthetic,
        })
    }

    /// A zeroed buffer for receiving into.
    pub fn for_receive(capacity: usize) -> Result<Self> {
        let mut data = allocate(capacity)?;
        data.resize(capacity, 0);
        Ok(Self {
            data,
            source: BufferSource::Receive,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn source(&self) -> BufferSource {
        self.source
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The slice to post next when `offset` bytes have already been moved.
    ///
    /// The buffer repeats, so the offset wraps at its length; the slice never
    /// runs past the end of the buffer and is at most `max_len` long.
    pub fn chunk_at(&self, offset: u64, max_len: usize) -> &[u8] {
        if self.data.is_empty() {
            return &[];
        }
        let start = (offset % self.data.len() as u64) as usize;
        let end = start.saturating_add(max_len).min(self.data.len());
        &self.data[start..end]
    }
}

fn allocate(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|_| TransferError::Allocation { size })?;
    Ok(data)
}
