//! Save state for the emulated chip.
//!
//! Captures register banks and ring memory using bincode serialization
//! with deflate compression. Host OS sockets cannot be persisted, so every
//! socket comes back CLOSED after a load; the firmware reopens it the same
//! way it would after a peer disconnect.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "WZES"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Chip model       |  u8 (0 = W5100, 1 = W5500)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::error::{ChipError, Result};
use crate::ChipModel;

/// Magic bytes identifying a wiznet-emu save state file.
const MAGIC: &[u8; 4] = b"WZES";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
/// Magic + version + model byte.
const HEADER_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketState {
    pub regs: Vec<u8>,
    pub tx: Vec<u8>,
    pub rx: Vec<u8>,
    pub rx_write_idx: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub common: Vec<u8>,
    pub sockets: Vec<SocketState>,
}

/// Serialize with header and deflate compression.
pub fn encode(state: &SaveState, model: ChipModel) -> Result<Vec<u8>> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(model.to_byte());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Parse a save state, verifying magic, version, and chip model.
pub fn decode(data: &[u8], expected: ChipModel) -> Result<SaveState> {
    if data.len() < HEADER_LEN {
        return Err(ChipError::Truncated);
    }
    if &data[0..4] != MAGIC {
        return Err(ChipError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(ChipError::UnsupportedVersion { found: version, expected: FORMAT_VERSION });
    }
    if data[8] != expected.to_byte() {
        let saved = ChipModel::from_byte(data[8])
            .map(|m| m.to_string())
            .unwrap_or_else(|| "?".into());
        return Err(ChipError::ModelMismatch { saved, current: expected.to_string() });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| ChipError::Decompress(format!("{:?}", e)))?;
    Ok(bincode::deserialize(&decompressed)?)
}

pub fn save_to_file(state: &SaveState, model: ChipModel, path: &Path) -> Result<()> {
    std::fs::write(path, encode(state, model)?)?;
    Ok(())
}

pub fn load_from_file(path: &Path, expected: ChipModel) -> Result<SaveState> {
    let data = std::fs::read(path)?;
    decode(&data, expected)
}
