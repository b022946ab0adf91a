use bytemuck::{Pod, Zeroable};
use zstd::{bulk, stream::copy_encode};

use super::StudyConfiguration;
use crate::error::{ConfigError, Result};

pub const CONFIG_MAGIC: &[u8; 6] = b"VCSCFG";
pub const CONFIG_FORMAT_VERSION: u16 = 1;

/// Upper bound on the declared uncompressed size of a configuration body
const MAX_CONFIG_BYTES: u64 = 256 * 1024 * 1024;

/// Fixed header in front of every stored configuration body
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ConfigHeader {
    magic: [u8; 6],
    format_version: u16,
    pub study_id: u32,
    padding: [u8; 4],

    // configuration version this blob was written as
    pub version: u64,

    // body length before and after compression
    pub u_bytes: u64,
    pub z_bytes: u64,
}
pub const CONFIG_HEADER_SIZE: usize = std::mem::size_of::<ConfigHeader>();

impl ConfigHeader {
    fn new(study_id: u32, version: u64, u_bytes: usize, z_bytes: usize) -> Self {
        Self {
            magic: *CONFIG_MAGIC,
            format_version: CONFIG_FORMAT_VERSION,
            study_id,
            padding: [0; 4],
            version,
            u_bytes: u_bytes as u64,
            z_bytes: z_bytes as u64,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads and validates a header from the front of a blob
    ///
    /// Blobs come back from stores with no alignment guarantee, so the header
    /// is copied out rather than cast in place.
    pub fn from_bytes(study_id: u32, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CONFIG_HEADER_SIZE {
            return Err(corrupt(study_id, "blob shorter than header"));
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..CONFIG_HEADER_SIZE]);
        if header.magic != *CONFIG_MAGIC {
            return Err(corrupt(study_id, "invalid magic"));
        }
        if header.format_version != CONFIG_FORMAT_VERSION {
            return Err(corrupt(study_id, "unsupported format version"));
        }
        if header.study_id != study_id {
            return Err(corrupt(study_id, "blob belongs to another study"));
        }
        Ok(header)
    }
}

fn corrupt(study_id: u32, reason: &str) -> crate::Error {
    ConfigError::CorruptConfiguration {
        study_id,
        reason: reason.to_string(),
    }
    .into()
}

/// Serializes a configuration as the blob stored under `version`
pub fn encode_configuration(
    config: &StudyConfiguration,
    version: u64,
    level: i32,
) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(config)?;
    let mut z_body = Vec::new();
    copy_encode(body.as_slice(), &mut z_body, level)?;

    let header = ConfigHeader::new(config.study_id(), version, body.len(), z_body.len());
    let mut blob = Vec::with_capacity(CONFIG_HEADER_SIZE + z_body.len());
    blob.extend_from_slice(header.as_bytes());
    blob.extend_from_slice(&z_body);
    Ok(blob)
}

/// Parses a stored blob back into a configuration
///
/// `version` is the version the store reports for the blob. A header written
/// for any other version means the blob and its version cell disagree.
pub fn decode_configuration(study_id: u32, version: u64, blob: &[u8]) -> Result<StudyConfiguration> {
    let header = ConfigHeader::from_bytes(study_id, blob)?;
    if header.version != version {
        return Err(corrupt(study_id, "header version does not match stored version"));
    }
    let z_body = &blob[CONFIG_HEADER_SIZE..];
    if z_body.len() as u64 != header.z_bytes {
        return Err(corrupt(study_id, "compressed length mismatch"));
    }

    if header.u_bytes > MAX_CONFIG_BYTES {
        return Err(corrupt(study_id, "declared size too large"));
    }

    // output is capped at the declared length
    let body = bulk::decompress(z_body, header.u_bytes as usize)
        .map_err(|_| corrupt(study_id, "invalid zstd frame"))?;
    if body.len() as u64 != header.u_bytes {
        return Err(corrupt(study_id, "uncompressed length mismatch"));
    }

    let mut config: StudyConfiguration = serde_json::from_slice(&body)?;
    if config.study_id() != study_id {
        return Err(corrupt(study_id, "body belongs to another study"));
    }
    config
        .rebuild_index()
        .map_err(|reason| ConfigError::CorruptConfiguration { study_id, reason })?;
    config.version = version;
    Ok(config)
}
