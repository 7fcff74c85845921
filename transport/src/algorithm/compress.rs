//! Payload compression (RFC 4253 §6.2). Unlike the teacher implementation this crate
//! descends from, compression here is a genuine continuous zlib stream across the whole
//! session rather than a fresh encode/decode per packet: each packet is flushed with
//! `Z_SYNC_FLUSH` so the peer can decompress exactly the bytes received so far, and the
//! deflate window carries state between packets as the RFC requires. `libflate` (the
//! teacher's choice) only exposes one-shot `Read`/`Write` wrappers with no partial-flush
//! control, so this module uses `flate2`'s `Compress`/`Decompress` instead -- noted as a
//! dependency swap in DESIGN.md.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use strum::{AsRefStr, EnumString};

use crate::error::{Error, Result};

#[non_exhaustive]
#[derive(Debug, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum CompressionAlgorithm {
    Zlib,

    /// Compression only starts after authentication completes (RFC 4253 errata / OpenSSH).
    #[strum(serialize = "zlib@openssh.com")]
    ZlibDelayed,

    #[default]
    None,
}

impl CompressionAlgorithm {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether compression only takes effect post-authentication.
    pub fn is_delayed(&self) -> bool {
        matches!(self, Self::ZlibDelayed)
    }

    pub fn active(&self, authenticated: bool) -> bool {
        !self.is_none() && (authenticated || !self.is_delayed())
    }
}

/// Per-direction continuation state for a zlib stream.
pub enum CompressionState {
    None,
    Compress(Box<Compress>),
    Decompress(Box<Decompress>),
}

impl CompressionState {
    pub fn new_compress() -> Self {
        Self::Compress(Box::new(Compress::new(Compression::default(), true)))
    }

    pub fn new_decompress() -> Self {
        Self::Decompress(Box::new(Decompress::new(true)))
    }

    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let Self::Compress(stream) = self else {
            return Ok(input.to_vec());
        };

        let mut out = Vec::with_capacity(input.len() + 32);
        let mut chunk = [0u8; 4096];
        let mut consumed_total = 0;

        loop {
            let before_in = stream.total_in();
            let before_out = stream.total_out();

            let status = stream
                .compress(&input[consumed_total..], &mut chunk, FlushCompress::Sync)
                .map_err(|_| Error::ProtocolError("zlib compression failed".into()))?;

            consumed_total += (stream.total_in() - before_in) as usize;
            let produced = (stream.total_out() - before_out) as usize;
            out.extend_from_slice(&chunk[..produced]);

            let chunk_full = produced == chunk.len();
            match status {
                Status::Ok if consumed_total < input.len() || chunk_full => continue,
                Status::Ok | Status::StreamEnd | Status::BufError => break,
            }
        }

        Ok(out)
    }

    pub fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let Self::Decompress(stream) = self else {
            return Ok(input.to_vec());
        };

        let mut out = Vec::with_capacity(input.len() * 2 + 32);
        let mut chunk = [0u8; 4096];
        let mut consumed_total = 0;

        loop {
            let before_in = stream.total_in();
            let before_out = stream.total_out();

            let status = stream
                .decompress(&input[consumed_total..], &mut chunk, FlushDecompress::Sync)
                .map_err(|_| Error::ProtocolError("zlib decompression failed".into()))?;

            consumed_total += (stream.total_in() - before_in) as usize;
            let produced = (stream.total_out() - before_out) as usize;
            out.extend_from_slice(&chunk[..produced]);

            let chunk_full = produced == chunk.len();
            match status {
                Status::Ok if consumed_total < input.len() || chunk_full => continue,
                Status::Ok | Status::StreamEnd | Status::BufError => break,
            }
        }

        Ok(out)
    }
}
