//! The growable read/write byte buffer every wire message is built from and parsed into.
//!
//! Mirrors the "packet buffer" primitive of the binary packet protocol (RFC 4251 §5):
//! a single backing `Vec<u8>` with independent read (`rpos`) and write (`wpos`) cursors,
//! so that a buffer can be filled once by the decoder and then drained field-by-field by
//! a message parser, or filled field-by-field by a message serializer and handed whole to
//! the encoder.

use crate::error::{Error, Result};

/// A growable buffer with distinct read and write positions.
///
/// Invariant: `0 <= rpos <= wpos <= data.len()`.
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    data: Vec<u8>,
    rpos: usize,
    wpos: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer prepared for the encoder: `headroom` zero bytes are reserved before
    /// `rpos`, so the framer can later prepend `packet_length`/`padding_length` in place
    /// without reallocating or shifting the payload.
    pub fn with_headroom(headroom: usize) -> Self {
        Self {
            data: vec![0; headroom],
            rpos: headroom,
            wpos: headroom,
        }
    }

    pub fn from_payload(payload: Vec<u8>) -> Self {
        let wpos = payload.len();
        Self {
            data: payload,
            rpos: 0,
            wpos,
        }
    }

    pub fn readable(&self) -> &[u8] {
        &self.data[self.rpos..self.wpos]
    }

    pub fn headroom(&self) -> &[u8] {
        &self.data[..self.rpos]
    }

    pub fn remaining(&self) -> usize {
        self.wpos - self.rpos
    }

    pub fn rpos(&self) -> usize {
        self.rpos
    }

    /// Write `packet_length`/`padding_length` into the reserved headroom in place,
    /// consuming it (`rpos` moves backwards to the start of the header).
    pub fn prepend_header(&mut self, packet_length: u32, padding_length: u8) {
        assert!(self.rpos >= 5, "not enough headroom reserved");
        self.rpos -= 5;
        self.data[self.rpos..self.rpos + 4].copy_from_slice(&packet_length.to_be_bytes());
        self.data[self.rpos + 4] = padding_length;
    }

    pub fn extend_writable(&mut self, bytes: &[u8]) {
        self.data.truncate(self.wpos);
        self.data.extend_from_slice(bytes);
        self.wpos = self.data.len();
    }

    /// The whole backing buffer from index 0, headroom included. For a buffer built
    /// with [`Self::with_headroom`], use [`Self::readable`] instead unless the headroom
    /// itself is wanted.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.wpos);
        self.data.split_off(0)
    }

    pub fn as_full_slice(&self) -> &[u8] {
        &self.data[..self.wpos]
    }

    pub fn as_full_slice_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.wpos]
    }

    // -- putters --

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.extend_writable(&[v]);
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.put_u8(v as u8)
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.extend_writable(&v.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.extend_writable(&v.to_be_bytes());
        self
    }

    /// A length-prefixed byte string.
    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.put_u32(v.len() as u32);
        self.extend_writable(v);
        self
    }

    pub fn put_str(&mut self, v: &str) -> &mut Self {
        self.put_bytes(v.as_bytes())
    }

    /// A comma-separated, length-prefixed algorithm name-list.
    pub fn put_namelist(&mut self, names: &[String]) -> &mut Self {
        self.put_str(&names.join(","))
    }

    /// A signed, big-endian, two's-complement arbitrary precision integer (RFC 4251 §5).
    pub fn put_mpint(&mut self, magnitude_be: &[u8]) -> &mut Self {
        let mut bytes = magnitude_be;
        while bytes.first() == Some(&0) && bytes.len() > 1 {
            bytes = &bytes[1..];
        }

        if bytes.is_empty() {
            return self.put_bytes(&[]);
        }

        if bytes[0] & 0x80 != 0 {
            let mut padded = Vec::with_capacity(bytes.len() + 1);
            padded.push(0);
            padded.extend_from_slice(bytes);
            self.put_bytes(&padded)
        } else {
            self.put_bytes(bytes)
        }
    }

    pub fn put_biguint(&mut self, v: &num_bigint::BigUint) -> &mut Self {
        self.put_mpint(&v.to_bytes_be())
    }

    // -- getters --

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::ProtocolError("truncated message".into()))
        } else {
            Ok(())
        }
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let v = self.data[self.rpos];
        self.rpos += 1;
        Ok(v)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        let v = u32::from_be_bytes(self.data[self.rpos..self.rpos + 4].try_into().unwrap());
        self.rpos += 4;
        Ok(v)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        let v = u64::from_be_bytes(self.data[self.rpos..self.rpos + 8].try_into().unwrap());
        self.rpos += 8;
        Ok(v)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        let v = self.data[self.rpos..self.rpos + len].to_vec();
        self.rpos += len;
        Ok(v)
    }

    pub fn get_string(&mut self) -> Result<String> {
        String::from_utf8(self.get_bytes()?)
            .map_err(|_| Error::ProtocolError("invalid utf-8 in string field".into()))
    }

    pub fn get_namelist(&mut self) -> Result<Vec<String>> {
        let raw = self.get_string()?;
        Ok(if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(',').map(String::from).collect()
        })
    }

    pub fn get_mpint(&mut self) -> Result<Vec<u8>> {
        self.get_bytes()
    }

    pub fn get_biguint(&mut self) -> Result<num_bigint::BigUint> {
        Ok(num_bigint::BigUint::from_bytes_be(&self.get_mpint()?))
    }

    pub fn get_rest(&mut self) -> Vec<u8> {
        let rest = self.data[self.rpos..self.wpos].to_vec();
        self.rpos = self.wpos;
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_scalar_fields() {
        let mut buf = PacketBuffer::with_headroom(5);
        buf.put_u8(42).put_bool(true).put_u32(0xdead_beef).put_u64(1);

        let mut read = PacketBuffer::from_payload(buf.readable().to_vec());
        assert_eq!(read.get_u8().unwrap(), 42);
        assert!(read.get_bool().unwrap());
        assert_eq!(read.get_u32().unwrap(), 0xdead_beef);
        assert_eq!(read.get_u64().unwrap(), 1);
    }

    #[test]
    fn roundtrips_strings_and_namelists() {
        let mut buf = PacketBuffer::with_headroom(5);
        buf.put_str("Hello").put_namelist(&["a".into(), "b".into(), "c".into()]);

        let mut read = PacketBuffer::from_payload(buf.readable().to_vec());
        assert_eq!(read.get_string().unwrap(), "Hello");
        assert_eq!(read.get_namelist().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn mpint_matches_rfc4251_examples() {
        // Examples straight from RFC 4251 §5.
        let cases: &[(&[u8], &[u8])] = &[
            (&[0x00], &[]),
            (&[0x09, 0xa3, 0x78, 0xf9, 0xb2], &[0x09, 0xa3, 0x78, 0xf9, 0xb2]),
            (&[0x80], &[0x80]),
        ];

        for (magnitude, expected_without_leading_zero_fixup) in cases {
            let mut buf = PacketBuffer::with_headroom(5);
            buf.put_mpint(magnitude);
            let mut read = PacketBuffer::from_payload(buf.readable().to_vec());
            let encoded = read.get_bytes().unwrap();

            if magnitude.iter().all(|b| *b == 0) {
                assert!(encoded.is_empty());
            } else if expected_without_leading_zero_fixup[0] & 0x80 != 0 {
                assert_eq!(encoded[0], 0);
                assert_eq!(&encoded[1..], *expected_without_leading_zero_fixup);
            } else {
                assert_eq!(encoded, *expected_without_leading_zero_fixup);
            }
        }
    }

    #[test]
    fn headroom_is_reserved_and_replaced_in_place() {
        let mut buf = PacketBuffer::with_headroom(5);
        buf.put_str("payload");
        assert_eq!(buf.headroom(), &[0, 0, 0, 0, 0]);

        buf.prepend_header(11, 4);
        assert_eq!(&buf.as_full_slice()[0..4], &11u32.to_be_bytes());
        assert_eq!(buf.as_full_slice()[4], 4);
    }

    #[test]
    fn truncated_read_errors_instead_of_panicking() {
        let mut buf = PacketBuffer::from_payload(vec![0, 0, 0, 5, b'h', b'i']);
        assert!(buf.get_string().is_err());
    }
}
