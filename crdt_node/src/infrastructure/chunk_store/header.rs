// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! On-disk framing for chunk files: `header(count:u32, minKey, maxKey)`
//! followed by length-prefixed entry records.

use crdt_storage_domain::error::StorageError;

/// The fixed-field part of a chunk file, read back without needing to know
/// the key type `K`, only its encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub count: u32,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_len_prefixed(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, StorageError> {
    let len = read_u32(buf, pos)? as usize;
    if *pos + len > buf.len() {
        return Err(StorageError::protocol("truncated length-prefixed field in chunk file"));
    }
    let bytes = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(bytes)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, StorageError> {
    if *pos + 4 > buf.len() {
        return Err(StorageError::protocol("truncated u32 in chunk file"));
    }
    let value = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(value)
}

impl ChunkHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 + self.min_key.len() + 4 + self.max_key.len());
        out.extend_from_slice(&self.count.to_le_bytes());
        write_len_prefixed(&mut out, &self.min_key);
        write_len_prefixed(&mut out, &self.max_key);
        out
    }

    /// Decodes the header from the front of `buf`, returning the header and
    /// the offset of the first entry record.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), StorageError> {
        let mut pos = 0;
        let count = read_u32(buf, &mut pos)?;
        let min_key = read_len_prefixed(buf, &mut pos)?;
        let max_key = read_len_prefixed(buf, &mut pos)?;
        Ok((Self { count, min_key, max_key }, pos))
    }
}

/// Writes one length-prefixed entry record: `len:u32 || payload`.
pub fn write_record(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Reads every length-prefixed record after the header, returning their raw
/// payload bytes in file order.
pub fn read_records(buf: &[u8], mut pos: usize) -> Result<Vec<Vec<u8>>, StorageError> {
    let mut records = Vec::new();
    while pos < buf.len() {
        let len = read_u32(buf, &mut pos)? as usize;
        if pos + len > buf.len() {
            return Err(StorageError::protocol("truncated entry record in chunk file"));
        }
        records.push(buf[pos..pos + len].to_vec());
        pos += len;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = ChunkHeader { count: 3, min_key: vec![1, 2], max_key: vec![9, 9] };
        let bytes = header.encode();
        let (decoded, offset) = ChunkHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn records_round_trip_in_order() {
        let mut buf = Vec::new();
        write_record(&mut buf, b"one");
        write_record(&mut buf, b"two");
        let records = read_records(&buf, 0).unwrap();
        assert_eq!(records, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn truncated_record_length_is_a_protocol_error() {
        let buf = vec![5, 0, 0, 0, b'a', b'b'];
        assert!(read_records(&buf, 0).is_err());
    }
}
