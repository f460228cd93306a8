// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! WAL record framing: `len:u32 || crc32:u32 || payload`. Unlike the chunk store's framing, a truncated
//! trailing record here is not an error. It is the expected shape of a
//! segment cut short by a crash mid-`fsync`, and is discarded silently.

pub fn write_record(out: &mut Vec<u8>, payload: &[u8]) {
    let crc = crc32fast::hash(payload);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(payload);
}

pub const RECORD_OVERHEAD: usize = 8;

/// Parses every complete, checksum-valid record from the front of `buf`,
/// stopping at the first incomplete length prefix, incomplete payload, or
/// checksum mismatch.
pub fn read_records_tolerant(buf: &[u8]) -> Vec<Vec<u8>> {
    let mut pos = 0;
    let mut records = Vec::new();
    loop {
        if pos + RECORD_OVERHEAD > buf.len() {
            break;
        }
        let len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(buf[pos + 4..pos + 8].try_into().unwrap());
        let payload_start = pos + RECORD_OVERHEAD;
        let payload_end = payload_start + len;
        if payload_end > buf.len() {
            break;
        }
        let payload = &buf[payload_start..payload_end];
        if crc32fast::hash(payload) != crc {
            break;
        }
        records.push(payload.to_vec());
        pos = payload_end;
    }
    records
}
