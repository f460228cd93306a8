// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Length-prefixed framing shared by control messages and bulk entry
//! streams: `varuint32 length || payload`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// LEB128-style unsigned varint, capped at 32 bits (five 7-bit groups).
fn encode_varuint32(mut value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out
}

async fn read_varuint32<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        result |= ((byte[0] & 0x7f) as u32) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 35 {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "varuint32 overflow"));
        }
    }
    Ok(result)
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> std::io::Result<()> {
    writer.write_all(&encode_varuint32(payload.len() as u32)).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame's payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = read_varuint32(reader).await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Sentinel written after the last entry of a bulk stream.
pub async fn write_bulk_end<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    write_frame(writer, &[]).await
}

/// Reads one bulk-stream element, returning `None` once the end sentinel
/// (a zero-length frame) is reached.
pub async fn read_bulk_entry<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let frame = read_frame(reader).await?;
    if frame.is_empty() {
        Ok(None)
    } else {
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn frame_round_trips_small_and_large_payloads() {
        for size in [0usize, 1, 127, 128, 16384] {
            let payload = vec![7u8; size];
            let mut buf = Vec::new();
            write_frame(&mut buf, &payload).await.unwrap();
            let mut cursor = Cursor::new(buf);
            let read_back = read_frame(&mut cursor).await.unwrap();
            assert_eq!(read_back, payload);
        }
    }

    #[tokio::test]
    async fn bulk_stream_ends_at_sentinel() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"one").await.unwrap();
        write_frame(&mut buf, b"two").await.unwrap();
        write_bulk_end(&mut buf).await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_bulk_entry(&mut cursor).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(read_bulk_entry(&mut cursor).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(read_bulk_entry(&mut cursor).await.unwrap(), None);
    }
}
