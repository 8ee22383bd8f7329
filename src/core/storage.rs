use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"GATENET1";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Raw LZ4 block; the uncompressed size travels in the chunk header.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f64_le<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

pub fn read_f64_le<R: Read>(r: &mut R) -> io::Result<f64> {
    Ok(f64::from_le_bytes(read_exact::<8, _>(r)?))
}

/// Write an LZ4 chunk.
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

/// Read a chunk written by [`write_chunk_lz4`] whose payload must be exactly
/// `expected_len` bytes. Both header lengths are checked before any buffer is
/// allocated.
pub fn read_chunk_lz4<R: Read>(r: &mut R, expected_len: usize) -> io::Result<([u8; 4], Vec<u8>)> {
    let (tag, len) = read_chunk_header(r)?;
    if len < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "chunk shorter than its length prefix",
        ));
    }
    let uncompressed_len = read_u32_le(r)? as usize;
    if uncompressed_len != expected_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "chunk payload size does not match the expected size",
        ));
    }
    let compressed_len = (len - 4) as usize;
    if compressed_len > lz4_flex::block::get_maximum_output_size(expected_len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "compressed chunk larger than its payload allows",
        ));
    }
    let mut compressed = vec![0u8; compressed_len];
    r.read_exact(&mut compressed)?;
    let payload = decompress_lz4(&compressed, uncompressed_len)?;
    if payload.len() != uncompressed_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "chunk length does not match header",
        ));
    }
    Ok((tag, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_roundtrip() {
        let payload: Vec<u8> = (0..200u32).flat_map(|i| (i % 7).to_le_bytes()).collect();
        let mut out = Vec::new();
        write_chunk_lz4(&mut out, *b"TEST", &payload).unwrap();

        let (tag, back) = read_chunk_lz4(&mut out.as_slice(), payload.len()).unwrap();
        assert_eq!(&tag, b"TEST");
        assert_eq!(back, payload);
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        let mut out = Vec::new();
        write_chunk_lz4(&mut out, *b"TEST", &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        out.truncate(out.len() - 1);
        assert!(read_chunk_lz4(&mut out.as_slice(), 8).is_err());
    }

    #[test]
    fn oversized_headers_are_rejected_before_reading() {
        let mut out = Vec::new();
        write_chunk_lz4(&mut out, *b"TEST", &[9; 64]).unwrap();
        assert!(read_chunk_lz4(&mut out.as_slice(), 32).is_err());

        // Claims a 4 GiB compressed body and a 64-byte payload.
        let mut forged = Vec::new();
        forged.extend_from_slice(b"TEST");
        write_u32_le(&mut forged, u32::MAX).unwrap();
        write_u32_le(&mut forged, 64).unwrap();
        let err = read_chunk_lz4(&mut forged.as_slice(), 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn f64_le_roundtrip() {
        let mut out = Vec::new();
        write_f64_le(&mut out, -0.125).unwrap();
        write_f64_le(&mut out, f64::MAX).unwrap();
        let mut r = out.as_slice();
        assert_eq!(read_f64_le(&mut r).unwrap(), -0.125);
        assert_eq!(read_f64_le(&mut r).unwrap(), f64::MAX);
    }
}
