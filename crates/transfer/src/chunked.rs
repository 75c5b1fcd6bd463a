use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::ChunkError;
use crate::types::{ChunkPayload, ChunkRange};

/// Read buffer for streaming whole-file digests.
const READ_BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Splits `[0, size_bytes)` into consecutive ranges of at most `chunk_size`.
///
/// The last range carries the remainder. An empty file yields no ranges.
pub fn plan_ranges(size_bytes: u64, chunk_size: u64) -> Result<Vec<ChunkRange>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidConfiguration(
            "chunk size must be greater than zero".into(),
        ));
    }

    let count = size_bytes.div_ceil(chunk_size);
    let mut ranges = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    while offset < size_bytes {
        let length = chunk_size.min(size_bytes - offset);
        ranges.push(ChunkRange { offset, length });
        offset += length;
    }
    Ok(ranges)
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-1 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-1 of an entire file with a streaming read.
pub fn whole_file_checksum(path: &Path) -> Result<String, ChunkError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Reads exactly `range.length` bytes at `range.offset` and hashes them.
///
/// Fails with [`ChunkError::ShortRead`] if the file ends early, which means
/// it was truncated or replaced after the ranges were planned.
pub fn read_chunk(path: &Path, range: ChunkRange) -> Result<ChunkPayload, ChunkError> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(range.offset))?;

    let mut data = Vec::with_capacity(range.length as usize);
    let actual = file.take(range.length).read_to_end(&mut data)? as u64;
    if actual != range.length {
        return Err(ChunkError::ShortRead {
            offset: range.offset,
            expected: range.length,
            actual,
        });
    }

    let checksum = checksum_bytes(&data);
    Ok(ChunkPayload {
        range,
        data,
        checksum,
    })
}

/// SHA-1 of one chunk's bytes, with the same short-read detection as [`read_chunk`].
pub fn chunk_checksum(path: &Path, range: ChunkRange) -> Result<String, ChunkError> {
    read_chunk(path, range).map(|p| p.checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn assert_tiles(ranges: &[ChunkRange], size: u64, chunk: u64) {
        let mut expected_offset = 0;
        for r in ranges {
            assert_eq!(r.offset, expected_offset, "gap or overlap at {}", r.offset);
            assert!(r.length > 0 && r.length <= chunk);
            expected_offset = r.end();
        }
        assert_eq!(expected_offset, size);
        if let Some(last) = ranges.last() {
            let rem = size % chunk;
            assert_eq!(last.length, if rem == 0 { chunk } else { rem });
        }
        assert_eq!(ranges.len() as u64, size.div_ceil(chunk));
    }

    #[test]
    fn plan_ranges_partitions_exactly() {
        for size in [0u64, 1, 2, 9, 10, 11, 99, 100, 101, 1000, 4097] {
            for chunk in [1u64, 3, 10, 64, 100, 4096, 10_000] {
                let ranges = plan_ranges(size, chunk).unwrap();
                assert_tiles(&ranges, size, chunk);
            }
        }
    }

    #[test]
    fn plan_ranges_250mb_in_100mb_chunks() {
        const MIB: u64 = 1024 * 1024;
        let ranges = plan_ranges(250 * MIB, 100 * MIB).unwrap();
        let offsets: Vec<u64> = ranges.iter().map(|r| r.offset).collect();
        let lengths: Vec<u64> = ranges.iter().map(|r| r.length).collect();
        assert_eq!(offsets, vec![0, 104_857_600, 209_715_200]);
        assert_eq!(lengths, vec![100 * MIB, 100 * MIB, 50 * MIB]);
    }

    #[test]
    fn plan_ranges_empty_file() {
        assert!(plan_ranges(0, 16).unwrap().is_empty());
    }

    #[test]
    fn plan_ranges_rejects_zero_chunk() {
        let err = plan_ranges(10, 0).unwrap_err();
        assert!(matches!(err, ChunkError::InvalidConfiguration(_)));
    }

    #[test]
    fn checksum_bytes_known_value() {
        assert_eq!(
            checksum_bytes(b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(checksum_bytes(b"").len(), 40);
    }

    #[test]
    fn whole_file_checksum_is_stable() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let path = create_test_file(dir.path(), "disk.ova", &data);

        let first = whole_file_checksum(&path).unwrap();
        let second = whole_file_checksum(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, checksum_bytes(&data));
    }

    #[test]
    fn whole_file_checksum_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = whole_file_checksum(&dir.path().join("nope.ova")).unwrap_err();
        assert!(matches!(err, ChunkError::Io(_)));
    }

    #[test]
    fn read_chunk_reads_exact_range() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"AABBCCDDEE");

        let ranges = plan_ranges(10, 4).unwrap();
        let chunks: Vec<_> = ranges.iter().map(|r| read_chunk(&path, *r).unwrap()).collect();

        assert_eq!(chunks[0].data, b"AABB");
        assert_eq!(chunks[1].data, b"CCDD");
        assert_eq!(chunks[2].data, b"EE");
        assert_eq!(chunks[2].range.offset, 8);
        assert_eq!(chunks[1].checksum, checksum_bytes(b"CCDD"));
        assert_eq!(chunk_checksum(&path, ranges[1]).unwrap(), chunks[1].checksum);
    }

    #[test]
    fn read_chunk_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"0123456789");
        let ranges = plan_ranges(10, 4).unwrap();

        // Truncate after planning.
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(6).unwrap();

        let err = read_chunk(&path, ranges[1]).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::ShortRead {
                offset: 4,
                expected: 4,
                actual: 2
            }
        ));
        assert!(matches!(
            chunk_checksum(&path, ranges[2]).unwrap_err(),
            ChunkError::ShortRead { actual: 0, .. }
        ));
    }
}
