use std::io::{Read, Write};

use anyhow::Context;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Compress a payload as a zlib stream at the best compression level. Payloads
///  are JSON-ish control messages, so trading CPU for size is the right call:
///  the compressed size determines the number of UDP datagrams on the wire.
pub fn compress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).context("failed to compress payload")?;
    encoder.finish().context("failed to compress payload")
}

/// Inverse of [compress]. The input is attacker-influenced, so failures are
///  regular errors rather than panics.
pub fn decompress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).context("failed to decompress payload")?;
    Ok(decompressed)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(vec![])]
    #[case::small(b"hello".to_vec())]
    #[case::repetitive(vec![b'a'; 100_000])]
    #[case::binary((0u8..=255).cycle().take(10_000).collect())]
    fn test_compress_round_trip(#[case] data: Vec<u8>) {
        let compressed = compress(&data).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[rstest]
    fn test_compress_shrinks_repetitive_data() {
        let compressed = compress(&vec![b'a'; 100_000]).unwrap();
        assert!(compressed.len() < 1000);
    }

    #[rstest]
    #[case::garbage(vec![0xde, 0xad, 0xbe, 0xef])]
    #[case::empty(vec![])]
    #[case::truncated_stream({ let mut c = compress(&vec![b'a'; 10_000]).unwrap(); c.truncate(c.len() / 2); c })]
    fn test_decompress_rejects_malformed(#[case] data: Vec<u8>) {
        assert!(decompress(&data).is_err());
    }
}
