// Property tests: chunking-independence of both streaming decoders, delta
// roundtrips over arbitrary inputs, and corruption detection.

use proptest::prelude::*;

use bootlink::delta::encoder::encode_delta;
use bootlink::delta::{PatchDecoder, adler32};
use bootlink::inflate::InflateStream;

fn deflate(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Drive a patch through the decoder in fixed-size chunks.
fn decode_delta(
    patch: &[u8],
    source: &[u8],
    expected_len: u64,
    chunk: usize,
) -> Result<Vec<u8>, bootlink::delta::DecodeError> {
    let mut decoder = PatchDecoder::new(expected_len);
    let mut src = source;
    let mut out = Vec::new();
    let mut done = false;
    if patch.is_empty() {
        done = decoder.push_chunk(&[], &mut src, &mut out)?;
    }
    for piece in patch.chunks(chunk.max(1)) {
        done = decoder.push_chunk(piece, &mut src, &mut out)?;
    }
    assert!(done, "stream must reach completion");
    decoder.finish()?;
    Ok(out)
}

proptest! {
    #[test]
    fn prop_delta_roundtrip_any_chunking(
        source in proptest::collection::vec(any::<u8>(), 0..4096),
        target in proptest::collection::vec(any::<u8>(), 0..4096),
        chunk in 1usize..2048,
    ) {
        let patch = encode_delta(&source, &target, 1024).unwrap();
        let out = decode_delta(&patch, &source, target.len() as u64, chunk).unwrap();
        prop_assert_eq!(out, target);
    }

    #[test]
    fn prop_identical_data_yields_tiny_patch(
        data in proptest::collection::vec(any::<u8>(), 512..8192),
    ) {
        let patch = encode_delta(&data, &data, 16 * 1024).unwrap();
        prop_assert!(patch.len() < data.len() / 4,
            "patch={} data={}", patch.len(), data.len());
    }

    #[test]
    fn prop_corrupted_patch_never_silently_succeeds(
        source in proptest::collection::vec(any::<u8>(), 64..2048),
        seed in any::<u64>(),
    ) {
        let mut target = source.clone();
        target.reverse();
        let mut patch = encode_delta(&source, &target, 16 * 1024).unwrap();

        // Flip one byte past the file header.
        let idx = 5 + (seed as usize % (patch.len() - 5));
        patch[idx] ^= 1 + (seed >> 32) as u8 % 255;

        let mut decoder = PatchDecoder::new(target.len() as u64);
        let mut src = source.as_slice();
        let mut out = Vec::new();
        let mut result = Ok(false);
        for piece in patch.chunks(97) {
            result = decoder.push_chunk(piece, &mut src, &mut out);
            if result.is_err() {
                break;
            }
        }

        // Either the corruption is detected, or (if the flip landed
        // somewhere inert, e.g. inside literal bytes the checksum then
        // catches) decoding must not produce wrong output.
        if result.is_ok() && decoder.is_finished() {
            prop_assert_eq!(out, target);
        }
    }

    #[test]
    fn prop_inflate_output_is_chunking_independent(
        payload in proptest::collection::vec(any::<u8>(), 0..16384),
        chunk in 1usize..997,
    ) {
        let compressed = deflate(&payload);

        let mut stream = InflateStream::new(4096);
        let mut out = Vec::new();
        let mut done = false;
        for piece in compressed.chunks(chunk) {
            prop_assert!(!done, "end marker appeared before the last chunk");
            done = stream.push_chunk(piece, &mut out).unwrap();
        }

        prop_assert!(done);
        prop_assert_eq!(out, payload);
    }

    #[test]
    fn prop_adler32_matches_reference(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
    ) {
        // Straight RFC 1950 definition as the oracle.
        const MOD: u32 = 65521;
        let (mut a, mut b) = (1u32, 0u32);
        for &byte in &data {
            a = (a + u32::from(byte)) % MOD;
            b = (b + a) % MOD;
        }
        prop_assert_eq!(adler32(&data), (b << 16) | a);
    }
}
