//! Archives produced by the streaming writer open with a standard ZIP reader

mod common;

use common::*;
use opentdf_core::tdf::{FinalizeOptions, TdfWriter, WriterConfig};
use opentdf_core::zipstream::{ArchiveReader, Zip64Mode};
use opentdf_crypto::SeededRandom;
use opentdf_protocol::{TdfManifest, MANIFEST_ENTRY, PAYLOAD_ENTRY};
use proptest::prelude::*;
use std::io::{Cursor, Read};
use std::sync::Arc;

const OVERHEAD: usize = 28;

fn build(mode: Zip64Mode, segments: &[(i64, Vec<u8>)], seed: u64) -> Vec<u8> {
    let config = WriterConfig::default()
        .zip64(mode)
        .default_kas(kas1())
        .rng(Arc::new(SeededRandom::from_u64(seed)));
    let writer = TdfWriter::new(config).expect("writer");
    let borrowed: Vec<(i64, &[u8])> = segments.iter().map(|(i, d)| (*i, d.as_slice())).collect();
    write_tdf(&writer, &borrowed, FinalizeOptions::default())
}

fn read_with_zip_crate(tdf: &[u8]) -> (TdfManifest, Vec<u8>) {
    let mut archive = zip::ZipArchive::new(Cursor::new(tdf)).expect("valid zip");
    assert_eq!(archive.len(), 2);

    let mut payload = Vec::new();
    // Reading to the end checks the entry CRC
    archive
        .by_name(PAYLOAD_ENTRY)
        .expect("payload entry")
        .read_to_end(&mut payload)
        .expect("payload CRC");

    let mut manifest = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("manifest CRC");
    (TdfManifest::from_json(&manifest).expect("manifest JSON"), payload)
}

#[test]
fn test_zip_crate_reads_all_modes() {
    let segments = vec![(1, vec![b'b'; 700]), (0, vec![b'a'; 1024]), (2, vec![b'c'; 3])];
    for mode in [Zip64Mode::Auto, Zip64Mode::Always, Zip64Mode::Never] {
        let tdf = build(mode, &segments, 1);
        let (manifest, payload) = read_with_zip_crate(&tdf);

        let integrity = &manifest.encryption_information.integrity_information;
        assert_eq!(integrity.segments.len(), 3);
        assert_eq!(payload.len(), 1024 + 700 + 3 + 3 * OVERHEAD, "mode {mode:?}");
    }
}

#[test]
fn test_zip64_always_marks_payload_header() {
    let segments = vec![(0, b"tiny".to_vec())];
    let tdf = build(Zip64Mode::Always, &segments, 2);

    // The leading local header carries the 0xFFFFFFFF sentinels and a ZIP64 extra field
    assert_eq!(&tdf[..4], b"PK\x03\x04");
    assert_eq!(&tdf[18..22], &[0xFF; 4]);
    assert_eq!(&tdf[22..26], &[0xFF; 4]);
    let extra_len = u16::from_le_bytes([tdf[28], tdf[29]]);
    assert_eq!(extra_len, 20);
    assert_eq!(u16::from_le_bytes([tdf[30 + 9], tdf[31 + 9]]), 0x0001);

    read_with_zip_crate(&tdf);
}

#[test]
fn test_own_reader_matches_zip_crate() {
    let segments = vec![(0, vec![7u8; 300]), (1, vec![8u8; 300])];
    let tdf = build(Zip64Mode::Auto, &segments, 3);
    let (_, expected) = read_with_zip_crate(&tdf);

    let mut reader = ArchiveReader::new(Cursor::new(tdf)).expect("archive");
    assert_eq!(reader.entry(PAYLOAD_ENTRY).map(|e| e.size), Some(expected.len() as u64));
    assert_eq!(reader.read_entry(PAYLOAD_ENTRY).expect("payload"), expected);
    assert_eq!(
        reader.read_range(PAYLOAD_ENTRY, 328, 10).expect("range"),
        expected[328..338].to_vec()
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_any_write_order_is_a_valid_zip(
        sizes in prop::collection::vec(0usize..400, 1..6),
        seed in any::<u64>(),
    ) {
        let mut segments: Vec<(i64, Vec<u8>)> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| (i as i64, vec![i as u8; *size]))
            .collect();
        // Deterministic shuffle driven by the seed
        let len = segments.len();
        for i in 0..len {
            let j = (seed.rotate_left(i as u32 * 7) as usize) % len;
            segments.swap(i, j);
        }

        let tdf = build(Zip64Mode::Auto, &segments, seed);
        let (manifest, payload) = read_with_zip_crate(&tdf);
        let expected: usize = sizes.iter().map(|s| s + OVERHEAD).sum();
        prop_assert_eq!(payload.len(), expected);

        let plain: Vec<i64> = manifest
            .encryption_information
            .integrity_information
            .segments
            .iter()
            .map(|s| s.segment_size)
            .collect();
        prop_assert_eq!(plain, sizes.iter().map(|s| *s as i64).collect::<Vec<_>>());
    }
}
