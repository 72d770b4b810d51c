use dicom_encaps::rle::{decode_frame, decode_segment, encode_frame, encode_segment, parse_header};
use dicom_encaps::{Diagnostics, EncapsError, ErrorKind, RleParams};
use proptest::prelude::*;

#[test]
fn two_by_three_monochrome_frame() {
    let mut data = vec![0x01, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00];
    data.extend(vec![0u8; 56]);
    data.extend_from_slice(&[0x05, 0x00, 0x40, 0x80, 0xA0, 0xC0, 0xFF]);
    assert_eq!(data.len(), 71);

    let mut diag = Diagnostics::new();
    let frame = decode_frame(&data, &RleParams::new(2, 3, 1, 8), &mut diag).unwrap();

    assert_eq!(frame, vec![0, 64, 128, 160, 192, 255]);
    assert!(diag.is_empty());
}

#[test]
fn rgb_frame_is_planar() {
    let params = RleParams::new(1, 2, 3, 8);
    // R plane, G plane, B plane
    let planar = vec![10, 11, 20, 21, 30, 31];

    let encoded = encode_frame(&planar, &params).unwrap();
    assert_eq!(parse_header(&encoded).unwrap().len(), 3);
    assert_eq!(decode_frame(&encoded, &params, &mut Diagnostics::new()).unwrap(), planar);
}

#[test]
fn wrong_bits_allocated_for_encoding() {
    let err = encode_frame(&[0u8; 4], &RleParams::new(2, 2, 1, 0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(matches!(err, EncapsError::UnsupportedBitsAllocated(0)));
}

proptest! {
    #[test]
    fn prop_segment_round_trip(plane in prop::collection::vec(any::<u8>(), 1..512), columns in 1usize..64) {
        let encoded = encode_segment(&plane, columns);
        prop_assert_eq!(encoded.len() % 2, 0);

        let decoded = decode_segment(&encoded);
        prop_assert_eq!(&decoded[..plane.len()], &plane[..]);
    }

    #[test]
    fn prop_runs_round_trip(value in any::<u8>(), run in 1usize..400) {
        let plane = vec![value; run];
        let decoded = decode_segment(&encode_segment(&plane, run));
        prop_assert_eq!(&decoded[..run], &plane[..]);
    }

    #[test]
    fn prop_frame_round_trip(
        rows in 1u16..8,
        columns in 1u16..8,
        samples in prop::sample::select(vec![1u16, 3]),
        bits in prop::sample::select(vec![8u16, 16, 32]),
        seed in any::<u64>(),
    ) {
        let params = RleParams::new(rows, columns, samples, bits);
        let length = params.frame_length().unwrap();

        // low entropy data so that both run kinds show up
        let frame = (0..length)
            .map(|i| ((seed >> (i % 61)) & 0x3) as u8)
            .collect::<Vec<u8>>();

        let encoded = encode_frame(&frame, &params).unwrap();
        let mut diag = Diagnostics::new();
        let decoded = decode_frame(&encoded, &params, &mut diag).unwrap();

        prop_assert_eq!(decoded, frame);
        prop_assert!(diag.is_empty());
    }
}
