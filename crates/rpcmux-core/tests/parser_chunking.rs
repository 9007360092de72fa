//! StreamParser chunk-boundary behaviour.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;
use proptest::prelude::*;
use serde_json::json;

use rpcmux_core::protocol::{Envelope, FinalizeOptions, StreamParser};
use rpcmux_core::{FrameLimits, WireFormat};


const FORMATS: [WireFormat; 2] = [WireFormat::LengthPrefixed, WireFormat::Lines];

fn parse_chunks(format: WireFormat, chunks: &[&[u8]]) -> Vec<Envelope> {
    let mut parser = StreamParser::new(format, FrameLimits::default());
    let mut out = Vec::new();
    for c in chunks {
        out.extend(parser.feed(Bytes::copy_from_slice(c)).unwrap());
    }
    out.extend(parser.finalize(FinalizeOptions::default()).unwrap());
    out
}

#[test]
fn one_chunk_yields_every_envelope() {
    for format in FORMATS {
        let envs = fixtures::mixed();
        let bytes = fixtures::encode_all(format, &envs);
        assert_eq!(parse_chunks(format, &[&bytes]), envs, "{format:?}");
    }
}

#[test]
fn every_single_split_offset_is_invariant() {
    for format in FORMATS {
        let envs = fixtures::mixed();
        let bytes = fixtures::encode_all(format, &envs);
        for at in 0..=bytes.len() {
            let (a, b) = bytes.split_at(at);
            assert_eq!(parse_chunks(format, &[a, b]), envs, "{format:?} split at {at}");
        }
    }
}

#[test]
fn byte_at_a_time_is_invariant() {
    for format in FORMATS {
        let envs = fixtures::mixed();
        let bytes = fixtures::encode_all(format, &envs);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(parse_chunks(format, &chunks), envs, "{format:?}");
    }
}

#[test]
fn header_split_mid_length_field_waits() {
    let env = Envelope::ok("abc", "getUser", Some(json!({"id": "1"}).into()), true);
    let bytes = fixtures::encode_all(WireFormat::LengthPrefixed, std::slice::from_ref(&env));

    let mut parser = StreamParser::new(WireFormat::LengthPrefixed, FrameLimits::default());
    assert!(parser.feed(Bytes::copy_from_slice(&bytes[..3])).unwrap().is_empty());
    assert_eq!(parser.buffered(), 3);
    assert!(parser.feed(Bytes::new()).unwrap().is_empty());
    let out = parser.feed(Bytes::copy_from_slice(&bytes[3..])).unwrap();
    assert_eq!(out, vec![env]);
    assert_eq!(parser.buffered(), 0);
}

#[test]
fn attachment_split_across_many_feeds() {
    let envs = vec![fixtures::mixed().remove(6)];
    let bytes = fixtures::encode_all(WireFormat::LengthPrefixed, &envs);

    let mut parser = StreamParser::new(WireFormat::LengthPrefixed, FrameLimits::default());
    let mut emitted = Vec::new();
    for c in bytes.chunks(7) {
        emitted.extend(parser.feed(Bytes::copy_from_slice(c)).unwrap());
    }
    assert_eq!(emitted, envs);
}

#[test]
fn trailing_line_without_newline_is_parsed() {
    let env = Envelope::ok("1", "getUser", Some(json!(1).into()), true);
    let mut bytes = fixtures::encode_all(WireFormat::Lines, std::slice::from_ref(&env));
    bytes.pop();

    let mut parser = StreamParser::new(WireFormat::Lines, FrameLimits::default());
    assert!(parser.feed(Bytes::from(bytes)).unwrap().is_empty());
    assert_eq!(parser.finalize(FinalizeOptions::default()).unwrap(), vec![env]);
}

#[test]
fn truncated_trailing_line_is_an_error() {
    let mut parser = StreamParser::new(WireFormat::Lines, FrameLimits::default());
    parser.feed(Bytes::from_static(b"{\"id\":\"1\",\"act")).unwrap();
    assert!(parser.finalize(FinalizeOptions::default()).is_err());
}

#[test]
fn blank_lines_are_skipped() {
    let env = Envelope::ok("1", "a", None, true);
    let mut bytes = b"\n\r\n".to_vec();
    bytes.extend(fixtures::encode_all(WireFormat::Lines, std::slice::from_ref(&env)));
    bytes.extend(b"\n");
    assert_eq!(parse_chunks(WireFormat::Lines, &[&bytes]), vec![env]);
}

#[test]
fn missing_attachment_fails_unless_tolerated() {
    for format in FORMATS {
        let upload = fixtures::mixed().remove(1);
        let bytes = fixtures::encode_all(format, std::slice::from_ref(&upload));
        let cut = match format {
            WireFormat::LengthPrefixed => bytes.len() - 10,
            WireFormat::Lines => bytes.iter().position(|b| *b == b'\n').unwrap() + 1,
        };

        let mut strict = StreamParser::new(format, FrameLimits::default());
        strict.feed(Bytes::copy_from_slice(&bytes[..cut])).unwrap();
        assert!(strict.finalize(FinalizeOptions::default()).is_err(), "{format:?}");

        let mut tolerant = StreamParser::new(format, FrameLimits::default());
        tolerant.feed(Bytes::copy_from_slice(&bytes[..cut])).unwrap();
        let out = tolerant
            .finalize(FinalizeOptions {
                tolerate_missing_attachment: true,
            })
            .unwrap();
        assert_eq!(out.len(), 1, "{format:?}");
        assert_eq!(out[0].id, upload.id);
        assert!(out[0].data.is_none());
    }
}

#[test]
fn line_header_without_file_bytes_at_eof_is_tolerated() {
    let upload = fixtures::mixed().remove(1);
    let bytes = fixtures::encode_all(WireFormat::Lines, std::slice::from_ref(&upload));
    let nl = bytes.iter().position(|b| *b == b'\n').unwrap();

    let mut parser = StreamParser::new(WireFormat::Lines, FrameLimits::default());
    parser.feed(Bytes::copy_from_slice(&bytes[..nl])).unwrap();
    let out = parser
        .finalize(FinalizeOptions {
            tolerate_missing_attachment: true,
        })
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].action, "UPLOAD_FILE");
}

#[test]
fn framing_errors_are_terminal() {
    let cases: [(WireFormat, &[u8]); 4] = [
        (WireFormat::LengthPrefixed, &[9, 0, 0, 0, 2, b'{', b'}']),
        (WireFormat::LengthPrefixed, &[0, 0xff, 0xff, 0xff, 0xf0]),
        (WireFormat::LengthPrefixed, &[0, 0, 0, 0, 3, b'n', b'o', b'!']),
        (WireFormat::Lines, b"not json\n"),
    ];
    for (format, raw) in cases {
        let mut parser = StreamParser::new(format, FrameLimits::default());
        assert!(parser.feed(Bytes::copy_from_slice(raw)).is_err(), "{raw:?}");
        assert!(parser.is_failed());
        let good = fixtures::encode_all(format, &fixtures::mixed()[..1]);
        assert!(parser.feed(Bytes::from(good)).is_err());
    }
}

#[test]
fn complete_line_over_the_json_limit_is_rejected() {
    let env = Envelope::request("1", "echo", json!("x".repeat(200)));
    let bytes = fixtures::encode_all(WireFormat::Lines, std::slice::from_ref(&env));
    let limits = FrameLimits {
        max_json_bytes: 64,
        ..FrameLimits::default()
    };

    let mut parser = StreamParser::new(WireFormat::Lines, limits);
    assert!(parser.feed(Bytes::from(bytes)).is_err());
    assert!(parser.is_failed());
}

#[test]
fn mismatched_line_attachment_id_is_rejected() {
    let upload = fixtures::mixed().remove(1);
    let mut bytes = fixtures::encode_all(WireFormat::Lines, std::slice::from_ref(&upload));
    let nl = bytes.iter().position(|b| *b == b'\n').unwrap();
    bytes[nl + 1] = b'X';

    let mut parser = StreamParser::new(WireFormat::Lines, FrameLimits::default());
    assert!(parser.feed(Bytes::from(bytes)).is_err());
}

proptest! {
    #[test]
    fn random_splits_are_invariant(
        cuts in proptest::collection::vec(0usize..4096, 0..12),
        lines in any::<bool>(),
    ) {
        let format = if lines { WireFormat::Lines } else { WireFormat::LengthPrefixed };
        let envs = fixtures::mixed();
        let bytes = fixtures::encode_all(format, &envs);

        let mut offsets: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
        offsets.push(0);
        offsets.push(bytes.len());
        offsets.sort_unstable();
        let chunks: Vec<&[u8]> = offsets.windows(2).map(|w| &bytes[w[0]..w[1]]).collect();

        prop_assert_eq!(parse_chunks(format, &chunks), envs);
    }
}
