//! Framer Tests
//!
//! These tests verify:
//! - Handshake decoding (full and degenerate)
//! - Command and payload decoding
//! - Identical output for any chunking of the same stream
//! - Error handling for malformed input

use artifactcache::protocol::{encode_command, encode_version, Command, Frame, Framer, PROTOCOL_VERSION};
use artifactcache::{CacheError, FileType, VersionKey};

// =============================================================================
// Helper Functions
// =============================================================================

/// Frames with payload pieces merged, so different chunkings compare equal
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owned {
    Version(u32),
    Command(Command),
    Payload(Vec<u8>),
}

fn normalize(frames: &[Frame<'_>], out: &mut Vec<Owned>) {
    for frame in frames {
        match frame {
            Frame::Version(v) => out.push(Owned::Version(*v)),
            Frame::Command(c) => out.push(Owned::Command(*c)),
            Frame::Payload(p) => match out.last_mut() {
                Some(Owned::Payload(buf)) => buf.extend_from_slice(p),
                _ => out.push(Owned::Payload(p.to_vec())),
            },
        }
    }
}

fn decode_whole(data: &[u8]) -> Vec<Owned> {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    framer.feed(data, &mut frames).unwrap();
    let mut out = Vec::new();
    normalize(&frames, &mut out);
    out
}

fn decode_chunked(data: &[u8], sizes: impl Fn(usize) -> usize) -> Vec<Owned> {
    let mut framer = Framer::new();
    let mut out = Vec::new();
    let mut pos = 0;
    let mut i = 0;
    while pos < data.len() {
        let len = sizes(i).max(1).min(data.len() - pos);
        let mut frames = Vec::new();
        framer.feed(&data[pos..pos + len], &mut frames).unwrap();
        normalize(&frames, &mut out);
        pos += len;
        i += 1;
    }
    out
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn key(seed: u8) -> VersionKey {
    let mut guid = [0u8; 16];
    let mut hash = [0u8; 16];
    for i in 0..16 {
        guid[i] = seed.wrapping_add(i as u8);
        hash[i] = seed.wrapping_add(16 + i as u8);
    }
    VersionKey::new(guid, hash)
}

/// A realistic session: handshake, one upload, a few gets, quit
fn session() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let asset = pattern(200, 7);
    let info = pattern(50, 9);
    let mut data = encode_version(PROTOCOL_VERSION).to_vec();
    data.extend(encode_command(&Command::TransactionStart { key: key(0) }));
    data.extend(encode_command(&Command::Put {
        file_type: FileType::Asset,
        size: asset.len() as u64,
    }));
    data.extend(&asset);
    data.extend(encode_command(&Command::Put {
        file_type: FileType::Metadata,
        size: info.len() as u64,
    }));
    data.extend(&info);
    data.extend(encode_command(&Command::TransactionEnd));
    data.extend(encode_command(&Command::Get {
        file_type: FileType::Asset,
        key: key(0),
    }));
    data.extend(encode_command(&Command::Get {
        file_type: FileType::Resource,
        key: key(3),
    }));
    data.extend(encode_command(&Command::Quit));
    (data, asset, info)
}

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_decode_full_session() {
    let (data, asset, info) = session();
    let frames = decode_whole(&data);

    assert_eq!(
        frames,
        vec![
            Owned::Version(PROTOCOL_VERSION),
            Owned::Command(Command::TransactionStart { key: key(0) }),
            Owned::Command(Command::Put {
                file_type: FileType::Asset,
                size: 200
            }),
            Owned::Payload(asset),
            Owned::Command(Command::Put {
                file_type: FileType::Metadata,
                size: 50
            }),
            Owned::Payload(info),
            Owned::Command(Command::TransactionEnd),
            Owned::Command(Command::Get {
                file_type: FileType::Asset,
                key: key(0)
            }),
            Owned::Command(Command::Get {
                file_type: FileType::Resource,
                key: key(3)
            }),
            Owned::Command(Command::Quit),
        ]
    );
}

#[test]
fn test_payload_is_passed_through_without_copy() {
    let mut data = encode_version(PROTOCOL_VERSION).to_vec();
    data.extend(encode_command(&Command::Put {
        file_type: FileType::Resource,
        size: 4,
    }));
    data.extend(b"abcd");

    let mut framer = Framer::new();
    let mut frames = Vec::new();
    framer.feed(&data, &mut frames).unwrap();

    let Frame::Payload(slice) = frames[2] else {
        panic!("Expected payload frame");
    };
    assert_eq!(slice, b"abcd");
    // The slice points into the caller's buffer
    assert_eq!(slice.as_ptr(), data[data.len() - 4..].as_ptr());
}

#[test]
fn test_zero_size_put_has_no_body() {
    let mut data = encode_version(PROTOCOL_VERSION).to_vec();
    data.extend(encode_command(&Command::Put {
        file_type: FileType::Asset,
        size: 0,
    }));
    data.extend(encode_command(&Command::TransactionEnd));

    assert_eq!(
        decode_whole(&data),
        vec![
            Owned::Version(PROTOCOL_VERSION),
            Owned::Command(Command::Put {
                file_type: FileType::Asset,
                size: 0
            }),
            Owned::Command(Command::TransactionEnd),
        ]
    );
}

#[test]
fn test_quit_stops_decoding() {
    let mut data = encode_version(PROTOCOL_VERSION).to_vec();
    data.push(b'q');
    data.extend(b"garbage that is never parsed");

    let mut framer = Framer::new();
    let mut frames = Vec::new();
    framer.feed(&data, &mut frames).unwrap();

    assert_eq!(frames.last(), Some(&Frame::Command(Command::Quit)));
    assert!(framer.is_finished());

    let mut more = Vec::new();
    framer.feed(b"ga", &mut more).unwrap();
    assert!(more.is_empty());
}

#[test]
fn test_body_state_is_reported() {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    let mut data = encode_version(PROTOCOL_VERSION).to_vec();
    data.extend(encode_command(&Command::Put {
        file_type: FileType::Asset,
        size: 10,
    }));
    data.extend(b"12345");
    framer.feed(&data, &mut frames).unwrap();
    assert!(framer.in_body());

    framer.feed(b"67890", &mut frames).unwrap();
    assert!(!framer.in_body());
}

// =============================================================================
// Chunking Invariant Tests
// =============================================================================

#[test]
fn test_every_fixed_chunk_size_decodes_identically() {
    let (data, _, _) = session();
    let expected = decode_whole(&data);

    for size in 1..=data.len() {
        assert_eq!(
            decode_chunked(&data, |_| size),
            expected,
            "chunk size {}",
            size
        );
    }
}

#[test]
fn test_irregular_chunks_decode_identically() {
    let (data, _, _) = session();
    let expected = decode_whole(&data);

    for seed in 1..50usize {
        let sizes = move |i: usize| (i * 7919 + seed * 104_729) % 61 + 1;
        assert_eq!(decode_chunked(&data, sizes), expected, "seed {}", seed);
    }
}

// =============================================================================
// Handshake Tests
// =============================================================================

#[test]
fn test_unsupported_version_is_still_decoded() {
    let frames = decode_whole(b"00000001");
    assert_eq!(frames, vec![Owned::Version(1)]);
}

#[test]
fn test_degenerate_handshake_at_eof() {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    framer.feed(b"fe", &mut frames).unwrap();
    assert!(frames.is_empty());

    assert_eq!(framer.finish(), Some(Frame::Version(0xfe)));
}

#[test]
fn test_single_digit_handshake_is_rejected_at_eof() {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    framer.feed(b"f", &mut frames).unwrap();

    assert_eq!(framer.finish(), None);
}

#[test]
fn test_finish_after_handshake_yields_nothing() {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    framer.feed(b"000000fe", &mut frames).unwrap();

    assert_eq!(framer.finish(), None);
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_unknown_command_is_a_protocol_error() {
    let mut data = encode_version(PROTOCOL_VERSION).to_vec();
    data.extend(encode_command(&Command::Get {
        file_type: FileType::Asset,
        key: key(1),
    }));
    data.extend(b"zz");

    let mut framer = Framer::new();
    let mut frames = Vec::new();
    let result = framer.feed(&data, &mut frames);

    assert!(matches!(result, Err(CacheError::Protocol(_))));
    // Frames decoded before the bad token survive
    assert_eq!(frames.len(), 2);

    // The framer refuses further input
    let mut more = Vec::new();
    assert!(framer.feed(b"te", &mut more).is_err());
    assert!(more.is_empty());
}

#[test]
fn test_bad_file_type_tag_is_a_protocol_error() {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    let result = framer.feed(b"000000fegx", &mut frames);
    assert!(matches!(result, Err(CacheError::Protocol(_))));
}

#[test]
fn test_malformed_size_is_a_protocol_error() {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    let result = framer.feed(b"000000fepa00000000000000zz", &mut frames);
    assert!(matches!(result, Err(CacheError::Protocol(_))));
}

#[test]
fn test_error_split_across_chunks() {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    framer.feed(b"000000fex", &mut frames).unwrap();
    assert!(framer.feed(b"y", &mut frames).is_err());
}
