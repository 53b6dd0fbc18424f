//! End-to-end tests for the fanout streamer
//!
//! Builds complete linkfile sectors (layout + metadata + fanout + pieces) in
//! an in-memory fetcher, opens them through `open_link` and exercises the
//! read contract.
//!
//! Run with: cargo test --package sialink-stream --test streamer_test

use std::sync::Arc;

use sialink_core::crypto::{CipherType, MasterKey};
use sialink_core::erasure::ErasureCoder;
use sialink_core::fanout::encode_fanout;
use sialink_core::layout::Layout;
use sialink_core::link::{LinkData, SectorRoot};
use sialink_core::{SialinkError, SECTOR_SIZE};
use sialink_stream::{open_link, AsyncWrapper, MemoryFetcher, StreamBufferSet};

const METADATA: &[u8] = b"linkfile metadata region";

/// Generate file data with a verifiable pattern.
fn generate_file(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Build a complete linkfile in `fetcher` and return its sialink text and
/// the per-chunk piece roots.
fn build_linkfile(
    fetcher: &MemoryFetcher,
    content: &[u8],
    data_pieces: u8,
    parity_pieces: u8,
    cipher_type: CipherType,
) -> (String, Vec<Vec<SectorRoot>>) {
    let master_key = MasterKey::generate(cipher_type).unwrap();
    let coder = ErasureCoder::new(data_pieces, parity_pieces).unwrap();
    let chunk_size = (SECTOR_SIZE * u64::from(data_pieces)) as usize;

    // Erasure-code, encrypt and store every piece of every chunk.
    let mut chunk_roots: Vec<Vec<SectorRoot>> = Vec::new();
    for (chunk_index, chunk) in content.chunks(chunk_size).enumerate() {
        let mut roots = Vec::new();
        for (piece_index, piece) in coder.encode(chunk).unwrap().into_iter().enumerate() {
            let stored = master_key
                .encrypt_piece(&piece, chunk_index as u64, piece_index as u64)
                .unwrap();
            roots.push(fetcher.insert_sector(stored));
        }
        chunk_roots.push(roots);
    }

    let mut layout = Layout {
        version: 1,
        filesize: content.len() as u64,
        metadata_size: METADATA.len() as u16,
        fanout_size: 0,
        fanout_data_pieces: data_pieces,
        fanout_parity_pieces: parity_pieces,
        cipher_type,
        cipher_key: *master_key.as_bytes(),
    };
    let fanout = encode_fanout(&layout, &chunk_roots).unwrap();
    layout.fanout_size = fanout.len() as u16;

    // Base sector: layout header, metadata, fanout.
    let mut base = layout.encode().to_vec();
    base.extend_from_slice(METADATA);
    base.extend_from_slice(&fanout);
    let base_len = base.len() as u64;
    let base_root = fetcher.insert_sector(base);

    let link = LinkData::new(base_root, 0, base_len).unwrap();
    (link.to_uri(), chunk_roots)
}

fn new_fetcher() -> Arc<AsyncWrapper<MemoryFetcher>> {
    Arc::new(AsyncWrapper(MemoryFetcher::new()))
}

#[tokio::test]
async fn test_single_piece_plain_file() {
    let fetcher = new_fetcher();
    let content = generate_file(70_000);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 1, 0, CipherType::PLAIN);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    assert_eq!(streamer.data_size(), 70_000);
    assert_eq!(streamer.request_size(), SECTOR_SIZE);

    // The whole file fits in the first chunk.
    let mut buf = vec![0u8; content.len()];
    let n = streamer.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(n, content.len());
    assert_eq!(buf, content);
}

#[tokio::test]
async fn test_multichunk_reads_and_truncation() {
    let fetcher = new_fetcher();
    let tail = 4096usize;
    let content = generate_file(SECTOR_SIZE as usize + tail);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 1, 0, CipherType::PLAIN);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    // First chunk, full size.
    let mut buf = vec![0u8; SECTOR_SIZE as usize];
    let n = streamer.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(n, SECTOR_SIZE as usize);
    assert_eq!(buf, content[..SECTOR_SIZE as usize]);

    // Second chunk holds only the remainder of the file.
    let mut buf = vec![0u8; tail];
    let n = streamer.read_at(&mut buf, SECTOR_SIZE as i64).await.unwrap();
    assert_eq!(n, tail);
    assert_eq!(buf, content[SECTOR_SIZE as usize..]);
}

#[tokio::test]
async fn test_sequential_read_crosses_chunk_boundary() {
    let fetcher = new_fetcher();
    let content = generate_file(SECTOR_SIZE as usize + 10_000);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 1, 0, CipherType::PLAIN);

    let buffers = StreamBufferSet::new(2);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    // Unaligned sequential reads go through the buffered stream.
    let mut assembled = Vec::new();
    let mut buf = vec![0u8; 1_000_000];
    loop {
        let n = streamer.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        assembled.extend_from_slice(&buf[..n]);
    }
    assert_eq!(assembled, content);
}

#[tokio::test]
async fn test_encrypted_erasure_coded_file() {
    let fetcher = new_fetcher();
    let content = generate_file(30_000);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 2, 1, CipherType::AES_GCM);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();
    assert_eq!(streamer.request_size(), 2 * SECTOR_SIZE);

    let mut buf = vec![0u8; content.len()];
    let n = streamer.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(n, content.len());
    assert_eq!(buf, content);
}

#[tokio::test]
async fn test_recovery_with_missing_piece() {
    let fetcher = new_fetcher();
    let content = generate_file(30_000);
    let (uri, chunk_roots) = build_linkfile(&fetcher.0, &content, 2, 1, CipherType::AES_GCM);

    // Lose one of three pieces: parity covers it.
    fetcher.0.fail_root(chunk_roots[0][1]);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    let mut buf = vec![0u8; content.len()];
    streamer.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(buf, content);
}

#[tokio::test]
async fn test_insufficient_pieces() {
    let fetcher = new_fetcher();
    let content = generate_file(30_000);
    let (uri, chunk_roots) = build_linkfile(&fetcher.0, &content, 2, 1, CipherType::AES_GCM);

    // Lose two of three pieces: only one left, two needed.
    fetcher.0.fail_root(chunk_roots[0][0]);
    fetcher.0.fail_root(chunk_roots[0][2]);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    let mut buf = vec![0u8; content.len()];
    let err = streamer.read_at(&mut buf, 0).await.unwrap_err();
    assert!(matches!(
        err,
        SialinkError::InsufficientPieces {
            available: 1,
            required: 2
        }
    ));
}

#[tokio::test]
async fn test_read_contract() {
    let fetcher = new_fetcher();
    let content = generate_file(10_000);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 1, 0, CipherType::PLAIN);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    let mut small = [0u8; 16];
    assert!(matches!(
        streamer.read_at(&mut small, -1).await,
        Err(SialinkError::NegativeOffset(-1))
    ));

    let mut oversized = vec![0u8; SECTOR_SIZE as usize + 1];
    assert!(matches!(
        streamer.read_at(&mut oversized, 0).await,
        Err(SialinkError::OversizedRead { .. })
    ));

    assert!(matches!(
        streamer.read_at(&mut small, 4096).await,
        Err(SialinkError::UnalignedRead { .. })
    ));

    // Aligned but past the end of the 10 kB file.
    let mut chunk_buf = vec![0u8; 10_001];
    assert!(matches!(
        streamer.read_at(&mut chunk_buf, 0).await,
        Err(SialinkError::OutOfBounds { .. })
    ));
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let fetcher = new_fetcher();
    let content = generate_file(5_000);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 1, 0, CipherType::PLAIN);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();
    assert_eq!(buffers.buffer_count(), 1);

    streamer.close().await;
    streamer.close().await;
    assert_eq!(buffers.buffer_count(), 0);

    let mut buf = vec![0u8; 100];
    assert!(matches!(
        streamer.read_at(&mut buf, 0).await,
        Err(SialinkError::Closed)
    ));
    assert!(matches!(
        streamer.read(&mut buf).await,
        Err(SialinkError::Closed)
    ));
}

#[tokio::test]
async fn test_every_fetch_is_released() {
    let fetcher = new_fetcher();
    let content = generate_file(20_000);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 2, 1, CipherType::AES_GCM);

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    let mut buf = vec![0u8; content.len()];
    streamer.read_at(&mut buf, 0).await.unwrap();
    streamer.close().await;

    // Exactly one release per reservation the streamer took, no more.
    assert_eq!(fetcher.0.release_count(), fetcher.0.fetch_count());
}

#[tokio::test]
async fn test_empty_chunk_surfaces_at_read_time() {
    let fetcher = new_fetcher();

    // A 2-of-3 linkfile whose only chunk has no fetchable pieces. Parsing
    // succeeds; the failure belongs to the read.
    let mut layout = Layout {
        version: 1,
        filesize: 1000,
        metadata_size: 0,
        fanout_size: 0,
        fanout_data_pieces: 2,
        fanout_parity_pieces: 1,
        cipher_type: CipherType::PLAIN,
        cipher_key: [0u8; 64],
    };
    let fanout = vec![0u8; 3 * 32];
    layout.fanout_size = fanout.len() as u16;

    let mut base = layout.encode().to_vec();
    base.extend_from_slice(&fanout);
    let base_len = base.len() as u64;
    let root = fetcher.0.insert_sector(base);
    let uri = LinkData::new(root, 0, base_len).unwrap().to_uri();

    let buffers = StreamBufferSet::new(4);
    let streamer = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    let mut buf = vec![0u8; 1000];
    let err = streamer.read_at(&mut buf, 0).await.unwrap_err();
    assert!(matches!(err, SialinkError::EmptyChunk(0)));
}

#[tokio::test]
async fn test_open_link_failures() {
    let fetcher = new_fetcher();
    let buffers = StreamBufferSet::new(4);

    // Not a link at all.
    let err = open_link("sia://short", fetcher.clone(), &buffers)
        .await
        .unwrap_err();
    assert!(matches!(err, SialinkError::WrongLength { .. }));

    // A link whose sector nobody stores.
    let uri = LinkData::new(SectorRoot::compute(b"vanished"), 0, 4096)
        .unwrap()
        .to_uri();
    let err = open_link(&uri, fetcher.clone(), &buffers).await.unwrap_err();
    assert!(matches!(err, SialinkError::Fetcher(_)));

    // A sector too small to hold a layout header.
    let root = fetcher.0.insert_sector(vec![0u8; 40]);
    let uri = LinkData::new(root, 0, 4096).unwrap().to_uri();
    let err = open_link(&uri, fetcher.clone(), &buffers).await.unwrap_err();
    assert!(matches!(err, SialinkError::LayoutTruncated { .. }));

    // An unknown cipher tag in an otherwise valid layout.
    let layout = Layout {
        version: 1,
        filesize: 100,
        metadata_size: 0,
        fanout_size: 32,
        fanout_data_pieces: 1,
        fanout_parity_pieces: 0,
        cipher_type: CipherType::from_bytes(*b"rot13\0\0\0"),
        cipher_key: [0u8; 64],
    };
    let mut base = layout.encode().to_vec();
    base.extend_from_slice(&[1u8; 32]);
    let base_len = base.len() as u64;
    let root = fetcher.0.insert_sector(base);
    let uri = LinkData::new(root, 0, base_len).unwrap().to_uri();
    let err = open_link(&uri, fetcher.clone(), &buffers).await.unwrap_err();
    assert!(matches!(err, SialinkError::UnsupportedCipher(_)));
}

#[tokio::test]
async fn test_concurrent_readers_share_buffers() {
    let fetcher = new_fetcher();
    let content = generate_file(50_000);
    let (uri, _) = build_linkfile(&fetcher.0, &content, 1, 0, CipherType::PLAIN);

    let buffers = StreamBufferSet::new(4);
    let a = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();
    let b = open_link(&uri, fetcher.clone(), &buffers).await.unwrap();

    assert_eq!(a.id(), b.id());
    assert_eq!(buffers.buffer_count(), 1);

    let mut buf_a = vec![0u8; 1000];
    let mut buf_b = vec![0u8; 1000];
    a.read(&mut buf_a).await.unwrap();
    b.read(&mut buf_b).await.unwrap();
    assert_eq!(buf_a, buf_b);

    a.close().await;
    b.close().await;
    assert_eq!(buffers.buffer_count(), 0);
}
