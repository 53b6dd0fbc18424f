//! Fanout streamer
//!
//! Presents the file behind a sialink as a random-access byte stream. The
//! link names a sector sub-range holding the layout header and fanout; the
//! fanout names the piece roots of every chunk; reads fetch pieces through
//! the external sector fetcher, decrypt them and erasure-decode the chunk.

use crate::buffer::{ChunkSource, Stream, StreamBufferSet};
use crate::fetcher::SectorFetcher;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use sialink_core::crypto::MasterKey;
use sialink_core::erasure::ErasureCoder;
use sialink_core::error::{Result, SialinkError};
use sialink_core::fanout::decode_fanout;
use sialink_core::layout::{Layout, LAYOUT_SIZE};
use sialink_core::link::{LinkData, SectorRoot, StreamId};
use sialink_core::SECTOR_SIZE;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// The chunk table and fetch machinery behind one open link.
struct FanoutSource {
    /// Piece roots for every chunk, in file order.
    chunks: Vec<Vec<SectorRoot>>,
    chunk_size: u64,
    filesize: u64,
    master_key: MasterKey,
    erasure: ErasureCoder,
    stream_id: StreamId,
    fetcher: Arc<dyn SectorFetcher>,
    closed: Mutex<bool>,
    /// Roots currently handed to the fetcher and not yet released. Whoever
    /// removes a root from this set owns its release, so each reservation is
    /// handed back exactly once even when `close` races a fetch.
    in_flight: Mutex<HashSet<SectorRoot>>,
}

impl FanoutSource {
    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Flip the close flag and hand the outstanding fetch reservations back
    /// to the fetcher so it can cancel in-flight work. Safe to call more
    /// than once.
    fn close(&self) {
        {
            let mut closed = self.closed.lock();
            if *closed {
                return;
            }
            *closed = true;
        }
        let outstanding: Vec<SectorRoot> = self.in_flight.lock().drain().collect();
        for root in outstanding {
            self.fetcher.release(root);
        }
    }

    /// Fetch and recover one chunk.
    ///
    /// Every non-zero piece root is fired at once; the first `min_pieces`
    /// fetches to come back decrypted win and the rest are abandoned. Every
    /// root actually handed to the fetcher is released exactly once, on
    /// success and failure alike.
    async fn fetch_chunk(&self, chunk_index: u64) -> Result<Bytes> {
        if self.is_closed() {
            return Err(SialinkError::Closed);
        }

        let roots = self.chunks.get(chunk_index as usize).ok_or_else(|| {
            SialinkError::OutOfBounds {
                offset: chunk_index * self.chunk_size,
                len: 0,
                filesize: self.filesize,
            }
        })?;

        let attempts: Vec<(u64, SectorRoot)> = roots
            .iter()
            .enumerate()
            .filter(|(_, root)| !root.is_zero())
            .map(|(piece_index, root)| (piece_index as u64, *root))
            .collect();
        if attempts.is_empty() {
            return Err(SialinkError::EmptyChunk(chunk_index));
        }

        let required = self.erasure.min_pieces();
        debug!(
            stream = %self.stream_id,
            chunk = chunk_index,
            pieces = attempts.len(),
            required,
            "fetching chunk"
        );

        let mut fetches: FuturesUnordered<_> = attempts
            .iter()
            .map(|&(piece_index, root)| async move {
                // Register the root right before it goes to the fetcher;
                // only registered roots ever need releasing.
                {
                    let closed = self.closed.lock();
                    if *closed {
                        return (piece_index, Err(SialinkError::Closed));
                    }
                    self.in_flight.lock().insert(root);
                }
                let fetched = self.fetcher.fetch_piece(root, chunk_index, piece_index).await;
                let decrypted = fetched
                    .and_then(|data| self.master_key.decrypt_piece(data, chunk_index, piece_index));
                (piece_index, decrypted)
            })
            .collect();

        let mut pieces: Vec<Option<Vec<u8>>> = vec![None; self.erasure.total_pieces()];
        let mut available = 0;
        while let Some((piece_index, result)) = fetches.next().await {
            match result {
                Ok(data) => {
                    pieces[piece_index as usize] = Some(data.to_vec());
                    available += 1;
                    if available >= required {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        stream = %self.stream_id,
                        chunk = chunk_index,
                        piece = piece_index,
                        error = %err,
                        "piece fetch failed"
                    );
                }
            }
        }
        // Abandon the losers, then hand back every reservation this fetch
        // still owns. Roots already drained by a racing `close` are skipped;
        // roots whose futures were never polled were never acquired.
        drop(fetches);
        let released: Vec<SectorRoot> = {
            let mut in_flight = self.in_flight.lock();
            attempts
                .iter()
                .map(|&(_, root)| root)
                .filter(|root| in_flight.remove(root))
                .collect()
        };
        for root in released {
            self.fetcher.release(root);
        }

        if self.is_closed() {
            return Err(SialinkError::Closed);
        }
        if available < required {
            return Err(SialinkError::InsufficientPieces {
                available,
                required,
            });
        }

        let mut chunk = self.erasure.recover(&mut pieces)?;

        // The final chunk only carries the remainder of the file.
        let chunk_start = chunk_index * self.chunk_size;
        let chunk_len = self.chunk_size.min(self.filesize - chunk_start) as usize;
        if chunk.len() > chunk_len {
            chunk.truncate(chunk_len);
        }
        Ok(chunk)
    }
}

impl ChunkSource for FanoutSource {
    fn id(&self) -> StreamId {
        self.stream_id
    }

    fn data_size(&self) -> u64 {
        self.filesize
    }

    fn request_size(&self) -> u64 {
        self.chunk_size
    }

    fn read_at<'a>(
        &'a self,
        buf: &'a mut [u8],
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            if offset < 0 {
                return Err(SialinkError::NegativeOffset(offset));
            }
            let offset = offset as u64;
            if buf.len() as u64 > self.chunk_size {
                return Err(SialinkError::OversizedRead {
                    len: buf.len(),
                    max: self.chunk_size,
                });
            }
            if offset % self.chunk_size != 0 {
                return Err(SialinkError::UnalignedRead {
                    offset,
                    align: self.chunk_size,
                });
            }
            if offset + buf.len() as u64 > self.filesize {
                return Err(SialinkError::OutOfBounds {
                    offset,
                    len: buf.len(),
                    filesize: self.filesize,
                });
            }
            if buf.is_empty() {
                return Ok(0);
            }

            let chunk_index = offset / self.chunk_size;
            let chunk = self.fetch_chunk(chunk_index).await?;
            let n = buf.len().min(chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        })
    }
}

/// Streaming reader over the file referenced by a sialink.
///
/// Obtained from [`open_link`]. Random access follows the chunk-aligned
/// [`read_at`](Self::read_at) contract; [`read`](Self::read) serves
/// arbitrary sequential reads through the shared stream buffer. Reads on one
/// streamer are serialized; separate streamers over the same link share
/// decoded chunks by stream ID.
pub struct FanoutStreamer {
    source: Arc<FanoutSource>,
    state: tokio::sync::Mutex<StreamerState>,
}

impl std::fmt::Debug for FanoutStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutStreamer")
            .field("id", &self.source.stream_id)
            .field("data_size", &self.source.filesize)
            .finish()
    }
}

struct StreamerState {
    stream: Stream,
    closed: bool,
}

impl FanoutStreamer {
    /// The id of the sialink being fetched: the hash of the link text.
    pub fn id(&self) -> StreamId {
        self.source.stream_id
    }

    /// Total bytes of file data behind the link.
    pub fn data_size(&self) -> u64 {
        self.source.filesize
    }

    /// The chunk size, which is also the largest legal `read_at` request.
    pub fn request_size(&self) -> u64 {
        self.source.chunk_size
    }

    /// Chunk-aligned random-access read.
    ///
    /// `offset` must be non-negative, a multiple of
    /// [`request_size`](Self::request_size); `buf` must not span more than
    /// one chunk and the request must end within the file.
    pub async fn read_at(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(SialinkError::Closed);
        }
        self.source.read_at(buf, offset).await
    }

    /// Sequential buffered read at the stream cursor.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SialinkError::Closed);
        }
        state.stream.read(buf).await
    }

    /// Move the stream cursor.
    pub async fn seek(&self, offset: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SialinkError::Closed);
        }
        state.stream.seek(offset)
    }

    /// Close the streamer.
    ///
    /// Outstanding piece fetches are cancelled through the fetcher, in-flight
    /// reads fail with [`SialinkError::Closed`], cached chunks are released
    /// with the stream buffer. Idempotent.
    pub async fn close(&self) {
        // Flip the source flag first so reads already past the state lock
        // fail instead of fetching.
        self.source.close();
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.stream.close();
    }
}

/// Open a streamer over the file referenced by `link_text`.
///
/// Fetches the base sector, recovers the layout and fanout from the linked
/// sub-range and wires the resulting chunk source into `buffers`.
pub async fn open_link(
    link_text: &str,
    fetcher: Arc<dyn SectorFetcher>,
    buffers: &Arc<StreamBufferSet>,
) -> Result<FanoutStreamer> {
    let link = LinkData::from_uri(link_text)?;
    let (offset, length) = link.offset_and_len();
    let root = link.merkle_root();

    let fetched = fetcher.fetch_piece(root, 0, 0).await;
    fetcher.release(root);
    let sector = fetched?;

    // The linked sub-range must at least hold a layout header. The length is
    // rounded up by the link encoding, so it may run past the stored bytes.
    let offset = offset as usize;
    let needed = offset + LAYOUT_SIZE;
    if sector.len() < needed {
        return Err(SialinkError::LayoutTruncated {
            expected: needed,
            actual: sector.len(),
        });
    }
    let end = sector.len().min(offset + length as usize);
    let sub = &sector[offset..end];

    let layout = Layout::decode(sub)?;
    let fanout_start = LAYOUT_SIZE + usize::from(layout.metadata_size);
    let fanout_end = fanout_start + usize::from(layout.fanout_size);
    if sub.len() < fanout_end {
        return Err(SialinkError::LayoutTruncated {
            expected: fanout_end,
            actual: sub.len(),
        });
    }
    let chunks = decode_fanout(&layout, &sub[fanout_start..fanout_end])?;

    let master_key = MasterKey::new(layout.cipher_type, layout.cipher_key)?;
    let erasure = ErasureCoder::new(layout.fanout_data_pieces, layout.fanout_parity_pieces)?;

    let source = Arc::new(FanoutSource {
        chunk_size: SECTOR_SIZE * u64::from(layout.fanout_data_pieces),
        filesize: layout.filesize,
        chunks,
        master_key,
        erasure,
        stream_id: link.stream_id(),
        fetcher,
        closed: Mutex::new(false),
        in_flight: Mutex::new(HashSet::new()),
    });

    debug!(
        stream = %source.stream_id,
        filesize = source.filesize,
        chunks = source.chunks.len(),
        data_pieces = layout.fanout_data_pieces,
        parity_pieces = layout.fanout_parity_pieces,
        cipher = %layout.cipher_type,
        "opened fanout streamer"
    );

    let stream = buffers.new_stream(source.clone() as Arc<dyn ChunkSource>, 0);
    Ok(FanoutStreamer {
        source,
        state: tokio::sync::Mutex::new(StreamerState {
            stream,
            closed: false,
        }),
    })
}
