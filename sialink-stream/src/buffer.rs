//! Stream buffer layer
//!
//! Wraps chunk-aligned data sources with caching and hands out sequential
//! readers. Sources are deduplicated by stream ID, so concurrent readers of
//! the same link share one buffer and one cache; buffers are refcounted and
//! dropped when the last reader closes.

use bytes::Bytes;
use parking_lot::Mutex;
use sialink_core::error::{Result, SialinkError};
use sialink_core::link::StreamId;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default number of decoded chunks each buffer holds.
pub const DEFAULT_CACHE_CHUNKS: usize = 4;

/// A chunk-aligned random-access data source consumed by the buffer layer.
pub trait ChunkSource: Send + Sync {
    /// Identifier used to share buffers across readers of the same link.
    fn id(&self) -> StreamId;

    /// Total bytes of file data.
    fn data_size(&self) -> u64;

    /// The fetch granularity; reads through the source must be aligned to
    /// it and no larger.
    fn request_size(&self) -> u64;

    /// Fetch the chunk-aligned range starting at `offset` into `buf`.
    fn read_at<'a>(
        &'a self,
        buf: &'a mut [u8],
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>>;
}

/// Bounded insertion-ordered cache of decoded chunks.
struct ChunkCache {
    capacity: usize,
    chunks: HashMap<u64, Bytes>,
    order: VecDeque<u64>,
}

impl ChunkCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            chunks: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, index: u64) -> Option<Bytes> {
        let data = self.chunks.get(&index).cloned()?;
        // Touch: a hit moves the chunk to the back of the eviction queue.
        if let Some(pos) = self.order.iter().position(|&i| i == index) {
            self.order.remove(pos);
            self.order.push_back(index);
        }
        Some(data)
    }

    fn put(&mut self, index: u64, data: Bytes) {
        if self.chunks.insert(index, data).is_none() {
            self.order.push_back(index);
        }
        while self.chunks.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.chunks.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// One shared buffer: a data source plus its chunk cache.
pub struct StreamBuffer {
    source: Arc<dyn ChunkSource>,
    cache: Mutex<ChunkCache>,
    refs: AtomicUsize,
}

impl StreamBuffer {
    /// Fetch chunk `index` through the cache.
    async fn chunk(&self, index: u64) -> Result<Bytes> {
        if let Some(data) = self.cache.lock().get(index) {
            return Ok(data);
        }

        let request_size = self.source.request_size();
        let data_size = self.source.data_size();
        let offset = index * request_size;
        if offset >= data_size {
            return Err(SialinkError::OutOfBounds {
                offset,
                len: 0,
                filesize: data_size,
            });
        }

        let len = request_size.min(data_size - offset) as usize;
        let mut buf = vec![0u8; len];
        let n = self.source.read_at(&mut buf, offset as i64).await?;
        buf.truncate(n);

        let data = Bytes::from(buf);
        self.cache.lock().put(index, data.clone());
        Ok(data)
    }
}

/// Shared set of stream buffers, deduplicated by source ID.
pub struct StreamBufferSet {
    buffers: Mutex<HashMap<StreamId, Arc<StreamBuffer>>>,
    cache_chunks: usize,
}

impl StreamBufferSet {
    /// Create a buffer set holding `cache_chunks` decoded chunks per source.
    pub fn new(cache_chunks: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(HashMap::new()),
            cache_chunks,
        })
    }

    /// Wrap `source` in a stream positioned at `initial_offset`, sharing
    /// chunk buffers with any other stream over the same source.
    pub fn new_stream(self: &Arc<Self>, source: Arc<dyn ChunkSource>, initial_offset: u64) -> Stream {
        let id = source.id();
        let buffer = {
            let mut buffers = self.buffers.lock();
            let buffer = buffers
                .entry(id)
                .or_insert_with(|| {
                    debug!(stream = %id, "creating stream buffer");
                    Arc::new(StreamBuffer {
                        source,
                        cache: Mutex::new(ChunkCache::new(self.cache_chunks)),
                        refs: AtomicUsize::new(0),
                    })
                })
                .clone();
            buffer.refs.fetch_add(1, Ordering::SeqCst);
            buffer
        };

        Stream {
            set: Arc::clone(self),
            buffer,
            offset: initial_offset,
            closed: false,
        }
    }

    /// Number of live buffers, for tests and introspection.
    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    fn drop_stream(&self, id: StreamId) {
        let mut buffers = self.buffers.lock();
        if let Some(buffer) = buffers.get(&id) {
            if buffer.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
                debug!(stream = %id, "dropping stream buffer");
                buffers.remove(&id);
            }
        }
    }
}

impl Default for StreamBufferSet {
    fn default() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            cache_chunks: DEFAULT_CACHE_CHUNKS,
        }
    }
}

/// Sequential reader over a shared stream buffer.
///
/// Reads may start and end anywhere; the stream translates them into
/// chunk-aligned fetches against the source and serves the tails from the
/// shared cache.
pub struct Stream {
    set: Arc<StreamBufferSet>,
    buffer: Arc<StreamBuffer>,
    offset: u64,
    closed: bool,
}

impl Stream {
    /// The current read position.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Move the read position.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if self.closed {
            return Err(SialinkError::Closed);
        }
        let data_size = self.buffer.source.data_size();
        if offset > data_size {
            return Err(SialinkError::OutOfBounds {
                offset,
                len: 0,
                filesize: data_size,
            });
        }
        self.offset = offset;
        Ok(())
    }

    /// Read from the current position, advancing it. Returns 0 at EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(SialinkError::Closed);
        }

        let data_size = self.buffer.source.data_size();
        let request_size = self.buffer.source.request_size();
        let mut copied = 0;

        while copied < buf.len() && self.offset < data_size {
            let index = self.offset / request_size;
            let chunk = self.buffer.chunk(index).await?;

            let within = (self.offset - index * request_size) as usize;
            let n = (buf.len() - copied).min(chunk.len().saturating_sub(within));
            if n == 0 {
                break;
            }
            buf[copied..copied + n].copy_from_slice(&chunk[within..within + n]);
            copied += n;
            self.offset += n as u64;
        }
        Ok(copied)
    }

    /// Drop this stream's claim on the shared buffer. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.set.drop_stream(self.buffer.source.id());
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}
