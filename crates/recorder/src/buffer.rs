//! Bounded chunk buffer.

/// Encoded chunks awaiting assembly.
///
/// Once `max_chunks` is reached the oldest half is discarded. The
/// resulting recording is missing its beginning, so the buffer remembers
/// that it truncated.
#[derive(Debug)]
pub struct ChunkBuffer {
    chunks: Vec<Vec<u8>>,
    max_chunks: usize,
    bytes: usize,
    dropped_chunks: usize,
    truncated: bool,
}

impl ChunkBuffer {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            chunks: Vec::new(),
            max_chunks: max_chunks.max(2),
            bytes: 0,
            dropped_chunks: 0,
            truncated: false,
        }
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        if self.chunks.len() >= self.max_chunks {
            let drop = self.chunks.len() / 2;
            let dropped_bytes: usize = self.chunks.drain(..drop).map(|c| c.len()).sum();
            self.bytes -= dropped_bytes;
            self.dropped_chunks += drop;
            self.truncated = true;
            tracing::warn!(
                dropped = drop,
                dropped_bytes,
                kept = self.chunks.len(),
                "Recording buffer full; discarded the oldest chunks"
            );
        }
        self.bytes += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn dropped_chunks(&self) -> usize {
        self.dropped_chunks
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Concatenate every chunk in arrival order.
    pub fn assemble(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.bytes);
        for chunk in &self.chunks {
            blob.extend_from_slice(chunk);
        }
        blob
    }
}
