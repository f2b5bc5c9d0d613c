//! Chunk planning - splits a remote file into contiguous inclusive byte ranges.

use std::fmt;

/// Inclusive byte range `[start, end]` of the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` header value for this chunk, resuming `offset` bytes in.
    pub fn range_header(&self, offset: u64) -> String {
        format!("bytes={}-{}", self.start + offset, self.end)
    }

    pub fn file_name(&self) -> String {
        chunk_file_name(self.index)
    }
}

pub fn chunk_file_name(index: usize) -> String {
    format!("chunk_{}", index)
}

/// Plan `ceil(size / chunk_size)` chunks covering `[0, size - 1]`.
///
/// The last chunk may be short. A zero `size` yields no chunks.
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(size.div_ceil(chunk_size) as usize);
    let mut start = 0;
    while start < size {
        let end = (start + chunk_size - 1).min(size - 1);
        chunks.push(Chunk {
            index: chunks.len(),
            start,
            end,
        });
        start = end + 1;
    }
    chunks
}

/// Lifecycle of one chunk task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Planned,
    Fetching,
    Retrying,
    Done,
    Failed,
}

impl ChunkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Done | ChunkState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(&self, next: ChunkState) -> bool {
        use ChunkState::*;
        matches!(
            (self, next),
            (Planned, Fetching)
                | (Planned, Failed)
                | (Fetching, Retrying)
                | (Fetching, Done)
                | (Fetching, Failed)
                | (Retrying, Fetching)
                | (Retrying, Failed)
        )
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkState::Planned => "planned",
            ChunkState::Fetching => "fetching",
            ChunkState::Retrying => "retrying",
            ChunkState::Done => "done",
            ChunkState::Failed => "failed",
        };
        f.write_str(s)
    }
}
