//! Stream aggregation: ordered chunks in, one final answer out.
//!
//! Finalization: the last `result` chunk wins verbatim. Without one, the
//! contents of every `text` chunk are concatenated in arrival order with no
//! separator. An empty outcome yields no message.

use rd_protocol::{Chunk, ChunkKind};

/// Ordered chunks of one in-flight exchange.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregationBuffer {
    chunks: Vec<Chunk>,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Final content, or `None` when nothing displayable was streamed.
    pub fn finalize(&self) -> Option<String> {
        finalize(&self.chunks)
    }

    pub fn projection(&self) -> Projection<'_> {
        Projection::of(&self.chunks)
    }
}

pub fn finalize(chunks: &[Chunk]) -> Option<String> {
    let content = match chunks.iter().rev().find(|c| c.kind == ChunkKind::Result) {
        Some(result) => result.content.clone(),
        None => chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Text)
            .map(|c| c.content.as_str())
            .collect(),
    };
    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

/// Live, display-only view of a streaming exchange.
#[derive(Debug, PartialEq, Eq)]
pub struct Projection<'a> {
    /// Every non-`result` chunk, chronologically.
    pub activity: Vec<&'a Chunk>,
    /// The latest `result` chunk, shown beneath the activity log.
    pub provisional: Option<&'a Chunk>,
}

impl<'a> Projection<'a> {
    pub fn of(chunks: &'a [Chunk]) -> Self {
        let (results, activity): (Vec<&Chunk>, Vec<&Chunk>) =
            chunks.iter().partition(|c| c.kind == ChunkKind::Result);
        Self {
            activity,
            provisional: results.last().copied(),
        }
    }

    /// True until a `result` chunk has arrived.
    pub fn working(&self) -> bool {
        self.provisional.is_none()
    }
}
