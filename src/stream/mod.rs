//! Stream reassembly: separating visible content from model reasoning.
//!
//! - [`markers`]: the marker spellings providers use for reasoning spans
//!   and their normalization to one canonical pair.
//! - [`StreamReassembler`]: per-stream state machine fed fragment by
//!   fragment; markers split across fragments are carried over.
//! - [`chunk`]: resolving heterogeneous provider JSON chunks into
//!   [`StreamChunk`].
//! - [`pipe`]: consuming a fragment `Stream` into a reassembler.

pub mod chunk;
pub mod markers;
pub mod pipe;
pub mod reassembler;

pub use chunk::{SseData, StreamChunk, parse_sse_data};
pub use pipe::{ReassemblingStream, reassemble, with_idle_timeout};
pub use reassembler::{
    FragmentDelta, Reassembled, StreamErrorRecord, StreamReassembler, TimeoutId, summarize_errors,
};
