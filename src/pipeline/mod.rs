//! Transfer pipeline: chunking the encrypted stream for transmission and
//! reassembling received chunks back into it.

pub mod chunk;
pub mod reassembly;

pub use chunk::{chunk_count, chunks, ChunkRecord};
pub use reassembly::Reassembler;
