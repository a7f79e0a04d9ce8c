pub mod loader;
pub mod parser;
pub mod chunker;

pub use loader::DocumentLoader;
pub use parser::{
    DocumentParser, ExtractionFailed, ExtractionMethod, ExtractionResult, NoopOcrProvider,
    OcrProvider, ParsedDocument,
};
pub use chunker::{Chunk, ChunkingFailed, Language, TextChunker};
