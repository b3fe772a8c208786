pub mod embedding;
pub mod enricher;
pub mod normalizer;

pub use embedding::{EmbeddingConfig, EmbeddingGenerator};
pub use enricher::{EnricherConfig, MetadataEnricher};
pub use normalizer::{FieldNormalizer, NormalizerConfig};
