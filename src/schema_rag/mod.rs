pub mod context;
pub mod embedder;
pub mod retriever;
pub mod schema;
pub mod vector_store;

pub use context::{ContextBuilder, SchemaContext};
pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use retriever::{SchemaIndex, SchemaSnapshot, ScoredTable};
pub use schema::{ColumnSchema, ForeignKeyRef, TableSchema};
pub use vector_store::{cosine_similarity, Embedding, EmbeddingStore, SchemaEmbedding};
