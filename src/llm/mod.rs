//! 嵌入层：后端抽象（OpenAI 兼容 / Mock）、词法降级与全局串行化入口

pub mod embedding;
pub mod gate;
pub mod lexical;
pub mod mock;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use gate::Embedder;
pub use lexical::{cosine_similarity, LexicalEmbedder, LEXICAL_DIMENSIONS};
pub use mock::MockEmbedder;
