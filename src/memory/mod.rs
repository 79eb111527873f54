//! 记忆层：每会话语义记忆库、检索打分、旧库迁移，以及共享的分词与 token 预算工具

pub mod conversation;
pub mod database;
pub mod legacy;
pub mod store;
pub mod token_budget;
pub mod tokenizer;
pub mod types;

pub use conversation::{Message, Role};
pub use database::MemoryDatabase;
pub use legacy::{migrate_legacy_store, MigrationReport};
pub use store::MemoryStore;
pub use token_budget::{truncate_to_sentences, HeuristicEstimator, TokenEstimator};
pub use types::{ContentType, GlobalMemoryStatistics, MemoryEntry, MemoryStatistics};
