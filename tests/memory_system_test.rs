//! 记忆子系统集成测试：通过 MemorySystem 门面端到端验证存储、压缩与归档

use std::collections::HashSet;
use std::sync::Arc;

use bee_memory::archive::ArchiveReason;
use bee_memory::config::AppConfig;
use bee_memory::context::{ProcessingMethod, YarnConfig};
use bee_memory::llm::{cosine_similarity, Embedder, MockEmbedder};
use bee_memory::memory::{ContentType, MemoryStore, Message};
use bee_memory::storage::StorageLocation;
use bee_memory::MemorySystem;
use chrono::{Duration, Utc};

fn in_memory_system() -> MemorySystem {
    let mut config = AppConfig::default();
    config.storage.in_memory = true;
    MemorySystem::builder(config).with_embedding_backend(None).build()
}

#[tokio::test]
async fn test_store_then_list_returns_same_content() {
    let system = in_memory_system();
    let memory = system.memory();
    let id = memory
        .store_memory("the deploy key lives in the vault", "conv", ContentType::ContextInfo, 0.6, vec![])
        .await
        .unwrap();
    let all = memory.get_all_memories("conv").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, id);
    assert_eq!(all[0].content, "the deploy key lives in the vault");
    assert_eq!(all[0].content_type, ContentType::ContextInfo);
}

#[tokio::test]
async fn test_cosine_identity_and_zero() {
    let embedder = Embedder::lexical();
    let v = embedder.embed("orbital mechanics").await.unwrap();
    assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    let zero = vec![0.0f32; v.len()];
    assert_eq!(cosine_similarity(&v, &zero), 0.0);
}

#[tokio::test]
async fn test_rocket_budget_ranking() {
    let system = in_memory_system();
    let memory = system.memory();
    memory.store_memory("launch rocket budget $500", "C", ContentType::UserInput, 0.9, vec![]).await.unwrap();
    memory.store_memory("say hi", "C", ContentType::UserInput, 0.5, vec![]).await.unwrap();
    memory.store_memory("the rocket needs titanium", "C", ContentType::UserInput, 0.2, vec![]).await.unwrap();

    let hits = memory.retrieve_relevant_memories("rocket budget", "C", 10, 0.2).await.unwrap();
    let contents: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
    assert_eq!(&contents[..2], &["launch rocket budget $500", "the rocket needs titanium"]);
    assert!(!contents.contains(&"say hi"));
}

#[tokio::test]
async fn test_compression_preserves_head_and_tail() {
    let system = MemorySystem::builder({
        let mut config = AppConfig::default();
        config.storage.in_memory = true;
        config
    })
    .with_embedding_backend(None)
    .with_estimator(Arc::new(|text: &str| text.chars().count()))
    .build();
    let context = system.context();
    context
        .update_config(YarnConfig {
            base_context_length: 200,
            extended_context_length: 400,
            ..YarnConfig::standard()
        })
        .await;

    let start = Utc::now() - Duration::hours(1);
    let messages: Vec<Message> = (0..60)
        .map(|i| {
            Message::user(format!("turn {:02} chatter", i))
                .with_id(format!("id-{}", i))
                .with_timestamp(start + Duration::seconds(i))
        })
        .collect();
    let each = messages[0].content.chars().count();
    let target = 300;

    let result = context
        .process_conversation_context(&messages, "conv", Some(target))
        .await
        .unwrap();
    assert_eq!(result.processing_method, ProcessingMethod::Compression);

    let ids: HashSet<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
    for i in (0..2).chain(50..60) {
        assert!(ids.contains(format!("id-{}", i).as_str()), "missing id-{}", i);
    }
    assert!(result.token_count <= target + each);
    assert!(result.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_archive_then_recent_recall_returns_same_messages() {
    let system = in_memory_system();
    let archive = system.archive();
    let start = Utc::now() - Duration::minutes(30);
    let messages: Vec<Message> = vec![
        Message::user("Can we lower the budget for the launch?"),
        Message::assistant("Yes, trimming telemetry saves money."),
        Message::user("Then trim telemetry."),
        Message::assistant("Done, the plan is updated."),
        Message::user("Thanks."),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, m)| m.with_timestamp(start + Duration::minutes(i as i64 + 1)))
    .collect();

    let chunk = archive
        .archive_messages(&messages, "conv", ArchiveReason::TokenLimitReached)
        .await
        .unwrap();
    assert_eq!(chunk.time_end - chunk.time_start, Duration::minutes(4));

    let recent = archive.recall_history_by_time("conv", "recent", 1).await.unwrap();
    let archived: HashSet<&str> = recent[0].messages.iter().map(|m| m.id.as_str()).collect();
    let original: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(archived, original);

    let hits = archive.recall_history("budget", "conv", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(archive.recall_history("submarine", "conv", 5).await.unwrap().is_empty());

    let map = archive.get_memory_map("conv").await.unwrap();
    assert_eq!(map.total_tokens_archived, map.chunks.iter().map(|c| c.token_count).sum::<usize>());
}

#[tokio::test]
async fn test_restart_discovers_conversations_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let location = StorageLocation::Directory(dir.path().to_path_buf());
    {
        let store = MemoryStore::new(location.clone(), Arc::new(Embedder::lexical()));
        store.store_memory("rocket telemetry notes", "alpha", ContentType::Message, 0.5, vec![]).await.unwrap();
        store.store_memory("rocket engine notes", "beta", ContentType::Message, 0.5, vec![]).await.unwrap();
        store.close().await;
    }

    let fresh = MemoryStore::new(location, Arc::new(Embedder::lexical()));
    assert!(fresh.open_conversations().await.is_empty());
    let hits = fresh.search_all_conversations("rocket notes", 10, 0.2).await;
    let conversations: HashSet<&str> = hits.iter().map(|h| h.conversation_id.as_str()).collect();
    assert_eq!(conversations, HashSet::from(["alpha", "beta"]));

    let global = fresh.get_global_memory_statistics().await;
    assert_eq!(global.conversation_count, 2);
    assert_eq!(global.total_memories, 2);

    assert!(fresh.delete_conversation_database("alpha").await.unwrap());
    assert_eq!(fresh.known_conversations().await, vec!["beta".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_embedding_calls_never_overlap_across_conversations() {
    let mock = Arc::new(MockEmbedder::new(32).with_delay_ms(5));
    let embedder = Arc::new(Embedder::new(Some(mock.clone())).with_max_input_chars(64));
    let store = Arc::new(MemoryStore::in_memory(embedder));

    let mut handles = Vec::new();
    for c in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for i in 0..3 {
                let text = format!("conversation {} note {} {}", c, i, "x".repeat(200));
                store
                    .store_memory(&text, &format!("conv-{}", c), ContentType::Message, 0.5, vec![])
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(mock.calls(), 12);
    assert_eq!(mock.max_in_flight(), 1);
    assert!(mock.longest_input() <= 64);
}
