//! sodam-chat - 멀티테넌트 고객지원 챗봇 백엔드
//!
//! 테넌트(회사)별 Q&A 지식베이스에 대한 2단계 검색 파이프라인:
//! 벡터 유사도 검색 + LLM 답변 생성(RAG), 실패 시 키워드 매칭 폴백.

pub mod chat;
pub mod cli;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod knowledge;
pub mod quota;

// Re-exports
pub use chat::{RagEngine, RagOutcome, RagResult, DEFAULT_SYSTEM_PROMPT, FALLBACK_MESSAGE};
pub use completion::{ChatMessage, Completion, CompletionProvider, OpenAiCompletion};
pub use config::AppConfig;
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, OpenAiEmbedding};
pub use knowledge::{
    cosine_similarity, get_data_dir, ChatLogEntry, DuplicateHit, EmbeddingRecord, KeywordMatch,
    KeywordMatcher, KnowledgeStore, NewChatLog, NewQaEntry, QaEntry, QaUpdate, RebuildStats,
    StoreStats, TenantScope, UnansweredQuestion, VectorHit, VectorIndex, EMBEDDING_DIMENSION,
};
pub use quota::{QuotaError, TenantQuota, TenantUsage};
