//! 런타임 설정 - 환경변수 기반
//!
//! RAG 파이프라인에 필요한 모델/검색 설정을 환경변수에서 읽습니다.
//! API 키가 없으면 RAG가 비활성화되고 키워드 검색만 동작하므로,
//! 키 부재는 시작 오류가 아닙니다. 반면 숫자 값이 잘못된 경우에는
//! 시작 시점에 즉시 실패합니다.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::knowledge::get_data_dir;

/// 기본 임베딩 모델 (1536차원)
/// ref: https://platform.openai.com/docs/guides/embeddings
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// 기본 답변 생성 모델
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// 벡터 검색 기본 top-K
pub const DEFAULT_RAG_TOP_K: usize = 3;

/// 벡터 검색 기본 최소 유사도
pub const DEFAULT_RAG_MIN_SCORE: f32 = 0.5;

/// 답변 생성 temperature
pub const SYNTH_TEMPERATURE: f32 = 0.3;

/// 답변 생성 최대 토큰 수
pub const SYNTH_MAX_TOKENS: u32 = 1000;

// ============================================================================
// AppConfig
// ============================================================================

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 임베딩 모델 식별자
    pub embedding_model: String,
    /// 답변 생성 모델 식별자
    pub chat_model: String,
    /// 벡터 검색 top-K
    pub rag_top_k: usize,
    /// 벡터 검색 최소 유사도 (이보다 낮은 결과는 제외)
    pub rag_min_score: f32,
    /// 데이터 디렉토리 (SQLite DB 위치)
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            rag_top_k: DEFAULT_RAG_TOP_K,
            rag_min_score: DEFAULT_RAG_MIN_SCORE,
            data_dir: get_data_dir(),
        }
    }
}

impl AppConfig {
    /// 환경변수에서 설정 로드
    ///
    /// 지원 환경변수:
    /// - `EMBEDDING_MODEL`, `CHAT_MODEL`
    /// - `RAG_TOP_K`, `RAG_MIN_SCORE`
    /// - `SODAM_DATA_DIR`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            if !model.is_empty() {
                config.embedding_model = model;
            }
        }

        if let Ok(model) = std::env::var("CHAT_MODEL") {
            if !model.is_empty() {
                config.chat_model = model;
            }
        }

        if let Ok(val) = std::env::var("RAG_TOP_K") {
            config.rag_top_k = val
                .parse()
                .with_context(|| format!("Invalid RAG_TOP_K: {}", val))?;
            if config.rag_top_k == 0 {
                anyhow::bail!("RAG_TOP_K must be at least 1");
            }
        }

        if let Ok(val) = std::env::var("RAG_MIN_SCORE") {
            config.rag_min_score = val
                .parse()
                .with_context(|| format!("Invalid RAG_MIN_SCORE: {}", val))?;
            if !(0.0..=1.0).contains(&config.rag_min_score) {
                anyhow::bail!(
                    "RAG_MIN_SCORE must be in [0.0, 1.0], got {}",
                    config.rag_min_score
                );
            }
        }

        if let Ok(dir) = std::env::var("SODAM_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
