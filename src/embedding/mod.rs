//! 임베딩 모듈 - OpenAI API를 통한 텍스트 벡터화
//!
//! Q&A 지식 항목과 사용자 질문을 벡터로 변환하는 임베딩 프로바이더입니다.
//! 벡터 유사도 검색의 핵심 모듈입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_env()?;
//! let embedding = embedder.embed("관리비 납부 방법").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 임베딩 API 엔드포인트
/// source: https://platform.openai.com/docs/api-reference/embeddings
const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// 기본 임베딩 차원 (text-embedding-3-small)
pub const DEFAULT_DIMENSION: usize = 1536;

/// 전송 실패/429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// OpenAI 임베딩 구현체
///
/// source: https://platform.openai.com/docs/guides/embeddings
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
}

impl OpenAiEmbedding {
    /// 새 OpenAI 임베딩 인스턴스 생성 (기본 모델)
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API 키
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(
            api_key,
            crate::config::DEFAULT_EMBEDDING_MODEL.to_string(),
            DEFAULT_DIMENSION,
        )
    }

    /// 모델과 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API 키
    /// * `model` - 임베딩 모델 식별자
    /// * `dimension` - 임베딩 차원
    pub fn with_model(api_key: String, model: String, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: must be at least 1");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model,
            client,
            dimension,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key)
    }

    /// 환경변수에서 API 키를 읽고 모델을 지정하여 생성
    pub fn from_env_with_model(model: String) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::with_model(api_key, model, DEFAULT_DIMENSION)
    }

    /// 임베딩 차원 반환
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI API 요청 본문
/// source: https://platform.openai.com/docs/api-reference/embeddings/create
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: String,
}

/// OpenAI API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// OpenAI API 에러 응답
#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    error_type: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (전송 실패/429 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let response = match self
                .client
                .post(OPENAI_EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            // 성공
            if status.is_success() {
                let embed_response: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                let data = embed_response
                    .data
                    .into_iter()
                    .next()
                    .context("Embedding response contained no data")?;
                return Ok(data.embedding);
            }

            // 429 Rate Limit 에러 - 재시도
            if status.as_u16() == 429 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                if let Ok(error) = serde_json::from_str::<OpenAiError>(&body) {
                    anyhow::bail!(
                        "OpenAI API error ({}): {}",
                        error.error.error_type,
                        error.error.message
                    );
                }
                anyhow::bail!("OpenAI API error ({}): {}", status, body);
            }
        }

        // 모든 재시도 실패
        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// `OPENAI_API_KEY` 환경변수를 읽습니다.
pub fn get_api_key() -> Result<String> {
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            tracing::debug!("Using API key from OPENAI_API_KEY");
            return Ok(key);
        }
    }

    anyhow::bail!(
        "API key not found. Set OPENAI_API_KEY environment variable.\n\
         Get your API key at: https://platform.openai.com/api-keys"
    )
}

/// API 키 존재 여부 확인
///
/// 키가 없으면 RAG 파이프라인이 비활성화되고 키워드 검색만 동작합니다.
pub fn has_api_key() -> bool {
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return true;
        }
    }

    false
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성 (OpenAI API)
///
/// 환경변수에서 API 키를 읽어 OpenAiEmbedding을 생성합니다.
pub fn create_embedder(model: &str) -> Result<OpenAiEmbedding> {
    if !has_api_key() {
        anyhow::bail!(
            "OPENAI_API_KEY not set.\n\
             Set: export OPENAI_API_KEY=your-api-key\n\
             Get your API key at: https://platform.openai.com/api-keys"
        );
    }

    let embedder = OpenAiEmbedding::from_env_with_model(model.to_string())?;
    tracing::info!(
        "Using OpenAI embedding model {} (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_api_key() {
        // 환경변수 설정 여부에 따라 결과가 달라짐
        let _ = has_api_key();
    }

    #[test]
    fn test_invalid_dimension() {
        let result = OpenAiEmbedding::with_model(
            "fake_key".to_string(),
            "text-embedding-3-small".to_string(),
            0,
        );
        assert!(result.is_err());
        let err = result.err();
        assert!(err.is_some());
        assert!(err
            .as_ref()
            .map(|e| e.to_string().contains("Invalid dimension"))
            .unwrap_or(false));
    }

    #[test]
    fn test_default_dimension() {
        let embedder = OpenAiEmbedding::new("fake_key".to_string());
        assert!(embedder.is_ok());
        if let Ok(e) = embedder {
            assert_eq!(e.dimension(), DEFAULT_DIMENSION);
            assert_eq!(e.name(), crate::config::DEFAULT_EMBEDDING_MODEL);
        }
    }

    #[tokio::test]
    async fn test_embed_empty_text_returns_zero_vector() {
        let embedder = OpenAiEmbedding::new("fake_key".to_string());
        assert!(embedder.is_ok());
        if let Ok(e) = embedder {
            let result = e.embed("   ").await;
            assert!(result.is_ok());
            if let Ok(vec) = result {
                assert_eq!(vec.len(), DEFAULT_DIMENSION);
                assert!(vec.iter().all(|&v| v == 0.0));
            }
        }
    }
}
