//! 답변 생성 모듈 - OpenAI Chat Completions API
//!
//! 검색된 근거 항목을 바탕으로 자연어 답변을 합성합니다.
//! 임베딩 모듈과 동일한 재시도/백오프 정책을 사용합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::get_api_key;

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// 대화 메시지 (role: "system" | "user" | "assistant")
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// 답변 생성 결과
#[derive(Debug, Clone)]
pub struct Completion {
    /// 생성된 답변 본문
    pub content: String,
    /// 프롬프트 + 답변 총 토큰 수 (사용량 집계용)
    pub total_tokens: u32,
}

/// 답변 생성 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 메시지 목록으로부터 답변 생성
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Completion>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Chat Completion
// ============================================================================

/// OpenAI Chat Completions API 엔드포인트
/// source: https://platform.openai.com/docs/api-reference/chat
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// 전송 실패/429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// OpenAI 답변 생성 구현체
#[derive(Debug)]
pub struct OpenAiCompletion {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    /// 새 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API 키
    /// * `model` - 답변 생성 모델 식별자
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model,
            client,
        })
    }

    /// 환경변수에서 API 키를 읽고 모델을 지정하여 생성
    pub fn from_env_with_model(model: String) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, model)
    }
}

/// OpenAI Chat API 요청 본문
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

/// OpenAI Chat API 응답
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
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
impl CompletionProvider for OpenAiCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Completion> {
        if messages.is_empty() {
            anyhow::bail!("Completion requires at least one message");
        }

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (전송 실패/429 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let response = match self
                .client
                .post(OPENAI_CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send chat request: {}", e));
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
                let chat_response: ChatResponse =
                    serde_json::from_str(&body).context("Failed to parse chat response")?;
                let choice = chat_response
                    .choices
                    .into_iter()
                    .next()
                    .context("Chat response contained no choices")?;
                let content = choice
                    .message
                    .content
                    .map(|c| c.trim().to_string())
                    .unwrap_or_default();
                if content.is_empty() {
                    anyhow::bail!("Chat response contained empty content");
                }
                let total_tokens = chat_response.usage.map(|u| u.total_tokens).unwrap_or(0);
                return Ok(Completion {
                    content,
                    total_tokens,
                });
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

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Completion failed after {} retries", MAX_RETRIES)))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("규칙");
        assert_eq!(sys.role, "system");
        assert_eq!(sys.content, "규칙");

        let user = ChatMessage::user("질문");
        assert_eq!(user.role, "user");
        assert_eq!(user.content, "질문");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "choices": [{"message": {"content": "안녕하세요"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("안녕하세요")
        );
        assert_eq!(parsed.usage.map(|u| u.total_tokens), Some(15));
    }

    #[test]
    fn test_response_parsing_without_usage() {
        let body = r#"{"choices": [{"message": {"content": "ok"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_provider_name() {
        let provider = OpenAiCompletion::new("fake_key".to_string(), "gpt-4o-mini".to_string());
        assert!(provider.is_ok());
        if let Ok(p) = provider {
            assert_eq!(p.name(), "gpt-4o-mini");
        }
    }
}
