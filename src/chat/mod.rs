//! RAG 오케스트레이터 - 2단계 답변 파이프라인
//!
//! 질문 임베딩 → 벡터 검색 → LLM 답변 합성을 순서대로 시도하고,
//! 각 단계가 실패하면 키워드 매칭으로 내려갑니다. 어떤 경로로든
//! 항상 답변 문자열을 반환하며, 호출자에게 오류로 새지 않습니다.
//! (쿼터 초과만 예외로 전달됩니다.)

use std::time::Instant;

use anyhow::Result;

use crate::completion::{ChatMessage, CompletionProvider};
use crate::config::{AppConfig, SYNTH_MAX_TOKENS, SYNTH_TEMPERATURE};
use crate::embedding::EmbeddingProvider;
use crate::knowledge::{
    KeywordMatcher, KnowledgeStore, NewChatLog, StoreStats, TenantScope, VectorIndex,
};
use crate::quota;

/// 어떤 경로로도 답을 찾지 못했을 때의 고정 응답
pub const FALLBACK_MESSAGE: &str = "죄송합니다. 해당 질문에 대한 답변을 찾지 못했습니다. \
     다른 키워드로 다시 질문해 주시거나, 고객센터에 문의해 주세요.";

/// 테넌트 템플릿이 없을 때 사용하는 기본 시스템 프롬프트
pub const DEFAULT_SYSTEM_PROMPT: &str = "당신은 고객지원 챗봇입니다. 아래 규칙을 반드시 따르세요:

1. 제공된 근거(Evidence) 내용만을 기반으로 답변하세요.
2. 근거에서 답을 찾을 수 없으면 \"해당 내용은 확인이 필요합니다. 고객센터에 문의해 주세요.\"라고 답하세요.
3. 친절하고 간결한 한국어로 답변하세요.
4. 답변에 근거 번호를 포함하지 마세요.";

// ============================================================================
// Result Types
// ============================================================================

/// 파이프라인이 끝난 지점
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RagOutcome {
    /// 벡터 검색 + LLM 합성 성공
    Rag,
    /// 합성 실패, 최상위 근거의 저장 답변을 그대로 반환
    EvidenceFallback,
    /// 키워드 매칭으로 답변
    Keyword,
    /// 어떤 경로로도 매칭 실패, 고정 폴백 메시지
    NoMatch,
}

/// 답변 결과
#[derive(Debug, Clone)]
pub struct RagResult {
    pub answer: String,
    pub used_rag: bool,
    pub outcome: RagOutcome,
    /// 답변의 주 근거 항목 (근거 없으면 None)
    pub qa_id: Option<i64>,
    /// 주 근거 항목의 카테고리
    pub category: Option<String>,
    /// 벡터 검색이 반환한 근거 전체 (유사도 내림차순)
    pub evidence_ids: Vec<i64>,
    /// 근거 유사도 산술평균, 소수점 4자리 (벡터 경로에서만 Some)
    pub similarity_score: Option<f64>,
    /// 키워드 매칭 신뢰도 (키워드 경로에서만 Some)
    pub confidence: Option<f64>,
    pub tokens_used: i64,
    pub latency_ms: i64,
}

impl RagResult {
    fn no_match() -> Self {
        Self {
            answer: FALLBACK_MESSAGE.to_string(),
            used_rag: false,
            outcome: RagOutcome::NoMatch,
            qa_id: None,
            category: None,
            evidence_ids: Vec::new(),
            similarity_score: None,
            confidence: None,
            tokens_used: 0,
            latency_ms: 0,
        }
    }
}

// ============================================================================
// RagEngine
// ============================================================================

/// RAG 엔진
///
/// 저장소, 벡터 인덱스, 키워드 매처, 외부 프로바이더를 한데 묶는
/// 최상위 진입점입니다. 프로바이더가 None이면 (API 키 미설정 등)
/// 키워드 검색만으로 동작합니다.
pub struct RagEngine {
    store: KnowledgeStore,
    index: VectorIndex,
    matcher: KeywordMatcher,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    completer: Option<Box<dyn CompletionProvider>>,
    config: AppConfig,
}

impl RagEngine {
    pub fn new(
        store: KnowledgeStore,
        config: AppConfig,
        embedder: Option<Box<dyn EmbeddingProvider>>,
        completer: Option<Box<dyn CompletionProvider>>,
    ) -> Result<Self> {
        let index = VectorIndex::new(&store);
        let matcher = KeywordMatcher::new()?;

        if embedder.is_none() || completer.is_none() {
            tracing::info!("RAG providers not configured; keyword search only");
        }

        Ok(Self {
            store,
            index,
            matcher,
            embedder,
            completer,
            config,
        })
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn matcher(&self) -> &KeywordMatcher {
        &self.matcher
    }

    pub fn stats(&self, scope: TenantScope) -> Result<StoreStats> {
        self.store.stats(scope)
    }

    /// 질문에 답변하고 로그/사용량을 기록
    ///
    /// 쿼터 초과는 `QuotaError`로 전달됩니다 (downcast 가능).
    /// 그 외의 검색 실패는 폴백 경로를 타므로 오류가 아닙니다.
    pub async fn answer(
        &self,
        company_id: i64,
        session_id: &str,
        question: &str,
    ) -> Result<RagResult> {
        quota::check_chat_quota(&self.store, company_id)?;

        let started = Instant::now();
        let mut result = self.retrieve(company_id, question).await;
        result.latency_ms = started.elapsed().as_millis() as i64;

        self.store.append_chat_log(NewChatLog {
            company_id,
            session_id: session_id.to_string(),
            question: question.to_string(),
            answer: result.answer.clone(),
            qa_id: result.qa_id,
            category: result.category.clone(),
            evidence_ids: result.evidence_ids.clone(),
            used_rag: result.used_rag,
            confidence: result.similarity_score.or(result.confidence),
            latency_ms: result.latency_ms,
            tokens_used: result.tokens_used,
        })?;

        match result.outcome {
            RagOutcome::NoMatch => {
                self.store
                    .record_unanswered(company_id, question, Some(session_id))?;
            }
            _ => {
                if let Some(qa_id) = result.qa_id {
                    self.store.increment_used(qa_id)?;
                }
            }
        }

        quota::increment_usage(&self.store, company_id, 1, result.tokens_used, 0)?;

        Ok(result)
    }

    /// 검색 파이프라인 (로그/사용량 기록 없음)
    ///
    /// 벡터 경로의 모든 실패 지점에서 키워드 매칭으로 내려갑니다.
    pub async fn retrieve(&self, company_id: i64, question: &str) -> RagResult {
        let (Some(embedder), Some(completer)) = (&self.embedder, &self.completer) else {
            return self.keyword_fallback(company_id, question);
        };

        // 1. 질문 임베딩
        let query_vector = match embedder.embed(question).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Question embedding failed, falling back to keyword: {}", e);
                return self.keyword_fallback(company_id, question);
            }
        };

        // 2. 벡터 유사도 검색
        let hits = match self.index.search(
            company_id,
            &query_vector,
            self.config.rag_top_k,
            self.config.rag_min_score,
        ) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Vector search failed, falling back to keyword: {}", e);
                return self.keyword_fallback(company_id, question);
            }
        };

        if hits.is_empty() {
            return self.keyword_fallback(company_id, question);
        }

        // 3. 근거 컨텍스트 구성
        let evidence_ids: Vec<i64> = hits.iter().map(|h| h.qa_id).collect();
        let avg_similarity = hits.iter().map(|h| h.similarity as f64).sum::<f64>()
            / hits.len() as f64;
        let avg_similarity = (avg_similarity * 10000.0).round() / 10000.0;

        let context = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("[근거 {}] {}", i + 1, hit.embedding_text))
            .collect::<Vec<_>>()
            .join("\n\n");

        // 4. LLM 답변 합성
        let system_prompt = self
            .store
            .active_system_prompt(company_id)
            .ok()
            .flatten()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let user_message = format!("질문: {}\n\n근거:\n{}", question, context);
        let messages = [
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_message),
        ];

        match completer
            .complete(&messages, SYNTH_TEMPERATURE, SYNTH_MAX_TOKENS)
            .await
        {
            Ok(completion) => RagResult {
                answer: completion.content,
                used_rag: true,
                outcome: RagOutcome::Rag,
                qa_id: evidence_ids.first().copied(),
                category: hits.first().and_then(|h| h.category.clone()),
                evidence_ids,
                similarity_score: Some(avg_similarity),
                confidence: None,
                tokens_used: completion.total_tokens as i64,
                latency_ms: 0,
            },
            Err(e) => {
                tracing::error!("Answer synthesis failed: {}", e);
                // 최상위 근거의 저장 답변을 그대로 반환
                let top_id = evidence_ids[0];
                match self.store.get_entry(top_id) {
                    Ok(Some(entry)) => RagResult {
                        answer: entry.answer,
                        used_rag: false,
                        outcome: RagOutcome::EvidenceFallback,
                        qa_id: Some(top_id),
                        category: entry.category,
                        evidence_ids,
                        similarity_score: Some(avg_similarity),
                        confidence: None,
                        tokens_used: 0,
                        latency_ms: 0,
                    },
                    _ => RagResult::no_match(),
                }
            }
        }
    }

    /// 키워드 매칭 폴백 (최종 단계)
    fn keyword_fallback(&self, company_id: i64, question: &str) -> RagResult {
        let corpus = match self.store.active_entries(TenantScope::Tenant(company_id)) {
            Ok(corpus) => corpus,
            Err(e) => {
                tracing::error!("Failed to load corpus for keyword search: {}", e);
                return RagResult::no_match();
            }
        };

        match self.matcher.search(question, None, &corpus) {
            Some(m) => RagResult {
                answer: m.answer,
                used_rag: false,
                outcome: RagOutcome::Keyword,
                qa_id: Some(m.qa_id),
                category: m.category,
                evidence_ids: vec![m.qa_id],
                similarity_score: None,
                confidence: Some(m.confidence),
                tokens_used: 0,
                latency_ms: 0,
            },
            None => RagResult::no_match(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
