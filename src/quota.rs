//! 테넌트 쿼터 - 월간 사용량 한도 검사
//!
//! 쿼터 행이 없는 테넌트는 무제한으로 취급합니다. 검사는 호출 전에,
//! 사용량 가산은 호출 후에 수행하므로 월 경계에서 한도를 1회
//! 초과할 수 있습니다 (허용된 동작).
//!
//! 과금/구독 자체는 이 크레이트 밖의 책임이고, 여기서는 코어가
//! 존중해야 하는 한도 검사와 카운터만 구현합니다.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::knowledge::KnowledgeStore;

// ============================================================================
// Types
// ============================================================================

/// 쿼터 초과 오류
///
/// 호출자는 variant로 어떤 한도에 걸렸는지 구분합니다.
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("월간 채팅 횟수 한도를 초과했습니다. ({used}/{limit})")]
    ChatLimit { used: i64, limit: i64 },

    #[error("월간 임베딩 횟수 한도를 초과했습니다. ({used}/{limit})")]
    EmbedLimit { used: i64, limit: i64 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// 테넌트별 월간 한도
#[derive(Debug, Clone, Serialize)]
pub struct TenantQuota {
    pub company_id: i64,
    pub monthly_chat_cnt: i64,
    pub monthly_tokens: i64,
    pub monthly_embed_cnt: i64,
}

impl TenantQuota {
    /// 기본 한도 (채팅 50회 / 토큰 2만 / 임베딩 100회)
    pub fn with_defaults(company_id: i64) -> Self {
        Self {
            company_id,
            monthly_chat_cnt: 50,
            monthly_tokens: 20000,
            monthly_embed_cnt: 100,
        }
    }
}

/// 테넌트별 월간 사용량
#[derive(Debug, Clone, Serialize)]
pub struct TenantUsage {
    pub company_id: i64,
    pub yyyymm: String,
    pub chat_cnt: i64,
    pub tokens_used: i64,
    pub embed_cnt: i64,
}

// ============================================================================
// Quota Checks
// ============================================================================

/// 현재 월 키 (UTC, "YYYY-MM")
pub fn current_yyyymm() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// 월간 채팅 한도 검사
pub fn check_chat_quota(store: &KnowledgeStore, company_id: i64) -> Result<(), QuotaError> {
    let Some(quota) = store.get_quota(company_id)? else {
        return Ok(());
    };

    let usage = store.get_or_create_usage(company_id, &current_yyyymm())?;
    if usage.chat_cnt >= quota.monthly_chat_cnt {
        return Err(QuotaError::ChatLimit {
            used: usage.chat_cnt,
            limit: quota.monthly_chat_cnt,
        });
    }

    Ok(())
}

/// 월간 임베딩 한도 검사
pub fn check_embed_quota(store: &KnowledgeStore, company_id: i64) -> Result<(), QuotaError> {
    let Some(quota) = store.get_quota(company_id)? else {
        return Ok(());
    };

    let usage = store.get_or_create_usage(company_id, &current_yyyymm())?;
    if usage.embed_cnt >= quota.monthly_embed_cnt {
        return Err(QuotaError::EmbedLimit {
            used: usage.embed_cnt,
            limit: quota.monthly_embed_cnt,
        });
    }

    Ok(())
}

/// 현재 월 사용량 가산 (사후 기록)
pub fn increment_usage(
    store: &KnowledgeStore,
    company_id: i64,
    chat_cnt: i64,
    tokens_used: i64,
    embed_cnt: i64,
) -> Result<(), QuotaError> {
    store.add_usage(company_id, &current_yyyymm(), chat_cnt, tokens_used, embed_cnt)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
