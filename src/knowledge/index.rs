//! Vector Index - 테넌트별 임베딩 레코드 관리와 유사도 검색
//!
//! 임베딩 벡터를 지식 DB와 같은 SQLite 안에 LE f32 BLOB으로 저장합니다.
//! 코퍼스 규모(테넌트당 수백 건)에서는 전수 코사인 계산이 충분히 빠르고,
//! 활성 여부 조인과 정리 작업을 한 트랜잭션 경계 안에서 처리할 수 있습니다.
//!
//! 인덱스는 원본 코퍼스보다 뒤처질 수 있습니다. upsert는 임베딩 실패 시
//! 기존 레코드를 그대로 두고 false를 반환하며, rebuild가 명시적 복구
//! 수단입니다.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::embedding::EmbeddingProvider;

use super::store::{KnowledgeStore, QaEntry, TenantScope};

/// 임베딩 차원 (text-embedding-3-small)
pub const EMBEDDING_DIMENSION: usize = 1536;

// ============================================================================
// Types
// ============================================================================

/// 저장된 임베딩 레코드
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub qa_id: i64,
    pub company_id: i64,
    pub embedding_text: String,
    pub embedding: Vec<f32>,
    pub model: String,
}

/// 벡터 검색 결과 한 건
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub qa_id: i64,
    pub category: Option<String>,
    pub embedding_text: String,
    pub similarity: f32,
}

/// 리빌드 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// 삭제/비활성 항목에 남아 있던 레코드 제거 수
    pub pruned: usize,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 벡터 인덱스
///
/// KnowledgeStore와 같은 커넥션을 공유합니다.
pub struct VectorIndex {
    conn: Arc<Mutex<Connection>>,
}

impl VectorIndex {
    pub fn new(store: &KnowledgeStore) -> Self {
        Self {
            conn: store.connection(),
        }
    }

    /// 임베딩 대상 텍스트 구성 (필드 순서 고정)
    ///
    /// `[카테고리] 질문 동의어: ... 답변 태그: ... 키워드: ...`
    /// 비어 있는 선택 필드는 건너뜁니다.
    pub fn build_embedding_text(entry: &QaEntry) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(category) = entry.category.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("[{}]", category));
        }
        parts.push(entry.question.clone());
        if let Some(aliases) = entry.aliases.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("동의어: {}", aliases));
        }
        parts.push(entry.answer.clone());
        if let Some(tags) = entry.tags.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("태그: {}", tags));
        }
        if let Some(keywords) = entry.keywords.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("키워드: {}", keywords));
        }
        parts.join(" ")
    }

    /// 항목 임베딩 생성 및 레코드 upsert
    ///
    /// 임베딩 실패 시 false를 반환하고 기존 레코드는 건드리지 않습니다.
    /// 인덱스 누락보다 이전 벡터가 남아 있는 쪽이 검색 품질에 낫습니다.
    pub async fn upsert(
        &self,
        embedder: &dyn EmbeddingProvider,
        entry: &QaEntry,
    ) -> Result<bool> {
        let embedding_text = Self::build_embedding_text(entry);

        let vector = match embedder.embed(&embedding_text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Embedding failed for qa_id={}: {}", entry.id, e);
                return Ok(false);
            }
        };

        let blob = vec_to_blob(&vector);
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        conn.execute(
            "INSERT INTO qa_embeddings (qa_id, company_id, embedding_text, embedding, model, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(qa_id) DO UPDATE SET
                 company_id = excluded.company_id,
                 embedding_text = excluded.embedding_text,
                 embedding = excluded.embedding,
                 model = excluded.model,
                 updated_at = excluded.updated_at",
            params![
                entry.id,
                entry.company_id,
                embedding_text,
                blob,
                embedder.name(),
                now
            ],
        )
        .context("Failed to upsert embedding record")?;

        tracing::info!("Embedding upserted for qa_id={}", entry.id);
        Ok(true)
    }

    /// 레코드 삭제 (없으면 no-op)
    pub fn delete(&self, qa_id: i64) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        conn.execute("DELETE FROM qa_embeddings WHERE qa_id = ?1", params![qa_id])?;
        Ok(())
    }

    /// 저장된 레코드 조회
    pub fn get_record(&self, qa_id: i64) -> Result<Option<EmbeddingRecord>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let record = conn
            .query_row(
                "SELECT qa_id, company_id, embedding_text, embedding, model
                 FROM qa_embeddings WHERE qa_id = ?1",
                params![qa_id],
                |row| {
                    Ok(EmbeddingRecord {
                        qa_id: row.get(0)?,
                        company_id: row.get(1)?,
                        embedding_text: row.get(2)?,
                        embedding: blob_to_vec(&row.get::<_, Vec<u8>>(3)?),
                        model: row.get(4)?,
                    })
                },
            )
            .ok();

        Ok(record)
    }

    /// 레코드 수
    pub fn count(&self, scope: TenantScope) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = match scope {
            TenantScope::Tenant(company_id) => conn.query_row(
                "SELECT COUNT(*) FROM qa_embeddings WHERE company_id = ?1",
                params![company_id],
                |row| row.get(0),
            )?,
            TenantScope::All => {
                conn.query_row("SELECT COUNT(*) FROM qa_embeddings", [], |row| row.get(0))?
            }
        };

        Ok(count as usize)
    }

    /// 코사인 유사도 검색
    ///
    /// 해당 테넌트의 활성 항목 레코드만 대상으로, 유사도 내림차순으로
    /// min_score 미만을 제외하고 top_k개까지 반환합니다.
    /// 동률은 qa_id가 작은 쪽이 앞섭니다.
    pub fn search(
        &self,
        company_id: i64,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<VectorHit>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT e.qa_id, q.category, e.embedding_text, e.embedding
             FROM qa_embeddings e
             JOIN qa_knowledge q ON q.id = e.qa_id
             WHERE e.company_id = ?1 AND q.is_active = 1",
        )?;

        let mut hits: Vec<VectorHit> = stmt
            .query_map(params![company_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(qa_id, category, embedding_text, blob)| {
                let vector = blob_to_vec(&blob);
                let similarity = cosine_similarity(query, &vector);
                if similarity >= min_score {
                    Some(VectorHit {
                        qa_id,
                        category,
                        embedding_text,
                        similarity,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.qa_id.cmp(&b.qa_id))
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    /// 인덱스 리빌드
    ///
    /// 1. 삭제/비활성 항목에 남은 레코드 정리
    /// 2. 범위 내 활성 항목 전체 재-upsert
    ///
    /// 실패한 항목은 건너뛰고 계속 진행합니다.
    pub async fn rebuild(
        &self,
        store: &KnowledgeStore,
        embedder: &dyn EmbeddingProvider,
        scope: TenantScope,
    ) -> Result<RebuildStats> {
        let mut stats = RebuildStats::default();

        // 1단계: 고아 레코드 정리
        {
            let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
            let pruned = match scope {
                TenantScope::Tenant(company_id) => conn.execute(
                    "DELETE FROM qa_embeddings WHERE company_id = ?1 AND qa_id NOT IN
                         (SELECT id FROM qa_knowledge WHERE is_active = 1)",
                    params![company_id],
                )?,
                TenantScope::All => conn.execute(
                    "DELETE FROM qa_embeddings WHERE qa_id NOT IN
                         (SELECT id FROM qa_knowledge WHERE is_active = 1)",
                    [],
                )?,
            };
            stats.pruned = pruned;
        }

        // 2단계: 활성 항목 재생성
        let entries = store.active_entries(scope)?;
        stats.total = entries.len();

        for entry in &entries {
            if self.upsert(embedder, entry).await? {
                stats.success += 1;
            } else {
                stats.failed += 1;
            }
        }

        tracing::info!(
            "Rebuilt vector index: total={} success={} failed={} pruned={}",
            stats.total,
            stats.success,
            stats.failed,
            stats.pruned
        );

        Ok(stats)
    }
}

// ============================================================================
// Vector Codec / Similarity
// ============================================================================

/// f32 벡터를 LE 바이트열로 인코딩
fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// LE 바이트열을 f32 벡터로 디코딩 (잔여 바이트는 무시)
fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// 코사인 유사도
///
/// 길이가 다르거나 영벡터면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::NewQaEntry;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// 질문 텍스트에 따라 고정 벡터를 돌려주는 테스트용 임베더
    struct MockEmbedder;

    #[async_trait]
    impl EmbeddingProvider for MockEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("주차") {
                Ok(vec![1.0, 0.0, 0.0])
            } else if text.contains("관리비") {
                Ok(vec![0.9, 0.4358899, 0.0])
            } else {
                Ok(vec![0.0, 1.0, 0.0])
            }
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "mock-embedder"
        }
    }

    /// 항상 실패하는 임베더
    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(anyhow!("embedding backend unavailable"))
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "failing-embedder"
        }
    }

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let store = KnowledgeStore::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn add_entry(store: &KnowledgeStore, company_id: i64, question: &str) -> QaEntry {
        let id = store
            .add_entry(NewQaEntry {
                company_id,
                category: Some("시설".to_string()),
                question: question.to_string(),
                answer: "답변입니다.".to_string(),
                keywords: None,
                aliases: None,
                tags: None,
            })
            .unwrap();
        store.get_entry(id).unwrap().unwrap()
    }

    #[test]
    fn test_build_embedding_text_field_order() {
        let (_dir, store) = create_test_store();
        let id = store
            .add_entry(NewQaEntry {
                company_id: 1,
                category: Some("시설".to_string()),
                question: "주차 등록 방법".to_string(),
                answer: "차량 번호를 등록하세요.".to_string(),
                keywords: Some("주차,차량".to_string()),
                aliases: Some("주차장 등록".to_string()),
                tags: Some("주차".to_string()),
            })
            .unwrap();
        let entry = store.get_entry(id).unwrap().unwrap();

        let text = VectorIndex::build_embedding_text(&entry);
        assert_eq!(
            text,
            "[시설] 주차 등록 방법 동의어: 주차장 등록 차량 번호를 등록하세요. 태그: 주차 키워드: 주차,차량"
        );
    }

    #[test]
    fn test_build_embedding_text_skips_empty_fields() {
        let (_dir, store) = create_test_store();
        let entry = add_entry(&store, 1, "질문만 있는 항목");
        let mut entry = entry;
        entry.category = None;

        let text = VectorIndex::build_embedding_text(&entry);
        assert_eq!(text, "질문만 있는 항목 답변입니다.");
    }

    #[tokio::test]
    async fn test_upsert_and_get_record() {
        let (_dir, store) = create_test_store();
        let index = VectorIndex::new(&store);
        let entry = add_entry(&store, 1, "주차 등록");

        let ok = index.upsert(&MockEmbedder, &entry).await.unwrap();
        assert!(ok);

        let record = index.get_record(entry.id).unwrap().unwrap();
        assert_eq!(record.qa_id, entry.id);
        assert_eq!(record.company_id, 1);
        assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(record.model, "mock-embedder");
    }

    #[tokio::test]
    async fn test_upsert_failure_keeps_prior_record() {
        let (_dir, store) = create_test_store();
        let index = VectorIndex::new(&store);
        let entry = add_entry(&store, 1, "주차 등록");

        assert!(index.upsert(&MockEmbedder, &entry).await.unwrap());

        // 실패해도 에러가 아니라 false, 기존 레코드 유지
        let ok = index.upsert(&FailingEmbedder, &entry).await.unwrap();
        assert!(!ok);

        let record = index.get_record(entry.id).unwrap().unwrap();
        assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(record.model, "mock-embedder");
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let (_dir, store) = create_test_store();
        let index = VectorIndex::new(&store);
        let entry = add_entry(&store, 1, "주차 등록");

        index.upsert(&MockEmbedder, &entry).await.unwrap();
        index.delete(entry.id).unwrap();
        assert!(index.get_record(entry.id).unwrap().is_none());

        // 이미 없어도 에러 없음
        index.delete(entry.id).unwrap();
    }

    #[tokio::test]
    async fn test_search_ranking_and_threshold() {
        let (_dir, store) = create_test_store();
        let index = VectorIndex::new(&store);

        let parking = add_entry(&store, 1, "주차 등록 방법");
        let fee = add_entry(&store, 1, "관리비 납부 방법");
        let other = add_entry(&store, 1, "엘리베이터 고장 신고");

        index.upsert(&MockEmbedder, &parking).await.unwrap();
        index.upsert(&MockEmbedder, &fee).await.unwrap();
        index.upsert(&MockEmbedder, &other).await.unwrap();

        // 쿼리 [1,0,0]: 주차=1.0, 관리비=0.9, 기타=0.0
        let hits = index.search(1, &[1.0, 0.0, 0.0], 3, 0.5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].qa_id, parking.id);
        assert!(hits[0].similarity > 0.99);
        assert_eq!(hits[1].qa_id, fee.id);
        assert!((hits[1].similarity - 0.9).abs() < 1e-3);

        // top_k 절단
        let hits = index.search(1, &[1.0, 0.0, 0.0], 1, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].qa_id, parking.id);
    }

    #[tokio::test]
    async fn test_search_excludes_other_tenants_and_inactive() {
        let (_dir, store) = create_test_store();
        let index = VectorIndex::new(&store);

        let mine = add_entry(&store, 1, "주차 등록");
        let theirs = add_entry(&store, 2, "주차 위치");
        index.upsert(&MockEmbedder, &mine).await.unwrap();
        index.upsert(&MockEmbedder, &theirs).await.unwrap();

        let hits = index.search(1, &[1.0, 0.0, 0.0], 10, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].qa_id, mine.id);

        // 비활성 항목은 레코드가 남아 있어도 검색에서 제외
        store.set_active(mine.id, false).unwrap();
        let hits = index.search(1, &[1.0, 0.0, 0.0], 10, 0.0).unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_prunes_and_reembeds() {
        let (_dir, store) = create_test_store();
        let index = VectorIndex::new(&store);

        let keep = add_entry(&store, 1, "주차 등록");
        let stale = add_entry(&store, 1, "관리비 납부");
        index.upsert(&MockEmbedder, &keep).await.unwrap();
        index.upsert(&MockEmbedder, &stale).await.unwrap();

        // 비활성으로 내려도 레코드는 남아 있음
        store.set_active(stale.id, false).unwrap();
        assert!(index.get_record(stale.id).unwrap().is_some());

        let stats = index
            .rebuild(&store, &MockEmbedder, TenantScope::Tenant(1))
            .await
            .unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.pruned, 1);

        assert!(index.get_record(stale.id).unwrap().is_none());
        assert!(index.get_record(keep.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rebuild_counts_failures() {
        let (_dir, store) = create_test_store();
        let index = VectorIndex::new(&store);

        add_entry(&store, 1, "주차 등록");
        add_entry(&store, 1, "관리비 납부");

        let stats = index
            .rebuild(&store, &FailingEmbedder, TenantScope::Tenant(1))
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 0);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_blob_roundtrip() {
        let original = vec![0.25_f32, -1.5, 3.75];
        let blob = vec_to_blob(&original);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vec(&blob), original);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
