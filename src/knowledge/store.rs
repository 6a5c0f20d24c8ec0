//! Knowledge Store - rusqlite 기반 동기 지식 저장소
//!
//! 테넌트별 Q&A 지식, 임베딩 레코드, 상담 로그, 프롬프트 템플릿,
//! 쿼터/사용량, 미답변 질문을 하나의 SQLite DB에 저장합니다.
//! 저장 위치: ~/.sodam-chat/sodam.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::quota::{TenantQuota, TenantUsage};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.sodam-chat/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sodam-chat")
}

// ============================================================================
// Types
// ============================================================================

/// 테넌트 범위 지정
///
/// 특정 테넌트 한정 조회와 관리자용 전체 조회를 타입으로 구분합니다.
/// 검색/쿼터 경로는 항상 구체적인 테넌트 id를 요구하며,
/// `All`은 관리 작업(목록, 리빌드, 통계)에만 쓰입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    /// 단일 테넌트
    Tenant(i64),
    /// 전체 테넌트 (관리자용)
    All,
}

/// Q&A 지식 항목
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaEntry {
    pub id: i64,
    pub company_id: i64,
    pub category: Option<String>,
    pub question: String,
    pub answer: String,
    /// 쉼표 구분 키워드 목록
    pub keywords: Option<String>,
    /// 질문 동의어 (유사 표현)
    pub aliases: Option<String>,
    pub tags: Option<String>,
    pub is_active: bool,
    /// 답변으로 채택된 횟수
    pub used_count: i64,
    /// 조회 횟수
    pub view_count: i64,
    /// 작성자 (운영자 연동 전까지 NULL)
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 새 Q&A 항목 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewQaEntry {
    pub company_id: i64,
    pub category: Option<String>,
    pub question: String,
    pub answer: String,
    pub keywords: Option<String>,
    pub aliases: Option<String>,
    pub tags: Option<String>,
}

/// Q&A 항목 부분 수정 (None 필드는 유지)
#[derive(Debug, Clone, Default)]
pub struct QaUpdate {
    pub category: Option<String>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub keywords: Option<String>,
    pub aliases: Option<String>,
    pub tags: Option<String>,
}

impl QaUpdate {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.question.is_none()
            && self.answer.is_none()
            && self.keywords.is_none()
            && self.aliases.is_none()
            && self.tags.is_none()
    }
}

/// 상담 로그 항목
#[derive(Debug, Clone, Serialize)]
pub struct ChatLogEntry {
    pub id: i64,
    pub company_id: i64,
    pub session_id: String,
    pub question: String,
    pub answer: String,
    /// 답변 근거가 된 항목 (항목 삭제 시 NULL로 남음)
    pub qa_id: Option<i64>,
    pub category: Option<String>,
    /// 답변 생성에 쓰인 근거 항목 id 목록 (JSON 배열로 저장)
    pub evidence_ids: Vec<i64>,
    pub used_rag: bool,
    pub confidence: Option<f64>,
    pub latency_ms: i64,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

/// 새 상담 로그 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewChatLog {
    pub company_id: i64,
    pub session_id: String,
    pub question: String,
    pub answer: String,
    pub qa_id: Option<i64>,
    pub category: Option<String>,
    pub evidence_ids: Vec<i64>,
    pub used_rag: bool,
    pub confidence: Option<f64>,
    pub latency_ms: i64,
    pub tokens_used: i64,
}

/// 미답변 질문 (운영자 보완용)
#[derive(Debug, Clone, Serialize)]
pub struct UnansweredQuestion {
    pub id: i64,
    pub company_id: i64,
    pub question: String,
    pub session_id: Option<String>,
    /// 처리 상태 (pending 등), 운영자가 보완 후 갱신
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub entry_count: usize,
    pub active_count: usize,
    pub embedding_count: usize,
    pub chat_log_count: usize,
    pub unanswered_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 지식 저장소
///
/// SQLite 기반으로 Q&A 지식과 부속 테이블 전체를 관리합니다.
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.sodam-chat/sodam.db)
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)
                .context("Failed to create data directory")?;
        }

        let db_path = data_dir.join("sodam.db");
        Self::open(&db_path)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 같은 DB를 공유하는 커넥션 핸들 (VectorIndex용)
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 스키마 초기화 (멱등)
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS qa_knowledge (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                category TEXT,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                keywords TEXT,
                aliases TEXT,
                tags TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                used_count INTEGER NOT NULL DEFAULT 0,
                view_count INTEGER NOT NULL DEFAULT 0,
                created_by TEXT,
                updated_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_qa_company ON qa_knowledge(company_id);
            CREATE INDEX IF NOT EXISTS idx_qa_company_active ON qa_knowledge(company_id, is_active);

            CREATE TABLE IF NOT EXISTS qa_embeddings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                qa_id INTEGER NOT NULL UNIQUE,
                company_id INTEGER NOT NULL,
                embedding_text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                model TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_emb_company ON qa_embeddings(company_id);

            CREATE TABLE IF NOT EXISTS chat_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                qa_id INTEGER,
                category TEXT,
                evidence_ids TEXT NOT NULL DEFAULT '[]',
                used_rag INTEGER NOT NULL DEFAULT 0,
                confidence REAL,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_session ON chat_logs(session_id);
            CREATE INDEX IF NOT EXISTS idx_logs_company ON chat_logs(company_id);

            CREATE TABLE IF NOT EXISTS prompt_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER,
                name TEXT NOT NULL,
                content TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tenant_quotas (
                company_id INTEGER PRIMARY KEY,
                monthly_chat_cnt INTEGER NOT NULL DEFAULT 50,
                monthly_tokens INTEGER NOT NULL DEFAULT 20000,
                monthly_embed_cnt INTEGER NOT NULL DEFAULT 100
            );

            CREATE TABLE IF NOT EXISTS tenant_usage_monthly (
                company_id INTEGER NOT NULL,
                yyyymm TEXT NOT NULL,
                chat_cnt INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                embed_cnt INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (company_id, yyyymm)
            );

            CREATE TABLE IF NOT EXISTS unanswered_questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                question TEXT NOT NULL,
                session_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_unanswered_company ON unanswered_questions(company_id);
            "#,
        )
        .context("Failed to initialize schema")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ========================================================================
    // Q&A CRUD
    // ========================================================================

    /// 새 Q&A 항목 추가
    pub fn add_entry(&self, entry: NewQaEntry) -> Result<i64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO qa_knowledge
             (company_id, category, question, answer, keywords, aliases, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                entry.company_id,
                entry.category,
                entry.question,
                entry.answer,
                entry.keywords,
                entry.aliases,
                entry.tags,
                now
            ],
        )
        .context("Failed to insert qa entry")?;

        let id = conn.last_insert_rowid();
        tracing::info!("Added qa entry (id={}, company={})", id, entry.company_id);

        Ok(id)
    }

    /// ID로 항목 조회
    pub fn get_entry(&self, qa_id: i64) -> Result<Option<QaEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM qa_knowledge WHERE id = ?1",
            QA_COLUMNS
        ))?;

        let entry = stmt.query_row(params![qa_id], map_qa_entry).ok();

        Ok(entry)
    }

    /// 항목 부분 수정, 변경 시 updated_at 갱신
    pub fn update_entry(&self, qa_id: i64, update: QaUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE qa_knowledge SET
                     category = COALESCE(?1, category),
                     question = COALESCE(?2, question),
                     answer = COALESCE(?3, answer),
                     keywords = COALESCE(?4, keywords),
                     aliases = COALESCE(?5, aliases),
                     tags = COALESCE(?6, tags),
                     updated_at = ?7
                 WHERE id = ?8",
                params![
                    update.category,
                    update.question,
                    update.answer,
                    update.keywords,
                    update.aliases,
                    update.tags,
                    now,
                    qa_id
                ],
            )
            .context("Failed to update qa entry")?;

        Ok(rows > 0)
    }

    /// 항목 삭제
    ///
    /// 상담 로그의 근거 참조는 NULL로 끊고, 임베딩 레코드도 함께 제거합니다.
    /// 로그 자체는 보존됩니다.
    pub fn delete_entry(&self, qa_id: i64) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "UPDATE chat_logs SET qa_id = NULL WHERE qa_id = ?1",
            params![qa_id],
        )
        .context("Failed to detach chat logs")?;

        conn.execute(
            "DELETE FROM qa_embeddings WHERE qa_id = ?1",
            params![qa_id],
        )
        .context("Failed to delete embedding record")?;

        let rows = conn.execute("DELETE FROM qa_knowledge WHERE id = ?1", params![qa_id])?;

        if rows > 0 {
            tracing::info!("Deleted qa entry (id={})", qa_id);
        }

        Ok(rows > 0)
    }

    /// 활성/비활성 전환
    pub fn set_active(&self, qa_id: i64, active: bool) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        let rows = conn.execute(
            "UPDATE qa_knowledge SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active as i64, now, qa_id],
        )?;

        Ok(rows > 0)
    }

    /// 활성 항목 전체 조회 (id 오름차순)
    ///
    /// 키워드 검색과 인덱스 리빌드가 이 순서에 의존합니다.
    pub fn active_entries(&self, scope: TenantScope) -> Result<Vec<QaEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let entries = match scope {
            TenantScope::Tenant(company_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM qa_knowledge
                     WHERE company_id = ?1 AND is_active = 1
                     ORDER BY id",
                    QA_COLUMNS
                ))?;
                let rows = stmt.query_map(params![company_id], map_qa_entry)?;
                rows.filter_map(|r| r.ok()).collect()
            }
            TenantScope::All => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM qa_knowledge WHERE is_active = 1 ORDER BY id",
                    QA_COLUMNS
                ))?;
                let rows = stmt.query_map([], map_qa_entry)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };

        Ok(entries)
    }

    /// 항목 목록 조회 (최신순)
    ///
    /// 카테고리 일치, 질문/답변/키워드 부분 일치 검색을 선택적으로 적용합니다.
    pub fn list_entries(
        &self,
        scope: TenantScope,
        include_inactive: bool,
        category: Option<&str>,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<QaEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let TenantScope::Tenant(company_id) = scope {
            clauses.push(format!("company_id = ?{}", values.len() + 1));
            values.push(company_id.into());
        }
        if !include_inactive {
            clauses.push("is_active = 1".to_string());
        }
        if let Some(cat) = category {
            clauses.push(format!("category = ?{}", values.len() + 1));
            values.push(cat.to_string().into());
        }
        if let Some(term) = search {
            let idx = values.len() + 1;
            clauses.push(format!(
                "(question LIKE ?{0} OR answer LIKE ?{0} OR keywords LIKE ?{0})",
                idx
            ));
            values.push(format!("%{}%", term).into());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM qa_knowledge {} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            QA_COLUMNS,
            where_sql,
            values.len() + 1,
            values.len() + 2
        );
        values.push((limit as i64).into());
        values.push((offset as i64).into());

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), map_qa_entry)?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// 채택 횟수 증가
    pub fn increment_used(&self, qa_id: i64) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        conn.execute(
            "UPDATE qa_knowledge SET used_count = used_count + 1 WHERE id = ?1",
            params![qa_id],
        )?;
        Ok(())
    }

    /// 조회 횟수 증가
    pub fn increment_view(&self, qa_id: i64) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        conn.execute(
            "UPDATE qa_knowledge SET view_count = view_count + 1 WHERE id = ?1",
            params![qa_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Chat Logs
    // ========================================================================

    /// 상담 로그 추가
    pub fn append_chat_log(&self, log: NewChatLog) -> Result<i64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        let evidence_json = serde_json::to_string(&log.evidence_ids)
            .context("Failed to serialize evidence ids")?;

        conn.execute(
            "INSERT INTO chat_logs
             (company_id, session_id, question, answer, qa_id, category, evidence_ids,
              used_rag, confidence, latency_ms, tokens_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                log.company_id,
                log.session_id,
                log.question,
                log.answer,
                log.qa_id,
                log.category,
                evidence_json,
                log.used_rag as i64,
                log.confidence,
                log.latency_ms,
                log.tokens_used,
                now
            ],
        )
        .context("Failed to insert chat log")?;

        Ok(conn.last_insert_rowid())
    }

    /// 세션별 상담 이력 (최신순)
    pub fn session_history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatLogEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_logs WHERE session_id = ?1
             ORDER BY id DESC LIMIT ?2",
            LOG_COLUMNS
        ))?;

        let logs = stmt
            .query_map(params![session_id, limit as i64], map_chat_log)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(logs)
    }

    /// 테넌트별 상담 이력 (최신순)
    pub fn list_chat_logs(&self, scope: TenantScope, limit: usize) -> Result<Vec<ChatLogEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let logs = match scope {
            TenantScope::Tenant(company_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM chat_logs WHERE company_id = ?1
                     ORDER BY id DESC LIMIT ?2",
                    LOG_COLUMNS
                ))?;
                let rows = stmt.query_map(params![company_id, limit as i64], map_chat_log)?;
                rows.filter_map(|r| r.ok()).collect()
            }
            TenantScope::All => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM chat_logs ORDER BY id DESC LIMIT ?1",
                    LOG_COLUMNS
                ))?;
                let rows = stmt.query_map(params![limit as i64], map_chat_log)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };

        Ok(logs)
    }

    // ========================================================================
    // Prompt Templates
    // ========================================================================

    /// 프롬프트 템플릿 등록
    ///
    /// 같은 범위의 기존 활성 템플릿은 비활성으로 내립니다.
    pub fn upsert_prompt_template(
        &self,
        company_id: Option<i64>,
        name: &str,
        content: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        match company_id {
            Some(id) => {
                conn.execute(
                    "UPDATE prompt_templates SET is_active = 0 WHERE company_id = ?1",
                    params![id],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE prompt_templates SET is_active = 0 WHERE company_id IS NULL",
                    [],
                )?;
            }
        }

        conn.execute(
            "INSERT INTO prompt_templates (company_id, name, content, is_active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![company_id, name, content, now],
        )
        .context("Failed to insert prompt template")?;

        Ok(conn.last_insert_rowid())
    }

    /// 활성 시스템 프롬프트 조회
    ///
    /// 테넌트 전용 템플릿이 우선, 없으면 전역 템플릿, 둘 다 없으면 None.
    pub fn active_system_prompt(&self, company_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let tenant_prompt: Option<String> = conn
            .query_row(
                "SELECT content FROM prompt_templates
                 WHERE company_id = ?1 AND is_active = 1
                 ORDER BY id DESC LIMIT 1",
                params![company_id],
                |row| row.get(0),
            )
            .ok();

        if tenant_prompt.is_some() {
            return Ok(tenant_prompt);
        }

        let global_prompt: Option<String> = conn
            .query_row(
                "SELECT content FROM prompt_templates
                 WHERE company_id IS NULL AND is_active = 1
                 ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .ok();

        Ok(global_prompt)
    }

    // ========================================================================
    // Quotas / Usage
    // ========================================================================

    /// 테넌트 쿼터 조회 (행이 없으면 무제한)
    pub fn get_quota(&self, company_id: i64) -> Result<Option<TenantQuota>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let quota = conn
            .query_row(
                "SELECT company_id, monthly_chat_cnt, monthly_tokens, monthly_embed_cnt
                 FROM tenant_quotas WHERE company_id = ?1",
                params![company_id],
                |row| {
                    Ok(TenantQuota {
                        company_id: row.get(0)?,
                        monthly_chat_cnt: row.get(1)?,
                        monthly_tokens: row.get(2)?,
                        monthly_embed_cnt: row.get(3)?,
                    })
                },
            )
            .ok();

        Ok(quota)
    }

    /// 테넌트 쿼터 설정 (upsert)
    pub fn set_quota(&self, quota: &TenantQuota) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT INTO tenant_quotas (company_id, monthly_chat_cnt, monthly_tokens, monthly_embed_cnt)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(company_id) DO UPDATE SET
                 monthly_chat_cnt = excluded.monthly_chat_cnt,
                 monthly_tokens = excluded.monthly_tokens,
                 monthly_embed_cnt = excluded.monthly_embed_cnt",
            params![
                quota.company_id,
                quota.monthly_chat_cnt,
                quota.monthly_tokens,
                quota.monthly_embed_cnt
            ],
        )
        .context("Failed to upsert tenant quota")?;

        Ok(())
    }

    /// 월별 사용량 조회 (행이 없으면 0으로 생성)
    pub fn get_or_create_usage(&self, company_id: i64, yyyymm: &str) -> Result<TenantUsage> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT OR IGNORE INTO tenant_usage_monthly (company_id, yyyymm) VALUES (?1, ?2)",
            params![company_id, yyyymm],
        )?;

        let usage = conn.query_row(
            "SELECT company_id, yyyymm, chat_cnt, tokens_used, embed_cnt
             FROM tenant_usage_monthly WHERE company_id = ?1 AND yyyymm = ?2",
            params![company_id, yyyymm],
            |row| {
                Ok(TenantUsage {
                    company_id: row.get(0)?,
                    yyyymm: row.get(1)?,
                    chat_cnt: row.get(2)?,
                    tokens_used: row.get(3)?,
                    embed_cnt: row.get(4)?,
                })
            },
        )?;

        Ok(usage)
    }

    /// 월별 사용량 가산
    pub fn add_usage(
        &self,
        company_id: i64,
        yyyymm: &str,
        chat_delta: i64,
        token_delta: i64,
        embed_delta: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT OR IGNORE INTO tenant_usage_monthly (company_id, yyyymm) VALUES (?1, ?2)",
            params![company_id, yyyymm],
        )?;

        conn.execute(
            "UPDATE tenant_usage_monthly SET
                 chat_cnt = chat_cnt + ?1,
                 tokens_used = tokens_used + ?2,
                 embed_cnt = embed_cnt + ?3
             WHERE company_id = ?4 AND yyyymm = ?5",
            params![chat_delta, token_delta, embed_delta, company_id, yyyymm],
        )
        .context("Failed to update tenant usage")?;

        Ok(())
    }

    // ========================================================================
    // Unanswered Questions
    // ========================================================================

    /// 미답변 질문 기록
    pub fn record_unanswered(
        &self,
        company_id: i64,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO unanswered_questions (company_id, question, session_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![company_id, question, session_id, now],
        )
        .context("Failed to record unanswered question")?;

        Ok(conn.last_insert_rowid())
    }

    /// 미답변 질문 목록 (최신순)
    pub fn list_unanswered(
        &self,
        scope: TenantScope,
        limit: usize,
    ) -> Result<Vec<UnansweredQuestion>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<UnansweredQuestion> {
            Ok(UnansweredQuestion {
                id: row.get(0)?,
                company_id: row.get(1)?,
                question: row.get(2)?,
                session_id: row.get(3)?,
                status: row.get(4)?,
                created_at: parse_datetime(row.get::<_, String>(5)?),
            })
        };

        let items = match scope {
            TenantScope::Tenant(company_id) => {
                let mut stmt = conn.prepare(
                    "SELECT id, company_id, question, session_id, status, created_at
                     FROM unanswered_questions WHERE company_id = ?1
                     ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![company_id, limit as i64], map_row)?;
                rows.filter_map(|r| r.ok()).collect()
            }
            TenantScope::All => {
                let mut stmt = conn.prepare(
                    "SELECT id, company_id, question, session_id, status, created_at
                     FROM unanswered_questions ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], map_row)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };

        Ok(items)
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// 저장소 통계
    pub fn stats(&self, scope: TenantScope) -> Result<StoreStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count_where = |table: &str, clause: &str| -> usize {
            let sql = format!("SELECT COUNT(*) FROM {} {}", table, clause);
            let count: i64 = match scope {
                TenantScope::Tenant(company_id) => conn
                    .query_row(&sql, params![company_id], |row| row.get(0))
                    .unwrap_or(0),
                TenantScope::All => conn.query_row(&sql, [], |row| row.get(0)).unwrap_or(0),
            };
            count as usize
        };

        let (qa_clause, qa_active_clause, emb_clause, log_clause, un_clause) = match scope {
            TenantScope::Tenant(_) => (
                "WHERE company_id = ?1",
                "WHERE company_id = ?1 AND is_active = 1",
                "WHERE company_id = ?1",
                "WHERE company_id = ?1",
                "WHERE company_id = ?1",
            ),
            TenantScope::All => ("", "WHERE is_active = 1", "", "", ""),
        };

        Ok(StoreStats {
            entry_count: count_where("qa_knowledge", qa_clause),
            active_count: count_where("qa_knowledge", qa_active_clause),
            embedding_count: count_where("qa_embeddings", emb_clause),
            chat_log_count: count_where("chat_logs", log_clause),
            unanswered_count: count_where("unanswered_questions", un_clause),
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

const QA_COLUMNS: &str = "id, company_id, category, question, answer, keywords, aliases, tags, \
                          is_active, used_count, view_count, created_by, updated_by, \
                          created_at, updated_at";

const LOG_COLUMNS: &str = "id, company_id, session_id, question, answer, qa_id, category, \
                           evidence_ids, used_rag, confidence, latency_ms, tokens_used, \
                           created_at";

fn map_qa_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QaEntry> {
    Ok(QaEntry {
        id: row.get(0)?,
        company_id: row.get(1)?,
        category: row.get(2)?,
        question: row.get(3)?,
        answer: row.get(4)?,
        keywords: row.get(5)?,
        aliases: row.get(6)?,
        tags: row.get(7)?,
        is_active: row.get::<_, i64>(8)? != 0,
        used_count: row.get(9)?,
        view_count: row.get(10)?,
        created_by: row.get(11)?,
        updated_by: row.get(12)?,
        created_at: parse_datetime(row.get::<_, String>(13)?),
        updated_at: parse_datetime(row.get::<_, String>(14)?),
    })
}

fn map_chat_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatLogEntry> {
    let evidence_json: String = row.get(7)?;
    Ok(ChatLogEntry {
        id: row.get(0)?,
        company_id: row.get(1)?,
        session_id: row.get(2)?,
        question: row.get(3)?,
        answer: row.get(4)?,
        qa_id: row.get(5)?,
        category: row.get(6)?,
        evidence_ids: serde_json::from_str(&evidence_json).unwrap_or_default(),
        used_rag: row.get::<_, i64>(8)? != 0,
        confidence: row.get(9)?,
        latency_ms: row.get(10)?,
        tokens_used: row.get(11)?,
        created_at: parse_datetime(row.get::<_, String>(12)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = KnowledgeStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn sample_entry(company_id: i64, question: &str) -> NewQaEntry {
        NewQaEntry {
            company_id,
            category: Some("결제".to_string()),
            question: question.to_string(),
            answer: "계좌이체 또는 카드로 납부할 수 있습니다.".to_string(),
            keywords: Some("납부,결제".to_string()),
            aliases: None,
            tags: None,
        }
    }

    #[test]
    fn test_add_and_get_entry() {
        let (_dir, store) = create_test_store();

        let id = store.add_entry(sample_entry(1, "관리비 납부 방법")).unwrap();
        assert!(id > 0);

        let entry = store.get_entry(id).unwrap().unwrap();
        assert_eq!(entry.company_id, 1);
        assert_eq!(entry.question, "관리비 납부 방법");
        assert!(entry.is_active);
        assert_eq!(entry.used_count, 0);
    }

    #[test]
    fn test_update_entry() {
        let (_dir, store) = create_test_store();

        let id = store.add_entry(sample_entry(1, "원래 질문")).unwrap();

        let updated = store
            .update_entry(
                id,
                QaUpdate {
                    answer: Some("수정된 답변".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated);

        let entry = store.get_entry(id).unwrap().unwrap();
        assert_eq!(entry.answer, "수정된 답변");
        assert_eq!(entry.question, "원래 질문");

        // 빈 업데이트는 no-op
        let updated = store.update_entry(id, QaUpdate::default()).unwrap();
        assert!(!updated);
    }

    #[test]
    fn test_delete_entry_detaches_chat_logs() {
        let (_dir, store) = create_test_store();

        let id = store.add_entry(sample_entry(1, "삭제 대상")).unwrap();

        store
            .append_chat_log(NewChatLog {
                company_id: 1,
                session_id: "s1".to_string(),
                question: "질문".to_string(),
                answer: "답변".to_string(),
                qa_id: Some(id),
                category: Some("결제".to_string()),
                evidence_ids: vec![id],
                used_rag: true,
                confidence: Some(0.9),
                latency_ms: 120,
                tokens_used: 50,
            })
            .unwrap();

        let deleted = store.delete_entry(id).unwrap();
        assert!(deleted);
        assert!(store.get_entry(id).unwrap().is_none());

        // 로그는 남고 근거 참조만 끊어짐
        let logs = store.session_history("s1", 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].qa_id, None);
        assert_eq!(logs[0].answer, "답변");
        assert_eq!(logs[0].category.as_deref(), Some("결제"));
        assert_eq!(logs[0].evidence_ids, vec![id]);
    }

    #[test]
    fn test_set_active_and_active_entries() {
        let (_dir, store) = create_test_store();

        let id1 = store.add_entry(sample_entry(1, "질문 1")).unwrap();
        let id2 = store.add_entry(sample_entry(1, "질문 2")).unwrap();
        store.add_entry(sample_entry(2, "다른 테넌트")).unwrap();

        store.set_active(id2, false).unwrap();

        let active = store.active_entries(TenantScope::Tenant(1)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id1);

        let all_active = store.active_entries(TenantScope::All).unwrap();
        assert_eq!(all_active.len(), 2);
    }

    #[test]
    fn test_list_entries_pagination() {
        let (_dir, store) = create_test_store();

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.add_entry(sample_entry(1, &format!("질문 {}", i))).unwrap());
        }

        let page1 = store
            .list_entries(TenantScope::Tenant(1), true, None, None, 2, 0)
            .unwrap();
        assert_eq!(page1.len(), 2);
        // 최신순
        assert_eq!(page1[0].id, ids[4]);

        let page2 = store
            .list_entries(TenantScope::Tenant(1), true, None, None, 2, 2)
            .unwrap();
        assert_eq!(page2.len(), 2);
        assert_ne!(page1[0].id, page2[0].id);
    }

    #[test]
    fn test_list_entries_filters() {
        let (_dir, store) = create_test_store();

        store.add_entry(sample_entry(1, "관리비 납부 방법")).unwrap();
        store
            .add_entry(NewQaEntry {
                company_id: 1,
                category: Some("주차".to_string()),
                question: "방문 차량 등록".to_string(),
                answer: "관리사무소에서 방문 차량을 등록할 수 있습니다.".to_string(),
                keywords: Some("주차,차량".to_string()),
                aliases: None,
                tags: None,
            })
            .unwrap();

        let by_category = store
            .list_entries(TenantScope::Tenant(1), true, Some("주차"), None, 20, 0)
            .unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].question, "방문 차량 등록");

        // 질문/답변/키워드 부분 일치
        let by_search = store
            .list_entries(TenantScope::Tenant(1), true, None, Some("납부"), 20, 0)
            .unwrap();
        assert_eq!(by_search.len(), 1);
        assert_eq!(by_search[0].question, "관리비 납부 방법");

        let by_keyword = store
            .list_entries(TenantScope::Tenant(1), true, None, Some("차량"), 20, 0)
            .unwrap();
        assert_eq!(by_keyword.len(), 1);

        let none = store
            .list_entries(TenantScope::Tenant(1), true, Some("주차"), Some("납부"), 20, 0)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_increment_counters() {
        let (_dir, store) = create_test_store();

        let id = store.add_entry(sample_entry(1, "카운터")).unwrap();
        store.increment_used(id).unwrap();
        store.increment_used(id).unwrap();
        store.increment_view(id).unwrap();

        let entry = store.get_entry(id).unwrap().unwrap();
        assert_eq!(entry.used_count, 2);
        assert_eq!(entry.view_count, 1);
    }

    #[test]
    fn test_session_history_order() {
        let (_dir, store) = create_test_store();

        for i in 0..3 {
            store
                .append_chat_log(NewChatLog {
                    company_id: 1,
                    session_id: "s1".to_string(),
                    question: format!("질문 {}", i),
                    answer: format!("답변 {}", i),
                    qa_id: None,
                    category: None,
                    evidence_ids: Vec::new(),
                    used_rag: false,
                    confidence: None,
                    latency_ms: 10,
                    tokens_used: 0,
                })
                .unwrap();
        }

        let logs = store.session_history("s1", 10).unwrap();
        assert_eq!(logs.len(), 3);
        // 최신순
        assert_eq!(logs[0].question, "질문 2");
        assert_eq!(logs[2].question, "질문 0");
    }

    #[test]
    fn test_prompt_template_precedence() {
        let (_dir, store) = create_test_store();

        assert!(store.active_system_prompt(1).unwrap().is_none());

        store
            .upsert_prompt_template(None, "global", "전역 프롬프트")
            .unwrap();
        assert_eq!(
            store.active_system_prompt(1).unwrap().as_deref(),
            Some("전역 프롬프트")
        );

        store
            .upsert_prompt_template(Some(1), "tenant", "테넌트 프롬프트")
            .unwrap();
        assert_eq!(
            store.active_system_prompt(1).unwrap().as_deref(),
            Some("테넌트 프롬프트")
        );

        // 다른 테넌트는 전역으로
        assert_eq!(
            store.active_system_prompt(2).unwrap().as_deref(),
            Some("전역 프롬프트")
        );

        // 같은 범위에 재등록하면 새 템플릿이 활성
        store
            .upsert_prompt_template(Some(1), "tenant-v2", "개정 프롬프트")
            .unwrap();
        assert_eq!(
            store.active_system_prompt(1).unwrap().as_deref(),
            Some("개정 프롬프트")
        );
    }

    #[test]
    fn test_quota_and_usage() {
        let (_dir, store) = create_test_store();

        // 쿼터 행이 없으면 무제한
        assert!(store.get_quota(1).unwrap().is_none());

        store
            .set_quota(&TenantQuota {
                company_id: 1,
                monthly_chat_cnt: 50,
                monthly_tokens: 20000,
                monthly_embed_cnt: 100,
            })
            .unwrap();

        let quota = store.get_quota(1).unwrap().unwrap();
        assert_eq!(quota.monthly_chat_cnt, 50);

        let usage = store.get_or_create_usage(1, "2026-08").unwrap();
        assert_eq!(usage.chat_cnt, 0);

        store.add_usage(1, "2026-08", 1, 150, 0).unwrap();
        store.add_usage(1, "2026-08", 1, 80, 1).unwrap();

        let usage = store.get_or_create_usage(1, "2026-08").unwrap();
        assert_eq!(usage.chat_cnt, 2);
        assert_eq!(usage.tokens_used, 230);
        assert_eq!(usage.embed_cnt, 1);
    }

    #[test]
    fn test_unanswered_questions() {
        let (_dir, store) = create_test_store();

        store.record_unanswered(1, "모르는 질문", Some("s1")).unwrap();
        store.record_unanswered(2, "다른 테넌트 질문", None).unwrap();

        let tenant1 = store.list_unanswered(TenantScope::Tenant(1), 10).unwrap();
        assert_eq!(tenant1.len(), 1);
        assert_eq!(tenant1[0].question, "모르는 질문");
        assert_eq!(tenant1[0].session_id.as_deref(), Some("s1"));
        assert_eq!(tenant1[0].status, "pending");

        let all = store.list_unanswered(TenantScope::All, 10).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();

        let id = store.add_entry(sample_entry(1, "통계용")).unwrap();
        store.add_entry(sample_entry(2, "다른 테넌트")).unwrap();
        store.set_active(id, false).unwrap();

        let stats = store.stats(TenantScope::All).unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.active_count, 1);

        let tenant_stats = store.stats(TenantScope::Tenant(1)).unwrap();
        assert_eq!(tenant_stats.entry_count, 1);
        assert_eq!(tenant_stats.active_count, 0);
    }
}
