//! CLI 모듈
//!
//! sodam-chat CLI 명령어 정의 및 구현
//!
//! Q&A 지식 관리, 질문/답변, 임베딩 리빌드, 상담 로그 조회를
//! 명령어로 제공합니다. API 키가 없으면 ask는 키워드 검색만으로
//! 동작하고, rebuild는 실패합니다.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::chat::{RagEngine, RagOutcome};
use crate::completion::{CompletionProvider, OpenAiCompletion};
use crate::config::AppConfig;
use crate::embedding::{create_embedder, has_api_key, EmbeddingProvider};
use crate::knowledge::{
    KeywordMatcher, KnowledgeStore, NewQaEntry, QaEntry, QaUpdate, TenantScope, VectorIndex,
};
use crate::quota;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "sodam-chat")]
#[command(version, about = "멀티테넌트 고객지원 챗봇 백엔드", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Q&A 지식 관리
    Qa {
        #[command(subcommand)]
        command: QaCommands,
    },

    /// 질문하고 답변 받기
    Ask {
        /// 질문
        question: String,

        /// 테넌트 ID
        #[arg(short, long)]
        company: i64,

        /// 세션 ID (생략 시 새로 발급)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// 임베딩 인덱스 리빌드
    Rebuild {
        /// 대상 테넌트 ID
        #[arg(short, long)]
        company: Option<i64>,

        /// 전체 테넌트 대상 (관리자용)
        #[arg(long)]
        all: bool,
    },

    /// 상담 로그 조회
    History {
        /// 세션 ID로 조회
        #[arg(short, long)]
        session: Option<String>,

        /// 테넌트 ID로 조회
        #[arg(short, long)]
        company: Option<i64>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 미답변 질문 목록
    Unanswered {
        /// 테넌트 ID 필터
        #[arg(short, long)]
        company: Option<i64>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status {
        /// 테넌트 ID 필터
        #[arg(short, long)]
        company: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum QaCommands {
    /// Q&A 항목 추가
    Add {
        /// 테넌트 ID
        #[arg(short, long)]
        company: i64,

        /// 질문
        #[arg(short, long)]
        question: String,

        /// 답변
        #[arg(short, long)]
        answer: String,

        /// 카테고리
        #[arg(long)]
        category: Option<String>,

        /// 쉼표 구분 키워드
        #[arg(short, long)]
        keywords: Option<String>,

        /// 질문 동의어 (유사 표현)
        #[arg(long)]
        aliases: Option<String>,

        /// 태그
        #[arg(long)]
        tags: Option<String>,

        /// 임베딩 자동 생성 건너뛰기
        #[arg(long)]
        skip_embed: bool,
    },

    /// 항목 목록 (최신순)
    List {
        /// 테넌트 ID 필터
        #[arg(short, long)]
        company: Option<i64>,

        /// 비활성 항목 포함
        #[arg(long)]
        include_inactive: bool,

        /// 카테고리 필터
        #[arg(long)]
        category: Option<String>,

        /// 질문/답변/키워드 부분 일치 검색
        #[arg(short, long)]
        search: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// 건너뛸 개수
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// 항목 상세 보기
    Show {
        /// 항목 ID
        id: i64,
    },

    /// 항목 수정 (지정한 필드만 변경)
    Update {
        /// 항목 ID
        id: i64,

        /// 질문
        #[arg(short, long)]
        question: Option<String>,

        /// 답변
        #[arg(short, long)]
        answer: Option<String>,

        /// 카테고리
        #[arg(long)]
        category: Option<String>,

        /// 쉼표 구분 키워드
        #[arg(short, long)]
        keywords: Option<String>,

        /// 질문 동의어
        #[arg(long)]
        aliases: Option<String>,

        /// 태그
        #[arg(long)]
        tags: Option<String>,

        /// 임베딩 자동 갱신 건너뛰기
        #[arg(long)]
        skip_embed: bool,
    },

    /// 항목 삭제 (임베딩도 함께 제거)
    Delete {
        /// 항목 ID
        id: i64,
    },

    /// 활성/비활성 전환
    Toggle {
        /// 항목 ID
        id: i64,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Qa { command } => match command {
            QaCommands::Add {
                company,
                question,
                answer,
                category,
                keywords,
                aliases,
                tags,
                skip_embed,
            } => {
                cmd_qa_add(
                    &config, company, question, answer, category, keywords, aliases, tags,
                    skip_embed,
                )
                .await
            }
            QaCommands::List {
                company,
                include_inactive,
                category,
                search,
                limit,
                offset,
            } => cmd_qa_list(
                &config,
                company,
                include_inactive,
                category.as_deref(),
                search.as_deref(),
                limit,
                offset,
            ),
            QaCommands::Show { id } => cmd_qa_show(&config, id),
            QaCommands::Update {
                id,
                question,
                answer,
                category,
                keywords,
                aliases,
                tags,
                skip_embed,
            } => {
                cmd_qa_update(
                    &config, id, question, answer, category, keywords, aliases, tags, skip_embed,
                )
                .await
            }
            QaCommands::Delete { id } => cmd_qa_delete(&config, id),
            QaCommands::Toggle { id } => cmd_qa_toggle(&config, id).await,
        },
        Commands::Ask {
            question,
            company,
            session,
        } => cmd_ask(&config, company, session, &question).await,
        Commands::Rebuild { company, all } => cmd_rebuild(&config, company, all).await,
        Commands::History {
            session,
            company,
            limit,
        } => cmd_history(&config, session, company, limit),
        Commands::Unanswered { company, limit } => cmd_unanswered(&config, company, limit),
        Commands::Status { company } => cmd_status(&config, company),
    }
}

/// 설정된 데이터 디렉토리에서 저장소 열기
fn open_store(config: &AppConfig) -> Result<KnowledgeStore> {
    KnowledgeStore::open(&config.data_dir.join("sodam.db")).context("KnowledgeStore 열기 실패")
}

/// 스코프 해석 (--company 지정 시 해당 테넌트, 아니면 전체)
fn resolve_scope(company: Option<i64>) -> TenantScope {
    match company {
        Some(id) => TenantScope::Tenant(id),
        None => TenantScope::All,
    }
}

// ============================================================================
// Q&A Commands
// ============================================================================

/// Q&A 항목 추가 명령어 (qa add)
///
/// 저장 전에 같은 테넌트의 기존 질문과 문자 겹침 유사도를 비교하여
/// 중복 의심 항목을 경고로 보여줍니다. 저장 자체는 막지 않습니다.
/// 저장 후에는 임베딩을 바로 생성합니다 (--skip-embed 또는 키 미설정 시 생략).
#[allow(clippy::too_many_arguments)]
async fn cmd_qa_add(
    config: &AppConfig,
    company: i64,
    question: String,
    answer: String,
    category: Option<String>,
    keywords: Option<String>,
    aliases: Option<String>,
    tags: Option<String>,
    skip_embed: bool,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("질문이 비어 있습니다");
    }
    if answer.trim().is_empty() {
        bail!("답변이 비어 있습니다");
    }

    let store = open_store(config)?;

    // 중복 의심 검사
    let matcher = KeywordMatcher::new()?;
    let corpus = store.active_entries(TenantScope::Tenant(company))?;
    let duplicates = matcher.find_duplicates(&question, None, &corpus);

    if !duplicates.is_empty() {
        println!("[!] 유사한 기존 질문이 있습니다:");
        for dup in &duplicates {
            println!(
                "    #{:<4} ({}%) {}",
                dup.qa_id,
                dup.similarity,
                truncate_text(&dup.question, 50)
            );
        }
        println!();
    }

    let qa_id = store
        .add_entry(NewQaEntry {
            company_id: company,
            category,
            question,
            answer,
            keywords,
            aliases,
            tags,
        })
        .context("항목 추가 실패")?;

    println!("[OK] 항목이 추가되었습니다 (ID: {})", qa_id);

    if skip_embed {
        println!(
            "     임베딩은 `sodam-chat rebuild --company {}`로 생성하세요",
            company
        );
    } else if !has_api_key() {
        println!("[!] OPENAI_API_KEY 미설정: 임베딩은 rebuild로 생성하세요");
    } else {
        embed_single(config, &store, company, qa_id).await?;
    }

    Ok(())
}

/// 단일 항목 임베딩 생성 (쿼터 검사/가산 포함)
async fn embed_single(
    config: &AppConfig,
    store: &KnowledgeStore,
    company: i64,
    qa_id: i64,
) -> Result<()> {
    quota::check_embed_quota(store, company)?;

    let embedder = create_embedder(&config.embedding_model)?;
    let entry = store
        .get_entry(qa_id)?
        .ok_or_else(|| anyhow::anyhow!("항목 #{} 조회 실패", qa_id))?;

    let index = VectorIndex::new(store);
    if index.upsert(&embedder, &entry).await? {
        quota::increment_usage(store, company, 0, 0, 1)?;
        println!("[OK] 임베딩 생성 완료");
    } else {
        println!("[!] 임베딩 생성 실패 (항목은 저장됨, rebuild로 재시도하세요)");
    }

    Ok(())
}

/// 항목 목록 명령어 (qa list)
#[allow(clippy::too_many_arguments)]
fn cmd_qa_list(
    config: &AppConfig,
    company: Option<i64>,
    include_inactive: bool,
    category: Option<&str>,
    search: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<()> {
    let store = open_store(config)?;

    let entries = store
        .list_entries(
            resolve_scope(company),
            include_inactive,
            category,
            search,
            limit,
            offset,
        )
        .context("항목 목록 조회 실패")?;

    if entries.is_empty() {
        println!("[!] 항목이 없습니다.");
        return Ok(());
    }

    println!("[OK] Q&A 항목 ({} 건):\n", entries.len());

    for entry in entries {
        print_entry_line(&entry);
    }

    Ok(())
}

/// 항목 상세 명령어 (qa show)
fn cmd_qa_show(config: &AppConfig, id: i64) -> Result<()> {
    let store = open_store(config)?;

    let entry = store
        .get_entry(id)
        .context("항목 조회 실패")?
        .ok_or_else(|| anyhow::anyhow!("ID {}인 항목을 찾을 수 없습니다", id))?;

    store.increment_view(id)?;

    let active = if entry.is_active { "활성" } else { "비활성" };

    println!("#{} [테넌트 {}] [{}]", entry.id, entry.company_id, active);
    println!("  카테고리: {}", entry.category.as_deref().unwrap_or("-"));
    println!("  질문: {}", entry.question);
    println!("  답변: {}", entry.answer);
    println!("  키워드: {}", entry.keywords.as_deref().unwrap_or("-"));
    println!("  동의어: {}", entry.aliases.as_deref().unwrap_or("-"));
    println!("  태그: {}", entry.tags.as_deref().unwrap_or("-"));
    println!(
        "  채택 {}회 / 조회 {}회 | 수정 {}",
        entry.used_count,
        entry.view_count,
        entry.updated_at.format("%Y-%m-%d %H:%M")
    );

    // 임베딩 상태
    let index = VectorIndex::new(&store);
    match index.get_record(id)? {
        Some(record) => {
            println!(
                "  임베딩: {} ({}차원)",
                record.model,
                record.embedding.len()
            );
        }
        None => println!("  임베딩: 없음"),
    }

    Ok(())
}

/// 항목 수정 명령어 (qa update)
///
/// 내용이 바뀌면 기존 임베딩이 낡은 상태가 되므로 수정 직후 다시
/// 임베딩합니다 (--skip-embed 또는 키 미설정 시 리빌드 안내만 출력).
#[allow(clippy::too_many_arguments)]
async fn cmd_qa_update(
    config: &AppConfig,
    id: i64,
    question: Option<String>,
    answer: Option<String>,
    category: Option<String>,
    keywords: Option<String>,
    aliases: Option<String>,
    tags: Option<String>,
    skip_embed: bool,
) -> Result<()> {
    let store = open_store(config)?;

    let update = QaUpdate {
        category,
        question,
        answer,
        keywords,
        aliases,
        tags,
    };

    if update.is_empty() {
        bail!("변경할 필드를 하나 이상 지정해야 합니다");
    }

    let updated = store.update_entry(id, update).context("항목 수정 실패")?;

    if !updated {
        bail!("ID {}인 항목을 찾을 수 없습니다", id);
    }

    println!("[OK] 항목 #{} 수정됨", id);

    if !skip_embed && has_api_key() {
        let entry = store
            .get_entry(id)?
            .ok_or_else(|| anyhow::anyhow!("항목 #{} 조회 실패", id))?;
        embed_single(config, &store, entry.company_id, id).await?;
    } else {
        let index = VectorIndex::new(&store);
        if index.get_record(id)?.is_some() {
            println!("[!] 기존 임베딩이 낡았습니다. rebuild로 갱신하세요.");
        }
    }

    Ok(())
}

/// 항목 삭제 명령어 (qa delete)
fn cmd_qa_delete(config: &AppConfig, id: i64) -> Result<()> {
    let store = open_store(config)?;

    let deleted = store.delete_entry(id).context("항목 삭제 실패")?;

    if deleted {
        println!("[OK] 항목 #{} 삭제됨 (임베딩 포함)", id);
    } else {
        println!("[!] 삭제할 항목을 찾을 수 없습니다");
    }

    Ok(())
}

/// 활성/비활성 전환 명령어 (qa toggle)
///
/// 비활성화 시 임베딩 레코드를 바로 정리하고,
/// 재활성화 시 키가 있으면 다시 임베딩합니다.
async fn cmd_qa_toggle(config: &AppConfig, id: i64) -> Result<()> {
    let store = open_store(config)?;

    let entry = store
        .get_entry(id)
        .context("항목 조회 실패")?
        .ok_or_else(|| anyhow::anyhow!("ID {}인 항목을 찾을 수 없습니다", id))?;

    let next = !entry.is_active;
    store.set_active(id, next).context("상태 변경 실패")?;

    if next {
        println!("[OK] 항목 #{} 활성화됨", id);
        if has_api_key() {
            embed_single(config, &store, entry.company_id, id).await?;
        } else {
            println!("     임베딩은 rebuild로 생성하세요");
        }
    } else {
        let index = VectorIndex::new(&store);
        index.delete(id).context("임베딩 레코드 정리 실패")?;
        println!("[OK] 항목 #{} 비활성화됨 (검색에서 제외, 임베딩 정리)", id);
    }

    Ok(())
}

// ============================================================================
// Ask Command
// ============================================================================

/// 질문/답변 명령어 (ask)
///
/// API 키가 있으면 RAG 파이프라인을, 없으면 키워드 검색만 사용합니다.
async fn cmd_ask(
    config: &AppConfig,
    company: i64,
    session: Option<String>,
    question: &str,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("질문이 비어 있습니다");
    }

    let store = open_store(config)?;

    let (embedder, completer): (
        Option<Box<dyn EmbeddingProvider>>,
        Option<Box<dyn CompletionProvider>>,
    ) = if has_api_key() {
        let embedder = create_embedder(&config.embedding_model)?;
        let completer = OpenAiCompletion::from_env_with_model(config.chat_model.clone())?;
        (Some(Box::new(embedder)), Some(Box::new(completer)))
    } else {
        println!("[!] OPENAI_API_KEY 미설정: 키워드 검색만 사용합니다.\n");
        (None, None)
    };

    let engine = RagEngine::new(store, config.clone(), embedder, completer)
        .context("RagEngine 초기화 실패")?;

    let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());

    let result = engine.answer(company, &session_id, question).await?;

    println!("{}", result.answer);
    println!();

    let outcome_str = match result.outcome {
        RagOutcome::Rag => "RAG",
        RagOutcome::EvidenceFallback => "근거 폴백",
        RagOutcome::Keyword => "키워드",
        RagOutcome::NoMatch => "매칭 없음",
    };

    println!("[*] 경로: {} | 세션: {}", outcome_str, session_id);

    if let Some(sim) = result.similarity_score {
        println!("    유사도: {:.4} | 근거: {:?}", sim, result.evidence_ids);
    }
    if let Some(conf) = result.confidence {
        println!("    신뢰도: {:.3}", conf);
    }
    println!(
        "    {}ms | {} tokens",
        result.latency_ms, result.tokens_used
    );

    Ok(())
}

// ============================================================================
// Rebuild Command
// ============================================================================

/// 임베딩 리빌드 명령어 (rebuild)
///
/// 고아/비활성 레코드를 정리한 뒤 활성 항목 전체를 다시 임베딩합니다.
/// 테넌트 지정 시 임베딩 쿼터를 검사/가산하고, --all은 관리자용이므로
/// 쿼터 계산 없이 수행합니다.
async fn cmd_rebuild(config: &AppConfig, company: Option<i64>, all: bool) -> Result<()> {
    let scope = match (company, all) {
        (Some(id), false) => TenantScope::Tenant(id),
        (None, true) => TenantScope::All,
        (Some(_), true) => bail!("--company와 --all은 함께 사용할 수 없습니다"),
        (None, false) => bail!("--company <ID> 또는 --all을 지정해야 합니다"),
    };

    let store = open_store(config)?;

    if let TenantScope::Tenant(id) = scope {
        quota::check_embed_quota(&store, id)?;
    }

    let embedder = create_embedder(&config.embedding_model)?;
    let index = VectorIndex::new(&store);

    println!("[*] 임베딩 리빌드 중... (모델: {})", embedder.name());

    let stats = index
        .rebuild(&store, &embedder, scope)
        .await
        .context("리빌드 실패")?;

    if let TenantScope::Tenant(id) = scope {
        if stats.success > 0 {
            quota::increment_usage(&store, id, 0, 0, stats.success as i64)?;
        }
    }

    println!(
        "[OK] 완료: 성공 {}, 실패 {}, 정리 {} (총 {} 건)",
        stats.success, stats.failed, stats.pruned, stats.total
    );

    if stats.failed > 0 {
        println!("[!] 실패한 항목은 rebuild를 다시 실행하면 재시도됩니다.");
    }

    Ok(())
}

// ============================================================================
// History / Unanswered Commands
// ============================================================================

/// 상담 로그 조회 명령어 (history)
fn cmd_history(
    config: &AppConfig,
    session: Option<String>,
    company: Option<i64>,
    limit: usize,
) -> Result<()> {
    let store = open_store(config)?;

    let logs = if let Some(ref session_id) = session {
        store
            .session_history(session_id, limit)
            .context("세션 로그 조회 실패")?
    } else {
        store
            .list_chat_logs(resolve_scope(company), limit)
            .context("상담 로그 조회 실패")?
    };

    if logs.is_empty() {
        println!("[!] 상담 로그가 없습니다.");
        return Ok(());
    }

    println!("[OK] 상담 로그 ({} 건):\n", logs.len());

    for log in logs {
        let method = if log.used_rag { "RAG" } else { "KW " };
        let qa = log
            .qa_id
            .map(|id| format!("#{}", id))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "  [{}] [{}] 테넌트 {} | 세션 {} | 근거 {}",
            log.created_at.format("%Y-%m-%d %H:%M"),
            method,
            log.company_id,
            truncate_text(&log.session_id, 8),
            qa
        );
        println!("    Q: {}", truncate_text(&log.question, 60));
        println!("    A: {}", truncate_text(&log.answer, 60));
        println!();
    }

    Ok(())
}

/// 미답변 질문 목록 명령어 (unanswered)
fn cmd_unanswered(config: &AppConfig, company: Option<i64>, limit: usize) -> Result<()> {
    let store = open_store(config)?;

    let items = store
        .list_unanswered(resolve_scope(company), limit)
        .context("미답변 질문 조회 실패")?;

    if items.is_empty() {
        println!("[OK] 미답변 질문이 없습니다.");
        return Ok(());
    }

    println!("[!] 미답변 질문 ({} 건):\n", items.len());

    for item in items {
        println!(
            "  #{:<4} [테넌트 {}] [{}] [{}] {}",
            item.id,
            item.company_id,
            item.status,
            item.created_at.format("%Y-%m-%d %H:%M"),
            truncate_text(&item.question, 60)
        );
    }

    println!();
    println!("    `qa add`로 답변을 등록하면 다음부터 매칭됩니다.");

    Ok(())
}

// ============================================================================
// Status Command
// ============================================================================

/// 상태 확인 명령어 (status)
fn cmd_status(config: &AppConfig, company: Option<i64>) -> Result<()> {
    println!("sodam-chat v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 모델: {} / {}",
        config.embedding_model, config.chat_model
    );
    println!(
        "[*] 검색: top_k={}, min_score={}",
        config.rag_top_k, config.rag_min_score
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정 (키워드 검색만 동작)");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    let scope = resolve_scope(company);

    match open_store(config) {
        Ok(store) => match store.stats(scope) {
            Ok(stats) => {
                println!(
                    "[OK] Q&A 항목: {} 건 (활성 {}), 임베딩 {} 건",
                    stats.entry_count, stats.active_count, stats.embedding_count
                );
                println!(
                    "     상담 로그: {} 건, 미답변: {} 건",
                    stats.chat_log_count, stats.unanswered_count
                );

                if stats.embedding_count < stats.active_count {
                    println!(
                        "[!] 임베딩이 없는 활성 항목 {} 건: rebuild를 실행하세요.",
                        stats.active_count - stats.embedding_count
                    );
                }

                // 테넌트 지정 시 쿼터/사용량도 표시
                if let TenantScope::Tenant(id) = scope {
                    print_quota_status(&store, id)?;
                }
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] KnowledgeStore 열기 실패: {}", e);
        }
    }

    Ok(())
}

/// 테넌트 쿼터/사용량 출력
fn print_quota_status(store: &KnowledgeStore, company_id: i64) -> Result<()> {
    let yyyymm = quota::current_yyyymm();
    let usage = store.get_or_create_usage(company_id, &yyyymm)?;

    match store.get_quota(company_id)? {
        Some(q) => {
            println!(
                "[*] {} 사용량: 채팅 {}/{}, 토큰 {}/{}, 임베딩 {}/{}",
                yyyymm,
                usage.chat_cnt,
                q.monthly_chat_cnt,
                usage.tokens_used,
                q.monthly_tokens,
                usage.embed_cnt,
                q.monthly_embed_cnt
            );
        }
        None => {
            println!(
                "[*] {} 사용량: 채팅 {}, 토큰 {}, 임베딩 {} (한도 없음)",
                yyyymm, usage.chat_cnt, usage.tokens_used, usage.embed_cnt
            );
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 목록용 한 줄 출력
fn print_entry_line(entry: &QaEntry) {
    let active = if entry.is_active { " " } else { "X" };
    let category = entry.category.as_deref().unwrap_or("-");

    println!(
        "  #{:<4} [{}] [테넌트 {}] [{}] {}",
        entry.id,
        active,
        entry.company_id,
        category,
        truncate_text(&entry.question, 40)
    );
    println!(
        "        채택 {}회 | {}",
        entry.used_count,
        entry.updated_at.format("%Y-%m-%d %H:%M")
    );
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
