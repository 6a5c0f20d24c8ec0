//! 키워드 매칭 - 결정적 폴백 검색
//!
//! RAG 파이프라인이 불가능하거나 결과가 없을 때 항상 동작하는
//! 마지막 검색 단계입니다. 외부 의존성 없이 (질문, 코퍼스)만으로
//! 같은 결과를 내는 순수 함수 집합입니다.

use anyhow::{Context, Result};
use regex::Regex;

use super::store::QaEntry;

/// 토큰에서 반복 제거할 한국어 조사/어미 목록 (긴 것 우선)
const PARTICLE_PATTERN: &str =
    "(?:인가요|하나요|할까요|한가요|되나요|어떻게|부터|까지|에서|으로|이라|무엇|어떤|인가|인지|\
     은|는|이|가|을|를|의|에|로|와|과|도|만|라|요|뭐)$";

/// 문장부호/공백 연속 구간
const PUNCT_PATTERN: &str = r"[?!.,;:~\s]+";

/// 중복 판정 최소 질문 길이 (문자 수)
const DUPLICATE_MIN_CHARS: usize = 5;

/// 중복 판정 유사도 하한
const DUPLICATE_THRESHOLD: f64 = 0.8;

/// 중복 후보 최대 개수
const DUPLICATE_LIMIT: usize = 5;

// ============================================================================
// Types
// ============================================================================

/// 키워드 매칭 결과
#[derive(Debug, Clone)]
pub struct KeywordMatch {
    pub qa_id: i64,
    pub answer: String,
    pub category: Option<String>,
    pub score: i64,
    /// 이론적 최대 점수 대비 정규화, [0,1] 클램프, 소수점 3자리
    pub confidence: f64,
}

/// 중복 질문 후보
#[derive(Debug, Clone)]
pub struct DuplicateHit {
    pub qa_id: i64,
    pub question: String,
    /// 문자 겹침 유사도 (백분율, 반올림)
    pub similarity: u32,
}

// ============================================================================
// KeywordMatcher
// ============================================================================

/// 키워드 매처
///
/// 정규식은 생성 시 한 번만 컴파일합니다.
pub struct KeywordMatcher {
    particles: Regex,
    punct: Regex,
}

impl KeywordMatcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            particles: Regex::new(PARTICLE_PATTERN)
                .context("Failed to compile particle pattern")?,
            punct: Regex::new(PUNCT_PATTERN).context("Failed to compile punctuation pattern")?,
        })
    }

    /// 텍스트 정규화: 트림 + 소문자화 + 부호/공백 연속을 단일 공백으로
    pub fn normalize(&self, text: &str) -> String {
        let lowered = text.trim().to_lowercase();
        self.punct.replace_all(&lowered, " ").trim().to_string()
    }

    /// 토큰 끝의 조사를 반복 제거 (연쇄 조사 대응)
    fn strip_particles(&self, token: &str) -> String {
        let mut current = token.to_string();
        loop {
            let stripped = self.particles.replace(&current, "").to_string();
            if stripped == current {
                return current;
            }
            current = stripped;
        }
    }

    /// 토큰화: 공백 분리 후 조사 제거, 2문자 미만 토큰 폐기
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.normalize(text)
            .split_whitespace()
            .map(|t| self.strip_particles(t))
            .filter(|t| t.chars().count() >= 2)
            .collect()
    }

    /// 코퍼스에서 최고 득점 항목 검색
    ///
    /// 점수 규칙:
    /// - 정규화된 질문 전체가 항목 질문의 부분문자열이면 +5
    /// - 토큰별: 질문 포함 +3, 보조 텍스트(키워드/동의어/태그) 포함 +2, 답변 포함 +1
    ///
    /// 동점은 qa_id가 가장 작은 항목이 이깁니다. 코퍼스가 비어 있거나
    /// 최고 점수가 0이면 None을 반환합니다.
    pub fn search(
        &self,
        question: &str,
        category: Option<&str>,
        corpus: &[QaEntry],
    ) -> Option<KeywordMatch> {
        if corpus.is_empty() {
            return None;
        }

        let tokens = self.tokenize(question);
        let normalized_question = self.normalize(question);

        let mut best: Option<(i64, &QaEntry)> = None;

        for entry in corpus {
            if !entry.is_active {
                continue;
            }
            if let Some(cat) = category {
                if entry.category.as_deref() != Some(cat) {
                    continue;
                }
            }

            let question_lower = entry.question.to_lowercase();
            // 키워드/동의어/태그를 하나의 보조 매칭 텍스트로 합침
            let supplementary_lower = [
                entry.keywords.as_deref(),
                entry.aliases.as_deref(),
                entry.tags.as_deref(),
            ]
            .iter()
            .flatten()
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(",");
            let answer_lower = entry.answer.to_lowercase();

            let mut score: i64 = 0;

            if !normalized_question.is_empty() && question_lower.contains(&normalized_question) {
                score += 5;
            }

            for token in &tokens {
                if question_lower.contains(token.as_str()) {
                    score += 3;
                }
                if supplementary_lower.contains(token.as_str()) {
                    score += 2;
                }
                if answer_lower.contains(token.as_str()) {
                    score += 1;
                }
            }

            let better = match best {
                None => score > 0,
                Some((best_score, best_entry)) => {
                    score > best_score || (score == best_score && entry.id < best_entry.id)
                }
            };
            if better && score > 0 {
                best = Some((score, entry));
            }
        }

        best.map(|(score, entry)| {
            let max_possible = 5 + tokens.len() as i64 * 6;
            let confidence = (score as f64 / max_possible.max(1) as f64).min(1.0);
            KeywordMatch {
                qa_id: entry.id,
                answer: entry.answer.clone(),
                category: entry.category.clone(),
                score,
                confidence: (confidence * 1000.0).round() / 1000.0,
            }
        })
    }

    /// 문자 겹침 기반 중복 질문 후보 검색
    ///
    /// 질문이 5문자 미만이면 빈 목록. 유사도 0.8 이상을 내림차순 상위 5개.
    pub fn find_duplicates(
        &self,
        question: &str,
        exclude_id: Option<i64>,
        corpus: &[QaEntry],
    ) -> Vec<DuplicateHit> {
        let q: Vec<char> = question.trim().to_lowercase().chars().collect();
        if q.len() < DUPLICATE_MIN_CHARS {
            return Vec::new();
        }

        let mut hits: Vec<DuplicateHit> = Vec::new();

        for entry in corpus {
            if exclude_id == Some(entry.id) {
                continue;
            }
            let existing: Vec<char> = entry.question.trim().to_lowercase().chars().collect();
            if existing.is_empty() {
                continue;
            }

            let common = q.iter().filter(|c| existing.contains(c)).count();
            let similarity = (2.0 * common as f64) / (q.len() + existing.len()) as f64;
            if similarity >= DUPLICATE_THRESHOLD {
                hits.push(DuplicateHit {
                    qa_id: entry.id,
                    question: entry.question.clone(),
                    similarity: (similarity * 100.0).round() as u32,
                });
            }
        }

        hits.sort_by(|a, b| b.similarity.cmp(&a.similarity).then(a.qa_id.cmp(&b.qa_id)));
        hits.truncate(DUPLICATE_LIMIT);
        hits
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn matcher() -> KeywordMatcher {
        KeywordMatcher::new().unwrap()
    }

    fn entry(id: i64, question: &str, answer: &str, keywords: Option<&str>) -> QaEntry {
        QaEntry {
            id,
            company_id: 1,
            category: Some("일반".to_string()),
            question: question.to_string(),
            answer: answer.to_string(),
            keywords: keywords.map(str::to_string),
            aliases: None,
            tags: None,
            is_active: true,
            used_count: 0,
            view_count: 0,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize() {
        let m = matcher();
        assert_eq!(m.normalize("  안녕하세요???  "), "안녕하세요");
        assert_eq!(m.normalize("Hello, World!!"), "hello world");
        assert_eq!(m.normalize("질문...  입니다~"), "질문 입니다");
    }

    #[test]
    fn test_tokenize_strips_particles() {
        let m = matcher();
        let tokens = m.tokenize("관리비는 언제까지 납부하나요?");
        assert_eq!(tokens, vec!["관리비", "언제", "납부"]);
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        let m = matcher();
        // "요"만 남는 토큰은 전부 제거되어 폐기
        let tokens = m.tokenize("이 집 뭐요");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_tokenize_chained_particles() {
        let m = matcher();
        // "에서" 제거 후 "부터"가 다시 제거되는 연쇄
        let tokens = m.tokenize("주차장부터에서");
        assert_eq!(tokens, vec!["주차장"]);
    }

    #[test]
    fn test_search_keyword_overlap() {
        let m = matcher();
        let corpus = vec![entry(
            1,
            "부가세 신고 기한이 언제인가요?",
            "매 분기 종료 후 25일 이내입니다.",
            Some("부가세,신고"),
        )];

        let result = m.search("부가세 신고 언제까지 해야하나요", None, &corpus);
        assert!(result.is_some());
        let result = result.unwrap();
        assert_eq!(result.qa_id, 1);
        assert_eq!(result.answer, "매 분기 종료 후 25일 이내입니다.");
        assert!(result.score > 0);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn test_search_matches_aliases_and_tags() {
        let m = matcher();
        let mut with_alias = entry(1, "요금 안내", "기본 요금은 만원입니다.", None);
        with_alias.aliases = Some("가격,비용".to_string());
        let mut with_tag = entry(2, "요금 안내", "기본 요금은 만원입니다.", None);
        with_tag.tags = Some("멤버십".to_string());
        let corpus = vec![with_alias, with_tag];

        // 동의어에만 있는 토큰이 점수에 반영됨
        let result = m.search("비용 문의", None, &corpus).unwrap();
        assert_eq!(result.qa_id, 1);

        let result = m.search("멤버십 문의", None, &corpus).unwrap();
        assert_eq!(result.qa_id, 2);
    }

    #[test]
    fn test_search_empty_corpus() {
        let m = matcher();
        assert!(m.search("아무 질문", None, &[]).is_none());
    }

    #[test]
    fn test_search_zero_score() {
        let m = matcher();
        let corpus = vec![entry(1, "주차 등록 방법", "차량 번호를 등록하세요.", None)];
        assert!(m.search("환불 절차 문의", None, &corpus).is_none());
    }

    #[test]
    fn test_search_tie_break_lowest_id() {
        let m = matcher();
        // 두 항목이 같은 점수가 되도록 동일 텍스트 사용
        let corpus = vec![
            entry(7, "배송 조회 방법", "마이페이지에서 확인하세요.", None),
            entry(3, "배송 조회 방법", "마이페이지에서 확인하세요.", None),
        ];
        let result = m.search("배송 조회", None, &corpus).unwrap();
        assert_eq!(result.qa_id, 3);
    }

    #[test]
    fn test_search_category_filter() {
        let m = matcher();
        let mut a = entry(1, "결제 수단 변경", "설정에서 변경합니다.", None);
        a.category = Some("결제".to_string());
        let mut b = entry(2, "결제 오류 해결", "다시 시도해 주세요.", None);
        b.category = Some("오류".to_string());
        let corpus = vec![a, b];

        let result = m.search("결제 문의", Some("오류"), &corpus).unwrap();
        assert_eq!(result.qa_id, 2);
    }

    #[test]
    fn test_search_skips_inactive() {
        let m = matcher();
        let mut inactive = entry(1, "포인트 적립 방법", "구매 시 적립됩니다.", None);
        inactive.is_active = false;
        let corpus = vec![inactive];
        assert!(m.search("포인트 적립", None, &corpus).is_none());
    }

    #[test]
    fn test_confidence_normalization() {
        let m = matcher();
        let corpus = vec![entry(
            1,
            "회원 탈퇴는 어떻게 하나요?",
            "설정 > 계정에서 탈퇴할 수 있습니다.",
            Some("탈퇴,회원"),
        )];
        let result = m.search("회원 탈퇴는 어떻게 하나요?", None, &corpus).unwrap();
        // 완전 일치에 가까워도 1.0을 넘지 않음
        assert!(result.confidence <= 1.0);
        // 소수점 3자리 반올림
        let scaled = result.confidence * 1000.0;
        assert!((scaled - scaled.round()).abs() < 1e-9);
    }

    #[test]
    fn test_find_duplicates() {
        let m = matcher();
        let corpus = vec![
            entry(1, "관리비 납부 방법 안내", "답변 1", None),
            entry(2, "주차장 이용 안내", "답변 2", None),
        ];

        let hits = m.find_duplicates("관리비 납부 방법 안내", None, &corpus);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].qa_id, 1);
        assert_eq!(hits[0].similarity, 100);
    }

    #[test]
    fn test_find_duplicates_short_question() {
        let m = matcher();
        let corpus = vec![entry(1, "관리비 납부", "답변", None)];
        assert!(m.find_duplicates("납부", None, &corpus).is_empty());
    }

    #[test]
    fn test_find_duplicates_exclude_id() {
        let m = matcher();
        let corpus = vec![entry(1, "관리비 납부 방법 안내", "답변", None)];
        let hits = m.find_duplicates("관리비 납부 방법 안내", Some(1), &corpus);
        assert!(hits.is_empty());
    }
}
