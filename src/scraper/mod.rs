//! 웹 스크래퍼 모듈 - sitemap 크롤링 및 페이지 텍스트 추출
//!
//! - `fetch_all_urls`: `{site}/sitemap.xml`의 `<loc>` 목록에서 제외 경로를 걸러낸 크롤 대상
//! - `fetch_text`: HTML을 받아 화면에 보이는 텍스트만 공백 하나로 이어 붙인 정규화 텍스트
//!
//! 전송 실패는 빈 문자열로 신호합니다 (빌더가 해당 페이지를 건너뜀).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Node};
use url::Url;

/// 기본 제외 경로 (이 문자열로 시작하는 상대 경로는 제외)
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["/privacy-policy"];

/// 기본 다국어 페이지 접두사 (정확히 일치하거나 `접두사/`로 시작하면 제외)
pub const DEFAULT_EXCLUDE_LANG_PREFIXES: &[&str] = &["/us", "/jp", "/vn", "/cn", "/hk"];

/// 텍스트 추출 시 통째로 버리는 태그
const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "noscript"];

// ============================================================================
// ContentSource Trait
// ============================================================================

/// 크롤 소스 트레이트
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// 사이트의 크롤 대상 URL 목록
    async fn fetch_all_urls(&self, site_url: &str) -> Result<Vec<String>>;

    /// 페이지의 정규화 텍스트 (실패/빈 페이지는 빈 문자열)
    async fn fetch_text(&self, url: &str) -> String;
}

// ============================================================================
// CrawlFilter
// ============================================================================

/// 크롤 대상 필터
#[derive(Debug, Clone)]
pub struct CrawlFilter {
    pub exclude_patterns: Vec<String>,
    pub exclude_lang_prefixes: Vec<String>,
}

impl Default for CrawlFilter {
    fn default() -> Self {
        Self {
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            exclude_lang_prefixes: DEFAULT_EXCLUDE_LANG_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl CrawlFilter {
    /// 상대 경로가 크롤 대상인지 여부
    pub fn allows(&self, relative: &str) -> bool {
        if self
            .exclude_patterns
            .iter()
            .any(|p| relative.starts_with(p.as_str()))
        {
            return false;
        }

        // '/us'는 '/us', '/us/...'만 제외하고 '/users'는 유지
        !self.exclude_lang_prefixes.iter().any(|prefix| {
            relative == prefix
                || relative
                    .strip_prefix(prefix.as_str())
                    .map(|rest| rest.starts_with('/'))
                    .unwrap_or(false)
        })
    }

    /// sitemap URL 목록 필터링
    ///
    /// 첫 URL의 `scheme://host[:port]`를 실서버 기준으로 보고 상대 경로를 계산합니다.
    pub fn filter(&self, urls: Vec<String>) -> Vec<String> {
        let Some(base) = urls.first().and_then(|u| origin_of(u)) else {
            return urls;
        };
        tracing::debug!("Detected production base URL from sitemap: {}", base);

        urls.into_iter()
            .filter(|url| {
                let relative = url.strip_prefix(base.as_str()).unwrap_or(url.as_str());
                let relative = if relative.is_empty() { "/" } else { relative };
                self.allows(relative)
            })
            .collect()
    }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    Some(parsed.origin().ascii_serialization()).filter(|o| o != "null")
}

// ============================================================================
// WebScraper
// ============================================================================

/// 웹 스크래퍼
pub struct WebScraper {
    client: reqwest::Client,
    filter: CrawlFilter,
}

impl WebScraper {
    /// 기본 필터로 생성
    pub fn new() -> Result<Self> {
        Self::with_filter(CrawlFilter::default())
    }

    /// 필터 지정
    pub fn with_filter(filter: CrawlFilter) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("site-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        Ok(Self { client, filter })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP 요청 실패")?
            .error_for_status()
            .context("HTTP 에러 응답")?;

        response.text().await.context("응답 본문 읽기 실패")
    }
}

#[async_trait]
impl ContentSource for WebScraper {
    async fn fetch_all_urls(&self, site_url: &str) -> Result<Vec<String>> {
        let sitemap_url = format!("{}/sitemap.xml", site_url.trim_end_matches('/'));
        tracing::info!("Fetching sitemap from: {}", sitemap_url);

        let xml = self
            .get_text(&sitemap_url)
            .await
            .with_context(|| format!("Failed to fetch sitemap: {}", sitemap_url))?;

        let locs = parse_sitemap_locs(&xml)?;
        if locs.is_empty() {
            tracing::warn!("Sitemap is empty or has no <loc> entries");
            return Ok(vec![]);
        }

        let urls = self.filter.filter(locs);
        tracing::info!("Sitemap parsed, {} pages to crawl", urls.len());
        Ok(urls)
    }

    async fn fetch_text(&self, url: &str) -> String {
        tracing::debug!("Scraping: {}", url);
        match self.get_text(url).await {
            Ok(html) => extract_text(&html),
            Err(e) => {
                tracing::warn!("Could not get HTML from {}: {:#}", url, e);
                String::new()
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// sitemap XML에서 `<loc>` 값 추출 (등장 순서 유지)
///
/// 엔티티/문자 참조는 디코딩하고 CDATA 구간은 그대로 이어 붙입니다.
pub fn parse_sitemap_locs(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event().context("Malformed sitemap XML")? {
            Event::Start(e) if e.local_name().as_ref() == b"loc" => {
                current = Some(String::new());
            }
            Event::Text(text) => {
                if let Some(loc) = current.as_mut() {
                    loc.push_str(&text.unescape().context("Invalid entity in <loc>")?);
                }
            }
            Event::CData(data) => {
                if let Some(loc) = current.as_mut() {
                    let raw = data.into_inner();
                    loc.push_str(std::str::from_utf8(&raw).context("Non UTF-8 CDATA in <loc>")?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"loc" => {
                if let Some(loc) = current.take() {
                    let loc = loc.trim();
                    if !loc.is_empty() {
                        locs.push(loc.to_string());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(locs)
}

/// HTML에서 보이는 텍스트 추출
///
/// `script`, `style`, `nav`, `footer`, `header`, `noscript` 하위 텍스트는 버리고
/// 나머지 텍스트 노드를 트림하여 공백 하나로 연결합니다.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let skipped = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => SKIPPED_TAGS.contains(&element.name()),
            _ => false,
        });
        if skipped {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    let joined = parts.join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Tests
// ============================================================================
