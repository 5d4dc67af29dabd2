//! CLI 모듈
//!
//! site-rag CLI 명령어 정의 및 구현

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::agent::AgentError;
use crate::config::Settings;
use crate::embedding::has_api_key;
use crate::knowledge::{format_evidence, KeywordIndex, LanceVectorStore, SearchMode, VectorIndex};
use crate::service::{index_status, new_session_id, BuildStatus, RagService};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "site-rag")]
#[command(version, about = "웹사이트 기반 하이브리드 RAG 질의응답", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 사이트를 크롤링하여 인덱스 빌드
    Build {
        /// 사이트 루트 URL (sitemap.xml 위치)
        #[arg(short, long)]
        site: String,
    },

    /// 질문 한 번 처리
    Ask {
        /// 질문
        question: String,

        /// 세션 id
        #[arg(short, long)]
        session: Option<String>,
    },

    /// 대화형 질의응답 (exit로 종료)
    Chat {
        /// 이어갈 세션 id (없으면 새 세션)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// 검색만 수행
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (기본: top_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// 검색 모드
        #[arg(short, long, value_enum, default_value = "hybrid")]
        mode: SearchMode,
    },

    /// 세션 관리
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// 상태 확인
    Status,

    /// 저장된 청크 샘플 확인
    Inspect {
        /// 샘플 개수
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// 새 세션 id 발급
    New,

    /// 세션 기록 삭제
    Clear {
        /// 세션 id
        id: String,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings;
    match cli.command {
        Commands::Build { site } => cmd_build(settings, &site).await,
        Commands::Ask { question, session } => {
            cmd_ask(settings, &question, session.as_deref()).await
        }
        Commands::Chat { session } => cmd_chat(settings, session).await,
        Commands::Search { query, k, mode } => cmd_search(settings, &query, k, mode).await,
        Commands::Session {
            action: SessionAction::New,
        } => {
            println!("[OK] 세션 id: {}", new_session_id());
            Ok(())
        }
        Commands::Session {
            action: SessionAction::Clear { id },
        } => cmd_session_clear(settings, &id).await,
        Commands::Status => cmd_status(settings).await,
        Commands::Inspect { limit } => cmd_inspect(settings, limit).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 빌드 명령어 (build)
async fn cmd_build(settings: Settings, site: &str) -> Result<()> {
    let service = RagService::open(settings).await?;

    println!("[*] 사이트 크롤링 및 인덱스 빌드 중: {}", site);
    let response = service.build(site).await;

    match response.status {
        BuildStatus::Success => println!("[OK] {}", response.message),
        BuildStatus::Error => println!("[!] {}", response.message),
    }
    println!(
        "     처리: {}, 건너뜀: {}, 삭제: {}, 실패: {}",
        response.processed, response.skipped, response.deleted, response.failed
    );

    if response.status == BuildStatus::Error {
        anyhow::bail!("Index build failed");
    }
    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(settings: Settings, question: &str, session: Option<&str>) -> Result<()> {
    let service = RagService::open(settings).await?;

    println!("[*] 질문 처리 중: \"{}\"", question);
    let response = service.ask(question, session).await?;
    println!("\n{}", response.answer);
    Ok(())
}

/// 대화형 명령어 (chat)
///
/// 세션 기록은 history.db에 남아 `--session`으로 이어갈 수 있습니다.
async fn cmd_chat(settings: Settings, session: Option<String>) -> Result<()> {
    let service = RagService::open(settings).await?;
    let session = session.unwrap_or_else(|| service.new_session().session_id);

    println!("[OK] 세션 시작: {}", session);
    println!("     종료하려면 exit 입력\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }

        match service.ask(question, Some(&session)).await {
            Ok(response) => println!("\n{}\n", response.answer),
            Err(AgentError::Timeout { secs }) => {
                println!("[!] {}초 안에 답변하지 못했습니다\n", secs)
            }
            Err(e) => println!("[!] 답변 실패: {:#}\n", e),
        }
    }

    println!("[OK] 세션 종료 (이어가기: site-rag chat --session {})", session);
    Ok(())
}

/// 세션 삭제 명령어 (session clear)
async fn cmd_session_clear(settings: Settings, id: &str) -> Result<()> {
    let service = RagService::open(settings).await?;
    service.clear_session(id).await?;
    println!("[OK] 세션 삭제: {}", id);
    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(
    settings: Settings,
    query: &str,
    k: Option<usize>,
    mode: SearchMode,
) -> Result<()> {
    let k = k.unwrap_or(settings.top_k);
    let service = RagService::open(settings).await?;

    println!("[*] 검색 중: \"{}\"", query);
    let results = service.search(query, k, mode).await?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:?}] score {:.4} - {}",
            i + 1,
            result.method,
            result.score,
            result.metadata.source_url
        );
        println!("   내용: {}", truncate_text(&result.metadata.text, 200));
        println!();
    }

    tracing::debug!("{}", format_evidence(query, &results));
    Ok(())
}

/// 상태 명령어 (status)
///
/// 시스템 상태를 확인합니다.
async fn cmd_status(settings: Settings) -> Result<()> {
    println!("site-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = settings.data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    // API 키 상태
    if has_api_key(settings.embedding_provider) {
        println!("[OK] 임베딩 API 키: 설정됨 ({:?})", settings.embedding_provider);
    } else {
        println!("[!] 임베딩 API 키: 미설정 ({:?})", settings.embedding_provider);
    }
    if crate::embedding::get_openai_api_key().is_ok() {
        println!("[OK] 생성 모델 API 키: 설정됨 ({})", settings.chat_model);
    } else {
        println!("[!] 생성 모델 API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    if !data_dir.exists() {
        println!("[!] 인덱스가 아직 없습니다. `site-rag build --site <url>`로 생성하세요.");
        return Ok(());
    }

    let vector = LanceVectorStore::open(&settings.vector_path(), settings.embedding_dimension())
        .await
        .context("Failed to open vector store")?;
    let keyword = KeywordIndex::open(&settings.keyword_path())?;

    match index_status(&vector, &keyword).await {
        Ok(status) => {
            println!(
                "[OK] 벡터 인덱스: {} 청크 ({} 페이지)",
                status.chunk_count, status.page_count
            );
            match status.keyword.built_at {
                Some(built_at) => println!(
                    "[OK] 키워드 인덱스: {} 청크 (빌드: {})",
                    status.keyword.chunk_count,
                    built_at.format("%Y-%m-%d %H:%M:%S")
                ),
                None => println!("[!] 키워드 인덱스: 빌드되지 않음"),
            }
            if let Ok(meta) = std::fs::metadata(&status.keyword.db_path) {
                println!("     키워드 번들 크기: {}", format_bytes(meta.len() as usize));
            }
        }
        Err(e) => println!("[!] 통계 조회 실패: {:#}", e),
    }

    Ok(())
}

/// 샘플 확인 명령어 (inspect)
async fn cmd_inspect(settings: Settings, limit: usize) -> Result<()> {
    let vector = LanceVectorStore::open(&settings.vector_path(), settings.embedding_dimension())
        .await
        .context("Failed to open vector store")?;
    let keyword = KeywordIndex::open(&settings.keyword_path())?;

    let status = index_status(&vector, &keyword).await?;
    println!("[OK] 총 청크 수: {}", status.chunk_count);

    let samples = vector.sample(limit).await?;
    if samples.is_empty() {
        println!("[!] 저장된 청크가 없습니다.");
        return Ok(());
    }

    println!();
    for chunk in samples {
        println!("  {}", chunk.id);
        println!("        URL: {}", chunk.metadata.source_url);
        println!("        해시: {}", truncate_text(&chunk.metadata.content_hash, 16));
        println!("        내용: {}", truncate_text(&chunk.metadata.text, 120));
        println!();
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

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

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
