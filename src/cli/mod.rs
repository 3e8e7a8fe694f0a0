//! CLI 모듈
//!
//! rag-knowledge CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectionStats, CollectorConfig, FileCollector};
use crate::config::AppConfig;
use crate::knowledge::FileStatus;
use crate::server::{self, AppState};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "rag-knowledge")]
#[command(version, about = "Ollama 기반 RAG 지식베이스 서비스", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: ./rag-knowledge.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP API 서버 실행
    Serve {
        /// 바인드 호스트 (설정 덮어쓰기)
        #[arg(long)]
        host: Option<String>,

        /// 바인드 포트 (설정 덮어쓰기)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// 파일 또는 폴더를 지식베이스에 추가
    Ingest {
        /// 지식베이스 이름
        #[arg(short, long)]
        rag: String,

        /// 수집할 파일 경로 (여러 번 지정 가능)
        #[arg(long)]
        file: Vec<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// PDF 파일 건너뛰기
        #[arg(long)]
        skip_pdfs: bool,
    },

    /// 질문하기 (지식베이스 지정 시 RAG)
    Ask {
        /// 질문
        query: String,

        /// 채팅 모델 (기본: 설정의 chat.default_model)
        #[arg(short, long)]
        model: Option<String>,

        /// 참고할 지식베이스
        #[arg(short, long)]
        rag: Option<String>,

        /// 검색 결과 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 스트리밍 없이 한 번에 출력
        #[arg(long)]
        no_stream: bool,
    },

    /// 지식베이스 목록
    List,

    /// 지식베이스 검색 (LLM 호출 없음)
    Search {
        /// 검색 쿼리
        query: String,

        /// 지식베이스 이름
        #[arg(short, long)]
        rag: String,

        /// 결과 개수 제한
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("설정 로딩 실패")?;

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(config, host, port).await,
        Commands::Ingest {
            rag,
            file,
            dir,
            skip_pdfs,
        } => cmd_ingest(config, &rag, file, dir, skip_pdfs).await,
        Commands::Ask {
            query,
            model,
            rag,
            top_k,
            no_stream,
        } => cmd_ask(config, &query, model, rag, top_k, no_stream).await,
        Commands::List => cmd_list(config).await,
        Commands::Search { query, rag, top_k } => cmd_search(config, &query, &rag, top_k).await,
        Commands::Status => cmd_status(config, cli.config.as_deref()).await,
    }
}

/// Ctrl-C 시 취소되는 토큰
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            child.cancel();
        }
    });
    token
}

fn open_state(config: AppConfig) -> Result<AppState> {
    AppState::from_config(config).context("서비스 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 명령어 (serve)
async fn cmd_serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = open_state(config)?;
    server::serve(state, shutdown_token())
        .await
        .context("HTTP 서버 실행 실패")
}

/// 문서 수집 명령어 (ingest)
///
/// 파일/폴더를 읽어 업로드와 같은 파이프라인으로 색인합니다.
async fn cmd_ingest(
    config: AppConfig,
    rag: &str,
    file: Vec<PathBuf>,
    dir: Option<PathBuf>,
    skip_pdfs: bool,
) -> Result<()> {
    if file.is_empty() && dir.is_none() {
        bail!("--file 또는 --dir 중 하나 이상을 지정해야 합니다");
    }

    let collector = FileCollector::new(CollectorConfig {
        skip_pdfs,
        max_file_size: config.server.max_upload_bytes as u64,
        ..Default::default()
    });

    let mut collected = Vec::new();
    for path in &file {
        match collector.collect_file(path)? {
            Some(f) => collected.push(f),
            None => println!("[!] 지원하지 않는 파일 형식: {:?}", path),
        }
    }
    if let Some(ref dir_path) = dir {
        collected.extend(collector.collect_directory(dir_path)?);
    }

    if collected.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&collected);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!("    텍스트: {}, PDF: {}", stats.text_files, stats.pdf_files);
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let mut uploads = Vec::with_capacity(collected.len());
    for f in &collected {
        uploads.push(f.load().await?);
    }

    let state = open_state(config)?;
    let report = state
        .pipeline
        .ingest_with_cancel(rag, uploads, &shutdown_token())
        .await
        .context("색인 실패")?;

    for (i, outcome) in report.files.iter().enumerate() {
        let status = match &outcome.status {
            FileStatus::Ingested { chunks, .. } => format!("완료 ({} 청크)", chunks),
            FileStatus::Failed { message, .. } => format!("실패: {}", message),
            FileStatus::Skipped => "건너뜀".to_string(),
        };
        println!("[{}/{}] {}... {}", i + 1, report.files.len(), outcome.file_name, status);
    }

    println!();
    println!(
        "[OK] '{}' 완료: 성공 {}, 실패 {}, 청크 {}",
        report.knowledge_base,
        report.ingested_count(),
        report.failed_count(),
        report.total_chunks()
    );

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: AppConfig,
    query: &str,
    model: Option<String>,
    rag: Option<String>,
    top_k: Option<usize>,
    no_stream: bool,
) -> Result<()> {
    let model = model.unwrap_or_else(|| config.chat.default_model.clone());
    let state = open_state(config)?;

    if no_stream {
        let answer = state
            .chat
            .ask(&model, query, rag.as_deref(), top_k)
            .await
            .context("질문 실패")?;

        println!("{}", answer.content);
        print_sources(&answer.sources);
        return Ok(());
    }

    let mut stream = state
        .chat
        .ask_stream(&model, query, rag.as_deref(), top_k)
        .await
        .context("질문 실패")?;

    let cancel = shutdown_token();
    let mut stdout = std::io::stdout();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                stream.cancel();
                println!();
                println!("[!] 중단됨");
                return Ok(());
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                write!(stdout, "{}", chunk.content)?;
                stdout.flush()?;
            }
            Some(Err(e)) => {
                println!();
                return Err(e).context("스트리밍 실패");
            }
            None => break,
        }
    }

    println!();
    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(config: AppConfig) -> Result<()> {
    let state = open_state(config)?;
    let names = state.registry.list().context("지식베이스 목록 조회 실패")?;

    if names.is_empty() {
        println!("[!] 등록된 지식베이스가 없습니다.");
        return Ok(());
    }

    println!("[OK] 지식베이스 ({} 개):\n", names.len());
    for name in names {
        let count = state.store.count(Some(name.as_str())).unwrap_or(0);
        println!("  {:<32} {} 청크", truncate_text(&name, 32), count);
    }

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: AppConfig, query: &str, rag: &str, top_k: usize) -> Result<()> {
    let state = open_state(config)?;

    if !state.registry.contains(rag)? {
        bail!("등록되지 않은 지식베이스입니다: {}", rag);
    }

    println!("[*] 검색 중: \"{}\" ({})", query, rag);

    let results = state
        .chat
        .retrieve(query, rag, top_k)
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] {}#{}",
            i + 1,
            result.score,
            result.source_doc_id,
            result.offset
        );
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: AppConfig, config_path: Option<&Path>) -> Result<()> {
    println!("rag-knowledge v{}", env!("CARGO_PKG_VERSION"));
    println!();

    match config_path {
        Some(p) => println!("[*] 설정 파일: {}", p.display()),
        None => println!("[*] 설정 파일: ./{} (선택)", crate::config::DEFAULT_CONFIG_FILE),
    }
    println!("[*] Ollama: {}", config.ollama.base_url);
    println!(
        "[*] 모델: 임베딩 {}, 채팅 {}",
        config.embedding.model, config.chat.default_model
    );
    println!(
        "[*] 청킹: {} 토큰 / 중첩 {}",
        config.chunking.max_tokens, config.chunking.overlap_tokens
    );

    if let Err(e) = config.validate() {
        println!("[!] 설정 오류: {}", e);
        return Ok(());
    }

    match open_state(config) {
        Ok(state) => match state.store.stats() {
            Ok(stats) => {
                if let Some(ref path) = stats.db_path {
                    println!("[*] 데이터베이스: {}", path.display());
                    if let Ok(meta) = std::fs::metadata(path) {
                        println!("     크기: {}", format_bytes(meta.len() as usize));
                    }
                }
                println!("[OK] 지식베이스: {} 개", stats.knowledge_base_count);
                println!("[OK] 저장된 청크: {} 개", stats.chunk_count);
                match stats.dimension {
                    Some(d) => println!("[OK] 임베딩 차원: {}", d),
                    None => println!("[*] 임베딩 차원: 미정 (저장된 청크 없음)"),
                }
            }
            Err(e) => println!("[!] 통계 조회 실패: {}", e),
        },
        Err(e) => println!("[!] 저장소 열기 실패: {:#}", e),
    }

    Ok(())
}

fn print_sources(sources: &[crate::knowledge::ScoredChunk]) {
    if sources.is_empty() {
        return;
    }

    println!();
    println!("[*] 참고 문서:");
    for source in sources {
        println!(
            "   - {}#{} ({:.4}) {}",
            source.source_doc_id,
            source.offset,
            source.score,
            truncate_text(&source.text, 60)
        );
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest_with_multiple_files() {
        let cli = Cli::parse_from([
            "rag-knowledge",
            "--config",
            "custom.toml",
            "ingest",
            "--rag",
            "docs",
            "--file",
            "a.md",
            "--file",
            "b.pdf",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Commands::Ingest { rag, file, dir, .. } => {
                assert_eq!(rag, "docs");
                assert_eq!(file.len(), 2);
                assert!(dir.is_none());
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["rag-knowledge", "ask", "what is rust?", "-r", "kb", "-k", "3"]);
        match cli.command {
            Commands::Ask {
                query,
                rag,
                top_k,
                no_stream,
                ..
            } => {
                assert_eq!(query, "what is rust?");
                assert_eq!(rag.as_deref(), Some("kb"));
                assert_eq!(top_k, Some(3));
                assert!(!no_stream);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }
}
