//! 콘텐츠 추출 모듈
//!
//! 업로드된 파일에서 텍스트 콘텐츠를 추출합니다.
//! - 텍스트 파일: UTF-8 디코딩
//! - PDF 파일: pdf-extract로 텍스트 추출 (페이지 단위 분리 후 결합)

pub mod pdf;

use std::path::Path;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::knowledge::UploadedFile;

// ============================================================================
// Document Format
// ============================================================================

/// 지원하는 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// 텍스트 파일 (마크다운, 코드 등)
    Text,
    /// PDF 파일
    Pdf,
}

impl DocumentFormat {
    /// 확장자로 형식 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "md" | "txt" | "rs" | "ts" | "tsx" | "js" | "jsx" | "py" | "json" | "toml" | "yaml"
            | "yml" | "html" | "css" | "scss" | "go" | "java" | "c" | "cpp" | "h" | "hpp"
            | "sh" | "bash" | "zsh" | "sql" | "xml" | "csv" | "log" | "rst" | "adoc" => {
                Some(DocumentFormat::Text)
            }

            "pdf" => Some(DocumentFormat::Pdf),

            _ => None,
        }
    }

    /// 파일 경로에서 형식 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// MIME 타입으로 형식 결정
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        match mime.as_str() {
            "application/pdf" => Some(DocumentFormat::Pdf),
            m if m.starts_with("text/") => Some(DocumentFormat::Text),
            "application/json" | "application/xml" | "application/x-yaml" => {
                Some(DocumentFormat::Text)
            }
            _ => None,
        }
    }

    /// 업로드 파일의 형식 추정 (확장자 → MIME → PDF 시그니처 순)
    pub fn detect(file: &UploadedFile) -> Option<Self> {
        DocumentFormat::from_path(Path::new(&file.name))
            .or_else(|| {
                file.content_type
                    .as_deref()
                    .and_then(DocumentFormat::from_content_type)
            })
            .or_else(|| file.content.starts_with(b"%PDF-").then_some(DocumentFormat::Pdf))
    }
}

// ============================================================================
// TextExtractor Trait
// ============================================================================

/// 텍스트 추출기 트레이트
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// 파일에서 평문 텍스트 추출
    async fn extract(&self, file: &UploadedFile) -> Result<String>;
}

// ============================================================================
// Content Extractor
// ============================================================================

/// 기본 콘텐츠 추출기 (텍스트 + PDF)
#[derive(Debug, Default, Clone)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 텍스트 파일 디코딩
    fn extract_text(&self, file: &UploadedFile) -> Result<String> {
        let bytes = file
            .content
            .strip_prefix(b"\xEF\xBB\xBF".as_slice())
            .unwrap_or(&file.content);

        if bytes.contains(&0) {
            return Err(RagError::ExtractionFailed(format!(
                "{}: binary content is not supported",
                file.name
            )));
        }

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            RagError::ExtractionFailed(format!("{}: not valid UTF-8 text: {}", file.name, e))
        })
    }

    /// PDF 파일에서 추출
    async fn extract_pdf(&self, file: &UploadedFile) -> Result<String> {
        // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
        let name = file.name.clone();
        let bytes = file.content.clone();
        let pages = tokio::task::spawn_blocking(move || pdf::extract_pages(&name, &bytes))
            .await
            .map_err(|e| {
                RagError::ExtractionFailed(format!("{}: PDF extraction task failed: {}", file.name, e))
            })??;

        tracing::debug!("Extracted {} PDF pages from {}", pages.len(), file.name);
        Ok(pages.join("\n\n"))
    }
}

#[async_trait]
impl TextExtractor for ContentExtractor {
    async fn extract(&self, file: &UploadedFile) -> Result<String> {
        match DocumentFormat::detect(file) {
            Some(DocumentFormat::Pdf) => self.extract_pdf(file).await,
            // 알 수 없는 형식은 텍스트로 시도 (바이너리면 실패)
            Some(DocumentFormat::Text) | None => self.extract_text(file),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
