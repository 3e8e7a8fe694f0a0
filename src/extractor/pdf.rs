//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 메모리 상의 PDF에서 텍스트를 추출합니다.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{RagError, Result};

/// PDF에서 페이지별 텍스트 추출
///
/// 스캔 문서처럼 텍스트가 없으면 빈 벡터를 반환합니다.
pub fn extract_pages(name: &str, bytes: &[u8]) -> Result<Vec<String>> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
        RagError::ExtractionFailed(format!("{}: failed to extract text from PDF: {}", name, e))
    })?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {}. It might be a scanned document.",
            name
        );
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text))
}

/// 페이지 구분자 패턴 (예: "--- Page 1 ---")
fn page_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
            .expect("Invalid regex")
    })
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    let pattern = page_pattern();
    if pattern.is_match(text) {
        let pages: Vec<String> = pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    // 분리 실패 - 전체를 하나의 페이지로
    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================
