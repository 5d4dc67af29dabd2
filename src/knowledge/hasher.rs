//! 콘텐츠 해시 - 페이지 변경 감지용 지문
//!
//! 정규화된 페이지 텍스트(UTF-8 바이트)의 SHA-256 hex 문자열을 계산합니다.
//! 보안 용도가 아니라 "내용이 바뀌었는가"를 판단하는 데만 사용합니다.

use sha2::{Digest, Sha256};

/// 텍스트의 콘텐츠 해시 (SHA-256, 소문자 hex 64자)
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
