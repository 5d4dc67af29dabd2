//! Text Chunking Module
//!
//! 정규화된 페이지 텍스트를 고정 크기 토큰 윈도우로 분할합니다.
//! 생성 모델과 같은 서브워드 토크나이저(`cl100k_base`)를 사용하므로
//! 청크 크기가 모델의 토큰 계산과 일치합니다.

use std::ops::Range;
use std::sync::Arc;

use anyhow::{Context, Result};
use tiktoken_rs::CoreBPE;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단위: 토큰)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 윈도우 크기
    pub chunk_size: usize,
    /// 인접 윈도우 간 겹치는 토큰 수 (`chunk_size` 미만)
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 50,
        }
    }
}

impl ChunkConfig {
    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.overlap >= self.chunk_size {
            anyhow::bail!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap,
                self.chunk_size
            );
        }
        Ok(())
    }

    /// 윈도우 시작점 간 간격
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할 (공백뿐인 입력이면 빈 벡터)
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TokenChunker
// ============================================================================

/// 토큰 슬라이딩 윈도우 청커
///
/// `chunk_size` 토큰 윈도우를 `chunk_size - overlap` 토큰씩 이동시키며
/// 각 윈도우를 다시 텍스트로 디코딩합니다.
pub struct TokenChunker {
    config: ChunkConfig,
    bpe: Arc<CoreBPE>,
}

impl TokenChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        let bpe = tiktoken_rs::cl100k_base().context("Failed to load cl100k_base tokenizer")?;
        Ok(Self {
            config,
            bpe: Arc::new(bpe),
        })
    }

    /// 기본 설정(512 / 50)으로 생성
    pub fn with_defaults() -> Result<Self> {
        Self::new(ChunkConfig::default())
    }

    /// 텍스트의 토큰 수
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let tokens = self.bpe.encode_ordinary(text);
        let decode = |slice: &[_]| self.bpe.decode(slice.to_vec()).ok();

        token_windows(tokens.len(), &self.config)
            .into_iter()
            .filter_map(|range| {
                let window = &tokens[range];
                if let Some(text) = decode(window) {
                    return Some(text);
                }
                // 멀티바이트 문자가 윈도우 경계에서 잘린 경우:
                // 양 끝에서 최대 3 토큰까지 줄여가며 디코딩 가능한 구간을 찾는다
                for trim in 1..=6usize {
                    for head in 0..=trim.min(3) {
                        let tail = trim - head;
                        if tail > 3 || head + tail >= window.len() {
                            continue;
                        }
                        if let Some(text) = decode(&window[head..window.len() - tail]) {
                            return Some(text);
                        }
                    }
                }
                tracing::warn!("Dropping undecodable token window ({} tokens)", window.len());
                None
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "TokenChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 토큰 시퀀스 길이에 대한 윈도우 범위 목록
///
/// 마지막 윈도우가 시퀀스 끝에 닿으면 멈춥니다. 마지막을 제외한 모든
/// 인접 윈도우는 정확히 `overlap` 토큰만큼 겹칩니다.
pub fn token_windows(len: usize, config: &ChunkConfig) -> Vec<Range<usize>> {
    if len == 0 || config.chunk_size == 0 {
        return vec![];
    }

    let stride = config.stride().max(1);
    let mut windows = Vec::with_capacity(len / stride + 1);
    let mut start = 0;

    loop {
        let end = (start + config.chunk_size).min(len);
        windows.push(start..end);
        if end >= len {
            break;
        }
        start += stride;
    }

    windows
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 토큰 청커 생성 (설정 지정)
pub fn token_chunker(config: ChunkConfig) -> Result<Box<dyn Chunker>> {
    Ok(Box::new(TokenChunker::new(config)?))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_chunker_empty() {
        let chunker = TokenChunker::with_defaults().unwrap();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t  ").is_empty());
    }

    #[test]
    fn test_chunker_small_text_single_chunk() {
        let chunker = TokenChunker::with_defaults().unwrap();
        let chunks = chunker.chunk("Short paragraph about cloud services.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Short paragraph about cloud services.");
    }

    #[test]
    fn test_windows_overlap_exactly() {
        let config = ChunkConfig::default();
        let windows = token_windows(2000, &config);

        assert!(windows.len() > 1);
        assert_eq!(windows[0], 0..512);
        for pair in windows.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert_eq!(prev.len(), 512);
            assert_eq!(prev.end - next.start, 50);
        }
        assert_eq!(windows.last().map(|w| w.end), Some(2000));
    }

    #[test]
    fn test_windows_short_sequence() {
        let config = ChunkConfig::default();
        assert_eq!(token_windows(0, &config), Vec::<Range<usize>>::new());
        assert_eq!(token_windows(10, &config), vec![0..10]);
        assert_eq!(token_windows(512, &config), vec![0..512]);
        assert_eq!(token_windows(513, &config), vec![0..512, 462..513]);
    }

    #[test]
    fn test_no_window_inside_previous_overlap() {
        // 두 번째 윈도우가 끝에 닿으면 924..974 같은 중복 꼬리 윈도우는 만들지 않음
        let config = ChunkConfig::default();
        assert_eq!(token_windows(974, &config), vec![0..512, 462..974]);
        assert_eq!(token_windows(975, &config), vec![0..512, 462..974, 924..975]);
    }

    #[test]
    fn test_chunker_token_overlap_on_long_text() {
        let config = ChunkConfig {
            chunk_size: 64,
            overlap: 8,
        };
        let chunker = TokenChunker::new(config).unwrap();
        let text = long_text(400);
        let total = chunker.count_tokens(&text);
        let chunks = chunker.chunk(&text);

        assert_eq!(chunks.len(), token_windows(total, &config).len());
        assert!(chunks[0].starts_with("word0 word1"));
        assert!(chunks.last().map(|c| c.ends_with("word399")).unwrap_or(false));
    }

    #[test]
    fn test_chunker_handles_multibyte_text() {
        let config = ChunkConfig {
            chunk_size: 16,
            overlap: 4,
        };
        let chunker = TokenChunker::new(config).unwrap();
        let text = "메가존클라우드는 클라우드 관리 서비스를 제공합니다. ".repeat(20);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkConfig::default().validate().is_ok());
        let bad = ChunkConfig {
            chunk_size: 50,
            overlap: 50,
        };
        assert!(bad.validate().is_err());
        assert!(TokenChunker::new(bad).is_err());
        assert_eq!(ChunkConfig::default().stride(), 462);
    }
}
