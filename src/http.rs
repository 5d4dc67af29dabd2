//! HTTP 재시도 헬퍼
//!
//! 원격 임베딩/생성 API 호출에 공통으로 쓰는 지수 백오프 재시도 루프입니다.
//! 전송 실패, 429, 5xx만 재시도하고 나머지 상태 코드는 즉시 실패합니다.

use std::time::Duration;

use anyhow::{Context, Result};

/// 최대 재시도 횟수
pub const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
pub const INITIAL_BACKOFF_MS: u64 = 2000;

/// `attempt`번째 재시도 전 대기 시간
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
}

/// 요청을 보내고 성공 응답 본문을 반환
///
/// `make_request`는 매 시도마다 새 요청을 만듭니다.
/// 재시도 불가능한 에러 응답은 `"{label} API error ({status}): {body}"`로 실패합니다.
pub async fn send_with_retry<F>(label: &str, mut make_request: F) -> Result<String>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=MAX_RETRIES {
        let response = match make_request().send().await {
            Ok(resp) => resp,
            Err(e) => {
                last_error = Some(anyhow::anyhow!("Failed to send {} request: {}", label, e));
                if attempt < MAX_RETRIES {
                    let wait = backoff(attempt);
                    tracing::warn!(
                        "{} request failed, retrying in {:?} (attempt {}/{})",
                        label,
                        wait,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                break;
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if status.is_success() {
            return Ok(body);
        }

        if status.as_u16() == 429 || status.is_server_error() {
            last_error = Some(anyhow::anyhow!("{} API error ({}): {}", label, status, body));
            if attempt < MAX_RETRIES {
                let wait = backoff(attempt);
                tracing::warn!(
                    "{} returned {}, backing off {:?} (attempt {}/{})",
                    label,
                    status,
                    wait,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }
        } else {
            anyhow::bail!("{} API error ({}): {}", label, status, body);
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("{} request failed after {} retries", label, MAX_RETRIES)))
}
