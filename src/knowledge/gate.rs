//! Index Gate - 페이지 교체와 검색 간 직렬화
//!
//! 빌더는 한 페이지의 "기존 청크 삭제 → 새 청크 upsert"를 쓰기 가드 안에서 수행하고,
//! 검색기는 읽기 가드를 잡고 질의합니다. 검색이 반쯤 교체된 페이지를 보는 일이 없습니다.
//! 가드는 페이지 단위로만 잡으므로 빌드 중에도 검색은 페이지 사이에서 진행됩니다.

use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// 공유 인덱스 게이트 (clone 시 같은 락 공유)
#[derive(Debug, Clone, Default)]
pub struct IndexGate {
    lock: Arc<RwLock<()>>,
}

impl IndexGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 검색용 읽기 가드
    pub async fn read(&self) -> OwnedRwLockReadGuard<()> {
        self.lock.clone().read_owned().await
    }

    /// 페이지 교체용 쓰기 가드
    pub async fn write(&self) -> OwnedRwLockWriteGuard<()> {
        self.lock.clone().write_owned().await
    }
}
