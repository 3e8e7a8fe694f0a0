//! 취소 가능한 채팅 스트림
//!
//! `ChatSink`(생산자) → bounded mpsc → `ChatStream`(소비자)
//!
//! 채널이 가득 차면 생산자가 대기하므로 느린 소비자에게 자연스럽게
//! 역압이 걸립니다. `ChatStream`이 drop되면 토큰이 취소됩니다.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::ChatResponseChunk;

// ============================================================================
// ChatStream
// ============================================================================

/// 스트리밍 채팅 응답 (소비자 측)
pub struct ChatStream {
    inner: ReceiverStream<Result<ChatResponseChunk>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ChatStream {
    /// 생산자/소비자 쌍 생성
    pub fn channel(buffer: usize) -> (ChatSink, ChatStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();

        (
            ChatSink {
                tx,
                cancel: cancel.clone(),
            },
            ChatStream {
                inner: ReceiverStream::new(rx),
                cancel,
            },
        )
    }

    /// 생산자 중단 요청
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 외부 취소 연동용 토큰
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatResponseChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// ChatSink
// ============================================================================

/// 스트리밍 채팅 응답 (생산자 측)
#[derive(Debug)]
pub struct ChatSink {
    tx: mpsc::Sender<Result<ChatResponseChunk>>,
    cancel: CancellationToken,
}

impl ChatSink {
    /// 아이템 전송
    ///
    /// # Returns
    /// 소비자가 취소했거나 사라졌으면 false (생산자는 중단해야 함)
    pub async fn send(&self, item: Result<ChatResponseChunk>) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// 취소될 때까지 대기
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

// ============================================================================
// Tests
// ============================================================================
