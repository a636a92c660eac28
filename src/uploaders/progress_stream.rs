use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

/// 收到累计已发送字节数的回调
pub type PartProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

pin_project! {
    /// 包装请求体，每发出一块就上报一次累计字节数
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        bytes_sent: u64,
        on_progress: PartProgressFn,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, on_progress: PartProgressFn) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            on_progress,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    (this.on_progress)(*this.bytes_sent);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
