use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use proxy_stats::metric;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use crate::statsd::ServerCounters;

pin_project_lite::pin_project! {
    /// A stream that fails with [`TimedOut`](std::io::ErrorKind::TimedOut) after a period without
    /// reads or writes.
    pub struct IdleTimeout<T> {
        #[pin]
        inner: T,
        timeout: Duration,
        #[pin]
        sleep: Option<Sleep>,
    }
}

impl<T> IdleTimeout<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            sleep: None,
        }
    }

    fn wrap_poll<F, R>(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        poll_fn: F,
    ) -> Poll<std::io::Result<R>>
    where
        F: FnOnce(Pin<&mut T>, &mut Context<'_>) -> Poll<std::io::Result<R>>,
    {
        let mut this = self.project();
        match poll_fn(this.inner, cx) {
            Poll::Ready(ret) => {
                this.sleep.set(None);
                Poll::Ready(ret)
            }
            Poll::Pending => {
                if this.sleep.is_none() {
                    this.sleep.set(Some(tokio::time::sleep(*this.timeout)));
                }

                let Some(sleep) = this.sleep.as_pin_mut() else {
                    return Poll::Pending;
                };

                match sleep.poll(cx) {
                    Poll::Ready(()) => {
                        proxy_log::trace!("closing idle connection");
                        metric!(counter(ServerCounters::ConnectionIdleTimeout) += 1);
                        Poll::Ready(Err(std::io::ErrorKind::TimedOut.into()))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

impl<T> AsyncRead for IdleTimeout<T>
where
    T: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.wrap_poll(cx, |stream, cx| stream.poll_read(cx, buf))
    }
}

impl<T> AsyncWrite for IdleTimeout<T>
where
    T: AsyncWrite,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.wrap_poll(cx, |stream, cx| stream.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.wrap_poll(cx, |stream, cx| stream.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.wrap_poll(cx, |stream, cx| stream.poll_shutdown(cx))
    }
}
