use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use nulpipe_transport::{spawn, TransportConfig, TransportError, TransportEvent};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cmd::{block_on, EchoArgs};
use crate::exit::{transport_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};

pub fn run(args: EchoArgs) -> CliResult<i32> {
    block_on(echo(args))?
}

async fn echo(args: EchoArgs) -> CliResult<i32> {
    let config = TransportConfig {
        high_water_mark: args.high_water_mark,
        ..TransportConfig::default()
    };
    let (input, mut input_ended, release_eof) = HeldEof::new(tokio::io::stdin());
    let (handle, mut events) = spawn(tokio::io::stdout(), input, config);
    let mut release_eof = Some(release_eof);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let mut sends = Vec::new();
    let mut was_interrupted = false;
    loop {
        // Events before the end-of-input branch: EOF is only released once
        // every message read before it has been echoed.
        let event = tokio::select! {
            biased;
            _ = &mut interrupted => {
                info!("interrupted");
                was_interrupted = true;
                break;
            }
            event = events.recv() => event,
            _ = &mut input_ended, if release_eof.is_some() => {
                debug!(pending = sends.len(), "input ended; releasing end of stream");
                if let Some(release) = release_eof.take() {
                    let _ = release.send(());
                }
                continue;
            }
        };

        match event {
            Some(TransportEvent::Open) => debug!("echo transport open"),
            Some(TransportEvent::Message(message)) => {
                info!(size = message.len(), "echoing message");
                sends.push(handle.send(message.into_bytes()));

                if args.count.is_some_and(|count| sends.len() >= count) {
                    break;
                }
            }
            Some(TransportEvent::DrainTime(elapsed)) => debug!(?elapsed, "stdout drained"),
            Some(TransportEvent::Error(err)) => {
                handle.close().await;
                return Err(transport_error("echo failed", err));
            }
            Some(TransportEvent::Close) | None => break,
        }
    }

    let echoed = sends.len();
    let failed = if was_interrupted {
        handle.close().await;
        undelivered(sends).await
    } else {
        let failed = undelivered(sends).await;
        handle.close().await;
        failed
    };

    info!(echoed, failed, "echo finished");
    if failed > 0 {
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!("{failed} of {echoed} echoes were not delivered"),
        ));
    }
    Ok(SUCCESS)
}

/// Await every send and count the ones that failed.
async fn undelivered<F>(sends: Vec<F>) -> usize
where
    F: Future<Output = Result<(), TransportError>>,
{
    let mut failed = 0;
    for sent in sends {
        if let Err(err) = sent.await {
            warn!(error = %err, "echo send failed");
            failed += 1;
        }
    }
    failed
}

/// Reader that reports end of input and then holds it back until released.
///
/// The transport tears down as soon as its source ends, so echoes of the
/// last messages must be issued before the driver sees EOF.
struct HeldEof<R> {
    inner: R,
    at_eof: bool,
    ended: Option<oneshot::Sender<()>>,
    release: Option<oneshot::Receiver<()>>,
}

impl<R> HeldEof<R> {
    fn new(inner: R) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (ended_tx, ended_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let reader = Self {
            inner,
            at_eof: false,
            ended: Some(ended_tx),
            release: Some(release_rx),
        };
        (reader, ended_rx, release_tx)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HeldEof<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.at_eof {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
            if buf.filled().len() > before || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            this.at_eof = true;
            if let Some(ended) = this.ended.take() {
                let _ = ended.send(());
            }
        }

        if let Some(release) = this.release.as_mut() {
            // A dropped sender releases too.
            let _ = ready!(Pin::new(release).poll(cx));
            this.release = None;
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn data_passes_through_before_eof_is_held() {
        let (mut reader, mut ended, release) = HeldEof::new(&b"a\0b\0"[..]);

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"a\0b\0");
        assert!(ended.try_recv().is_err(), "not ended before EOF is read");

        let mut eof = Box::pin(reader.read(&mut buf));
        assert!(poll_once(eof.as_mut()).await.is_none());
        assert!(ended.try_recv().is_ok());

        release.send(()).unwrap();
        assert_eq!(eof.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_release_lets_eof_through() {
        let (mut reader, _ended, release) = HeldEof::new(&b""[..]);
        drop(release);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    async fn poll_once<F: Future + Unpin>(mut future: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| Poll::Ready(match Pin::new(&mut future).poll(cx) {
            Poll::Ready(output) => Some(output),
            Poll::Pending => None,
        }))
        .await
    }
}
