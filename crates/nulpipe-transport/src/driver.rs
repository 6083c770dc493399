//! Tokio task that runs a [`PipeTransport`] over async pipe halves.
//!
//! The task owns the transport, a [`WriteBuffer`] sink and both halves.
//! It moves buffered frames into the writer, feeds reader chunks to the
//! transport, reports buffer drain as sink readiness, and executes commands
//! from any number of [`TransportHandle`]s in the order they were issued.

use std::future::Future;
use std::io;

use bytes::{Bytes, BytesMut};
use nulpipe_pipe::WriteBuffer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, debug_span, trace, Instrument};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::event::Events;
use crate::transport::PipeTransport;

enum Command {
    Send {
        message: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a spawned transport.
///
/// The transport closes when [`close`](Self::close) is called or every
/// handle has been dropped.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl TransportHandle {
    /// Send one message.
    ///
    /// The message is ordered against other sends when this method is
    /// called, not when the returned future is polled, so callers may
    /// issue several sends before awaiting any of them. The future resolves
    /// once the frame has been handed to the write buffer, or with
    /// [`TransportError::Closed`] if the transport closed first.
    pub fn send(&self, message: impl Into<Bytes>) -> impl Future<Output = Result<()>> + Send + 'static {
        let (reply, done) = oneshot::channel();
        let queued = self
            .commands
            .send(Command::Send {
                message: message.into(),
                reply,
            })
            .is_ok();

        async move {
            if !queued {
                return Err(TransportError::Closed);
            }
            done.await.unwrap_or(Err(TransportError::Closed))
        }
    }

    /// Close the transport and wait for the task to finish.
    ///
    /// Queued sends fail with [`TransportError::Closed`]; bytes already in
    /// the write buffer get up to
    /// [`close_linger`](TransportConfig::close_linger) to reach the pipe.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Whether the transport task has finished.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Spawn a transport over `writer` and `reader` on the current tokio runtime.
///
/// Must be called from within a runtime.
pub fn spawn<W, R>(writer: W, reader: R, config: TransportConfig) -> (TransportHandle, Events)
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    let (transport, events) = PipeTransport::new(WriteBuffer::new(config.high_water_mark));
    let (commands_tx, commands) = mpsc::unbounded_channel();

    let driver = Driver {
        transport,
        commands,
        writer,
        reader,
        read_buf: BytesMut::with_capacity(config.read_chunk_size),
        config,
        reading: true,
        writing: true,
        needs_flush: false,
    };
    tokio::spawn(driver.run().instrument(debug_span!("pipe_transport")));

    (
        TransportHandle {
            commands: commands_tx,
        },
        events,
    )
}

struct Driver<W, R> {
    transport: PipeTransport<WriteBuffer>,
    commands: mpsc::UnboundedReceiver<Command>,
    writer: W,
    reader: R,
    read_buf: BytesMut,
    config: TransportConfig,
    reading: bool,
    writing: bool,
    needs_flush: bool,
}

enum Pumped {
    Wrote(usize),
    Flushed,
}

async fn pump<W: AsyncWrite + Unpin>(writer: &mut W, pending: &[u8]) -> io::Result<Pumped> {
    if pending.is_empty() {
        writer.flush().await?;
        return Ok(Pumped::Flushed);
    }
    writer.write(pending).await.map(Pumped::Wrote)
}

impl<W, R> Driver<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn run(mut self) {
        debug!(
            high_water_mark = self.config.high_water_mark,
            read_chunk_size = self.config.read_chunk_size,
            "transport task started"
        );

        loop {
            if self.reading {
                self.read_buf.reserve(self.config.read_chunk_size);
            }
            let pending = self
                .transport
                .sink()
                .map_or(&[][..], |sink| sink.chunk());
            let can_write = self.writing && (!pending.is_empty() || self.needs_flush);

            // Commands first: a send issued before source EOF is written
            // before the transport tears down.
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Send { message, reply }) => {
                        self.transport.send(message, move |result| {
                            let _ = reply.send(result);
                        });
                    }
                    Some(Command::Close { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        debug!("all transport handles dropped");
                        self.shutdown().await;
                        return;
                    }
                },
                read = self.reader.read_buf(&mut self.read_buf), if self.reading => match read {
                    Ok(0) => {
                        debug!("source reached end of stream");
                        if let Some(sink) = self.transport.handle_source_closed() {
                            self.linger(sink).await;
                        }
                        return;
                    }
                    Ok(n) => {
                        trace!(bytes = n, "source chunk");
                        let chunk = self.read_buf.split().freeze();
                        self.transport.handle_data(chunk);
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        self.reading = false;
                        self.transport.handle_error(TransportError::Source(err));
                    }
                },
                pumped = pump(&mut self.writer, pending), if can_write => match pumped {
                    Ok(Pumped::Wrote(0)) => self.sink_fault(io::ErrorKind::WriteZero.into()),
                    Ok(Pumped::Wrote(n)) => self.consumed(n),
                    Ok(Pumped::Flushed) => self.needs_flush = false,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => self.sink_fault(err),
                },
            }
        }
    }

    fn consumed(&mut self, n: usize) {
        self.needs_flush = true;
        let Some(sink) = self.transport.sink_mut() else {
            return;
        };
        sink.consume(n);
        trace!(bytes = n, buffered = sink.buffered(), "wrote to sink");
        if sink.take_ready() {
            self.transport.handle_sink_ready();
        }
    }

    fn sink_fault(&mut self, err: io::Error) {
        self.writing = false;
        if let Some(sink) = self.transport.sink_mut() {
            sink.fail(err.kind());
        }
        self.transport.handle_error(TransportError::Sink(err));
    }

    async fn shutdown(&mut self) {
        if let Some(sink) = self.transport.close() {
            self.linger(sink).await;
        }
    }

    /// Give bytes the transport already accepted a bounded chance to reach
    /// the pipe before the writer is dropped.
    async fn linger(&mut self, mut sink: WriteBuffer) {
        if !self.writing || (sink.buffered() == 0 && !self.needs_flush) {
            return;
        }

        let writer = &mut self.writer;
        let flushed = tokio::time::timeout(self.config.close_linger, async {
            while sink.buffered() > 0 {
                let n = writer.write(sink.chunk()).await?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                sink.consume(n);
            }
            writer.flush().await
        })
        .await;

        match flushed {
            Ok(Ok(())) => trace!("write buffer flushed on close"),
            Ok(Err(err)) => debug!(error = %err, dropped = sink.buffered(), "flush on close failed"),
            Err(_) => debug!(dropped = sink.buffered(), "close linger expired"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nulpipe_pipe::pipe;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    use super::*;
    use crate::event::TransportEvent;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(events: &mut Events) -> Option<TransportEvent> {
        timeout(WAIT, events.recv()).await.expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn loopback_over_anonymous_pipe() {
        let (reader, writer) = pipe().unwrap();
        let (handle, mut events) = spawn(
            writer.into_async().unwrap(),
            reader.into_async().unwrap(),
            TransportConfig::default(),
        );

        assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Open)));

        let first = handle.send("hello");
        let second = handle.send("{\"id\":1}");
        first.await.unwrap();
        second.await.unwrap();

        let a = timeout(WAIT, events.next_message()).await.unwrap().unwrap().unwrap();
        let b = timeout(WAIT, events.next_message()).await.unwrap().unwrap().unwrap();
        assert_eq!(a.text(), "hello");
        assert_eq!(b.text(), "{\"id\":1}");

        handle.close().await;
        assert!(next_event(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn peer_eof_emits_close_and_rejects_sends() {
        let (ours, theirs) = duplex(64);
        let (read_half, write_half) = split(ours);
        let (handle, mut events) = spawn(write_half, read_half, TransportConfig::default());

        assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Open)));
        drop(theirs);

        assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Close)));
        assert!(next_event(&mut events).await.is_none());

        let err = handle.send("too late").await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn sends_issued_before_eof_are_written() {
        let (write_ours, mut write_theirs) = duplex(64);
        let (read_ours, read_theirs) = duplex(64);
        drop(read_theirs);

        let (handle, mut events) = spawn(write_ours, read_ours, TransportConfig::default());
        let first = handle.send("last");
        let second = handle.send("words");

        first.await.unwrap();
        second.await.unwrap();

        let mut received = Vec::new();
        timeout(WAIT, write_theirs.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"last\0words\0");

        assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Open)));
        assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Close)));
    }

    #[tokio::test]
    async fn unreceived_messages_are_retained_in_order() {
        const COUNT: usize = 1000;
        let (write_ours, _write_theirs) = duplex(64);
        let (read_ours, mut read_theirs) = duplex(64);
        let (_handle, mut events) = spawn(write_ours, read_ours, TransportConfig::default());

        // The peer can finish writing through a small pipe while nothing
        // receives events.
        timeout(WAIT, async move {
            for n in 0..COUNT {
                read_theirs.write_all(format!("m{n}\0").as_bytes()).await.unwrap();
            }
        })
        .await
        .expect("reading stalled without a receiver");

        for n in 0..COUNT {
            let message = timeout(WAIT, events.next_message())
                .await
                .unwrap()
                .expect("transport closed early")
                .unwrap();
            assert_eq!(message.text(), format!("m{n}"));
        }
        assert!(timeout(WAIT, events.next_message()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backpressure_reports_drain_time() {
        let (ours, mut theirs) = duplex(8);
        let (read_half, write_half) = split(ours);
        let config = TransportConfig {
            high_water_mark: 4,
            ..TransportConfig::default()
        };
        let (handle, mut events) = spawn(write_half, read_half, config);

        let sends = [
            handle.send("aaaa"),
            handle.send("bbbb"),
            handle.send("cccc"),
        ];

        let expected = b"aaaa\0bbbb\0cccc\0";
        let mut received = Vec::new();
        while received.len() < expected.len() {
            let mut buf = [0u8; 16];
            let n = timeout(WAIT, theirs.read(&mut buf)).await.unwrap().unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, expected);

        for send in sends {
            timeout(WAIT, send).await.unwrap().unwrap();
        }

        let mut drained = false;
        while let Some(event) = events.try_recv() {
            drained |= matches!(event, TransportEvent::DrainTime(_));
        }
        assert!(drained, "expected at least one drain episode");
    }

    #[tokio::test]
    async fn close_fails_queued_sends() {
        let (ours, _theirs) = duplex(1);
        let (read_half, write_half) = split(ours);
        let config = TransportConfig {
            high_water_mark: 4,
            close_linger: Duration::from_millis(50),
            ..TransportConfig::default()
        };
        let (handle, _events) = spawn(write_half, read_half, config);

        let accepted = handle.send("aaaa");
        let queued_b = handle.send("bbbb");
        let queued_c = handle.send("cccc");
        timeout(WAIT, handle.close()).await.unwrap();

        accepted.await.unwrap();
        assert!(queued_b.await.unwrap_err().is_closed());
        assert!(queued_c.await.unwrap_err().is_closed());
        assert!(handle.send("late").await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn dropping_every_handle_closes() {
        let (ours, _theirs) = duplex(64);
        let (read_half, write_half) = split(ours);
        let (handle, mut events) = spawn(write_half, read_half, TransportConfig::default());
        let clone = handle.clone();

        assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Open)));
        drop(handle);
        drop(clone);

        assert!(next_event(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn write_fault_is_reported_and_sticks() {
        let (write_ours, write_theirs) = duplex(64);
        drop(write_theirs);
        let (read_ours, _read_theirs) = duplex(64);
        let (handle, mut events) = spawn(write_ours, read_ours, TransportConfig::default());

        assert!(matches!(next_event(&mut events).await, Some(TransportEvent::Open)));
        handle.send("x").await.unwrap();

        match next_event(&mut events).await {
            Some(TransportEvent::Error(TransportError::Sink(err))) => {
                assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let err = handle.send("y").await.unwrap_err();
        assert!(matches!(err, TransportError::Sink(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert!(!handle.is_closed());
    }
}
