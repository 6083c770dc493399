use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use bytes::Bytes;
use nulpipe_frame::{frame_parts, Deframer};
use nulpipe_pipe::{PipeSink, SinkState};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::event::{Events, TransportEvent};

/// Completion notifier for one send. Invoked exactly once.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

type EventTx = mpsc::UnboundedSender<TransportEvent>;

/// A NUL-framed message transport over an owned sink.
///
/// The transport does no I/O of its own. Its owner feeds it source activity
/// ([`handle_data`](Self::handle_data),
/// [`handle_source_closed`](Self::handle_source_closed),
/// [`handle_error`](Self::handle_error)) and sink readiness
/// ([`handle_sink_ready`](Self::handle_sink_ready)); the transport writes
/// frames into the sink and reports what happened through [`Events`].
/// All methods run on the owner's single thread of execution and return
/// without blocking.
pub struct PipeTransport<S> {
    state: State<S>,
    deframer: Deframer,
    events: Option<EventTx>,
}

enum State<S> {
    Open { sink: S, flow: Flow },
    Closed,
}

enum Flow {
    Flowing,
    /// The sink is saturated; sends wait in `queue` until it reports ready.
    Draining {
        since: Instant,
        queue: VecDeque<Queued>,
    },
}

struct Queued {
    message: Bytes,
    on_complete: Completion,
}

impl<S: PipeSink> PipeTransport<S> {
    /// Take ownership of `sink` and open the transport.
    ///
    /// The returned [`Events`] starts with [`TransportEvent::Open`].
    pub fn new(sink: S) -> (Self, Events) {
        let (tx, events) = Events::channel();
        emit(Some(&tx), TransportEvent::Open);
        debug!("pipe transport open");

        let transport = Self {
            state: State::Open {
                sink,
                flow: Flow::Flowing,
            },
            deframer: Deframer::new(),
            events: Some(tx),
        };
        (transport, events)
    }

    /// Send one message.
    ///
    /// `on_complete` runs as soon as the frame is handed to the sink: right
    /// away unless the sink is saturated, in which case the message is
    /// queued and the notifier runs when the queue drains. On a closed
    /// transport it runs immediately with [`TransportError::Closed`].
    pub fn send<F>(&mut self, message: impl Into<Bytes>, on_complete: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let message = message.into();
        let State::Open { sink, flow } = &mut self.state else {
            trace!(len = message.len(), "send on closed transport");
            notify(Box::new(on_complete), Err(TransportError::Closed));
            return;
        };

        if let Flow::Draining { queue, .. } = flow {
            queue.push_back(Queued {
                message,
                on_complete: Box::new(on_complete),
            });
            trace!(queued = queue.len(), "sink saturated; message queued");
            return;
        }

        let outcome = match hand_off(sink, &message, self.events.as_ref()) {
            Ok(SinkState::Accepting) => Ok(()),
            Ok(SinkState::Saturated) => {
                enter_drain(sink, flow, VecDeque::new());
                Ok(())
            }
            Err(err) => Err(err),
        };
        notify(Box::new(on_complete), outcome);
    }

    /// The sink has room again: flush queued messages in order.
    ///
    /// Ends the current drain episode (reported as
    /// [`TransportEvent::DrainTime`]). If the sink saturates again part way
    /// through, a new episode starts and the rest stay queued. Ignored when
    /// not draining.
    pub fn handle_sink_ready(&mut self) {
        let State::Open { sink, flow } = &mut self.state else {
            return;
        };
        let Flow::Draining { since, mut queue } = std::mem::replace(flow, Flow::Flowing) else {
            trace!("sink ready while not draining");
            return;
        };

        let elapsed = since.elapsed();
        debug!(?elapsed, queued = queue.len(), "sink drained");
        emit(self.events.as_ref(), TransportEvent::DrainTime(elapsed));

        while let Some(Queued {
            message,
            on_complete,
        }) = queue.pop_front()
        {
            match hand_off(sink, &message, self.events.as_ref()) {
                Ok(SinkState::Accepting) => notify(on_complete, Ok(())),
                Ok(SinkState::Saturated) => {
                    notify(on_complete, Ok(()));
                    enter_drain(sink, flow, queue);
                    return;
                }
                Err(err) => notify(on_complete, Err(err)),
            }
        }
    }

    /// Bytes arrived from the source.
    ///
    /// Emits one [`TransportEvent::Message`] per delimiter, in order. Dropped
    /// once the transport is closed.
    pub fn handle_data(&mut self, chunk: impl Into<Bytes>) {
        if self.is_closed() {
            trace!("dropping inbound chunk after close");
            return;
        }
        for message in self.deframer.push(chunk) {
            emit(self.events.as_ref(), TransportEvent::Message(message));
        }
    }

    /// A sink or source fault. Reported, never acted on.
    pub fn handle_error(&mut self, err: TransportError) {
        if self.is_closed() {
            trace!(error = %err, "dropping pipe fault after close");
            return;
        }
        warn!(error = %err, "pipe fault");
        emit(self.events.as_ref(), TransportEvent::Error(err));
    }

    /// The source reached end of stream.
    ///
    /// Tears the transport down like [`close`](Self::close), then emits
    /// [`TransportEvent::Close`] as the final event.
    pub fn handle_source_closed(&mut self) -> Option<S> {
        let sink = self.teardown()?;
        emit(self.events.as_ref(), TransportEvent::Close);
        self.events = None;
        Some(sink)
    }

    /// Close the transport.
    ///
    /// Every queued send fails with [`TransportError::Closed`] in queue
    /// order, buffered inbound bytes are discarded, and the event channel is
    /// detached. Returns the sink so its owner can flush or dispose of it;
    /// `None` if the transport was already closed.
    pub fn close(&mut self) -> Option<S> {
        let sink = self.teardown();
        self.events = None;
        sink
    }

    fn teardown(&mut self) -> Option<S> {
        let State::Open { mut sink, flow } = std::mem::replace(&mut self.state, State::Closed)
        else {
            return None;
        };

        let queue = match flow {
            Flow::Draining { queue, .. } => {
                sink.unwatch_ready();
                queue
            }
            Flow::Flowing => VecDeque::new(),
        };
        self.deframer.clear();

        debug!(failed_sends = queue.len(), "pipe transport closed");
        for Queued { on_complete, .. } in queue {
            notify(on_complete, Err(TransportError::Closed));
        }
        Some(sink)
    }

    /// Whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Whether sends are currently being queued.
    pub fn is_draining(&self) -> bool {
        matches!(
            self.state,
            State::Open {
                flow: Flow::Draining { .. },
                ..
            }
        )
    }

    /// Number of sends waiting for the sink.
    pub fn queued_len(&self) -> usize {
        match &self.state {
            State::Open {
                flow: Flow::Draining { queue, .. },
                ..
            } => queue.len(),
            _ => 0,
        }
    }

    /// Inbound bytes held while waiting for a delimiter.
    pub fn pending_inbound_len(&self) -> usize {
        self.deframer.pending_len()
    }

    /// Borrow the sink while the transport is open.
    pub fn sink(&self) -> Option<&S> {
        match &self.state {
            State::Open { sink, .. } => Some(sink),
            State::Closed => None,
        }
    }

    /// Mutably borrow the sink while the transport is open.
    pub fn sink_mut(&mut self) -> Option<&mut S> {
        match &mut self.state {
            State::Open { sink, .. } => Some(sink),
            State::Closed => None,
        }
    }
}

impl<S> fmt::Debug for PipeTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Open {
                flow: Flow::Flowing,
                ..
            } => "open",
            State::Open {
                flow: Flow::Draining { .. },
                ..
            } => "draining",
            State::Closed => "closed",
        };
        f.debug_struct("PipeTransport")
            .field("state", &state)
            .field("pending_inbound", &self.deframer.pending_len())
            .finish()
    }
}

/// Write one frame into the sink. A rejected write is reported on the event
/// channel and returned to the caller with the same error kind.
fn hand_off<S: PipeSink>(
    sink: &mut S,
    message: &[u8],
    events: Option<&EventTx>,
) -> Result<SinkState> {
    match sink.write_batch(&frame_parts(message)) {
        Ok(state) => Ok(state),
        Err(err) => {
            warn!(error = %err, len = message.len(), "sink rejected frame");
            let returned = io::Error::new(err.kind(), err.to_string());
            emit(events, TransportEvent::Error(TransportError::Sink(err)));
            Err(TransportError::Sink(returned))
        }
    }
}

fn enter_drain<S: PipeSink>(sink: &mut S, flow: &mut Flow, queue: VecDeque<Queued>) {
    sink.watch_ready();
    debug!(queued = queue.len(), "sink saturated; draining");
    *flow = Flow::Draining {
        since: Instant::now(),
        queue,
    };
}

fn emit(events: Option<&EventTx>, event: TransportEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

fn notify(on_complete: Completion, result: Result<()>) {
    if catch_unwind(AssertUnwindSafe(move || on_complete(result))).is_err() {
        warn!("send completion notifier panicked");
    }
}
