use std::{
    io::Write,
    sync::{Condvar, Mutex},
    thread,
    time::Duration,
};

use log::warn;

use crate::{codec::MessageWriter, message::StructuredMessage, transport::error::TransportError};

/// Serializes concurrent senders into a single flush stream.
///
/// `write` is safe to call from many threads: the first caller to arrive
/// becomes the flusher and drains its own message plus anything queued by
/// later-arriving callers, so no two threads ever touch the underlying
/// stream simultaneously and messages hit the wire in `write` call order.
///
/// With a nonzero flush delay the flusher sleeps briefly after taking the
/// first message, letting closely-spaced concurrent sends coalesce into one
/// underlying write.
///
/// A flush failure marks the writer broken: the flusher gets the real
/// error, every waiting and subsequent caller gets
/// [`TransportError::WriterBroken`].
pub struct BatchingWriter<W: Write + Send> {
    state: Mutex<WriterState<W>>,
    flushed: Condvar,
    flush_delay: Duration,
}

struct WriterState<W: Write> {
    writer: Option<MessageWriter<W>>,
    queue: Vec<(u64, StructuredMessage)>,
    next_seq: u64,
    completed: u64,
    flushing: bool,
    broken: bool,
}

impl<W: Write + Send> BatchingWriter<W> {
    pub fn new(writer: MessageWriter<W>, flush_delay: Duration) -> Self {
        Self {
            state: Mutex::new(WriterState {
                writer: Some(writer),
                queue: Vec::new(),
                next_seq: 1,
                completed: 0,
                flushing: false,
                broken: false,
            }),
            flushed: Condvar::new(),
            flush_delay,
        }
    }

    /// Queue `message` and return once it has been flushed to the stream.
    pub fn write(&self, message: StructuredMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(TransportError::WriterBroken);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push((seq, message));

        if state.flushing {
            loop {
                state = self.flushed.wait(state).unwrap();
                if state.completed >= seq {
                    return Ok(());
                }
                if state.broken {
                    return Err(TransportError::WriterBroken);
                }
            }
        }

        state.flushing = true;
        drop(state);

        if !self.flush_delay.is_zero() {
            thread::sleep(self.flush_delay);
        }
        self.drain()
    }

    /// Flush queued batches until the queue is empty. Runs on the thread
    /// that won the flusher role; callers queued behind it wake when their
    /// sequence number completes.
    fn drain(&self) -> Result<(), TransportError> {
        loop {
            let mut state = self.state.lock().unwrap();
            if state.queue.is_empty() {
                state.flushing = false;
                self.flushed.notify_all();
                return Ok(());
            }

            let batch: Vec<(u64, StructuredMessage)> = state.queue.drain(..).collect();
            let Some(mut writer) = state.writer.take() else {
                state.broken = true;
                state.flushing = false;
                self.flushed.notify_all();
                return Err(TransportError::WriterBroken);
            };
            drop(state);

            let last_seq = batch.last().map(|(seq, _)| *seq).unwrap_or(0);
            let messages: Vec<StructuredMessage> =
                batch.into_iter().map(|(_, message)| message).collect();

            let result = writer.write_batch(&messages);

            let mut state = self.state.lock().unwrap();
            state.writer = Some(writer);
            match result {
                Ok(()) => {
                    state.completed = last_seq;
                    self.flushed.notify_all();
                }
                Err(e) => {
                    warn!("flush failed, marking writer broken: {e}");
                    state.broken = true;
                    state.flushing = false;
                    self.flushed.notify_all();
                    return Err(e.into());
                }
            }
        }
    }
}
