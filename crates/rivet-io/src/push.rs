//! Push-fed byte input
//!
//! A producer thread pushes whole buffers into a [`PushSender`]; the
//! consumer reads them through [`PushByteInput`], blocking until data, end
//! of input or an error arrives. One producer and one consumer only. The
//! queue and the terminal flags share a single lock.
//!
//! Each pushed buffer may carry a callback that fires exactly once, when
//! the consumer has read its last byte.

use crate::byte_io::ByteInput;
use crate::error::StreamError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// Callback fired when a pushed buffer has been fully consumed
pub type ConsumedCallback = Box<dyn FnOnce() + Send>;

struct Chunk {
    data: Vec<u8>,
    offset: usize,
    on_consumed: Option<ConsumedCallback>,
}

impl Chunk {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

enum Terminal {
    Open,
    Eof,
    Failed { kind: io::ErrorKind, message: String },
}

struct PushState {
    queue: VecDeque<Chunk>,
    terminal: Terminal,
    /// Set when the consumer closes; pushes after that are refused
    consumer_closed: bool,
}

struct Shared {
    state: Mutex<PushState>,
    readable: Condvar,
}

/// Producer half of a push-fed input
pub struct PushSender {
    shared: Arc<Shared>,
}

/// Consumer half of a push-fed input
pub struct PushByteInput {
    shared: Arc<Shared>,
}

/// Create a connected producer/consumer pair
pub fn push_channel() -> (PushSender, PushByteInput) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PushState {
            queue: VecDeque::new(),
            terminal: Terminal::Open,
            consumer_closed: false,
        }),
        readable: Condvar::new(),
    });
    (
        PushSender {
            shared: shared.clone(),
        },
        PushByteInput { shared },
    )
}

impl PushSender {
    /// Queue a buffer for the consumer
    ///
    /// Fails with `Closed` once end of input or an error was signalled, or the
    /// consumer has gone away.
    pub fn push(&self, data: Vec<u8>, on_consumed: Option<ConsumedCallback>) -> Result<(), StreamError> {
        let mut state = self.shared.state.lock();
        if !matches!(state.terminal, Terminal::Open) || state.consumer_closed {
            return Err(StreamError::Closed);
        }
        if data.is_empty() {
            drop(state);
            if let Some(callback) = on_consumed {
                callback();
            }
            return Ok(());
        }
        state.queue.push_back(Chunk {
            data,
            offset: 0,
            on_consumed,
        });
        self.shared.readable.notify_one();
        Ok(())
    }

    /// Signal that no more data will arrive
    pub fn push_eof(&self) {
        let mut state = self.shared.state.lock();
        if matches!(state.terminal, Terminal::Open) {
            state.terminal = Terminal::Eof;
        }
        self.shared.readable.notify_all();
    }

    /// Signal a transport failure; the consumer sees it after draining queued data
    pub fn push_error(&self, error: io::Error) {
        let mut state = self.shared.state.lock();
        if matches!(state.terminal, Terminal::Open) {
            state.terminal = Terminal::Failed {
                kind: error.kind(),
                message: error.to_string(),
            };
        }
        self.shared.readable.notify_all();
    }
}

impl Drop for PushSender {
    fn drop(&mut self) {
        self.push_eof();
    }
}

impl PushByteInput {
    /// Whether the producer has signalled end of input or an error
    pub fn is_terminated(&self) -> bool {
        !matches!(self.shared.state.lock().terminal, Terminal::Open)
    }
}

impl ByteInput for PushByteInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.state.lock();
        loop {
            if state.consumer_closed {
                return Err(StreamError::Closed);
            }
            if let Some(chunk) = state.queue.front_mut() {
                let n = buf.len().min(chunk.remaining());
                buf[..n].copy_from_slice(&chunk.data[chunk.offset..chunk.offset + n]);
                chunk.offset += n;
                let callback = if chunk.remaining() == 0 {
                    state.queue.pop_front().and_then(|c| c.on_consumed)
                } else {
                    None
                };
                drop(state);
                if let Some(callback) = callback {
                    callback();
                }
                return Ok(n);
            }
            let outcome = match &state.terminal {
                Terminal::Open => None,
                Terminal::Eof => Some(Ok(0)),
                Terminal::Failed { kind, message } => {
                    Some(Err(StreamError::Io(io::Error::new(*kind, message.clone()))))
                }
            };
            match outcome {
                Some(result) => return result,
                None => self.shared.readable.wait(&mut state),
            }
        }
    }

    fn available(&mut self) -> Result<usize, StreamError> {
        let state = self.shared.state.lock();
        Ok(state.queue.iter().map(Chunk::remaining).sum())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let pending: Vec<Chunk> = {
            let mut state = self.shared.state.lock();
            state.consumer_closed = true;
            state.queue.drain(..).collect()
        };
        // discarded buffers still count as consumed for the producer
        for chunk in pending {
            if let Some(callback) = chunk.on_consumed {
                callback();
            }
        }
        log::debug!("push input closed by consumer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_reads_pushed_data_then_eof() {
        let (sender, mut input) = push_channel();
        sender.push(vec![1, 2, 3], None).unwrap();
        sender.push_eof();
        let mut buf = [0u8; 8];
        assert_eq!(input.read(&mut buf).unwrap(), 3);
        assert_eq!(input.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_push_after_eof_is_refused() {
        let (sender, _input) = push_channel();
        sender.push_eof();
        assert!(matches!(sender.push(vec![1], None), Err(StreamError::Closed)));
    }

    #[test]
    fn test_callback_fires_once_per_buffer() {
        let count = Arc::new(AtomicUsize::new(0));
        let (sender, mut input) = push_channel();
        for _ in 0..2 {
            let count = count.clone();
            sender
                .push(vec![0; 4], Some(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })))
                .unwrap();
        }
        let mut buf = [0u8; 3];
        input.read(&mut buf).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        input.read(&mut buf).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        input.read(&mut buf).unwrap();
        input.read(&mut buf).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_consumer_blocks_until_producer_pushes() {
        let (sender, mut input) = push_channel();
        let producer = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            sender.push(b"late".to_vec(), None).unwrap();
        });
        let mut buf = [0u8; 4];
        assert_eq!(input.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"late");
        producer.join().unwrap();
        // sender dropped: implicit end of input
        assert_eq!(input.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_error_surfaces_after_queued_data() {
        let (sender, mut input) = push_channel();
        sender.push(vec![9], None).unwrap();
        sender.push_error(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
        let mut buf = [0u8; 4];
        assert_eq!(input.read(&mut buf).unwrap(), 1);
        assert!(matches!(input.read(&mut buf), Err(StreamError::Io(_))));
        assert!(matches!(input.read(&mut buf), Err(StreamError::Io(_))));
    }
}
