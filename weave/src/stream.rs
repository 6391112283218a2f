//! A typed, bounded FIFO stream with copy/merge/close semantics.
//!
//! Built on `tokio::sync::mpsc`, the same primitive the rest of this crate
//! (and its teacher's `CompiledStateGraph::stream`) already reaches for.
//! A stream is single-writer; `copy` hands out independent readers of the
//! same producer tail by running a small forwarding task.

use std::any::TypeId;
use tokio::sync::mpsc;

use crate::error::WeaveError;
use crate::value::TypeTag;

const DEFAULT_CAPACITY: usize = 64;

/// Outcome of a `next()` call on the consumer side of a [`Stream`].
#[derive(Debug)]
pub enum Next<T> {
    Value(T),
    End,
    Error(WeaveError),
}

impl<T> Next<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Next::End)
    }
}

/// Outcome of a `send()` call on the producer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Ok,
    Closed,
}

enum Item<T> {
    Value(T),
    Error(WeaveError),
}

/// The producer half of a stream. Cloning shares the same underlying queue.
#[derive(Clone)]
pub struct StreamSender<T> {
    tx: mpsc::Sender<Item<T>>,
}

impl<T: Send + 'static> StreamSender<T> {
    /// Enqueues a value. Non-blocking to the caller while capacity remains;
    /// awaits briefly only once the bounded buffer is full.
    pub async fn send(&self, value: T) -> SendStatus {
        match self.tx.send(Item::Value(value)).await {
            Ok(()) => SendStatus::Ok,
            Err(_) => SendStatus::Closed,
        }
    }

    /// Surfaces an error to the stream's reader(s); terminal once sent.
    pub async fn send_error(&self, err: WeaveError) -> SendStatus {
        match self.tx.send(Item::Error(err)).await {
            Ok(()) => SendStatus::Ok,
            Err(_) => SendStatus::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The consumer half. Not `Clone` — use [`Stream::copy`] for additional
/// independent readers.
pub struct Stream<T> {
    rx: mpsc::Receiver<Item<T>>,
    chunk_type: TypeTag,
}

impl<T: Send + 'static> Stream<T> {
    /// Creates a fresh bounded stream and its sender.
    pub fn channel() -> (StreamSender<T>, Stream<T>)
    where
        T: 'static,
    {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (StreamSender<T>, Stream<T>)
    where
        T: 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            StreamSender { tx },
            Stream {
                rx,
                chunk_type: TypeTag::of::<T>(),
            },
        )
    }

    /// A stream that yields exactly one value then ends. The adaptation
    /// rules in §4.3 build these to feed stream-shaped implementations
    /// from a plain value.
    pub fn once(value: T) -> Stream<T> {
        let (tx, mut stream) = Self::with_capacity(1);
        // A fresh bounded(1) channel always has room for the first send.
        let _ = tx.tx.try_send(Item::Value(value));
        drop(tx);
        stream.chunk_type = TypeTag::of::<T>();
        stream
    }

    pub fn chunk_type(&self) -> &TypeTag {
        &self.chunk_type
    }

    pub fn element_type_id(&self) -> TypeId {
        self.chunk_type.id()
    }

    /// Consumer-side pull. Returns `End` once exhausted; `close` makes this
    /// terminal after draining anything already buffered.
    pub async fn next(&mut self) -> Next<T> {
        match self.rx.recv().await {
            Some(Item::Value(v)) => Next::Value(v),
            Some(Item::Error(e)) => Next::Error(e),
            None => Next::End,
        }
    }

    /// Idempotent. Stops accepting new sends; buffered items already in
    /// the channel are still drained by subsequent `next()` calls.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Drains every remaining item into a `Vec`, stopping at the first
    /// error (which is returned).
    pub async fn drain(mut self) -> Result<Vec<T>, WeaveError> {
        let mut out = Vec::new();
        loop {
            match self.next().await {
                Next::Value(v) => out.push(v),
                Next::End => return Ok(out),
                Next::Error(e) => return Err(e),
            }
        }
    }

    /// Returns `n` independent readers of this stream's remaining tail.
    /// Each value is delivered to every copy exactly once. Closing every
    /// copy stops the forwarding task (and so stops pulling from the
    /// original production); closing a single copy only detaches that
    /// reader, the rest keep receiving.
    pub fn copy(mut self, n: usize) -> Vec<Stream<T>>
    where
        T: Clone + 'static,
    {
        if n == 0 {
            return Vec::new();
        }
        let chunk_type = self.chunk_type.clone();
        let mut senders = Vec::with_capacity(n);
        let mut streams = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = mpsc::channel::<Item<T>>(DEFAULT_CAPACITY);
            senders.push(tx);
            streams.push(Stream {
                rx,
                chunk_type: chunk_type.clone(),
            });
        }
        tokio::spawn(async move {
            loop {
                if senders.is_empty() {
                    break;
                }
                let item = match self.rx.recv().await {
                    Some(item) => item,
                    None => break,
                };
                let mut live = Vec::with_capacity(senders.len());
                for tx in senders.drain(..) {
                    let cloned = match &item {
                        Item::Value(v) => Item::Value(v.clone()),
                        Item::Error(e) => Item::Error(WeaveError::ConcatFailed(e.to_string())),
                    };
                    if tx.send(cloned).await.is_ok() {
                        live.push(tx);
                    }
                }
                senders = live;
            }
        });
        streams
    }

    /// Fair round-robin merge of several streams of the same element type.
    /// Ends once every input has ended; at least one element is drawn from
    /// each non-empty input before re-reading any, so no input starves.
    pub fn merge(streams: Vec<Stream<T>>) -> Stream<T> {
        let chunk_type = streams
            .first()
            .map(|s| s.chunk_type.clone())
            .unwrap_or_else(TypeTag::of::<T>);
        let (tx, out) = Self::with_capacity(DEFAULT_CAPACITY);
        tokio::spawn(async move {
            let mut remaining: Vec<Stream<T>> = streams;
            while !remaining.is_empty() {
                let mut still_live = Vec::with_capacity(remaining.len());
                for mut s in remaining.drain(..) {
                    match s.next().await {
                        Next::Value(v) => {
                            if tx.send(v).await == SendStatus::Closed {
                                return;
                            }
                            still_live.push(s);
                        }
                        Next::Error(e) => {
                            let _ = tx.send_error(e).await;
                        }
                        Next::End => {}
                    }
                }
                remaining = still_live;
            }
        });
        let mut out = out;
        out.chunk_type = chunk_type;
        out
    }

    /// Like [`merge`] but tags each value with the source stream's name,
    /// producing a stream of `(name, value)` pairs.
    pub fn merge_named(streams: Vec<(String, Stream<T>)>) -> Stream<(String, T)> {
        let (tx, out) = Stream::with_capacity(DEFAULT_CAPACITY);
        tokio::spawn(async move {
            let mut remaining = streams;
            while !remaining.is_empty() {
                let mut still_live = Vec::with_capacity(remaining.len());
                for (name, mut s) in remaining.drain(..) {
                    match s.next().await {
                        Next::Value(v) => {
                            if tx.send((name.clone(), v)).await == SendStatus::Closed {
                                return;
                            }
                            still_live.push((name, s));
                        }
                        Next::Error(e) => {
                            let _ = tx.send_error(e).await;
                        }
                        Next::End => {}
                    }
                }
                remaining = still_live;
            }
        });
        out
    }
}
