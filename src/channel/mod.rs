//! Buffering and batched transmission of envelopes.
//!
//! A [`Channel`] is a handle to a worker task that exclusively owns the buffer. Handles talk to
//! the worker over a bounded queue, so draining the buffer never interleaves with other puts.
//! Drained batches go to a second task that owns the [`Transport`] and sends them one by one, so
//! the worker keeps accepting envelopes while a batch is in flight.

mod transport;

pub use transport::{HttpTransport, InMemoryTransport, Transport, DEFAULT_ENDPOINT};

use crate::{models::Envelope, Error};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, Interval},
};
use tracing::{debug, warn};

/// Default number of buffered envelopes that triggers a flush.
pub const DEFAULT_MAX_BATCH_LEN: usize = 500;

/// Default number of pending channel commands before callers have to wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Tuning of a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Buffer length at which a put flushes the buffer. Default 500.
    pub max_batch_len: usize,
    /// Capacity of the command queue between handles and the worker. Default 1024.
    pub queue_capacity: usize,
    /// Also flush on a timer. Off by default, in which case only size and explicit flushes send.
    pub flush_interval: Option<Duration>,
    /// Fail a send with [`Error::Timeout`] if the transport takes longer than this.
    pub send_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_batch_len: DEFAULT_MAX_BATCH_LEN,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_interval: None,
            send_timeout: None,
        }
    }
}

impl ChannelConfig {
    /// Set the buffer length that triggers a flush.
    pub fn with_max_batch_len(mut self, max_batch_len: usize) -> Self {
        self.max_batch_len = max_batch_len;
        self
    }

    /// Set the capacity of the command queue.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Flush every `interval` in addition to size-triggered flushes.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Bound the time a single send may take.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }
}

type Reply = oneshot::Sender<Result<(), Error>>;

/// Batches cut by the worker that may wait for the sender before puts have to wait too.
const MAX_PENDING_BATCHES: usize = 8;

#[derive(Debug)]
enum Message {
    Put {
        envelope: Envelope,
        reply: Option<Reply>,
    },
    Flush {
        reply: Option<Reply>,
    },
    Dispose {
        reply: Reply,
    },
}

#[derive(Debug)]
enum Transmission {
    Send {
        batch: Vec<Envelope>,
        reply: Option<Reply>,
    },
    Dispose {
        reply: Option<Reply>,
    },
}

/// Buffers envelopes and sends them in batches.
///
/// Envelopes are sent in the order they were put. Once the buffer holds
/// [`max_batch_len`](ChannelConfig::max_batch_len) envelopes the put that filled it sends them
/// all and returns the result of the transmission. Other puts return as soon as the envelope is
/// buffered, even while a batch is in flight. A failed batch is dropped, there is no retry.
#[derive(Debug)]
pub struct Channel {
    sender: mpsc::Sender<Message>,
}

impl Channel {
    /// Create a channel with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn new(transport: impl Transport) -> Self {
        Channel::with_config(transport, ChannelConfig::default())
    }

    /// Create a channel with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn with_config(transport: impl Transport, config: ChannelConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (transmissions, pending) = mpsc::channel(MAX_PENDING_BATCHES);
        let uplink = Uplink {
            transport: Box::new(transport),
            send_timeout: config.send_timeout,
        };
        let worker = Worker {
            buffer: Vec::new(),
            max_batch_len: config.max_batch_len.max(1),
            transmissions,
        };
        tokio::spawn(uplink.run(pending));
        tokio::spawn(worker.run(receiver, config.flush_interval));
        Channel { sender }
    }

    /// Append an envelope. `None` is ignored.
    ///
    /// Returns the transmission error if this put filled the buffer and sending it failed.
    pub async fn put(&self, envelope: impl Into<Option<Envelope>>) -> Result<(), Error> {
        match envelope.into() {
            Some(envelope) => {
                self.request(|reply| Message::Put {
                    envelope,
                    reply: Some(reply),
                })
                .await
            }
            None => Ok(()),
        }
    }

    /// Send everything buffered right now and wait for batches already in flight.
    pub async fn flush(&self) -> Result<(), Error> {
        self.request(|reply| Message::Flush { reply: Some(reply) })
            .await
    }

    /// Dispose the transport and stop the worker. Buffered envelopes are not flushed, batches
    /// already cut are still sent first.
    ///
    /// Disposing twice is a no-op.
    pub async fn dispose(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Ok(());
        }
        self.request(|reply| Message::Dispose { reply }).await
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue an envelope and a flush without waiting. Used where awaiting is impossible.
    pub(crate) fn try_put_and_flush(&self, envelope: Envelope) -> Result<(), Error> {
        self.sender
            .try_send(Message::Put {
                envelope,
                reply: None,
            })
            .and_then(|()| self.sender.try_send(Message::Flush { reply: None }))
            .map_err(|err| Error::InvalidOperation(format!("cannot queue telemetry: {}", err)))
    }

    async fn request(&self, message: impl FnOnce(Reply) -> Message) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(message(reply))
            .await
            .map_err(|_| disposed())?;
        response.await.map_err(|_| disposed())?
    }
}

fn disposed() -> Error {
    Error::InvalidOperation("the channel is disposed".into())
}

/// Owns the buffer. Never waits for the network itself.
#[derive(Debug)]
struct Worker {
    buffer: Vec<Envelope>,
    max_batch_len: usize,
    transmissions: mpsc::Sender<Transmission>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Message>, flush_interval: Option<Duration>) {
        let mut ticker =
            flush_interval.map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            let message = tokio::select! {
                message = receiver.recv() => message,
                () = tick(&mut ticker) => {
                    if !self.buffer.is_empty() {
                        self.cut(None).await;
                    }
                    continue;
                }
            };

            match message {
                Some(Message::Put { envelope, reply }) => {
                    self.buffer.push(envelope);
                    if self.buffer.len() >= self.max_batch_len {
                        self.cut(reply).await;
                    } else {
                        respond(reply, Ok(()));
                    }
                }
                Some(Message::Flush { reply }) => self.cut(reply).await,
                Some(Message::Dispose { reply }) => {
                    receiver.close();
                    if !self.buffer.is_empty() {
                        debug!(
                            "Disposing channel with {} unsent envelopes",
                            self.buffer.len()
                        );
                    }
                    self.transmit(Transmission::Dispose { reply: Some(reply) })
                        .await;
                    break;
                }
                None => {
                    if !self.buffer.is_empty() {
                        warn!(
                            "Channel dropped without dispose; dropping {} unsent envelopes",
                            self.buffer.len()
                        );
                    }
                    self.transmit(Transmission::Dispose { reply: None }).await;
                    break;
                }
            }
        }
    }

    /// Hand the buffer to the uplink. The reply is answered once the batch is sent, or once
    /// everything before it is sent if the buffer is empty.
    async fn cut(&mut self, reply: Option<Reply>) {
        let batch = std::mem::take(&mut self.buffer);
        self.transmit(Transmission::Send { batch, reply }).await;
    }

    async fn transmit(&self, transmission: Transmission) {
        // The uplink only stops after disposing, so a failed send drops the reply, which
        // callers see as a disposed channel.
        let _ = self.transmissions.send(transmission).await;
    }
}

/// Owns the transport and sends batches one at a time, in the order they were cut.
#[derive(Debug)]
struct Uplink {
    transport: Box<dyn Transport>,
    send_timeout: Option<Duration>,
}

impl Uplink {
    async fn run(mut self, mut pending: mpsc::Receiver<Transmission>) {
        while let Some(transmission) = pending.recv().await {
            match transmission {
                Transmission::Send { batch, reply } => {
                    let result = self.send(batch).await;
                    respond(reply, result);
                }
                Transmission::Dispose { reply } => {
                    let result = self.transport.dispose().await;
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(err) = result {
                                warn!("Disposing transport failed: {}", err);
                            }
                        }
                    }
                    break;
                }
            }
        }
    }

    async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }

        debug!("Sending batch of {} envelopes", batch.len());
        match self.send_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.transport.send(batch))
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => self.transport.send(batch).await,
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn respond(reply: Option<Reply>, result: Result<(), Error>) {
    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => {
            if let Err(err) = result {
                warn!("Sending telemetry failed: {}", err);
            }
        }
    }
}
