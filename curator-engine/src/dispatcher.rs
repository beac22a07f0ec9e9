//! Score Dispatcher: many concurrent callers, one sequential scoring worker
//!
//! **Architecture:**
//! - One persistent framed connection to the worker
//! - Writes: exactly one writer task, which owns the write half and takes
//!   encoded frames from an mpsc queue; a caller dropped mid-submit can never
//!   leave a partial frame on the connection
//! - Reads: exactly one Reply Router task, which owns the read half
//! - Each in-flight request has a pending slot (a `oneshot` sender) keyed by
//!   its [`CorrelationKey`]; the router removes the slot and completes it
//!
//! When the connection closes, a reply cannot be decoded or a write fails, the
//! dispatcher is marked closed and every pending slot fails with
//! `Error::ConnectionLost`, so no caller stays blocked on a dead worker.

use curator_common::framing::{FrameReader, FrameWriter};
use curator_common::wire::{CorrelationKey, ReplyBody, ScoreReply, ScoreRequest};
use curator_common::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome delivered to a waiting caller
type Delivery = Result<f32>;

struct PendingSlot {
    /// Registration generation; guards release by a stale handle
    generation: u64,
    sender: oneshot::Sender<Delivery>,
}

#[derive(Default)]
struct PendingTable {
    slots: HashMap<CorrelationKey, PendingSlot>,
    next_generation: u64,
    /// Set once by the router when the connection is gone
    closed: bool,
}

/// Work for the writer task
enum WriteCommand {
    Frame {
        payload: Vec<u8>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<Result<()>>,
    },
}

/// State shared by the dispatcher, its handles and the Reply Router
#[derive(Default)]
struct Shared {
    pending: Mutex<PendingTable>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, key: &CorrelationKey) -> Result<(u64, oneshot::Receiver<Delivery>)> {
        let mut table = self.lock();
        if table.closed {
            return Err(Error::ConnectionLost);
        }
        if table.slots.contains_key(key) {
            return Err(Error::DuplicateCaller(key.to_string()));
        }

        let generation = table.next_generation;
        table.next_generation += 1;

        let (sender, receiver) = oneshot::channel();
        table
            .slots
            .insert(key.clone(), PendingSlot { generation, sender });
        Ok((generation, receiver))
    }

    /// Remove the slot only if it still belongs to `generation`
    fn release(&self, key: &CorrelationKey, generation: u64) {
        let mut table = self.lock();
        if table
            .slots
            .get(key)
            .is_some_and(|slot| slot.generation == generation)
        {
            table.slots.remove(key);
            debug!(caller = %key, "Released pending slot");
        }
    }

    /// Hand a reply to its waiting caller; returns false if nobody is waiting
    fn deliver(&self, reply: ScoreReply) -> bool {
        let slot = self.lock().slots.remove(&reply.key);
        let Some(slot) = slot else {
            return false;
        };

        let outcome = match reply.body {
            ReplyBody::Score(score) => Ok(score),
            ReplyBody::Error(message) => Err(Error::ClassifierUnavailable(message)),
        };
        // Receiver may have been dropped between the lookup and now
        let _ = slot.sender.send(outcome);
        true
    }

    /// Close for new registrations and fail everyone still waiting
    fn fail_all(&self) -> usize {
        let drained: Vec<PendingSlot> = {
            let mut table = self.lock();
            table.closed = true;
            table.slots.drain().map(|(_, slot)| slot).collect()
        };

        let count = drained.len();
        for slot in drained {
            let _ = slot.sender.send(Err(Error::ConnectionLost));
        }
        count
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn pending_count(&self) -> usize {
        self.lock().slots.len()
    }
}

/// A registered caller waiting for its reply
///
/// Dropping the handle abandons the request: the slot is released and a late
/// reply for its key is discarded by the router.
pub struct ReplyHandle {
    key: CorrelationKey,
    generation: u64,
    receiver: oneshot::Receiver<Delivery>,
    shared: Arc<Shared>,
}

impl ReplyHandle {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        self.shared.release(&self.key, self.generation);
    }
}

/// Multiplexes scoring requests from concurrent callers over one worker connection
pub struct ScoreDispatcher {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<WriteCommand>,
    /// Default wait used by [`ScoreDispatcher::score_with_default_timeout`]
    reply_timeout: Option<Duration>,
    router: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ScoreDispatcher {
    /// Build a dispatcher over an already-connected stream and start its router
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, max_message_size: u64) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let reader = FrameReader::with_max_message_size(reader, max_message_size);
        let router = tokio::spawn(route_replies(reader, Arc::clone(&shared)));

        let (outgoing, commands) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_frames(
            FrameWriter::new(writer),
            commands,
            Arc::clone(&shared),
        ));

        Self {
            shared,
            outgoing,
            reply_timeout: None,
            router,
            writer,
        }
    }

    /// Connect to a scoring worker over TCP
    pub async fn connect(addr: &str, max_message_size: u64) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(addr, "Connected to scoring worker");

        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, max_message_size))
    }

    /// Connect using the `[worker]` and `[dispatcher]` config sections
    pub async fn from_config(config: &curator_common::config::TomlConfig) -> Result<Self> {
        let dispatcher =
            Self::connect(&config.worker.bind_addr, config.worker.max_message_size).await?;
        Ok(dispatcher.with_reply_timeout(config.dispatcher.reply_timeout()))
    }

    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout
    }

    /// True once the worker connection is gone
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of callers currently waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    /// Create the pending slot for `key`
    ///
    /// # Errors
    /// - `Error::DuplicateCaller` if `key` already has a pending slot
    /// - `Error::ConnectionLost` if the worker connection is gone
    pub fn register_caller(&self, key: CorrelationKey) -> Result<ReplyHandle> {
        let (generation, receiver) = self.shared.register(&key)?;
        debug!(caller = %key, generation, "Registered caller");

        Ok(ReplyHandle {
            key,
            generation,
            receiver,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Send the request for a registered caller as one frame
    ///
    /// The request is re-tagged with the handle's key so the reply routes back
    /// to this handle. Returns once the frame is on the wire. If this future is
    /// dropped after queueing, the frame is still written whole.
    pub async fn submit(&self, handle: &ReplyHandle, mut request: ScoreRequest) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::ConnectionLost);
        }

        request.key = handle.key.clone();
        let payload = request.encode()?;
        let bytes = payload.len();

        let (respond_to, written) = oneshot::channel();
        self.outgoing
            .send(WriteCommand::Frame { payload, respond_to })
            .map_err(|_| Error::ConnectionLost)?;

        // Sender dropped without an answer: writer task already gone
        if let Err(e) = written.await.unwrap_or(Err(Error::ConnectionLost)) {
            warn!(caller = %handle.key, error = %e, "Failed to send score request");
            return Err(Error::ConnectionLost);
        }

        debug!(
            caller = %handle.key,
            bytes,
            has_image = request.has_image,
            "Submitted score request"
        );
        Ok(())
    }

    /// Wait for the reply correlated with `handle`
    ///
    /// # Errors
    /// - `Error::ClassifierUnavailable` if the worker replied with an error
    /// - `Error::ConnectionLost` if the connection dropped while waiting
    /// - `Error::Timeout` if `timeout` elapsed first (the slot is released)
    pub async fn await_reply(&self, mut handle: ReplyHandle, timeout: Option<Duration>) -> Result<f32> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle.receiver).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(caller = %handle.key, ?limit, "Reply wait timed out");
                    return Err(Error::Timeout(handle.key.to_string()));
                }
            },
            None => (&mut handle.receiver).await,
        };

        // A dropped sender without a delivery only happens when the router is gone
        received.unwrap_or(Err(Error::ConnectionLost))
    }

    /// Register, submit and wait in one call
    pub async fn score(&self, request: ScoreRequest, timeout: Option<Duration>) -> Result<f32> {
        let handle = self.register_caller(request.key.clone())?;
        self.submit(&handle, request).await?;
        self.await_reply(handle, timeout).await
    }

    /// [`ScoreDispatcher::score`] using the configured reply timeout
    pub async fn score_with_default_timeout(&self, request: ScoreRequest) -> Result<f32> {
        self.score(request, self.reply_timeout).await
    }

    /// Close the write direction so the worker sees end-of-stream
    ///
    /// Frames queued before the call are written first. Later submits fail
    /// with `Error::ConnectionLost`.
    pub async fn shutdown(&self) -> Result<()> {
        let (respond_to, done) = oneshot::channel();
        if self
            .outgoing
            .send(WriteCommand::Shutdown { respond_to })
            .is_err()
        {
            return Ok(());
        }
        done.await.unwrap_or(Ok(()))
    }
}

impl Drop for ScoreDispatcher {
    fn drop(&mut self) {
        self.router.abort();
        self.writer.abort();
        self.shared.fail_all();
    }
}

/// Writer task: sole writer of the worker connection
///
/// A failed write leaves the stream at an unknown frame boundary, so it closes
/// the dispatcher.
async fn write_frames<W>(
    writer: FrameWriter<W>,
    mut commands: mpsc::UnboundedReceiver<WriteCommand>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin + Send,
{
    debug!("Frame writer started");

    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Frame {
                payload,
                respond_to,
            } => match writer.write_message(&payload).await {
                Ok(()) => {
                    let _ = respond_to.send(Ok(()));
                }
                Err(e) => {
                    error!(error = %e, "Write to scoring worker failed");
                    let failed = shared.fail_all();
                    if failed > 0 {
                        warn!(failed, "Failed pending callers after write failure");
                    }
                    let _ = respond_to.send(Err(Error::ConnectionLost));
                    break;
                }
            },
            WriteCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(writer.shutdown().await);
                break;
            }
        }
    }

    debug!("Frame writer stopped");
}

/// Reply Router: sole reader of the worker connection
async fn route_replies<R>(mut reader: FrameReader<R>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin + Send,
{
    info!("Reply router started");

    let reason = loop {
        let payload = match reader.read_message().await {
            Ok(payload) => payload,
            Err(e) => break e,
        };

        let reply = match ScoreReply::decode(&payload) {
            Ok(reply) => reply,
            Err(e) => break e,
        };

        let key = reply.key.clone();
        if shared.deliver(reply) {
            debug!(caller = %key, "Delivered reply");
        } else {
            warn!(caller = %key, "Dropping reply with no pending caller");
        }
    };

    match reason {
        Error::ConnectionClosed => info!("Scoring worker closed the connection"),
        e => error!(error = %e, "Worker connection failed"),
    }

    let failed = shared.fail_all();
    if failed > 0 {
        warn!(failed, "Failed pending callers after connection loss");
    }
    info!("Reply router stopped");
}
