//! Scoring Worker: sequential request loop over one framed connection
//!
//! read → decode → classify → reply, one request at a time. The next request
//! is not read until the current reply has been written, so replies leave in
//! exactly the order requests arrived.

use crate::classifier::{Classifier, ClassifierInput};
use curator_common::framing::{FrameReader, FrameWriter};
use curator_common::wire::{ScoreReply, ScoreRequest};
use curator_common::{Error, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Counters reported when the connection ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Requests answered with a score
    pub scored: u64,
    /// Requests answered with an error reply
    pub failed: u64,
    /// Frames that could not be decoded and got no reply
    pub skipped: u64,
}

pub struct ScoringWorker<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    classifier: Arc<dyn Classifier>,
    stats: WorkerStats,
}

impl<R, W> ScoringWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, max_message_size: u64, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            reader: FrameReader::with_max_message_size(reader, max_message_size),
            writer: FrameWriter::new(writer),
            classifier,
            stats: WorkerStats::default(),
        }
    }

    /// Serve requests until the dispatcher closes the connection
    ///
    /// # Errors
    /// Any connection failure other than a clean close, including an
    /// oversized frame (the stream cannot be resynchronized after one).
    pub async fn run(mut self) -> Result<WorkerStats> {
        info!("Scoring worker loop started");

        loop {
            let payload = match self.reader.read_message().await {
                Ok(payload) => payload,
                Err(Error::ConnectionClosed) => break,
                Err(e) => return Err(e),
            };

            let request = match ScoreRequest::decode(&payload) {
                Ok(request) => request,
                Err(e) => {
                    // No key to reply to
                    warn!(bytes = payload.len(), error = %e, "Skipping undecodable request");
                    self.stats.skipped += 1;
                    continue;
                }
            };

            let reply = self.score(request).await;
            match self.writer.write_message(&reply.encode()?).await {
                Ok(()) => {}
                Err(Error::ConnectionClosed) => break,
                Err(e) => return Err(e),
            }
        }

        info!(
            scored = self.stats.scored,
            failed = self.stats.failed,
            skipped = self.stats.skipped,
            "Dispatcher closed connection, worker loop finished"
        );
        Ok(self.stats)
    }

    async fn score(&mut self, request: ScoreRequest) -> ScoreReply {
        let key = request.key.clone();
        let (profile, input) = ClassifierInput::from_request(request);
        debug!(caller = %key, profile = %profile, has_image = input.has_image, "Scoring request");

        let classifier = Arc::clone(&self.classifier);
        let profile_for_task = profile.clone();
        let outcome = tokio::task::spawn_blocking(move || classifier.classify(&profile_for_task, &input))
            .await
            .unwrap_or_else(|e| Err(Error::Internal(format!("classifier task failed: {}", e))))
            .and_then(|score| {
                // NaN/inf have no JSON encoding; they go back as an error reply
                if score.is_finite() {
                    Ok(score)
                } else {
                    Err(Error::Internal(format!("classifier returned non-finite score {}", score)))
                }
            });

        match outcome {
            Ok(score) => {
                self.stats.scored += 1;
                ScoreReply::score(key, score)
            }
            Err(e) => {
                warn!(caller = %key, profile = %profile, error = %e, "Classification failed");
                self.stats.failed += 1;
                ScoreReply::error(key, e.to_string())
            }
        }
    }
}

/// Accept exactly one dispatcher connection and serve it to completion
pub async fn serve_one(
    listener: TcpListener,
    max_message_size: u64,
    classifier: Arc<dyn Classifier>,
) -> Result<WorkerStats> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    info!(%peer, "Dispatcher connected");

    let (reader, writer) = stream.into_split();
    ScoringWorker::new(reader, writer, max_message_size, classifier)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_common::framing::DEFAULT_MAX_MESSAGE_SIZE;
    use curator_common::wire::{CorrelationKey, ReplyBody};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// Scores `text.len() / 100`, fails on text "fail", returns NaN for text
    /// "nan", and tracks overlap
    #[derive(Default)]
    struct LengthClassifier {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Classifier for LengthClassifier {
        fn classify(&self, _profile: &str, input: &ClassifierInput) -> Result<f32> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match input.text.as_str() {
                "fail" => return Err(Error::InvalidInput("cannot score".to_string())),
                "nan" => return Ok(f32::NAN),
                _ => {}
            }
            Ok(input.text.len() as f32 / 100.0)
        }
    }

    struct Dispatcher {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl Dispatcher {
        async fn send(&self, id: &str, text: &str) {
            let request = ScoreRequest::new(CorrelationKey::new("u", id), "p", text, None);
            self.writer.write_message(&request.encode().unwrap()).await.unwrap();
        }

        async fn recv(&mut self) -> ScoreReply {
            ScoreReply::decode(&self.reader.read_message().await.unwrap()).unwrap()
        }
    }

    fn start(
        classifier: Arc<LengthClassifier>,
    ) -> (Dispatcher, tokio::task::JoinHandle<Result<WorkerStats>>) {
        let (dispatcher_io, worker_io) = tokio::io::duplex(64 * 1024);
        let (dr, dw) = tokio::io::split(dispatcher_io);
        let (wr, ww) = tokio::io::split(worker_io);

        let worker = ScoringWorker::new(wr, ww, DEFAULT_MAX_MESSAGE_SIZE, classifier);
        let task = tokio::spawn(worker.run());
        (
            Dispatcher {
                reader: FrameReader::new(dr),
                writer: FrameWriter::new(dw),
            },
            task,
        )
    }

    #[tokio::test]
    async fn test_replies_in_request_order_one_at_a_time() {
        let classifier = Arc::new(LengthClassifier::default());
        let (mut dispatcher, task) = start(classifier.clone());

        for (id, text) in [("a", "x"), ("b", "xx"), ("c", "xxx")] {
            dispatcher.send(id, text).await;
        }

        for (id, expected) in [("a", 0.01), ("b", 0.02), ("c", 0.03)] {
            let reply = dispatcher.recv().await;
            assert_eq!(reply.key.request, id);
            assert_eq!(reply.body, ReplyBody::Score(expected));
        }

        drop(dispatcher);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.scored, 3);
        assert_eq!(classifier.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_becomes_error_reply() {
        let (mut dispatcher, task) = start(Arc::new(LengthClassifier::default()));

        dispatcher.send("bad", "fail").await;
        dispatcher.send("good", "ok").await;

        let bad = dispatcher.recv().await;
        assert!(matches!(bad.body, ReplyBody::Error(ref msg) if msg.contains("cannot score")));
        let good = dispatcher.recv().await;
        assert_eq!(good.body, ReplyBody::Score(0.02));

        drop(dispatcher);
        let stats = task.await.unwrap().unwrap();
        assert_eq!((stats.scored, stats.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_non_finite_score_becomes_error_reply() {
        let (mut dispatcher, task) = start(Arc::new(LengthClassifier::default()));

        dispatcher.send("nan", "nan").await;
        dispatcher.send("after", "abc").await;

        let nan = dispatcher.recv().await;
        assert_eq!(nan.key.request, "nan");
        assert!(matches!(nan.body, ReplyBody::Error(ref msg) if msg.contains("non-finite")));
        let after = dispatcher.recv().await;
        assert_eq!(after.body, ReplyBody::Score(0.03));

        drop(dispatcher);
        let stats = task.await.unwrap().unwrap();
        assert_eq!((stats.scored, stats.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let (mut dispatcher, task) = start(Arc::new(LengthClassifier::default()));

        dispatcher.writer.write_message(b"garbage").await.unwrap();
        dispatcher.send("next", "abcd").await;

        let reply = dispatcher.recv().await;
        assert_eq!(reply.key.request, "next");

        drop(dispatcher);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.scored, 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_worker_with_error() {
        let (dispatcher_io, worker_io) = tokio::io::duplex(4096);
        let (_dr, dw) = tokio::io::split(dispatcher_io);
        let (wr, ww) = tokio::io::split(worker_io);

        let worker = ScoringWorker::new(wr, ww, 16, Arc::new(LengthClassifier::default()));
        let task = tokio::spawn(worker.run());

        let writer = FrameWriter::new(dw);
        writer.write_message(&[0u8; 64]).await.unwrap();

        assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
    }
}
