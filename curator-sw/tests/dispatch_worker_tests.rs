//! End-to-end: dispatcher in the front-end, worker over a real TCP socket

use curator_common::db::{HeadConfig, HeadParams, LayerParams};
use curator_common::framing::DEFAULT_MAX_MESSAGE_SIZE;
use curator_common::wire::{CorrelationKey, ScoreRequest};
use curator_common::Error;
use curator_engine::ScoreDispatcher;
use curator_sw::classifier::{ClassifierHead, HashingFeatureExtractor, HeadClassifier};
use curator_sw::{serve_one, WorkerStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const FEATURE_DIM: usize = 32;

/// Head that always leans positive through its bias
fn biased_head() -> HeadParams {
    HeadParams {
        config: HeadConfig {
            input_dim: FEATURE_DIM,
            hidden_dims: vec![],
            dropout: false,
        },
        layers: vec![LayerParams {
            weights: vec![vec![0.0; FEATURE_DIM], vec![0.0; FEATURE_DIM]],
            bias: vec![-2.0, 2.0],
        }],
    }
}

/// Head whose two outputs both saturate far below zero
fn saturated_head() -> HeadParams {
    let mut params = biased_head();
    params.layers[0].bias = vec![-200.0, -200.0];
    params
}

async fn start_worker() -> (String, JoinHandle<curator_common::Result<WorkerStats>>) {
    let mut classifier = HeadClassifier::new(HashingFeatureExtractor::new(FEATURE_DIM));
    classifier
        .insert_head("cats", ClassifierHead::from_params(&biased_head()).unwrap())
        .unwrap();
    classifier
        .insert_head("saturated", ClassifierHead::from_params(&saturated_head()).unwrap())
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let task = tokio::spawn(serve_one(
        listener,
        DEFAULT_MAX_MESSAGE_SIZE,
        Arc::new(classifier),
    ));
    (addr, task)
}

#[tokio::test]
async fn test_concurrent_callers_over_tcp() {
    let (addr, worker) = start_worker().await;
    let dispatcher = Arc::new(
        ScoreDispatcher::connect(&addr, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap(),
    );

    let mut callers = Vec::new();
    for i in 0..8 {
        let dispatcher = Arc::clone(&dispatcher);
        callers.push(tokio::spawn(async move {
            let request = ScoreRequest::new(
                CorrelationKey::new(format!("user-{}", i), "post"),
                "cats",
                format!("post number {}", i),
                None,
            );
            dispatcher.score(request, Some(Duration::from_secs(5))).await
        }));
    }

    // sigmoid(2) / (sigmoid(-2) + sigmoid(2)) = sigmoid(2)
    let expected = 1.0 / (1.0 + (-2.0f32).exp());
    for caller in callers {
        let score = caller.await.unwrap().unwrap();
        assert!((score - expected).abs() < 1e-5, "got {}", score);
    }

    drop(dispatcher);
    let stats = tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not exit after dispatcher closed")
        .unwrap()
        .unwrap();
    assert_eq!(stats.scored, 8);
}

#[tokio::test]
async fn test_worker_errors_surface_as_classifier_unavailable() {
    let (addr, _worker) = start_worker().await;
    let dispatcher = ScoreDispatcher::connect(&addr, DEFAULT_MAX_MESSAGE_SIZE)
        .await
        .unwrap();

    let unknown_profile = ScoreRequest::new(CorrelationKey::new("u", "1"), "dogs", "woof", None);
    let result = dispatcher.score(unknown_profile, None).await;
    assert!(matches!(result, Err(Error::ClassifierUnavailable(_))));

    let bad_image = ScoreRequest::new(
        CorrelationKey::new("u", "2"),
        "cats",
        "meow",
        Some(b"not an image".to_vec()),
    );
    let result = dispatcher.score(bad_image, None).await;
    assert!(matches!(result, Err(Error::ClassifierUnavailable(_))));

    // Worker is still serving after both failures
    let ok = ScoreRequest::new(CorrelationKey::new("u", "3"), "cats", "meow", None);
    assert!(dispatcher.score(ok, None).await.is_ok());
}

#[tokio::test]
async fn test_saturated_head_keeps_connection_open() {
    let (addr, _worker) = start_worker().await;
    let dispatcher = ScoreDispatcher::connect(&addr, DEFAULT_MAX_MESSAGE_SIZE)
        .await
        .unwrap();

    let saturated = ScoreRequest::new(CorrelationKey::new("u", "1"), "saturated", "meh", None);
    let score = dispatcher.score(saturated, None).await.unwrap();
    assert!((score - 0.5).abs() < 1e-6, "got {}", score);

    let healthy = ScoreRequest::new(CorrelationKey::new("u", "2"), "cats", "meow", None);
    assert!(dispatcher.score(healthy, None).await.is_ok());
    assert!(!dispatcher.is_closed());
}

#[tokio::test]
async fn test_worker_exit_fails_waiting_callers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    // A "worker" that accepts, reads nothing and hangs up
    let hangup = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(stream);
    });

    let dispatcher = Arc::new(
        ScoreDispatcher::connect(&addr, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap(),
    );
    let mut callers = Vec::new();
    for i in 0..5 {
        let dispatcher = Arc::clone(&dispatcher);
        callers.push(tokio::spawn(async move {
            let request =
                ScoreRequest::new(CorrelationKey::new(format!("c{}", i), "r"), "cats", "t", None);
            dispatcher.score(request, None).await
        }));
    }

    for caller in callers {
        let result = tokio::time::timeout(Duration::from_secs(5), caller)
            .await
            .expect("caller stayed blocked after worker exit")
            .unwrap();
        assert!(matches!(result, Err(Error::ConnectionLost)));
    }
    hangup.await.unwrap();
}
