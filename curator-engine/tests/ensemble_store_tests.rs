//! Ensemble scoring against the SQLite post and topic stores

use async_trait::async_trait;
use curator_common::db::{init_memory_database, CurationMode, NewPost, PostStore, TopicStore};
use curator_common::id_claim::DEFAULT_MAX_ATTEMPTS;
use curator_common::wire::{Media, PostMedia};
use curator_common::Result;
use curator_engine::{ClassifierSignal, CurationSettings, EnsembleScorer, FAILED_SCORE};
use std::sync::{Arc, Mutex};

/// Records what the classifier was asked to score
#[derive(Default)]
struct RecordingClassifier {
    seen: Mutex<Vec<(String, String, bool)>>,
}

#[async_trait]
impl ClassifierSignal for RecordingClassifier {
    async fn classifier_score(&self, profile: &str, post_id: &str, media: &PostMedia) -> Result<f32> {
        self.seen.lock().unwrap().push((
            profile.to_string(),
            post_id.to_string(),
            media.representative_image().is_some(),
        ));
        Ok(0.35)
    }
}

async fn setup() -> (PostStore, TopicStore, Arc<RecordingClassifier>, EnsembleScorer) {
    let pool = init_memory_database().await.unwrap();
    let posts = PostStore::open(pool.clone(), DEFAULT_MAX_ATTEMPTS).await.unwrap();
    let topics = TopicStore::new(pool);
    let classifier = Arc::new(RecordingClassifier::default());

    let scorer = EnsembleScorer::new(
        classifier.clone(),
        Arc::new(posts.clone()),
        Arc::new(topics.clone()),
    );
    (posts, topics, classifier, scorer)
}

#[tokio::test]
async fn test_stored_topic_filters_drive_the_decision() {
    let (posts, topics, _classifier, scorer) = setup().await;

    topics
        .create_topic("election", "Election", 1, &["ballot box"], None)
        .await
        .unwrap();
    topics
        .create_topic("storm", "Storm", 1, &[], Some("storm warning"))
        .await
        .unwrap();

    for (id, text) in [
        ("plain", "lunch was great"),
        ("ngram", "queue at the ballot box"),
        ("regex", "Storm warning for the coast"),
    ] {
        posts
            .insert_post(&NewPost::text_only(id, text, 10))
            .await
            .unwrap();
    }

    let settings = CurationSettings::new(CurationMode::new("mode-1", "Mine")).with_trending_filters(vec![
        CurationMode::new("election", "Election"),
        CurationMode::new("storm", "Storm"),
    ]);

    let plain = scorer.score("plain", &settings).await.unwrap();
    assert_eq!(plain.final_score, 0.35);

    let ngram = scorer.score("ngram", &settings).await.unwrap();
    assert!(ngram.ngram_hit && !ngram.regex_hit);
    assert_eq!(ngram.final_score, 1.0);

    let regex = scorer.score("regex", &settings).await.unwrap();
    assert!(regex.regex_hit && !regex.ngram_hit);
    assert_eq!(regex.final_score, 1.0);
}

#[tokio::test]
async fn test_classifier_sees_post_media() {
    let (posts, _topics, classifier, scorer) = setup().await;

    let mut post = NewPost::text_only("pic", "look at this", 5);
    post.media.images.push(Media {
        data_format: "png".to_string(),
        content: vec![0x89, b'P', b'N', b'G'],
    });
    posts.insert_post(&post).await.unwrap();

    let settings = CurationSettings::new(CurationMode::new("mode-1", "Mine"));
    scorer.score("pic", &settings).await.unwrap();

    let seen = classifier.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![("mode-1".to_string(), "pic".to_string(), true)]);
}

#[tokio::test]
async fn test_batch_with_unknown_post() {
    let (posts, _topics, _classifier, scorer) = setup().await;
    posts
        .insert_post(&NewPost::text_only("known", "text", 1))
        .await
        .unwrap();

    let settings = CurationSettings::new(CurationMode::new("mode-1", "Mine"));
    let scores = scorer
        .score_many(&["known".to_string(), "unknown".to_string()], &settings)
        .await;

    assert!(scores[0].success);
    assert_eq!(scores[0].score, 0.35);
    assert!(!scores[1].success);
    assert_eq!(scores[1].score, FAILED_SCORE);
}
