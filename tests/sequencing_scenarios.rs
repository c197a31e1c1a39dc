use sequencer::bucket::list_buckets;
use sequencer::halt::HALT_FLAG;
use sequencer::inbox::AdmissionInbox;
use sequencer::testing::{FileNameKeyExtractor, RecordingProcessor, names_in, stage, write_dve};
use sequencer::{
    Admission, BucketingEngine, DrainDispatcher, DrainingEngine, Key, OaiOreKeyExtractor, Reaper,
    status,
};
use ntest::timeout;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct Pipeline {
    dir: TempDir,
    admission: BucketingEngine,
    dispatcher: DrainDispatcher,
    processor: RecordingProcessor,
}

impl Pipeline {
    fn new(workers: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let processor = RecordingProcessor::new();
        let admission = BucketingEngine::new(
            dir.path().join("buckets"),
            dir.path().join("rejected"),
            dir.path().join("failed"),
            Arc::new(FileNameKeyExtractor),
        );
        let engine = DrainingEngine::new(dir.path().join("failed"), Arc::new(processor.clone()));
        let dispatcher = DrainDispatcher::new(
            dir.path().join("buckets"),
            Duration::from_millis(10),
            Vec::new(),
            workers,
            engine,
        );
        Self {
            dir,
            admission,
            dispatcher,
            processor,
        }
    }

    fn buckets(&self) -> PathBuf {
        self.dir.path().join("buckets")
    }

    fn failed(&self, key: &str) -> PathBuf {
        self.dir.path().join("failed").join(key)
    }

    async fn admit(&self, name: &str) -> Admission {
        let item = stage(&self.dir.path().join("inbox"), name);
        self.admission.admit(&item).await
    }

    async fn bucket_of(&self, name: &str) -> PathBuf {
        match self.admit(name).await {
            Admission::Routed { bucket, .. } => bucket,
            other => panic!("unexpected admission {other:?}"),
        }
    }

    /// Dispatch, wait for every drain, then reap
    async fn run_to_quiescence(&mut self) {
        self.dispatcher.dispatch_round().await.unwrap();
        self.dispatcher.settle().await;
        self.dispatcher.reaper().reap().await.unwrap();
    }
}

#[tokio::test]
#[timeout(30000)]
async fn test_interleaved_keys_are_drained_in_order_and_reaped() {
    let mut pipeline = Pipeline::new(4);
    let k1 = pipeline.bucket_of("K1_a1").await;
    let k2 = pipeline.bucket_of("K2_b1").await;
    assert_eq!(pipeline.bucket_of("K1_a2").await, k1);
    assert_eq!(pipeline.bucket_of("K1_a3").await, k1);
    assert_ne!(k1, k2);

    pipeline.run_to_quiescence().await;

    assert_eq!(
        pipeline.processor.handled_for("K1"),
        vec!["K1_a1", "K1_a2", "K1_a3"]
    );
    assert_eq!(pipeline.processor.handled_for("K2"), vec!["K2_b1"]);
    assert!(!k1.exists());
    assert!(!k2.exists());
}

#[tokio::test]
#[timeout(30000)]
async fn test_failure_halts_key_until_resumed() {
    let mut pipeline = Pipeline::new(4);
    pipeline.processor.fail_on("K1_a1");
    let bucket = pipeline.bucket_of("K1_a1").await;

    pipeline.run_to_quiescence().await;

    assert_eq!(
        names_in(&pipeline.failed("K1")),
        vec!["K1_a1", "K1_a1-error.log"]
    );
    assert_eq!(names_in(&bucket), vec![HALT_FLAG]);

    // a later arrival joins the halted bucket and waits
    assert_eq!(pipeline.bucket_of("K1_a2").await, bucket);
    pipeline.run_to_quiescence().await;
    assert_eq!(names_in(&bucket), vec!["K1_a2", HALT_FLAG]);
    assert_eq!(pipeline.processor.handled_for("K1"), vec!["K1_a1"]);

    // clearing the halt releases the queue, after which the bucket is reaped
    let key = Key::new("K1").unwrap();
    assert!(status::resume(&pipeline.buckets(), &key).await.unwrap());
    pipeline.run_to_quiescence().await;
    assert_eq!(pipeline.processor.handled_for("K1"), vec!["K1_a1", "K1_a2"]);
    assert!(!bucket.exists());

    // the next arrival gets a new bucket instance
    let next = pipeline.bucket_of("K1_a3").await;
    assert_ne!(next, bucket);
}

#[tokio::test]
#[timeout(30000)]
async fn test_failure_in_one_key_does_not_stall_others() {
    let mut pipeline = Pipeline::new(2);
    pipeline.processor.fail_on("K1_a1");
    for name in ["K1_a1", "K2_b1", "K1_a2", "K2_b2", "K3_c1"] {
        pipeline.admit(name).await;
    }

    pipeline.run_to_quiescence().await;

    assert_eq!(pipeline.processor.handled_for("K1"), vec!["K1_a1"]);
    assert_eq!(pipeline.processor.handled_for("K2"), vec!["K2_b1", "K2_b2"]);
    assert_eq!(pipeline.processor.handled_for("K3"), vec!["K3_c1"]);

    let buckets = list_buckets(&pipeline.buckets(), &[]).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].key().as_str(), "K1");
    assert_eq!(names_in(buckets[0].path()), vec!["K1_a2", HALT_FLAG]);
}

#[tokio::test]
#[timeout(30000)]
async fn test_per_key_order_holds_across_many_workers() {
    let mut pipeline = Pipeline::new(8);
    let keys = ["K1", "K2", "K3", "K4", "K5", "K6"];
    for n in 0..10 {
        for key in keys {
            pipeline.admit(&format!("{key}_{n:02}")).await;
        }
    }

    pipeline.run_to_quiescence().await;

    for key in keys {
        let expected: Vec<String> = (0..10).map(|n| format!("{key}_{n:02}")).collect();
        assert_eq!(pipeline.processor.handled_for(key), expected);
    }
    assert!(names_in(&pipeline.buckets()).is_empty());
}

#[tokio::test]
#[timeout(30000)]
async fn test_reaped_bucket_is_replaced_not_reused() {
    let mut pipeline = Pipeline::new(1);
    let first = pipeline.bucket_of("K1_a1").await;
    pipeline.run_to_quiescence().await;
    assert!(!first.exists());

    let second = pipeline.bucket_of("K1_a2").await;
    assert_ne!(first, second);
    assert_eq!(names_in(&pipeline.buckets()).len(), 1);
}

fn export_inbox(root: &Path) -> AdmissionInbox {
    let engine = BucketingEngine::new(
        root.join("buckets"),
        root.join("rejected"),
        root.join("failed"),
        Arc::new(OaiOreKeyExtractor),
    );
    AdmissionInbox::new(root.join("inbox"), Duration::from_millis(10), engine)
}

#[tokio::test]
#[timeout(30000)]
async fn test_exports_are_bucketed_by_nbn_and_malformed_ones_rejected() {
    let dir = TempDir::new().unwrap();
    let inbox_dir = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox_dir).unwrap();
    write_dve(&inbox_dir, "v1.zip", "urn:nbn:nl:ui:13-k1");
    write_dve(&inbox_dir, "v2.zip", "urn:nbn:nl:ui:13-k1");
    std::fs::write(inbox_dir.join("broken.zip"), b"not an archive").unwrap();

    let admissions = export_inbox(dir.path()).poll_once().await.unwrap();

    assert_eq!(admissions.len(), 3);
    let buckets = list_buckets(&dir.path().join("buckets"), &[]).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].key().as_str(), "urn:nbn:nl:ui:13-k1");
    assert_eq!(names_in(buckets[0].path()), vec!["v1.zip", "v2.zip"]);
    assert_eq!(
        names_in(&dir.path().join("rejected")),
        vec!["broken.zip", "broken.zip-error.log"]
    );
    assert!(names_in(&inbox_dir).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[timeout(30000)]
async fn test_admission_races_a_running_reaper_without_losing_items() {
    let dir = TempDir::new().unwrap();
    let buckets = dir.path().join("buckets");
    std::fs::create_dir_all(&buckets).unwrap();
    let admission = BucketingEngine::new(
        buckets.clone(),
        dir.path().join("rejected"),
        dir.path().join("failed"),
        Arc::new(FileNameKeyExtractor),
    )
    .with_max_attempts(20);

    let reaper = Reaper::new(buckets.clone(), Vec::new());
    let (stop_tx, stop_rx) = watch::channel(false);
    let reaping = tokio::spawn(async move {
        let mut deleted = 0;
        while !*stop_rx.borrow() {
            deleted += reaper.reap().await.unwrap().deleted.len();
            tokio::task::yield_now().await;
        }
        deleted
    });

    // every admission creates a fresh bucket that is empty until the item lands
    let inbox = dir.path().join("inbox");
    for n in 0..100 {
        let item = stage(&inbox, &format!("K{n:03}_a1"));
        match admission.admit(&item).await {
            Admission::Routed { key, bucket, item } => {
                assert_eq!(key.as_str(), format!("K{n:03}"));
                assert!(item.starts_with(&bucket));
                assert!(item.exists());
            }
            other => panic!("unexpected admission {other:?}"),
        }
    }

    stop_tx.send(true).unwrap();
    reaping.await.unwrap();

    assert_eq!(list_buckets(&buckets, &[]).await.unwrap().len(), 100);
    assert!(names_in(&inbox).is_empty());
    assert!(names_in(&dir.path().join("rejected")).is_empty());
    assert!(names_in(&dir.path().join("failed")).is_empty());
}
