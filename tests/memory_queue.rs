use mxwatch::queue::{JsonlSink, MemoryQueue, QueueSource, ResultSink};
use mxwatch::types::TlsTestResult;
use std::time::Duration;

#[tokio::test]
async fn delivered_then_deleted_message_is_gone() {
    let q = MemoryQueue::new(Duration::from_secs(60), 10);
    q.push("mx1.example.com");

    let batch = q.get_pending_hosts().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].host, "mx1.example.com");

    q.delete_message(&batch[0].message_id, &batch[0].receipt_handle)
        .await
        .unwrap();
    assert_eq!(q.outstanding(), 0);
}

#[tokio::test]
async fn undeleted_message_is_redelivered_with_a_fresh_handle() {
    let q = MemoryQueue::new(Duration::from_millis(100), 10);
    q.push("mx1.example.com");

    let first = q.get_pending_hosts().await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = q.get_pending_hosts().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_ne!(second[0].receipt_handle, first[0].receipt_handle);

    // The stale handle no longer acknowledges anything.
    assert!(q
        .delete_message(&first[0].message_id, &first[0].receipt_handle)
        .await
        .is_err());
    q.delete_message(&second[0].message_id, &second[0].receipt_handle)
        .await
        .unwrap();
    assert_eq!(q.outstanding(), 0);
}

#[tokio::test]
async fn poll_respects_the_batch_cap() {
    let q = MemoryQueue::new(Duration::from_secs(60), 3);
    for i in 0..7 {
        q.push(&format!("mx{i}.example.com"));
    }

    assert_eq!(q.get_pending_hosts().await.unwrap().len(), 3);
    assert_eq!(q.get_pending_hosts().await.unwrap().len(), 3);
    assert_eq!(q.get_pending_hosts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_queue_long_polls_then_returns_empty() {
    let q = MemoryQueue::new(Duration::from_secs(60), 10);
    let start = std::time::Instant::now();
    let batch = q.get_pending_hosts().await.unwrap();
    assert!(batch.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn jsonl_sink_writes_one_parseable_line_per_publish() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    let sink = JsonlSink::create(path.to_str().unwrap()).unwrap();

    let result = TlsTestResult::new("mx1.example.com", 25);
    sink.publish(&result, "mx-tls-results").await.unwrap();
    sink.publish(&result, "mx-tls-results").await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["topic"], "mx-tls-results");
        assert_eq!(v["result"]["host"], "mx1.example.com");
    }
}
