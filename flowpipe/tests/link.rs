use flowpipe::notification_queue::{NotificationQueueArc, UNLISTED};
use flowpipe::{DataUnit, IdGen, Link, LinkError, Mode};
use serde_json::json;
use std::time::Duration;

fn new_link(mode: Mode, capacity: usize) -> Link {
    Link::new(&IdGen::new(), NotificationQueueArc::new(), mode, capacity, "test")
}

#[tokio::test]
async fn test_fifo_and_end_of_data() {
    let link = new_link(Mode::Object, 4);
    let writer = link.writer();
    let mut reader = link.reader();

    for i in 1..=3 {
        writer.send(json!(i).into()).await.unwrap();
    }
    assert!(!writer.is_closed());
    writer.close();
    assert!(writer.is_closed());

    for i in 1..=3 {
        assert_eq!(reader.recv().await.unwrap(), Some(DataUnit::Record(json!(i))));
    }
    assert_eq!(reader.recv().await.unwrap(), None);
    // Stays at end-of-data
    assert_eq!(reader.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_received_unit_holds_capacity_until_release() {
    let link = new_link(Mode::Object, 1);
    let writer = link.writer();
    let mut reader = link.reader();

    writer.send(json!(1).into()).await.unwrap();
    let _unit = reader.recv().await.unwrap();
    assert_eq!(link.stats().buffered, 1);

    // Still in flight: no room
    let blocked = tokio::time::timeout(Duration::from_millis(20), writer.reserve()).await;
    assert!(blocked.is_err());

    reader.release();
    assert_eq!(link.stats().buffered, 0);
    writer.reserve().await.unwrap();
}

#[tokio::test]
async fn test_writer_waits_for_reader() {
    let link = new_link(Mode::Object, 2);
    let writer = link.writer();
    let mut reader = link.reader();

    let producer = async {
        for i in 0..10 {
            writer.reserve().await.unwrap();
            writer.send(json!(i).into()).await.unwrap();
            assert!(writer.buffered() <= 2);
        }
        writer.close();
    };
    let consumer = async {
        let mut received = Vec::new();
        while let Some(unit) = reader.recv().await.unwrap() {
            tokio::task::yield_now().await;
            received.push(unit);
        }
        received
    };

    let ((), received) = tokio::join!(producer, consumer);
    let expected: Vec<DataUnit> = (0..10).map(|i| json!(i).into()).collect();
    assert_eq!(received, expected);
    assert!(link.stats().peak <= 2);
}

#[tokio::test]
async fn test_byte_capacity_counts_bytes() {
    let link = new_link(Mode::Bytes, 8);
    assert_eq!(link.capacity(), 8);
    let writer = link.writer();

    writer.send("12345".into()).await.unwrap();
    assert_eq!(writer.buffered(), 5);

    // 5 + 5 > 8: the second chunk has to wait
    let blocked = tokio::time::timeout(Duration::from_millis(20), writer.send("67890".into())).await;
    assert!(blocked.is_err());
    assert_eq!(link.stats().buffered, 5);

    // 5 + 3 fits
    writer.send("abc".into()).await.unwrap();
    assert_eq!(link.stats().buffered, 8);
}

#[tokio::test]
async fn test_empty_chunks_take_capacity() {
    let link = new_link(Mode::Bytes, 4);
    let writer = link.writer();

    for _ in 0..4 {
        writer.send(DataUnit::Bytes(bytes::Bytes::new())).await.unwrap();
    }
    assert_eq!(link.stats().buffered, 4);

    let blocked = tokio::time::timeout(Duration::from_millis(20), writer.reserve()).await;
    assert!(blocked.is_err());
    let blocked = tokio::time::timeout(
        Duration::from_millis(20),
        writer.send(DataUnit::Bytes(bytes::Bytes::new())),
    )
    .await;
    assert!(blocked.is_err());
    assert_eq!(link.stats().buffered, 4);
}

#[tokio::test]
async fn test_oversized_chunk_passes_empty_link() {
    let link = new_link(Mode::Bytes, 4);
    let writer = link.writer();
    let mut reader = link.reader();

    writer.send("far too long".into()).await.unwrap();
    assert_eq!(reader.recv().await.unwrap(), Some(DataUnit::from("far too long")));
}

#[tokio::test]
async fn test_mode_mismatch() {
    let link = new_link(Mode::Bytes, 4);
    let writer = link.writer();

    let err = writer.send(json!({"a": 1}).into()).await.unwrap_err();
    assert_eq!(
        err,
        LinkError::ModeMismatch {
            expected: Mode::Bytes,
            got: Mode::Object
        }
    );
}

#[tokio::test]
async fn test_abort_beats_buffered_data() {
    let link = new_link(Mode::Object, 4);
    let writer = link.writer();
    let mut reader = link.reader();

    writer.send(json!(1).into()).await.unwrap();
    link.abort();

    assert_eq!(reader.recv().await, Err(LinkError::Aborted));
    assert_eq!(writer.send(json!(2).into()).await, Err(LinkError::Aborted));
    assert_eq!(writer.reserve().await, Err(LinkError::Aborted));
}

#[tokio::test]
async fn test_abort_wakes_blocked_writer() {
    let link = new_link(Mode::Object, 1);
    let writer = link.writer();
    writer.send(json!(1).into()).await.unwrap();

    let aborter = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        link.abort();
    };
    let (result, ()) = tokio::join!(writer.reserve(), aborter);
    assert_eq!(result, Err(LinkError::Aborted));
}

#[tokio::test]
async fn test_stop_fails_reserve_but_not_send() {
    let link = new_link(Mode::Object, 1);
    let writer = link.writer();
    let mut reader = link.reader();

    writer.send(json!(1).into()).await.unwrap();

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        link.request_stop();
    };
    let (result, ()) = tokio::join!(writer.reserve(), stopper);
    assert_eq!(result, Err(LinkError::Stopped));

    // Already produced data still drains
    assert_eq!(reader.recv().await.unwrap(), Some(DataUnit::Record(json!(1))));
    reader.release();
    writer.send(json!(2).into()).await.unwrap();
    writer.close();
    assert_eq!(reader.recv().await.unwrap(), Some(DataUnit::Record(json!(2))));
    assert_eq!(reader.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_dropped_writer_closes() {
    let link = new_link(Mode::Object, 1);
    let mut reader = link.reader();
    {
        let writer = link.writer();
        writer.send(json!(1).into()).await.unwrap();
    }
    assert!(reader.recv().await.unwrap().is_some());
    assert_eq!(reader.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_dropped_reader_fails_writer() {
    let link = new_link(Mode::Object, 1);
    let writer = link.writer();
    let reader = link.reader();
    writer.send(json!(1).into()).await.unwrap();

    drop(reader);
    assert_eq!(writer.reserve().await, Err(LinkError::ReceiverGone));
    assert_eq!(writer.send(json!(2).into()).await, Err(LinkError::ReceiverGone));
}

#[tokio::test]
async fn test_subscribe_samples_levels() {
    let link = new_link(Mode::Object, 3);
    let mut levels = link.subscribe(16).unwrap();
    let writer = link.writer();

    writer.send(json!(1).into()).await.unwrap();
    writer.send(json!(2).into()).await.unwrap();
    writer.close();

    assert_eq!(levels.recv().await.unwrap(), 1);
    assert_eq!(levels.recv().await.unwrap(), 2);
    assert_eq!(levels.recv().await.unwrap(), UNLISTED);
}
