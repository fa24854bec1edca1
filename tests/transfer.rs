//! End-to-end transfer scenarios over an in-memory channel pair.

use std::time::Duration;

use dropline::channel::{Channel, MemoryChannel};
use dropline::config::{CHUNK_SIZE, NONCE_LEN};
use dropline::crypto::EncryptionKey;
use dropline::engine::{SendFile, Sender, TransferEvent};
use dropline::error::TransferError;
use dropline::protocol::{ControlMessage, WireMessage};
use dropline::session::{FileManifestEntry, SessionState};
use dropline::store::{SessionStore, TransferStatus};
use dropline::Receiver;

/// AES-256-GCM stream overhead: 12-byte nonce + 16-byte tag.
const AEAD_OVERHEAD: usize = NONCE_LEN + 16;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn send_file(name: &str, data: Vec<u8>) -> SendFile {
    let entry = FileManifestEntry::new(name, data.len() as u64, "application/octet-stream");
    SendFile::new(entry, data)
}

/// Drain a raw channel end into a message log until it closes.
async fn collect_messages(mut end: MemoryChannel) -> Vec<WireMessage> {
    let mut messages = Vec::new();
    while let Some(msg) = end.recv().await {
        messages.push(msg);
    }
    messages
}

// ── Scenario A: single 1 MiB file ───────────────────────────────────────────

#[tokio::test]
async fn one_mib_file_chunk_count_and_reconstruction() {
    let key = EncryptionKey::generate().unwrap();
    let data = patterned(1024 * 1024);
    let (a, b) = MemoryChannel::pair();

    let (sender, _control, _events) =
        Sender::new(a, key.clone(), vec![send_file("big.bin", data.clone())]);
    let sender_task = tokio::spawn(sender.run());

    let messages = collect_messages(b).await;
    sender_task.await.unwrap().unwrap();

    // metadata, then the data chunks, then the end signal.
    let expected_chunks = (data.len() + AEAD_OVERHEAD).div_ceil(CHUNK_SIZE);
    assert_eq!(messages.len(), expected_chunks + 2);

    match &messages[0] {
        WireMessage::Control(text) => {
            let msg = ControlMessage::decode(text).unwrap();
            assert_eq!(
                msg,
                ControlMessage::Metadata {
                    name: "big.bin".into(),
                    size: data.len() as u64,
                    mime_type: "application/octet-stream".into(),
                }
            );
        }
        other => panic!("expected metadata first, got {other:?}"),
    }
    match messages.last().unwrap() {
        WireMessage::Control(text) => {
            assert_eq!(ControlMessage::decode(text).unwrap(), ControlMessage::End);
        }
        other => panic!("expected end signal last, got {other:?}"),
    }

    // Reassemble the wire stream and decrypt: byte-identical reconstruction.
    let mut combined = Vec::new();
    for msg in &messages[1..messages.len() - 1] {
        match msg {
            WireMessage::Data(chunk) => {
                assert!(chunk.len() <= CHUNK_SIZE, "chunk exceeds protocol size");
                combined.extend_from_slice(chunk);
            }
            other => panic!("expected data chunk, got {other:?}"),
        }
    }
    assert_eq!(key.decrypt(&combined).unwrap(), data);
}

#[tokio::test]
async fn engine_to_engine_round_trip_with_monotonic_progress() {
    let key = EncryptionKey::generate().unwrap();
    let files: Vec<Vec<u8>> = vec![
        patterned(CHUNK_SIZE * 3 + 17),
        patterned(5),
        patterned(CHUNK_SIZE),
    ];
    let (a, b) = MemoryChannel::pair();

    let send_files: Vec<SendFile> = files
        .iter()
        .enumerate()
        .map(|(i, d)| send_file(&format!("file{i}"), d.clone()))
        .collect();
    let (sender, _control, mut sender_events) = Sender::new(a, key.clone(), send_files);
    let (receiver, _rcontrol, mut receiver_events) = Receiver::new(b, key);

    let sender_task = tokio::spawn(sender.run());
    let receiver_task = tokio::spawn(receiver.run());

    sender_task.await.unwrap().unwrap();
    receiver_task.await.unwrap().unwrap();

    // Receiver surfaced every file, in manifest order, byte-identical.
    let mut received = Vec::new();
    let mut completed_session = false;
    let mut last_transferred = 0u64;
    while let Ok(event) = receiver_events.try_recv() {
        match event {
            TransferEvent::FileReceived(file) => received.push(file),
            TransferEvent::SessionCompleted { .. } => completed_session = true,
            TransferEvent::Progress {
                session_transferred,
                ..
            } => {
                assert!(
                    session_transferred >= last_transferred,
                    "progress went backwards"
                );
                last_transferred = session_transferred;
            }
            TransferEvent::SessionFailed { reason, .. } => panic!("receive failed: {reason}"),
            _ => {}
        }
    }
    assert!(completed_session);
    assert_eq!(received.len(), files.len());
    for (i, file) in received.iter().enumerate() {
        assert_eq!(file.entry.name, format!("file{i}"));
        assert_eq!(file.data, files[i]);
    }

    // Sender saw its own completion and monotonic progress too.
    let mut sender_completed = false;
    let mut last = 0u64;
    while let Ok(event) = sender_events.try_recv() {
        match event {
            TransferEvent::SessionCompleted { .. } => sender_completed = true,
            TransferEvent::Progress {
                session_transferred,
                ..
            } => {
                assert!(session_transferred >= last);
                last = session_transferred;
            }
            _ => {}
        }
    }
    assert!(sender_completed);
}

// ── Scenario B: pause mid-session, persist, reload, resume ──────────────────

#[tokio::test]
async fn resume_from_persisted_session_sends_only_missing_chunks() {
    let key = EncryptionKey::generate().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::open(dir.path()).await.unwrap();

    // File 2 is sized to exactly 10 chunks of encrypted stream.
    let file1 = patterned(100);
    let file2 = patterned(10 * CHUNK_SIZE - AEAD_OVERHEAD);
    let file3 = patterned(CHUNK_SIZE / 2);
    let nonce = [0x42u8; NONCE_LEN];

    // Craft the on-disk record a crash would have left behind: file 1
    // completed, file 2 interrupted after 5 of 10 chunks with its nonce
    // persisted, file 3 untouched.
    let manifest = vec![
        FileManifestEntry::new("one", file1.len() as u64, "application/octet-stream"),
        FileManifestEntry::new("two", file2.len() as u64, "application/octet-stream"),
        FileManifestEntry::new("three", file3.len() as u64, "application/octet-stream"),
    ];
    let mut session = SessionState::new(&manifest);
    assert_eq!(session.files[1].total_chunks, 10);
    session.mark_chunk_sent(0);
    session.complete_current_file();
    assert_eq!(session.current_file_index, 1);
    for i in 0..5 {
        session.mark_chunk_sent(i);
    }
    session.files[1].nonce = Some(nonce);
    store.save(&session).await.unwrap();
    let session_id = session.session_id;
    drop(session);

    // "Restart": reload the record and resume.
    let reloaded = store.load(session_id).await.unwrap().unwrap();
    let (a, b) = MemoryChannel::pair();
    let (sender, _control, _events) = Sender::resume(
        a,
        key.clone(),
        vec![
            send_file("one", file1),
            send_file("two", file2.clone()),
            send_file("three", file3.clone()),
        ],
        reloaded,
    )
    .unwrap();
    let sender = sender.with_store(store.clone());
    let sender_task = tokio::spawn(sender.run());

    let messages = collect_messages(b).await;
    sender_task.await.unwrap().unwrap();

    // Expected wire sequence: chunks [5..10) of file 2 (no re-announcement,
    // nothing for the completed file 1), end, then all of file 3.
    let combined2 = key.encrypt_with_nonce(&file2, &nonce).unwrap();
    let expected_tail: Vec<&[u8]> = combined2.chunks(CHUNK_SIZE).skip(5).collect();

    let mut idx = 0;
    for expected in &expected_tail {
        match &messages[idx] {
            WireMessage::Data(chunk) => assert_eq!(&chunk[..], *expected),
            other => panic!("expected file-2 chunk, got {other:?}"),
        }
        idx += 1;
    }
    match &messages[idx] {
        WireMessage::Control(text) => {
            assert_eq!(ControlMessage::decode(text).unwrap(), ControlMessage::End);
        }
        other => panic!("expected end after file 2, got {other:?}"),
    }
    idx += 1;

    // File 3 begins only after file 2 completed.
    match &messages[idx] {
        WireMessage::Control(text) => match ControlMessage::decode(text).unwrap() {
            ControlMessage::Metadata { name, .. } => assert_eq!(name, "three"),
            other => panic!("expected file-3 metadata, got {other:?}"),
        },
        other => panic!("expected file-3 metadata, got {other:?}"),
    }
    let file3_chunks = (file3.len() + AEAD_OVERHEAD).div_ceil(CHUNK_SIZE);
    assert_eq!(messages.len(), idx + 1 + file3_chunks + 1);

    // Completed session record is deleted.
    assert!(store.load(session_id).await.unwrap().is_none());
}

// ── Pause / resume over the wire ────────────────────────────────────────────

#[tokio::test]
async fn peer_pause_suspends_sending_until_resume() {
    let key = EncryptionKey::generate().unwrap();
    let data = patterned(CHUNK_SIZE * 8);
    let (a, mut b) = MemoryChannel::pair();

    // Park the sender in its backpressure wait before the first chunk so
    // the pause request deterministically lands before any data moves.
    let buffered = a.buffered_handle();
    buffered.store(usize::MAX, std::sync::atomic::Ordering::Release);

    let (sender, _control, _events) = Sender::new(a, key, vec![send_file("f", data)]);
    let sender_task = tokio::spawn(sender.run());

    // Metadata goes out before the chunk loop.
    match b.recv().await.unwrap() {
        WireMessage::Control(text) => {
            assert!(matches!(
                ControlMessage::decode(&text).unwrap(),
                ControlMessage::Metadata { .. }
            ));
        }
        other => panic!("expected metadata, got {other:?}"),
    }

    b.send(WireMessage::control(&ControlMessage::Pause).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    buffered.store(0, std::sync::atomic::Ordering::Release);

    // Paused: the backpressure is gone but no data may flow. The sender
    // first acknowledges the pause on the wire.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut saw_pause_ack = false;
    while let Some(msg) = b.try_recv() {
        match msg {
            WireMessage::Control(text) => {
                assert_eq!(
                    ControlMessage::decode(&text).unwrap(),
                    ControlMessage::Pause,
                    "only a pause acknowledgement may appear while paused"
                );
                saw_pause_ack = true;
            }
            WireMessage::Data(_) => panic!("data sent while paused"),
        }
    }
    assert!(saw_pause_ack);

    b.send(WireMessage::control(&ControlMessage::Resume).unwrap())
        .await
        .unwrap();
    sender_task.await.unwrap().unwrap();

    // After resume: a resume acknowledgement, every chunk exactly once, end.
    let messages = collect_messages(b).await;
    let mut data_chunks = 0;
    let mut saw_resume_ack = false;
    let mut saw_end = false;
    for msg in messages {
        match msg {
            WireMessage::Data(_) => data_chunks += 1,
            WireMessage::Control(text) => match ControlMessage::decode(&text).unwrap() {
                ControlMessage::Resume => saw_resume_ack = true,
                ControlMessage::End => saw_end = true,
                other => panic!("unexpected control: {other:?}"),
            },
        }
    }
    assert!(saw_resume_ack);
    assert!(saw_end);
    assert_eq!(
        data_chunks,
        (CHUNK_SIZE * 8 + AEAD_OVERHEAD).div_ceil(CHUNK_SIZE)
    );
}

// ── Scenario C: corruption ──────────────────────────────────────────────────

#[tokio::test]
async fn corrupted_ciphertext_fails_without_surfacing_a_file() {
    let key = EncryptionKey::generate().unwrap();
    let data = patterned(CHUNK_SIZE + 100);
    let (a, b) = MemoryChannel::pair();

    let (receiver, _control, mut events) = Receiver::new(b, key.clone());
    let receiver_task = tokio::spawn(receiver.run());

    a.send(
        WireMessage::control(&ControlMessage::Metadata {
            name: "evil.bin".into(),
            size: data.len() as u64,
            mime_type: "application/octet-stream".into(),
        })
        .unwrap(),
    )
    .await
    .unwrap();

    let (mut combined, _) = key.encrypt(&data).unwrap();
    combined[NONCE_LEN + 50] ^= 0x01; // flip one ciphertext bit
    for chunk in combined.chunks(CHUNK_SIZE) {
        a.send(WireMessage::Data(bytes::Bytes::copy_from_slice(chunk)))
            .await
            .unwrap();
    }
    a.send(WireMessage::control(&ControlMessage::End).unwrap())
        .await
        .unwrap();

    let err = receiver_task.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::AuthenticationFailed));

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            TransferEvent::FileReceived(_) => panic!("corrupt file must not be surfaced"),
            TransferEvent::SessionFailed { .. } => failed = true,
            _ => {}
        }
    }
    assert!(failed);
}

#[tokio::test]
async fn truncated_stream_fails_at_end_signal() {
    let key = EncryptionKey::generate().unwrap();
    let (a, b) = MemoryChannel::pair();
    let (receiver, _control, _events) = Receiver::new(b, key);
    let receiver_task = tokio::spawn(receiver.run());

    a.send(
        WireMessage::control(&ControlMessage::Metadata {
            name: "x".into(),
            size: 1000,
            mime_type: "text/plain".into(),
        })
        .unwrap(),
    )
    .await
    .unwrap();
    a.send(WireMessage::Data(bytes::Bytes::from_static(&[1, 2, 3])))
        .await
        .unwrap();
    a.send(WireMessage::control(&ControlMessage::End).unwrap())
        .await
        .unwrap();

    let err = receiver_task.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::TruncatedTransfer { got: 3, .. }));
}

// ── Scenario D: empty file ──────────────────────────────────────────────────

#[tokio::test]
async fn empty_file_round_trips_as_one_chunk() {
    let key = EncryptionKey::generate().unwrap();
    let (a, b) = MemoryChannel::pair();

    let (sender, _scontrol, _sevents) = Sender::new(a, key.clone(), vec![send_file("empty", vec![])]);
    let (receiver, _rcontrol, mut events) = Receiver::new(b, key);

    let sender_task = tokio::spawn(sender.run());
    let receiver_task = tokio::spawn(receiver.run());
    sender_task.await.unwrap().unwrap();
    receiver_task.await.unwrap().unwrap();

    let mut received = None;
    let mut chunk_events = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            TransferEvent::FileReceived(file) => received = Some(file),
            TransferEvent::Progress { .. } => chunk_events += 1,
            _ => {}
        }
    }
    let file = received.expect("empty file must still be surfaced");
    assert_eq!(file.entry.name, "empty");
    assert!(file.data.is_empty());
    // Nonce + tag fit in a single chunk.
    assert_eq!(chunk_events, 1);
}

// ── Channel lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn sending_on_unopened_channel_is_rejected() {
    let key = EncryptionKey::generate().unwrap();
    let (a, _b) = MemoryChannel::pair();
    a.close();

    let (sender, _control, _events) = Sender::new(a, key, vec![send_file("f", vec![1])]);
    let err = sender.run().await.unwrap_err();
    assert!(matches!(err, TransferError::ChannelNotReady));
}

#[tokio::test]
async fn channel_closing_mid_file_fails_the_session() {
    let key = EncryptionKey::generate().unwrap();
    let data = patterned(CHUNK_SIZE * 4);
    let (a, mut b) = MemoryChannel::pair();

    // Hold the sender in its backpressure wait so the close lands before
    // any chunk goes out.
    let buffered = a.buffered_handle();
    buffered.store(usize::MAX, std::sync::atomic::Ordering::Release);

    let (sender, _control, mut events) = Sender::new(a, key, vec![send_file("f", data)]);
    let sender_task = tokio::spawn(sender.run());

    // Take the metadata, then slam the channel shut.
    let _ = b.recv().await.unwrap();
    b.close();

    let err = sender_task.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::ChannelClosed));

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, TransferEvent::SessionFailed { .. }) {
            failed = true;
        }
    }
    assert!(failed);
}

// ── History sink ────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_records_terminal_status_on_both_sides() {
    let key = EncryptionKey::generate().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let sender_history = dropline::HistoryStore::open(dir.path().join("sent.jsonl"))
        .await
        .unwrap();
    let receiver_history = dropline::HistoryStore::open(dir.path().join("received.jsonl"))
        .await
        .unwrap();

    let (a, b) = MemoryChannel::pair();
    let (sender, _sc, _se) = Sender::new(a, key.clone(), vec![send_file("doc.txt", patterned(64))]);
    let sender = sender.with_history(sender_history.clone());
    let (receiver, _rc, _re) = Receiver::new(b, key);
    let receiver = receiver.with_history(receiver_history.clone());

    tokio::spawn(sender.run()).await.unwrap().unwrap();
    tokio::spawn(receiver.run()).await.unwrap().unwrap();

    let sent = sender_history.list().await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, TransferStatus::Completed);
    assert_eq!(sent[0].file_name, "doc.txt");
    assert_eq!(sent[0].file_count, 1);

    let received = receiver_history.list().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].status, TransferStatus::Completed);
}
