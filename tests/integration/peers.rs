use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lixnet_core::wire::{self, Envelope, Frame};
use lixnet_peer::{AbandonReason, Diagnostic, EventContext, PeerError, RejectReason};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Peer ↔ peer over an in-memory link
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    title: String,
    body: String,
}

fn is_chunk_line(text: &str) -> bool {
    !text.trim_start().starts_with('{')
}

#[tokio::test]
async fn test_request_reply_unchunked() {
    let link = Link::new(None);
    link.bob.on("add", |pair: (i64, i64), _ctx| async move {
        anyhow::Ok(pair.0 + pair.1)
    });

    let sum: i64 = tokio::time::timeout(WAIT, link.alice.request("add", &(2, 40)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sum, 42);
    assert_eq!(link.alice.pending_calls(), 0);
}

#[tokio::test]
async fn test_round_trip_across_payload_sizes() {
    let link = Link::new(Some(200));
    link.bob.on("store", |note: Note, _ctx| async move { anyhow::Ok(note) });

    // From empty up to several times the budget, with multi-byte text.
    for size in [0usize, 1, 100, 149, 150, 151, 400, 1000, 2500] {
        let note = Note {
            title: format!("size {size}"),
            body: "é".repeat(size / 2) + &"x".repeat(size % 2),
        };
        let back: Note = tokio::time::timeout(WAIT, link.alice.request("store", &note))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back, note, "size {size}");
    }

    assert!(link.alice.outbound_transmissions().is_empty());
    assert!(link.bob.inbound_transmissions().is_empty());
    assert_eq!(link.alice.pending_calls(), 0);
}

#[tokio::test]
async fn test_handlers_can_call_back_through_context() {
    let link = Link::new(Some(120));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    link.alice.on("notify", move |text: String, _ctx| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(text);
            anyhow::Ok(())
        }
    });
    link.bob.on("shout", |text: String, ctx: EventContext| async move {
        let loud = text.to_uppercase();
        ctx.peer.call("notify", &loud)?;
        anyhow::Ok(loud.len())
    });

    let text = "quiet ".repeat(40);
    let len: usize = tokio::time::timeout(WAIT, link.alice.request("shout", &text))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(len, text.len());

    let notified = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(notified, text.to_uppercase());
}

#[tokio::test]
async fn test_chunks_only_after_launch_in_index_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let link = Link::with_filters(
        Some(100),
        move |text: String| {
            log.lock().unwrap().push(text.clone());
            vec![text]
        },
        pass,
    );
    link.bob.on("sink", |_: Value, _ctx| async move { anyhow::Ok(true) });

    let ok: bool = tokio::time::timeout(WAIT, link.alice.request("sink", &"q".repeat(500)))
        .await
        .unwrap()
        .unwrap();
    assert!(ok);

    let frames = seen.lock().unwrap().clone();
    let parsed: Vec<Frame> = frames.iter().map(|f| wire::decode(f).unwrap()).collect();
    assert!(matches!(
        parsed[0],
        Frame::Envelope(Envelope::Announce { .. })
    ));
    let indexes: Vec<u32> = parsed[1..]
        .iter()
        .map(|f| match f {
            Frame::Chunk(line) => line.index,
            other => panic!("expected chunk line, got {other:?}"),
        })
        .collect();
    assert!(indexes.len() > 1);
    assert_eq!(indexes, (0..indexes.len() as u32).collect::<Vec<_>>());
    assert!(frames.iter().all(|f| f.len() <= 100));
}

#[tokio::test]
async fn test_duplicate_chunks_do_not_change_result() {
    let link = Link::with_filters(
        Some(100),
        |text: String| {
            if is_chunk_line(&text) {
                vec![text.clone(), text]
            } else {
                vec![text]
            }
        },
        pass,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    link.bob.on("count", move |text: String, _ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { anyhow::Ok(text) }
    });

    let text: String = ('a'..='z').cycle().take(600).collect();
    let back: String = tokio::time::timeout(WAIT, link.alice.request("count", &text))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(back, text);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reversed_chunk_order_reassembles() {
    // Hold alice's chunk lines until the whole batch is in, then deliver
    // them last-to-first.
    let held = Arc::new(Mutex::new(Vec::new()));
    let expected = Arc::new(AtomicUsize::new(usize::MAX));
    let (held_in, expected_in) = (held.clone(), expected.clone());
    let link = Link::with_filters(
        Some(100),
        move |text: String| {
            if !is_chunk_line(&text) {
                if let Ok(Frame::Envelope(Envelope::Announce { chunk_count, .. })) =
                    wire::decode(&text)
                {
                    expected_in.store(chunk_count as usize, Ordering::SeqCst);
                }
                return vec![text];
            }
            let mut held = held_in.lock().unwrap();
            held.push(text);
            if held.len() == expected_in.load(Ordering::SeqCst) {
                held.drain(..).rev().collect()
            } else {
                Vec::new()
            }
        },
        pass,
    );
    link.bob.on("echo", |v: Value, _ctx| async move { anyhow::Ok(v) });

    let input = serde_json::json!({"items": (0..80).collect::<Vec<u32>>()});
    let back: Value = tokio::time::timeout(WAIT, link.alice.request("echo", &input))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(back, input);
    assert!(expected.load(Ordering::SeqCst) > 2);
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() {
    let link = Link::new(Some(150));
    link.bob.on("rev", |s: String, _ctx| async move {
        anyhow::Ok(s.chars().rev().collect::<String>())
    });

    let mut tasks = Vec::new();
    for i in 0..16usize {
        let alice = link.alice.clone();
        tasks.push(tokio::spawn(async move {
            let text = format!("{i}-").repeat(10 + i * 15);
            let back: String = alice.request("rev", &text).await.unwrap();
            (text, back)
        }));
    }
    for task in tasks {
        let (text, back) = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(back, text.chars().rev().collect::<String>());
    }
    assert_eq!(link.alice.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_chunks_are_abandoned_and_caller_never_hears() {
    let link = Link::with_filters(
        Some(100),
        |text: String| if is_chunk_line(&text) { Vec::new() } else { vec![text] },
        pass,
    );
    let mut diag = link.bob.subscribe_diagnostics();
    link.bob.on("sink", |_: Value, _ctx| async move { anyhow::Ok(true) });

    let outcome = tokio::time::timeout(
        Duration::from_secs(120),
        link.alice.request::<_, bool>("sink", &"q".repeat(500)),
    )
    .await;
    assert!(outcome.is_err(), "request should still be waiting");

    // Correlation id LX-a1, transmission id LX-a2.
    assert_eq!(
        diag.try_recv().unwrap(),
        Diagnostic::Abandoned {
            transmission_id: "LX-a2".into(),
            reason: AbandonReason::Stalled,
        }
    );
    assert!(link.bob.inbound_transmissions().is_empty());
    assert_eq!(link.alice.pending_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refused_announcement_releases_the_sender() {
    let link = Link::new(Some(100));
    link.alice.set_transmission_chunks_limit(50);
    link.bob.set_transmission_chunks_limit(3);
    let mut bob_diag = link.bob.subscribe_diagnostics();
    let mut alice_diag = link.alice.subscribe_diagnostics();
    link.bob.on("sink", |_: Value, _ctx| async move { anyhow::Ok(true) });

    let text = "q".repeat(500);
    let outcome = tokio::time::timeout(
        Duration::from_secs(3600),
        link.alice.request::<_, bool>("sink", &text),
    )
    .await;
    assert!(matches!(outcome, Ok(Err(PeerError::Closed))));

    assert!(matches!(
        bob_diag.try_recv(),
        Ok(Diagnostic::AnnouncementRejected {
            reason: RejectReason::TooManyChunks { limit: 3 },
            ..
        })
    ));
    assert_eq!(
        alice_diag.try_recv().unwrap(),
        Diagnostic::LaunchTimedOut {
            transmission_id: "LX-a2".into()
        }
    );
    assert!(link.alice.outbound_transmissions().is_empty());
    assert_eq!(link.alice.pending_calls(), 0);
}

#[tokio::test]
async fn test_unbounded_link_sends_large_payloads_whole() {
    let frames = Arc::new(AtomicUsize::new(0));
    let counter = frames.clone();
    let link = Link::with_filters(
        None,
        move |text: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![text]
        },
        pass,
    );
    link.bob.on("len", |text: String, _ctx| async move { anyhow::Ok(text.len()) });

    let text = "w".repeat(64 * 1024);
    let len: usize = tokio::time::timeout(WAIT, link.alice.request("len", &text))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(len, text.len());
    assert_eq!(frames.load(Ordering::SeqCst), 1);
}
