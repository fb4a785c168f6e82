mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

use common::{
    MockServer, SONG_DURATION, SONG_SIZE, directory, settings, song, song_bytes, song_json,
};
use rangeplay::config::Config;
use rangeplay::player::{DecoderBuffer, HeadlessPlayer, MediaElement};
use rangeplay::services::{ResolutionStrategy, ServerDirectory};
use rangeplay::stream::{PlaybackStatus, SessionEvent, Streamer};
use rangeplay::StreamError;

fn headless() -> HeadlessPlayer {
    HeadlessPlayer::new(SONG_SIZE, SONG_DURATION)
}

#[tokio::test]
async fn test_failover_to_third_server_then_sticky() {
    let first = MockServer::dead().await;
    let second = MockServer::dead().await;
    let mut third = MockServer::alive().await;
    let data = song_bytes(SONG_SIZE);
    let _chunks = third.serve_chunks(1, &data).await;

    let directory = directory(&[&first, &second, &third]);
    let streamer = Streamer::new(Arc::clone(&directory), settings());

    assert_eq!(directory.resolve().await, Some(third.endpoint()));
    assert_eq!(directory.current_index(), 2);

    let player = headless();
    let session = streamer
        .open_session(
            song(1, "Song", "Band"),
            Arc::new(player.clone()),
            Arc::new(player.clone()),
        )
        .await
        .unwrap();
    player.open();
    session.start().await.unwrap();
    session.seek(95.0).await.unwrap();

    assert_eq!(session.ledger().await.entries(), &[0, 9]);
    assert_eq!(directory.current_index(), 2);
    assert_eq!(directory.current(), Some(&third.endpoint()));
}

#[tokio::test]
async fn test_seek_outside_buffer_issues_exactly_one_fetch() {
    let mut server = MockServer::alive().await;
    let data = song_bytes(SONG_SIZE);
    let chunks = server.serve_chunks(1, &data).await;

    let streamer = Streamer::new(directory(&[&server]), settings());
    let player = headless();
    let session = streamer
        .open_session(
            song(1, "Song", "Band"),
            Arc::new(player.clone()),
            Arc::new(player.clone()),
        )
        .await
        .unwrap();

    player.open();
    session.start().await.unwrap();
    player.wait_idle().await;
    assert_eq!(player.buffered().await.len(), 1);
    assert!(!player.buffered().await[0].contains(50.0));

    session.seek(50.0).await.unwrap();

    // 50s of 160s -> byte 5000 -> chunk 5; each served chunk is hit exactly once
    for (index, mock) in chunks.iter().enumerate() {
        assert_eq!(
            mock.matched_async().await,
            index == 0 || index == 5,
            "chunk {}",
            index
        );
    }
    assert_eq!(player.current_time(), 50.0);
    assert!(!player.is_paused());
    assert_eq!(session.status(), PlaybackStatus::Playing);
}

#[tokio::test]
async fn test_full_playback_reassembles_song() {
    let mut server = MockServer::alive().await;
    let data = song_bytes(SONG_SIZE);
    let _chunks = server.serve_chunks(1, &data).await;

    let temp_dir = TempDir::new().unwrap();
    let sink = temp_dir.path().join("song.mp3");
    let player = HeadlessPlayer::with_sink(SONG_SIZE, SONG_DURATION, &sink)
        .await
        .unwrap();

    let streamer = Streamer::new(directory(&[&server]), settings());
    let session = streamer
        .open_session(
            song(1, "Song", "Band"),
            Arc::new(player.clone()),
            Arc::new(player.clone()),
        )
        .await
        .unwrap();

    player.open();
    session.start().await.unwrap();
    session.play().await.unwrap();

    for _ in 0..400 {
        player.advance(2.0).await;
        session.on_time_update().await.unwrap();
        player.wait_idle().await;
        if player.is_ended() {
            break;
        }
    }

    assert!(player.is_ended());
    assert_eq!(session.status(), PlaybackStatus::Ended);
    assert_eq!(
        session.ledger().await.entries(),
        (0..16).collect::<Vec<u64>>().as_slice()
    );
    assert_eq!(player.violations(), 0);
    assert_eq!(tokio::fs::read(&sink).await.unwrap(), data);
}

#[tokio::test]
async fn test_missing_song_exhausts_retries() {
    let mut server = MockServer::alive().await;
    let _missing = server.missing_song(1).await;

    let streamer = Streamer::new(directory(&[&server]), settings());
    let player = headless();
    let session = streamer
        .open_session(
            song(1, "Song", "Band"),
            Arc::new(player.clone()),
            Arc::new(player.clone()),
        )
        .await
        .unwrap();

    player.open();
    let err = session.start().await.unwrap_err();

    assert!(matches!(
        err,
        StreamError::RetriesExhausted {
            chunk_index: 0,
            attempts: 3,
            ..
        }
    ));
    assert!(session.status().is_failed());
}

#[tokio::test]
async fn test_no_server_available_fails_visibly() {
    let first = MockServer::dead().await;
    let second = MockServer::dead().await;

    let streamer = Streamer::new(directory(&[&first, &second]), settings());
    let player = headless();
    let session = streamer
        .open_session(
            song(1, "Song", "Band"),
            Arc::new(player.clone()),
            Arc::new(player.clone()),
        )
        .await
        .unwrap();

    player.open();
    assert_eq!(
        session.start().await.unwrap_err(),
        StreamError::NoServerAvailable { candidates: 2 }
    );
    assert_eq!(
        session.status(),
        PlaybackStatus::Failed(StreamError::NoServerAvailable { candidates: 2 }.to_string())
    );
}

#[tokio::test]
async fn test_each_session_discovers_its_own_streamers() {
    let mut primary = MockServer::alive().await;
    let mut node = MockServer::alive().await;

    let _first_missing = primary.missing_song(1).await;
    let _second_missing = primary.missing_song(2).await;
    let first_lookup = primary.serve_streamers("First-Band", &[&node]).await;
    let second_lookup = primary.serve_streamers("Second-Band", &[&node]).await;

    let data = song_bytes(SONG_SIZE);
    let _first_chunks = node.serve_chunks(1, &data).await;
    let _second_chunks = node.serve_chunks(2, &data).await;

    let directory = Arc::new(
        ServerDirectory::new(vec![primary.endpoint()])
            .with_strategy(ResolutionStrategy::Discovery),
    );
    let streamer = Streamer::new(directory, settings());

    for (id, title) in [(1, "First"), (2, "Second")] {
        let player = headless();
        let session = streamer
            .open_session(
                song(id, title, "Band"),
                Arc::new(player.clone()),
                Arc::new(player.clone()),
            )
            .await
            .unwrap();

        player.open();
        session.start().await.unwrap();
        session.seek(30.0).await.unwrap();

        assert_eq!(session.ledger().await.entries(), &[0, 3]);
        assert_eq!(session.stats().failovers.load(Ordering::Relaxed), 2);
        session.close().await;
    }

    // One lookup per song, reused within its session
    first_lookup.assert_async().await;
    second_lookup.assert_async().await;
}

#[tokio::test]
async fn test_event_driver_plays_through_seek() {
    let mut server = MockServer::alive().await;
    let data = song_bytes(SONG_SIZE);
    let _chunks = server.serve_chunks(1, &data).await;

    let streamer = Streamer::new(directory(&[&server]), settings());
    let player = headless();
    let session = streamer
        .open_session(
            song(1, "Song", "Band"),
            Arc::new(player.clone()),
            Arc::new(player.clone()),
        )
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let cancel = tokio_util::sync::CancellationToken::new();
    let driver = tokio::spawn(Arc::clone(&session).run(rx, cancel.clone()));

    player.open();
    session.start().await.unwrap();
    tx.send(SessionEvent::Play).await.unwrap();
    tx.send(SessionEvent::Seek(120.0)).await.unwrap();

    let mut status = session.subscribe_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == PlaybackStatus::Playing && player.current_time() == 120.0),
    )
    .await
    .unwrap()
    .unwrap();

    for _ in 0..10 {
        player.advance(1.0).await;
        tx.send(SessionEvent::TimeUpdate).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
    driver.await.unwrap().unwrap();

    let ledger = session.ledger().await;
    assert!(ledger.contains(12));
    assert!(ledger.contains(13));
    assert_eq!(player.violations(), 0);
}

#[tokio::test]
async fn test_config_file_drives_catalog() {
    let mut server = MockServer::alive().await;
    server
        .serve_catalog(vec![song_json(1, "One", "A"), song_json(2, "Two", "B")])
        .await;

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            "[network]\nservers = [\"{}\"]\nprobe_timeout_ms = 500\n",
            server.server.url()
        ),
    )
    .unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    let streamer = Streamer::from_config(&config).unwrap();

    let songs = streamer.catalog().list_songs().await.unwrap();
    assert_eq!(songs.len(), 2);
    assert_eq!(streamer.catalog().find("2").await.unwrap().title, "Two");
}
