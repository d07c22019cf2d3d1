// 数据集生命周期：替换、删除、持久化、并发、损坏与重建

mod common;

use std::sync::Arc;
use audiomatch::config::SAMPLE_RATE;
use audiomatch::{Engine, ErrorKind};
use common::{config, engine, write_wav, Song};

#[test]
fn test_reingest_replaces_old_entries() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let first = Song::random(101, 30.0);
    let second = Song::random(102, 30.0);
    let path = dir.path().join("song.wav");

    write_wav(&path, &first.render_all(), SAMPLE_RATE);
    let old = engine.ingest_file(&path).unwrap();
    write_wav(&path, &second.render_all(), SAMPLE_RATE);
    let new = engine.ingest_file(&path).unwrap();

    assert_eq!(old.id, new.id);
    assert_ne!(old.content_hash, new.content_hash);
    assert_eq!(engine.list().len(), 1);
    assert_eq!(engine.index().len(), new.fingerprint_count);

    let old_clip = first.render(SAMPLE_RATE, 10.0, 5.0);
    let report = engine.query_samples(&old_clip, None).unwrap();
    assert!(report.matches.iter().all(|m| m.similarity < 5.0), "{:?}", report.matches);

    let new_clip = second.render(SAMPLE_RATE, 10.0, 5.0);
    let report = engine.query_samples(&new_clip, None).unwrap();
    assert_eq!(report.matches[0].track_id, "song.wav");
}

#[test]
fn test_remove_twice_and_query_after_removal() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(111, 20.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("gone.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();

    assert!(engine.remove("gone.wav").unwrap());
    assert!(!engine.remove("gone.wav").unwrap());
    assert!(engine.list().is_empty());
    assert!(engine.index().is_empty());

    let report = engine.query_samples(&song.render(SAMPLE_RATE, 5.0, 4.0), None).unwrap();
    assert!(report.matches.is_empty());
}

#[test]
fn test_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let song = Song::random(121, 30.0);
    {
        let engine = engine(dir.path());
        engine
            .ingest_file(&write_wav(&dir.path().join("kept.wav"), &song.render_all(), SAMPLE_RATE))
            .unwrap();
    }

    let engine = engine(dir.path());
    assert_eq!(engine.list().len(), 1);
    let report = engine.query_samples(&song.render(SAMPLE_RATE, 12.0, 4.0), None).unwrap();
    assert_eq!(report.matches[0].track_id, "kept.wav");
}

#[test]
fn test_concurrent_queries_match_single_threaded_run() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(dir.path()));
    let songs: Vec<Song> = (0..3).map(|i| Song::random(200 + i, 40.0)).collect();
    for (i, song) in songs.iter().enumerate() {
        let path = write_wav(&dir.path().join(format!("s{}.wav", i)), &song.render_all(), SAMPLE_RATE);
        engine.ingest_file(&path).unwrap();
    }

    let clips: Vec<Vec<f32>> = songs
        .iter()
        .map(|s| s.render(SAMPLE_RATE, 15.0, 4.0))
        .collect();
    let summarize = |engine: &Engine, clip: &[f32]| -> Vec<(String, u32, i64)> {
        engine
            .query_samples(clip, None)
            .unwrap()
            .matches
            .into_iter()
            .map(|m| (m.track_id, m.score, m.offset_frames))
            .collect()
    };
    let expected: Vec<_> = clips.iter().map(|c| summarize(&engine, c)).collect();

    // 查询的同时入库一首无关曲目
    let extra = Song::random(299, 40.0);
    let extra_path = write_wav(&dir.path().join("extra.wav"), &extra.render_all(), SAMPLE_RATE);

    std::thread::scope(|scope| {
        let writer = {
            let engine = engine.clone();
            let path = extra_path.clone();
            scope.spawn(move || engine.ingest_file(&path).unwrap())
        };

        let readers: Vec<_> = (0..6)
            .map(|t| {
                let engine = engine.clone();
                let clips = &clips;
                let expected = &expected;
                let summarize = &summarize;
                scope.spawn(move || {
                    for round in 0..3 {
                        let i = (t + round) % clips.len();
                        let got = summarize(&engine, &clips[i]);
                        let got: Vec<_> = got.into_iter().filter(|m| m.0 != "extra.wav").collect();
                        assert_eq!(got, expected[i]);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    });

    assert_eq!(engine.list().len(), 4);
}

#[test]
fn test_orphan_entries_surface_as_corruption_until_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset");
    std::fs::create_dir_all(&dataset).unwrap();
    let a = Song::random(301, 30.0);
    let b = Song::random(302, 30.0);
    write_wav(&dataset.join("a.wav"), &a.render_all(), SAMPLE_RATE);
    let outside = write_wav(&dir.path().join("b.wav"), &b.render_all(), SAMPLE_RATE);

    let cfg = config(dir.path(), Some(dataset.clone()));
    {
        let engine = Engine::new(&cfg).unwrap();
        let report = engine.ingest_dir(&dataset).unwrap();
        assert_eq!(report.ingested.len(), 1);
        engine.ingest_file(&outside).unwrap();
    }

    {
        let conn = rusqlite::Connection::open(cfg.storage.index_path()).unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute(
            "INSERT INTO fingerprints (hash, track_id, frame_offset) VALUES (42, 'phantom.wav', 7)",
            [],
        )
        .unwrap();
    }

    let engine = Engine::new(&cfg).unwrap();
    let clip = a.render(SAMPLE_RATE, 8.0, 4.0);
    let err = engine.query_samples(&clip, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexCorruption);

    let report = engine.rebuild().unwrap();
    assert_eq!(report.ingested, vec!["a.wav".to_string(), "b.wav".to_string()]);
    assert!(report.failed.is_empty());

    assert_eq!(engine.query_samples(&clip, None).unwrap().matches[0].track_id, "a.wav");
    let clip_b = b.render(SAMPLE_RATE, 8.0, 4.0);
    assert_eq!(engine.query_samples(&clip_b, None).unwrap().matches[0].track_id, "b.wav");
}

#[test]
fn test_verify_catches_external_writes_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset");
    std::fs::create_dir_all(&dataset).unwrap();
    let song = Song::random(351, 20.0);
    write_wav(&dataset.join("live.wav"), &song.render_all(), SAMPLE_RATE);

    let cfg = config(dir.path(), Some(dataset.clone()));
    let engine = Engine::new(&cfg).unwrap();
    engine.ingest_dir(&dataset).unwrap();
    engine.verify().unwrap();

    let conn = rusqlite::Connection::open(cfg.storage.index_path()).unwrap();
    conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
    conn.execute(
        "INSERT INTO fingerprints (hash, track_id, frame_offset) VALUES (7, 'phantom.wav', 3)",
        [],
    )
    .unwrap();
    drop(conn);

    assert_eq!(engine.verify().unwrap_err().kind(), ErrorKind::IndexCorruption);
    let clip = song.render(SAMPLE_RATE, 6.0, 4.0);
    assert_eq!(engine.query_samples(&clip, None).unwrap_err().kind(), ErrorKind::IndexCorruption);

    let report = engine.rebuild().unwrap();
    assert_eq!(report.ingested, vec!["live.wav".to_string()]);
    engine.verify().unwrap();
    assert_eq!(engine.query_samples(&clip, None).unwrap().matches[0].track_id, "live.wav");
}

#[test]
fn test_garbage_index_file_is_recovered_by_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset");
    std::fs::create_dir_all(&dataset).unwrap();
    let song = Song::random(401, 20.0);
    write_wav(&dataset.join("only.wav"), &song.render_all(), SAMPLE_RATE);

    let cfg = config(dir.path(), Some(dataset));
    std::fs::create_dir_all(&cfg.storage.data_dir).unwrap();
    std::fs::write(cfg.storage.index_path(), vec![0x42u8; 4096]).unwrap();

    let engine = Engine::new(&cfg).unwrap();
    assert!(engine.index().corruption().is_some());
    let clip = song.render(SAMPLE_RATE, 4.0, 4.0);
    assert_eq!(engine.query_samples(&clip, None).unwrap_err().kind(), ErrorKind::IndexCorruption);

    let report = engine.rebuild().unwrap();
    assert_eq!(report.ingested, vec!["only.wav".to_string()]);
    assert!(engine.index().corruption().is_none());
    assert_eq!(engine.query_samples(&clip, None).unwrap().matches[0].track_id, "only.wav");
}

#[test]
fn test_failed_ingest_keeps_previous_track() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(501, 20.0);
    let path = write_wav(&dir.path().join("stable.wav"), &song.render_all(), SAMPLE_RATE);
    let before = engine.ingest_file(&path).unwrap();

    std::fs::write(&path, b"RIFF....WAVEjunk").unwrap();
    assert!(engine.ingest_file(&path).is_err());

    let tracks = engine.list();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].content_hash, before.content_hash);
    assert_eq!(engine.index().len(), before.fingerprint_count);
}
