// 端到端识别场景

mod common;

use std::time::Duration;
use approx::assert_abs_diff_eq;
use audiomatch::config::SAMPLE_RATE;
use audiomatch::ErrorKind;
use common::{add_noise, engine, write_wav, Song};

#[test]
fn test_noisy_clip_found_at_ninety_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let a = Song::random(1, 180.0);
    let b = Song::random(2, 120.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("A.wav"), &a.render_all(), SAMPLE_RATE))
        .unwrap();
    engine
        .ingest_file(&write_wav(&dir.path().join("B.wav"), &b.render_all(), SAMPLE_RATE))
        .unwrap();

    let clip = add_noise(&a.render(SAMPLE_RATE, 90.0, 5.0), 0.05, 7);
    let clip_path = write_wav(&dir.path().join("clip.wav"), &clip, SAMPLE_RATE);

    let report = engine.query_file(&clip_path, None).unwrap();
    let top = &report.matches[0];
    assert_eq!(top.track_id, "a.wav");
    assert_eq!(top.filename, "A.wav");
    assert!(top.score >= 5);
    assert_abs_diff_eq!(top.offset_secs, 90.0, epsilon = 0.15);

    if let Some(other) = report.matches.iter().find(|m| m.track_id == "b.wav") {
        assert!(other.score * 4 < top.score, "b too close: {} vs {}", other.score, top.score);
    }
}

#[test]
fn test_unmodified_subclip_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(11, 60.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("song.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();

    let clip = song.render(SAMPLE_RATE, 30.0, 4.0);
    let report = engine.query_samples(&clip, None).unwrap();
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].track_id, "song.wav");
    assert!(report.matches[0].similarity > 20.0);
    assert_abs_diff_eq!(report.matches[0].offset_secs, 30.0, epsilon = 0.1);
}

#[test]
fn test_offset_between_hops() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(21, 60.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("song.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();

    let clip = song.render(SAMPLE_RATE, 47.31, 5.0);
    let report = engine.query_samples(&clip, None).unwrap();
    assert_eq!(report.matches[0].track_id, "song.wav");
    assert_abs_diff_eq!(report.matches[0].offset_secs, 47.31, epsilon = 0.1);
}

#[test]
fn test_resampled_query_matches() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(31, 40.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("song.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();

    // 以 22050 Hz 录制的片段，解码时重采样
    let clip = song.render(22050, 12.0, 5.0);
    let clip_path = write_wav(&dir.path().join("clip.wav"), &clip, 22050);
    let report = engine.query_file(&clip_path, None).unwrap();
    assert_eq!(report.matches[0].track_id, "song.wav");
    assert_abs_diff_eq!(report.matches[0].offset_secs, 12.0, epsilon = 0.15);
}

#[test]
fn test_quiet_recording_matches() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(35, 40.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("song.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();

    // 约 -40 dB 的录音，写成 16 位 WAV 后只剩百来个量化级
    let quiet: Vec<f32> = song.render(SAMPLE_RATE, 18.0, 5.0).iter().map(|s| s * 0.01).collect();
    let clip_path = write_wav(&dir.path().join("quiet.wav"), &quiet, SAMPLE_RATE);
    let report = engine.query_file(&clip_path, None).unwrap();
    assert!(report.query_tokens > 100);
    assert_eq!(report.matches[0].track_id, "song.wav");
    assert_abs_diff_eq!(report.matches[0].offset_secs, 18.0, epsilon = 0.1);
}

#[test]
fn test_silence_and_tiny_queries_are_empty() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(41, 20.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("song.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();

    let silence = write_wav(&dir.path().join("silence.wav"), &vec![0.0; SAMPLE_RATE as usize * 3], SAMPLE_RATE);
    assert!(engine.query_file(&silence, None).unwrap().matches.is_empty());

    let tiny = song.render(SAMPLE_RATE, 5.0, 0.05);
    assert!(engine.query_samples(&tiny, None).unwrap().matches.is_empty());
    assert!(engine.query_samples(&[], None).unwrap().matches.is_empty());
}

#[test]
fn test_unrelated_audio_has_no_match() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(51, 60.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("song.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();

    // 偶然的哈希碰撞可能越过票数门限，但只占查询令牌的极小部分
    let stranger = Song::random(52, 5.0).render_all();
    let report = engine.query_samples(&stranger, None).unwrap();
    assert!(report.query_tokens > 500);
    assert!(report.matches.iter().all(|m| m.similarity < 5.0), "{:?}", report.matches);

    let own = engine.query_samples(&song.render(SAMPLE_RATE, 10.0, 5.0), None).unwrap();
    assert!(own.matches[0].similarity > 20.0);
}

#[test]
fn test_zero_timeout_and_bad_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let song = Song::random(61, 20.0);
    engine
        .ingest_file(&write_wav(&dir.path().join("song.wav"), &song.render_all(), SAMPLE_RATE))
        .unwrap();
    let entries = engine.index().len();

    let clip = write_wav(&dir.path().join("clip.wav"), &song.render(SAMPLE_RATE, 3.0, 4.0), SAMPLE_RATE);
    let err = engine.query_file(&clip, Some(Duration::ZERO)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(engine.index().len(), entries);

    // 宽松的超时下同一查询成功
    assert!(!engine.query_file(&clip, Some(Duration::from_secs(60))).unwrap().matches.is_empty());

    let text = dir.path().join("notes.txt");
    std::fs::write(&text, "hello").unwrap();
    assert_eq!(engine.query_file(&text, None).unwrap_err().kind(), ErrorKind::UnsupportedFormat);

    let empty = write_wav(&dir.path().join("empty.wav"), &[], SAMPLE_RATE);
    assert_eq!(engine.query_file(&empty, None).unwrap_err().kind(), ErrorKind::CorruptAudio);
}
