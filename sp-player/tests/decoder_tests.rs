//! Decoder and end-to-end playback tests over real WAV files

mod helpers;

use helpers::*;
use sp_player::audio::{Decoder, ManualDevice, MediaLocation, SymphoniaDecoder};
use sp_player::player::{open_player, DeviceSelection};
use sp_player::sink::SinkKind;
use sp_player::{AudioPlayer, Error, PlayerConfig, QueuePlayer};

fn open_decoder(file: &TestFile) -> SymphoniaDecoder {
    let location = MediaLocation::from_path(&file.path);
    SymphoniaDecoder::open(&location).unwrap()
}

#[test]
fn test_wav_format_and_length() {
    let file = sine_file("tone.wav", TEST_SAMPLE_RATE, 1000);
    let decoder = open_decoder(&file);

    let format = decoder.format();
    assert_eq!(format.sample_rate, TEST_SAMPLE_RATE);
    assert_eq!(format.channels, 2);
    assert_eq!(decoder.total_frames(), Some(1000));
}

#[test]
fn test_chunked_reads_cover_whole_file() {
    let file = sine_file("tone.wav", TEST_SAMPLE_RATE, 1000);
    let mut decoder = open_decoder(&file);
    let mut out = vec![0.0f32; 256 * 2];

    let mut total = 0;
    loop {
        let frames = decoder.read_next(&mut out, 256).unwrap();
        if frames == 0 {
            break;
        }
        assert!(frames <= 256);
        assert!(out[..frames * 2].iter().all(|s| s.abs() <= 0.51));
        total += frames;
    }
    assert_eq!(total, 1000);

    // End of stream is sticky
    assert_eq!(decoder.read_next(&mut out, 256).unwrap(), 0);
}

#[test]
fn test_close_ends_stream() {
    let file = sine_file("tone.wav", TEST_SAMPLE_RATE, 1000);
    let mut decoder = open_decoder(&file);
    let mut out = vec![0.0f32; 128 * 2];

    assert!(decoder.read_next(&mut out, 128).unwrap() > 0);
    decoder.close();
    assert_eq!(decoder.read_next(&mut out, 128).unwrap(), 0);
}

#[test]
fn test_file_url_with_escaped_spaces() {
    let file = sine_file("my song.wav", TEST_SAMPLE_RATE, 100);
    let url = format!("file://{}", file.path.display()).replace(' ', "%20");

    let location = MediaLocation::parse(&url).unwrap();
    assert_eq!(location.path(), file.path.as_path());
    assert_eq!(location.extension().as_deref(), Some("wav"));
}

#[test]
fn test_missing_file_is_not_found() {
    let file = sine_file("tone.wav", TEST_SAMPLE_RATE, 100);
    let missing = file.dir.path().join("missing.wav");

    let result = MediaLocation::parse(&missing.display().to_string());
    assert!(matches!(result, Err(Error::NotFound(_))));

    let result = MediaLocation::parse("http://example.com/tone.wav");
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn test_garbage_file_is_unsupported() {
    let file = garbage_file("noise.wav");
    let location = MediaLocation::from_path(&file.path);

    match SymphoniaDecoder::open(&location) {
        Err(Error::UnsupportedFormat(_)) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("garbage decoded"),
    }
}

#[test]
fn test_wav_through_manual_device() {
    let file = sine_file("tone.wav", TEST_SAMPLE_RATE, 1000);
    let decoder = open_decoder(&file);
    let (device, driver) = ManualDevice::new(decoder.format());

    let player = QueuePlayer::with_parts(
        Box::new(decoder),
        Box::new(device),
        &engine_config(3, 256),
    )
    .unwrap();
    assert_eq!(player.duration().map(|d| d.as_millis()), Some(22));

    let stopped = wait_until(WAIT_TIMEOUT, || {
        driver.render(128);
        player.is_stopped()
    });

    assert!(stopped);
    assert!(player.fault().is_none());
    assert_eq!(player.frames_rendered(), 1000);
    assert_eq!(player.decoded_frames(), 1000);
    assert_eq!(player.completed_buffers(), 4);
}

#[test]
fn test_clocked_device_plays_to_end_for_every_backend() {
    let file = sine_file("tone.wav", TEST_SAMPLE_RATE, 4410);
    let url = file.path.display().to_string();

    let mut config = PlayerConfig::default();
    config.engine = engine_config(4, 1024);

    for kind in [SinkKind::Queue, SinkKind::Render, SinkKind::Source] {
        let player = open_player(kind, &url, &config, DeviceSelection::Clocked).unwrap();

        assert!(player.wait_until_stopped(WAIT_TIMEOUT), "{} player", kind);
        assert!(player.fault().is_none());
        assert_eq!(player.frames_rendered(), 4410, "{} player", kind);
        assert!(player.frames_per_second() > 0.0);
        assert!(player.frames_per_second() <= TEST_SAMPLE_RATE as f64 + 1e-6);
    }
}

#[test]
fn test_open_player_rejects_garbage() {
    let file = garbage_file("noise.wav");
    let url = file.path.display().to_string();

    let result = open_player(
        SinkKind::Queue,
        &url,
        &PlayerConfig::default(),
        DeviceSelection::Clocked,
    );
    assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
}
