//! HTTP-level tests against mock endpoints: upload shapes, probe caching,
//! and deterministic failover ordering.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voicemode::audio::AudioBuffer;
use voicemode::codec::AudioFormat;
use voicemode::providers::{Endpoint, ProviderKind, Registry};
use voicemode::stt::SttUploader;
use voicemode::tts::{SpeakRequest, TtsStreamer};
use voicemode::Settings;

fn settings_for(stt_urls: &[String], tts_urls: &[String]) -> Settings {
    let dir = tempfile::tempdir().unwrap();
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert(
        "VOICEMODE_BASE_DIR".into(),
        dir.keep().to_string_lossy().to_string(),
    );
    if !stt_urls.is_empty() {
        env.insert("VOICEMODE_STT_BASE_URLS".into(), stt_urls.join(","));
    }
    if !tts_urls.is_empty() {
        env.insert("VOICEMODE_TTS_BASE_URLS".into(), tts_urls.join(","));
    }
    // Short probe window keeps the failover tests fast.
    env.insert("VOICEMODE_PROBE_WINDOW".into(), "1".into());
    Settings::load_with(&env).unwrap()
}

fn one_second_buffer() -> AudioBuffer {
    AudioBuffer::new(
        (0..24_000)
            .map(|i| (i as f32 * 0.05).sin() * 0.3)
            .collect(),
        24_000,
    )
}

#[tokio::test]
async fn stt_upload_accepts_a_plain_text_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello world\n"))
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let settings = Arc::new(settings_for(&[base.clone()], &[]));
    let uploader = SttUploader::new(Client::new(), settings);
    let endpoint = Endpoint::new(base, ProviderKind::Stt);

    let format = uploader.negotiate_format(&endpoint);
    // Unknown providers accept mp3/wav; without a local mp3 encoder the
    // upload degrades to wav.
    assert_eq!(format, AudioFormat::Wav);

    let outcome = uploader
        .transcribe(&endpoint, "whisper-1", format, &one_second_buffer(), "conv_test")
        .await
        .unwrap();
    assert_eq!(outcome.text, "hello world");
    assert_eq!(outcome.model, "whisper-1");
}

#[tokio::test]
async fn stt_upload_accepts_a_json_body_and_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"text": ""}"#))
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let settings = Arc::new(settings_for(&[base.clone()], &[]));
    let uploader = SttUploader::new(Client::new(), settings);
    let endpoint = Endpoint::new(base, ProviderKind::Stt);

    let outcome = uploader
        .transcribe(
            &endpoint,
            "whisper-1",
            AudioFormat::Wav,
            &one_second_buffer(),
            "conv_test",
        )
        .await
        .unwrap();
    assert_eq!(outcome.text, "");
}

#[tokio::test]
async fn stt_error_status_is_a_per_endpoint_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let settings = Arc::new(settings_for(&[base.clone()], &[]));
    let uploader = SttUploader::new(Client::new(), settings);
    let endpoint = Endpoint::new(base, ProviderKind::Stt);

    let err = uploader
        .transcribe(
            &endpoint,
            "whisper-1",
            AudioFormat::Wav,
            &one_second_buffer(),
            "conv_test",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "stt_failed");
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn stt_failover_moves_to_the_second_endpoint() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("made it"))
        .mount(&healthy)
        .await;

    let first = format!("{}/v1", broken.uri());
    let second = format!("{}/v1", healthy.uri());
    let settings = Arc::new(settings_for(&[first.clone(), second.clone()], &[]));
    let registry = Registry::from_settings(&settings, Client::new());
    let uploader = SttUploader::new(Client::new(), settings);

    // First selection follows configuration order.
    let selection = registry.select_for_stt(None).unwrap();
    assert_eq!(selection.endpoint.base_url, first);

    let buffer = one_second_buffer();
    let err = uploader
        .transcribe(&selection.endpoint, &selection.model, AudioFormat::Wav, &buffer, "conv")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "stt_failed");
    registry.mark_failed(&selection.endpoint);

    // The registry now orders the healthy endpoint first.
    let selection = registry.select_for_stt(None).unwrap();
    assert_eq!(selection.endpoint.base_url, second);
    let outcome = uploader
        .transcribe(&selection.endpoint, &selection.model, AudioFormat::Wav, &buffer, "conv")
        .await
        .unwrap();
    assert_eq!(outcome.text, "made it");
}

#[tokio::test]
async fn failed_endpoint_becomes_eligible_after_the_window() {
    let settings = settings_for(
        &["http://127.0.0.1:2022/v1".into()],
        &["http://127.0.0.1:8880/v1".into()],
    );
    let registry = Registry::from_settings(&settings, Client::new());

    let endpoint = registry.eligible(ProviderKind::Stt)[0].clone();
    registry.mark_failed(&endpoint);
    assert!(registry.eligible(ProviderKind::Stt).is_empty());

    // Probe window is 1 s in the test settings.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    assert_eq!(registry.eligible(ProviderKind::Stt).len(), 1);
}

#[tokio::test]
async fn probe_hits_the_health_path_and_caches_the_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let settings = settings_for(&[base.clone()], &[]);
    let registry = Registry::from_settings(&settings, Client::new());
    let endpoint = registry.eligible(ProviderKind::Stt)[0].clone();

    assert!(registry.probe(&endpoint).await);
    let liveness = registry.endpoints_with_liveness(ProviderKind::Stt);
    assert_eq!(liveness[0].1, Some(true));
}

#[tokio::test]
async fn tts_stream_delivers_the_body_in_chunks() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..48_000u32).flat_map(|i| ((i % 251) as i16).to_le_bytes()).collect();
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let settings = Arc::new(settings_for(&[], &[base.clone()]));
    let streamer = TtsStreamer::new(Client::new(), settings);
    let endpoint = Endpoint::new(base, ProviderKind::Tts);

    let request = SpeakRequest {
        text: "Hello there".into(),
        voice: "af_sky".into(),
        model: "tts-1".into(),
        format: AudioFormat::Pcm,
        speed: 1.0,
        instructions: None,
    };

    let (mut rx, reader) = streamer.open_stream(&endpoint, &request).await.unwrap();
    let mut received = Vec::new();
    while let Some(chunk) = rx.recv().await {
        received.extend_from_slice(&chunk);
    }
    let _ = reader.await;
    assert_eq!(received, body);
}

#[tokio::test]
async fn tts_http_error_is_a_per_endpoint_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such voice"))
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let settings = Arc::new(settings_for(&[], &[base.clone()]));
    let streamer = TtsStreamer::new(Client::new(), settings);
    let endpoint = Endpoint::new(base, ProviderKind::Tts);

    let request = SpeakRequest {
        text: "Hi".into(),
        voice: "af_sky".into(),
        model: "tts-1".into(),
        format: AudioFormat::Pcm,
        speed: 1.0,
        instructions: None,
    };

    let err = streamer.open_stream(&endpoint, &request).await.unwrap_err();
    assert_eq!(err.kind(), "tts_failed");
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn tts_connection_refused_is_reported_against_the_endpoint() {
    // Nothing listens on this port.
    let base = "http://127.0.0.1:59999/v1".to_string();
    let settings = Arc::new(settings_for(&[], &[base.clone()]));
    let streamer = TtsStreamer::new(Client::new(), settings);
    let endpoint = Endpoint::new(base.clone(), ProviderKind::Tts);

    let request = SpeakRequest {
        text: "Hi".into(),
        voice: "af_sky".into(),
        model: "tts-1".into(),
        format: AudioFormat::Pcm,
        speed: 1.0,
        instructions: None,
    };

    let err = streamer.open_stream(&endpoint, &request).await.unwrap_err();
    assert_eq!(err.kind(), "tts_failed");
    assert!(err.to_string().contains(&base));
}
