//! Drives the child-process transport through the built binary.

use std::process::Command;
use std::sync::Arc;

use offline_db::{CacheLedger, Database};
use offline_engine::cache_dir_name;
use offline_translator::{GenerationSession, OfflineConfig, OfflineTranslator};
use offline_types::{GenerationRequest, ModelDescriptor, SamplingOptions};
use offline_worker::{ProcessManager, TranscriptionBridge, WorkerBridge};
use tokio_util::sync::CancellationToken;

const BIN: &str = env!("CARGO_BIN_EXE_offline_translator");
const QWEN: &str = "Qwen3-4B-q4f16_1-MLC";

fn spawn_engine(models_dir: &str) -> WorkerBridge {
    let link = ProcessManager::spawn_program(
        BIN,
        &["--models-dir", models_dir, "worker", "--kind", "engine"],
    )
    .unwrap();
    WorkerBridge::new(link)
}

#[tokio::test]
async fn test_engine_worker_process_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let models_dir = dir.path().to_string_lossy().to_string();
    let bridge = spawn_engine(&models_dir);
    assert!(bridge.is_alive());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let loaded = bridge
        .load_model(&ModelDescriptor::prebuilt(QWEN), Some(tx))
        .await
        .unwrap();
    assert_eq!(loaded, QWEN);
    let mut last = None;
    while let Ok(report) = rx.try_recv() {
        last = Some(report);
    }
    assert_eq!(last.map(|r| r.progress), Some(1.0));
    assert!(dir.path().join(cache_dir_name(QWEN).unwrap()).join("model.json").exists());

    let request = GenerationRequest::new(
        "Translate the following from en text into concise fr: \"good evening\".",
        SamplingOptions::default(),
    );
    let mut streamed = String::new();
    let output = GenerationSession::run(
        &bridge,
        &request,
        &mut |chunk| streamed.push_str(chunk),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(output.text, "good evening");
    assert_eq!(streamed, output.text);

    bridge.delete_cache(QWEN, None).await.unwrap();
    assert!(!dir.path().join(cache_dir_name(QWEN).unwrap()).exists());
}

#[tokio::test]
async fn test_facade_over_process_workers() {
    let dir = tempfile::tempdir().unwrap();
    let models_dir = dir.path().to_string_lossy().to_string();
    let db = Arc::new(Database::new(":memory:").unwrap());
    let ledger = Arc::new(CacheLedger::load(db).unwrap());

    let asr_link =
        ProcessManager::spawn_program(BIN, &["worker", "--kind", "transcription"]).unwrap();
    let translator = OfflineTranslator::new(
        Arc::new(spawn_engine(&models_dir)),
        ledger,
        &OfflineConfig::default(),
    )
    .with_transcription(TranscriptionBridge::new(asr_link));

    translator.load_model(QWEN, None).await.unwrap();
    let output = translator
        .translate_stream(
            "buenos días",
            "es",
            "en",
            false,
            SamplingOptions::default(),
            &mut |_| {},
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(output.text, "buenos días");
    assert_eq!(translator.list_cached_models(), vec![QWEN.to_string()]);

    translator
        .load_asr_model("Xenova/whisper-small", None)
        .await
        .unwrap();
    let text = translator.transcribe(vec![0.5; 8], "auto").await.unwrap();
    assert_eq!(text, "transcribed 8 samples");

    assert!(translator.clear_all_models().await.is_empty());
    assert!(translator.list_cached_models().is_empty());
}

#[test]
fn test_cli_translate_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("translator.db");
    let db_arg = db_path.to_string_lossy().to_string();
    let models_arg = dir.path().join("models").to_string_lossy().to_string();

    let run = |args: &[&str]| {
        let output = Command::new(BIN)
            .current_dir(dir.path())
            .args(["--db-path", &db_arg, "--models-dir", &models_arg])
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success(), "{args:?} failed: {output:?}");
        String::from_utf8_lossy(&output.stdout).to_string()
    };

    let translated = run(&["translate", "hola mundo", "--from", "es", "--to", "en", "--model", QWEN]);
    assert_eq!(translated.trim(), "hola mundo");

    let listing = run(&["list"]);
    let qwen_line = listing
        .lines()
        .find(|line| line.contains(QWEN))
        .unwrap()
        .to_string();
    assert!(qwen_line.ends_with("cached"));

    run(&["config", "set", "default_model", QWEN]);
    let shown = run(&["config", "show"]);
    assert!(shown.contains(QWEN));

    run(&["delete", QWEN]);
    let listing = run(&["list"]);
    assert!(!listing
        .lines()
        .any(|line| line.contains(QWEN) && line.ends_with("cached")));
}

#[test]
fn test_cli_rejects_escaping_custom_ids_and_manages_speech_cache() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("translator.db");
    let db_arg = db_path.to_string_lossy().to_string();
    let models_dir = dir.path().join("models");
    let models_arg = models_dir.to_string_lossy().to_string();

    let command = |args: &[&str]| {
        Command::new(BIN)
            .current_dir(dir.path())
            .args(["--db-path", &db_arg, "--models-dir", &models_arg])
            .args(args)
            .output()
            .unwrap()
    };
    let run = |args: &[&str]| {
        let output = command(args);
        assert!(output.status.success(), "{args:?} failed: {output:?}");
        String::from_utf8_lossy(&output.stdout).to_string()
    };

    run(&["config", "show"]);
    assert!(db_path.exists());

    for id in ["..", ".", "../translator.db"] {
        let output = command(&["custom", "add", id, "--model-url", "u", "--model-lib-url", "l"]);
        assert!(!output.status.success(), "custom add {id:?} was accepted");
    }
    assert!(!run(&["custom", "list"]).contains(".."));
    run(&["clear"]);
    assert!(db_path.exists());

    let audio = dir.path().join("clip.f32");
    std::fs::write(&audio, [0u8; 64]).unwrap();
    let status = run(&["asr", "status", "Xenova/whisper-base"]);
    assert!(status.contains("not cached"));

    let text = run(&["transcribe", audio.to_str().unwrap(), "--model", "Xenova/whisper-base"]);
    assert_eq!(text.trim(), "transcribed 16 samples");
    let status = run(&["asr", "status", "Xenova/whisper-base"]);
    assert!(!status.contains("not cached"));
    assert!(run(&["list"])
        .lines()
        .any(|line| line.contains("Xenova/whisper-base") && line.ends_with("cached")));

    run(&["asr", "clear"]);
    let status = run(&["asr", "status"]);
    assert!(status.lines().all(|line| line.ends_with("not cached")));
    assert!(!models_dir.join(".speech").exists());
}
