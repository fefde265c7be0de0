//! Speech recognition worker loop.
//!
//! Same message discipline as the engine worker, but requests are handled
//! one at a time on the command thread: a transcription has no streaming and
//! no cancellation.

use crossbeam_channel::{Receiver, Sender};
use offline_engine::{TranscribeOptions, Transcriber, TranscriberPipeline};
use offline_types::{languages, ErrorKind};

use super::ipc_types::*;

/// Script hints fed ahead of the audio for Chinese variants.
const PROMPT_MAP: &[(&str, &str)] = &[
    ("zh-Hant", "請使用繁體中文輸出。"),
    ("zh-Hant-HK", "請使用香港繁體中文輸出。"),
    ("zh-Hans", "请使用简体中文输出。"),
];

/// Decoding options for a UI language code.
pub fn transcribe_options(language: &str) -> TranscribeOptions {
    // Codes outside the language table go to the recognizer unchanged.
    let hint = match languages::find(language) {
        Some(lang) => lang.asr_code.map(str::to_string),
        None => (!language.is_empty()).then(|| language.to_string()),
    };

    let prompt = PROMPT_MAP
        .iter()
        .find(|(code, _)| *code == language)
        .map(|(_, prompt)| prompt.to_string());

    TranscribeOptions {
        language: hint,
        prompt,
        temperature: 0.0,
    }
}

/// Run the transcription worker until the command channel closes.
pub fn run_transcription_worker<T: Transcriber>(
    mut transcriber: T,
    commands: Receiver<String>,
    events: Sender<TranscriptionResponse>,
) {
    log::info!("[ASR_WORKER] Transcription worker ready");
    let mut pipeline: Option<Box<dyn TranscriberPipeline>> = None;

    for line in commands.iter() {
        let request: TranscriptionRequest = match parse_request(&line) {
            Ok(request) => request,
            Err((id, message)) => {
                log::warn!("[ASR_WORKER] {message}");
                let _ = events.send(TranscriptionResponse::error(
                    id,
                    ErrorKind::UnknownOperation,
                    message,
                ));
                continue;
            }
        };

        let id = request.id;
        let response = match request.command {
            TranscriptionCommand::Load {
                model_id,
                quantization,
            } => {
                if pipeline.as_ref().is_some_and(|p| p.model_id() == model_id) {
                    log::info!("[ASR_WORKER] Model {model_id} is already loaded");
                    TranscriptionResponse::ok(id, TranscriptionPayload::Loaded { model_id })
                } else {
                    // Free the previous pipeline before building the next one.
                    pipeline = None;
                    log::info!(
                        "[ASR_WORKER] Initializing pipeline for {model_id} with {quantization:?}"
                    );
                    let progress_events = events.clone();
                    let result = transcriber.load(&model_id, &quantization, &mut |report| {
                        let _ = progress_events.send(TranscriptionResponse::ok(
                            id,
                            TranscriptionPayload::Progress { report },
                        ));
                    });
                    match result {
                        Ok(loaded) => {
                            log::info!("[ASR_WORKER] Model {model_id} loaded");
                            pipeline = Some(loaded);
                            TranscriptionResponse::ok(id, TranscriptionPayload::Loaded { model_id })
                        }
                        Err(e) => {
                            log::error!("[ASR_WORKER] Load error: {e}");
                            TranscriptionResponse::error(
                                id,
                                ErrorKind::Load,
                                format!("Error loading ASR model: {e}"),
                            )
                        }
                    }
                }
            }
            TranscriptionCommand::Transcribe { audio, language } => match pipeline.as_mut() {
                None => TranscriptionResponse::error(
                    id,
                    ErrorKind::Transcription,
                    "Transcriber not ready, no model loaded",
                ),
                Some(pipeline) => {
                    let options = transcribe_options(&language);
                    log::info!(
                        "[ASR_WORKER] Transcribing {} samples (lang={language})",
                        audio.len()
                    );
                    match pipeline.transcribe(&audio, &options) {
                        Ok(text) => TranscriptionResponse::ok(
                            id,
                            TranscriptionPayload::Transcription {
                                text: text.trim().to_string(),
                            },
                        ),
                        Err(e) => TranscriptionResponse::error(
                            id,
                            ErrorKind::Transcription,
                            format!("Transcription error: {e}"),
                        ),
                    }
                }
            },
            TranscriptionCommand::CacheStatus { model_id } => {
                match transcriber.is_cached(&model_id) {
                    Ok(cached) => TranscriptionResponse::ok(
                        id,
                        TranscriptionPayload::CacheStatus { model_id, cached },
                    ),
                    Err(e) => {
                        log::warn!("[ASR_WORKER] Cache status for {model_id} failed: {e}");
                        TranscriptionResponse::error(id, ErrorKind::Load, e)
                    }
                }
            }
            TranscriptionCommand::ClearCache => {
                // The pipeline reads from the cache; release it first.
                pipeline = None;
                match transcriber.clear_cache() {
                    Ok(()) => {
                        log::info!("[ASR_WORKER] Speech model cache cleared");
                        TranscriptionResponse::ok(id, TranscriptionPayload::CacheCleared)
                    }
                    Err(e) => {
                        log::error!("[ASR_WORKER] Failed to clear cache: {e}");
                        TranscriptionResponse::error(id, ErrorKind::Delete, e)
                    }
                }
            }
        };

        if events.send(response).is_err() {
            break;
        }
    }

    log::info!("[ASR_WORKER] Exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcribe_options_for_chinese_variants() {
        let options = transcribe_options("zh-Hant-HK");
        assert_eq!(options.language.as_deref(), Some("chinese"));
        assert_eq!(options.prompt.as_deref(), Some("請使用香港繁體中文輸出。"));
        assert_eq!(options.temperature, 0.0);
    }

    #[test]
    fn test_transcribe_options_auto_and_plain() {
        let auto = transcribe_options("auto");
        assert!(auto.language.is_none());
        assert!(auto.prompt.is_none());

        let ja = transcribe_options("ja");
        assert_eq!(ja.language.as_deref(), Some("ja"));
        assert!(ja.prompt.is_none());
    }

    #[test]
    fn test_transcribe_options_unlisted_codes_pass_through() {
        assert_eq!(transcribe_options("pt").language.as_deref(), Some("pt"));
        assert!(transcribe_options("").language.is_none());
        assert_eq!(transcribe_options("zh-Hans").language.as_deref(), Some("chinese"));
    }
}
