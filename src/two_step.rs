//! Two-step translation through an intermediate language.
//!
//! Some language pairs translate poorly in one pass on a small local model.
//! For those, the text is first translated into a well-supported language
//! without streaming, and the result is then streamed into the target.

use offline_types::{GenerationOutput, GenerationRequest, OfflineError, SamplingOptions};
use offline_worker::WorkerBridge;
use tokio_util::sync::CancellationToken;

use crate::prompts::{full_prompt, stream_prompt};
use crate::session::{ChunkSink, GenerationSession};

/// `source` to any target starting with `target_prefix` goes via `intermediate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoStepRoute {
    pub source: String,
    pub target_prefix: String,
    pub intermediate: String,
}

impl TwoStepRoute {
    pub fn new(source: &str, target_prefix: &str, intermediate: &str) -> Self {
        Self {
            source: source.to_string(),
            target_prefix: target_prefix.to_string(),
            intermediate: intermediate.to_string(),
        }
    }

    fn matches(&self, source: &str, target: &str) -> bool {
        self.source == source && target.starts_with(&self.target_prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<TwoStepRoute>,
}

impl Default for RouteTable {
    /// Japanese into any Chinese variant goes via English.
    fn default() -> Self {
        Self {
            routes: vec![TwoStepRoute::new("ja", "zh", "en")],
        }
    }
}

impl RouteTable {
    pub fn empty() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn with_route(mut self, route: TwoStepRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn find(&self, source: &str, target: &str) -> Option<&TwoStepRoute> {
        self.routes.iter().find(|route| route.matches(source, target))
    }
}

/// One translation request.
#[derive(Debug, Clone, Copy)]
pub struct TranslationJob<'a> {
    pub text: &'a str,
    pub source: &'a str,
    pub target: &'a str,
    pub options: SamplingOptions,
}

/// Single streamed pass from `source` to `target`.
pub async fn translate_direct(
    bridge: &WorkerBridge,
    job: TranslationJob<'_>,
    on_chunk: ChunkSink<'_>,
    cancel: &CancellationToken,
) -> Result<GenerationOutput, OfflineError> {
    let request = GenerationRequest::new(stream_prompt(job.text, job.source, job.target), job.options);
    GenerationSession::run(bridge, &request, on_chunk, cancel).await
}

/// Translate `job`, going through an intermediate language when `routes`
/// has an entry for its language pair.
pub async fn translate_two_step(
    bridge: &WorkerBridge,
    routes: &RouteTable,
    job: TranslationJob<'_>,
    on_chunk: ChunkSink<'_>,
    cancel: &CancellationToken,
) -> Result<GenerationOutput, OfflineError> {
    let Some(route) = routes.find(job.source, job.target) else {
        return translate_direct(bridge, job, on_chunk, cancel).await;
    };

    log::info!(
        "[TWO_STEP] {} -> {} via {}",
        job.source,
        job.target,
        route.intermediate
    );

    let first = GenerationRequest::new(
        full_prompt(job.text, job.source, &route.intermediate),
        job.options,
    );
    let intermediate = GenerationSession::run(bridge, &first, &mut |_| {}, cancel).await?;

    if intermediate.cancelled || cancel.is_cancelled() {
        log::info!("[TWO_STEP] Cancelled after the intermediate pass");
        return Ok(GenerationOutput::cancelled(""));
    }

    let intermediate_text = intermediate.text.trim();
    if intermediate_text.is_empty() {
        log::warn!("[TWO_STEP] Intermediate pass produced no text");
        return Err(OfflineError::EmptyIntermediateResult);
    }
    log::debug!("[TWO_STEP] Intermediate text: {intermediate_text}");

    let second = GenerationRequest::new(
        stream_prompt(intermediate_text, &route.intermediate, job.target),
        job.options,
    );
    GenerationSession::run(bridge, &second, on_chunk, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use offline_engine::MockEngine;
    use offline_types::ModelDescriptor;
    use offline_worker::spawn_thread_worker;
    use std::time::Duration;

    async fn loaded_bridge(engine: MockEngine) -> WorkerBridge {
        let bridge = WorkerBridge::new(spawn_thread_worker(engine));
        bridge
            .load_model(&ModelDescriptor::prebuilt("m"), None)
            .await
            .unwrap();
        bridge
    }

    fn job<'a>(text: &'a str, source: &'a str, target: &'a str) -> TranslationJob<'a> {
        TranslationJob {
            text,
            source,
            target,
            options: SamplingOptions::default(),
        }
    }

    #[test]
    fn test_route_table_matches_target_family() {
        let routes = RouteTable::default();
        assert_eq!(routes.find("ja", "zh-Hant").map(|r| r.intermediate.as_str()), Some("en"));
        assert!(routes.find("ja", "zh-Hans").is_some());
        assert!(routes.find("ja", "en").is_none());
        assert!(routes.find("en", "zh-Hant").is_none());
        assert!(RouteTable::empty().find("ja", "zh-Hant").is_none());

        let extended = RouteTable::empty().with_route(TwoStepRoute::new("ko", "ru", "en"));
        assert!(extended.find("ko", "ru").is_some());
    }

    #[tokio::test]
    async fn test_unrouted_pair_is_a_single_streamed_pass() {
        let engine = MockEngine::new();
        let events = engine.events();
        let bridge = loaded_bridge(engine).await;

        let mut streamed = String::new();
        let output = translate_two_step(
            &bridge,
            &RouteTable::default(),
            job("hello there", "en", "fr"),
            &mut |chunk| streamed.push_str(chunk),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(output, GenerationOutput::completed("hello there"));
        assert_eq!(streamed, "hello there");
        assert_eq!(events.count("generate:"), 1);
    }

    #[tokio::test]
    async fn test_routed_pair_streams_only_the_second_pass() {
        let engine = MockEngine::new();
        let events = engine.events();
        let bridge = loaded_bridge(engine).await;

        let mut streamed = String::new();
        let output = translate_two_step(
            &bridge,
            &RouteTable::default(),
            job("こんにちは", "ja", "zh-Hant"),
            &mut |chunk| streamed.push_str(chunk),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // The mock echoes the quoted text, so both passes carry it through.
        assert_eq!(output.text, "こんにちは");
        assert_eq!(streamed, output.text);

        let generates: Vec<String> = events
            .events()
            .into_iter()
            .filter(|e| e.starts_with("generate:"))
            .collect();
        assert_eq!(generates.len(), 2);
        assert!(generates[0].contains("from ja text into en"));
        assert!(generates[1].contains("from en text into concise zh-Hant"));
    }

    #[tokio::test]
    async fn test_blank_intermediate_result_stops_before_second_pass() {
        let engine = MockEngine::new();
        let events = engine.events();
        let bridge = loaded_bridge(engine).await;

        let mut streamed = String::new();
        let result = translate_two_step(
            &bridge,
            &RouteTable::default(),
            job("\u{3000}", "ja", "zh-Hant"),
            &mut |chunk| streamed.push_str(chunk),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result, Err(OfflineError::EmptyIntermediateResult));
        assert!(streamed.is_empty());
        assert_eq!(events.count("generate:"), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_intermediate_pass_skips_second_pass() {
        let engine = MockEngine::new()
            .with_chunks(&["a", "b", "c", "d"])
            .with_token_delay(Duration::from_millis(30));
        let events = engine.events();
        let bridge = loaded_bridge(engine).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(45)).await;
            trigger.cancel();
        });

        let output = translate_two_step(
            &bridge,
            &RouteTable::default(),
            job("テスト", "ja", "zh-Hans"),
            &mut |_| {},
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(output, GenerationOutput::cancelled(""));
        assert_eq!(events.count("generate:"), 1);
    }
}
