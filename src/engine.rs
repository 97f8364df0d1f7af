//! Search engine
//!
//! Ties the pipeline together: answer cache probe, fast-path
//! classification, planning, concurrent execution, synthesis, and
//! session persistence. Both the blocking and streaming entry points
//! run the same pipeline; streaming additionally narrates progress
//! through the event channel.

use crate::cache::{self, put_quietly, CacheStore};
use crate::classifier;
use crate::config::Config;
use crate::coordinator::ExecutionCoordinator;
use crate::error::SearchError;
use crate::models::{
    CachedAnswer, CapabilityResult, Plan, Query, QueryMode, SearchOutcome, Source, StreamEvent,
    Turn,
};
use crate::planner::Planner;
use crate::session::SessionStore;
use crate::synthesizer::AnswerSynthesizer;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct SearchEngine {
    config: Config,
    planner: Arc<dyn Planner>,
    coordinator: ExecutionCoordinator,
    synthesizer: AnswerSynthesizer,
    sessions: Arc<dyn SessionStore>,
    answer_cache: Arc<dyn CacheStore>,
}

impl SearchEngine {
    pub fn new(
        config: Config,
        planner: Arc<dyn Planner>,
        coordinator: ExecutionCoordinator,
        synthesizer: AnswerSynthesizer,
        sessions: Arc<dyn SessionStore>,
        answer_cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            config,
            planner,
            coordinator,
            synthesizer,
            sessions,
            answer_cache,
        }
    }

    /// Wire up the production pipeline from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        use crate::cache::{InMemoryCache, NoopCache};
        use crate::capability::create_default_registry;
        use crate::llm::OpenAiClient;
        use crate::planner::LlmPlanner;
        use crate::session::InMemorySessionStore;

        let llm: Arc<dyn crate::llm::LlmClient> = Arc::new(OpenAiClient::new(
            config.openai_api_key.clone(),
            config.openai_api_url.clone(),
            config.openai_model.clone(),
        )?);

        let registry = Arc::new(create_default_registry(&config));

        let cache_store: Arc<dyn CacheStore> = if config.enable_caching {
            Arc::new(InMemoryCache::new())
        } else {
            Arc::new(NoopCache)
        };

        let planner = Arc::new(LlmPlanner::new(
            Arc::clone(&llm),
            Arc::clone(&registry),
            Arc::clone(&cache_store),
            config.ttl.plan,
        ));

        let coordinator = ExecutionCoordinator::new(
            registry,
            Arc::clone(&cache_store),
            config.ttl,
            config.cheap_call_timeout,
            config.expensive_call_timeout,
        );

        let synthesizer = AnswerSynthesizer::new(llm);

        Ok(Self::new(
            config,
            planner,
            coordinator,
            synthesizer,
            Arc::new(InMemorySessionStore::new()),
            cache_store,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn resolve_session(&self, query: &Query) -> Result<String> {
        match &query.session_id {
            Some(id) => Ok(id.clone()),
            None => self.sessions.new_session().await,
        }
    }

    /// Fast path applies only to default-mode queries; explicit deep
    /// research always goes through the planner.
    fn fast_path_plan(&self, query: &Query) -> Option<Plan> {
        if !self.config.enable_fast_path || query.mode != QueryMode::Sonar {
            return None;
        }
        classifier::classify(&query.text)
    }

    async fn resolve_plan(&self, query: &Query, history: &[Turn]) -> Result<Plan> {
        if let Some(plan) = self.fast_path_plan(query) {
            info!(
                capability = %plan.steps[0].capability,
                "Fast-path classification matched"
            );
            return Ok(plan);
        }
        self.planner.plan(&query.text, query.mode, history).await
    }

    async fn cached_answer(&self, query: &Query) -> Option<CachedAnswer> {
        // Deep research answers are always produced fresh.
        if query.mode != QueryMode::Sonar {
            return None;
        }
        match self.answer_cache.get(&cache::answer_key(&query.text)).await {
            Ok(Some(value)) => serde_json::from_value(value).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Answer cache read failed");
                None
            }
        }
    }

    /// Persist the completed turn and, off the request path, the answer
    /// cache entry.
    async fn record_completion(
        &self,
        query: &Query,
        session_id: &str,
        answer: &str,
        sources: &[Source],
    ) {
        if let Err(e) = self
            .sessions
            .append(session_id, Turn::new(query.text.clone(), answer.to_string()))
            .await
        {
            warn!(session_id, error = %e, "Session append failed");
        }

        if query.mode == QueryMode::Sonar {
            let cached = CachedAnswer {
                answer: answer.to_string(),
                sources: sources.to_vec(),
            };
            if let Ok(value) = serde_json::to_value(&cached) {
                let answer_cache = Arc::clone(&self.answer_cache);
                let key = cache::answer_key(&query.text);
                let ttl = self.config.ttl.answer;
                tokio::spawn(async move {
                    put_quietly(answer_cache.as_ref(), &key, value, ttl).await;
                });
            }
        }
    }

    /// Run the full pipeline and return the final answer in one piece.
    pub async fn run(&self, query: Query) -> Result<SearchOutcome> {
        let session_id = self.resolve_session(&query).await?;

        if let Some(cached) = self.cached_answer(&query).await {
            debug!(session_id = %session_id, "Answer cache hit");
            self.record_completion(&query, &session_id, &cached.answer, &cached.sources)
                .await;
            return Ok(SearchOutcome {
                answer: cached.answer,
                sources: cached.sources,
                session_id,
            });
        }

        let history = self
            .sessions
            .history(&session_id, self.config.max_history_turns)
            .await?;
        let plan = self.resolve_plan(&query, &history).await?;
        let results = self.coordinator.execute(&plan, Some(&session_id), None).await?;
        let (answer, sources) = self
            .synthesizer
            .synthesize(&query.text, &results, &history)
            .await?;

        self.record_completion(&query, &session_id, &answer, &sources)
            .await;

        Ok(SearchOutcome {
            answer,
            sources,
            session_id,
        })
    }

    /// Streaming entry point. Emits progress statuses followed by exactly
    /// one terminal event. A closed receiver cancels the pipeline: no
    /// terminal event, no session append, no answer-cache write.
    pub async fn run_streaming(
        &self,
        query: Query,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let session_id = self.resolve_session(&query).await?;

        match self.run_streaming_inner(&query, &session_id, &events).await {
            Ok(()) => Ok(()),
            Err(SearchError::Canceled) => {
                info!(session_id = %session_id, "Query canceled by client");
                Err(SearchError::Canceled)
            }
            Err(e) => {
                let content = if e.is_user_visible() {
                    e.to_string()
                } else {
                    "Something went wrong while processing your query.".to_string()
                };
                let _ = events
                    .send(StreamEvent::Error {
                        content,
                        session_id: Some(session_id),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn run_streaming_inner(
        &self,
        query: &Query,
        session_id: &str,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let send = |event: StreamEvent| async move {
            events.send(event).await.map_err(|_| SearchError::Canceled)
        };

        if let Some(cached) = self.cached_answer(query).await {
            debug!(session_id, "Answer cache hit");
            send(StreamEvent::status(
                "Found a recent answer for this query.",
                Some(session_id),
            ))
            .await?;
            send(StreamEvent::Result {
                content: cached.answer.clone(),
                sources: cached.sources.clone(),
                session_id: Some(session_id.to_string()),
            })
            .await?;
            self.record_completion(query, session_id, &cached.answer, &cached.sources)
                .await;
            return Ok(());
        }

        send(StreamEvent::status(
            "Analyzing your query...",
            Some(session_id),
        ))
        .await?;
        if query.mode == QueryMode::DeepResearch {
            send(StreamEvent::status(
                "Deep research mode engaged. This can take several minutes.",
                Some(session_id),
            ))
            .await?;
        }

        let history = self
            .sessions
            .history(session_id, self.config.max_history_turns)
            .await?;
        let plan = self.resolve_plan(query, &history).await?;

        let results = self
            .coordinator
            .execute(&plan, Some(session_id), Some(events))
            .await?;

        send(StreamEvent::status(
            "Gathering insights from the data...",
            Some(session_id),
        ))
        .await?;

        let (answer, sources) = self
            .synthesize_for_stream(query, &results, &history, events, session_id)
            .await?;

        send(StreamEvent::Result {
            content: answer.clone(),
            sources: sources.clone(),
            session_id: Some(session_id.to_string()),
        })
        .await?;

        self.record_completion(query, session_id, &answer, &sources)
            .await;
        Ok(())
    }

    /// Synthesis with optional token forwarding: when enabled, model
    /// token deltas surface as status events ahead of the terminal
    /// result.
    async fn synthesize_for_stream(
        &self,
        query: &Query,
        results: &[CapabilityResult],
        history: &[Turn],
        events: &mpsc::Sender<StreamEvent>,
        session_id: &str,
    ) -> Result<(String, Vec<Source>)> {
        if !self.config.stream_tokens {
            return self.synthesizer.synthesize(&query.text, results, history).await;
        }

        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
        let forward_events = events.clone();
        let forward_session = session_id.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(token) = token_rx.recv().await {
                if forward_events
                    .send(StreamEvent::status(token, Some(&forward_session)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let outcome = self
            .synthesizer
            .synthesize_streaming(&query.text, results, history, token_tx)
            .await;
        let _ = forwarder.await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::capability::{CapabilityRegistry, MockCapability};
    use crate::llm::MockLlm;
    use crate::planner::MockPlanner;
    use crate::session::InMemorySessionStore;
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> Config {
        let mut config = Config::from_env();
        config.enable_fast_path = true;
        config.enable_caching = true;
        config.stream_tokens = false;
        config.cheap_call_timeout = Duration::from_secs(5);
        config.expensive_call_timeout = Duration::from_secs(5);
        config
    }

    struct Harness {
        engine: SearchEngine,
        sessions: Arc<InMemorySessionStore>,
        llm: Arc<MockLlm>,
    }

    fn harness_with(config: Config, registry: CapabilityRegistry, llm: MockLlm) -> Harness {
        let sessions = Arc::new(InMemorySessionStore::new());
        let llm = Arc::new(llm);
        let cache_store: Arc<dyn CacheStore> = Arc::new(InMemoryCache::new());
        let coordinator = ExecutionCoordinator::new(
            Arc::new(registry),
            Arc::clone(&cache_store),
            config.ttl,
            config.cheap_call_timeout,
            config.expensive_call_timeout,
        );
        let engine = SearchEngine::new(
            config,
            Arc::new(MockPlanner),
            coordinator,
            AnswerSynthesizer::new(Arc::clone(&llm) as Arc<dyn crate::llm::LlmClient>),
            Arc::clone(&sessions) as Arc<dyn SessionStore>,
            cache_store,
        );
        Harness {
            engine,
            sessions,
            llm,
        }
    }

    fn search_registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(MockCapability::new(
            "search",
            json!({"choices": [{"message": {"content": "data"}}]}),
        )));
        registry
    }

    #[tokio::test]
    async fn test_run_produces_answer_and_session() {
        let h = harness_with(
            test_config(),
            search_registry(),
            MockLlm::single("Markets closed higher."),
        );

        let outcome = h
            .engine
            .run(Query::new("how did markets do", QueryMode::Sonar))
            .await
            .unwrap();

        assert_eq!(outcome.answer, "Markets closed higher.");
        assert!(!outcome.session_id.is_empty());

        let history = h.sessions.history(&outcome.session_id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].answer, "Markets closed higher.");
    }

    #[tokio::test]
    async fn test_answer_cache_hit_skips_pipeline() {
        let h = harness_with(
            test_config(),
            search_registry(),
            MockLlm::new(vec!["first".to_string(), "second".to_string()]),
        );

        let first = h
            .engine
            .run(Query::new("apple outlook", QueryMode::Sonar))
            .await
            .unwrap();
        // The answer-cache write is spawned off the request path.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = h
            .engine
            .run(Query::new("Apple   outlook", QueryMode::Sonar))
            .await
            .unwrap();

        assert_eq!(first.answer, second.answer);
        assert_eq!(h.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_deep_research_never_served_from_answer_cache() {
        let h = harness_with(
            test_config(),
            search_registry(),
            MockLlm::new(vec!["shallow".to_string(), "deep".to_string()]),
        );

        h.engine
            .run(Query::new("tesla prospects", QueryMode::Sonar))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A deep-research run must reach the model again even though the
        // normalized query text matches the cached sonar answer.
        let deep = h
            .engine
            .run(Query::new("tesla prospects", QueryMode::DeepResearch))
            .await
            .unwrap();
        assert_eq!(deep.answer, "deep");
        assert_eq!(h.llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fast_path_bypasses_planner() {
        // Registry without "search": the MockPlanner fallback would fail
        // outright, so success proves the classifier plan was used.
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(MockCapability::new(
            "stock_price",
            json!({"results": [{"c": 101.0}]}),
        )));

        let h = harness_with(test_config(), registry, MockLlm::single("AAPL is at $101."));
        let outcome = h
            .engine
            .run(Query::new("What is the current price of AAPL?", QueryMode::Sonar))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "AAPL is at $101.");
    }

    #[tokio::test]
    async fn test_streaming_emits_statuses_then_one_terminal() {
        let h = harness_with(
            test_config(),
            search_registry(),
            MockLlm::single("streamed answer"),
        );
        let (tx, mut rx) = mpsc::channel(64);

        h.engine
            .run_streaming(Query::new("market recap", QueryMode::Sonar), tx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminal_count, 1);
        assert!(events.last().unwrap().is_terminal());
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::Result { content, .. } if content == "streamed answer"
        ));
        assert!(events.len() > 1, "expected progress statuses before the result");
    }

    #[tokio::test]
    async fn test_streaming_failure_ends_with_error_event() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(MockCapability::failing("search", "provider down")));

        let h = harness_with(test_config(), registry, MockLlm::single("unused"));
        let (tx, mut rx) = mpsc::channel(64);

        let err = h
            .engine
            .run_streaming(Query::new("market recap", QueryMode::Sonar), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::AllCapabilitiesFailed));

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(StreamEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_canceled_stream_appends_nothing() {
        let h = harness_with(
            test_config(),
            search_registry(),
            MockLlm::single("never delivered"),
        );
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let query = Query {
            text: "market recap".to_string(),
            mode: QueryMode::Sonar,
            session_id: Some("fixed-session".to_string()),
        };
        let err = h.engine.run_streaming(query, tx).await.unwrap_err();
        assert!(matches!(err, SearchError::Canceled));
        assert!(h.sessions.history("fixed-session", 10).await.unwrap().is_empty());
    }
}
