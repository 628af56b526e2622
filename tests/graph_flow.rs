//! End-to-end tests of the orchestration graph against scripted
//! collaborators: a language model that replays canned replies, a
//! deterministic embedder, and the in-memory vector store.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use recall_graph::{
    AgentError, AgentEvent, AgentGraph, ChatTurn, Embedder, GraphConfig, HistoryProvider,
    InMemoryHistory, InMemoryVectorStore, LanguageModel, MemoryRecord, Result, RetrievalAgent,
    Role, VectorSearchTool, VectorStore, NO_INFORMATION_FOUND,
};

/// Replays canned completions in order. The marker `<ERR>` simulates a
/// gateway failure; running out of replies also fails, which catches
/// nodes making calls a scenario did not script.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatTurn>>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn remaining(&self) -> usize {
        self.replies.lock().len()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String> {
        self.calls.lock().push(turns.to_vec());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| AgentError::llm("scripted model exhausted"))?;
        if reply == "<ERR>" {
            return Err(AgentError::llm("scripted failure"));
        }
        Ok(reply)
    }
}

/// Deterministic embedder: the same text always maps to the same vector.
struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self { dimension: 16 })
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for b in text.bytes() {
            seed ^= u64::from(b);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let mut x = seed.max(1);
        (0..self.dimension)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                ((x % 2000) as f32 / 1000.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

struct Fixture {
    model: Arc<ScriptedModel>,
    embedder: Arc<HashEmbedder>,
    store: Arc<InMemoryVectorStore>,
    history: Arc<InMemoryHistory>,
    graph: AgentGraph,
}

fn fixture(replies: &[&str], config: GraphConfig) -> Fixture {
    let model = ScriptedModel::new(replies);
    let embedder = HashEmbedder::new();
    let store = Arc::new(InMemoryVectorStore::new());
    let history = Arc::new(InMemoryHistory::new());

    let tool = VectorSearchTool::new(
        embedder.clone(),
        store.clone(),
        "knowledge",
        "question_embedding",
        vec!["question".to_string(), "answer".to_string()],
        3,
    );
    let retriever = RetrievalAgent::new(model.clone(), vec![Arc::new(tool)], 25);

    let graph = AgentGraph::new(
        model.clone(),
        embedder.clone(),
        store.clone(),
        history.clone(),
        retriever,
        config,
    );

    Fixture {
        model,
        embedder,
        store,
        history,
        graph,
    }
}

#[tokio::test]
async fn non_exact_route_reply_takes_the_direct_path() {
    // "True please" is not the literal "true": fail-safe toward the
    // cheaper path, no memory lookup, no write-back.
    let f = fixture(&["True please", "Paris."], GraphConfig::default());

    let (answer, state) = f
        .graph
        .invoke_traced("What is the capital of France?", "s1", "u1")
        .await
        .unwrap();

    assert_eq!(answer, "Paris.");
    assert!(!state.needs_retrieval);
    assert!(state.memory_info.is_empty());
    assert!(state.final_answer.is_none());
    assert_eq!(f.store.len("memory"), 0);
    assert_eq!(f.model.remaining(), 0, "no extra LLM calls were made");

    let assistant_turns = state
        .messages
        .iter()
        .filter(|t| t.role == Role::Assistant)
        .count();
    assert_eq!(assistant_turns, 1, "assistant turn is set exactly once");
}

#[tokio::test]
async fn etf_scenario_runs_the_full_retrieval_path() {
    let definition = "An ETF is an exchange-traded fund that tracks an index.";
    let final_answer =
        "An ETF (exchange-traded fund) is a pooled investment fund traded on exchanges.";
    let f = fixture(
        &[
            "true",                                                             // route
            "What is an ETF?",                                                  // recall rewrite
            r#"{"needs_more_info": true, "task_description_item": "define ETF"}"#, // supervisor 1
            r#"{"final": "An ETF is an exchange-traded fund that tracks an index."}"#, // agent
            r#"{"needs_more_info": false, "task_description_item": ""}"#,       // supervisor 2
            final_answer,                                                       // synthesis
            definition,                                                         // distilled memory
        ],
        GraphConfig::default(),
    );

    let (answer, state) = f
        .graph
        .invoke_traced("What is an ETF?", "s1", "u1")
        .await
        .unwrap();

    assert_eq!(answer, final_answer);
    assert_eq!(state.final_answer.as_deref(), Some(final_answer));
    assert!(state.needs_retrieval);
    assert_eq!(state.task_description, vec!["define ETF".to_string()]);
    assert_eq!(state.current_iteration, 1);
    assert_eq!(
        state.task_description.len() as u32,
        state.current_iteration
    );
    assert_eq!(state.retrieved_information, vec![definition.to_string()]);

    // Write-back inserted exactly one memory, retrievable with the same
    // embedding at similarity ~1.0.
    assert_eq!(f.store.len("memory"), 1);
    let vector = f.embedder.embed("What is an ETF?").await.unwrap();
    let hits = f
        .store
        .search(
            "memory",
            &vector,
            "question_embedding",
            &["question", "answer"],
            3,
            None,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!((hits[0].distance - 1.0).abs() < 1e-5);
    assert_eq!(hits[0].memory_fields().answer, definition);

    // Synthesis appended the explicit instruction turn.
    let synthesis_call = &f.model.calls.lock()[5];
    assert!(synthesis_call
        .last()
        .unwrap()
        .content
        .contains("using the reference information above"));
}

#[tokio::test]
async fn iteration_budget_forces_termination() {
    // The supervisor keeps asking for more; the hard cap stops it after
    // max_retrieval_iterations rounds.
    let always_more = r#"{"needs_more_info": true, "task_description_item": "dig deeper"}"#;
    let agent_final = r#"{"final": "some partial information"}"#;
    let f = fixture(
        &[
            "true",        // route
            "rewritten q", // recall rewrite
            always_more,   // supervisor 1
            agent_final,   // agent 1
            always_more,   // supervisor 2
            agent_final,   // agent 2
            always_more,   // supervisor 3
            agent_final,   // agent 3
            // supervisor pass 4 hits the budget with no LLM call
            "best-effort answer", // synthesis
            "NO_UPDATE",          // memory distillation declines
        ],
        GraphConfig::default(),
    );

    let (answer, state) = f.graph.invoke_traced("hard question", "s1", "u1").await.unwrap();

    assert_eq!(answer, "best-effort answer");
    assert_eq!(state.current_iteration, 3);
    assert_eq!(state.current_iteration, state.max_retrieval_iterations);
    assert_eq!(state.task_description.len(), 3);
    assert_eq!(state.retrieved_information.len(), 3);
    assert_eq!(f.model.remaining(), 0);
    assert_eq!(f.store.len("memory"), 0, "NO_UPDATE skips the insert");
}

#[tokio::test]
async fn low_similarity_memories_are_filtered_out() {
    let f = fixture(
        &[
            "true",                // route
            "capital of France",   // recall rewrite
            r#"{"needs_more_info": false, "task_description_item": ""}"#, // supervisor
            "Paris is the capital of France.", // synthesis
            // needs_retrieval stayed false: no distillation call
        ],
        GraphConfig::default(),
    );

    // One memory matches the recall query exactly; the other is the exact
    // opposite direction (cosine -1), far below the 0.65 threshold.
    let near = f.embedder.vector_for("capital of France");
    let far: Vec<f32> = near.iter().map(|x| -x).collect();
    f.store
        .insert(
            "memory",
            vec![
                MemoryRecord::new("capital q", near, "Paris"),
                MemoryRecord::new("unrelated q", far, "something else"),
            ],
        )
        .await
        .unwrap();

    let (answer, state) = f
        .graph
        .invoke_traced("what's the capital of France?", "s1", "u1")
        .await
        .unwrap();

    assert_eq!(answer, "Paris is the capital of France.");
    assert_eq!(state.memory_info.len(), 1);
    assert_eq!(state.memory_info[0].question, "capital q");
    assert_eq!(state.memory_info[0].answer, "Paris");

    // Retrieval was never used, so the collection is unchanged.
    assert!(!state.needs_retrieval);
    assert_eq!(f.store.len("memory"), 2);
}

#[tokio::test]
async fn routing_failure_degrades_to_the_direct_path() {
    let f = fixture(&["<ERR>", "fallback answer"], GraphConfig::default());

    let (answer, state) = f.graph.invoke_traced("hello", "s1", "u1").await.unwrap();

    assert_eq!(answer, "fallback answer");
    assert!(!state.needs_retrieval);
    assert_eq!(f.store.len("memory"), 0);
}

#[tokio::test]
async fn failed_retrieval_substitutes_the_sentinel_result() {
    let f = fixture(
        &[
            "true",
            "rewritten",
            r#"{"needs_more_info": true, "task_description_item": "find it"}"#,
            "<ERR>", // the agent's model call dies
            r#"{"needs_more_info": false, "task_description_item": ""}"#,
            "answer without it",
            "NO_UPDATE",
        ],
        GraphConfig::default(),
    );

    let (answer, state) = f.graph.invoke_traced("q", "s1", "u1").await.unwrap();

    assert_eq!(answer, "answer without it");
    assert_eq!(
        state.retrieved_information,
        vec![NO_INFORMATION_FOUND.to_string()]
    );
}

#[tokio::test]
async fn malformed_supervisor_output_terminates_the_loop() {
    let f = fixture(
        &[
            "true",
            "rewritten",
            "I think we need more data", // not the JSON contract
            "conservative answer",
            // needs_retrieval stayed false: no distillation call
        ],
        GraphConfig::default(),
    );

    let (answer, state) = f.graph.invoke_traced("q", "s1", "u1").await.unwrap();

    assert_eq!(answer, "conservative answer");
    assert_eq!(state.current_iteration, 0);
    assert!(state.task_description.is_empty());
    assert!(!state.needs_retrieval);
    assert_eq!(f.store.len("memory"), 0);
}

#[tokio::test]
async fn needs_more_info_without_a_task_proceeds_to_finalize() {
    let f = fixture(
        &[
            "true",
            "rewritten",
            r#"{"needs_more_info": true, "task_description_item": "  "}"#,
            "answer anyway", // synthesis
            "NO_UPDATE",     // needs_retrieval became true, distillation runs
        ],
        GraphConfig::default(),
    );

    let (answer, state) = f.graph.invoke_traced("q", "s1", "u1").await.unwrap();

    assert_eq!(answer, "answer anyway");
    assert_eq!(state.current_iteration, 0);
    assert!(state.task_description.is_empty());
    // The flag is sticky even though no retrieval round ran.
    assert!(state.needs_retrieval);
    assert_eq!(f.store.len("memory"), 0);
}

#[tokio::test]
async fn history_is_loaded_once_and_merged_into_context() {
    let f = fixture(&["false", "nice to see you again"], GraphConfig::default());

    f.history
        .add_turn("s1", "u1", Role::User, "hi, I'm Ada")
        .await
        .unwrap();
    f.history
        .add_turn("s1", "u1", Role::Assistant, "hello Ada")
        .await
        .unwrap();

    let (answer, state) = f.graph.invoke_traced("remember me?", "s1", "u1").await.unwrap();

    assert_eq!(answer, "nice to see you again");
    assert_eq!(state.history_messages.len(), 2);
    assert_eq!(state.history_messages[0].content, "hi, I'm Ada");
    // messages = merged history + current question + the assistant turn
    assert_eq!(state.messages.len(), 4);
    assert_eq!(state.messages[2].content, "remember me?");
    assert_eq!(state.messages[3].role, Role::Assistant);
}

#[tokio::test]
async fn streaming_emits_deltas_then_done() {
    let f = fixture(&["false", "Hello there"], GraphConfig::default());
    let graph = Arc::new(f.graph);

    let events: Vec<AgentEvent> = graph
        .invoke_stream("hi".to_string(), "s1".to_string(), "u1".to_string())
        .collect()
        .await;

    assert!(matches!(events.last(), Some(AgentEvent::Done { .. })));
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Delta(chunk) => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello there");
    match events.last().unwrap() {
        AgentEvent::Done { final_answer } => assert_eq!(final_answer, "Hello there"),
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

#[tokio::test]
async fn streaming_reports_pipeline_failure_as_a_tagged_error() {
    // Route degrades to the direct path, whose synthesis call also fails:
    // nothing left to answer with.
    let f = fixture(&["<ERR>", "<ERR>"], GraphConfig::default());
    let graph = Arc::new(f.graph);

    let events: Vec<AgentEvent> = graph
        .invoke_stream("hi".to_string(), "s1".to_string(), "u1".to_string())
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        AgentEvent::Error(message) => assert!(message.starts_with("Error:")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn pre_persisted_user_turn_is_not_injected_twice() {
    // Callers may record the user turn in history before invoking; the
    // loaded history then already ends with the current question.
    let f = fixture(&["false", "It tracks an index."], GraphConfig::default());
    f.history
        .add_turn("s1", "u1", Role::User, "What is an ETF?")
        .await
        .unwrap();

    let (answer, state) = f
        .graph
        .invoke_traced("What is an ETF?", "s1", "u1")
        .await
        .unwrap();

    assert_eq!(answer, "It tracks an index.");
    let count_question = |turns: &[ChatTurn]| {
        turns
            .iter()
            .filter(|t| t.role == Role::User && t.content == "What is an ETF?")
            .count()
    };
    for call in f.model.calls.lock().iter() {
        assert_eq!(count_question(call), 1, "duplicate question in LLM context");
    }
    assert_eq!(count_question(&state.messages), 1);
}

#[tokio::test]
async fn repeated_question_from_an_earlier_exchange_is_kept() {
    let f = fixture(&["false", "still Paris"], GraphConfig::default());
    f.history
        .add_turn("s1", "u1", Role::User, "capital of France?")
        .await
        .unwrap();
    f.history
        .add_turn("s1", "u1", Role::Assistant, "Paris")
        .await
        .unwrap();

    let (_, state) = f
        .graph
        .invoke_traced("capital of France?", "s1", "u1")
        .await
        .unwrap();

    // The earlier exchange stays intact; only a trailing duplicate of the
    // current question gets dropped.
    assert_eq!(state.history_messages.len(), 2);
    let questions = state
        .messages
        .iter()
        .filter(|t| t.role == Role::User && t.content == "capital of France?")
        .count();
    assert_eq!(questions, 2);
}

/// Signals when a completion starts and then blocks on a semaphore, so a
/// test can park the pipeline mid-call.
struct GatedModel {
    replies: Mutex<VecDeque<String>>,
    gate: Semaphore,
    calls: AtomicUsize,
    started: tokio::sync::mpsc::UnboundedSender<()>,
}

#[async_trait]
impl LanguageModel for GatedModel {
    async fn complete(&self, _turns: &[ChatTurn]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.send(());
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| AgentError::llm("gate closed"))?;
        permit.forget();
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| AgentError::llm("scripted model exhausted"))
    }
}

#[tokio::test]
async fn dropping_the_stream_aborts_the_invocation() {
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
    let model = Arc::new(GatedModel {
        replies: Mutex::new(
            [
                "true",
                "rewritten",
                r#"{"needs_more_info": false, "task_description_item": ""}"#,
                "answer",
                "NO_UPDATE",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ),
        gate: Semaphore::new(0),
        calls: AtomicUsize::new(0),
        started: started_tx,
    });
    let embedder = HashEmbedder::new();
    let store = Arc::new(InMemoryVectorStore::new());
    let history = Arc::new(InMemoryHistory::new());
    let retriever = RetrievalAgent::new(model.clone(), vec![], 5);
    let graph = Arc::new(AgentGraph::new(
        model.clone(),
        embedder,
        store.clone(),
        history,
        retriever,
        GraphConfig::default(),
    ));

    let stream = graph.invoke_stream("q".to_string(), "s1".to_string(), "u1".to_string());
    // Wait until the routing call is in flight, then walk away.
    started_rx.recv().await.unwrap();
    drop(stream);

    // Releasing the gate must not revive the aborted invocation.
    model.gate.add_permits(8);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len("memory"), 0);
}

#[tokio::test]
async fn second_supervisor_pass_sees_accumulated_evidence() {
    let f = fixture(
        &[
            "true",
            "rewritten",
            r#"{"needs_more_info": true, "task_description_item": "first task"}"#,
            r#"{"final": "first finding"}"#,
            r#"{"needs_more_info": false, "task_description_item": ""}"#,
            "final",
            "NO_UPDATE",
        ],
        GraphConfig::default(),
    );

    f.graph.invoke_traced("q", "s1", "u1").await.unwrap();

    // Call 4 (index 4) is the second supervisor pass; its system prompt
    // must list the issued task and the retrieval result.
    assert_eq!(f.model.call_count(), 7);
    let second_supervisor = &f.model.calls.lock()[4][0];
    assert!(second_supervisor.content.contains("1. first task"));
    assert!(second_supervisor.content.contains("1. first finding"));
}
