//! Interactive terminal chat against the orchestration graph.
//!
//! Reads lines from stdin, streams answers back, and records both sides of
//! the exchange in the (in-memory) conversation history so follow-up
//! questions carry context. `exit` quits.

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recall_graph::{
    AgentEvent, AgentGraph, GraphConfig, HistoryProvider, InMemoryHistory, MilvusVectorStore,
    OpenAiEmbedder, OpenAiGateway, RetrievalAgent, Role, Settings, VectorSearchTool,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recall_graph=info,recall_chat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::new()?;
    info!(
        "Starting recall-chat against {} (model {})",
        settings.llm.base_url, settings.llm.model
    );

    let model = Arc::new(OpenAiGateway::new(&settings.llm)?);
    let embedder = Arc::new(OpenAiEmbedder::new(&settings.embedding)?);
    let store = Arc::new(MilvusVectorStore::new(&settings.memory)?);
    let history = Arc::new(InMemoryHistory::new());

    let knowledge_tool = VectorSearchTool::new(
        embedder.clone(),
        store.clone(),
        settings.memory.knowledge_collection.clone(),
        "question_embedding",
        vec!["question".to_string(), "answer".to_string()],
        settings.memory.top_k,
    );
    let retriever = RetrievalAgent::new(
        model.clone(),
        vec![Arc::new(knowledge_tool)],
        settings.agent.agent_step_limit,
    );

    let graph = Arc::new(AgentGraph::new(
        model,
        embedder,
        store,
        history.clone(),
        retriever,
        GraphConfig::from_settings(&settings),
    ));

    let session_id = uuid::Uuid::new_v4().to_string();
    let user_id = "local".to_string();
    println!("recall-chat ready (session {session_id}). Type 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you: ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line.trim().to_string(),
            None => break,
        };
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }

        let mut stream = graph.invoke_stream(line.clone(), session_id.clone(), user_id.clone());
        print!("assistant: ");
        std::io::stdout().flush()?;

        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::Delta(chunk) => {
                    print!("{chunk}");
                    std::io::stdout().flush()?;
                }
                AgentEvent::Done { final_answer } => {
                    println!();
                    // Persist after the turn completes; history loaded by
                    // the next invocation must not already contain it.
                    history
                        .add_turn(&session_id, &user_id, Role::User, &line)
                        .await?;
                    history
                        .add_turn(&session_id, &user_id, Role::Assistant, &final_answer)
                        .await?;
                }
                AgentEvent::Error(message) => {
                    println!("{message}");
                }
            }
        }
    }

    Ok(())
}
