//! Runs a small three-node execution graph end to end.
//!
//! Run with: cargo run --example pipeline

use async_trait::async_trait;
use langgraph_core::exec_graph::{
    ExecutionContext, ExecutionEvent, ExecutionGraph, ExecutionGraphDefinition, NodeHandler,
    NodeSpec, NodeType,
};
use langgraph_core::Result;
use serde_json::{json, Value};
use std::sync::Arc;

struct TextPipeline;

#[async_trait]
impl NodeHandler for TextPipeline {
    async fn execute(&self, node: &NodeSpec, ctx: &ExecutionContext) -> Result<Value> {
        match node.id.as_str() {
            "fetch" => Ok(json!({"raw": "  Hello World  "})),
            "normalize" => {
                let fetched = ctx.output_of("fetch").await.unwrap_or(Value::Null);
                let raw = fetched["raw"].as_str().unwrap_or_default().trim();
                Ok(json!({"normalized": raw.to_lowercase()}))
            }
            "report" => {
                let normalized = ctx.output_of("normalize").await.unwrap_or(Value::Null);
                Ok(json!({"report": format!("result: {}", normalized["normalized"])}))
            }
            other => Ok(json!({"node": other})),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let definition = ExecutionGraphDefinition {
        graph_id: "demo-pipeline".into(),
        nodes: vec![
            NodeSpec::new("fetch", NodeType::Task),
            NodeSpec::new("normalize", NodeType::Task).with_dependencies(["fetch"]),
            NodeSpec::new("report", NodeType::Task).with_dependencies(["normalize"]),
        ],
        entry_nodes: vec![],
    };

    let graph = ExecutionGraph::new(definition)?;
    graph.register_handler(NodeType::Task, Arc::new(TextPipeline)).await;

    let mut events = graph.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ExecutionEvent::NodeCompleted { node_id, .. } = event {
                println!("completed: {node_id}");
            }
        }
    });

    let outcome = graph.execute(None).await?;
    println!("success: {}", outcome.success);
    println!("outputs: {:#}", Value::Object(outcome.outputs.into_iter().collect()));

    Ok(())
}
