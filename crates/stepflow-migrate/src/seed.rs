//! Builtin system seed registry: the block taxonomy and sample workflows
//! every deployment starts from.

use serde_json::json;

use stepflow_core::model::{BlockCategory, BlockErrorCode, InputPort, OutputPort};

use crate::blocks::{BlockRegistry, BlockSeed};
use crate::workflows::{EdgeSeed, StepSeed, WorkflowSeed};

/// The system block catalog, including the `http` inheritance family and
/// the LLM provider blocks.
pub fn builtin_blocks() -> BlockRegistry {
    let mut registry = BlockRegistry::new();

    let mut start = BlockSeed::new("start", BlockCategory::Flow).with_name("Start");
    start.description = "Entry point of a workflow; forwards the trigger payload".into();
    start.inputs = vec![];
    registry.register(start);

    let mut merge = BlockSeed::new("merge", BlockCategory::Flow).with_name("Merge");
    merge.description = "Joins multiple branches into one payload".into();
    merge.config_defaults = Some(json!({"adapter": "merge"}));
    registry.register(merge);

    let mut http = BlockSeed::new("http", BlockCategory::Apps)
        .with_name("HTTP Request")
        .with_defaults(json!({
            "method": "GET",
            "timeout_sec": 30,
            "body_type": "json"
        }))
        .with_outputs(vec![
            OutputPort::new("out").default_port(),
            OutputPort::new("error"),
        ]);
    http.description = "Performs an HTTP request and decodes the response".into();
    http.config_schema = json!({
        "type": "object",
        "properties": {
            "url": {"type": "string"},
            "method": {"type": "string"},
            "headers": {"type": "object"},
            "query_params": {"type": "object"},
            "body": {"type": "string"},
            "timeout_sec": {"type": "integer"}
        },
        "required": ["url"]
    });
    http.error_codes = vec![
        BlockErrorCode {
            code: "ETIMEDOUT".into(),
            name: "request timeout".into(),
            description: "The endpoint did not answer in time".into(),
            retryable: true,
        },
        BlockErrorCode {
            code: "ECONNREFUSED".into(),
            name: "connection refused".into(),
            description: String::new(),
            retryable: true,
        },
    ];
    registry.register(http);

    let rest = BlockSeed::new("rest-api", BlockCategory::Apps)
        .with_parent("http")
        .with_name("REST API")
        .with_defaults(json!({
            "headers": {"Accept": "application/json"},
            "body_type": "json"
        }));
    registry.register(rest);

    let mut bearer = BlockSeed::new("bearer-api", BlockCategory::Apps)
        .with_parent("rest-api")
        .with_name("Bearer-authenticated API")
        .with_defaults(json!({
            "headers": {"Authorization": "Bearer {{ctx.api_token}}"}
        }));
    bearer.required_credentials = vec!["api_token".into()];
    registry.register(bearer);

    let mut github = BlockSeed::new("github-api", BlockCategory::Apps)
        .with_parent("bearer-api")
        .with_name("GitHub API")
        .with_defaults(json!({
            "url": "https://api.github.com",
            "headers": {
                "Accept": "application/vnd.github+json",
                "X-GitHub-Api-Version": "2022-11-28"
            }
        }));
    github.description = "Calls the GitHub REST API with bearer auth".into();
    registry.register(github);

    let mut openai = BlockSeed::new("openai-chat", BlockCategory::Ai)
        .with_name("OpenAI Chat")
        .with_defaults(json!({"model": "gpt-4", "max_tokens": 2048}));
    openai.description = "Chat completion against an OpenAI-compatible API".into();
    openai.inputs = vec![InputPort::new("input")];
    openai.config_schema = json!({
        "type": "object",
        "properties": {
            "model": {"type": "string"},
            "prompt": {"type": "string"},
            "system": {"type": "string"},
            "temperature": {"type": ["number", "null"]},
            "max_tokens": {"type": "integer"}
        },
        "required": ["prompt"]
    });
    openai.output_schema = json!({
        "type": "object",
        "properties": {
            "content": {"type": "string"},
            "model": {"type": "string"},
            "usage": {"type": "object"}
        }
    });
    openai.error_codes = vec![BlockErrorCode {
        code: "rate_limit_exceeded".into(),
        name: "rate limited".into(),
        description: String::new(),
        retryable: true,
    }];
    registry.register(openai);

    let mut anthropic = BlockSeed::new("anthropic-messages", BlockCategory::Ai)
        .with_name("Anthropic Messages")
        .with_defaults(json!({"model": "claude-3-sonnet-20240229", "max_tokens": 4096}));
    anthropic.description = "Message completion against the Anthropic API".into();
    anthropic.inputs = vec![InputPort::new("input")];
    registry.register(anthropic);

    registry
}

/// Sample seed workflows shipped with the system catalog.
pub fn builtin_workflows() -> Vec<WorkflowSeed> {
    vec![WorkflowSeed {
        slug: "content-summarizer".into(),
        name: "Content Summarizer".into(),
        description: "Summarize a topic with an LLM and post the result".into(),
        status: stepflow_core::model::WorkflowStatus::Published,
        version: 1,
        input_schema: json!({
            "type": "object",
            "properties": {"topic": {"type": "string"}},
            "required": ["topic"]
        }),
        output_schema: json!({"type": "object"}),
        steps: vec![
            StepSeed {
                key: "start".into(),
                name: "start".into(),
                step_type: "start".into(),
                config: json!({}),
                position: Default::default(),
                group: None,
                role: None,
                trigger: Some(stepflow_core::model::TriggerType::Manual),
            },
            StepSeed {
                key: "summarize".into(),
                name: "summarize".into(),
                step_type: "openai-chat".into(),
                config: json!({
                    "prompt": "Summarize the following topic in three sentences: {{trigger.topic}}"
                }),
                position: Default::default(),
                group: None,
                role: None,
                trigger: None,
            },
            StepSeed {
                key: "deliver".into(),
                name: "deliver".into(),
                step_type: "http".into(),
                config: json!({
                    "url": "{{trigger.callback_url}}",
                    "method": "POST",
                    "body": "{{summarize.out.content}}"
                }),
                position: Default::default(),
                group: None,
                role: None,
                trigger: None,
            },
        ],
        groups: vec![],
        edges: vec![
            EdgeSeed {
                source: "start".into(),
                target: "summarize".into(),
                source_port: None,
                target_port: None,
                condition: None,
            },
            EdgeSeed {
                source: "summarize".into(),
                target: "deliver".into(),
                source_port: None,
                target_port: None,
                condition: None,
            },
        ],
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_contains_the_api_family() {
        let registry = builtin_blocks();
        let slugs: Vec<&str> = registry.seeds().iter().map(|s| s.slug.as_str()).collect();
        for expected in ["http", "rest-api", "bearer-api", "github-api", "openai-chat"] {
            assert!(slugs.contains(&expected), "missing builtin block {expected}");
        }

        let github = registry
            .seeds()
            .iter()
            .find(|s| s.slug == "github-api")
            .unwrap();
        assert_eq!(github.parent_slug.as_deref(), Some("bearer-api"));
    }

    #[test]
    fn builtin_workflows_reference_builtin_blocks() {
        let registry = builtin_blocks();
        let slugs: Vec<&str> = registry.seeds().iter().map(|s| s.slug.as_str()).collect();
        for workflow in builtin_workflows() {
            for step in &workflow.steps {
                assert!(
                    slugs.contains(&step.step_type.as_str()),
                    "workflow '{}' uses unknown block '{}'",
                    workflow.slug,
                    step.step_type
                );
            }
        }
    }
}
