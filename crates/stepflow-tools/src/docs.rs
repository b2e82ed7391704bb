//! Built-in documentation index served by `search_documentation`.

use serde_json::{json, Value};

pub(crate) struct DocEntry {
    pub topic: &'static str,
    pub title: &'static str,
    pub body: &'static str,
}

pub(crate) const DOCS: &[DocEntry] = &[
    DocEntry {
        topic: "blocks",
        title: "Block definitions and inheritance",
        body: "Blocks are reusable step types identified by slug and version. A block may \
               declare a parent slug; config defaults deep-merge down the chain, ports union \
               by name, and child scalars override parent scalars. Tenant blocks shadow \
               system blocks with the same slug.",
    },
    DocEntry {
        topic: "blocks",
        title: "Ports",
        body: "Input ports are named, typed slots a step consumes; output ports carry the \
               step's results. Exactly one output port may be the default. Edges bind a \
               source output port to a target input port.",
    },
    DocEntry {
        topic: "edges",
        title: "Edges and conditions",
        body: "Edges connect steps and groups within the same scope. An edge may carry a \
               condition of the form 'path', 'path == literal' or 'path != literal', \
               evaluated against the source output; a false condition suppresses the edge \
               and everything that only depends on it.",
    },
    DocEntry {
        topic: "groups",
        title: "Block groups",
        body: "Groups wrap a subgraph: parallel fans out its children, try_catch re-routes \
               body failures to the error port, foreach iterates an ordered sequence, \
               while re-executes the body under a condition with a max-iteration cap, and \
               agent exposes the body as a tool catalog to an LLM driver.",
    },
    DocEntry {
        topic: "errors",
        title: "Error handling policies",
        body: "Each step may set on_error to fail, continue, fallback, or error_port, plus \
               max_retries, backoff_strategy (fixed, exponential, jittered) and \
               interval_seconds. Config and validation errors never retry; provider and \
               protocol errors retry by default.",
    },
    DocEntry {
        topic: "templates",
        title: "Template substitution",
        body: "Config strings may reference {{input.field}}, {{step_name.port.path}}, \
               {{trigger.field}} and {{ctx.run_id}}. A string that is exactly one token \
               substitutes the raw JSON value; embedded tokens stringify; unresolved \
               tokens are preserved and recorded as step-run warnings.",
    },
    DocEntry {
        topic: "runs",
        title: "Run lifecycle",
        body: "Workflow runs and step runs move pending -> running -> completed | failed | \
               cancelled; skipped marks guard-suppressed steps. Terminal statuses are \
               immutable and cancellation is irreversible.",
    },
];

pub(crate) fn search(query: &str, topic: Option<&str>) -> Vec<Value> {
    let needle = query.to_lowercase();
    DOCS.iter()
        .filter(|entry| topic.map_or(true, |t| entry.topic == t))
        .filter(|entry| {
            needle.is_empty()
                || entry.title.to_lowercase().contains(&needle)
                || entry.body.to_lowercase().contains(&needle)
        })
        .map(|entry| {
            json!({
                "topic": entry.topic,
                "title": entry.title,
                "body": entry.body,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_matches_title_and_body() {
        let hits = search("backoff", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["topic"], "errors");
    }

    #[test]
    fn topic_filter_narrows_results() {
        assert!(search("", Some("blocks")).len() >= 2);
        assert!(search("condition", Some("groups")).len() <= 1);
    }
}
