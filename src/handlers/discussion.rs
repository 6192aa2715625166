//! fetch_discussion: pull an external comment thread.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::domain::{TaskEnvelope, TaskResult, TaskType};
use crate::strategies::hackernews::{item_id, ALGOLIA_ITEMS};
use crate::strategies::text;

use super::{HandlerContext, HandlerError, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchDiscussionHandler;

/// Where a thread lives and how to fetch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadSource {
    HackerNews { item_id: u64 },
    Reddit { json_url: String },
}

impl ThreadSource {
    fn name(&self) -> &'static str {
        match self {
            ThreadSource::HackerNews { .. } => "hackernews",
            ThreadSource::Reddit { .. } => "reddit",
        }
    }

    fn api_url(&self) -> String {
        match self {
            ThreadSource::HackerNews { item_id } => format!("{ALGOLIA_ITEMS}/{item_id}"),
            ThreadSource::Reddit { json_url } => json_url.clone(),
        }
    }
}

/// Recognise a supported thread URL
pub fn thread_source(url: &str) -> Option<ThreadSource> {
    let url = Url::parse(url).ok()?;
    if let Some(id) = item_id(&url) {
        return Some(ThreadSource::HackerNews { item_id: id });
    }

    let host = url.host_str()?;
    let is_reddit = host == "reddit.com" || host.ends_with(".reddit.com");
    if !is_reddit || !url.path().contains("/comments/") {
        return None;
    }
    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix(".json").unwrap_or(path);
    Some(ThreadSource::Reddit {
        json_url: format!("https://www.reddit.com{path}.json"),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub text: String,
    pub depth: usize,
}

/// Depth-first walk of Algolia `children`
fn flatten_hn(children: &[Value], depth: usize, limit: usize, out: &mut Vec<Comment>) {
    for child in children {
        if out.len() >= limit {
            return;
        }
        let body = child.get("text").and_then(Value::as_str).map(text::strip_html);
        if let Some(body) = body.filter(|b| !b.is_empty()) {
            out.push(Comment {
                author: child
                    .get("author")
                    .and_then(Value::as_str)
                    .unwrap_or("[deleted]")
                    .to_string(),
                text: body,
                depth,
            });
        }
        if let Some(nested) = child.get("children").and_then(Value::as_array) {
            flatten_hn(nested, depth + 1, limit, out);
        }
    }
}

/// Depth-first walk of a Reddit comment listing
fn flatten_reddit(listing: &Value, depth: usize, limit: usize, out: &mut Vec<Comment>) {
    let Some(children) = listing.pointer("/data/children").and_then(Value::as_array) else {
        return;
    };
    for child in children {
        if out.len() >= limit {
            return;
        }
        if child.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let data = &child["data"];
        if let Some(body) = data.get("body").and_then(Value::as_str) {
            if !body.trim().is_empty() {
                out.push(Comment {
                    author: data
                        .get("author")
                        .and_then(Value::as_str)
                        .unwrap_or("[deleted]")
                        .to_string(),
                    text: text::normalize_whitespace(body),
                    depth,
                });
            }
        }
        // `replies` is "" when empty, a listing otherwise
        if data.get("replies").is_some_and(Value::is_object) {
            flatten_reddit(&data["replies"], depth + 1, limit, out);
        }
    }
}

pub fn parse_thread(source: &ThreadSource, body: &Value, limit: usize) -> Vec<Comment> {
    let mut comments = Vec::new();
    match source {
        ThreadSource::HackerNews { .. } => {
            if let Some(children) = body.get("children").and_then(Value::as_array) {
                flatten_hn(children, 0, limit, &mut comments);
            }
        }
        ThreadSource::Reddit { .. } => {
            // [post listing, comment listing]
            if let Some(listing) = body.get(1) {
                flatten_reddit(listing, 0, limit, &mut comments);
            }
        }
    }
    comments
}

#[async_trait]
impl TaskHandler for FetchDiscussionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::FetchDiscussion
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let item = &ctx.content;
        if item.has_metadata("discussion") && !envelope.force() {
            return Ok(TaskResult::success());
        }

        let url = envelope
            .payload_str("url")
            .or_else(|| item.metadata_str("discussion_url"))
            .unwrap_or(item.canonical_url.as_str());
        let source = thread_source(url)
            .ok_or_else(|| HandlerError::Fatal(format!("unsupported discussion url: {url}")))?;

        let body: Value = ctx.services.http.get_json(&source.api_url()).await?;
        let comments = parse_thread(&source, &body, ctx.services.pipeline.max_comments);
        info!(source = source.name(), comments = comments.len(), "Discussion fetched");

        let count = comments.len();
        Ok(TaskResult::success()
            .with_patch(
                "discussion",
                json!({
                    "source": source.name(),
                    "url": url,
                    "comments": comments,
                    "comment_count": count,
                }),
            )
            .with_patch("discussion_fetched_at", ctx.timestamp()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::ContentType;
    use crate::handlers::test_support::{context, envelope, services, CannedModel};

    #[test]
    fn test_thread_sources() {
        assert_eq!(
            thread_source("https://news.ycombinator.com/item?id=42"),
            Some(ThreadSource::HackerNews { item_id: 42 })
        );
        assert_eq!(
            thread_source("https://old.reddit.com/r/rust/comments/abc/title/"),
            Some(ThreadSource::Reddit {
                json_url: "https://www.reddit.com/r/rust/comments/abc/title.json".into()
            })
        );
        assert_eq!(thread_source("https://reddit.com/r/rust"), None);
        assert_eq!(thread_source("https://example.com/comments/1"), None);
    }

    #[test]
    fn test_hn_thread_is_flattened_with_depth() {
        let body = json!({
            "children": [
                { "author": "a", "text": "<p>top</p>", "children": [
                    { "author": "b", "text": "reply", "children": [] }
                ]},
                { "author": null, "text": null, "children": [] },
                { "author": "c", "text": "second", "children": [] }
            ]
        });
        let comments = parse_thread(&ThreadSource::HackerNews { item_id: 1 }, &body, 10);
        let shape: Vec<(&str, usize)> = comments.iter().map(|c| (c.author.as_str(), c.depth)).collect();
        assert_eq!(shape, vec![("a", 0), ("b", 1), ("c", 0)]);
        assert_eq!(comments[0].text, "top");

        let capped = parse_thread(&ThreadSource::HackerNews { item_id: 1 }, &body, 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_reddit_thread_is_flattened() {
        let body = json!([
            { "data": { "children": [] } },
            { "data": { "children": [
                { "kind": "t1", "data": { "author": "x", "body": "hi", "replies": {
                    "data": { "children": [
                        { "kind": "t1", "data": { "author": "y", "body": "hello", "replies": "" } }
                    ]}
                }}},
                { "kind": "more", "data": {} }
            ]}}
        ]);
        let source = ThreadSource::Reddit { json_url: String::new() };
        let comments = parse_thread(&source, &body, 10);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].depth, 1);
        assert_eq!(comments[1].author, "y");
    }

    #[tokio::test]
    async fn test_existing_discussion_is_kept() {
        let ctx = context(
            "https://news.ycombinator.com/item?id=1",
            ContentType::Social,
            json!({ "discussion": { "comment_count": 3 } }),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(&ctx, TaskType::FetchDiscussion, json!({}));
        let result = FetchDiscussionHandler.handle(&envelope, &ctx).await.unwrap();
        assert!(result.metadata_patch.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_thread_is_fatal() {
        let ctx = context(
            "https://example.com/post",
            ContentType::Article,
            json!({}),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(&ctx, TaskType::FetchDiscussion, json!({}));
        let err = FetchDiscussionHandler.handle(&envelope, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
