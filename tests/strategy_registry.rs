//! Strategy Registry Integration Tests
//!
//! Resolution order when custom strategies join the built-in ones.

use std::sync::Arc;

use async_trait::async_trait;
use contentflow::domain::ContentType;
use contentflow::http::HttpClient;
use contentflow::strategies::{
    ExtractedContent, ExtractionStrategy, RawContent, RawPayload, StrategyError, StrategyRegistry,
};
use reqwest::Url;

/// Accepts every http(s) URL on one host
struct HostStrategy {
    name: &'static str,
    host: &'static str,
    types: &'static [ContentType],
}

#[async_trait]
impl ExtractionStrategy for HostStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn platform(&self) -> &'static str {
        self.host
    }

    fn content_types(&self) -> &'static [ContentType] {
        self.types
    }

    fn can_handle(&self, url: &Url) -> bool {
        url.host_str() == Some(self.host)
    }

    async fn fetch(&self, _http: &HttpClient, url: &Url) -> Result<RawContent, StrategyError> {
        Ok(RawContent::new(url, RawPayload::Html(String::new())))
    }

    fn extract(&self, _raw: &RawContent) -> Result<ExtractedContent, StrategyError> {
        Ok(ExtractedContent {
            title: Some(self.name.to_string()),
            text: Some("word ".repeat(500)),
            ..ExtractedContent::default()
        })
    }
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn resolved(
    registry: &StrategyRegistry,
    u: &str,
    hint: Option<ContentType>,
) -> Option<&'static str> {
    registry.resolve(&url(u), hint).map(|s| s.name())
}

#[test]
fn test_custom_strategy_outranks_generic_fallback() {
    let mut registry = StrategyRegistry::with_defaults();
    assert_eq!(resolved(&registry, "https://vimeo.com/123", None), Some("html_article"));

    registry.register(
        Arc::new(HostStrategy {
            name: "vimeo",
            host: "vimeo.com",
            types: &[ContentType::Video],
        }),
        50,
    );
    assert_eq!(resolved(&registry, "https://vimeo.com/123", None), Some("vimeo"));

    // Built-ins above it are unaffected
    assert_eq!(
        resolved(&registry, "https://www.youtube.com/watch?v=abc", None),
        Some("youtube")
    );
    assert_eq!(resolved(&registry, "https://example.com/post", None), Some("html_article"));
}

#[test]
fn test_equal_priority_keeps_registration_order() {
    let mut registry = StrategyRegistry::new();
    for name in ["first", "second"] {
        registry.register(
            Arc::new(HostStrategy {
                name,
                host: "example.com",
                types: &[ContentType::Article],
            }),
            10,
        );
    }
    registry.register(
        Arc::new(HostStrategy {
            name: "low",
            host: "example.com",
            types: &[ContentType::Article],
        }),
        1,
    );

    assert_eq!(resolved(&registry, "https://example.com/", None), Some("first"));
    let names: Vec<_> = registry.names().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["first", "second", "low"]);
}

#[test]
fn test_hint_breaks_ties_but_never_outranks() {
    let mut registry = StrategyRegistry::new();
    registry.register(
        Arc::new(HostStrategy {
            name: "pages",
            host: "media.example.com",
            types: &[ContentType::Article],
        }),
        20,
    );
    registry.register(
        Arc::new(HostStrategy {
            name: "episodes",
            host: "media.example.com",
            types: &[ContentType::Podcast],
        }),
        20,
    );
    registry.register(
        Arc::new(HostStrategy {
            name: "clips",
            host: "media.example.com",
            types: &[ContentType::Video],
        }),
        10,
    );

    let u = "https://media.example.com/ep/1";
    assert_eq!(resolved(&registry, u, None), Some("pages"));
    assert_eq!(resolved(&registry, u, Some(ContentType::Unknown)), Some("pages"));
    // Same priority: the hint picks the one that declares it
    assert_eq!(resolved(&registry, u, Some(ContentType::Podcast)), Some("episodes"));
    // Lower priority: the hint does not lift it above the top match
    assert_eq!(resolved(&registry, u, Some(ContentType::Video)), Some("pages"));
}

#[test]
fn test_hint_does_not_bypass_site_specific_strategy() {
    let registry = StrategyRegistry::with_defaults();
    let video = "https://www.youtube.com/watch?v=abc";

    assert_eq!(resolved(&registry, video, None), Some("youtube"));
    assert_eq!(resolved(&registry, video, Some(ContentType::Article)), Some("youtube"));
    assert_eq!(resolved(&registry, video, Some(ContentType::Social)), Some("youtube"));
}

#[test]
fn test_unmatched_url_resolves_to_none() {
    let registry = StrategyRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(resolved(&registry, "https://example.com/", None), None);

    let defaults = StrategyRegistry::with_defaults();
    assert_eq!(resolved(&defaults, "ftp://example.com/file", None), None);
    assert!(defaults.resolve_str("not a url", None).is_err());
}

#[tokio::test]
async fn test_default_hooks_classify_and_budget_text() {
    let strategy = HostStrategy {
        name: "pages",
        host: "example.com",
        types: &[ContentType::Article, ContentType::FeedItem],
    };
    let target = url("https://example.com/post");
    assert_eq!(strategy.classify(&target), ContentType::Article);

    let http = HttpClient::new(&Default::default()).unwrap();
    let raw = strategy.fetch(&http, &target).await.unwrap();
    let extracted = strategy.extract(&raw).unwrap();
    let prepared = strategy.prepare_for_model(&extracted, 200);
    assert!(prepared.truncated);
    assert!(prepared.text.chars().count() <= 200);
    assert!(prepared.text.starts_with("pages"));
}
