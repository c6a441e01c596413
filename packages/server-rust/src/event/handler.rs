//! Dispatch handlers: the business logic a consumer loop hands validated
//! messages to.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use courier_core::{ConsumedMessage, IntrospectRequestMessage};
use regex::Regex;
use tracing::{debug, error, info};

/// Handles one validated message. An `Err` is logged by the consumer loop and
/// the message is dropped; there is no retry.
#[async_trait]
pub trait DispatchHandler: Send + Sync {
    async fn on_message(&self, msg: &ConsumedMessage) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Result of inspecting a repository's metadata index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionReport {
    pub url: String,
    /// `<revision>` from `repomd.xml`, when present.
    pub revision: Option<String>,
    /// `type` attribute of each `<data>` entry, in document order.
    pub data_types: Vec<String>,
}

/// Inspects a repository URL.
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn introspect(&self, url: &str) -> anyhow::Result<IntrospectionReport>;
}

/// Handles `Introspect` messages by running an [`Introspector`] on the
/// requested URL.
///
/// An introspection failure is logged but the message still counts as
/// handled; only undecodable payloads and bad URLs fail the message.
pub struct IntrospectHandler<I> {
    introspector: I,
}

impl<I: Introspector> IntrospectHandler<I> {
    #[must_use]
    pub fn new(introspector: I) -> Self {
        Self { introspector }
    }
}

#[async_trait]
impl<I: Introspector> DispatchHandler for IntrospectHandler<I> {
    async fn on_message(&self, msg: &ConsumedMessage) -> anyhow::Result<()> {
        debug!(key = %msg.key_str(), "introspect handler called");

        let payload: IntrospectRequestMessage =
            msg.decode().context("error deserializing payload")?;
        check_url(&payload.url)?;

        match self.introspector.introspect(&payload.url).await {
            Ok(report) => info!(
                uuid = %payload.uuid,
                url = %report.url,
                revision = report.revision.as_deref().unwrap_or(""),
                data_types = report.data_types.len(),
                "repository introspected"
            ),
            Err(err) => error!(
                uuid = %payload.uuid,
                url = %payload.url,
                error = %format!("{err:#}"),
                "error introspecting repository"
            ),
        }
        Ok(())
    }
}

fn check_url(raw: &str) -> anyhow::Result<()> {
    let url = reqwest::Url::parse(raw).with_context(|| format!("invalid url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        bail!("invalid url '{raw}': expected an http(s) url with a host");
    }
    Ok(())
}

/// Fetches `<url>/repodata/repomd.xml` over HTTP.
pub struct HttpIntrospector {
    client: reqwest::Client,
    revision: Regex,
    data_type: Regex,
}

impl HttpIntrospector {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            revision: Regex::new(r"<revision>\s*([^<\s]+)\s*</revision>")?,
            data_type: Regex::new(r#"<data\s+type="([^"]+)""#)?,
        })
    }

    fn parse_repomd(&self, url: &str, xml: &str) -> IntrospectionReport {
        IntrospectionReport {
            url: url.to_string(),
            revision: self
                .revision
                .captures(xml)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            data_types: self
                .data_type
                .captures_iter(xml)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .collect(),
        }
    }
}

#[async_trait]
impl Introspector for HttpIntrospector {
    async fn introspect(&self, url: &str) -> anyhow::Result<IntrospectionReport> {
        let repomd_url = format!("{}/repodata/repomd.xml", url.trim_end_matches('/'));
        let body = self
            .client
            .get(&repomd_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("failed to fetch {repomd_url}"))?
            .text()
            .await
            .with_context(|| format!("failed to read {repomd_url}"))?;
        Ok(self.parse_repomd(url, &body))
    }
}
