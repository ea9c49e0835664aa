//! # HTTP Remote Client
//!
//! [`RemoteClient`] over a REST table service.
//!
//! ## Wire Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert   POST   {base}/tables/{table}                                 │
//! │  update   PATCH  {base}/tables/{table}/{id}     If-Match: "{version}"  │
//! │  delete   DELETE {base}/tables/{table}/{id}     If-Match: "{version}"  │
//! │  query    GET    {base}/tables/{table}                                 │
//! │                  ?$filter=(updatedAt ge datetimeoffset'{token}') and … │
//! │                  &$orderby=updatedAt&$skip=&$top=&__includeDeleted=true│
//! │                                                                         │
//! │  Every request carries ZUMO-API-VERSION: 2.0.0                         │
//! │                                                                         │
//! │  Status        Meaning                                                 │
//! │  ──────        ───────                                                 │
//! │  2xx           success                                                 │
//! │  409 / 412     Conflict { body as server copy, if it parses }          │
//! │  404           Conflict { none } for update/delete                     │
//! │  408 429 502   Unavailable (transient)                                 │
//! │  503 504                                                               │
//! │  other         Rejected (unexpected)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The checkpoint token is the RFC 3339 `updatedAt` of the newest record seen.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use driftwood_core::{Item, ItemFilter, RemoteRecord};

use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{QueryRequest, RemoteClient, RemotePage};

/// Protocol version header expected by the table service.
pub const API_VERSION_HEADER: &str = "ZUMO-API-VERSION";

/// Protocol version sent with every request.
pub const API_VERSION: &str = "2.0.0";

#[derive(Debug)]
struct Bound {
    client: Client,
    base: Url,
}

/// Which call a response belongs to; 404 means different things per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Insert,
    Update,
    Delete,
    Query,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryBody {
    Bare(Vec<RemoteRecord>),
    Wrapped { results: Vec<RemoteRecord> },
}

impl QueryBody {
    fn into_records(self) -> Vec<RemoteRecord> {
        match self {
            QueryBody::Bare(records) => records,
            QueryBody::Wrapped { results } => results,
        }
    }
}

/// REST client for the remote table service.
#[derive(Debug)]
pub struct HttpRemoteClient {
    base_url: String,
    request_timeout: Duration,
    bound: OnceCell<Bound>,
}

impl HttpRemoteClient {
    /// Creates an unbound client. Nothing is validated until `bind()`.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        HttpRemoteClient {
            base_url: base_url.into(),
            request_timeout,
            bound: OnceCell::new(),
        }
    }

    /// Creates an unbound client from the `[remote]` settings.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.remote.url.clone(), config.request_timeout())
    }

    /// Returns true once `bind()` succeeded.
    pub fn is_bound(&self) -> bool {
        self.bound.initialized()
    }

    fn bound(&self) -> RemoteResult<&Bound> {
        self.bound
            .get()
            .ok_or_else(|| RemoteError::NotBound(self.base_url.clone()))
    }

    fn request(&self, method: Method, url: Url) -> RemoteResult<RequestBuilder> {
        let bound = self.bound()?;
        Ok(bound
            .client
            .request(method, url)
            .header(API_VERSION_HEADER, API_VERSION))
    }

    async fn send(&self, call: Call, builder: RequestBuilder) -> RemoteResult<String> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        debug!(status = status.as_u16(), ?call, "Remote call failed");
        Err(classify(call, status, &body))
    }
}

fn parse_base(raw: &str) -> RemoteResult<Url> {
    let url = Url::parse(raw).map_err(|e| RemoteError::NotBound(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(RemoteError::NotBound(format!(
            "{raw}: expected an http(s) base URL"
        )));
    }
    Ok(url)
}

/// `{base}/tables/{table}[/{id}]`
fn table_url(base: &Url, table: &str, id: Option<&str>) -> RemoteResult<Url> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| RemoteError::NotBound(base.to_string()))?;
        segments.pop_if_empty().extend(["tables", table]);
        if let Some(id) = id {
            segments.push(id);
        }
    }
    Ok(url)
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds the `$filter` expression; `None` when nothing restricts the query.
fn filter_expression(filter: &ItemFilter, since: Option<DateTime<Utc>>) -> Option<String> {
    let mut clauses = Vec::new();

    if let Some(since) = since {
        clauses.push(format!(
            "(updatedAt ge datetimeoffset'{}')",
            since.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
    }
    if let Some(ref id) = filter.id {
        clauses.push(format!("(id eq {})", quote(id)));
    }
    if let Some(done) = filter.done {
        clauses.push(format!("(done eq {done})"));
    }
    if let Some(ref needle) = filter.text_contains {
        clauses.push(format!(
            "substringof({},tolower(text))",
            quote(&needle.to_lowercase())
        ));
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" and "))
    }
}

fn parse_token(token: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(token) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            warn!(token, error = %e, "Ignoring unreadable checkpoint, querying everything");
            None
        }
    }
}

fn query_url(base: &Url, request: &QueryRequest) -> RemoteResult<Url> {
    let mut url = table_url(base, &request.table, None)?;
    let since = request.checkpoint.as_deref().and_then(parse_token);
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(expr) = filter_expression(&request.filter, since) {
            pairs.append_pair("$filter", &expr);
        }
        pairs
            .append_pair("$orderby", "updatedAt")
            .append_pair("$skip", &request.skip.to_string())
            .append_pair("$top", &request.top.to_string())
            .append_pair("__includeDeleted", "true");
    }
    Ok(url)
}

fn page_checkpoint(records: &[RemoteRecord]) -> Option<String> {
    records
        .iter()
        .filter_map(|r| r.item.updated_at)
        .max()
        .map(|newest| newest.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn classify(call: Call, status: StatusCode, body: &str) -> RemoteError {
    match status.as_u16() {
        409 | 412 => RemoteError::Conflict {
            server_item: serde_json::from_str::<Item>(body)
                .ok()
                .filter(|item| item.has_id()),
        },
        404 if matches!(call, Call::Update | Call::Delete) => {
            RemoteError::Conflict { server_item: None }
        }
        408 | 429 | 502 | 503 | 504 => {
            RemoteError::Unavailable(format!("status {}", status.as_u16()))
        }
        code => RemoteError::Rejected {
            status: code,
            message: body.chars().take(200).collect(),
        },
    }
}

fn if_match(builder: RequestBuilder, item: &Item) -> RequestBuilder {
    match item.version {
        Some(ref version) => builder.header(reqwest::header::IF_MATCH, format!("\"{version}\"")),
        None => builder,
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn bind(&self) -> RemoteResult<()> {
        self.bound
            .get_or_try_init(|| async {
                let base = parse_base(&self.base_url)?;
                let client = Client::builder()
                    .timeout(self.request_timeout)
                    .build()
                    .map_err(|e| RemoteError::NotBound(e.to_string()))?;
                info!(url = %base, "Remote client bound");
                Ok::<_, RemoteError>(Bound { client, base })
            })
            .await?;
        Ok(())
    }

    async fn insert(&self, table: &str, item: &Item) -> RemoteResult<Item> {
        let url = table_url(&self.bound()?.base, table, None)?;
        let builder = self.request(Method::POST, url)?.json(item);
        let body = self.send(Call::Insert, builder).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn update(&self, table: &str, item: &Item) -> RemoteResult<Item> {
        let url = table_url(&self.bound()?.base, table, Some(&item.id))?;
        let builder = if_match(self.request(Method::PATCH, url)?, item).json(item);
        let body = self.send(Call::Update, builder).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn delete(&self, table: &str, item: &Item) -> RemoteResult<()> {
        let url = table_url(&self.bound()?.base, table, Some(&item.id))?;
        let builder = if_match(self.request(Method::DELETE, url)?, item);
        self.send(Call::Delete, builder).await?;
        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> RemoteResult<RemotePage> {
        let url = query_url(&self.bound()?.base, request)?;
        let builder = self.request(Method::GET, url)?;
        let body = self.send(Call::Query, builder).await?;

        let records = serde_json::from_str::<QueryBody>(&body)?.into_records();
        let checkpoint = page_checkpoint(&records);
        Ok(RemotePage {
            records,
            checkpoint,
        })
    }
}
