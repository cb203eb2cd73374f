//! HubSpot CRM client: collection paging, single-record reads and property
//! updates for contacts or companies.
//!
//! The collection endpoint decides the object kind; everything here works
//! the same for `/crm/v3/objects/contacts` and `/crm/v3/objects/companies`.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use tpsync_shared::{CrmConfig, RawRecord, Record, Result, TpsyncError};

/// Default timeout in seconds for CRM requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default page size when listing a collection.
const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Service name used in upstream errors.
const SERVICE: &str = "CRM";

/// User-Agent string for CRM requests.
const USER_AGENT: &str = concat!("tpsync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One page of a collection listing.
#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    results: Vec<RawRecord>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    link: String,
}

#[derive(Debug, serde::Serialize)]
struct PropertiesBody<'a> {
    properties: &'a BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client options.
#[derive(Debug, Clone)]
pub struct CrmOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Page size requested when listing.
    pub page_limit: u32,
}

impl Default for CrmOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl From<&CrmConfig> for CrmOptions {
    fn from(config: &CrmConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            page_limit: config.page_limit,
        }
    }
}

impl CrmOptions {
    /// Options for reconciliation writes, which get a longer timeout.
    pub fn for_writes(config: &CrmConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.write_timeout_secs),
            ..Self::from(config)
        }
    }
}

/// Authenticated client for one CRM object collection.
#[derive(Debug, Clone)]
pub struct HubSpotClient {
    client: Client,
    endpoint: Url,
    access_token: String,
    page_limit: u32,
}

impl HubSpotClient {
    /// Create a client for the collection at `endpoint`.
    pub fn new(endpoint: &str, access_token: impl Into<String>, opts: &CrmOptions) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TpsyncError::config(format!("invalid CRM endpoint '{endpoint}': {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| TpsyncError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            access_token: access_token.into(),
            page_limit: opts.page_limit.max(1),
        })
    }

    /// Start a lazy walk over the whole collection, requesting `properties`.
    pub fn pages(&self, properties: &[String]) -> RecordPages<'_> {
        let mut first = self.endpoint.clone();
        first
            .query_pairs_mut()
            .append_pair("properties", &properties.join(","))
            .append_pair("limit", &self.page_limit.to_string());

        RecordPages {
            client: self,
            next: Some(first),
            pages_read: 0,
        }
    }

    /// Fetch every record of the collection.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn fetch_all(&self, properties: &[String]) -> Result<Vec<Record>> {
        self.pages(properties).collect_all().await
    }

    /// Fetch one record by id with the given properties.
    #[instrument(skip(self, properties))]
    pub async fn get_record(&self, id: &str, properties: &[String]) -> Result<Record> {
        let mut url = self.record_url(id)?;
        url.query_pairs_mut()
            .append_pair("properties", &properties.join(","));

        let raw: RawRecord = self.get_json(url).await?;
        Ok(Record::from(raw))
    }

    /// Overwrite `properties` on record `id`.
    #[instrument(skip(self, properties))]
    pub async fn update_properties(
        &self,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        let url = self.record_url(id)?;
        let response = self
            .client
            .patch(url.clone())
            .bearer_auth(&self.access_token)
            .json(&PropertiesBody { properties })
            .send()
            .await
            .map_err(|e| TpsyncError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            debug!(id, "CRM record updated");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TpsyncError::upstream(SERVICE, status.as_u16(), &body))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `<endpoint>/<id>`, without any query.
    fn record_url(&self, id: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| TpsyncError::config(format!("CRM endpoint {} cannot take a path", self.endpoint)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| TpsyncError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TpsyncError::Transport(format!("{url}: failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(TpsyncError::upstream(SERVICE, status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| TpsyncError::malformed(format!("{url}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

/// Forward-only walk over a paginated collection.
///
/// Each call to [`RecordPages::next_page`] performs one request and follows
/// the `paging.next.link` of the previous response. Once exhausted it stays
/// exhausted; start a new walk to read the collection again.
#[derive(Debug)]
pub struct RecordPages<'a> {
    client: &'a HubSpotClient,
    next: Option<Url>,
    pages_read: usize,
}

impl RecordPages<'_> {
    /// Fetch the next page, or `None` when the collection is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };

        let page: ListPage = self.client.get_json(url.clone()).await?;
        self.pages_read += 1;

        if let Some(link) = page.paging.and_then(|p| p.next).map(|n| n.link) {
            let next = self
                .client
                .endpoint
                .join(&link)
                .map_err(|e| TpsyncError::malformed(format!("invalid next link '{link}': {e}")))?;
            if next == url {
                return Err(TpsyncError::malformed(format!(
                    "pagination did not advance past {url}"
                )));
            }
            self.next = Some(next);
        }

        debug!(
            page = self.pages_read,
            records = page.results.len(),
            more = self.next.is_some(),
            "fetched CRM page"
        );
        Ok(Some(page.results.into_iter().map(Record::from).collect()))
    }

    /// Drain the walk into a single vector.
    pub async fn collect_all(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page);
        }
        info!(records = records.len(), pages = self.pages_read, "fetched CRM collection");
        Ok(records)
    }

    /// Number of pages fetched so far.
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }
}
