use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PagingPolicy;
use crate::domain::{Collection, Record};
use crate::error::MofError;

/// Keys under which a record page may carry its array, in priority order.
pub const RECORD_ARRAY_KEYS: [&str; 3] = ["mofs", "results", "data"];

/// Known collections, used only when the live list cannot be fetched.
pub const FALLBACK_COLLECTIONS: [(&str, u64); 7] = [
    ("CoREMOF 2014", 4764),
    ("CoREMOF 2019", 12020),
    ("CSD", 0),
    ("hMOF", 137953),
    ("IZA", 216),
    ("PCOD-syn", 70),
    ("Tobacco", 13511),
];

pub fn fallback_collections() -> Vec<Collection> {
    FALLBACK_COLLECTIONS
        .iter()
        .map(|(name, count)| Collection::new(*name, *count))
        .collect()
}

/// Raw transport to the catalog. Implementations return decoded JSON bodies;
/// interpretation of their shape happens in [`Catalog`].
pub trait CatalogApi: Send + Sync {
    fn get_collections(&self) -> Result<Value, MofError>;
    fn get_records_page(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Value, MofError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
}

impl CatalogHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MofError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mof-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MofError::CatalogHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MofError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn collections_url(&self) -> String {
        format!("{}/databases.json", self.base_url)
    }

    pub fn records_url(&self) -> String {
        format!("{}/mofs.json", self.base_url)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, MofError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(MofError::CatalogStatus { status, message })
    }

    fn read_json(response: reqwest::blocking::Response) -> Result<Value, MofError> {
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| MofError::Decode(format!("catalog response: {err}")))
    }
}

impl CatalogApi for CatalogHttpClient {
    fn get_collections(&self) -> Result<Value, MofError> {
        let response = self
            .client
            .get(self.collections_url())
            .send()
            .map_err(|err| MofError::CatalogHttp(err.to_string()))?;
        Self::read_json(response)
    }

    fn get_records_page(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Value, MofError> {
        let page = page.to_string();
        let per_page = per_page.to_string();
        let response = self
            .client
            .get(self.records_url())
            .query(&[
                ("database", collection),
                ("page", page.as_str()),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .map_err(|err| MofError::CatalogHttp(err.to_string()))?;
        Self::read_json(response)
    }
}

/// Result of matching a record page against the shapes the catalog is known
/// to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum PageShape {
    Array(Vec<Value>),
    Keyed { key: &'static str, items: Vec<Value> },
    Unknown,
}

impl PageShape {
    pub fn items(self) -> Option<Vec<Value>> {
        match self {
            PageShape::Array(items) | PageShape::Keyed { items, .. } => Some(items),
            PageShape::Unknown => None,
        }
    }
}

pub fn decode_page(body: Value) -> PageShape {
    match body {
        Value::Array(items) => PageShape::Array(items),
        Value::Object(mut fields) => {
            for key in RECORD_ARRAY_KEYS {
                if matches!(fields.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = fields.remove(key) {
                        return PageShape::Keyed { key, items };
                    }
                }
            }
            PageShape::Unknown
        }
        _ => PageShape::Unknown,
    }
}

/// Parses the `/databases.json` body: an array of `{name, mofs}` objects.
pub fn decode_collections(body: &Value) -> Result<Vec<Collection>, MofError> {
    let entries = body
        .as_array()
        .ok_or_else(|| MofError::Decode("collection list is not an array".to_string()))?;
    entries
        .iter()
        .map(|entry| {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| MofError::Decode("collection entry without name".to_string()))?;
            let declared_count = entry.get("mofs").and_then(Value::as_u64).unwrap_or(0);
            Ok(Collection::new(name, declared_count))
        })
        .collect()
}

/// Why pagination over a collection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum PagingStop {
    /// A page came back shorter than the page size.
    LastPage,
    EmptyPage { page: u32 },
    RetriesExhausted { page: u32 },
    UnknownShape { page: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PagingReport {
    pub pages: u32,
    pub records: usize,
    pub stop: PagingStop,
}

#[derive(Clone)]
pub struct Catalog<A: CatalogApi> {
    api: A,
    paging: PagingPolicy,
}

impl<A: CatalogApi> Catalog<A> {
    pub fn new(api: A, paging: PagingPolicy) -> Self {
        Self { api, paging }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn paging(&self) -> PagingPolicy {
        self.paging
    }

    /// Lists the catalog's collections. Never fails: any transport or decode
    /// problem yields the built-in fallback list.
    pub fn list_collections(&self) -> Vec<Collection> {
        match self
            .api
            .get_collections()
            .and_then(|body| decode_collections(&body))
        {
            Ok(collections) => collections,
            Err(err) => {
                warn!(error = %err, "failed to fetch collection list, using built-in list");
                fallback_collections()
            }
        }
    }

    /// Walks the collection page by page, handing every decoded page to
    /// `visitor` before requesting the next one.
    pub fn for_each_page<F>(&self, collection: &str, mut visitor: F) -> PagingReport
    where
        F: FnMut(u32, Vec<Record>),
    {
        let page_size = self.paging.page_size;
        let mut page = 1u32;
        let mut pages = 0u32;
        let mut records = 0usize;
        info!(collection, "fetching records");

        let stop = loop {
            let Some(body) = self.fetch_page_with_retries(collection, page) else {
                warn!(collection, page, "page failed after retries, keeping partial result");
                break PagingStop::RetriesExhausted { page };
            };

            let Some(items) = decode_page(body).items() else {
                warn!(collection, page, "unknown response shape");
                break PagingStop::UnknownShape { page };
            };
            if items.is_empty() {
                debug!(collection, page, "no records on page");
                break PagingStop::EmptyPage { page };
            }

            let item_count = items.len();
            let batch: Vec<Record> = items.into_iter().filter_map(Record::from_value).collect();
            if batch.len() < item_count {
                warn!(
                    collection,
                    page,
                    skipped = item_count - batch.len(),
                    "non-object entries on page"
                );
            }
            pages += 1;
            records += batch.len();
            info!(collection, page, count = batch.len(), total = records, "page fetched");
            visitor(page, batch);

            if item_count < page_size as usize {
                break PagingStop::LastPage;
            }
            page += 1;
        };

        info!(collection, records, "fetch finished");
        PagingReport {
            pages,
            records,
            stop,
        }
    }

    /// Fetches every record of a collection. Pages after a failed one are not
    /// requested; what was received up to that point is returned.
    pub fn fetch_all_records(&self, collection: &str) -> Vec<Record> {
        let mut all = Vec::new();
        self.for_each_page(collection, |_, batch| all.extend(batch));
        all
    }

    fn fetch_page_with_retries(&self, collection: &str, page: u32) -> Option<Value> {
        let attempts = self.paging.max_attempts;
        for attempt in 1..=attempts {
            match self
                .api
                .get_records_page(collection, page, self.paging.page_size)
            {
                Ok(body) => return Some(body),
                Err(err) => {
                    warn!(collection, page, attempt, attempts, error = %err, "page request failed");
                    if attempt < attempts {
                        thread::sleep(self.paging.retry_delay);
                    }
                }
            }
        }
        None
    }
}
