use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::catalog::{Catalog, CatalogApi, PagingReport};
use crate::clean::{CleaningResult, clean_collection};
use crate::domain::{Collection, CollectionSelection};
use crate::error::MofError;
use crate::extract::process_collection;
use crate::pool::WorkerPool;
use crate::store::{Layout, PersistReport, RecordStore, dir_has_entries};

#[derive(Debug, Clone, Serialize)]
pub struct CollectionsResult {
    pub collections: Vec<CollectionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub index: usize,
    pub name: String,
    pub declared_count: u64,
    pub documents_available: bool,
    pub tables_available: bool,
    pub curated_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub items: Vec<FetchItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchItemResult {
    pub collection: String,
    pub fetched_at: String,
    pub paging: PagingReport,
    pub persisted: PersistReport,
    pub missing_cif: usize,
    pub json_dir: String,
    pub cif_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractResult {
    pub items: Vec<ExtractItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractItemResult {
    pub collection: String,
    pub action: String,
    pub tables: usize,
    pub table_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanResult {
    pub items: Vec<CleanItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanItemResult {
    pub collection: String,
    pub action: String,
    pub result: Option<CleaningResult>,
    pub error: Option<String>,
    pub clean_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub fetch: FetchResult,
    pub extract: ExtractResult,
    pub clean: CleanResult,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// The three pipeline stages over one data directory.
#[derive(Clone)]
pub struct App<A: CatalogApi> {
    catalog: Catalog<A>,
    store: RecordStore,
    pool: WorkerPool,
    summary_file: String,
    collections: OnceLock<Vec<Collection>>,
}

impl<A: CatalogApi> App<A> {
    pub fn new(catalog: Catalog<A>, layout: Layout, workers: usize, summary_file: &str) -> Self {
        let pool = WorkerPool::new(workers);
        Self {
            catalog,
            store: RecordStore::with_pool(layout, pool.clone()),
            pool,
            summary_file: summary_file.to_string(),
            collections: OnceLock::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog<A> {
        &self.catalog
    }

    pub fn layout(&self) -> &Layout {
        self.store.layout()
    }

    /// The catalog's collection list, requested at most once per `App`.
    pub fn list_collections(&self) -> &[Collection] {
        self.collections.get_or_init(|| self.catalog.list_collections())
    }

    /// Catalog collections with what each stage has produced locally so far.
    pub fn collections(&self, sink: &dyn ProgressSink) -> CollectionsResult {
        sink.event(ProgressEvent::message("phase=Resolve; listing collections"));
        let layout = self.layout();
        let collections = self
            .list_collections()
            .iter()
            .enumerate()
            .map(|(index, collection)| CollectionStatus {
                index,
                documents_available: dir_has_entries(
                    layout.json_dir(&collection.name).as_std_path(),
                ),
                tables_available: dir_has_entries(
                    layout.table_dir(&collection.name).as_std_path(),
                ),
                curated_available: dir_has_entries(
                    layout.clean_dir(&collection.name).as_std_path(),
                ),
                name: collection.name.clone(),
                declared_count: collection.declared_count,
            })
            .collect();
        CollectionsResult { collections }
    }

    pub fn fetch(
        &self,
        selection: &CollectionSelection,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, MofError> {
        let selected = resolve_selection(selection, self.list_collections())?;
        Ok(self.fetch_collections(&selected, sink))
    }

    pub fn extract(
        &self,
        selection: &CollectionSelection,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractResult, MofError> {
        let selected = resolve_selection(selection, self.list_collections())?;
        Ok(self.extract_collections(&selected, sink))
    }

    pub fn clean(
        &self,
        selection: &CollectionSelection,
        sink: &dyn ProgressSink,
    ) -> Result<CleanResult, MofError> {
        let selected = resolve_selection(selection, self.list_collections())?;
        Ok(self.clean_collections(&selected, sink))
    }

    /// Runs fetch, extract and clean in order against one collection list.
    pub fn run(
        &self,
        selection: &CollectionSelection,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, MofError> {
        let selected = resolve_selection(selection, self.list_collections())?;
        Ok(RunResult {
            fetch: self.fetch_collections(&selected, sink),
            extract: self.extract_collections(&selected, sink),
            clean: self.clean_collections(&selected, sink),
        })
    }

    fn fetch_collections(&self, selected: &[&Collection], sink: &dyn ProgressSink) -> FetchResult {
        let layout = self.layout();
        let items = selected
            .iter()
            .map(|collection| {
                let name = collection.name.as_str();
                sink.event(ProgressEvent::message(format!(
                    "phase=Fetch; {name} ({} declared)",
                    collection.declared_count
                )));
                let start = Instant::now();
                let mut persisted = PersistReport::default();
                let paging = self.catalog.for_each_page(name, |page, batch| {
                    persisted.merge(self.store.persist_all(&batch, name));
                    sink.event(ProgressEvent {
                        message: format!("phase=Store; {name} page {page}: {} records", batch.len()),
                        elapsed: Some(start.elapsed()),
                    });
                });
                FetchItemResult {
                    collection: collection.name.clone(),
                    fetched_at: Utc::now().to_rfc3339(),
                    paging,
                    persisted,
                    missing_cif: persisted.missing_cif(),
                    json_dir: layout.json_dir(name).to_string(),
                    cif_dir: layout.cif_dir(name).to_string(),
                }
            })
            .collect();
        FetchResult { items }
    }

    fn extract_collections(
        &self,
        selected: &[&Collection],
        sink: &dyn ProgressSink,
    ) -> ExtractResult {
        let layout = self.layout();
        let json_root = layout.json_root();
        let table_root = layout.table_root();
        let items = selected
            .iter()
            .map(|collection| {
                let name = collection.name.as_str();
                let table_dir = layout.table_dir(name).to_string();
                if !layout.json_dir(name).as_std_path().is_dir() {
                    sink.event(ProgressEvent::message(format!(
                        "phase=Extract; no documents for {name}, skipping"
                    )));
                    return ExtractItemResult {
                        collection: collection.name.clone(),
                        action: "skipped".to_string(),
                        tables: 0,
                        table_dir,
                    };
                }
                sink.event(ProgressEvent::message(format!("phase=Extract; {name}")));
                let start = Instant::now();
                let tables = process_collection(
                    name,
                    json_root.as_std_path(),
                    table_root.as_std_path(),
                    &self.pool,
                );
                sink.event(ProgressEvent {
                    message: format!("phase=Extract; {name}: {tables} tables"),
                    elapsed: Some(start.elapsed()),
                });
                ExtractItemResult {
                    collection: collection.name.clone(),
                    action: "extracted".to_string(),
                    tables,
                    table_dir,
                }
            })
            .collect();
        ExtractResult { items }
    }

    fn clean_collections(&self, selected: &[&Collection], sink: &dyn ProgressSink) -> CleanResult {
        let layout = self.layout();
        let items = selected
            .iter()
            .map(|collection| {
                let name = collection.name.as_str();
                let table_dir = layout.table_dir(name);
                let clean_dir = layout.clean_dir(name);
                if !table_dir.as_std_path().is_dir() {
                    sink.event(ProgressEvent::message(format!(
                        "phase=Clean; no tables for {name}, skipping"
                    )));
                    return CleanItemResult {
                        collection: collection.name.clone(),
                        action: "skipped".to_string(),
                        result: None,
                        error: None,
                        clean_dir: clean_dir.to_string(),
                    };
                }
                sink.event(ProgressEvent::message(format!("phase=Clean; {name}")));
                match clean_collection(
                    table_dir.as_std_path(),
                    clean_dir.as_std_path(),
                    &self.summary_file,
                ) {
                    Ok(result) => CleanItemResult {
                        collection: collection.name.clone(),
                        action: "cleaned".to_string(),
                        result: Some(result),
                        error: None,
                        clean_dir: clean_dir.to_string(),
                    },
                    Err(err) => {
                        tracing::error!(collection = name, error = %err, "cleaning failed");
                        CleanItemResult {
                            collection: collection.name.clone(),
                            action: "failed".to_string(),
                            result: None,
                            error: Some(err.to_string()),
                            clean_dir: clean_dir.to_string(),
                        }
                    }
                }
            })
            .collect();
        CleanResult { items }
    }
}

/// Resolves a selection; nothing left to work on is an argument error.
pub fn resolve_selection<'a>(
    selection: &CollectionSelection,
    collections: &'a [Collection],
) -> Result<Vec<&'a Collection>, MofError> {
    let selected = selection.resolve(collections);
    if selected.is_empty() {
        return Err(MofError::InvalidSelection(
            "no collection indices resolvable".to_string(),
        ));
    }
    Ok(selected)
}
