//! Engine contract and shared per-request state.
//!
//! `DataTableEngine` defines the filter/search/order/paginate protocol
//! every backend satisfies; orchestration (prepare, counting rules,
//! multi-term search, envelope assembly) is provided here so concrete
//! engines only implement backend translation.

mod collection;
mod executor;
mod model;
mod query;

pub use collection::CollectionDataTable;
pub use executor::{InstrumentationSink, PgExecutor, QueryExecutor};
pub use model::{ModelDataTable, ModelSchema, ModelSource, Relation, RelationKind};
pub use query::{FilterOverride, OrderOverride, QueryDataTable, QuerySource, SqlDialect};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::columns::ColumnRegistry;
use crate::config::DataTableConfig;
use crate::content::ContentRenderer;
use crate::error::Result;
use crate::processor::DataProcessor;
use crate::request::DataTableRequest;
use crate::response::{DataTableResponse, QueryTrace};
use crate::util::{extract_column_name, wildcard_string};

/// State shared by every engine for the lifetime of one request.
pub struct EngineContext {
    pub(crate) request: DataTableRequest,
    pub(crate) config: DataTableConfig,
    pub(crate) registry: ColumnRegistry,
    pub(crate) renderer: Arc<dyn ContentRenderer>,
    pub(crate) sink: Option<Arc<dyn InstrumentationSink>>,
    /// Source columns: the select list, or the first record's keys.
    pub(crate) columns: Vec<String>,
    pub(crate) primary_key: String,
    pub(crate) total_records: u64,
    pub(crate) total_override: Option<u64>,
    pub(crate) filtered_records: Option<u64>,
    pub(crate) skip_total_records: bool,
    pub(crate) skip_paging: bool,
    pub(crate) prepared: bool,
    pub(crate) auto_filter: bool,
    pub(crate) disable_user_ordering: bool,
    pub(crate) filters_applied: u32,
    pub(crate) appends: Map<String, Value>,
    pub(crate) traces: Mutex<Vec<QueryTrace>>,
}

impl EngineContext {
    pub fn new(
        request: DataTableRequest,
        config: DataTableConfig,
        renderer: Arc<dyn ContentRenderer>,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> Self {
        let mut registry = ColumnRegistry::from_config(&config);
        registry.set_requested_columns(request.column_names());
        Self {
            request,
            config,
            registry,
            renderer,
            sink,
            columns: Vec::new(),
            primary_key: "id".to_string(),
            total_records: 0,
            total_override: None,
            filtered_records: None,
            skip_total_records: false,
            skip_paging: false,
            prepared: false,
            auto_filter: true,
            disable_user_ordering: false,
            filters_applied: 0,
            appends: Map::new(),
            traces: Mutex::new(Vec::new()),
        }
    }

    pub fn request(&self) -> &DataTableRequest {
        &self.request
    }

    pub fn config(&self) -> &DataTableConfig {
        &self.config
    }

    pub fn registry(&self) -> &ColumnRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ColumnRegistry {
        &mut self.registry
    }

    /// Count one applied filter predicate; drives the modified-query
    /// detection in [`DataTableEngine::filter_records`].
    pub(crate) fn mark_filtered(&mut self) {
        self.filters_applied += 1;
    }

    /// Resolve the effective column name for a requested column index,
    /// handling numeric `data` members and `expr AS alias` forms.
    pub(crate) fn column_name(&self, index: usize, wants_alias: bool) -> Option<String> {
        let column = self.request.columns().get(index)?;

        let name = match column.name.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => match &column.data {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::Number(_)) => self.column_name_by_index(index),
                _ => return None,
            },
        };

        if name.to_uppercase().contains(" AS ") {
            return Some(extract_column_name(&name, wants_alias));
        }

        Some(name)
    }

    /// Fall back to the source column list; appended columns resolve to
    /// the primary key since they do not exist in the backend.
    pub(crate) fn column_name_by_index(&self, index: usize) -> String {
        let name = self
            .columns
            .get(index)
            .filter(|c| c.as_str() != "*")
            .cloned()
            .unwrap_or_else(|| self.primary_key.clone());

        if self.registry.extra_columns().iter().any(|c| *c == name) {
            self.primary_key.clone()
        } else {
            name
        }
    }

    /// Apply the configured keyword transforms: case folding first, then
    /// exactly one of starts-with, wildcard, or smart wrapping.
    pub(crate) fn setup_keyword(&self, value: &str) -> String {
        let search = &self.config.search;
        let keyword = if search.case_insensitive {
            value.to_lowercase()
        } else {
            value.to_string()
        };

        if search.starts_with {
            return format!("{keyword}%");
        }
        if search.use_wildcards {
            return wildcard_string(&keyword, '%', search.case_insensitive);
        }
        if search.smart {
            return format!("%{keyword}%");
        }
        keyword
    }

    pub(crate) fn record_trace(&self, sql: String, duration: Duration) {
        let trace = QueryTrace {
            sql,
            bindings: Vec::new(),
            duration_ms: duration.as_millis() as u64,
        };
        if let Some(sink) = &self.sink {
            sink.record(&trace);
        }
        if let Ok(mut traces) = self.traces.lock() {
            traces.push(trace);
        }
    }
}

/// The filter/search/order/paginate contract each backend satisfies.
#[async_trait]
pub trait DataTableEngine: Send + Sync {
    fn ctx(&self) -> &EngineContext;
    fn ctx_mut(&mut self) -> &mut EngineContext;

    /// Backend row count for the current query state. Must not mutate
    /// engine state.
    async fn count(&self) -> Result<u64>;

    /// Apply one global search term across all searchable columns
    /// (OR within the term's group, AND against prior filters).
    fn global_search(&mut self, keyword: &str) -> Result<()>;

    /// Apply per-column search terms.
    fn column_search(&mut self) -> Result<()>;

    /// Apply the request's order directives.
    fn default_ordering(&mut self) -> Result<()>;

    /// Apply offset/limit from the request paging window.
    fn paging(&mut self);

    /// Fetch the raw result rows.
    async fn fetch(&mut self) -> Result<Vec<Value>>;

    /// Invoke a registered raw filter callback; returns whether one ran.
    fn apply_filter_callback(&mut self) -> bool {
        false
    }

    /// Invoke a registered order callback; returns whether one ran.
    fn apply_order_callback(&mut self) -> bool {
        false
    }

    /// Engine-specific extra response keys (e.g. callbacks evaluated
    /// against the filtered query).
    fn evaluate_appends(&mut self) -> Map<String, Value> {
        Map::new()
    }

    /// Backend-specific touch-up after row processing.
    fn finalize(&mut self, rows: Vec<Value>) -> Vec<Value> {
        rows
    }

    /// Total count honoring an explicit override.
    async fn total_count(&self) -> Result<u64> {
        match self.ctx().total_override {
            Some(total) => Ok(total),
            None => self.count().await,
        }
    }

    /// Run the global search; multi-term mode applies each whitespace
    /// token in turn so every token must match (AND across tokens).
    fn filtering(&mut self) -> Result<()> {
        let keyword = self.ctx().request.keyword();
        if self.ctx().config.search.multi_term {
            let tokens: Vec<String> = keyword.split_whitespace().map(str::to_string).collect();
            for token in tokens {
                self.global_search(&token)?;
            }
        } else {
            self.global_search(&keyword)?;
        }
        Ok(())
    }

    /// Memoized filtered count.
    async fn filtered_count(&mut self) -> Result<u64> {
        if self.ctx().filtered_records.is_none() {
            let total = self.count().await?;
            self.ctx_mut().filtered_records = Some(total);
        }
        Ok(self.ctx().filtered_records.unwrap_or(0))
    }

    /// Apply automatic global search, the raw filter callback, and
    /// per-column search, then settle the filtered count.
    async fn filter_records(&mut self) -> Result<()> {
        let before = self.ctx().filters_applied;

        if self.ctx().auto_filter && self.ctx().request.is_searchable() {
            self.filtering()?;
        }
        if self.apply_filter_callback() {
            self.ctx_mut().mark_filtered();
        }
        self.column_search()?;

        let modified = self.ctx().filters_applied > before;
        if !self.ctx().skip_total_records && !modified {
            let total = self.ctx().total_records;
            let ctx = self.ctx_mut();
            if ctx.filtered_records.is_none() {
                ctx.filtered_records = Some(total);
            }
        } else {
            self.filtered_count().await?;
            if self.ctx().skip_total_records {
                let filtered = self.ctx().filtered_records.unwrap_or(0);
                self.ctx_mut().total_records = filtered;
            }
        }
        Ok(())
    }

    /// Order the results unless user ordering is disabled; a registered
    /// order callback replaces the default behavior.
    fn ordering(&mut self) -> Result<()> {
        if self.ctx().disable_user_ordering {
            return Ok(());
        }
        if self.apply_order_callback() {
            return Ok(());
        }
        self.default_ordering()
    }

    /// Apply paging when the request asks for it and paging was not
    /// explicitly skipped.
    fn paginate(&mut self) {
        if self.ctx().request.is_paginationable() && !self.ctx().skip_paging {
            self.paging();
        }
    }

    /// One-time query construction: total count, filters, ordering and
    /// paging, gated by the `prepared` flag.
    async fn prepare(&mut self) -> Result<()> {
        if self.ctx().prepared {
            return Ok(());
        }

        if !self.ctx().skip_total_records {
            let total = self.total_count().await?;
            self.ctx_mut().total_records = total;
        }
        self.filter_records().await?;
        self.ordering()?;
        self.paginate();

        self.ctx_mut().prepared = true;
        Ok(())
    }

    /// Run the full pipeline and post-process the fetched rows.
    async fn results(&mut self) -> Result<Vec<Value>> {
        self.prepare().await?;
        let rows = self.fetch().await?;
        let processed = self.process_rows(&rows)?;
        Ok(self.finalize(processed))
    }

    /// Apply column definitions and templates to raw rows.
    fn process_rows(&self, rows: &[Value]) -> Result<Vec<Value>> {
        let ctx = self.ctx();
        let processor = DataProcessor::new(
            &ctx.registry,
            ctx.renderer.as_ref(),
            &ctx.config,
            ctx.request.start(),
        );
        processor.process(rows)
    }

    /// Produce the response envelope; any pipeline failure becomes an
    /// error envelope carrying the draw token.
    async fn to_json(&mut self) -> DataTableResponse {
        match self.results().await {
            Ok(data) => {
                let extra = self.evaluate_appends();
                let ctx = self.ctx();
                let mut merged = ctx.appends.clone();
                for (key, value) in extra {
                    merged.insert(key, value);
                }

                let mut response = DataTableResponse {
                    draw: ctx.request.draw(),
                    records_total: ctx.total_records,
                    records_filtered: ctx.filtered_records.unwrap_or(0),
                    data,
                    error: None,
                    extra: merged,
                    headers: ctx.config.json.headers.clone(),
                    error_status: ctx.config.json.error_status,
                };

                if ctx.config.debug {
                    response
                        .extra
                        .insert("input".to_string(), ctx.request.raw().clone());
                    if let Ok(traces) = ctx.traces.lock()
                        && !traces.is_empty()
                    {
                        response.extra.insert(
                            "queries".to_string(),
                            serde_json::to_value(&*traces).unwrap_or(Value::Null),
                        );
                    }
                }

                response
            }
            Err(error) => {
                tracing::error!(error = %error, "datatable pipeline failed");
                let ctx = self.ctx();
                DataTableResponse {
                    draw: ctx.request.draw(),
                    records_total: ctx.total_records,
                    records_filtered: 0,
                    data: Vec::new(),
                    error: Some(format!("Exception Message: {error}")),
                    extra: Map::new(),
                    headers: ctx.config.json.headers.clone(),
                    error_status: ctx.config.json.error_status,
                }
            }
        }
    }

    /// Skip offset/limit entirely for this request.
    fn skip_paging(&mut self) {
        self.ctx_mut().skip_paging = true;
    }

    /// Skip the unfiltered count; the filtered count doubles as total.
    fn skip_total_records(&mut self) {
        let ctx = self.ctx_mut();
        ctx.total_override = None;
        ctx.skip_total_records = true;
    }

    /// Supply the total count instead of running a count query.
    fn set_total_records(&mut self, total: u64) {
        self.ctx_mut().total_override = Some(total);
    }

    /// Supply the filtered count instead of running a count query.
    fn set_filtered_records(&mut self, total: u64) {
        self.ctx_mut().filtered_records = Some(total);
    }

    /// Disable request-driven ordering; for backends that manage their
    /// own sort order (e.g. search-ranked results).
    fn disable_user_ordering(&mut self) {
        self.ctx_mut().disable_user_ordering = true;
    }

    /// Attach a static extra top-level key to the response.
    fn with_value(&mut self, key: &str, value: Value) {
        self.ctx_mut().appends.insert(key.to_string(), value);
    }

    /// Toggle smart search for this request.
    fn smart(&mut self, state: bool) {
        self.ctx_mut().config.search.smart = state;
    }

    /// Toggle starts-with search for this request.
    fn starts_with_search(&mut self, state: bool) {
        self.ctx_mut().config.search.starts_with = state;
    }
}
