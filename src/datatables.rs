//! Engine dispatch.
//!
//! A `DataTables` instance holds the shared configuration, the content
//! renderer, and an ordered list of engine factories. Each factory
//! probes a data source (`can_handle`) and builds the claiming engine;
//! sources nobody claims are a configuration error.

use std::sync::Arc;

use serde_json::Value;

use crate::config::DataTableConfig;
use crate::content::{ContentRenderer, TeraRenderer};
use crate::engine::{
    CollectionDataTable, DataTableEngine, EngineContext, InstrumentationSink, ModelDataTable,
    ModelSource, QueryDataTable, QuerySource,
};
use crate::error::{DataTableError, Result};
use crate::request::DataTableRequest;

/// A backend data source awaiting engine selection.
pub enum DataSource {
    /// A relational query: table, dialect, executor.
    Query(QuerySource),
    /// A model query with relation metadata.
    Model(ModelSource),
    /// An in-memory record collection.
    Collection(Vec<Value>),
}

/// Probe-and-build pair for one engine kind.
pub trait EngineFactory: Send + Sync {
    /// Whether this factory claims the source.
    fn can_handle(&self, source: &DataSource) -> bool;

    /// Build the engine. Returns `None` when handed a source the probe
    /// did not claim.
    fn create(
        &self,
        source: DataSource,
        ctx: EngineContext,
    ) -> Option<Box<dyn DataTableEngine>>;
}

struct ModelFactory;

impl EngineFactory for ModelFactory {
    fn can_handle(&self, source: &DataSource) -> bool {
        matches!(source, DataSource::Model(_))
    }

    fn create(
        &self,
        source: DataSource,
        ctx: EngineContext,
    ) -> Option<Box<dyn DataTableEngine>> {
        match source {
            DataSource::Model(model) => Some(Box::new(ModelDataTable::new(model, ctx))),
            _ => None,
        }
    }
}

struct QueryFactory;

impl EngineFactory for QueryFactory {
    fn can_handle(&self, source: &DataSource) -> bool {
        matches!(source, DataSource::Query(_))
    }

    fn create(
        &self,
        source: DataSource,
        ctx: EngineContext,
    ) -> Option<Box<dyn DataTableEngine>> {
        match source {
            DataSource::Query(query) => Some(Box::new(QueryDataTable::new(query, ctx))),
            _ => None,
        }
    }
}

struct CollectionFactory;

impl EngineFactory for CollectionFactory {
    fn can_handle(&self, source: &DataSource) -> bool {
        matches!(source, DataSource::Collection(_))
    }

    fn create(
        &self,
        source: DataSource,
        ctx: EngineContext,
    ) -> Option<Box<dyn DataTableEngine>> {
        match source {
            DataSource::Collection(rows) => Some(Box::new(CollectionDataTable::new(rows, ctx))),
            _ => None,
        }
    }
}

/// Engine registry and entry point.
pub struct DataTables {
    config: DataTableConfig,
    renderer: Arc<dyn ContentRenderer>,
    sink: Option<Arc<dyn InstrumentationSink>>,
    factories: Vec<Box<dyn EngineFactory>>,
}

impl DataTables {
    /// Registry with the built-in engines: model, query, collection.
    pub fn new(config: DataTableConfig) -> Self {
        Self::with_factories(
            config,
            vec![
                Box::new(ModelFactory),
                Box::new(QueryFactory),
                Box::new(CollectionFactory),
            ],
        )
    }

    /// Registry with an explicit factory list, probed in order.
    pub fn with_factories(config: DataTableConfig, factories: Vec<Box<dyn EngineFactory>>) -> Self {
        Self {
            config,
            renderer: Arc::new(TeraRenderer),
            sink: None,
            factories,
        }
    }

    /// Swap the template renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn ContentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Attach a request-scoped query instrumentation sink.
    pub fn with_sink(mut self, sink: Arc<dyn InstrumentationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register a custom engine ahead of the built-ins.
    pub fn register_engine(&mut self, factory: Box<dyn EngineFactory>) -> &mut Self {
        self.factories.insert(0, factory);
        self
    }

    fn context(&self, request: &Value) -> EngineContext {
        EngineContext::new(
            DataTableRequest::from_value(request),
            self.config.clone(),
            self.renderer.clone(),
            self.sink.clone(),
        )
    }

    /// Select the first engine claiming the source.
    pub fn of(&self, request: &Value, source: DataSource) -> Result<Box<dyn DataTableEngine>> {
        let ctx = self.context(request);
        let factory = self
            .factories
            .iter()
            .find(|f| f.can_handle(&source))
            .ok_or(DataTableError::NoEngine)?;
        factory.create(source, ctx).ok_or(DataTableError::NoEngine)
    }

    /// Typed entry point for in-memory collections.
    pub fn of_collection(&self, request: &Value, rows: Vec<Value>) -> CollectionDataTable {
        CollectionDataTable::new(rows, self.context(request))
    }

    /// Typed entry point for relational queries.
    pub fn of_query(&self, request: &Value, source: QuerySource) -> QueryDataTable {
        QueryDataTable::new(source, self.context(request))
    }

    /// Typed entry point for model queries.
    pub fn of_model(&self, request: &Value, source: ModelSource) -> ModelDataTable {
        ModelDataTable::new(source, self.context(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_source_selects_collection_engine() {
        let tables = DataTables::new(DataTableConfig::default());
        let engine = tables
            .of(&json!({"draw": 1}), DataSource::Collection(vec![]))
            .unwrap();
        // collection engines have no source columns to report
        assert_eq!(engine.ctx().request().draw(), 1);
    }

    #[test]
    fn empty_registry_reports_no_engine() {
        let tables = DataTables::with_factories(DataTableConfig::default(), Vec::new());
        let result = tables.of(&json!({}), DataSource::Collection(vec![]));
        assert!(matches!(result, Err(DataTableError::NoEngine)));
    }

    #[test]
    fn custom_engine_takes_precedence() {
        struct ClaimEverything;

        impl EngineFactory for ClaimEverything {
            fn can_handle(&self, _source: &DataSource) -> bool {
                true
            }

            fn create(
                &self,
                source: DataSource,
                ctx: EngineContext,
            ) -> Option<Box<dyn DataTableEngine>> {
                match source {
                    DataSource::Collection(rows) => {
                        let mut engine = CollectionDataTable::new(rows, ctx);
                        engine.set_offset(99);
                        Some(Box::new(engine))
                    }
                    _ => None,
                }
            }
        }

        let mut tables = DataTables::new(DataTableConfig::default());
        tables.register_engine(Box::new(ClaimEverything));
        assert!(
            tables
                .of(&json!({}), DataSource::Collection(vec![]))
                .is_ok()
        );
    }
}
