//! Server-side adapter for DataTables-style grid requests.
//!
//! Parses the grid's request payload, compiles it into filter, sort,
//! and paging operations against a pluggable backend (sea-query
//! statement, relation-aware model query, or in-memory collection),
//! post-processes the result rows, and assembles the JSON envelope the
//! grid expects.

pub mod columns;
pub mod config;
pub mod content;
pub mod datatables;
pub mod engine;
pub mod error;
pub mod processor;
pub mod request;
pub mod response;
mod util;

pub use columns::ColumnRegistry;
pub use config::{DataTableConfig, Escape, Whitelist};
pub use content::{Content, ContentRenderer, TeraRenderer};
pub use datatables::{DataSource, DataTables, EngineFactory};
pub use engine::{
    CollectionDataTable, DataTableEngine, EngineContext, FilterOverride, InstrumentationSink,
    ModelDataTable, ModelSchema, ModelSource, OrderOverride, PgExecutor, QueryDataTable,
    QueryExecutor, QuerySource, Relation, RelationKind, SqlDialect,
};
pub use error::{DataTableError, Result};
pub use request::DataTableRequest;
pub use response::{DataTableResponse, QueryTrace};
