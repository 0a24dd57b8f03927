//! Relation-aware model engine.
//!
//! Extends the SQL engine with model metadata: dotted column paths that
//! name declared relations are resolved into LEFT JOIN chains for
//! ordering and nested `WHERE EXISTS` subqueries for searching, keeping
//! one row per parent. Only single-key relations join; anything else is
//! an unsupported-relation error.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use sea_query::{Alias, Expr, ExprTrait, Query, SimpleExpr};
use serde_json::{Map, Value};

use super::executor::QueryExecutor;
use super::query::{QueryDataTable, QuerySource, SqlDialect};
use super::{DataTableEngine, EngineContext};
use crate::error::{DataTableError, Result};

/// Relation cardinality, as declared by the model layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

/// One declared relation: the related table and its key pair.
#[derive(Debug, Clone)]
pub struct Relation {
    pub kind: RelationKind,
    pub table: String,
    /// Key on the owning side (`BelongsTo`) or the related side (`HasOne`).
    pub foreign_key: String,
    pub local_key: String,
    /// Related model schema, required for multi-level relation paths.
    pub related: Option<Box<ModelSchema>>,
}

impl Relation {
    pub fn belongs_to(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            table: table.into(),
            foreign_key: foreign_key.into(),
            local_key: local_key.into(),
            related: None,
        }
    }

    pub fn has_one(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::HasOne,
            table: table.into(),
            foreign_key: foreign_key.into(),
            local_key: local_key.into(),
            related: None,
        }
    }

    pub fn has_many(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::HasMany,
            table: table.into(),
            foreign_key: foreign_key.into(),
            local_key: local_key.into(),
            related: None,
        }
    }

    /// Attach the related model's schema for nested paths.
    pub fn related(mut self, schema: ModelSchema) -> Self {
        self.related = Some(Box::new(schema));
        self
    }
}

/// Model metadata the engine resolves relations against.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    pub table: String,
    pub primary_key: String,
    pub relations: HashMap<String, Relation>,
}

impl ModelSchema {
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            relations: HashMap::new(),
        }
    }

    pub fn relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// Whether every segment of a dotted relation path resolves through
    /// declared relations. Empty, unknown, or self-referential segments
    /// fail; the caller falls back to the literal column.
    pub(crate) fn resolves(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = self;
        for (i, segment) in segments.iter().enumerate() {
            if *segment == self.table {
                return false;
            }
            let Some(relation) = current.relations.get(*segment) else {
                return false;
            };
            if i + 1 < segments.len() {
                match relation.related.as_deref() {
                    Some(next) => current = next,
                    None => return false,
                }
            }
        }
        true
    }
}

/// A model-backed data source: schema plus the underlying query source.
#[derive(Debug)]
pub struct ModelSource {
    pub schema: ModelSchema,
    pub query: QuerySource,
}

impl ModelSource {
    pub fn new(schema: ModelSchema, dialect: SqlDialect, executor: Arc<dyn QueryExecutor>) -> Self {
        let query = QuerySource::new(schema.table.clone(), dialect, executor);
        Self { schema, query }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.query = self.query.columns(columns);
        self
    }

    pub fn statement(mut self, statement: sea_query::SelectStatement) -> Self {
        self.query = self.query.statement(statement);
        self
    }
}

impl QueryDataTable {
    /// Resolve a dotted relation path for ordering by synthesizing a
    /// LEFT JOIN chain; returns the qualified related column. Paths
    /// that do not name declared relations come back unchanged.
    pub(crate) fn resolve_relation_column(&mut self, column: &str) -> Result<String> {
        let Some(schema) = self.schema.clone() else {
            return Ok(column.to_string());
        };
        let Some((path, target)) = column.rsplit_once('.') else {
            return Ok(column.to_string());
        };
        if !schema.resolves(path) {
            return Ok(column.to_string());
        }

        let mut parent_table = schema.table.clone();
        let mut current: Option<&ModelSchema> = Some(&schema);
        for segment in path.split('.') {
            let Some(relation) = current.and_then(|s| s.relations.get(segment)) else {
                break;
            };
            let condition = join_condition(relation, &parent_table)
                .ok_or_else(|| DataTableError::UnsupportedRelation(segment.to_string()))?;
            self.perform_join(&relation.table, condition);
            parent_table = relation.table.clone();
            current = relation.related.as_deref();
        }

        Ok(format!("{parent_table}.{target}"))
    }

    /// Compile a search predicate for a dotted relation path as a nested
    /// `WHERE EXISTS` chain, preserving one-row-per-parent semantics.
    /// Non-relation paths fall back to the default LIKE compilation.
    pub(crate) fn relation_search_condition(
        &self,
        column: &str,
        keyword: &str,
    ) -> Result<SimpleExpr> {
        let Some(schema) = self.schema.clone() else {
            return Ok(self.compile_query_search(column, keyword));
        };
        let Some((path, target)) = column.rsplit_once('.') else {
            return Ok(self.compile_query_search(column, keyword));
        };
        if !schema.resolves(path) {
            return Ok(self.compile_query_search(column, keyword));
        }

        let segments: Vec<&str> = path.split('.').collect();
        self.build_exists(&schema.table, &schema, &segments, target, keyword)
    }

    fn build_exists(
        &self,
        parent_table: &str,
        schema: &ModelSchema,
        segments: &[&str],
        column: &str,
        keyword: &str,
    ) -> Result<SimpleExpr> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(self.compile_query_search(column, keyword));
        };
        let relation = schema
            .relations
            .get(*first)
            .ok_or_else(|| DataTableError::UnsupportedRelation((*first).to_string()))?;
        let link = join_condition(relation, parent_table)
            .ok_or_else(|| DataTableError::UnsupportedRelation((*first).to_string()))?;

        let mut sub = Query::select();
        sub.expr(Expr::cust("1"));
        sub.from(Alias::new(&relation.table));
        sub.and_where(link);

        if rest.is_empty() {
            let qualified = format!("{}.{}", relation.table, column);
            sub.and_where(self.compile_query_search(&qualified, keyword));
        } else {
            let related = relation
                .related
                .as_deref()
                .ok_or_else(|| DataTableError::UnsupportedRelation((*first).to_string()))?;
            sub.and_where(self.build_exists(&relation.table, related, rest, column, keyword)?);
        }

        Ok(Expr::exists(sub).into())
    }
}

/// Link condition between the parent table and a relation's table.
/// Returns `None` for relation kinds the engine cannot join.
fn join_condition(relation: &Relation, parent_table: &str) -> Option<SimpleExpr> {
    match relation.kind {
        RelationKind::BelongsTo => Some(
            Expr::col((Alias::new(&relation.table), Alias::new(&relation.local_key)))
                .equals((Alias::new(parent_table), Alias::new(&relation.foreign_key))),
        ),
        RelationKind::HasOne => Some(
            Expr::col((Alias::new(&relation.table), Alias::new(&relation.foreign_key)))
                .equals((Alias::new(parent_table), Alias::new(&relation.local_key))),
        ),
        _ => None,
    }
}

/// Engine over an ORM-style model query.
pub struct ModelDataTable {
    inner: QueryDataTable,
}

impl ModelDataTable {
    pub fn new(source: ModelSource, ctx: EngineContext) -> Self {
        let ModelSource { schema, query } = source;
        let mut inner = QueryDataTable::new(query, ctx);
        inner.ctx.primary_key = schema.primary_key.clone();
        inner.schema = Some(Arc::new(schema));
        Self { inner }
    }
}

impl Deref for ModelDataTable {
    type Target = QueryDataTable;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for ModelDataTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[async_trait]
impl DataTableEngine for ModelDataTable {
    fn ctx(&self) -> &EngineContext {
        self.inner.ctx()
    }

    fn ctx_mut(&mut self) -> &mut EngineContext {
        self.inner.ctx_mut()
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }

    fn global_search(&mut self, keyword: &str) -> Result<()> {
        self.inner.global_search(keyword)
    }

    fn column_search(&mut self) -> Result<()> {
        self.inner.column_search()
    }

    fn default_ordering(&mut self) -> Result<()> {
        self.inner.default_ordering()
    }

    fn paging(&mut self) {
        self.inner.paging()
    }

    async fn fetch(&mut self) -> Result<Vec<Value>> {
        self.inner.fetch().await
    }

    fn apply_filter_callback(&mut self) -> bool {
        self.inner.apply_filter_callback()
    }

    fn apply_order_callback(&mut self) -> bool {
        self.inner.apply_order_callback()
    }

    fn evaluate_appends(&mut self) -> Map<String, Value> {
        self.inner.evaluate_appends()
    }
}
