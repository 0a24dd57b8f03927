//! SQL query-builder engine.
//!
//! Translates the request intent into a sea-query `SelectStatement`:
//! dialect-aware quoting and casting, LIKE/REGEXP predicate generation,
//! keyword preparation, count-by-subquery, order and filter overrides.
//! Statement execution goes through the [`QueryExecutor`] seam.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sea_query::{
    Alias, Asterisk, ColumnRef, Cond, Expr, ExprTrait, IntoColumnRef, MysqlQueryBuilder,
    NullOrdering, Order, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder,
};
use serde_json::{Map, Value};

use super::executor::QueryExecutor;
use super::model::ModelSchema;
use super::{DataTableEngine, EngineContext};
use crate::error::Result;
use crate::request::OrderDir;
use crate::util::wrap_column;

/// SQL dialect the statement is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
}

impl SqlDialect {
    pub(crate) fn quote(self) -> char {
        match self {
            SqlDialect::MySql => '`',
            _ => '"',
        }
    }

    pub(crate) fn placeholder(self) -> &'static str {
        match self {
            SqlDialect::Postgres => "$1",
            _ => "?",
        }
    }

    /// Cast a column to text where LIKE comparisons require it.
    pub(crate) fn cast_column(self, column: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("CAST({column} AS TEXT)"),
            _ => column.to_string(),
        }
    }

    pub(crate) fn render(self, stmt: &SelectStatement) -> String {
        match self {
            SqlDialect::Postgres => stmt.to_string(PostgresQueryBuilder),
            SqlDialect::MySql => stmt.to_string(MysqlQueryBuilder),
            SqlDialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
        }
    }
}

/// A SQL-backed data source: base table, select list, dialect, and the
/// executor performing the round-trips.
pub struct QuerySource {
    pub table: String,
    pub columns: Vec<String>,
    pub dialect: SqlDialect,
    pub executor: Arc<dyn QueryExecutor>,
    pub statement: Option<SelectStatement>,
}

impl QuerySource {
    pub fn new(table: impl Into<String>, dialect: SqlDialect, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            dialect,
            executor,
            statement: None,
        }
    }

    /// Set the select list; defaults to `*`.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Start from a pre-built statement (base filters already applied).
    pub fn statement(mut self, statement: SelectStatement) -> Self {
        self.statement = Some(statement);
        self
    }
}

impl fmt::Debug for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySource")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

/// Per-column ordering override.
#[derive(Clone)]
pub enum OrderOverride {
    /// Suppress ordering on this column entirely.
    Disabled,
    /// Order by a raw SQL expression with optional bound values; the
    /// request direction is applied by the builder.
    Expr {
        sql: String,
        bindings: Vec<sea_query::Value>,
    },
    /// Full control: receives the statement and the request direction.
    Callback(Arc<dyn Fn(&mut SelectStatement, OrderDir) + Send + Sync>),
}

impl OrderOverride {
    pub fn expr(sql: impl Into<String>) -> Self {
        OrderOverride::Expr {
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }

    pub fn expr_with(sql: impl Into<String>, bindings: Vec<sea_query::Value>) -> Self {
        OrderOverride::Expr {
            sql: sql.into(),
            bindings,
        }
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&mut SelectStatement, OrderDir) + Send + Sync + 'static,
    {
        OrderOverride::Callback(Arc::new(f))
    }
}

impl fmt::Debug for OrderOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderOverride::Disabled => f.write_str("Disabled"),
            OrderOverride::Expr { sql, .. } => f.debug_tuple("Expr").field(sql).finish(),
            OrderOverride::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Per-column filter override: builds the search condition for a
/// keyword, bypassing the default LIKE compilation. The returned
/// condition composes into both the global-search OR group and the
/// column-search AND chain.
pub type FilterOverride = Arc<dyn Fn(&str) -> SimpleExpr + Send + Sync>;

type StatementFn = Box<dyn Fn(&mut SelectStatement) + Send + Sync>;
type AppendFn = Box<dyn Fn(&SelectStatement) -> Value + Send + Sync>;

/// Engine over a relational query builder.
pub struct QueryDataTable {
    pub(crate) ctx: EngineContext,
    /// FROM/JOIN/WHERE state; the select list is applied at fetch time
    /// so count subqueries stay projection-free.
    pub(crate) stmt: SelectStatement,
    pub(crate) table: String,
    pub(crate) dialect: SqlDialect,
    pub(crate) executor: Arc<dyn QueryExecutor>,
    /// Set by the model engine; enables relation resolution.
    pub(crate) schema: Option<Arc<ModelSchema>>,
    pub(crate) joined: HashSet<String>,
    selects: Vec<String>,
    nulls_last: bool,
    filter_callback: Option<StatementFn>,
    order_callback: Option<StatementFn>,
    order_overrides: HashMap<String, OrderOverride>,
    filter_overrides: HashMap<String, FilterOverride>,
    query_appends: Vec<(String, AppendFn)>,
}

impl QueryDataTable {
    pub fn new(source: QuerySource, mut ctx: EngineContext) -> Self {
        ctx.columns = source.columns.clone();
        ctx.registry.blacklist_appended_columns();

        let stmt = source.statement.unwrap_or_else(|| {
            let mut stmt = Query::select();
            stmt.from(Alias::new(&source.table));
            stmt
        });

        Self {
            ctx,
            stmt,
            table: source.table,
            dialect: source.dialect,
            executor: source.executor,
            schema: None,
            joined: HashSet::new(),
            selects: source.columns,
            nulls_last: false,
            filter_callback: None,
            order_callback: None,
            order_overrides: HashMap::new(),
            filter_overrides: HashMap::new(),
            query_appends: Vec::new(),
        }
    }

    /// The statement as built so far (filters, joins, ordering, paging).
    pub fn statement(&self) -> &SelectStatement {
        &self.stmt
    }

    /// Mutable access for caller-applied base conditions.
    pub fn statement_mut(&mut self) -> &mut SelectStatement {
        &mut self.stmt
    }

    /// Render the current statement with its select list applied.
    pub fn to_sql(&self) -> String {
        self.dialect.render(&self.select_statement())
    }

    /// Register a raw filter callback; `keep_auto_filter` retains the
    /// automatic global search alongside it.
    pub fn filter<F>(&mut self, f: F, keep_auto_filter: bool) -> &mut Self
    where
        F: Fn(&mut SelectStatement) + Send + Sync + 'static,
    {
        self.ctx.auto_filter = keep_auto_filter;
        self.filter_callback = Some(Box::new(f));
        self
    }

    /// Replace default ordering with a callback.
    pub fn order<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut SelectStatement) + Send + Sync + 'static,
    {
        self.order_callback = Some(Box::new(f));
        self
    }

    /// Override the search predicate for one column.
    pub fn filter_column<F>(&mut self, column: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&str) -> SimpleExpr + Send + Sync + 'static,
    {
        self.filter_overrides.insert(column.into(), Arc::new(f));
        self
    }

    /// Override ordering for one column.
    pub fn order_column(&mut self, column: impl Into<String>, order: OrderOverride) -> &mut Self {
        self.order_overrides.insert(column.into(), order);
        self
    }

    /// Register the same expression override for several columns;
    /// `:column` in the template is replaced per column.
    pub fn order_columns(&mut self, columns: &[&str], sql: &str) -> &mut Self {
        for column in columns {
            self.order_column(*column, OrderOverride::expr(sql.replace(":column", column)));
        }
        self
    }

    /// Push NULL values to the end of ordered results.
    pub fn order_by_nulls_last(&mut self) -> &mut Self {
        self.nulls_last = true;
        self
    }

    /// Attach an extra response key computed from the filtered statement.
    pub fn with_query<F>(&mut self, key: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&SelectStatement) -> Value + Send + Sync + 'static,
    {
        self.query_appends.push((key.into(), Box::new(f)));
        self
    }

    pub(crate) fn has_filter_override(&self, column: &str) -> bool {
        self.filter_overrides.contains_key(column)
    }

    /// Build the default search condition for a column, routing dotted
    /// relation paths through the model schema when one is present.
    pub(crate) fn search_condition(&self, column: &str, keyword: &str) -> Result<SimpleExpr> {
        if self.schema.is_some() {
            self.relation_search_condition(column, keyword)
        } else {
            Ok(self.compile_query_search(column, keyword))
        }
    }

    /// Default contains predicate: prefix, wrap, cast, then LIKE with
    /// the prepared keyword.
    pub(crate) fn compile_query_search(&self, column: &str, keyword: &str) -> SimpleExpr {
        let column = self.prefix_column(column);
        let column = self.dialect.cast_column(&column);
        let keyword = self.ctx.setup_keyword(keyword);
        let placeholder = self.dialect.placeholder();

        let sql = if self.ctx.config.search.case_insensitive {
            format!("LOWER({column}) LIKE {placeholder}")
        } else {
            format!("{column} LIKE {placeholder}")
        };
        Expr::cust_with_values(sql, [keyword])
    }

    /// Dialect-specific regex predicate.
    fn regex_condition(&self, column: &str, keyword: &str) -> SimpleExpr {
        let column = self.prefix_column(column);
        let case_insensitive = self.ctx.config.search.case_insensitive;
        let placeholder = self.dialect.placeholder();

        match self.dialect {
            SqlDialect::Postgres => {
                let column = self.dialect.cast_column(&column);
                let sql = if case_insensitive {
                    format!("{column} ~* {placeholder}")
                } else {
                    format!("{column} ~ {placeholder}")
                };
                Expr::cust_with_values(sql, [keyword.to_string()])
            }
            _ => {
                let (sql, keyword) = if case_insensitive {
                    (
                        format!("LOWER({column}) REGEXP {placeholder}"),
                        keyword.to_lowercase(),
                    )
                } else {
                    (format!("{column} REGEXP {placeholder}"), keyword.to_string())
                };
                Expr::cust_with_values(sql, [keyword])
            }
        }
    }

    /// Qualify a bare column with the base table, then quote it.
    fn prefix_column(&self, column: &str) -> String {
        let qualified = if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.table, column)
        };
        wrap_column(&qualified, self.dialect.quote())
    }

    /// Deduplicated LEFT JOIN used by relation resolution.
    pub(crate) fn perform_join(&mut self, table: &str, condition: SimpleExpr) {
        if self.joined.insert(table.to_string()) {
            self.stmt.left_join(Alias::new(table), condition);
        }
    }

    fn order_by_column(&mut self, column: &str, direction: OrderDir) {
        let order = order_of(direction);
        let column = column_ref(column);
        if self.nulls_last {
            self.stmt.order_by_with_nulls(column, order, NullOrdering::Last);
        } else {
            self.stmt.order_by(column, order);
        }
    }

    fn apply_order_override(&mut self, ov: &OrderOverride, direction: OrderDir) {
        match ov {
            OrderOverride::Disabled => {}
            OrderOverride::Expr { sql, bindings } => {
                let expr = if bindings.is_empty() {
                    Expr::cust(sql.clone())
                } else {
                    Expr::cust_with_values(sql.clone(), bindings.clone())
                };
                self.stmt.order_by_expr(expr, order_of(direction));
            }
            OrderOverride::Callback(f) => f(&mut self.stmt, direction),
        }
    }

    /// The statement with the select list applied.
    fn select_statement(&self) -> SelectStatement {
        let mut stmt = self.stmt.clone();
        if self.selects.is_empty() {
            stmt.column(Asterisk);
        } else {
            for column in &self.selects {
                if column == "*" {
                    stmt.column(Asterisk);
                } else {
                    stmt.column(column_ref(column));
                }
            }
        }
        stmt
    }

    async fn run_count(&self, stmt: &SelectStatement) -> Result<u64> {
        let sql = self.dialect.render(stmt);
        let started = Instant::now();
        let result = self.executor.count(&sql).await;
        self.ctx.record_trace(sql, started.elapsed());
        result
    }
}

fn order_of(direction: OrderDir) -> Order {
    match direction {
        OrderDir::Asc => Order::Asc,
        OrderDir::Desc => Order::Desc,
    }
}

pub(crate) fn column_ref(name: &str) -> ColumnRef {
    match name.split_once('.') {
        Some((table, column)) => (Alias::new(table), Alias::new(column)).into_column_ref(),
        None => Alias::new(name).into_column_ref(),
    }
}

#[async_trait]
impl DataTableEngine for QueryDataTable {
    fn ctx(&self) -> &EngineContext {
        &self.ctx
    }

    fn ctx_mut(&mut self) -> &mut EngineContext {
        &mut self.ctx
    }

    /// Count by wrapping the current filter state in a constant-select
    /// subquery, leaving expensive projections out of the scan.
    async fn count(&self) -> Result<u64> {
        let mut sub = self.stmt.clone();
        sub.expr(Expr::cust("1"));

        let mut query = Query::select();
        query.expr(Expr::col(Asterisk).count());
        query.from_subquery(sub, Alias::new("count_row_table"));

        self.run_count(&query).await
    }

    fn global_search(&mut self, keyword: &str) -> Result<()> {
        let mut group = Cond::any();
        let mut applied = false;

        for index in self.ctx.request.searchable_column_indices() {
            let Some(column) = self.ctx.column_name(index, false) else {
                continue;
            };
            let has_override = self.has_filter_override(&column);
            if self.ctx.registry.is_blacklisted(&column) && !has_override {
                continue;
            }

            let condition = match self.filter_overrides.get(&column) {
                Some(f) => f(keyword),
                None => self.search_condition(&column, keyword)?,
            };
            group = group.add(condition);
            applied = true;
        }

        if applied {
            self.stmt.cond_where(group);
            self.ctx.mark_filtered();
        }
        Ok(())
    }

    fn column_search(&mut self) -> Result<()> {
        for index in 0..self.ctx.request.columns().len() {
            let Some(column) = self.ctx.column_name(index, false) else {
                continue;
            };
            if !self.ctx.request.is_column_searchable(index, true) {
                continue;
            }
            let has_override = self.has_filter_override(&column);
            if self.ctx.registry.is_blacklisted(&column) && !has_override {
                continue;
            }

            let keyword = self.ctx.request.column_keyword(index);
            let override_fn = self.filter_overrides.get(&column).cloned();
            let condition = if let Some(f) = override_fn {
                f(&keyword)
            } else if self.ctx.request.is_regex(index) {
                let resolved = self.resolve_relation_column(&column)?;
                self.regex_condition(&resolved, &keyword)
            } else {
                self.search_condition(&column, &keyword)?
            };

            self.stmt.and_where(condition);
            self.ctx.mark_filtered();
        }
        Ok(())
    }

    fn default_ordering(&mut self) -> Result<()> {
        for directive in self.ctx.request.orderable_columns() {
            let Some(name) = self.ctx.column_name(directive.column, true) else {
                continue;
            };
            if self.ctx.registry.is_blacklisted(&name) && !self.order_overrides.contains_key(&name)
            {
                continue;
            }

            let resolved = self.resolve_relation_column(&name)?;
            let override_key = if self.order_overrides.contains_key(&name) {
                Some(name)
            } else if self.order_overrides.contains_key(&resolved) {
                Some(resolved.clone())
            } else {
                None
            };

            match override_key {
                Some(key) => {
                    if let Some(ov) = self.order_overrides.get(&key).cloned() {
                        self.apply_order_override(&ov, directive.direction);
                    }
                }
                None => self.order_by_column(&resolved, directive.direction),
            }
        }
        Ok(())
    }

    fn paging(&mut self) {
        let start = self.ctx.request.start();
        let length = self.ctx.request.length();
        let limit = if length > 0 { length as u64 } else { 10 };
        self.stmt.offset(start).limit(limit);
    }

    async fn fetch(&mut self) -> Result<Vec<Value>> {
        let sql = self.dialect.render(&self.select_statement());
        let started = Instant::now();
        let result = self.executor.fetch(&sql).await;
        self.ctx.record_trace(sql, started.elapsed());
        result
    }

    fn apply_filter_callback(&mut self) -> bool {
        if let Some(callback) = self.filter_callback.take() {
            callback(&mut self.stmt);
            self.filter_callback = Some(callback);
            true
        } else {
            false
        }
    }

    fn apply_order_callback(&mut self) -> bool {
        if let Some(callback) = self.order_callback.take() {
            callback(&mut self.stmt);
            self.order_callback = Some(callback);
            true
        } else {
            false
        }
    }

    fn evaluate_appends(&mut self) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, f) in &self.query_appends {
            out.insert(key.clone(), f(&self.stmt));
        }
        out
    }
}
