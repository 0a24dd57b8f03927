//! In-memory collection engine.
//!
//! Operates on an ordered sequence of JSON records instead of a query
//! handle: predicate filtering, a dotted-key multi-criteria stable
//! sort, and slice paging with an adjustable offset base for embedding
//! inside an already-paginated parent list.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use super::{DataTableEngine, EngineContext};
use crate::error::Result;
use crate::request::OrderDir;
use crate::util::get_path;

type RowPredicate = Arc<dyn Fn(&Value, &str) -> bool + Send + Sync>;
type RowsFn = Box<dyn Fn(&mut Vec<Value>) + Send + Sync>;

/// Engine over an in-memory record collection.
pub struct CollectionDataTable {
    ctx: EngineContext,
    rows: Vec<Value>,
    offset: u64,
    filter_overrides: HashMap<String, RowPredicate>,
    filter_callback: Option<RowsFn>,
    order_callback: Option<RowsFn>,
}

impl CollectionDataTable {
    pub fn new(rows: Vec<Value>, mut ctx: EngineContext) -> Self {
        ctx.columns = rows
            .first()
            .and_then(Value::as_object)
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        Self {
            ctx,
            rows,
            offset: 0,
            filter_overrides: HashMap::new(),
            filter_callback: None,
            order_callback: None,
        }
    }

    /// Offset base subtracted from the request start, for results
    /// embedded in a larger already-paginated list.
    pub fn set_offset(&mut self, offset: u64) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Override the search predicate for one column.
    pub fn filter_column<F>(&mut self, column: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Value, &str) -> bool + Send + Sync + 'static,
    {
        self.filter_overrides.insert(column.into(), Arc::new(f));
        self
    }

    /// Register a raw filter callback over the working set;
    /// `keep_auto_filter` retains the automatic global search.
    pub fn filter<F>(&mut self, f: F, keep_auto_filter: bool) -> &mut Self
    where
        F: Fn(&mut Vec<Value>) + Send + Sync + 'static,
    {
        self.ctx.auto_filter = keep_auto_filter;
        self.filter_callback = Some(Box::new(f));
        self
    }

    /// Replace default ordering with a callback over the working set.
    pub fn order<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Vec<Value>) + Send + Sync + 'static,
    {
        self.order_callback = Some(Box::new(f));
        self
    }

    fn retain_rows<F>(&mut self, predicate: F)
    where
        F: Fn(&Value) -> bool,
    {
        let rows = std::mem::take(&mut self.rows);
        self.rows = rows.into_iter().filter(|row| predicate(row)).collect();
        self.ctx.mark_filtered();
    }
}

/// Substring containment over a JSON leaf; numbers and booleans are
/// matched against their display form.
fn value_contains(value: &Value, needle: &str, fold_case: bool) -> bool {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return false,
    };
    if fold_case {
        text.to_lowercase().contains(needle)
    } else {
        text.contains(needle)
    }
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Integer comparison when both sides are integers, otherwise string
/// comparison, case-folded when configured.
fn compare_values(a: Option<&Value>, b: Option<&Value>, fold_case: bool) -> Ordering {
    if let (Some(Value::Number(x)), Some(Value::Number(y))) = (a, b) {
        if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
            return xi.cmp(&yi);
        }
        if let (Some(xf), Some(yf)) = (x.as_f64(), y.as_f64()) {
            return xf.partial_cmp(&yf).unwrap_or(Ordering::Equal);
        }
    }

    let left = stringify(a);
    let right = stringify(b);
    if fold_case {
        left.to_lowercase().cmp(&right.to_lowercase())
    } else {
        left.cmp(&right)
    }
}

#[async_trait]
impl DataTableEngine for CollectionDataTable {
    fn ctx(&self) -> &EngineContext {
        &self.ctx
    }

    fn ctx_mut(&mut self) -> &mut EngineContext {
        &mut self.ctx
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }

    fn global_search(&mut self, keyword: &str) -> Result<()> {
        let fold_case = self.ctx.config.search.case_insensitive;
        let needle = if fold_case {
            keyword.to_lowercase()
        } else {
            keyword.to_string()
        };

        let mut columns = Vec::new();
        for index in self.ctx.request.searchable_column_indices() {
            let Some(column) = self.ctx.column_name(index, false) else {
                continue;
            };
            let has_override = self.filter_overrides.contains_key(&column);
            if self.ctx.registry.is_blacklisted(&column) && !has_override {
                continue;
            }
            columns.push(column);
        }
        if columns.is_empty() {
            return Ok(());
        }

        let overrides = self.filter_overrides.clone();
        self.retain_rows(|row| {
            columns.iter().any(|column| match overrides.get(column) {
                Some(f) => f(row, &needle),
                None => get_path(row, column)
                    .is_some_and(|value| value_contains(value, &needle, fold_case)),
            })
        });
        Ok(())
    }

    fn column_search(&mut self) -> Result<()> {
        let fold_case = self.ctx.config.search.case_insensitive;

        for index in 0..self.ctx.request.columns().len() {
            let Some(column) = self.ctx.column_name(index, false) else {
                continue;
            };
            if !self.ctx.request.is_column_searchable(index, true) {
                continue;
            }
            let has_override = self.filter_overrides.contains_key(&column);
            if self.ctx.registry.is_blacklisted(&column) && !has_override {
                continue;
            }

            let keyword = self.ctx.request.column_keyword(index);

            if let Some(f) = self.filter_overrides.get(&column).cloned() {
                self.retain_rows(|row| f(row, &keyword));
            } else if self.ctx.request.is_regex(index) {
                let regex: Regex = if fold_case {
                    RegexBuilder::new(&keyword).case_insensitive(true).build()?
                } else {
                    Regex::new(&keyword)?
                };
                self.retain_rows(|row| {
                    get_path(row, &column).is_some_and(|value| match value {
                        Value::String(s) => regex.is_match(s),
                        Value::Number(n) => regex.is_match(&n.to_string()),
                        _ => false,
                    })
                });
            } else {
                let needle = if fold_case {
                    keyword.to_lowercase()
                } else {
                    keyword.clone()
                };
                self.retain_rows(|row| {
                    get_path(row, &column)
                        .is_some_and(|value| value_contains(value, &needle, fold_case))
                });
            }
        }
        Ok(())
    }

    fn default_ordering(&mut self) -> Result<()> {
        let mut directives: Vec<(String, OrderDir)> = Vec::new();
        for directive in self.ctx.request.orderable_columns() {
            let Some(column) = self.ctx.column_name(directive.column, false) else {
                continue;
            };
            if self.ctx.registry.is_blacklisted(&column) {
                continue;
            }
            directives.push((column, directive.direction));
        }
        if directives.is_empty() {
            return Ok(());
        }

        let fold_case = self.ctx.config.search.case_insensitive;
        self.rows.sort_by(|a, b| {
            for (column, direction) in &directives {
                let ordering = compare_values(get_path(a, column), get_path(b, column), fold_case);
                let ordering = match direction {
                    OrderDir::Asc => ordering,
                    OrderDir::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(())
    }

    fn paging(&mut self) {
        let start = self.ctx.request.start().saturating_sub(self.offset) as usize;
        let length = self.ctx.request.length();
        let limit = if length > 0 { length as usize } else { 10 };

        let start = start.min(self.rows.len());
        self.rows = self.rows.split_off(start);
        self.rows.truncate(limit);
    }

    async fn fetch(&mut self) -> Result<Vec<Value>> {
        Ok(self.rows.clone())
    }

    fn apply_filter_callback(&mut self) -> bool {
        if let Some(callback) = self.filter_callback.take() {
            callback(&mut self.rows);
            self.filter_callback = Some(callback);
            true
        } else {
            false
        }
    }

    fn apply_order_callback(&mut self) -> bool {
        if let Some(callback) = self.order_callback.take() {
            callback(&mut self.rows);
            self.order_callback = Some(callback);
            true
        } else {
            false
        }
    }

    /// SQL backends get row positions from OFFSET; here the running
    /// index is renumbered after all other processing.
    fn finalize(&mut self, mut rows: Vec<Value>) -> Vec<Value> {
        if self.ctx.registry.index_enabled() {
            let start = self.ctx.request.start();
            let column = self.ctx.config.index_column.clone();
            for (i, row) in rows.iter_mut().enumerate() {
                if let Some(map) = row.as_object_mut() {
                    map.insert(column.clone(), Value::from(start + i as u64 + 1));
                }
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataTableConfig;
    use crate::content::TeraRenderer;
    use crate::request::DataTableRequest;
    use serde_json::json;

    fn records() -> Vec<Value> {
        vec![
            json!({"id": 2, "name": "b"}),
            json!({"id": 1, "name": "a"}),
            json!({"id": 3, "name": "c"}),
        ]
    }

    fn engine_with(request: Value, config: DataTableConfig, rows: Vec<Value>) -> CollectionDataTable {
        let ctx = EngineContext::new(
            DataTableRequest::from_value(&request),
            config,
            Arc::new(TeraRenderer),
            None,
        );
        CollectionDataTable::new(rows, ctx)
    }

    fn base_request() -> Value {
        json!({
            "draw": 5,
            "start": 0,
            "length": 10,
            "search": {"value": ""},
            "columns": [
                {"data": "id", "searchable": true, "orderable": true},
                {"data": "name", "searchable": true, "orderable": true},
            ],
            "order": [{"column": 1, "dir": "asc"}],
        })
    }

    #[tokio::test]
    async fn sorts_and_echoes_draw_token() {
        let mut dt = engine_with(base_request(), DataTableConfig::default(), records());
        let response = dt.to_json().await;

        assert_eq!(response.draw, 5);
        assert_eq!(response.records_total, 3);
        assert_eq!(response.records_filtered, 3);
        let names: Vec<_> = response
            .data
            .iter()
            .map(|row| row["name"].as_str().unwrap_or("").to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(response.data[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn global_search_case_insensitive() {
        let mut request = base_request();
        request["search"]["value"] = json!("B");
        let mut config = DataTableConfig::default();
        config.search.case_insensitive = true;
        let mut dt = engine_with(request, config, records());
        let response = dt.to_json().await;

        assert_eq!(response.records_total, 3);
        assert_eq!(response.records_filtered, 1);
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn global_search_case_sensitive_by_default() {
        let mut request = base_request();
        request["search"]["value"] = json!("B");
        let mut dt = engine_with(request, DataTableConfig::default(), records());
        let response = dt.to_json().await;
        assert_eq!(response.records_filtered, 0);
    }

    #[tokio::test]
    async fn multi_term_search_requires_every_token() {
        let rows = vec![
            json!({"id": 1, "name": "foo bar"}),
            json!({"id": 2, "name": "foo"}),
            json!({"id": 3, "name": "bar"}),
        ];
        let mut request = base_request();
        request["search"]["value"] = json!("foo bar");
        let mut dt = engine_with(request, DataTableConfig::default(), rows);
        let response = dt.to_json().await;

        assert_eq!(response.records_filtered, 1);
        assert_eq!(response.data[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn numeric_columns_sort_numerically() {
        let rows = vec![
            json!({"id": 10, "name": "j"}),
            json!({"id": 2, "name": "b"}),
            json!({"id": 1, "name": "a"}),
        ];
        let mut request = base_request();
        request["order"] = json!([{"column": 0, "dir": "asc"}]);
        let mut dt = engine_with(request, DataTableConfig::default(), rows);
        let response = dt.to_json().await;

        let ids: Vec<_> = response.data.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(10)]);
    }

    #[tokio::test]
    async fn regex_column_search_filters_rows() {
        let mut request = base_request();
        request["columns"][1]["search"] = json!({"value": "^(a|c)$", "regex": "true"});
        let mut dt = engine_with(request, DataTableConfig::default(), records());
        let response = dt.to_json().await;

        assert_eq!(response.records_filtered, 2);
    }

    #[tokio::test]
    async fn invalid_regex_becomes_error_envelope() {
        let mut request = base_request();
        request["columns"][1]["search"] = json!({"value": "(unclosed", "regex": "true"});
        let mut dt = engine_with(request, DataTableConfig::default(), records());
        let response = dt.to_json().await;

        assert!(response.error.is_some());
        assert!(response.data.is_empty());
        assert_eq!(response.records_filtered, 0);
        assert_eq!(response.draw, 5);
    }

    #[tokio::test]
    async fn paging_slices_the_working_set() {
        let rows: Vec<Value> = (1..=25).map(|i| json!({"id": i, "name": "x"})).collect();
        let mut request = base_request();
        request["start"] = json!(20);
        request["length"] = json!(10);
        request["order"] = json!([{"column": 0, "dir": "asc"}]);
        let mut dt = engine_with(request, DataTableConfig::default(), rows);
        let response = dt.to_json().await;

        assert_eq!(response.data.len(), 5);
        assert_eq!(response.data[0]["id"], json!(21));
        assert_eq!(response.records_total, 25);
    }

    #[tokio::test]
    async fn missing_pagination_returns_every_row() {
        let rows: Vec<Value> = (1..=25).map(|i| json!({"id": i, "name": "x"})).collect();
        let mut request = base_request();
        request["length"] = json!(-1);
        let mut dt = engine_with(request, DataTableConfig::default(), rows);
        let response = dt.to_json().await;
        assert_eq!(response.data.len(), 25);
    }

    #[tokio::test]
    async fn offset_base_shifts_the_slice() {
        let rows: Vec<Value> = (1..=10).map(|i| json!({"id": i, "name": "x"})).collect();
        let mut request = base_request();
        request["start"] = json!(23);
        request["length"] = json!(5);
        request["order"] = json!([{"column": 0, "dir": "asc"}]);
        let mut dt = engine_with(request, DataTableConfig::default(), rows);
        dt.set_offset(20);
        let response = dt.to_json().await;

        assert_eq!(response.data[0]["id"], json!(4));
        assert_eq!(response.data.len(), 5);
    }

    #[tokio::test]
    async fn index_column_renumbered_from_start() {
        let rows: Vec<Value> = (1..=30).map(|i| json!({"id": i, "name": "x"})).collect();
        let mut request = base_request();
        request["start"] = json!(20);
        request["order"] = json!([{"column": 0, "dir": "asc"}]);
        let mut dt = engine_with(request, DataTableConfig::default(), rows);
        dt.ctx_mut().registry_mut().add_index_column();
        let response = dt.to_json().await;

        assert_eq!(response.data[0]["DT_RowIndex"], json!(21));
        assert_eq!(response.data[9]["DT_RowIndex"], json!(30));
    }

    #[tokio::test]
    async fn results_are_stable_across_repeated_calls() {
        let mut request = base_request();
        request["search"]["value"] = json!("a");
        let mut dt = engine_with(request, DataTableConfig::default(), records());

        let first = dt.results().await.unwrap();
        let second = dt.results().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(dt.ctx().filtered_records, Some(1));
    }

    #[tokio::test]
    async fn filter_override_beats_blacklist() {
        let mut request = base_request();
        request["columns"][1]["search"] = json!({"value": "a"});
        let mut dt = engine_with(request, DataTableConfig::default(), records());
        dt.ctx_mut().registry_mut().push_to_blacklist("name");
        dt.filter_column("name", |row, keyword| {
            row["name"].as_str().is_some_and(|name| name == keyword)
        });
        let response = dt.to_json().await;

        assert_eq!(response.records_filtered, 1);
        assert_eq!(response.data[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn filter_callback_narrows_working_set() {
        let mut dt = engine_with(base_request(), DataTableConfig::default(), records());
        dt.filter(
            |rows| rows.retain(|row| row["id"].as_i64().unwrap_or(0) > 1),
            false,
        );
        let response = dt.to_json().await;

        assert_eq!(response.records_total, 3);
        assert_eq!(response.records_filtered, 2);
    }

    #[tokio::test]
    async fn order_callback_replaces_default_ordering() {
        let mut dt = engine_with(base_request(), DataTableConfig::default(), records());
        dt.order(|rows| {
            rows.sort_by_key(|row| std::cmp::Reverse(row["id"].as_i64().unwrap_or(0)));
        });
        let response = dt.to_json().await;
        assert_eq!(response.data[0]["id"], json!(3));
    }

    #[tokio::test]
    async fn disable_user_ordering_keeps_source_order() {
        let mut dt = engine_with(base_request(), DataTableConfig::default(), records());
        dt.disable_user_ordering();
        let response = dt.to_json().await;
        assert_eq!(response.data[0]["id"], json!(2));
    }
}
