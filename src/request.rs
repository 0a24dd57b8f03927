//! Request parsing.
//!
//! Normalizes the nested grid request payload (draw, paging window,
//! global search, per-column search/order flags) into a typed intent.
//! Absent or malformed values degrade to documented defaults; nothing
//! here raises.

use serde_json::Value;

/// Sort direction for an order directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

impl OrderDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDir::Asc => "asc",
            OrderDir::Desc => "desc",
        }
    }
}

/// One order directive, referencing a requested column by index.
#[derive(Debug, Clone, Copy)]
pub struct OrderDirective {
    pub column: usize,
    pub direction: OrderDir,
}

/// One requested column.
#[derive(Debug, Clone, Default)]
pub struct ColumnRequest {
    /// The `data` member: usually a column name, sometimes a numeric
    /// index for array-sourced tables.
    pub data: Option<Value>,

    /// The optional `name` member; takes precedence over `data` when
    /// non-empty.
    pub name: Option<String>,

    pub searchable: bool,
    pub orderable: bool,

    /// Raw per-column search value (string or array of strings).
    pub search_value: Value,

    /// Whether the per-column keyword is a regular expression.
    pub search_regex: bool,
}

/// Parsed request intent.
#[derive(Debug, Clone, Default)]
pub struct DataTableRequest {
    raw: Value,
    columns: Vec<ColumnRequest>,
    order: Vec<OrderDirective>,
    draw: u64,
    start: Option<i64>,
    length: Option<i64>,
    has_start: bool,
    has_length: bool,
    search_value: Value,
}

impl DataTableRequest {
    /// Parse a nested request payload.
    pub fn from_value(value: &Value) -> Self {
        let columns = value
            .get("columns")
            .and_then(Value::as_array)
            .map(|cols| cols.iter().map(parse_column).collect())
            .unwrap_or_default();

        let order = value
            .get("order")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(parse_order).collect())
            .unwrap_or_default();

        let start_field = non_null(value.get("start"));
        let length_field = non_null(value.get("length"));

        Self {
            raw: value.clone(),
            columns,
            order,
            draw: lenient_i64(non_null(value.get("draw"))).unwrap_or(0).max(0) as u64,
            start: lenient_i64(start_field),
            length: lenient_i64(length_field),
            has_start: start_field.is_some(),
            has_length: length_field.is_some(),
            search_value: value
                .get("search")
                .and_then(|s| s.get("value"))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }

    /// The raw payload, echoed back under `input` when debugging.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn columns(&self) -> &[ColumnRequest] {
        &self.columns
    }

    /// The `name` member of every requested column, in request order.
    /// Columns without a name contribute an empty string.
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.name.clone().unwrap_or_default())
            .collect()
    }

    /// Opaque echo token.
    pub fn draw(&self) -> u64 {
        self.draw
    }

    /// Paging offset; malformed or negative input degrades to 0.
    pub fn start(&self) -> u64 {
        self.start.filter(|s| *s > 0).unwrap_or(0) as u64
    }

    /// Page length; absent, zero, or malformed input degrades to 10.
    /// A requested length of -1 passes through (no limit).
    pub fn length(&self) -> i64 {
        match self.length {
            Some(n) if n != 0 => n,
            _ => 10,
        }
    }

    /// Both paging fields present and a limit was actually requested.
    pub fn is_paginationable(&self) -> bool {
        self.has_start && self.has_length && self.length != Some(-1)
    }

    /// Global search term; array values joined with one space, trimmed.
    pub fn keyword(&self) -> String {
        keyword_of(&self.search_value)
    }

    /// Whether a global search term is present.
    pub fn is_searchable(&self) -> bool {
        !self.keyword().is_empty()
    }

    /// Trimmed per-column search term; empty when absent.
    pub fn column_keyword(&self, index: usize) -> String {
        self.columns
            .get(index)
            .map(|c| keyword_of(&c.search_value))
            .unwrap_or_default()
    }

    /// Whether the per-column keyword is flagged as a regex.
    pub fn is_regex(&self, index: usize) -> bool {
        self.columns.get(index).is_some_and(|c| c.search_regex)
    }

    /// A column participates in search when flagged searchable and,
    /// when `require_keyword` is set, a keyword is present.
    pub fn is_column_searchable(&self, index: usize, require_keyword: bool) -> bool {
        let Some(column) = self.columns.get(index) else {
            return false;
        };
        column.searchable && (!require_keyword || !self.column_keyword(index).is_empty())
    }

    /// Indices of all searchable columns, used for the global search set.
    pub fn searchable_column_indices(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|i| self.is_column_searchable(*i, false))
            .collect()
    }

    pub fn is_column_orderable(&self, index: usize) -> bool {
        self.columns.get(index).is_some_and(|c| c.orderable)
    }

    /// Order directives whose target column is flagged orderable, in
    /// request order.
    pub fn orderable_columns(&self) -> Vec<OrderDirective> {
        self.order
            .iter()
            .filter(|o| self.is_column_orderable(o.column))
            .copied()
            .collect()
    }
}

fn parse_column(value: &Value) -> ColumnRequest {
    ColumnRequest {
        data: non_null(value.get("data")).cloned(),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        searchable: lenient_bool(value.get("searchable"), true),
        orderable: lenient_bool(value.get("orderable"), true),
        search_value: value
            .get("search")
            .and_then(|s| s.get("value"))
            .cloned()
            .unwrap_or(Value::Null),
        search_regex: lenient_bool(value.get("search").and_then(|s| s.get("regex")), false),
    }
}

fn parse_order(value: &Value) -> Option<OrderDirective> {
    let column = lenient_i64(non_null(value.get("column")))?;
    if column < 0 {
        return None;
    }

    // Direction defaults to desc unless the raw value reads "asc".
    let direction = match value.get("dir").and_then(Value::as_str) {
        Some(dir) if dir.eq_ignore_ascii_case("asc") => OrderDir::Asc,
        _ => OrderDir::Desc,
    };

    Some(OrderDirective {
        column: column as usize,
        direction,
    })
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn lenient_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_i64() != Some(0),
        _ => default,
    }
}

fn keyword_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> DataTableRequest {
        DataTableRequest::from_value(&value)
    }

    #[test]
    fn numeric_defaults_on_malformed_input() {
        let req = request(json!({"draw": "abc", "start": null, "length": "oops"}));
        assert_eq!(req.draw(), 0);
        assert_eq!(req.start(), 0);
        assert_eq!(req.length(), 10);
    }

    #[test]
    fn length_of_zero_defaults_to_ten() {
        let req = request(json!({"start": 0, "length": 0}));
        assert_eq!(req.length(), 10);
    }

    #[test]
    fn negative_one_length_disables_pagination() {
        let req = request(json!({"start": 0, "length": -1}));
        assert!(!req.is_paginationable());
        assert_eq!(req.length(), -1);
    }

    #[test]
    fn missing_paging_fields_disable_pagination() {
        assert!(!request(json!({})).is_paginationable());
        assert!(!request(json!({"start": 0})).is_paginationable());
        assert!(request(json!({"start": 0, "length": 25})).is_paginationable());
    }

    #[test]
    fn string_numerics_accepted() {
        let req = request(json!({"draw": "3", "start": "20", "length": "50"}));
        assert_eq!(req.draw(), 3);
        assert_eq!(req.start(), 20);
        assert_eq!(req.length(), 50);
    }

    #[test]
    fn keyword_joins_array_values() {
        let req = request(json!({"search": {"value": ["foo", "bar"]}}));
        assert_eq!(req.keyword(), "foo bar");
    }

    #[test]
    fn keyword_is_trimmed() {
        let req = request(json!({"search": {"value": "  foo  "}}));
        assert_eq!(req.keyword(), "foo");
        assert!(req.is_searchable());
        assert!(!request(json!({})).is_searchable());
    }

    #[test]
    fn searchable_defaults_true() {
        let req = request(json!({"columns": [{"data": "name"}]}));
        assert!(req.is_column_searchable(0, false));
        // but requiring a keyword fails when none was sent
        assert!(!req.is_column_searchable(0, true));
    }

    #[test]
    fn string_flags_parsed() {
        let req = request(json!({"columns": [
            {"data": "name", "searchable": "false", "orderable": "true"},
            {"data": "id", "searchable": "true", "search": {"value": "5", "regex": "true"}},
        ]}));
        assert!(!req.is_column_searchable(0, false));
        assert!(req.is_column_orderable(0));
        assert!(req.is_column_searchable(1, true));
        assert!(req.is_regex(1));
    }

    #[test]
    fn searchable_indices_skip_flagged_columns() {
        let req = request(json!({"columns": [
            {"data": "id", "searchable": false},
            {"data": "name"},
            {"data": "email"},
        ]}));
        assert_eq!(req.searchable_column_indices(), vec![1, 2]);
    }

    #[test]
    fn order_direction_defaults_to_desc() {
        let req = request(json!({
            "columns": [{"data": "id"}, {"data": "name"}],
            "order": [
                {"column": 0, "dir": "ASC"},
                {"column": 1, "dir": "sideways"},
            ],
        }));
        let order = req.orderable_columns();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].direction, OrderDir::Asc);
        assert_eq!(order[1].direction, OrderDir::Desc);
    }

    #[test]
    fn order_skips_unorderable_columns() {
        let req = request(json!({
            "columns": [{"data": "id", "orderable": false}, {"data": "name"}],
            "order": [{"column": 0, "dir": "asc"}, {"column": 1, "dir": "asc"}],
        }));
        let order = req.orderable_columns();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].column, 1);
    }

    #[test]
    fn column_keyword_empty_when_absent() {
        let req = request(json!({"columns": [{"data": "name"}]}));
        assert_eq!(req.column_keyword(0), "");
        assert_eq!(req.column_keyword(7), "");
    }
}
