//! Result row post-processing.
//!
//! Turns raw backend rows into the client-facing shape: appended column
//! splicing, edited column overrides, row-template computation, the
//! only-projection, excess stripping, running-index injection, and HTML
//! escaping.

use serde_json::{Map, Value};

use crate::columns::{serialize_row, ColumnRegistry, ROW_TEMPLATE_KEYS};
use crate::config::DataTableConfig;
use crate::content::ContentRenderer;
use crate::error::Result;
use crate::util::{get_path, html_escape, set_path, unset_path};

/// Applies column definitions and templates to fetched rows.
pub struct DataProcessor<'a> {
    registry: &'a ColumnRegistry,
    renderer: &'a dyn ContentRenderer,
    config: &'a DataTableConfig,
    start: u64,
}

impl<'a> DataProcessor<'a> {
    pub fn new(
        registry: &'a ColumnRegistry,
        renderer: &'a dyn ContentRenderer,
        config: &'a DataTableConfig,
        start: u64,
    ) -> Self {
        Self {
            registry,
            renderer,
            config,
            start,
        }
    }

    /// Process every row in order.
    pub fn process(&self, rows: &[Value]) -> Result<Vec<Value>> {
        let mut output = Vec::with_capacity(rows.len());
        let mut index = self.start;

        for row in rows {
            let filter = self.registry.attribute_filter();
            let mut data = serialize_row(row, &filter);

            self.add_columns(&mut data, row)?;
            self.edit_columns(&mut data, row)?;
            self.setup_row_variables(&mut data, row)?;
            data = self.select_only_columns(data);
            self.remove_excess_columns(&mut data);

            if self.registry.index_enabled() {
                index += 1;
                data.insert(self.config.index_column.clone(), Value::from(index));
            }

            output.push(Value::Object(data));
        }

        self.escape_rows(&mut output);
        Ok(output)
    }

    /// Splice appended columns in at their declared positions.
    fn add_columns(&self, data: &mut Map<String, Value>, row: &Value) -> Result<()> {
        for appended in self.registry.appended() {
            let value = appended.content.resolve(data, row, self.renderer)?;
            splice_column(data, &appended.name, value, appended.position);
        }
        Ok(())
    }

    fn edit_columns(&self, data: &mut Map<String, Value>, row: &Value) -> Result<()> {
        for edited in self.registry.edited() {
            let value = edited.content.resolve(data, row, self.renderer)?;
            set_path(data, &edited.name, value);
        }
        Ok(())
    }

    /// Compute the four reserved row-metadata keys.
    fn setup_row_variables(&self, data: &mut Map<String, Value>, row: &Value) -> Result<()> {
        let templates = self.registry.templates();

        if let Some(content) = &templates.id {
            let value = content.resolve(data, row, self.renderer)?;
            data.insert("DT_RowId".to_string(), value);
        }
        if let Some(content) = &templates.class {
            let value = content.resolve(data, row, self.renderer)?;
            data.insert("DT_RowClass".to_string(), value);
        }
        if !templates.data.is_empty() {
            let mut map = Map::new();
            for (key, content) in &templates.data {
                map.insert(key.clone(), content.resolve(data, row, self.renderer)?);
            }
            data.insert("DT_RowData".to_string(), Value::Object(map));
        }
        if !templates.attr.is_empty() {
            let mut map = Map::new();
            for (key, content) in &templates.attr {
                map.insert(key.clone(), content.resolve(data, row, self.renderer)?);
            }
            data.insert("DT_RowAttr".to_string(), Value::Object(map));
        }
        Ok(())
    }

    /// Restrict to the requested paths; reserved row-template keys
    /// survive whenever present.
    fn select_only_columns(&self, data: Map<String, Value>) -> Map<String, Value> {
        let only = self.registry.only_columns();
        if only.is_empty() {
            return data;
        }

        let source = Value::Object(data);
        let mut result = Map::new();
        for path in only {
            if let Some(value) = get_path(&source, path) {
                set_path(&mut result, path, value.clone());
            }
        }
        for key in ROW_TEMPLATE_KEYS {
            if let Some(value) = source.get(key) {
                result.insert(key.to_string(), value.clone());
            }
        }
        result
    }

    fn remove_excess_columns(&self, data: &mut Map<String, Value>) {
        for path in self.registry.excess_columns() {
            unset_path(data, path);
        }
    }

    fn escape_rows(&self, rows: &mut [Value]) {
        let escape = self.registry.escape();
        let raw = self.registry.raw();

        for row in rows {
            let Some(map) = row.as_object_mut() else {
                continue;
            };
            if escape.is_all() {
                escape_map(map, raw, "");
            } else if let crate::config::Escape::Columns(columns) = escape {
                for column in columns {
                    if raw.iter().any(|r| r == column) {
                        continue;
                    }
                    let escaped = get_path(&Value::Object(map.clone()), column)
                        .and_then(Value::as_str)
                        .map(html_escape);
                    if let Some(value) = escaped {
                        set_path(map, column, Value::String(value));
                    }
                }
            }
        }
    }
}

/// Insert a column at `position` within the key sequence. A position at
/// or past the current key count appends at the end instead.
fn splice_column(data: &mut Map<String, Value>, name: &str, value: Value, position: Option<usize>) {
    let position = match position {
        Some(p) if p < data.len() => p,
        _ => {
            data.insert(name.to_string(), value);
            return;
        }
    };

    let entries: Vec<(String, Value)> = std::mem::take(data).into_iter().collect();
    for (i, (key, existing)) in entries.into_iter().enumerate() {
        if i == position {
            data.insert(name.to_string(), value.clone());
        }
        // A duplicate key keeps its first position; the last write wins.
        data.insert(key, existing);
    }
}

/// Escape every string leaf whose dotted path is not declared raw.
fn escape_map(map: &mut Map<String, Value>, raw: &[String], prefix: &str) {
    for (key, value) in map.iter_mut() {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if raw.iter().any(|r| *r == path) {
            continue;
        }
        match value {
            Value::String(s) => *value = Value::String(html_escape(s)),
            Value::Object(child) => escape_map(child, raw, &path),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Escape;
    use crate::content::{Content, TeraRenderer};
    use serde_json::json;

    fn process_with(
        registry: &ColumnRegistry,
        config: &DataTableConfig,
        start: u64,
        rows: &[Value],
    ) -> Vec<Value> {
        DataProcessor::new(registry, &TeraRenderer, config, start)
            .process(rows)
            .unwrap()
    }

    fn registry() -> ColumnRegistry {
        let mut reg = ColumnRegistry::from_config(&DataTableConfig::default());
        // keep escaping out of the way unless a test opts in
        reg.escape_columns(Escape::Columns(Vec::new()));
        reg
    }

    #[test]
    fn appended_column_at_end_by_default() {
        let mut reg = registry();
        reg.add_column(
            "full",
            Content::callback(|row| {
                json!(format!(
                    "{}-{}",
                    row["id"].as_i64().unwrap_or(0),
                    row["name"].as_str().unwrap_or("")
                ))
            }),
            None,
        );
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"id": 1, "name": "a"})],
        );
        let keys: Vec<_> = rows[0].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["id", "name", "full"]);
        assert_eq!(rows[0]["full"], json!("1-a"));
    }

    #[test]
    fn appended_column_spliced_between_keys() {
        let mut reg = registry();
        reg.add_column("mid", Content::literal("x"), Some(1));
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"id": 1, "name": "a", "email": "e"})],
        );
        let keys: Vec<_> = rows[0].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["id", "mid", "name", "email"]);
    }

    #[test]
    fn splice_position_past_key_count_appends() {
        // One pre-existing key and position 1: the position equals the
        // key count, so the column lands at the end.
        let mut reg = registry();
        reg.add_column("full", Content::literal("x"), Some(1));
        let rows = process_with(&reg, &DataTableConfig::default(), 0, &[json!({"id": 1})]);
        let keys: Vec<_> = rows[0].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["id", "full"]);
    }

    #[test]
    fn edited_column_overrides_value() {
        let mut reg = registry();
        reg.edit_column("name", Content::template("<b>{{ name }}</b>"));
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"id": 1, "name": "a"})],
        );
        assert_eq!(rows[0]["name"], json!("<b>a</b>"));
    }

    #[test]
    fn row_templates_computed_per_row() {
        let mut reg = registry();
        reg.set_row_id(Content::template("row-{{ id }}"))
            .set_row_class(Content::literal("odd"))
            .add_row_data("pk", Content::callback(|row| row["id"].clone()));
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"id": 3, "name": "c"})],
        );
        assert_eq!(rows[0]["DT_RowId"], json!("row-3"));
        assert_eq!(rows[0]["DT_RowClass"], json!("odd"));
        assert_eq!(rows[0]["DT_RowData"], json!({"pk": 3}));
    }

    #[test]
    fn only_projection_keeps_reserved_keys() {
        let mut reg = registry();
        reg.set_row_id(Content::template("row-{{ id }}"));
        reg.only(&["name"]);
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"id": 1, "name": "a", "email": "e"})],
        );
        let obj = rows[0].as_object().unwrap();
        assert_eq!(
            obj.keys().cloned().collect::<Vec<_>>(),
            vec!["name", "DT_RowId"]
        );
    }

    #[test]
    fn excess_columns_removed() {
        let mut reg = registry();
        reg.remove_column(&["email", "meta.internal"]);
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"id": 1, "email": "e", "meta": {"internal": 1, "public": 2}})],
        );
        let obj = rows[0].as_object().unwrap();
        assert!(!obj.contains_key("email"));
        assert_eq!(obj["meta"], json!({"public": 2}));
    }

    #[test]
    fn index_column_starts_after_offset() {
        let mut reg = registry();
        reg.add_index_column();
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            20,
            &[json!({"id": 1}), json!({"id": 2})],
        );
        assert_eq!(rows[0]["DT_RowIndex"], json!(21));
        assert_eq!(rows[1]["DT_RowIndex"], json!(22));
    }

    #[test]
    fn escape_all_respects_raw_columns() {
        let mut reg = registry();
        reg.escape_columns(Escape::all()).raw_columns(&["bio"], false);
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"name": "<b>x</b>", "bio": "<b>x</b>"})],
        );
        assert_eq!(rows[0]["name"], json!("&lt;b&gt;x&lt;/b&gt;"));
        assert_eq!(rows[0]["bio"], json!("<b>x</b>"));
    }

    #[test]
    fn escape_listed_columns_only() {
        let mut reg = registry();
        reg.escape_columns(Escape::Columns(vec!["name".to_string()]));
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"name": "<i>", "note": "<i>"})],
        );
        assert_eq!(rows[0]["name"], json!("&lt;i&gt;"));
        assert_eq!(rows[0]["note"], json!("<i>"));
    }

    #[test]
    fn escape_all_reaches_nested_fields() {
        let mut reg = registry();
        reg.escape_columns(Escape::all());
        let rows = process_with(
            &reg,
            &DataTableConfig::default(),
            0,
            &[json!({"rel": {"name": "<x>", "skip": 1}})],
        );
        assert_eq!(rows[0]["rel"]["name"], json!("&lt;x&gt;"));
        assert_eq!(rows[0]["rel"]["skip"], json!(1));
    }
}
