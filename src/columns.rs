//! Per-table column definitions.
//!
//! The registry is the fluent configuration surface callers use before
//! an engine executes: appended and edited columns, projection and
//! exclusion sets, escaping policy, search participation gates, and the
//! four reserved row templates. One registry exists per request.

use serde_json::{Map, Value};

use crate::config::{DataTableConfig, Escape, Whitelist};
use crate::content::Content;

/// Reserved row-metadata keys that always survive the only-projection.
pub const ROW_TEMPLATE_KEYS: [&str; 4] = ["DT_RowId", "DT_RowClass", "DT_RowData", "DT_RowAttr"];

/// A computed column spliced into each row.
#[derive(Debug, Clone)]
pub struct AppendedColumn {
    pub name: String,
    pub content: Content,
    /// Splice position; `None` appends at the end.
    pub position: Option<usize>,
}

/// An override applied to an existing (or appended) column.
#[derive(Debug, Clone)]
pub struct EditedColumn {
    pub name: String,
    pub content: Content,
}

/// Per-row metadata templates consumed by the client grid.
#[derive(Debug, Clone, Default)]
pub struct RowTemplates {
    pub id: Option<Content>,
    pub class: Option<Content>,
    pub data: Vec<(String, Content)>,
    pub attr: Vec<(String, Content)>,
}

/// Mutable column configuration, built via chained setters.
#[derive(Debug, Clone)]
pub struct ColumnRegistry {
    appended: Vec<AppendedColumn>,
    extra_columns: Vec<String>,
    edited: Vec<EditedColumn>,
    only: Vec<String>,
    excess: Vec<String>,
    escape: Escape,
    raw: Vec<String>,
    blacklist: Vec<String>,
    whitelist: Whitelist,
    hidden: Vec<String>,
    visible: Vec<String>,
    index_enabled: bool,
    templates: RowTemplates,
    edit_only_requested: bool,
    requested_columns: Vec<String>,
    blacklist_appended: bool,
    config_raw: Vec<String>,
}

impl ColumnRegistry {
    /// Seed a registry from the configured column defaults.
    pub fn from_config(config: &DataTableConfig) -> Self {
        let defaults = &config.columns;
        Self {
            appended: Vec::new(),
            extra_columns: Vec::new(),
            edited: Vec::new(),
            only: Vec::new(),
            excess: defaults.excess.clone(),
            escape: defaults.escape.clone(),
            raw: defaults.raw.clone(),
            blacklist: defaults.blacklist.clone(),
            whitelist: defaults.whitelist.clone(),
            hidden: Vec::new(),
            visible: Vec::new(),
            index_enabled: false,
            templates: RowTemplates::default(),
            edit_only_requested: false,
            requested_columns: Vec::new(),
            blacklist_appended: false,
            config_raw: defaults.raw.clone(),
        }
    }

    /// Record the request's column names for edit gating.
    pub(crate) fn set_requested_columns(&mut self, names: Vec<String>) {
        self.requested_columns = names;
    }

    /// SQL-backed engines blacklist appended columns automatically so a
    /// computed column never reaches the WHERE clause.
    pub(crate) fn blacklist_appended_columns(&mut self) {
        self.blacklist_appended = true;
    }

    /// Register a computed column, optionally spliced at a position.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        content: impl Into<Content>,
        position: Option<usize>,
    ) -> &mut Self {
        let name = name.into();
        if self.blacklist_appended {
            self.push_to_blacklist(&name);
        }
        self.extra_columns.push(name.clone());
        self.appended.push(AppendedColumn {
            name,
            content: content.into(),
            position,
        });
        self
    }

    /// Enable the running row-index column.
    pub fn add_index_column(&mut self) -> &mut Self {
        self.index_enabled = true;
        self
    }

    /// Override an existing column's value. When
    /// [`edit_only_requested_columns`](Self::edit_only_requested_columns)
    /// is active, edits for columns absent from the request are skipped.
    pub fn edit_column(&mut self, name: impl Into<String>, content: impl Into<Content>) -> &mut Self {
        let name = name.into();
        if self.edit_only_requested
            && !self.requested_columns.is_empty()
            && !self.requested_columns.iter().any(|c| *c == name)
        {
            return self;
        }
        self.edited.push(EditedColumn {
            name,
            content: content.into(),
        });
        self
    }

    /// Skip edits for columns the current request did not ask for.
    pub fn edit_only_requested_columns(&mut self) -> &mut Self {
        self.edit_only_requested = true;
        self
    }

    /// Always strip these columns from the output.
    pub fn remove_column(&mut self, names: &[&str]) -> &mut Self {
        self.excess.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Restrict output to exactly these dotted paths (plus the reserved
    /// row-template keys).
    pub fn only(&mut self, columns: &[&str]) -> &mut Self {
        self.only = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn escape_columns(&mut self, escape: Escape) -> &mut Self {
        self.escape = escape;
        self
    }

    /// Exempt columns from escaping; `merge` keeps the configured
    /// defaults alongside.
    pub fn raw_columns(&mut self, columns: &[&str], merge: bool) -> &mut Self {
        let mut raw: Vec<String> = if merge {
            self.config_raw.clone()
        } else {
            Vec::new()
        };
        raw.extend(columns.iter().map(|c| c.to_string()));
        self.raw = raw;
        self
    }

    pub fn make_hidden(&mut self, attributes: &[&str]) -> &mut Self {
        self.hidden.extend(attributes.iter().map(|a| a.to_string()));
        self
    }

    pub fn make_visible(&mut self, attributes: &[&str]) -> &mut Self {
        self.visible
            .extend(attributes.iter().map(|a| a.to_string()));
        self
    }

    pub fn blacklist(&mut self, columns: &[&str]) -> &mut Self {
        self.blacklist = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn whitelist(&mut self, whitelist: Whitelist) -> &mut Self {
        self.whitelist = whitelist;
        self
    }

    /// Add a column to the blacklist unless already excluded.
    pub fn push_to_blacklist(&mut self, column: &str) -> &mut Self {
        if !self.is_blacklisted(column) {
            self.blacklist.push(column.to_string());
        }
        self
    }

    /// A column is excluded from search/order when blacklisted, or when
    /// an explicit non-wildcard whitelist does not clear it.
    pub fn is_blacklisted(&self, column: &str) -> bool {
        if self.blacklist.iter().any(|c| c == column) {
            return true;
        }
        !self.whitelist.contains(column)
    }

    pub fn set_row_id(&mut self, content: impl Into<Content>) -> &mut Self {
        self.templates.id = Some(content.into());
        self
    }

    pub fn set_row_class(&mut self, content: impl Into<Content>) -> &mut Self {
        self.templates.class = Some(content.into());
        self
    }

    pub fn set_row_data(&mut self, data: Vec<(String, Content)>) -> &mut Self {
        self.templates.data = data;
        self
    }

    pub fn add_row_data(&mut self, key: impl Into<String>, content: impl Into<Content>) -> &mut Self {
        self.templates.data.push((key.into(), content.into()));
        self
    }

    pub fn set_row_attr(&mut self, attr: Vec<(String, Content)>) -> &mut Self {
        self.templates.attr = attr;
        self
    }

    pub fn add_row_attr(&mut self, key: impl Into<String>, content: impl Into<Content>) -> &mut Self {
        self.templates.attr.push((key.into(), content.into()));
        self
    }

    pub fn appended(&self) -> &[AppendedColumn] {
        &self.appended
    }

    pub fn edited(&self) -> &[EditedColumn] {
        &self.edited
    }

    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    pub fn only_columns(&self) -> &[String] {
        &self.only
    }

    pub fn excess_columns(&self) -> &[String] {
        &self.excess
    }

    pub fn escape(&self) -> &Escape {
        &self.escape
    }

    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    pub fn templates(&self) -> &RowTemplates {
        &self.templates
    }

    pub fn index_enabled(&self) -> bool {
        self.index_enabled
    }

    /// Build the hidden/visible attribute filter applied during row
    /// serialization.
    pub(crate) fn attribute_filter(&self) -> AttributeFilter<'_> {
        AttributeFilter {
            hidden: &self.hidden,
            visible: &self.visible,
        }
    }
}

/// Hidden/visible attribute gate for row serialization: hidden wins
/// unless the attribute was made visible again.
pub(crate) struct AttributeFilter<'a> {
    hidden: &'a [String],
    visible: &'a [String],
}

impl AttributeFilter<'_> {
    pub(crate) fn is_hidden(&self, key: &str) -> bool {
        self.hidden.iter().any(|h| h == key) && !self.visible.iter().any(|v| v == key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.hidden.is_empty()
    }
}

/// Serialize a raw row into a plain keyed map, applying the attribute
/// filter at every nesting level.
pub(crate) fn serialize_row(row: &Value, filter: &AttributeFilter<'_>) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(fields) = row.as_object() {
        for (key, value) in fields {
            if !filter.is_empty() && filter.is_hidden(key) {
                continue;
            }
            match value {
                Value::Object(_) => {
                    out.insert(key.clone(), Value::Object(serialize_row(value, filter)));
                }
                other => {
                    out.insert(key.clone(), other.clone());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ColumnRegistry {
        ColumnRegistry::from_config(&DataTableConfig::default())
    }

    #[test]
    fn wildcard_whitelist_only_blocks_blacklisted() {
        let mut reg = registry();
        reg.blacklist(&["secret"]);
        assert!(reg.is_blacklisted("secret"));
        assert!(!reg.is_blacklisted("name"));
    }

    #[test]
    fn explicit_whitelist_is_default_deny() {
        let mut reg = registry();
        reg.blacklist(&[])
            .whitelist(Whitelist::Columns(vec!["a".to_string(), "b".to_string()]));
        assert!(!reg.is_blacklisted("a"));
        assert!(!reg.is_blacklisted("b"));
        assert!(reg.is_blacklisted("c"));
    }

    #[test]
    fn config_blacklist_applies_by_default() {
        let reg = registry();
        assert!(reg.is_blacklisted("password"));
        assert!(reg.is_blacklisted("remember_token"));
    }

    #[test]
    fn push_to_blacklist_is_idempotent() {
        let mut reg = registry();
        reg.push_to_blacklist("votes").push_to_blacklist("votes");
        assert_eq!(
            reg.blacklist.iter().filter(|c| *c == "votes").count(),
            1
        );
    }

    #[test]
    fn appended_columns_blacklisted_for_sql_engines() {
        let mut reg = registry();
        reg.blacklist_appended_columns();
        reg.add_column("action", Content::literal(""), None);
        assert!(reg.is_blacklisted("action"));

        let mut plain = registry();
        plain.add_column("action", Content::literal(""), None);
        assert!(!plain.is_blacklisted("action"));
    }

    #[test]
    fn edit_gating_respects_requested_columns() {
        let mut reg = registry();
        reg.set_requested_columns(vec!["name".to_string()]);
        reg.edit_only_requested_columns();
        reg.edit_column("name", Content::literal("x"))
            .edit_column("email", Content::literal("y"));
        assert_eq!(reg.edited().len(), 1);
        assert_eq!(reg.edited()[0].name, "name");
    }

    #[test]
    fn edit_gating_allows_all_when_no_columns_requested() {
        let mut reg = registry();
        reg.edit_only_requested_columns();
        reg.edit_column("email", Content::literal("y"));
        assert_eq!(reg.edited().len(), 1);
    }

    #[test]
    fn raw_columns_merge_keeps_defaults() {
        let mut reg = registry();
        reg.raw_columns(&["bio"], true);
        assert!(reg.raw().contains(&"action".to_string()));
        assert!(reg.raw().contains(&"bio".to_string()));

        reg.raw_columns(&["bio"], false);
        assert!(!reg.raw().contains(&"action".to_string()));
    }

    #[test]
    fn serialization_skips_hidden_attributes() {
        let mut reg = registry();
        reg.make_hidden(&["secret"]);
        let row = json!({"id": 1, "secret": "x", "rel": {"secret": "y", "ok": 1}});
        let map = serialize_row(&row, &reg.attribute_filter());
        assert!(!map.contains_key("secret"));
        assert_eq!(map["rel"], json!({"ok": 1}));
    }

    #[test]
    fn make_visible_overrides_hidden() {
        let mut reg = registry();
        reg.make_hidden(&["secret"]).make_visible(&["secret"]);
        let row = json!({"secret": "x"});
        let map = serialize_row(&row, &reg.attribute_filter());
        assert!(map.contains_key("secret"));
    }
}
