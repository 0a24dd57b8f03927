//! Adapter configuration.
//!
//! Deserialized from whatever configuration source the host application
//! uses; every field has a default so an empty document is valid.

use serde::{Deserialize, Serialize};

/// Which columns get HTML-escaped during post-processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Escape {
    /// Escape every string-valued, non-raw field. Serialized as `"*"`.
    All(String),
    /// Escape exactly these columns (minus declared raw columns).
    Columns(Vec<String>),
}

impl Escape {
    /// The wildcard form.
    pub fn all() -> Self {
        Escape::All("*".to_string())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Escape::All(s) if s == "*")
    }
}

impl Default for Escape {
    fn default() -> Self {
        Escape::all()
    }
}

/// Columns allowed to participate in search/order operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Whitelist {
    /// Every column is allowed. Serialized as `"*"`.
    All(String),
    /// Only these columns are allowed.
    Columns(Vec<String>),
}

impl Whitelist {
    /// The wildcard form.
    pub fn all() -> Self {
        Whitelist::All("*".to_string())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Whitelist::All(s) if s == "*")
    }

    pub fn contains(&self, column: &str) -> bool {
        match self {
            Whitelist::All(s) => s == "*",
            Whitelist::Columns(cols) => cols.iter().any(|c| c == column),
        }
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Whitelist::all()
    }
}

/// Default search behavior flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Wrap keywords in `%…%` unless a more specific transform applies.
    #[serde(default = "default_true")]
    pub smart: bool,

    /// Split the global keyword on whitespace and apply each term in turn.
    #[serde(default = "default_true")]
    pub multi_term: bool,

    /// Lower-case both sides of every comparison.
    #[serde(default)]
    pub case_insensitive: bool,

    /// Interleave every keyword character with the wildcard symbol.
    #[serde(default)]
    pub use_wildcards: bool,

    /// Match keyword prefixes only (`keyword%`).
    #[serde(default)]
    pub starts_with: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            smart: true,
            multi_term: true,
            case_insensitive: false,
            use_wildcards: false,
            starts_with: false,
        }
    }
}

/// Column sets applied to every table unless overridden per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefaults {
    /// Columns always stripped from the final output.
    #[serde(default = "default_excess")]
    pub excess: Vec<String>,

    /// Escaping policy.
    #[serde(default)]
    pub escape: Escape,

    /// Columns exempt from escaping.
    #[serde(default = "default_raw")]
    pub raw: Vec<String>,

    /// Columns excluded from search/order.
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,

    /// Columns admitted to search/order when not blacklisted.
    #[serde(default)]
    pub whitelist: Whitelist,
}

impl Default for ColumnDefaults {
    fn default() -> Self {
        Self {
            excess: default_excess(),
            escape: Escape::default(),
            raw: default_raw(),
            blacklist: default_blacklist(),
            whitelist: Whitelist::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_excess() -> Vec<String> {
    vec!["rn".to_string(), "row_num".to_string()]
}

fn default_raw() -> Vec<String> {
    vec!["action".to_string()]
}

fn default_blacklist() -> Vec<String> {
    vec!["password".to_string(), "remember_token".to_string()]
}

fn default_index_column() -> String {
    "DT_RowIndex".to_string()
}

fn default_error_status() -> u16 {
    200
}

/// JSON response options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonConfig {
    /// Extra headers appended to every rendered response.
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// HTTP status used for error envelopes (200 or 500 in deployments).
    #[serde(default = "default_error_status")]
    pub error_status: u16,
}

/// Complete adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTableConfig {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub columns: ColumnDefaults,

    /// Name of the injected running-index column.
    #[serde(default = "default_index_column")]
    pub index_column: String,

    /// Attach the raw request and query traces to responses.
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub json: JsonConfig,
}

impl Default for DataTableConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            columns: ColumnDefaults::default(),
            index_column: default_index_column(),
            debug: false,
            json: JsonConfig::default(),
        }
    }
}
