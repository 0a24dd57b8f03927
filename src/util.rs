//! Column-name and keyword helpers shared across engines and the processor.

use serde_json::{Map, Value};

/// Convert a camelCase identifier segment to snake_case.
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase();
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Quote a column reference for raw SQL fragments.
///
/// Each dot-separated segment is snake_cased and wrapped in the dialect's
/// quote character. An ` as ` alias form is preserved with both sides
/// quoted verbatim.
pub fn wrap_column(value: &str, quote: char) -> String {
    if let Some(pos) = value.to_ascii_lowercase().find(" as ") {
        let column = value[..pos].trim();
        let alias = value[pos + 4..].trim();
        return format!("{quote}{column}{quote} as {quote}{alias}{quote}");
    }

    value
        .split('.')
        .map(|segment| format!("{quote}{}{quote}", to_snake_case(segment)))
        .collect::<Vec<_>>()
        .join(".")
}

/// Extract the real column name (or its alias) from an `expr AS alias`
/// form; a bare dotted name yields its last segment.
pub fn extract_column_name(value: &str, wants_alias: bool) -> String {
    let lower = value.to_ascii_lowercase();
    if let Some(pos) = lower.find(" as ") {
        let side = if wants_alias {
            &value[pos + 4..]
        } else {
            &value[..pos]
        };
        return side.trim().to_lowercase();
    }

    if let Some((_, last)) = value.rsplit_once('.') {
        return last.to_string();
    }

    value.to_string()
}

/// Interleave every character of the keyword with the wildcard symbol:
/// `"foo"` becomes `"%f%o%o%"`.
pub fn wildcard_string(keyword: &str, wildcard: char, lowercase: bool) -> String {
    let mut wild = String::with_capacity(keyword.len() * 2 + 1);
    wild.push(wildcard);
    for c in keyword.chars() {
        wild.push(c);
        wild.push(wildcard);
    }

    if lowercase { wild.to_lowercase() } else { wild }
}

/// HTML-escape the five unsafe characters.
pub fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Look up a dotted path in a JSON value.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dotted path on a JSON object, creating intermediate objects.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry.as_object_mut() {
            Some(next) => current = next,
            None => return,
        }
    }
}

/// Remove a dotted path from a JSON object, preserving key order.
pub fn unset_path(target: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            target.shift_remove(path);
        }
        Some((head, rest)) => {
            if let Some(child) = target.get_mut(head).and_then(Value::as_object_mut) {
                unset_path(child, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("name"), "name");
        assert_eq!(to_snake_case("HTTPCode"), "httpcode");
    }

    #[test]
    fn wrap_plain_and_dotted_columns() {
        assert_eq!(wrap_column("name", '`'), "`name`");
        assert_eq!(wrap_column("users.firstName", '`'), "`users`.`first_name`");
        assert_eq!(wrap_column("name", '"'), "\"name\"");
    }

    #[test]
    fn wrap_preserves_alias_form() {
        assert_eq!(wrap_column("name as label", '`'), "`name` as `label`");
    }

    #[test]
    fn extract_name_and_alias() {
        assert_eq!(extract_column_name("name AS label", false), "name");
        assert_eq!(extract_column_name("name AS label", true), "label");
        assert_eq!(extract_column_name("users.name", false), "name");
        assert_eq!(extract_column_name("name", false), "name");
    }

    #[test]
    fn wildcard_interleaving() {
        assert_eq!(wildcard_string("foo", '%', true), "%f%o%o%");
        assert_eq!(wildcard_string("", '%', true), "%");
        assert_eq!(wildcard_string("Ab", '%', false), "%A%b%");
    }

    #[test]
    fn escapes_unsafe_html() {
        assert_eq!(html_escape("<b>x</b>"), "&lt;b&gt;x&lt;/b&gt;");
        assert_eq!(html_escape("a & 'b\""), "a &amp; &#039;b&quot;");
        assert_eq!(html_escape("plain"), "plain");
    }

    #[test]
    fn dotted_path_access() {
        let row = json!({"user": {"name": "ada"}, "id": 1});
        assert_eq!(get_path(&row, "user.name"), Some(&json!("ada")));
        assert_eq!(get_path(&row, "id"), Some(&json!(1)));
        assert_eq!(get_path(&row, "user.missing"), None);
    }

    #[test]
    fn dotted_path_set_creates_intermediates() {
        let mut map = Map::new();
        set_path(&mut map, "user.name", json!("ada"));
        assert_eq!(map["user"]["name"], json!("ada"));
    }

    #[test]
    fn dotted_path_unset_keeps_order() {
        let mut map = serde_json::from_str::<Map<String, Value>>(
            r#"{"a": 1, "b": {"c": 2, "d": 3}, "e": 4}"#,
        )
        .unwrap();
        unset_path(&mut map, "b.c");
        unset_path(&mut map, "a");
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "e"]);
        assert_eq!(map["b"], json!({"d": 3}));
    }
}
