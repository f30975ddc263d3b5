//! Query string representation.
//!
//! A [`Query`] keeps the raw `name[=value]` pairs in the order they were received, so a
//! parsed query serializes back to the same string, including repeated names and bare
//! flags. Values are kept exactly as received: no percent-decoding is applied.

use std::fmt;

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, Option<String>)>,
}

/// The view of one query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue<'a> {
    /// the name appeared without `=`, e.g. `?verbose`
    Present,
    Single(&'a str),
    /// the name appeared more than once; `None` entries are bare flags
    Multi(Vec<Option<&'a str>>),
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    // a=1&c=2&b=3
    // ""
    // a=1&a=2
    // a&b&c=2
    pub fn parse(str: &str) -> Self {
        let pairs = str
            .split('&')
            .filter(|kv| !kv.is_empty())
            .map(|kv| match kv.split_once('=') {
                Some((key, value)) => (key.to_owned(), Some(value.to_owned())),
                None => (kv.to_owned(), None),
            })
            .collect();

        Query { pairs }
    }

    /// Builds a query from an already parsed mapping.
    ///
    /// Strings become values, `true` becomes a bare flag, other scalars are stringified and
    /// arrays expand into repeated names. Entries that cannot be represented are skipped
    /// and described in `warnings`.
    pub fn from_map(map: &Map<String, Value>, warnings: &mut Vec<String>) -> Self {
        let mut query = Query::new();
        for (name, value) in map {
            match value {
                Value::Array(items) => {
                    for item in items {
                        match scalar(item) {
                            Ok(item) => query.append(name, item),
                            Err(kind) => warnings.push(format!("query parameter {name} contains {kind}, skipped")),
                        }
                    }
                }
                _ => match scalar(value) {
                    Ok(value) => query.append(name, value),
                    Err(kind) => warnings.push(format!("query parameter {name} is {kind}, skipped")),
                },
            }
        }
        query
    }

    pub fn get(&self, name: &str) -> Option<QueryValue<'_>> {
        let mut values = self.get_all(name);
        match values.len() {
            0 => None,
            1 => Some(values.pop().flatten().map_or(QueryValue::Present, QueryValue::Single)),
            _ => Some(QueryValue::Multi(values)),
        }
    }

    /// Every value recorded for `name`, in order; `None` marks a bare flag.
    pub fn get_all(&self, name: &str) -> Vec<Option<&str>> {
        self.pairs.iter().filter(|(key, _)| key == name).map(|(_, value)| value.as_deref()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(key, _)| key == name)
    }

    pub fn append(&mut self, name: impl Into<String>, value: Option<String>) {
        self.pairs.push((name.into(), value));
    }

    /// Replaces every value of `name` with a single one, keeping the position of the
    /// first occurrence.
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.pairs.iter().position(|(key, _)| *key == name) {
            Some(index) => {
                self.pairs[index].1 = value;
                let mut seen = 0;
                self.pairs.retain(|(key, _)| {
                    if *key != name {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.pairs.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.pairs.len();
        self.pairs.retain(|(key, _)| key != name);
        before != self.pairs.len()
    }

    /// Distinct parameter names in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![];
        for (key, _) in &self.pairs {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
        names
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.pairs.iter().map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn extend(&mut self, other: Query) {
        self.pairs.extend(other.pairs);
    }

    pub fn to_query_string(&self) -> String {
        self.to_string()
    }
}

fn scalar(value: &Value) -> Result<Option<String>, &'static str> {
    match value {
        Value::Bool(true) => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Bool(false) | Value::Number(_) => Ok(Some(value.to_string())),
        Value::Null => Err("null"),
        Value::Array(_) => Err("a nested array"),
        Value::Object(_) => Err("an object"),
    }
}

impl From<&str> for Query {
    fn from(str: &str) -> Self {
        Query::parse(str)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_str("&")?;
            }
            f.write_str(key)?;
            if let Some(value) = value {
                write!(f, "={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_from_empty_str() {
        let query = Query::from("");
        assert!(query.is_empty());
        assert_eq!(query.get("a"), None);
    }

    #[test]
    fn test_query_from_str() {
        {
            let query = Query::from("a=1&b=2");
            assert_eq!(query.len(), 2);
            assert_eq!(query.get("a"), Some(QueryValue::Single("1")));
            assert_eq!(query.get("b"), Some(QueryValue::Single("2")));
        }

        {
            let query = Query::from("a=&b=2&c&a=42");
            assert_eq!(query.names(), vec!["a", "b", "c"]);
            assert_eq!(query.get("a"), Some(QueryValue::Multi(vec![Some(""), Some("42")])));
            assert_eq!(query.get("b"), Some(QueryValue::Single("2")));
            assert_eq!(query.get("c"), Some(QueryValue::Present));
        }
    }

    #[test]
    fn flags_and_duplicates_survive_reserialization() {
        for raw in ["abc&def=bar", "a=1&b=2&a=3", "x&x&x=", "a=&a=", "flag", "k=v%20w"] {
            assert_eq!(Query::parse(raw).to_query_string(), raw);
        }
    }

    #[test]
    fn repeated_flags_are_kept_in_multi() {
        let query = Query::parse("x&x=1&x");
        assert_eq!(query.get("x"), Some(QueryValue::Multi(vec![None, Some("1"), None])));
    }

    #[test]
    fn set_and_remove() {
        let mut query = Query::parse("a=1&b=2&a=3");
        query.set("a", Some("9".into()));
        assert_eq!(query.to_query_string(), "a=9&b=2");

        assert!(query.remove("b"));
        assert!(!query.remove("b"));
        query.set("c", None);
        assert_eq!(query.to_query_string(), "a=9&c");
    }

    #[test]
    fn from_map_coerces_scalars() {
        let map = json!({ "a": "1", "flag": true, "n": 5, "list": ["x", true, 2], "bad": { "o": 1 } });
        let mut warnings = vec![];
        let query = Query::from_map(map.as_object().unwrap(), &mut warnings);

        assert_eq!(query.get("a"), Some(QueryValue::Single("1")));
        assert_eq!(query.get("flag"), Some(QueryValue::Present));
        assert_eq!(query.get("n"), Some(QueryValue::Single("5")));
        assert_eq!(query.get("list"), Some(QueryValue::Multi(vec![Some("x"), None, Some("2")])));
        assert!(!query.contains("bad"));
        assert_eq!(warnings.len(), 1);
    }
}
