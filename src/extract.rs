/// Information extraction from (possibly incomplete) sqlmap output.
///
/// Only used to decide whether a timed-out run still produced something
/// worth keeping, so extraction is best-effort and never fails.
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Named fields mapped to whatever was found (`Null` when nothing was).
pub type ExtractedInfo = BTreeMap<String, Value>;

/// Pulls named fields out of raw scan output.
pub trait InfoExtractor: Send + Sync {
    fn extract(&self, output: &str) -> ExtractedInfo;
}

/// `true` if any field holds a non-empty value.
pub fn has_partial_data(info: &ExtractedInfo) -> bool {
    info.values().any(|value| match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    })
}

/// Single-value fields: (name, pattern with one capture group).
static SCALAR_FIELDS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("dbms", Regex::new(r"(?m)back-end DBMS:\s*(.+?)\s*$").unwrap()),
        (
            "web_server_os",
            Regex::new(r"(?m)web server operating system:\s*(.+?)\s*$").unwrap(),
        ),
        (
            "web_app_technology",
            Regex::new(r"(?m)web application technology:\s*(.+?)\s*$").unwrap(),
        ),
        (
            "current_user",
            Regex::new(r"(?m)current user:\s*'?([^'\r\n]+?)'?\s*$").unwrap(),
        ),
        (
            "current_db",
            Regex::new(r"(?m)current database:\s*'?([^'\r\n]+?)'?\s*$").unwrap(),
        ),
    ]
});

/// Multi-value fields: every match, de-duplicated in first-seen order.
static LIST_FIELDS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("parameters", Regex::new(r"(?m)^Parameter:\s*(.+?)\s*$").unwrap()),
        ("techniques", Regex::new(r"(?m)^\s*Type:\s*(.+?)\s*$").unwrap()),
    ]
});

static DATABASES_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"available databases \[\d+\]:\r?\n((?:\[\*\] [^\r\n]+\r?\n?)+)").unwrap()
});

/// Regex-based extractor for sqlmap's console output.
#[derive(Debug, Default)]
pub struct SqlmapInfoExtractor;

impl SqlmapInfoExtractor {
    pub fn new() -> Self {
        SqlmapInfoExtractor
    }
}

impl InfoExtractor for SqlmapInfoExtractor {
    fn extract(&self, output: &str) -> ExtractedInfo {
        let mut info = ExtractedInfo::new();

        for (name, pattern) in SCALAR_FIELDS.iter() {
            let value = pattern
                .captures(output)
                .and_then(|c| c.get(1))
                .map(|m| Value::String(m.as_str().to_string()))
                .unwrap_or(Value::Null);
            info.insert(name.to_string(), value);
        }

        for (name, pattern) in LIST_FIELDS.iter() {
            let values: Vec<String> = pattern
                .captures_iter(output)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect();
            info.insert(name.to_string(), string_array(values));
        }

        let databases: Vec<String> = DATABASES_BLOCK
            .captures_iter(output)
            .filter_map(|c| c.get(1))
            .flat_map(|block| block.as_str().lines())
            .filter_map(|line| line.trim().strip_prefix("[*] "))
            .map(|name| name.trim().to_string())
            .collect();
        info.insert("databases".to_string(), string_array(databases));

        tracing::debug!(partial = has_partial_data(&info), "extracted scan info");
        info
    }
}

fn string_array(values: Vec<String>) -> Value {
    let mut unique: Vec<String> = Vec::new();
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    Value::Array(unique.into_iter().map(Value::String).collect())
}
