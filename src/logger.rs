use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

/// How poll bodies are recorded in the message log.
pub enum MessageLogMode {
    Full,
    /// First thermostat record in full, afterwards only the fields that changed.
    Diffed,
}

/// Thermostat record flattened to dotted paths, e.g. `currentSetpoint`.
type Fields = BTreeMap<String, Value>;

/// NDJSON record of traffic to Toon. Form bodies and tokens are never written.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    last_record: Option<Fields>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            last_record: None,
        })
    }

    pub fn log_request(&mut self, method: &str, url: &str) {
        self.record("req", json!({ "method": method, "path": strip_query(url) }));
    }

    pub fn log_write(&mut self, setpoint: i64, body: Option<&Value>) {
        self.record("write", json!({ "setpoint": setpoint, "body": body }));
    }

    /// Polls without a `thermostatInfo` record are logged as received and
    /// leave the diff baseline alone.
    pub fn log_poll(&mut self, status: u16, body: &Value) {
        let record = body.get("thermostatInfo").map(flatten_record);
        let fields = match (&self.mode, record) {
            (MessageLogMode::Diffed, Some(current)) => {
                let fields = match &self.last_record {
                    Some(last) => json!({ "status": status, "changes": record_changes(last, &current) }),
                    None => json!({ "status": status, "full": true, "body": body }),
                };
                self.last_record = Some(current);
                fields
            }
            _ => json!({ "status": status, "body": body }),
        };
        self.record("poll", fields);
    }

    fn record(&mut self, dir: &str, fields: Value) {
        let mut entry = json!({ "ts": Utc::now().to_rfc3339(), "dir": dir });
        if let (Value::Object(entry), Value::Object(fields)) = (&mut entry, fields) {
            entry.extend(fields);
        }
        let mut line = entry.to_string();
        line.push('\n');
        if let Err(e) = self.file.write_all(line.as_bytes()) {
            warn!(error = %e, "failed to append to message log");
        }
    }
}

// Legacy session ids travel in the query string.
fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

fn flatten_record(record: &Value) -> Fields {
    let mut fields = Fields::new();
    flatten_into(record, String::new(), &mut fields);
    fields
}

fn flatten_into(value: &Value, path: String, out: &mut Fields) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten_into(child, child_path, out);
            }
        }
        leaf => {
            out.insert(path, leaf.clone());
        }
    }
}

/// `{path, old, new}` for every field added, changed or removed between two
/// thermostat records. Missing sides read as `null`.
fn record_changes(last: &Fields, current: &Fields) -> Vec<Value> {
    let changed = current
        .iter()
        .filter(|(path, new)| last.get(*path) != Some(*new))
        .map(|(path, new)| (path, last.get(path).cloned().unwrap_or(Value::Null), new.clone()));
    let removed = last
        .iter()
        .filter(|(path, _)| !current.contains_key(*path))
        .map(|(path, old)| (path, old.clone(), Value::Null));
    changed
        .chain(removed)
        .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_request_drops_query_string() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request(
            "GET",
            "https://toonopafstand.eneco.nl/toonMobileBackendWeb/client/auth/retrieveToonState?clientId=secret",
        );

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "GET");
        assert!(!lines[0]["path"].as_str().unwrap().contains("secret"));
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_poll(200, &json!({"thermostatInfo": {"currentDisplayTemp": 2000}}));
        logger.log_poll(200, &json!({"thermostatInfo": {"currentDisplayTemp": 2025}}));
        logger.log_poll(200, &json!({"thermostatInfo": {"currentDisplayTemp": 2025}}));

        let lines = read_lines(path);
        assert_eq!(lines[0]["full"], true);
        assert!(lines[0]["body"].is_object());
        let changes = lines[1]["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["path"], "currentDisplayTemp");
        assert_eq!(changes[0]["old"], 2000);
        assert_eq!(changes[0]["new"], 2025);
        assert_eq!(lines[2]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn diffed_mode_keeps_baseline_across_empty_polls() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_poll(200, &json!({"thermostatInfo": {"currentSetpoint": 1950, "burnerInfo": "1"}}));
        logger.log_poll(200, &json!({"success": true}));
        logger.log_poll(200, &json!({"thermostatInfo": {"currentSetpoint": 2000}}));

        let lines = read_lines(path);
        assert_eq!(lines[1]["body"]["success"], true);
        let changes = lines[2]["changes"].as_array().unwrap();
        assert_eq!(
            *changes,
            vec![
                json!({"path": "currentSetpoint", "old": 1950, "new": 2000}),
                json!({"path": "burnerInfo", "old": "1", "new": null}),
            ]
        );
    }

    #[test]
    fn log_write_captures_setpoint() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_write(2150, Some(&json!({"currentSetpoint": 2150})));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "write");
        assert_eq!(lines[0]["setpoint"], 2150);
        assert_eq!(lines[0]["body"]["currentSetpoint"], 2150);
    }

    #[test]
    fn nested_fields_flatten_to_dotted_paths() {
        let fields = flatten_record(&json!({"boiler": {"pressure": 1.6}, "currentSetpoint": 1950}));
        assert_eq!(fields.get("boiler.pressure"), Some(&json!(1.6)));
        assert_eq!(fields.get("currentSetpoint"), Some(&json!(1950)));
        assert_eq!(fields.len(), 2);
    }
}
