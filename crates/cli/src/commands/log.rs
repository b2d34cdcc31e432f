//! `cairn log` — Query log analysis.

use std::path::{Path, PathBuf};

use cairn_agent::{analyze_query_log, export_successful_queries};
use cairn_config::AppConfig;

use crate::bootstrap::BoxError;

fn log_path(file: Option<&str>) -> Result<PathBuf, BoxError> {
    match file {
        Some(file) => Ok(PathBuf::from(file)),
        None => {
            let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
            Ok(config.query_log_path())
        }
    }
}

pub async fn stats(file: Option<&str>) -> Result<(), BoxError> {
    let path = log_path(file)?;
    let stats = analyze_query_log(&path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    println!("{stats}");
    Ok(())
}

/// Write successful question/SQL pairs as a JSON array that
/// `cairn memory seed` accepts.
pub async fn export(output: &str, file: Option<&str>) -> Result<(), BoxError> {
    let path = log_path(file)?;
    let count = export_to(&path, Path::new(output))?;
    println!("Exported {count} training pairs to {output}");
    Ok(())
}

fn export_to(log: &Path, output: &Path) -> Result<usize, BoxError> {
    let pairs = export_successful_queries(log).map_err(|e| format!("Failed to read {}: {e}", log.display()))?;
    std::fs::write(output, serde_json::to_string_pretty(&pairs)?)?;
    Ok(pairs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_agent::TrainingPair;

    #[test]
    fn export_keeps_successful_sql_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("query_log.jsonl");
        let lines = [
            r#"{"timestamp":"2026-01-01T00:00:00Z","tool_name":"run_sql","success":true,"user_id":"ann","question":"How many tracks?","arguments":{"sql":"SELECT COUNT(*) FROM tracks"}}"#,
            r#"{"timestamp":"2026-01-01T00:01:00Z","tool_name":"run_sql","success":false,"user_id":"ann","question":"Broken","arguments":{"sql":"SELEC"},"error":"syntax error"}"#,
        ];
        std::fs::write(&log, lines.join("\n")).unwrap();

        let output = dir.path().join("pairs.json");
        assert_eq!(export_to(&log, &output).unwrap(), 1);

        let pairs: Vec<TrainingPair> = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(pairs[0].question, "How many tracks?");
        assert_eq!(pairs[0].sql, "SELECT COUNT(*) FROM tracks");
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(export_to(&dir.path().join("absent.jsonl"), &dir.path().join("out.json")).is_err());
    }
}
