//! JSONL run log
//!
//! Appends one redacted `RunResult` per line into day-partitioned files
//! (`runs-YYYYMMDD.jsonl`). Purely additive; nothing reads these back.

use crate::orchestrator::types::RunResult;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

pub struct RunLogWriter {
    dir: PathBuf,
}

impl RunLogWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Append one run to the day file matching its `created_at`.
    pub async fn append(&self, run: &RunResult) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create run-log directory")?;

        let day: String = run
            .created_at
            .chars()
            .take(10)
            .filter(|c| *c != '-')
            .collect();
        let path = self.dir.join(format!("runs-{}.jsonl", day));

        let mut line = serde_json::to_string(run).context("Failed to serialize run")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open run log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append run log line")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::{
        MemoryMode, RunConfig, SessionState, StageLatencies,
    };
    use tempfile::TempDir;

    fn run_fixture() -> RunResult {
        RunResult {
            id: "r1".to_string(),
            created_at: "2026-02-04T10:00:00.000Z".to_string(),
            user_id: "demo".to_string(),
            config: RunConfig::new(MemoryMode::Baseline),
            query: "q".to_string(),
            augmented_query: "q (ctx)".to_string(),
            route: None,
            ood: true,
            plan: None,
            used_fallback: false,
            raw_plan_text: None,
            tool_calls: vec![],
            response: "Out of scope".to_string(),
            eval: None,
            latencies: StageLatencies::default(),
            memory_injected: Default::default(),
            session_after: SessionState::default(),
        }
    }

    #[tokio::test]
    async fn test_append_creates_day_file() {
        let temp_dir = TempDir::new().unwrap();
        let writer = RunLogWriter::new(temp_dir.path().to_path_buf());

        writer.append(&run_fixture()).await.unwrap();
        writer.append(&run_fixture()).await.unwrap();

        let content = std::fs::read_to_string(temp_dir.path().join("runs-20260204.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
        let parsed: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["id"], "r1");
    }
}
