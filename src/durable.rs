//! Durable, replayable workflow steps.
//!
//! Every side-effecting unit of a run is executed through [`Steps::run`]. The
//! successful output is written to a [`StepJournal`]; when the same run is
//! executed again after an interruption, journaled steps return their
//! recorded output without running again.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A recorded step output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Deterministic step id within the run.
    pub step_id: String,
    /// JSON-encoded step output.
    pub output: serde_json::Value,
    /// When the step completed.
    pub recorded_at: DateTime<Utc>,
}

/// Storage for completed steps, keyed by run id and step id.
pub trait StepJournal: Send + Sync {
    /// Returns the record for a step, if it already completed.
    fn load(&self, run_id: &str, step_id: &str) -> Result<Option<StepRecord>>;

    /// Records a completed step.
    fn record(&self, run_id: &str, record: StepRecord) -> Result<()>;
}

/// In-memory journal. Survives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    runs: Mutex<HashMap<String, Vec<StepRecord>>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded step ids for a run, in completion order.
    pub fn step_ids(&self, run_id: &str) -> Vec<String> {
        let runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        runs.get(run_id)
            .map(|records| records.iter().map(|r| r.step_id.clone()).collect())
            .unwrap_or_default()
    }
}

impl StepJournal for MemoryJournal {
    fn load(&self, run_id: &str, step_id: &str) -> Result<Option<StepRecord>> {
        let runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        Ok(runs
            .get(run_id)
            .and_then(|records| records.iter().find(|r| r.step_id == step_id))
            .cloned())
    }

    fn record(&self, run_id: &str, record: StepRecord) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        let records = runs.entry(run_id.to_string()).or_default();
        records.retain(|r| r.step_id != record.step_id);
        records.push(record);
        Ok(())
    }
}

/// Journal persisted as one JSON document per run.
#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileJournal {
    /// Creates a journal storing runs under `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    /// Returns the journal file path for a run.
    pub fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    fn read_run(path: &Path) -> Result<Vec<StepRecord>> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Journal(format!("corrupt journal {:?}: {}", path, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::Journal(format!("failed to read {:?}: {}", path, e))),
        }
    }
}

impl StepJournal for FileJournal {
    fn load(&self, run_id: &str, step_id: &str) -> Result<Option<StepRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let records = Self::read_run(&self.run_path(run_id))?;
        Ok(records.into_iter().find(|r| r.step_id == step_id))
    }

    fn record(&self, run_id: &str, record: StepRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.run_path(run_id);
        let mut records = Self::read_run(&path)?;
        records.retain(|r| r.step_id != record.step_id);
        records.push(record);

        std::fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&records)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Step executor for a single run.
pub struct Steps {
    run_id: String,
    journal: Arc<dyn StepJournal>,
    occurrences: Mutex<HashMap<String, u32>>,
}

impl Steps {
    /// Creates a step executor for `run_id`.
    pub fn new(run_id: impl Into<String>, journal: Arc<dyn StepJournal>) -> Self {
        Self {
            run_id: run_id.into(),
            journal,
            occurrences: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the run id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Allocates the next deterministic id for `name`: `name`, `name:1`, ...
    fn next_step_id(&self, name: &str) -> String {
        let mut occurrences = self.occurrences.lock().unwrap_or_else(|p| p.into_inner());
        let count = occurrences.entry(name.to_string()).or_insert(0);
        let id = if *count == 0 {
            name.to_string()
        } else {
            format!("{}:{}", name, count)
        };
        *count += 1;
        id
    }

    /// Runs a step at most once per run.
    ///
    /// Returns the journaled output if the step already completed; otherwise
    /// executes `f`, records a successful output and returns it. Errors are
    /// not recorded, so the step executes again on the next attempt.
    pub async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let step_id = self.next_step_id(name);

        if let Some(record) = self.journal.load(&self.run_id, &step_id)? {
            tracing::debug!(run_id = %self.run_id, step = %step_id, "replaying recorded step");
            return serde_json::from_value(record.output).map_err(|e| {
                Error::Journal(format!("step {} output does not decode: {}", step_id, e))
            });
        }

        let output = f().await?;

        self.journal.record(
            &self.run_id,
            StepRecord {
                step_id: step_id.clone(),
                output: serde_json::to_value(&output)?,
                recorded_at: Utc::now(),
            },
        )?;
        tracing::debug!(run_id = %self.run_id, step = %step_id, "recorded step");

        Ok(output)
    }
}
