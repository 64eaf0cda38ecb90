use std::{
    collections::VecDeque,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use worker::TrainingState;

use crate::{OrchestratorError, Result};

const ROLLING: &str = "rolling";
const BEST: &str = "best";

/// The checkpoints of a run, kept as json files under a single directory.
///
/// Rolling checkpoints are saved after every iteration and the most recent
/// `to_keep` of them survive, evicted in the order they were written.
/// Only the latest best checkpoint is kept.
/// Files are named `<kind>.ckpt-<step>.json`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    to_keep: usize,
    /// Rolling checkpoints subject to eviction, oldest first.
    retained: VecDeque<PathBuf>,
}

impl CheckpointStore {
    /// Creates a new `CheckpointStore`. The directory is created on the first save.
    ///
    /// # Arguments
    /// * `dir` - Where the checkpoints live.
    /// * `to_keep` - How many rolling checkpoints to keep, 0 keeps them all.
    pub fn new<P: Into<PathBuf>>(dir: P, to_keep: usize) -> Self {
        Self {
            dir: dir.into(),
            to_keep,
            retained: VecDeque::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Prepares the store for a run that continues from `step`.
    ///
    /// Rolling checkpoints past `step` belong to a run that went further than
    /// the one being continued, so they are deleted. The remaining ones are
    /// the oldest in line for eviction.
    ///
    /// # Arguments
    /// * `step` - The global step the run starts from.
    pub fn resume(&mut self, step: u64) -> Result<()> {
        self.retained.clear();

        for (saved, path) in self.list(ROLLING)? {
            if saved > step {
                info!(step = saved; "discarding stale checkpoint {}", path.display());
                self.remove(&path);
            } else {
                self.retained.push_back(path);
            }
        }

        self.evict();
        Ok(())
    }

    /// Saves a rolling checkpoint and evicts the oldest ones past the retention limit.
    ///
    /// # Returns
    /// The path of the new checkpoint.
    pub fn save_rolling(&mut self, state: &TrainingState) -> Result<PathBuf> {
        let path = self.write(ROLLING, state)?;

        self.retained.retain(|old| old != &path);
        self.retained.push_back(path.clone());
        self.evict();

        Ok(path)
    }

    /// Saves a best checkpoint, replacing the previous one.
    ///
    /// # Returns
    /// The path of the new checkpoint.
    pub fn save_best(&self, state: &TrainingState) -> Result<PathBuf> {
        let path = self.write(BEST, state)?;

        for (_, old) in self.list(BEST)? {
            if old != path {
                self.remove(&old);
            }
        }

        Ok(path)
    }

    /// Returns the rolling checkpoints on disk, oldest first.
    pub fn rolling(&self) -> Result<Vec<(u64, PathBuf)>> {
        self.list(ROLLING)
    }

    /// Returns the best checkpoint on disk, if any.
    pub fn best(&self) -> Result<Option<(u64, PathBuf)>> {
        Ok(self.list(BEST)?.pop())
    }

    /// Loads the most recent rolling checkpoint, if any.
    pub fn load_latest(&self) -> Result<Option<TrainingState>> {
        self.list(ROLLING)?
            .pop()
            .map(|(_, path)| load(&path))
            .transpose()
    }

    /// Loads the best checkpoint, if any.
    pub fn load_best(&self) -> Result<Option<TrainingState>> {
        self.best()?.map(|(_, path)| load(&path)).transpose()
    }

    /// Writes `state` to a temporary file and renames it into place, so a
    /// failed write leaves every committed checkpoint untouched.
    fn write(&self, kind: &str, state: &TrainingState) -> Result<PathBuf> {
        let name = format!("{kind}.ckpt-{}.json", state.global_step);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));

        let written = fs::create_dir_all(&self.dir)
            .and_then(|_| write_json(&tmp, state))
            .and_then(|_| fs::rename(&tmp, &path));

        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(OrchestratorError::CheckpointWrite { path, source });
        }

        debug!(step = state.global_step; "saved checkpoint {}", path.display());
        Ok(path)
    }

    /// Lists the checkpoints of `kind`, sorted by step.
    fn list(&self, kind: &str) -> Result<Vec<(u64, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name();
            let Some(step) = name.to_str().and_then(|name| parse_step(name, kind)) else {
                continue;
            };

            found.push((step, entry.path()));
        }

        found.sort();
        Ok(found)
    }

    fn evict(&mut self) {
        if self.to_keep == 0 {
            return;
        }

        while self.retained.len() > self.to_keep {
            if let Some(old) = self.retained.pop_front() {
                self.remove(&old);
            }
        }
    }

    fn remove(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            warn!("couldn't remove old checkpoint {}: {e}", path.display());
        }
    }
}

fn parse_step(name: &str, kind: &str) -> Option<u64> {
    name.strip_prefix(kind)?
        .strip_prefix(".ckpt-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn write_json(path: &Path, state: &TrainingState) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, state)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

fn load(path: &Path) -> Result<TrainingState> {
    let file = File::open(path).map_err(|e| OrchestratorError::CheckpointRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|e| OrchestratorError::CheckpointRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use parameter_server::{OptimizerState, ParamSnapshot};

    use super::*;

    fn state(step: u64) -> TrainingState {
        TrainingState {
            global_step: step,
            params: ParamSnapshot { params: Vec::new() },
            optimizer: OptimizerState::GradientDescent,
        }
    }

    #[test]
    fn parses_only_its_own_names() {
        assert_eq!(parse_step("rolling.ckpt-12.json", ROLLING), Some(12));
        assert_eq!(parse_step("best.ckpt-3.json", ROLLING), None);
        assert_eq!(parse_step(".rolling.ckpt-12.json.tmp", ROLLING), None);
        assert_eq!(parse_step("rolling.ckpt-x.json", ROLLING), None);
    }

    #[test]
    fn missing_directories_have_no_checkpoints() {
        let store = CheckpointStore::new("/definitely/not/here", 2);
        assert!(store.rolling().unwrap().is_empty());
        assert!(store.load_latest().unwrap().is_none());
        assert!(store.load_best().unwrap().is_none());
    }

    #[test]
    fn steps_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path(), 0);

        for step in [9, 10, 2] {
            store.save_rolling(&state(step)).unwrap();
        }

        let steps: Vec<u64> = store.rolling().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![2, 9, 10]);
        assert_eq!(store.load_latest().unwrap(), Some(state(10)));
    }
}
