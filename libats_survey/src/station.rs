//! A station: a named recording site owning its runs, keyed by run
//! number.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::channel::Channel;
use super::error::{IoError, NotFoundError, SurveyError};
use super::naming::{run_to_string, string_to_run};
use super::run::Run;

/// Strategy for picking the run number of a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAllocation {
    /// Lowest unused number; fills gaps left by removed runs.
    Free,
    /// Highest existing number plus one; append-only.
    High,
}

#[derive(Debug)]
pub struct Station {
    name: String,
    dir: PathBuf,
    meta_dir: PathBuf,
    runs: BTreeMap<usize, Run>,
}

impl Station {
    /// Create the station directory (and its meta mirror). Existing
    /// directories are reused.
    pub fn create(stations_dir: &Path, meta_root: &Path, name: &str) -> Result<Self, IoError> {
        let dir = stations_dir.join(name);
        let meta_dir = meta_root.join(name);
        create_dir_idempotent(&dir)?;
        create_dir_idempotent(&meta_dir)?;
        Ok(Self {
            name: name.to_string(),
            dir,
            meta_dir,
            runs: BTreeMap::new(),
        })
    }

    /// Discover a station and its runs from disk.
    pub fn scan(dir: &Path, meta_root: &Path) -> Result<Self, IoError> {
        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut station = Self {
            meta_dir: meta_root.join(&name),
            name,
            dir: dir.to_path_buf(),
            runs: BTreeMap::new(),
        };
        for entry in fs::read_dir(dir).map_err(|e| IoError::at(dir, e))? {
            let path = entry.map_err(|e| IoError::at(dir, e))?.path();
            if path.is_dir() {
                if let Some(number) =
                    string_to_run(&path.file_name().unwrap_or_default().to_string_lossy())
                {
                    station.runs.insert(number, Run::scan(&path)?);
                }
            }
        }
        Ok(station)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    /// Runs in ascending run-number order.
    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.values()
    }

    pub fn get_run(&self, number: usize) -> Result<&Run, NotFoundError> {
        self.runs
            .get(&number)
            .ok_or_else(|| NotFoundError::Run(self.name.clone(), number))
    }

    pub fn get_run_mut(&mut self, number: usize) -> Result<&mut Run, NotFoundError> {
        self.runs
            .get_mut(&number)
            .ok_or_else(|| NotFoundError::Run(self.name.clone(), number))
    }

    /// Next run number per the chosen strategy, considering both the
    /// directories on disk and the runs held in memory.
    pub fn next_run_number(&self, allocation: RunAllocation) -> Result<usize, IoError> {
        let mut numbers = numeric_subdirs(&self.dir)?;
        numbers.extend(self.runs.keys().copied());
        numbers.sort_unstable();
        numbers.dedup();
        Ok(match allocation {
            RunAllocation::Free => first_gap(&numbers),
            RunAllocation::High => numbers.last().map(|n| n + 1).unwrap_or(1),
        })
    }

    /// Offer the channel to every existing run; when none accepts,
    /// allocate the next free run number, create its directory (and meta
    /// mirror) and add the channel there. Returns the bound data path.
    pub fn add_or_create_run(&mut self, channel: Channel) -> Result<PathBuf, SurveyError> {
        for run in self.runs.values_mut() {
            if run.accepts(&channel) {
                return run.add_channel(channel).map_err(|(e, _)| e.into());
            }
        }
        let number = self.next_run_number(RunAllocation::Free)?;
        let mut run = Run::create(&self.dir, number)?;
        let meta_run = self.meta_dir.join(run_to_string(number));
        fs::create_dir_all(&meta_run).map_err(|e| IoError::at(&meta_run, e))?;
        let path = run.add_channel(channel).map_err(|(e, _)| e)?;
        self.runs.insert(number, run);
        Ok(path)
    }

    /// Tree listing of the station's runs and channels.
    pub fn ls(&self) -> String {
        let mut out = String::new();
        for run in self.runs.values() {
            if run.is_empty() {
                out.push_str(&format!("  {} (empty)\n", run_to_string(run.number())));
                continue;
            }
            out.push_str(&format!("  {}\n", run_to_string(run.number())));
            for ch in run.channels() {
                if let Ok(name) = ch.filename(".atss") {
                    out.push_str(&format!("    {}\n", name));
                }
            }
        }
        out
    }
}

pub(crate) fn create_dir_idempotent(dir: &Path) -> Result<(), IoError> {
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(IoError::at(dir, e)),
    }
}

/// Run numbers of the numeric subdirectories below a station.
fn numeric_subdirs(dir: &Path) -> Result<Vec<usize>, IoError> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| IoError::at(dir, e))? {
        let entry = entry.map_err(|e| IoError::at(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            if let Some(number) = string_to_run(&path.file_name().unwrap_or_default().to_string_lossy()) {
                numbers.push(number);
            }
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Lowest unused number in a sorted list; 1 when the list is empty.
fn first_gap(sorted: &[usize]) -> usize {
    let mut expected = 1;
    for n in sorted {
        if *n > expected {
            break;
        }
        if *n == expected {
            expected += 1;
        }
    }
    expected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(root: &Path) -> Station {
        let stations = root.join("stations");
        let meta = root.join("meta");
        fs::create_dir(&stations).unwrap();
        fs::create_dir(&meta).unwrap();
        Station::create(&stations, &meta, "Sarimsakli").unwrap()
    }

    #[test]
    fn test_first_gap() {
        assert_eq!(first_gap(&[]), 1);
        assert_eq!(first_gap(&[1, 2, 3]), 4);
        assert_eq!(first_gap(&[1, 3]), 2);
        assert_eq!(first_gap(&[2, 3]), 1);
    }

    #[test]
    fn test_add_or_create_run_groups_by_rate() {
        let root = tempfile::tempdir().unwrap();
        let mut station = station(root.path());

        station
            .add_or_create_run(Channel::new("Ex", 512.0).unwrap())
            .unwrap();
        station
            .add_or_create_run(Channel::new("Ey", 512.0).unwrap())
            .unwrap();
        // different rate forces a second run
        station
            .add_or_create_run(Channel::new("Ex", 64.0).unwrap())
            .unwrap();

        assert_eq!(station.runs().count(), 2);
        assert_eq!(station.get_run(1).unwrap().channels().len(), 2);
        assert_eq!(station.get_run(2).unwrap().channels().len(), 1);
        // meta mirror directories exist
        assert!(station.meta_dir().join("run_001").is_dir());
        assert!(station.meta_dir().join("run_002").is_dir());
    }

    #[test]
    fn test_run_allocation_strategies() {
        let root = tempfile::tempdir().unwrap();
        let station = station(root.path());
        fs::create_dir(station.dir().join("run_001")).unwrap();
        fs::create_dir(station.dir().join("run_003")).unwrap();

        assert_eq!(station.next_run_number(RunAllocation::Free).unwrap(), 2);
        assert_eq!(station.next_run_number(RunAllocation::High).unwrap(), 4);
    }

    #[test]
    fn test_get_run_not_found() {
        let root = tempfile::tempdir().unwrap();
        let station = station(root.path());
        assert!(matches!(
            station.get_run(9),
            Err(NotFoundError::Run(_, 9))
        ));
    }

    #[test]
    fn test_scan_discovers_runs() {
        let root = tempfile::tempdir().unwrap();
        let mut created = station(root.path());
        let mut ch = Channel::new("Hx", 128.0).unwrap();
        ch.serial = 7;
        ch.system = "ADU-07e".to_string();
        created.add_or_create_run(ch).unwrap();
        {
            let run = created.get_run_mut(1).unwrap();
            let ch = &mut run.channels_mut()[0];
            ch.write_data(&[0.0; 8]).unwrap();
            ch.write_sidecar().unwrap();
        }

        let scanned = Station::scan(created.dir(), root.path().join("meta").as_path()).unwrap();
        assert_eq!(scanned.name(), "Sarimsakli");
        assert_eq!(scanned.runs().count(), 1);
        assert_eq!(scanned.get_run(1).unwrap().channels().len(), 1);
    }
}
