//! The survey: root catalog of all stations, plus the concurrent
//! ingestion buffer the station/run tree is built from.
//!
//! A survey moves through four states, one-directional:
//! `Created -> Ingesting -> TreeBuilt -> Materialized`. Channels are
//! collected concurrently, the tree is built exactly once by a single
//! thread, and materialization then runs per channel on disjoint paths.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use super::channel::Channel;
use super::constants::SURVEY_DIRS;
use super::error::{ConflictError, IoError, NotFoundError, SurveyError};
use super::naming::run_to_string;
use super::run::Run;
use super::station::{create_dir_idempotent, Station};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyState {
    Created,
    Ingesting,
    TreeBuilt,
    Materialized,
}

/// One unit of materialization work: a bound channel and the meta
/// directory mirroring its run. Tasks own their data; workers need no
/// reference back into the survey.
#[derive(Debug, Clone)]
pub struct MaterializeTask {
    pub channel: Channel,
    pub meta_run_dir: PathBuf,
}

#[derive(Debug)]
pub struct Survey {
    dir: PathBuf,
    stations: Vec<Station>,
    buffer: RwLock<Vec<Channel>>,
    state: RwLock<SurveyState>,
}

impl Survey {
    /// Create a survey at `dir`, building the fixed subdirectory
    /// skeleton. The parent directory must exist; a missing root is
    /// fatal. Re-creating over an existing survey directory is allowed.
    pub fn create(dir: &Path) -> Result<Self, SurveyError> {
        match fs::create_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(_) => return Err(SurveyError::BadRoot(dir.to_path_buf())),
        }
        for sub in SURVEY_DIRS {
            create_dir_idempotent(&dir.join(sub))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            stations: Vec::new(),
            buffer: RwLock::new(Vec::new()),
            state: RwLock::new(SurveyState::Created),
        })
    }

    /// Open an existing survey read-only, populating stations from disk.
    /// The ingestion buffer is unused in this mode.
    pub fn open(dir: &Path) -> Result<Self, SurveyError> {
        let stations_dir = dir.join("stations");
        if !stations_dir.is_dir() {
            return Err(SurveyError::BadRoot(dir.to_path_buf()));
        }
        let meta_root = dir.join("meta");
        let mut stations = Vec::new();
        for entry in fs::read_dir(&stations_dir).map_err(|e| IoError::at(&stations_dir, e))? {
            let path = entry.map_err(|e| IoError::at(&stations_dir, e))?.path();
            if path.is_dir() {
                stations.push(Station::scan(&path, &meta_root)?);
            }
        }
        stations.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Self {
            dir: dir.to_path_buf(),
            stations,
            buffer: RwLock::new(Vec::new()),
            state: RwLock::new(SurveyState::TreeBuilt),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stations_dir(&self) -> PathBuf {
        self.dir.join("stations")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.dir.join("meta")
    }

    pub fn state(&self) -> SurveyState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SurveyState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Append a channel to the ingestion buffer. Callable from many
    /// threads at once; ordering is not guaranteed. Once the tree is
    /// built the buffer is closed and collecting is a conflict.
    pub fn collect(&self, channel: Channel) -> Result<(), SurveyError> {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match *state {
                SurveyState::Created | SurveyState::Ingesting => *state = SurveyState::Ingesting,
                _ => return Err(ConflictError::IngestionClosed.into()),
            }
        }
        self.buffer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(channel);
        Ok(())
    }

    /// Number of channels waiting in the ingestion buffer.
    pub fn buffered(&self) -> usize {
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drain the ingestion buffer and build the station/run tree.
    ///
    /// Single-threaded by design (`&mut self`): channels are sorted by
    /// start time, grouped by the caller-supplied station key and pushed
    /// through `Station::add_or_create_run`. Every channel leaves with a
    /// bound path. Runs exactly once; the transition is one-directional.
    pub fn build_tree<F>(&mut self, station_key: F) -> Result<(), SurveyError>
    where
        F: Fn(&Channel) -> String,
    {
        match self.state() {
            SurveyState::Created | SurveyState::Ingesting => {}
            _ => return Err(ConflictError::TreeAlreadyBuilt.into()),
        }
        let mut channels = std::mem::take(
            &mut *self.buffer.write().unwrap_or_else(PoisonError::into_inner),
        );
        channels.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.sort_key().cmp(&b.sort_key())));

        for mut channel in channels {
            let name = station_key(&channel);
            channel.station = name.clone();
            let station = self.ensure_station(&name)?;
            let label = channel.label();
            let path = station.add_or_create_run(channel)?;
            if path.as_os_str().is_empty() {
                return Err(SurveyError::UnboundChannel(label));
            }
        }
        self.set_state(SurveyState::TreeBuilt);
        Ok(())
    }

    /// Build the tree grouping by the station key each channel already
    /// carries from ingestion.
    pub fn build_tree_default(&mut self) -> Result<(), SurveyError> {
        self.build_tree(|ch| ch.station.clone())
    }

    /// Station by name, created or rescanned from disk when absent.
    /// Tree building uses this so that a re-import into an existing
    /// survey finds the stations already on disk.
    fn ensure_station(&mut self, name: &str) -> Result<&mut Station, SurveyError> {
        if let Some(idx) = self.stations.iter().position(|s| s.name() == name) {
            return Ok(&mut self.stations[idx]);
        }
        let dir = self.stations_dir().join(name);
        let station = if dir.is_dir() {
            Station::scan(&dir, &self.meta_dir())?
        } else {
            Station::create(&self.stations_dir(), &self.meta_dir(), name)?
        };
        self.stations.push(station);
        let idx = self.stations.len() - 1;
        Ok(&mut self.stations[idx])
    }

    /// Create a station; a duplicate name, in memory or on disk, is a
    /// conflict and leaves the survey unchanged.
    pub fn create_station(&mut self, name: &str) -> Result<&mut Station, SurveyError> {
        if self.stations.iter().any(|s| s.name() == name) {
            return Err(ConflictError::DuplicateStation(name.to_string()).into());
        }
        if self.stations_dir().join(name).exists() {
            return Err(ConflictError::DuplicateStation(name.to_string()).into());
        }
        let station = Station::create(&self.stations_dir(), &self.meta_dir(), name)?;
        self.stations.push(station);
        let idx = self.stations.len() - 1;
        Ok(&mut self.stations[idx])
    }

    /// Station by name, or the station scanned/created before; never
    /// creates silently.
    pub fn get_station(&self, name: &str) -> Result<&Station, SurveyError> {
        self.stations
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| NotFoundError::Station(name.to_string()).into())
    }

    pub fn get_station_mut(&mut self, name: &str) -> Result<&mut Station, SurveyError> {
        self.stations
            .iter_mut()
            .find(|s| s.name() == name)
            .ok_or_else(|| SurveyError::NotFound(NotFoundError::Station(name.to_string())))
    }

    pub fn get_run(&self, station: &str, number: usize) -> Result<&Run, SurveyError> {
        Ok(self.get_station(station)?.get_run(number)?)
    }

    /// First channel of a run, in channel-type-priority order.
    pub fn first_channel(&self, station: &str, run: usize) -> Result<&Channel, SurveyError> {
        Ok(self.get_run(station, run)?.first_channel()?)
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Clone out one task per bound channel that has a source recording.
    /// Paths are disjoint after tree building, so the tasks can run in
    /// parallel.
    pub fn materialize_tasks(&self) -> Result<Vec<MaterializeTask>, SurveyError> {
        if self.state() != SurveyState::TreeBuilt {
            return Err(ConflictError::TreeNotBuilt.into());
        }
        let mut tasks = Vec::new();
        for station in &self.stations {
            for run in station.runs() {
                let meta_run_dir = station.meta_dir().join(run_to_string(run.number()));
                for channel in run.channels() {
                    if channel.origin().is_some() {
                        tasks.push(MaterializeTask {
                            channel: channel.clone(),
                            meta_run_dir: meta_run_dir.clone(),
                        });
                    }
                }
            }
        }
        Ok(tasks)
    }

    /// Final state transition after all materialization tasks finished.
    pub fn mark_materialized(&mut self) -> Result<(), SurveyError> {
        if self.state() != SurveyState::TreeBuilt {
            return Err(ConflictError::TreeNotBuilt.into());
        }
        self.set_state(SurveyState::Materialized);
        Ok(())
    }

    /// Tree listing of the whole survey.
    pub fn ls(&self) -> String {
        let mut out = format!("{}\n", self.dir.display());
        for station in &self.stations {
            out.push_str(&format!("{}\n", station.name()));
            out.push_str(&station.ls());
        }
        out
    }
}
