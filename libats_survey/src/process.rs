//! The import and concatenation pipelines.
//!
//! Work is split round-robin into per-worker batches that own their file
//! lists; results and progress flow back over channels. The two
//! serialization points are the survey's ingestion buffer (during
//! decode/collect) and the single-threaded tree build between them;
//! materialization and concatenation fan out freely because every task
//! owns disjoint output paths.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::channel::Channel;
use super::concat::{partition_groups, ConcatEngine, ConcatOutcome};
use super::config::Config;
use super::error::{IoError, ProcessorError};
use super::header::AtsFile;
use super::survey::{MaterializeTask, Survey};
use super::worker_status::WorkerStatus;

/// Recursively gather all .ats recordings below `dir`, with their sizes.
pub fn gather_ats_files(dir: &Path) -> Result<Vec<(PathBuf, u64)>, ProcessorError> {
    let mut files = Vec::new();
    walk_ats(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_ats(dir: &Path, out: &mut Vec<(PathBuf, u64)>) -> Result<(), ProcessorError> {
    for entry in fs::read_dir(dir).map_err(|e| IoError::at(dir, e))? {
        let entry = entry.map_err(|e| IoError::at(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            walk_ats(&path, out)?;
        } else if path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("ats"))
            .unwrap_or(false)
        {
            let bytes = entry
                .metadata()
                .map_err(|e| IoError::at(&path, e))?
                .len();
            out.push((path, bytes));
        }
    }
    Ok(())
}

/// Divide work items into per-worker subsets, round-robin.
pub fn create_subsets<T>(items: Vec<T>, n_workers: usize) -> Vec<Vec<T>> {
    let n = n_workers.max(1);
    let mut subsets: Vec<Vec<T>> = Vec::with_capacity(n);
    for _ in 0..n {
        subsets.push(Vec::new());
    }
    for (idx, item) in items.into_iter().enumerate() {
        subsets[idx % n].push(item);
    }
    subsets
}

/// Import every .ats recording below `config.ats_path` into a survey at
/// `config.survey_path`: concurrent header decode and collect, one tree
/// build, then parallel materialization with a meta mirror per run.
///
/// Returns the materialized survey. Re-running over the same inputs is
/// safe; materialization rewrites identical bytes.
pub fn import(config: &Config, tx: &Sender<WorkerStatus>) -> Result<Survey, ProcessorError> {
    let files = gather_ats_files(&config.ats_path)?;
    if files.is_empty() {
        return Err(ProcessorError::NoInputFiles(config.ats_path.clone()));
    }
    let total_bytes: u64 = files.iter().map(|(_, bytes)| bytes).sum();
    log::info!(
        "importing {} recordings, total size {}",
        files.len(),
        human_bytes::human_bytes(total_bytes as f64)
    );

    let survey = Survey::create(&config.survey_path)?;

    // decode + collect, many workers appending into the ingestion buffer
    let subsets = create_subsets(files, config.n_threads.max(1) as usize);
    std::thread::scope(|scope| -> Result<(), ProcessorError> {
        let mut handles = Vec::new();
        for (worker_id, subset) in subsets.into_iter().enumerate() {
            let survey = &survey;
            let tx = tx.clone();
            handles.push(scope.spawn(move || -> Result<(), ProcessorError> {
                let total = subset.len().max(1);
                for (done, (path, _)) in subset.into_iter().enumerate() {
                    match AtsFile::read_header(&path) {
                        Ok(header) => {
                            let channel = Channel::from_ats_header(&header, &path)
                                .map_err(super::error::ChannelError::Conflict)?;
                            survey.collect(channel)?;
                        }
                        Err(e) => {
                            log::warn!("skipping unreadable recording {:?}: {e}", path);
                        }
                    }
                    tx.send(WorkerStatus::new(
                        (done + 1) as f32 / total as f32,
                        worker_id,
                        "decode",
                    ))?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        Ok(())
    })?;
    log::info!("collected {} channels", survey.buffered());

    // single-threaded tree construction
    let mut survey = survey;
    match &config.station {
        Some(name) => {
            let name = name.clone();
            survey.build_tree(move |_| name.clone())?;
        }
        None => survey.build_tree_default()?,
    }

    // parallel materialization; paths are disjoint once the tree exists
    let tasks = survey.materialize_tasks()?;
    log::info!("materializing {} channels", tasks.len());
    let subsets = create_subsets(tasks, config.n_threads.max(1) as usize);
    std::thread::scope(|scope| -> Result<(), ProcessorError> {
        let mut handles = Vec::new();
        for (worker_id, subset) in subsets.into_iter().enumerate() {
            let tx = tx.clone();
            handles.push(scope.spawn(move || -> Result<(), ProcessorError> {
                let total = subset.len().max(1);
                for (done, task) in subset.into_iter().enumerate() {
                    task.channel.materialize()?;
                    mirror_to_meta(&task)?;
                    tx.send(WorkerStatus::new(
                        (done + 1) as f32 / total as f32,
                        worker_id,
                        "materialize",
                    ))?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        Ok(())
    })?;

    survey.mark_materialized()?;
    log::info!("import finished: {}", survey.dir().display());
    Ok(survey)
}

/// Copy the channel sidecar and any companion XML into the meta mirror
/// of the run.
fn mirror_to_meta(task: &MaterializeTask) -> Result<(), ProcessorError> {
    let sidecar = task.channel.sidecar_path()?;
    if let Some(name) = sidecar.file_name() {
        let dst = task.meta_run_dir.join(name);
        fs::copy(&sidecar, &dst).map_err(|e| IoError::at(&dst, e))?;
    }
    if let (Some(xml), Some(origin)) = (&task.channel.xml_companion, task.channel.origin()) {
        if let Some(origin_dir) = origin.parent() {
            let src = origin_dir.join(xml);
            if src.exists() {
                let dst = task.meta_run_dir.join(xml);
                fs::copy(&src, &dst).map_err(|e| IoError::at(&dst, e))?;
            }
        }
    }
    Ok(())
}

/// Concatenate every simply-concatenable group of recordings below
/// `config.ats_path` into `config.cat_path`.
///
/// A failing group is logged and skipped; sibling groups own independent
/// output files and proceed.
pub fn concat_recordings(
    config: &Config,
    tx: &Sender<WorkerStatus>,
) -> Result<Vec<ConcatOutcome>, ProcessorError> {
    let outdir = config.cat_path.clone().ok_or(ProcessorError::NoCatPath)?;
    fs::create_dir_all(&outdir).map_err(|e| IoError::at(&outdir, e))?;

    let files = gather_ats_files(&config.ats_path)?;
    if files.is_empty() {
        return Err(ProcessorError::NoInputFiles(config.ats_path.clone()));
    }

    let mut headers = Vec::new();
    for (path, _) in files {
        match AtsFile::read_header(&path) {
            Ok(header) => headers.push((path, header)),
            Err(e) => log::warn!("skipping unreadable recording {:?}: {e}", path),
        }
    }
    let groups = partition_groups(headers);
    log::info!("concatenating {} channel groups", groups.len());

    let subsets = create_subsets(groups, config.n_threads.max(1) as usize);
    let policy = config.gap_policy();
    let mut outcomes = Vec::new();
    std::thread::scope(|scope| -> Result<(), ProcessorError> {
        let mut handles = Vec::new();
        for (worker_id, subset) in subsets.into_iter().enumerate() {
            let tx = tx.clone();
            let outdir = outdir.clone();
            handles.push(scope.spawn(move || -> Result<Vec<ConcatOutcome>, ProcessorError> {
                let engine = ConcatEngine::new(policy);
                let total = subset.len().max(1);
                let mut done_outcomes = Vec::new();
                for (done, group) in subset.into_iter().enumerate() {
                    match engine.concat(&group, &outdir) {
                        Ok(outcome) => done_outcomes.push(outcome),
                        Err(e) => log::error!("channel group failed: {e}"),
                    }
                    tx.send(WorkerStatus::new(
                        (done + 1) as f32 / total as f32,
                        worker_id,
                        "cat",
                    ))?;
                }
                Ok(done_outcomes)
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(result) => outcomes.extend(result?),
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        Ok(())
    })?;

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::AtsHeader;
    use crate::survey::SurveyState;
    use std::sync::mpsc::channel;

    fn write_recording(dir: &Path, name: &str, start: u32, channel_type: &str, site: &str) {
        let header = AtsHeader {
            sample_rate: 128.0,
            start,
            lsbval: 0.5,
            serial_number: 84,
            channel_number: if channel_type == "Ex" { 0 } else { 1 },
            channel_type: channel_type.to_string(),
            system_type: "ADU-08e".to_string(),
            comments: crate::header::AtsComments {
                site_name: site.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut out = AtsFile::create(&dir.join(name), header).unwrap();
        out.write_counts(&[2; 64]).unwrap();
        out.finalize().unwrap();
    }

    #[test]
    fn test_create_subsets_round_robin() {
        let subsets = create_subsets(vec![0, 1, 2, 3, 4], 2);
        assert_eq!(subsets, vec![vec![0, 2, 4], vec![1, 3]]);
        // more workers than items leaves the tail empty
        let subsets = create_subsets(vec![0, 1], 4);
        assert_eq!(subsets.iter().filter(|s| !s.is_empty()).count(), 2);
    }

    #[test]
    fn test_gather_ats_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("run_001");
        fs::create_dir(&nested).unwrap();
        write_recording(dir.path(), "084_V01_C00_R000_TEx_BL_128Hz.ats", 1000, "Ex", "s");
        write_recording(&nested, "084_V01_C01_R001_THx_BL_128Hz.ats", 1000, "Hx", "s");
        fs::write(dir.path().join("notes.txt"), b"not a recording").unwrap();

        let files = gather_ats_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_import_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let ats_dir = root.path().join("field");
        fs::create_dir(&ats_dir).unwrap();
        write_recording(&ats_dir, "084_V01_C00_R001_TEx_BL_128Hz.ats", 2000, "Ex", "north");
        write_recording(&ats_dir, "084_V01_C01_R001_THx_BL_128Hz.ats", 2000, "Hx", "north");

        let config = Config {
            ats_path: ats_dir,
            survey_path: root.path().join("survey"),
            n_threads: 2,
            ..Default::default()
        };
        let (tx, _rx) = channel();
        let survey = import(&config, &tx).unwrap();
        assert_eq!(survey.state(), SurveyState::Materialized);

        let run = survey.get_run("north", 1).unwrap();
        assert_eq!(run.channels().len(), 2);
        for ch in run.channels() {
            let data_path = ch.data_path().unwrap();
            assert!(data_path.exists());
            assert!(ch.sidecar_path().unwrap().exists());
            // 64 samples of count 2 at lsb 0.5 become 1.0 mV each
            assert_eq!(ch.read_data().unwrap(), vec![1.0; 64]);
        }
        // the meta mirror carries the sidecars
        let meta_run = survey.meta_dir().join("north").join("run_001");
        assert_eq!(fs::read_dir(&meta_run).unwrap().count(), 2);
    }

    #[test]
    fn test_import_station_override() {
        let root = tempfile::tempdir().unwrap();
        let ats_dir = root.path().join("field");
        fs::create_dir(&ats_dir).unwrap();
        write_recording(&ats_dir, "084_V01_C00_R001_TEx_BL_128Hz.ats", 2000, "Ex", "ignored");

        let config = Config {
            ats_path: ats_dir,
            survey_path: root.path().join("survey"),
            station: Some("forced".to_string()),
            ..Default::default()
        };
        let (tx, _rx) = channel();
        let survey = import(&config, &tx).unwrap();
        assert!(survey.get_station("forced").is_ok());
        assert!(survey.get_station("ignored").is_err());
    }

    #[test]
    fn test_concat_requires_cat_path() {
        let config = Config::default();
        let (tx, _rx) = channel();
        assert!(matches!(
            concat_recordings(&config, &tx),
            Err(ProcessorError::NoCatPath)
        ));
    }

    #[test]
    fn test_concat_recordings_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let ats_dir = root.path().join("field");
        fs::create_dir(&ats_dir).unwrap();
        // two Ex recordings 64 samples apart in time -> one group, no gap
        write_recording(&ats_dir, "084_V01_C00_R000_TEx_BL_128Hz.ats", 4000, "Ex", "s");
        write_recording(&ats_dir, "084_V01_C00_R001_TEx_BL_128Hz.ats", 4001, "Ex", "s");
        write_recording(&ats_dir, "084_V01_C01_R000_THx_BL_128Hz.ats", 4000, "Hx", "s");

        let config = Config {
            ats_path: ats_dir,
            survey_path: PathBuf::from("None"),
            cat_path: Some(root.path().join("cat")),
            n_threads: 2,
            ..Default::default()
        };
        let (tx, _rx) = channel();
        let outcomes = concat_recordings(&config, &tx).unwrap();
        assert_eq!(outcomes.len(), 2);
        let ex = outcomes
            .iter()
            .find(|o| o.output.to_string_lossy().contains("TEx"))
            .unwrap();
        // 64 + 64 real samples plus half a second (64 samples) of filler
        assert_eq!(ex.samples, 192);
        assert_eq!(ex.filled, 64);
    }
}
