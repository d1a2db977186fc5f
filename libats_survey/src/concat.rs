//! Gap-aware concatenation of same-channel recordings.
//!
//! Inputs are stitched into one output recording in a single streaming
//! pass: real samples are copied chunk by chunk, time gaps between
//! consecutive recordings are filled with zeros, and a selection mask
//! records which output samples are filler. At most two files are open at
//! any moment (the output plus one input), so inputs of any size stream
//! through a fixed amount of memory. The output header's sample count is
//! rewritten at the end, once the true total is known.

use std::path::{Path, PathBuf};

use fxhash::FxHashMap;

use super::constants::STREAM_CHUNK_SAMPLES;
use super::error::{ConcatError, GapError, IoError};
use super::header::{AtsFile, AtsHeader};
use super::selection_mask::SelectionMask;
use super::station::create_dir_idempotent;

/// What to do when the next recording starts before the previous one
/// ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Abort the group with a [`GapError`]. Overlap means the inputs
    /// disagree about what was recorded; silently rewriting either side
    /// is worse than failing.
    #[default]
    Reject,
    /// Treat the overlap as a zero-length gap and continue, duplicating
    /// the overlapped span in the output.
    ClampToZero,
}

/// Result of one concatenation.
#[derive(Debug)]
pub struct ConcatOutcome {
    pub output: PathBuf,
    pub mask: PathBuf,
    /// Total output samples, real plus filler.
    pub samples: u64,
    /// Filler samples inserted into gaps.
    pub filled: u64,
    /// Companion XML filenames referenced by the inputs.
    pub xml_companions: Vec<String>,
}

/// True when two recordings, already ordered by start time, can be
/// stitched: same channel type, same sample rate, non-decreasing start.
pub fn can_simple_cat(a: &AtsHeader, b: &AtsHeader) -> bool {
    a.channel_type == b.channel_type
        && a.sample_rate == b.sample_rate
        && a.start_time() <= b.start_time()
}

/// Expected-sample gap between the end of `prev` and the start of
/// `next`, negative on overlap.
pub fn sample_gap(prev: &AtsHeader, next: &AtsHeader) -> i64 {
    prev.stop_time()
        .samples_until(&next.start_time(), prev.sample_rate as f64)
}

fn cat_mismatch(a: &AtsHeader, b: &AtsHeader, pa: &Path, pb: &Path) -> String {
    if a.channel_type != b.channel_type {
        format!(
            "channel type {} vs {} between {:?} and {:?}",
            a.channel_type, b.channel_type, pa, pb
        )
    } else if a.sample_rate != b.sample_rate {
        format!(
            "sample rate {} vs {} between {:?} and {:?}",
            a.sample_rate, b.sample_rate, pa, pb
        )
    } else {
        format!("start times out of order between {pa:?} and {pb:?}")
    }
}

/// Split recordings into maximal simply-concatenable groups: one group
/// per logical sensor stream (serial, channel number, type, rate), each
/// sorted by start time.
pub fn partition_groups(files: Vec<(PathBuf, AtsHeader)>) -> Vec<Vec<PathBuf>> {
    let mut groups: FxHashMap<(u16, u8, String, u32), Vec<(PathBuf, AtsHeader)>> =
        FxHashMap::default();
    for (path, header) in files {
        groups
            .entry((
                header.serial_number,
                header.channel_number,
                header.channel_type.clone(),
                header.sample_rate.to_bits(),
            ))
            .or_default()
            .push((path, header));
    }
    let mut keys: Vec<_> = groups.keys().cloned().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            let mut members = groups.remove(&key).unwrap_or_default();
            members.sort_by(|a, b| a.1.start_time().cmp(&b.1.start_time()));
            members.into_iter().map(|(path, _)| path).collect()
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct ConcatEngine {
    policy: GapPolicy,
}

impl ConcatEngine {
    pub fn new(policy: GapPolicy) -> Self {
        Self { policy }
    }

    /// Stitch an ordered list of same-channel recordings into one output
    /// below `outdir/meas_<start>/`, writing the selection mask alongside.
    ///
    /// A failure aborts this group only; other groups own independent
    /// output files and are unaffected.
    pub fn concat(&self, inputs: &[PathBuf], outdir: &Path) -> Result<ConcatOutcome, ConcatError> {
        if inputs.is_empty() {
            return Err(ConcatError::NoInputs);
        }
        if !outdir.is_dir() {
            return Err(IoError::Missing(outdir.to_path_buf()).into());
        }

        // one pass over the headers up front: validation and gap math
        let mut headers = Vec::with_capacity(inputs.len());
        for path in inputs {
            headers.push(AtsFile::read_header(path)?);
        }
        for i in 1..headers.len() {
            if !can_simple_cat(&headers[i - 1], &headers[i]) {
                return Err(ConcatError::NotConcatenable(cat_mismatch(
                    &headers[i - 1],
                    &headers[i],
                    &inputs[i - 1],
                    &inputs[i],
                )));
            }
        }

        let meas_dir = outdir.join(headers[0].measdir());
        create_dir_idempotent(&meas_dir)?;
        let out_name = inputs[0]
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("concat.ats"));
        let out_path = meas_dir.join(out_name);

        let mut xml_companions: Vec<String> = Vec::new();
        for header in &headers {
            let xml = &header.comments.xml_header;
            if !xml.is_empty() && !xml_companions.iter().any(|x| x == xml) {
                xml_companions.push(xml.clone());
            }
        }

        let mut out = AtsFile::create(&out_path, headers[0].clone())?;
        let mut mask = SelectionMask::new();
        let mut filled: u64 = 0;

        for (i, path) in inputs.iter().enumerate() {
            if i > 0 {
                let dt = sample_gap(&headers[i - 1], &headers[i]);
                if dt < 0 {
                    match self.policy {
                        GapPolicy::Reject => {
                            return Err(GapError::Overlap {
                                prev: inputs[i - 1].clone(),
                                next: path.clone(),
                                overlap: -dt,
                            }
                            .into());
                        }
                        GapPolicy::ClampToZero => {
                            log::warn!(
                                "clamping overlap of {} samples between {:?} and {:?}",
                                -dt,
                                inputs[i - 1],
                                path
                            );
                        }
                    }
                } else if dt > 0 {
                    out.write_zeros(dt as u64)?;
                    mask.add_excluded(dt as usize);
                    filled += dt as u64;
                }
            }

            // the previous input is already closed; never more than the
            // output plus this one input open
            let mut input = AtsFile::open(path)?;
            loop {
                let chunk = input.read_samples(STREAM_CHUNK_SAMPLES)?;
                if chunk.is_empty() {
                    break;
                }
                out.write_counts_scaled(input.header.lsbval, &chunk)?;
                mask.add_included(chunk.len());
            }
        }

        out.finalize()?;
        let mask_path = mask.write(&out_path)?;
        log::info!(
            "concatenated {} recordings into {:?}: {} samples, {} filled",
            inputs.len(),
            out.path(),
            out.write_count,
            filled
        );

        Ok(ConcatOutcome {
            output: out_path,
            mask: mask_path,
            samples: out.write_count,
            filled,
            xml_companions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_recording(
        dir: &Path,
        name: &str,
        start: u32,
        counts: &[i32],
        rate: f32,
        channel_type: &str,
    ) -> PathBuf {
        let path = dir.join(name);
        let header = AtsHeader {
            sample_rate: rate,
            start,
            lsbval: 1.0,
            serial_number: 84,
            channel_number: 0,
            channel_type: channel_type.to_string(),
            system_type: "ADU-08e".to_string(),
            ..Default::default()
        };
        let mut out = AtsFile::create(&path, header).unwrap();
        out.write_counts(counts).unwrap();
        out.finalize().unwrap();
        path
    }

    #[test]
    fn test_gap_fill_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("out");
        std::fs::create_dir(&outdir).unwrap();

        // A: 100 samples at 10 Hz from t0, B: 50 samples starting t0+11s
        // leaves a 1 s = 10 sample hole
        let t0 = 1_500_000_000;
        let a = write_recording(dir.path(), "a_R000.ats", t0, &[7; 100], 10.0, "Ex");
        let b = write_recording(dir.path(), "b_R000.ats", t0 + 11, &[9; 50], 10.0, "Ex");

        let outcome = ConcatEngine::new(GapPolicy::Reject)
            .concat(&[a, b], &outdir)
            .unwrap();
        assert_eq!(outcome.samples, 160);
        assert_eq!(outcome.filled, 10);

        let mut merged = AtsFile::open(&outcome.output).unwrap();
        assert_eq!(merged.header.effective_samples(), 160);
        let samples = merged.read_samples(1000).unwrap();
        assert_eq!(samples.len(), 160);
        assert!(samples[..100].iter().all(|&s| s == 7));
        assert!(samples[100..110].iter().all(|&s| s == 0));
        assert!(samples[110..].iter().all(|&s| s == 9));

        let mask = SelectionMask::read(&outcome.output).unwrap();
        assert_eq!(mask.len(), 160);
        for i in 0..160 {
            assert_eq!(mask.is_excluded(i), (100..110).contains(&i));
        }
    }

    #[test]
    fn test_output_lands_in_measdir() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("out");
        std::fs::create_dir(&outdir).unwrap();
        let a = write_recording(dir.path(), "a_R000.ats", 1_574_232_769, &[1; 10], 10.0, "Ex");

        let outcome = ConcatEngine::default().concat(&[a], &outdir).unwrap();
        assert!(outcome
            .output
            .parent()
            .unwrap()
            .ends_with("meas_2019-11-20_06-52-49"));
    }

    #[test]
    fn test_overlap_rejected_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("out");
        std::fs::create_dir(&outdir).unwrap();
        let t0 = 1_500_000_000;
        let a = write_recording(dir.path(), "a_R000.ats", t0, &[1; 100], 10.0, "Ex");
        // starts 5 s into A's span: 50 samples of overlap
        let b = write_recording(dir.path(), "b_R000.ats", t0 + 5, &[2; 50], 10.0, "Ex");

        let err = ConcatEngine::new(GapPolicy::Reject).concat(&[a, b], &outdir);
        match err {
            Err(ConcatError::Gap(GapError::Overlap { overlap, .. })) => {
                assert_eq!(overlap, 50)
            }
            other => panic!("expected overlap, got {other:?}"),
        }
    }

    #[test]
    fn test_overlap_clamped_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("out");
        std::fs::create_dir(&outdir).unwrap();
        let t0 = 1_500_000_000;
        let a = write_recording(dir.path(), "a_R000.ats", t0, &[1; 100], 10.0, "Ex");
        let b = write_recording(dir.path(), "b_R000.ats", t0 + 5, &[2; 50], 10.0, "Ex");

        let outcome = ConcatEngine::new(GapPolicy::ClampToZero)
            .concat(&[a, b], &outdir)
            .unwrap();
        assert_eq!(outcome.samples, 150);
        assert_eq!(outcome.filled, 0);
    }

    #[test]
    fn test_mixed_channels_are_not_concatenable() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("out");
        std::fs::create_dir(&outdir).unwrap();
        let a = write_recording(dir.path(), "a_R000.ats", 1000, &[1; 10], 10.0, "Ex");
        let b = write_recording(dir.path(), "b_R000.ats", 2000, &[2; 10], 10.0, "Hy");

        assert!(matches!(
            ConcatEngine::default().concat(&[a, b], &outdir),
            Err(ConcatError::NotConcatenable(_))
        ));
    }

    #[test]
    fn test_partition_groups() {
        let dir = tempfile::tempdir().unwrap();
        let ex1 = write_recording(dir.path(), "ex1.ats", 2000, &[1; 4], 10.0, "Ex");
        let ex0 = write_recording(dir.path(), "ex0.ats", 1000, &[1; 4], 10.0, "Ex");
        let hy = write_recording(dir.path(), "hy.ats", 1000, &[1; 4], 10.0, "Hy");

        let files = vec![
            (ex1.clone(), AtsFile::read_header(&ex1).unwrap()),
            (ex0.clone(), AtsFile::read_header(&ex0).unwrap()),
            (hy.clone(), AtsFile::read_header(&hy).unwrap()),
        ];
        let groups = partition_groups(files);
        assert_eq!(groups.len(), 2);
        // within a group the members are sorted by start time
        let ex_group = groups.iter().find(|g| g.contains(&ex0)).unwrap();
        assert_eq!(ex_group, &vec![ex0, ex1]);
    }

    #[test]
    fn test_empty_inputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConcatEngine::default().concat(&[], dir.path()),
            Err(ConcatError::NoInputs)
        ));
    }
}
