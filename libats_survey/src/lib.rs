//! # ats_survey
//!
//! ats_survey catalogs multichannel geophysical time-series recordings
//! from field loggers. It reads the fixed 1024-byte binary header of
//! legacy .ats recordings, organizes channels into the filesystem-backed
//! Survey -> Station -> Run -> Channel hierarchy, and stitches split
//! recordings back together with sample-accurate gap filling.
//!
//! ## The data model
//!
//! - A **channel** is one recorded time series: one sensor, one run, one
//!   sample rate. On disk it is a binary data file plus a JSON sidecar
//!   sharing the same stem.
//! - A **run** is a set of channels recorded together; all channels of a
//!   run share one sample rate and live in one `run_NNN` directory.
//! - A **station** is a named site owning its runs.
//! - The **survey** is the root catalog. It is either created fresh
//!   (with its fixed subdirectory skeleton) or opened read-only from an
//!   existing tree.
//!
//! ```text
//! survey/
//! |---- config, db, reports, ... (fixed skeleton)
//! |---- stations/
//! |    |---- <station>/
//! |    |    |---- run_001/
//! |    |    |    |---- 084_ADU-08e_C002_R001_TEx_128Hz.atss
//! |    |    |    |---- 084_ADU-08e_C002_R001_TEx_128Hz.json
//! |---- meta/
//! |    |---- <station>/run_001/   (sidecar + companion XML mirror)
//! ```
//!
//! ## Ingestion
//!
//! Many worker threads decode headers and push channels into the
//! survey's ingestion buffer concurrently. A single tree-building pass
//! then sorts the buffer by start time, groups by station, assigns runs
//! (same sample rate joins, anything else opens the next free run
//! number) and binds each channel to its final path. Materialization —
//! converting the raw integer samples to physical units on disk — runs
//! in parallel afterwards, because all paths are disjoint by then.
//!
//! ## Concatenation
//!
//! Recordings split across files are merged by the
//! [`concat::ConcatEngine`]: a streaming single-pass copy that zero-fills
//! time gaps and records real-versus-filler samples in a
//! [`selection_mask::SelectionMask`] next to the output. Overlapping
//! inputs are rejected by default ([`concat::GapPolicy`]).
//!
//! ## Configuration
//!
//! Tools built on this library read a YAML config:
//!
//! ```yml
//! ats_path: /data/field
//! survey_path: /data/survey
//! station: null
//! cat_path: null
//! clamp_overlap: false
//! n_threads: 4
//! ```
pub mod calibration;
pub mod channel;
pub mod concat;
pub mod config;
pub mod constants;
pub mod error;
pub mod header;
pub mod naming;
pub mod process;
pub mod run;
pub mod selection_mask;
pub mod station;
pub mod survey;
pub mod timestamp;
pub mod worker_status;
