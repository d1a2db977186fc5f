//! A run: channels recorded together at one start time and sample rate,
//! stored in one directory.

use std::fs;
use std::path::{Path, PathBuf};

use super::channel::Channel;
use super::error::{ConflictError, IoError, NotFoundError};
use super::naming::{run_to_string, string_to_run};

#[derive(Debug)]
pub struct Run {
    number: usize,
    dir: PathBuf,
    channels: Vec<Channel>,
}

impl Run {
    /// Create the run directory below a station and return the empty run.
    /// An already-existing directory is reused, never an error; concurrent
    /// creators must both succeed.
    pub fn create(station_dir: &Path, number: usize) -> Result<Self, IoError> {
        let dir = station_dir.join(run_to_string(number));
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(IoError::at(&dir, e)),
        }
        Ok(Self {
            number,
            dir,
            channels: Vec::new(),
        })
    }

    /// Discover a run from disk: every sidecar with a matching data file
    /// becomes a channel.
    pub fn scan(dir: &Path) -> Result<Self, IoError> {
        let number = string_to_run(&dir.file_name().unwrap_or_default().to_string_lossy())
            .unwrap_or(0);
        let mut run = Self {
            number,
            dir: dir.to_path_buf(),
            channels: Vec::new(),
        };
        for entry in fs::read_dir(dir).map_err(|e| IoError::at(dir, e))? {
            let path = entry.map_err(|e| IoError::at(dir, e))?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false)
                && path.with_extension("atss").exists()
            {
                match Channel::from_sidecar(&path) {
                    Ok(ch) => run.channels.push(ch),
                    Err(e) => log::warn!("skipping unreadable channel {:?}: {e}", path),
                }
            }
        }
        run.sort_channels();
        Ok(run)
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The sample rate every member shares; None while empty.
    pub fn sample_rate(&self) -> Option<f64> {
        self.channels.first().map(|ch| ch.sample_rate())
    }

    /// Whether this run would accept the channel: an empty run takes
    /// anything, a populated one requires the same sample rate.
    pub fn accepts(&self, channel: &Channel) -> bool {
        match self.sample_rate() {
            None => true,
            Some(rate) => rate == channel.sample_rate(),
        }
    }

    /// Add a channel, binding its path to this run's directory.
    ///
    /// A sample-rate mismatch rejects the channel and hands it back with
    /// the conflict so the caller can try another run.
    pub fn add_channel(&mut self, mut channel: Channel) -> Result<PathBuf, (ConflictError, Channel)> {
        if let Some(rate) = self.sample_rate() {
            if rate != channel.sample_rate() {
                return Err((
                    ConflictError::SampleRateMismatch {
                        run: self.number,
                        expected: rate,
                        got: channel.sample_rate(),
                    },
                    channel,
                ));
            }
        }
        channel.run = self.number;
        let path = match channel.bind_dir(&self.dir) {
            Ok(path) => path,
            Err(e) => return Err((e, channel)),
        };
        self.channels.push(channel);
        self.sort_channels();
        Ok(path)
    }

    /// Re-seed the run with one fresh channel per requested type. Existing
    /// channels are cleared; bulk declaration replaces, it does not merge.
    pub fn add_channel_set(&mut self, types: &[&str], sample_rate: f64) -> Result<(), ConflictError> {
        let mut seeded = Vec::with_capacity(types.len());
        for (i, channel_type) in types.iter().enumerate() {
            let mut ch = Channel::new(channel_type, sample_rate)?;
            ch.channel_no = i;
            ch.run = self.number;
            seeded.push(ch);
        }
        self.channels = seeded;
        self.sort_channels();
        Ok(())
    }

    /// Channels in stable channel-type-priority order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    /// First channel in priority order; empty runs are an error.
    pub fn first_channel(&self) -> Result<&Channel, NotFoundError> {
        self.channels
            .first()
            .ok_or_else(|| NotFoundError::EmptyRun(self.dir.clone()))
    }

    fn sort_channels(&mut self) {
        self.channels.sort_by_key(|ch| ch.sort_key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(channel_type: &str, rate: f64) -> Channel {
        Channel::new(channel_type, rate).unwrap()
    }

    #[test]
    fn test_empty_run_accepts_anything() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = Run::create(dir.path(), 1).unwrap();
        assert!(run.is_empty());
        let path = run.add_channel(channel("Ex", 512.0)).unwrap();
        assert!(path.starts_with(run.dir()));
        assert_eq!(run.sample_rate(), Some(512.0));
    }

    #[test]
    fn test_rejects_sample_rate_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = Run::create(dir.path(), 3).unwrap();
        run.add_channel(channel("Ex", 1024.0)).unwrap();

        let (err, rejected) = run.add_channel(channel("Ey", 512.0)).unwrap_err();
        assert!(matches!(
            err,
            ConflictError::SampleRateMismatch {
                run: 3,
                expected,
                got,
            } if expected == 1024.0 && got == 512.0
        ));
        // the channel comes back unbound, usable elsewhere
        assert!(!rejected.is_bound());
        assert_eq!(run.channels().len(), 1);
    }

    #[test]
    fn test_channels_enumerate_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = Run::create(dir.path(), 1).unwrap();
        for t in ["Hz", "Ey", "T", "Hx", "Ex"] {
            run.add_channel(channel(t, 128.0)).unwrap();
        }
        let order: Vec<&str> = run.channels().iter().map(|c| c.channel_type.as_str()).collect();
        assert_eq!(order, vec!["Ex", "Ey", "Hx", "Hz", "T"]);
    }

    #[test]
    fn test_add_channel_set_reseeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = Run::create(dir.path(), 1).unwrap();
        run.add_channel(channel("Ex", 128.0)).unwrap();

        run.add_channel_set(&["Hx", "Hy", "Hz"], 256.0).unwrap();
        assert_eq!(run.channels().len(), 3);
        assert_eq!(run.sample_rate(), Some(256.0));
        let order: Vec<&str> = run.channels().iter().map(|c| c.channel_type.as_str()).collect();
        assert_eq!(order, vec!["Hx", "Hy", "Hz"]);
    }

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = Run::create(dir.path(), 2).unwrap();
        let second = Run::create(dir.path(), 2).unwrap();
        assert_eq!(first.dir(), second.dir());
    }

    #[test]
    fn test_scan_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = Run::create(dir.path(), 5).unwrap();
        let mut ch = channel("Ex", 64.0);
        ch.serial = 12;
        ch.system = "ADU-07e".to_string();
        run.add_channel(ch).unwrap();
        {
            let ch = &mut run.channels_mut()[0];
            ch.write_data(&[1.0, 2.0]).unwrap();
            ch.write_sidecar().unwrap();
        }

        let scanned = Run::scan(run.dir()).unwrap();
        assert_eq!(scanned.number(), 5);
        assert_eq!(scanned.channels().len(), 1);
        assert_eq!(scanned.channels()[0].samples, 2);
        assert_eq!(scanned.channels()[0].channel_type, "Ex");
    }
}
