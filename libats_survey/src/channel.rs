//! One recorded time series: binary samples, a JSON sidecar and a naming
//! identity.
//!
//! A channel is created either by decoding a legacy .ats header or by
//! explicit construction for synthetic data. Its filesystem path is
//! assigned exactly once, when a run accepts the channel; after that the
//! channel and its files are inseparable.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::calibration::Calibration;
use super::constants::{channel_type_rank, ATSS_SAMPLE_BYTES, STREAM_CHUNK_SAMPLES};
use super::error::{ChannelError, ConflictError, IoError};
use super::header::{run_from_filename, AtsFile, AtsHeader};
use super::naming::{self, TREAT_AS_NULL};
use super::timestamp::TimeStamp;

/// The JSON sidecar stored next to the .atss data file. The identity
/// fields are not repeated here; they live in the filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    datetime: String,
    latitude: f64,
    longitude: f64,
    elevation: f64,
    angle: f64,
    tilt: f64,
    resistance: f64,
    units: String,
    filter: String,
    source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    calibration: Option<Calibration>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    // identity, encoded in the filename
    pub serial: usize,
    pub system: String,
    pub channel_no: usize,
    pub run: usize,
    pub channel_type: String,
    sample_rate: f64,

    // observation fields, stored in the sidecar
    pub start: TimeStamp,
    pub samples: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    /// Orientation from North to East in degrees.
    pub angle: f64,
    /// Dip, positive down, in degrees.
    pub tilt: f64,
    /// Contact resistance of the electrodes in Ohm.
    pub resistance: f64,
    pub units: String,
    pub filter: String,
    pub source: String,
    pub cal: Option<Calibration>,

    /// Station key used to group channels during tree building.
    pub station: String,
    /// Companion XML filename of the legacy recording, if any.
    pub xml_companion: Option<String>,

    origin: Option<PathBuf>,
    dir: Option<PathBuf>,
}

impl Channel {
    /// Explicit construction for synthetic or test data.
    pub fn new(channel_type: &str, sample_rate: f64) -> Result<Self, ConflictError> {
        if sample_rate < TREAT_AS_NULL {
            return Err(ConflictError::BadSampleRate(sample_rate));
        }
        Ok(Self {
            serial: 0,
            system: String::new(),
            channel_no: 0,
            run: 0,
            channel_type: naming::simplify(channel_type, true),
            sample_rate,
            start: TimeStamp::epoch(),
            samples: 0,
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
            angle: 0.0,
            tilt: 0.0,
            resistance: 0.0,
            units: String::from("mV"),
            filter: String::new(),
            source: String::new(),
            cal: None,
            station: String::new(),
            xml_companion: None,
            origin: None,
            dir: None,
        })
    }

    /// Legacy construction from a decoded header. The origin path is the
    /// .ats file the header came from; its samples are converted on
    /// materialization. The station key defaults to the site name from
    /// the comments block, else the zero-padded serial.
    pub fn from_ats_header(header: &AtsHeader, origin: &Path) -> Result<Self, ConflictError> {
        let mut ch = Self::new(&header.channel_type, header.sample_rate as f64)?;
        ch.serial = header.serial_number as usize;
        ch.system = header.system_type.clone();
        ch.channel_no = header.channel_number as usize;
        ch.run = run_from_filename(&origin.file_name().unwrap_or_default().to_string_lossy());
        ch.start = header.start_time();
        ch.samples = header.effective_samples();
        ch.set_lat_lon_elev(header.latitude(), header.longitude(), header.elevation());
        ch.angle = header.pos_azimuth();
        ch.tilt = header.pos_tilt();
        ch.resistance = header.rho_probe_ohm as f64;
        let mut filters: Vec<&str> = header.lf_filter_names();
        filters.extend(header.hf_filter_names());
        ch.filter = filters.join(",");
        ch.station = if header.comments.site_name.is_empty() {
            naming::zero_fill(header.serial_number as u64, 3)
        } else {
            naming::simplify(&header.comments.site_name, true)
        };
        if !header.comments.xml_header.is_empty() {
            ch.xml_companion = Some(header.comments.xml_header.clone());
        }
        ch.origin = Some(origin.to_path_buf());
        Ok(ch)
    }

    /// Rebuild a channel from an existing sidecar/data file pair.
    pub fn from_sidecar(json_path: &Path) -> Result<Self, ChannelError> {
        let stem = json_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let id = naming::parse_channel_filename(&stem)
            .ok_or_else(|| ChannelError::BadFilename(json_path.to_path_buf()))?;

        let mut file = File::open(json_path).map_err(|e| IoError::at(json_path, e))?;
        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|e| IoError::at(json_path, e))?;
        let sidecar: Sidecar = serde_json::from_str(&text)
            .map_err(|e| ChannelError::Sidecar(json_path.to_path_buf(), e))?;

        let data_path = json_path.with_extension("atss");
        if !data_path.exists() {
            return Err(IoError::Missing(data_path).into());
        }
        let bytes = data_path
            .metadata()
            .map_err(|e| IoError::at(&data_path, e))?
            .len();

        let mut ch = Self::new(&id.channel_type, id.sample_rate)?;
        ch.serial = id.serial;
        ch.system = id.system;
        ch.channel_no = id.channel_no;
        ch.run = id.run;
        ch.start = TimeStamp::parse(&sidecar.datetime)
            .ok_or_else(|| ChannelError::BadDatetime(sidecar.datetime.clone()))?;
        ch.samples = bytes / ATSS_SAMPLE_BYTES as u64;
        ch.set_lat_lon_elev(sidecar.latitude, sidecar.longitude, sidecar.elevation);
        ch.angle = sidecar.angle;
        ch.tilt = sidecar.tilt;
        ch.resistance = sidecar.resistance;
        ch.units = sidecar.units;
        ch.filter = sidecar.filter;
        ch.source = sidecar.source;
        ch.cal = sidecar.calibration;
        ch.dir = json_path.parent().map(Path::to_path_buf);
        Ok(ch)
    }

    /// Short description for error messages and logs.
    pub fn label(&self) -> String {
        format!(
            "{}_{}_C{} T{}",
            naming::zero_fill(self.serial as u64, 3),
            self.system,
            naming::zero_fill(self.channel_no as u64, 3),
            self.channel_type
        )
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), ConflictError> {
        if sample_rate < TREAT_AS_NULL {
            return Err(ConflictError::BadSampleRate(sample_rate));
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    /// Position per ISO 6709; longitudes outside +/-180 wrap around.
    pub fn set_lat_lon_elev(&mut self, lat: f64, lon: f64, elev: f64) {
        self.latitude = lat;
        self.longitude = if lon > 180.0 {
            lon - 360.0
        } else if lon < -180.0 {
            lon + 360.0
        } else {
            lon
        };
        self.elevation = elev;
    }

    /// The tagged filename; same inputs always yield the same string.
    pub fn filename(&self, extension: &str) -> Result<String, ConflictError> {
        naming::channel_filename(
            self.serial,
            &self.system,
            self.channel_no,
            self.run,
            &self.channel_type,
            self.sample_rate,
            extension,
        )
    }

    /// Sort key inside a run: channel-type priority, then name, then
    /// channel number.
    pub fn sort_key(&self) -> (usize, String, usize) {
        (
            channel_type_rank(&self.channel_type),
            self.channel_type.clone(),
            self.channel_no,
        )
    }

    /// Bind this channel to its run directory. A path is assigned at most
    /// once; re-binding is a conflict.
    pub fn bind_dir(&mut self, dir: &Path) -> Result<PathBuf, ConflictError> {
        if let Some(bound) = &self.dir {
            return Err(ConflictError::PathAlreadyBound(self.label(), bound.clone()));
        }
        let name = self.filename(".atss")?;
        self.dir = Some(dir.to_path_buf());
        Ok(dir.join(name))
    }

    pub fn is_bound(&self) -> bool {
        self.dir.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Path of the source .ats recording, if this channel came from one.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn data_path(&self) -> Result<PathBuf, ChannelError> {
        let dir = self.dir.as_ref().ok_or_else(|| ChannelError::Unbound(self.label()))?;
        Ok(dir.join(self.filename(".atss")?))
    }

    pub fn sidecar_path(&self) -> Result<PathBuf, ChannelError> {
        let dir = self.dir.as_ref().ok_or_else(|| ChannelError::Unbound(self.label()))?;
        Ok(dir.join(self.filename(".json")?))
    }

    /// Write the JSON sidecar, returning its path.
    pub fn write_sidecar(&self) -> Result<PathBuf, ChannelError> {
        let path = self.sidecar_path()?;
        let sidecar = Sidecar {
            datetime: self.start.datetime(),
            latitude: self.latitude,
            longitude: self.longitude,
            elevation: self.elevation,
            angle: self.angle,
            tilt: self.tilt,
            resistance: self.resistance,
            units: self.units.clone(),
            filter: self.filter.clone(),
            source: self.source.clone(),
            calibration: self.cal.clone(),
        };
        let text = serde_json::to_string_pretty(&sidecar)
            .map_err(|e| ChannelError::Sidecar(path.clone(), e))?;
        let mut file = File::create(&path).map_err(|e| IoError::at(&path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| IoError::at(&path, e))?;
        Ok(path)
    }

    /// Write all samples (f64 little-endian) at once.
    pub fn write_data(&mut self, data: &[f64]) -> Result<PathBuf, ChannelError> {
        let path = self.data_path()?;
        let mut bytes = vec![0u8; data.len() * ATSS_SAMPLE_BYTES];
        LittleEndian::write_f64_into(data, &mut bytes);
        let mut file = File::create(&path).map_err(|e| IoError::at(&path, e))?;
        file.write_all(&bytes).map_err(|e| IoError::at(&path, e))?;
        self.samples = data.len() as u64;
        Ok(path)
    }

    /// Read the whole data file back.
    pub fn read_data(&self) -> Result<Vec<f64>, ChannelError> {
        let path = self.data_path()?;
        let mut file = File::open(&path).map_err(|e| IoError::at(&path, e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| IoError::at(&path, e))?;
        let n = bytes.len() / ATSS_SAMPLE_BYTES;
        let mut data = vec![0f64; n];
        LittleEndian::read_f64_into(&bytes[..n * ATSS_SAMPLE_BYTES], &mut data);
        Ok(data)
    }

    /// Convert the origin recording into the bound .atss file and write
    /// the sidecar. Streaming; safe to re-run, the result is
    /// byte-identical.
    pub fn materialize(&self) -> Result<u64, ChannelError> {
        let origin = self
            .origin
            .as_ref()
            .ok_or_else(|| ChannelError::NoOrigin(self.label()))?;
        let data_path = self.data_path()?;

        let mut input = AtsFile::open(origin)?;
        let file = File::create(&data_path).map_err(|e| IoError::at(&data_path, e))?;
        let mut out = BufWriter::new(file);
        let mut written: u64 = 0;
        loop {
            let chunk = input.read_scaled(STREAM_CHUNK_SAMPLES)?;
            if chunk.is_empty() {
                break;
            }
            let mut bytes = vec![0u8; chunk.len() * ATSS_SAMPLE_BYTES];
            LittleEndian::write_f64_into(&chunk, &mut bytes);
            out.write_all(&bytes).map_err(|e| IoError::at(&data_path, e))?;
            written += chunk.len() as u64;
        }
        out.flush().map_err(|e| IoError::at(&data_path, e))?;
        self.write_sidecar()?;
        log::info!("materialized {} -> {:?} ({} samples)", self.label(), data_path, written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::AtsHeader;

    fn bound_channel(dir: &Path) -> Channel {
        let mut ch = Channel::new("Ex", 128.0).unwrap();
        ch.serial = 84;
        ch.system = "ADU-08e".to_string();
        ch.channel_no = 2;
        ch.run = 1;
        ch.start = TimeStamp::parse("2019-11-20T06:52:49").unwrap();
        ch.bind_dir(dir).unwrap();
        ch
    }

    #[test]
    fn test_new_rejects_null_rate() {
        assert!(Channel::new("Ex", 0.0).is_err());
        assert!(Channel::new("Ex", -4.0).is_err());
    }

    #[test]
    fn test_filename_is_deterministic() {
        let ch = Channel::new("Ex", 128.0).unwrap();
        let a = ch.filename(".atss").unwrap();
        let b = ch.filename(".atss").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bind_dir_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut ch = Channel::new("Ex", 128.0).unwrap();
        ch.bind_dir(dir.path()).unwrap();
        let again = ch.bind_dir(dir.path());
        assert!(matches!(
            again,
            Err(ConflictError::PathAlreadyBound(_, _))
        ));
    }

    #[test]
    fn test_longitude_wrap() {
        let mut ch = Channel::new("Ex", 128.0).unwrap();
        ch.set_lat_lon_elev(10.0, 200.0, 0.0);
        assert_eq!(ch.longitude, -160.0);
        ch.set_lat_lon_elev(10.0, -200.0, 0.0);
        assert_eq!(ch.longitude, 160.0);
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ch = bound_channel(dir.path());
        ch.set_lat_lon_elev(52.24, 10.55, 81.5);
        ch.angle = 90.0;
        ch.units = "mV".to_string();
        ch.filter = "LF-RF-2".to_string();
        ch.write_data(&[1.0, 2.0, 3.0]).unwrap();
        let json_path = ch.write_sidecar().unwrap();

        let back = Channel::from_sidecar(&json_path).unwrap();
        assert_eq!(back.serial, 84);
        assert_eq!(back.system, "ADU-08e");
        assert_eq!(back.channel_no, 2);
        assert_eq!(back.run, 1);
        assert_eq!(back.channel_type, "Ex");
        assert_eq!(back.sample_rate(), 128.0);
        assert_eq!(back.start, ch.start);
        assert_eq!(back.samples, 3);
        assert_eq!(back.angle, 90.0);
        assert_eq!(back.filter, "LF-RF-2");
        assert!((back.latitude - 52.24).abs() < 1e-12);
    }

    #[test]
    fn test_data_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ch = bound_channel(dir.path());
        let data = vec![0.5, -0.25, 4096.0, 0.0];
        ch.write_data(&data).unwrap();
        assert_eq!(ch.read_data().unwrap(), data);
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ats_path = dir.path().join("084_V01_C02_R001_TEx_BL_128Hz.ats");
        let mut header = AtsHeader {
            sample_rate: 128.0,
            start: 1_574_230_369,
            lsbval: 0.25,
            serial_number: 84,
            channel_number: 2,
            channel_type: "Ex".to_string(),
            system_type: "ADU-08e".to_string(),
            ..Default::default()
        };
        header.set_effective_samples(4);
        let mut out = AtsFile::create(&ats_path, header.clone()).unwrap();
        out.write_counts(&[4, -8, 12, -16]).unwrap();
        out.finalize().unwrap();
        drop(out);

        let run_dir = dir.path().join("run_001");
        std::fs::create_dir(&run_dir).unwrap();
        let mut ch = Channel::from_ats_header(&header, &ats_path).unwrap();
        ch.bind_dir(&run_dir).unwrap();

        assert_eq!(ch.materialize().unwrap(), 4);
        let first = std::fs::read(ch.data_path().unwrap()).unwrap();
        assert_eq!(ch.materialize().unwrap(), 4);
        let second = std::fs::read(ch.data_path().unwrap()).unwrap();
        assert_eq!(first, second);

        // lsb scaling applied
        assert_eq!(ch.read_data().unwrap(), vec![1.0, -2.0, 3.0, -4.0]);
    }
}
