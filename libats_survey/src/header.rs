//! Codec for the fixed 1024-byte binary header of .ats recordings.
//!
//! The on-disk layout is little-endian with fixed-width character arrays
//! that are NOT NUL-terminated (`channel_type` is exactly two bytes, "Ex").
//! [`AtsHeader::decode`] and [`AtsHeader::encode`] are pure and lossless
//! for every numeric field; character fields longer than their slot are
//! silently truncated on encode, which is the one documented lossy case.
//!
//! [`AtsFile`] wraps a header together with streaming access to the i32
//! sample payload that follows it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use super::constants::{
    self, ATS_HEADER_SIZE, ATS_HEADER_VERSION, ATS_SAMPLE_BYTES, UNKNOWN_SYSTEM,
};
use super::error::{AtsFileError, ConflictError, DecodeError, IoError};
use super::naming::{sample_rate_token, zero_fill, TREAT_AS_NULL};
use super::timestamp::TimeStamp;

/// Geometry distances below this are calculation noise, not a dipole.
const GEOMETRY_EPS: f64 = 0.001;

/// The free-text comment block at offset 0x100 of the header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AtsComments {
    pub client: String,           // 16 bytes
    pub contractor: String,       // 16 bytes
    pub area: String,             // 16 bytes
    pub survey_id: String,        // 16 bytes
    pub operator: String,         // 16 bytes
    pub site_name: String,        // 112 bytes
    pub xml_header: String,       // 64 bytes, companion XML filename, no path
    pub comments: String,         // 288 bytes
    pub site_name_rr: String,     // 112 bytes, remote reference site
    pub site_name_emap: String,   // 112 bytes, EMAP center site
}

/// One decoded ats header. Field order follows the binary layout; the
/// offset of each field is noted alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct AtsHeader {
    pub header_length: u16,             // 0x000, always 1024 for non-sliced files
    pub header_version: i16,            // 0x002
    pub samples: u32,                   // 0x004, u32::MAX defers to samples_64bit
    pub sample_rate: f32,               // 0x008, Hz
    pub start: u32,                     // 0x00C, Unix seconds UTC; wraps in 2106
    pub lsbval: f64,                    // 0x010, mV per count
    pub gmt_offset: i32,                // 0x018
    pub orig_sample_rate: f32,          // 0x01C
    pub serial_number: u16,             // 0x020
    pub serial_number_adc_board: u16,   // 0x022
    pub channel_number: u8,             // 0x024
    pub chopper: u8,                    // 0x025, 1 on / 0 off
    pub channel_type: String,           // 0x026, 2 bytes, Title-cased on decode
    pub sensor_type: String,            // 0x028, 6 bytes
    pub sensor_serial_number: i16,      // 0x02E
    pub x1: f32,                        // 0x030, south negative [m]
    pub y1: f32,                        // 0x034, west negative [m]
    pub z1: f32,                        // 0x038
    pub x2: f32,                        // 0x03C, north positive [m]
    pub y2: f32,                        // 0x040, east positive [m]
    pub z2: f32,                        // 0x044
    pub dipole_length: f32,             // 0x048, legacy; derive from positions instead
    pub angle: f32,                     // 0x04C, legacy; derive from positions instead
    pub rho_probe_ohm: f32,             // 0x050
    pub dc_offset_voltage_mv: f32,      // 0x054
    pub gain_stage1: f32,               // 0x058
    pub gain_stage2: f32,               // 0x05C
    pub lat_ms: i32,                    // 0x060, arc milliseconds
    pub lon_ms: i32,                    // 0x064, arc milliseconds
    pub elev_cm: i32,                   // 0x068, centimeters
    pub lat_long_type: char,            // 0x06C, 'G' GPS / 'U' user
    pub coordinate_type: char,          // 0x06D, 'U' UTM
    pub ref_meridian: i16,              // 0x06E
    pub northing: f64,                  // 0x070
    pub easting: f64,                   // 0x078
    pub gps_clock_status: char,         // 0x080, '-' unknown, 'N' no fix, 'C' full fix
    pub gps_accuracy: char,             // 0x081
    pub offset_utc: i16,                // 0x082
    pub system_type: String,            // 0x084, 12 bytes; official name after decode
    pub survey_header_filename: String, // 0x090, 12 bytes
    pub type_of_meas: String,           // 0x09C, 4 bytes, MT or CSMT
    pub dc_offset_corr_value: f64,      // 0x0A0
    pub dc_offset_corr_on: i8,          // 0x0A8
    pub input_div_on: i8,               // 0x0A9
    pub bit_indicator: i16,             // 0x0AA, 0 = 32bit samples
    pub result_selftest: String,        // 0x0AC, 2 bytes, NO or OK
    pub numslices: u16,                 // 0x0AE
    pub cal_freqs: i16,                 // 0x0B0
    pub cal_entry_length: i16,          // 0x0B2
    pub cal_version: i16,               // 0x0B4
    pub cal_start_address: i16,         // 0x0B6
    pub lf_filters: [u8; 8],            // 0x0B8, bitfield, first byte active
    pub utm_zone: String,               // 0x0C0, 12 bytes
    pub system_cal_datetime: u32,       // 0x0CC
    pub sensor_cal_filename: String,    // 0x0D0, 12 bytes
    pub sensor_cal_datetime: u32,       // 0x0DC
    pub powerline1: f32,                // 0x0E0
    pub powerline2: f32,                // 0x0E4
    pub hf_filters: [u8; 8],            // 0x0E8, bitfield, first byte active
    pub samples_64bit: u64,             // 0x0F0, authoritative iff samples == u32::MAX
    pub external_gain: f32,             // 0x0F8
    pub adb_board_type: String,         // 0x0FC, 4 bytes, LF HF MF BB
    pub comments: AtsComments,          // 0x100
}

impl Default for AtsHeader {
    fn default() -> Self {
        Self {
            header_length: ATS_HEADER_SIZE as u16,
            header_version: ATS_HEADER_VERSION,
            samples: 0,
            sample_rate: 0.0,
            start: 0,
            lsbval: 1.0,
            gmt_offset: 0,
            orig_sample_rate: 0.0,
            serial_number: 0,
            serial_number_adc_board: 0,
            channel_number: 0,
            chopper: 0,
            channel_type: String::new(),
            sensor_type: String::new(),
            sensor_serial_number: 0,
            x1: 0.0,
            y1: 0.0,
            z1: 0.0,
            x2: 0.0,
            y2: 0.0,
            z2: 0.0,
            dipole_length: 0.0,
            angle: 0.0,
            rho_probe_ohm: 0.0,
            dc_offset_voltage_mv: 0.0,
            gain_stage1: 0.0,
            gain_stage2: 0.0,
            lat_ms: 0,
            lon_ms: 0,
            elev_cm: 0,
            lat_long_type: 'G',
            coordinate_type: '\0',
            ref_meridian: 0,
            northing: 0.0,
            easting: 0.0,
            gps_clock_status: '-',
            gps_accuracy: '\0',
            offset_utc: 0,
            system_type: String::from(UNKNOWN_SYSTEM),
            survey_header_filename: String::new(),
            type_of_meas: String::new(),
            dc_offset_corr_value: 0.0,
            dc_offset_corr_on: 0,
            input_div_on: 0,
            bit_indicator: 0,
            result_selftest: String::new(),
            numslices: 0,
            cal_freqs: 0,
            cal_entry_length: 0,
            cal_version: 0,
            cal_start_address: 0,
            lf_filters: [0; 8],
            utm_zone: String::new(),
            system_cal_datetime: 0,
            sensor_cal_filename: String::new(),
            sensor_cal_datetime: 0,
            powerline1: 0.0,
            powerline2: 0.0,
            hf_filters: [0; 8],
            samples_64bit: 0,
            external_gain: 0.0,
            adb_board_type: String::new(),
            comments: AtsComments::default(),
        }
    }
}

/// NUL-trim then whitespace-trim a fixed-width character field.
fn read_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// NUL-pad a string into a fixed-width slot, silently truncating overflow.
fn write_str(slot: &mut [u8], value: &str) {
    for (dst, src) in slot.iter_mut().zip(value.bytes()) {
        *dst = src;
    }
}

/// Title-case a channel type code: first letter upper, rest lower.
/// Single-letter codes (x, y, z, T, t) pass through unchanged.
fn normalize_channel_type(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) if raw.len() > 1 => {
            let mut out = String::with_capacity(raw.len());
            out.push(first.to_ascii_uppercase());
            out.extend(chars.map(|c| c.to_ascii_lowercase()));
            out
        }
        _ => raw.to_string(),
    }
}

/// Decode a filter byte against a bank, largest bit value first.
fn filter_names(byte: u8, bank: &'static [(u8, &'static str)]) -> Vec<&'static str> {
    let mut sorted: Vec<(u8, &'static str)> = bank.to_vec();
    sorted.sort_by(|a, b| b.0.cmp(&a.0));
    let mut remaining = byte;
    let mut names = Vec::new();
    for (bit, name) in sorted {
        if remaining >= bit && bit > 0 {
            names.push(name);
            remaining -= bit;
        }
    }
    names
}

/// Encode filter names back into the active byte of a bank.
fn filter_byte(names: &[&str], bank: &'static [(u8, &'static str)]) -> u8 {
    bank.iter()
        .filter(|(_, name)| names.contains(name))
        .map(|(bit, _)| bit)
        .sum()
}

impl AtsHeader {
    /// Decode a 1024-byte buffer into a header record.
    ///
    /// Pure; the only failure mode is a buffer shorter than the fixed
    /// header size.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < ATS_HEADER_SIZE {
            return Err(DecodeError::Truncated(buf.len()));
        }
        let b = buf;
        let mut lf_filters = [0u8; 8];
        lf_filters.copy_from_slice(&b[0x0B8..0x0C0]);
        let mut hf_filters = [0u8; 8];
        hf_filters.copy_from_slice(&b[0x0E8..0x0F0]);

        Ok(Self {
            header_length: LittleEndian::read_u16(&b[0x000..]),
            header_version: LittleEndian::read_i16(&b[0x002..]),
            samples: LittleEndian::read_u32(&b[0x004..]),
            sample_rate: LittleEndian::read_f32(&b[0x008..]),
            start: LittleEndian::read_u32(&b[0x00C..]),
            lsbval: LittleEndian::read_f64(&b[0x010..]),
            gmt_offset: LittleEndian::read_i32(&b[0x018..]),
            orig_sample_rate: LittleEndian::read_f32(&b[0x01C..]),
            serial_number: LittleEndian::read_u16(&b[0x020..]),
            serial_number_adc_board: LittleEndian::read_u16(&b[0x022..]),
            channel_number: b[0x024],
            chopper: b[0x025],
            channel_type: normalize_channel_type(&read_str(&b[0x026..0x028])),
            sensor_type: read_str(&b[0x028..0x02E]),
            sensor_serial_number: LittleEndian::read_i16(&b[0x02E..]),
            x1: LittleEndian::read_f32(&b[0x030..]),
            y1: LittleEndian::read_f32(&b[0x034..]),
            z1: LittleEndian::read_f32(&b[0x038..]),
            x2: LittleEndian::read_f32(&b[0x03C..]),
            y2: LittleEndian::read_f32(&b[0x040..]),
            z2: LittleEndian::read_f32(&b[0x044..]),
            dipole_length: LittleEndian::read_f32(&b[0x048..]),
            angle: LittleEndian::read_f32(&b[0x04C..]),
            rho_probe_ohm: LittleEndian::read_f32(&b[0x050..]),
            dc_offset_voltage_mv: LittleEndian::read_f32(&b[0x054..]),
            gain_stage1: LittleEndian::read_f32(&b[0x058..]),
            gain_stage2: LittleEndian::read_f32(&b[0x05C..]),
            lat_ms: LittleEndian::read_i32(&b[0x060..]),
            lon_ms: LittleEndian::read_i32(&b[0x064..]),
            elev_cm: LittleEndian::read_i32(&b[0x068..]),
            lat_long_type: b[0x06C] as char,
            coordinate_type: b[0x06D] as char,
            ref_meridian: LittleEndian::read_i16(&b[0x06E..]),
            northing: LittleEndian::read_f64(&b[0x070..]),
            easting: LittleEndian::read_f64(&b[0x078..]),
            gps_clock_status: b[0x080] as char,
            gps_accuracy: b[0x081] as char,
            offset_utc: LittleEndian::read_i16(&b[0x082..]),
            system_type: constants::official_system_name(&read_str(&b[0x084..0x090])).to_string(),
            survey_header_filename: read_str(&b[0x090..0x09C]),
            type_of_meas: read_str(&b[0x09C..0x0A0]),
            dc_offset_corr_value: LittleEndian::read_f64(&b[0x0A0..]),
            dc_offset_corr_on: b[0x0A8] as i8,
            input_div_on: b[0x0A9] as i8,
            bit_indicator: LittleEndian::read_i16(&b[0x0AA..]),
            result_selftest: read_str(&b[0x0AC..0x0AE]),
            numslices: LittleEndian::read_u16(&b[0x0AE..]),
            cal_freqs: LittleEndian::read_i16(&b[0x0B0..]),
            cal_entry_length: LittleEndian::read_i16(&b[0x0B2..]),
            cal_version: LittleEndian::read_i16(&b[0x0B4..]),
            cal_start_address: LittleEndian::read_i16(&b[0x0B6..]),
            lf_filters,
            utm_zone: read_str(&b[0x0C0..0x0CC]),
            system_cal_datetime: LittleEndian::read_u32(&b[0x0CC..]),
            sensor_cal_filename: read_str(&b[0x0D0..0x0DC]),
            sensor_cal_datetime: LittleEndian::read_u32(&b[0x0DC..]),
            powerline1: LittleEndian::read_f32(&b[0x0E0..]),
            powerline2: LittleEndian::read_f32(&b[0x0E4..]),
            hf_filters,
            samples_64bit: LittleEndian::read_u64(&b[0x0F0..]),
            external_gain: LittleEndian::read_f32(&b[0x0F8..]),
            adb_board_type: read_str(&b[0x0FC..0x100]),
            comments: AtsComments {
                client: read_str(&b[0x100..0x110]),
                contractor: read_str(&b[0x110..0x120]),
                area: read_str(&b[0x120..0x130]),
                survey_id: read_str(&b[0x130..0x140]),
                operator: read_str(&b[0x140..0x150]),
                site_name: read_str(&b[0x150..0x1C0]),
                xml_header: read_str(&b[0x1C0..0x200]),
                comments: read_str(&b[0x200..0x320]),
                site_name_rr: read_str(&b[0x320..0x390]),
                site_name_emap: read_str(&b[0x390..0x400]),
            },
        })
    }

    /// Encode the record into its 1024-byte binary form.
    ///
    /// The buffer is zero-filled first so unset fields read back as
    /// zero/empty rather than stale bytes. Character fields longer than
    /// their fixed width are silently truncated.
    pub fn encode(&self) -> [u8; ATS_HEADER_SIZE] {
        let mut b = [0u8; ATS_HEADER_SIZE];
        LittleEndian::write_u16(&mut b[0x000..], self.header_length);
        LittleEndian::write_i16(&mut b[0x002..], self.header_version);
        LittleEndian::write_u32(&mut b[0x004..], self.samples);
        LittleEndian::write_f32(&mut b[0x008..], self.sample_rate);
        LittleEndian::write_u32(&mut b[0x00C..], self.start);
        LittleEndian::write_f64(&mut b[0x010..], self.lsbval);
        LittleEndian::write_i32(&mut b[0x018..], self.gmt_offset);
        LittleEndian::write_f32(&mut b[0x01C..], self.orig_sample_rate);
        LittleEndian::write_u16(&mut b[0x020..], self.serial_number);
        LittleEndian::write_u16(&mut b[0x022..], self.serial_number_adc_board);
        b[0x024] = self.channel_number;
        b[0x025] = self.chopper;
        write_str(&mut b[0x026..0x028], &self.channel_type);
        write_str(&mut b[0x028..0x02E], &self.sensor_type);
        LittleEndian::write_i16(&mut b[0x02E..], self.sensor_serial_number);
        LittleEndian::write_f32(&mut b[0x030..], self.x1);
        LittleEndian::write_f32(&mut b[0x034..], self.y1);
        LittleEndian::write_f32(&mut b[0x038..], self.z1);
        LittleEndian::write_f32(&mut b[0x03C..], self.x2);
        LittleEndian::write_f32(&mut b[0x040..], self.y2);
        LittleEndian::write_f32(&mut b[0x044..], self.z2);
        LittleEndian::write_f32(&mut b[0x048..], self.dipole_length);
        LittleEndian::write_f32(&mut b[0x04C..], self.angle);
        LittleEndian::write_f32(&mut b[0x050..], self.rho_probe_ohm);
        LittleEndian::write_f32(&mut b[0x054..], self.dc_offset_voltage_mv);
        LittleEndian::write_f32(&mut b[0x058..], self.gain_stage1);
        LittleEndian::write_f32(&mut b[0x05C..], self.gain_stage2);
        LittleEndian::write_i32(&mut b[0x060..], self.lat_ms);
        LittleEndian::write_i32(&mut b[0x064..], self.lon_ms);
        LittleEndian::write_i32(&mut b[0x068..], self.elev_cm);
        b[0x06C] = self.lat_long_type as u8;
        b[0x06D] = self.coordinate_type as u8;
        LittleEndian::write_i16(&mut b[0x06E..], self.ref_meridian);
        LittleEndian::write_f64(&mut b[0x070..], self.northing);
        LittleEndian::write_f64(&mut b[0x078..], self.easting);
        b[0x080] = self.gps_clock_status as u8;
        b[0x081] = self.gps_accuracy as u8;
        LittleEndian::write_i16(&mut b[0x082..], self.offset_utc);
        let system = constants::header_system_name(&self.system_type)
            .unwrap_or_else(|| self.system_type.clone());
        write_str(&mut b[0x084..0x090], &system);
        write_str(&mut b[0x090..0x09C], &self.survey_header_filename);
        write_str(&mut b[0x09C..0x0A0], &self.type_of_meas);
        LittleEndian::write_f64(&mut b[0x0A0..], self.dc_offset_corr_value);
        b[0x0A8] = self.dc_offset_corr_on as u8;
        b[0x0A9] = self.input_div_on as u8;
        LittleEndian::write_i16(&mut b[0x0AA..], self.bit_indicator);
        write_str(&mut b[0x0AC..0x0AE], &self.result_selftest);
        LittleEndian::write_u16(&mut b[0x0AE..], self.numslices);
        LittleEndian::write_i16(&mut b[0x0B0..], self.cal_freqs);
        LittleEndian::write_i16(&mut b[0x0B2..], self.cal_entry_length);
        LittleEndian::write_i16(&mut b[0x0B4..], self.cal_version);
        LittleEndian::write_i16(&mut b[0x0B6..], self.cal_start_address);
        b[0x0B8..0x0C0].copy_from_slice(&self.lf_filters);
        write_str(&mut b[0x0C0..0x0CC], &self.utm_zone);
        LittleEndian::write_u32(&mut b[0x0CC..], self.system_cal_datetime);
        write_str(&mut b[0x0D0..0x0DC], &self.sensor_cal_filename);
        LittleEndian::write_u32(&mut b[0x0DC..], self.sensor_cal_datetime);
        LittleEndian::write_f32(&mut b[0x0E0..], self.powerline1);
        LittleEndian::write_f32(&mut b[0x0E4..], self.powerline2);
        b[0x0E8..0x0F0].copy_from_slice(&self.hf_filters);
        LittleEndian::write_u64(&mut b[0x0F0..], self.samples_64bit);
        LittleEndian::write_f32(&mut b[0x0F8..], self.external_gain);
        write_str(&mut b[0x0FC..0x100], &self.adb_board_type);
        write_str(&mut b[0x100..0x110], &self.comments.client);
        write_str(&mut b[0x110..0x120], &self.comments.contractor);
        write_str(&mut b[0x120..0x130], &self.comments.area);
        write_str(&mut b[0x130..0x140], &self.comments.survey_id);
        write_str(&mut b[0x140..0x150], &self.comments.operator);
        write_str(&mut b[0x150..0x1C0], &self.comments.site_name);
        write_str(&mut b[0x1C0..0x200], &self.comments.xml_header);
        write_str(&mut b[0x200..0x320], &self.comments.comments);
        write_str(&mut b[0x320..0x390], &self.comments.site_name_rr);
        write_str(&mut b[0x390..0x400], &self.comments.site_name_emap);
        b
    }

    /// Total samples, honoring the 64-bit overflow field.
    pub fn effective_samples(&self) -> u64 {
        if self.samples == u32::MAX {
            self.samples_64bit
        } else {
            self.samples as u64
        }
    }

    /// Store a sample count, spilling into the 64-bit field when needed.
    pub fn set_effective_samples(&mut self, samples: u64) {
        if samples >= u32::MAX as u64 {
            self.samples = u32::MAX;
            self.samples_64bit = samples;
        } else {
            self.samples = samples as u32;
            self.samples_64bit = 0;
        }
    }

    pub fn start_time(&self) -> TimeStamp {
        TimeStamp::new(self.start as i64, 0.0)
    }

    /// Stop time, `start + samples / sample_rate`, sample-accurate.
    pub fn stop_time(&self) -> TimeStamp {
        self.start_time()
            .add_samples(self.effective_samples(), self.sample_rate as f64)
    }

    /// Decimal degrees from arc milliseconds.
    pub fn latitude(&self) -> f64 {
        (self.lat_ms as f64 / 1000.0) / 3600.0
    }

    /// Decimal degrees from arc milliseconds.
    pub fn longitude(&self) -> f64 {
        (self.lon_ms as f64 / 1000.0) / 3600.0
    }

    /// Meters from centimeters.
    pub fn elevation(&self) -> f64 {
        self.elev_cm as f64 / 100.0
    }

    /// Dipole length in meters from the two electrode positions.
    pub fn pos_length(&self) -> f64 {
        let tx = (self.x2 - self.x1) as f64;
        let ty = (self.y2 - self.y1) as f64;
        let tz = (self.z2 - self.z1) as f64;
        let length = (tx * tx + ty * ty + tz * tz).sqrt();
        if length < GEOMETRY_EPS {
            0.0
        } else {
            length
        }
    }

    /// Azimuth from North in degrees, derived from the electrode
    /// positions. Coils without geometry default to their nominal
    /// orientation (Hx north, Hy east). Near-cardinal results snap.
    pub fn pos_azimuth(&self) -> f64 {
        let mut tx = (self.x2 - self.x1) as f64;
        let mut ty = (self.y2 - self.y1) as f64;
        if tx.abs() < GEOMETRY_EPS {
            tx = 0.0;
        }
        if ty.abs() < GEOMETRY_EPS {
            ty = 0.0;
        }
        if self.pos_length() == 0.0 {
            return match self.channel_type.as_str() {
                "Hy" => 90.0,
                _ => 0.0,
            };
        }
        if tx == 0.0 && ty == 0.0 {
            return 0.0;
        }
        let ang = ty.atan2(tx).to_degrees();
        for cardinal in [0.0, 90.0, 180.0, 270.0] {
            if (ang - cardinal).abs() < 0.01 {
                return cardinal;
            }
        }
        ang
    }

    /// Tilt (dip) in degrees, positive down. A coil without geometry is
    /// vertical when it is an Hz channel, horizontal otherwise.
    pub fn pos_tilt(&self) -> f64 {
        let tz = (self.z2 - self.z1) as f64;
        let length = self.pos_length();
        if length == 0.0 {
            return if self.channel_type == "Hz" { 90.0 } else { 0.0 };
        }
        if tz < GEOMETRY_EPS {
            return 0.0;
        }
        let ang = 90.0 - (tz / length).acos().to_degrees();
        for cardinal in [0.0, 90.0] {
            if (ang - cardinal).abs() < 0.01 {
                return cardinal;
            }
        }
        ang
    }

    /// Device-class number of the system, 0 for unknown systems.
    pub fn device_class(&self) -> i32 {
        constants::device_class(&self.system_type)
    }

    /// Names of the LF-board filters active in the bitfield.
    pub fn lf_filter_names(&self) -> Vec<&'static str> {
        filter_names(self.lf_filters[0], constants::lf_filter_bank(&self.system_type))
    }

    /// Names of the HF-board filters active in the bitfield.
    pub fn hf_filter_names(&self) -> Vec<&'static str> {
        filter_names(self.hf_filters[0], constants::hf_filter_bank(&self.system_type))
    }

    pub fn set_lf_filters(&mut self, names: &[&str]) {
        self.lf_filters = [0; 8];
        self.lf_filters[0] = filter_byte(names, constants::lf_filter_bank(&self.system_type));
    }

    pub fn set_hf_filters(&mut self, names: &[&str]) {
        self.hf_filters = [0; 8];
        self.hf_filters[0] = filter_byte(names, constants::hf_filter_bank(&self.system_type));
    }

    /// Band letter for the legacy filename: HF board recordings above
    /// 4096 Hz, LF otherwise.
    pub fn band_token(&self) -> &'static str {
        if self.sample_rate > 4096.0 {
            "BH"
        } else {
            "BL"
        }
    }

    /// The legacy fixed-width filename,
    /// `SSS_V01_Ccc_Rnnn_Ttt_Bb_RATEu.ats`.
    pub fn ats_filename(&self, run: usize) -> Result<String, ConflictError> {
        if (self.sample_rate as f64) < TREAT_AS_NULL {
            return Err(ConflictError::BadSampleRate(self.sample_rate as f64));
        }
        Ok(format!(
            "{}_V01_C{}_R{}_T{}_{}_{}.ats",
            zero_fill(self.serial_number as u64, 3),
            zero_fill(self.channel_number as u64, 2),
            zero_fill(run as u64, 3),
            self.channel_type,
            self.band_token(),
            sample_rate_token(self.sample_rate as f64),
        ))
    }

    /// Name of the companion XML document,
    /// `SERIAL_STARTDATE_STARTTIME_STOPDATE_STOPTIME_Rrrr_RATEu.xml`.
    ///
    /// The run number is parsed from the `R###` token of the existing
    /// filename and defaults to 0 when absent.
    pub fn xml_companion_name(&self, filename: &str) -> String {
        let run = run_from_filename(filename);
        let start = self.start_time();
        let stop = self.stop_time();
        format!(
            "{}_{}_{}_{}_{}_R{}_{}.xml",
            zero_fill(self.serial_number as u64, 3),
            start.date(),
            start.time_of_day_dashed(),
            stop.date(),
            stop.time_of_day_dashed(),
            zero_fill(run as u64, 3),
            sample_rate_token(self.sample_rate as f64),
        )
    }

    /// Measurement-directory name derived from the start time.
    pub fn measdir(&self) -> String {
        self.start_time().measdir()
    }
}

/// Run number from an `R###` token inside a filename stem; 0 when absent
/// or unparsable.
pub fn run_from_filename(filename: &str) -> usize {
    let stem = filename.rsplit('/').next().unwrap_or(filename);
    let stem = stem.split('.').next().unwrap_or(stem);
    let mut run = 0;
    for token in stem.split('_') {
        if let Some(rest) = token.strip_prefix(['R', 'r']) {
            if let Ok(parsed) = rest.parse::<usize>() {
                run = parsed;
            }
        }
    }
    run
}

/// Read as much of `buf` as the file still holds.
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        let n = file.read(&mut buf[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    Ok(got)
}

/// An open .ats file: decoded header plus streaming access to the i32
/// sample payload.
#[derive(Debug)]
pub struct AtsFile {
    pub header: AtsHeader,
    path: PathBuf,
    file: File,
    /// Samples written so far; becomes the header sample count on
    /// [`AtsFile::finalize`].
    pub write_count: u64,
}

impl AtsFile {
    /// Open an existing recording for reading, positioned at the first
    /// sample.
    pub fn open(path: &Path) -> Result<Self, AtsFileError> {
        if !path.exists() {
            return Err(IoError::Missing(path.to_path_buf()).into());
        }
        let mut file = File::open(path).map_err(|e| IoError::at(path, e))?;
        let mut buf = [0u8; ATS_HEADER_SIZE];
        let got = read_full(&mut file, &mut buf).map_err(|e| IoError::at(path, e))?;
        let header = AtsHeader::decode(&buf[..got])?;
        Ok(Self {
            header,
            path: path.to_path_buf(),
            file,
            write_count: 0,
        })
    }

    /// Decode only the header of a recording.
    pub fn read_header(path: &Path) -> Result<AtsHeader, AtsFileError> {
        Ok(Self::open(path)?.header)
    }

    /// Create (or truncate) a recording, write the header, and keep the
    /// file open for sample writes.
    pub fn create(path: &Path, header: AtsHeader) -> Result<Self, AtsFileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| IoError::at(path, e))?;
        file.write_all(&header.encode())
            .map_err(|e| IoError::at(path, e))?;
        Ok(Self {
            header,
            path: path.to_path_buf(),
            file,
            write_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `max` raw samples; an empty vector signals the end of
    /// the file. A trailing partial sample is dropped.
    pub fn read_samples(&mut self, max: usize) -> Result<Vec<i32>, AtsFileError> {
        let mut bytes = vec![0u8; max * ATS_SAMPLE_BYTES];
        let got = read_full(&mut self.file, &mut bytes).map_err(|e| IoError::at(&self.path, e))?;
        let n = got / ATS_SAMPLE_BYTES;
        let mut samples = vec![0i32; n];
        LittleEndian::read_i32_into(&bytes[..n * ATS_SAMPLE_BYTES], &mut samples);
        Ok(samples)
    }

    /// Read up to `max` samples scaled by the lsb value into mV.
    pub fn read_scaled(&mut self, max: usize) -> Result<Vec<f64>, AtsFileError> {
        let counts = self.read_samples(max)?;
        Ok(counts
            .into_iter()
            .map(|c| c as f64 * self.header.lsbval)
            .collect())
    }

    /// Append raw counts to the payload.
    pub fn write_counts(&mut self, counts: &[i32]) -> Result<(), AtsFileError> {
        let mut bytes = vec![0u8; counts.len() * ATS_SAMPLE_BYTES];
        LittleEndian::write_i32_into(counts, &mut bytes);
        self.file
            .write_all(&bytes)
            .map_err(|e| IoError::at(&self.path, e))?;
        self.write_count += counts.len() as u64;
        Ok(())
    }

    /// Append counts recorded at a different lsb value, rescaling them to
    /// this file's lsb. Equal lsb values copy verbatim.
    pub fn write_counts_scaled(&mut self, source_lsb: f64, counts: &[i32]) -> Result<(), AtsFileError> {
        if source_lsb == self.header.lsbval {
            return self.write_counts(counts);
        }
        let rescaled: Vec<i32> = counts
            .iter()
            .map(|c| ((*c as f64 * source_lsb) / self.header.lsbval) as i32)
            .collect();
        self.write_counts(&rescaled)
    }

    /// Append physical values (mV), converting through the lsb value.
    pub fn write_scaled(&mut self, data: &[f64]) -> Result<(), AtsFileError> {
        let counts: Vec<i32> = data.iter().map(|d| (d / self.header.lsbval) as i32).collect();
        self.write_counts(&counts)
    }

    /// Append `n` zero samples.
    pub fn write_zeros(&mut self, n: u64) -> Result<(), AtsFileError> {
        let zeros = vec![0u8; ATS_SAMPLE_BYTES];
        for _ in 0..n {
            self.file
                .write_all(&zeros)
                .map_err(|e| IoError::at(&self.path, e))?;
        }
        self.write_count += n;
        Ok(())
    }

    /// Fix the header's sample count to what was actually written and
    /// rewrite the header in place. The exact total is not known before
    /// the payload is complete.
    pub fn finalize(&mut self) -> Result<(), AtsFileError> {
        self.header.set_effective_samples(self.write_count);
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| IoError::at(&self.path, e))?;
        self.file
            .write_all(&self.header.encode())
            .map_err(|e| IoError::at(&self.path, e))?;
        self.file.flush().map_err(|e| IoError::at(&self.path, e))?;
        Ok(())
    }
}
