//! Per-sample selection mask persisted beside a time series file.
//!
//! One bit per sample; a set bit means the sample is synthetic filler and
//! is excluded from processing. The file form is an 8-byte little-endian
//! header (length, version, sample count) followed by the bits packed
//! LSB-first into bytes. A partial trailing byte is padded with excluded
//! bits, so the mask always holds at least as many bits as samples and
//! everything past the sample count reads as excluded.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bitvec::prelude::*;
use byteorder::{ByteOrder, LittleEndian};

use super::constants::{MASK_HEADER_LENGTH, MASK_HEADER_VERSION};
use super::error::{AtsFileError, DecodeError, IoError};

/// File extension of a persisted mask.
pub const MASK_EXTENSION: &str = "atm";

#[derive(Debug, Clone, Default)]
pub struct SelectionMask {
    bits: BitVec<u8, Lsb0>,
    samples: usize,
}

impl SelectionMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(samples: usize) -> Self {
        Self {
            bits: BitVec::with_capacity(samples),
            samples: 0,
        }
    }

    /// Append `n` real samples.
    pub fn add_included(&mut self, n: usize) {
        self.bits.resize(self.bits.len() + n, false);
        self.samples += n;
    }

    /// Append `n` filler samples.
    pub fn add_excluded(&mut self, n: usize) {
        self.bits.resize(self.bits.len() + n, true);
        self.samples += n;
    }

    /// Logical length in samples.
    pub fn len(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Number of filler samples within the logical length.
    pub fn excluded_count(&self) -> usize {
        self.bits[..self.samples].count_ones()
    }

    /// Whether sample `index` is filler. Padding past the logical length
    /// is always excluded.
    pub fn is_excluded(&self, index: usize) -> bool {
        if index >= self.samples {
            return true;
        }
        self.bits[index]
    }

    /// The mask path for a given data file: same stem, `.atm` extension.
    pub fn path_for(data_path: &Path) -> PathBuf {
        data_path.with_extension(MASK_EXTENSION)
    }

    /// Write the mask next to `data_path`, returning the mask path.
    pub fn write(&self, data_path: &Path) -> Result<PathBuf, AtsFileError> {
        let path = Self::path_for(data_path);
        let mut header = [0u8; 8];
        LittleEndian::write_i16(&mut header[0..], MASK_HEADER_LENGTH);
        LittleEndian::write_i16(&mut header[2..], MASK_HEADER_VERSION);
        LittleEndian::write_u32(&mut header[4..], self.samples as u32);

        let mut padded = self.bits.clone();
        while padded.len() % 8 != 0 {
            padded.push(true);
        }

        let mut file = File::create(&path).map_err(|e| IoError::at(&path, e))?;
        file.write_all(&header).map_err(|e| IoError::at(&path, e))?;
        file.write_all(padded.as_raw_slice())
            .map_err(|e| IoError::at(&path, e))?;
        Ok(path)
    }

    /// Read a mask back from the file next to `data_path`.
    pub fn read(data_path: &Path) -> Result<Self, AtsFileError> {
        let path = Self::path_for(data_path);
        if !path.exists() {
            return Err(IoError::Missing(path).into());
        }
        let mut file = File::open(&path).map_err(|e| IoError::at(&path, e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| IoError::at(&path, e))?;
        if bytes.len() < 8 {
            return Err(DecodeError::TruncatedMask(path).into());
        }
        let samples = LittleEndian::read_u32(&bytes[4..]) as usize;
        let bits = BitVec::<u8, Lsb0>::from_slice(&bytes[8..]);
        if bits.len() < samples {
            return Err(DecodeError::TruncatedMask(path).into());
        }
        Ok(Self { bits, samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting() {
        let mut mask = SelectionMask::new();
        mask.add_included(100);
        mask.add_excluded(10);
        mask.add_included(50);
        assert_eq!(mask.len(), 160);
        assert_eq!(mask.excluded_count(), 10);
        for i in 0..100 {
            assert!(!mask.is_excluded(i));
        }
        for i in 100..110 {
            assert!(mask.is_excluded(i));
        }
        for i in 110..160 {
            assert!(!mask.is_excluded(i));
        }
        // past the end counts as excluded
        assert!(mask.is_excluded(160));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("001_ADU-08e_C000_R001_TEx_128Hz.ats");

        let mut mask = SelectionMask::new();
        mask.add_included(13);
        mask.add_excluded(3);
        let mask_path = mask.write(&data_path).unwrap();
        assert_eq!(mask_path.extension().unwrap(), "atm");

        let back = SelectionMask::read(&data_path).unwrap();
        assert_eq!(back.len(), 16);
        assert_eq!(back.excluded_count(), 3);
        for i in 0..13 {
            assert!(!back.is_excluded(i));
        }
        for i in 13..16 {
            assert!(back.is_excluded(i));
        }
    }

    #[test]
    fn test_partial_byte_padding_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("chan.ats");

        let mut mask = SelectionMask::new();
        mask.add_included(5);
        mask.write(&data_path).unwrap();

        let back = SelectionMask::read(&data_path).unwrap();
        assert_eq!(back.len(), 5);
        // the three padding bits of the trailing byte read as excluded
        for i in 5..8 {
            assert!(back.is_excluded(i));
        }
    }
}
