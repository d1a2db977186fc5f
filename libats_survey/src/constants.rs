//! Fixed tables and sizes shared across the crate.
//!
//! The system-name and filter tables are immutable statics; they are built
//! into the binary and passed around by reference, never mutated.

/// Size of the binary ats header in bytes. Non-sliced files always carry
/// exactly this length at offset 0x00.
pub const ATS_HEADER_SIZE: usize = 1024;

/// Header version written for newly produced files.
pub const ATS_HEADER_VERSION: i16 = 80;

/// Width of one raw sample in an .ats file (little-endian i32).
pub const ATS_SAMPLE_BYTES: usize = 4;

/// Width of one sample in an .atss file (little-endian f64, physical units).
pub const ATSS_SAMPLE_BYTES: usize = 8;

/// Header length field of a selection mask file.
pub const MASK_HEADER_LENGTH: i16 = 8;

/// Header version field of a selection mask file.
pub const MASK_HEADER_VERSION: i16 = 10;

/// Default chunk size (in samples) for streaming sample copies.
pub const STREAM_CHUNK_SAMPLES: usize = 524288;

/// Subdirectories created below a fresh survey root. `stations` holds the
/// data tree, `meta` mirrors it with sidecars and companion XML files.
pub const SURVEY_DIRS: [&str; 14] = [
    "config",
    "db",
    "reports",
    "dump",
    "edi",
    "filters",
    "jle",
    "jobs",
    "log",
    "processings",
    "shell",
    "tmp",
    "stations",
    "meta",
];

/// Enumeration order for channels inside a completed run. Types not listed
/// sort after all listed ones, alphabetically.
pub const CHANNEL_TYPE_PRIORITY: [&str; 14] = [
    "Ex", "Ey", "Hx", "Hy", "Hz", "Ez", "Jx", "Jy", "Jz", "x", "y", "z", "T", "t",
];

/// Sort key for a channel type; listed types first, in list order.
pub fn channel_type_rank(channel_type: &str) -> usize {
    CHANNEL_TYPE_PRIORITY
        .iter()
        .position(|t| *t == channel_type)
        .unwrap_or(CHANNEL_TYPE_PRIORITY.len())
}

/// On-disk system name (lowercased) to official system name.
pub const SYSTEM_NAMES: [(&str, &str); 7] = [
    ("adu06", "ADU-06"),
    ("adu07", "ADU-07e"),
    ("adu08", "ADU-08e"),
    ("adu09", "ADU-09u"),
    ("adu10", "ADU-10e"),
    ("adu11", "ADU-11e"),
    ("adu12", "ADU-12e"),
];

/// Official system name to device-class number.
pub const SYSTEM_CLASSES: [(&str, i32); 7] = [
    ("ADU-06", 0),
    ("ADU-07e", 0),
    ("ADU-08e", 1),
    ("ADU-09u", 4),
    ("ADU-10e", 4),
    ("ADU-11e", 5),
    ("ADU-12e", 6),
];

/// Fallback name for a system string not present in [`SYSTEM_NAMES`].
pub const UNKNOWN_SYSTEM: &str = "unknown";

/// Resolve the raw header system string to its official name.
///
/// Unknown strings map to [`UNKNOWN_SYSTEM`].
pub fn official_system_name(raw: &str) -> &'static str {
    let lowered = raw.trim().to_lowercase();
    SYSTEM_NAMES
        .iter()
        .find(|(key, _)| *key == lowered)
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_SYSTEM)
}

/// Reverse of [`official_system_name`]: the uppercase string written into
/// the binary header, or None when the name is not in the table.
pub fn header_system_name(official: &str) -> Option<String> {
    SYSTEM_NAMES
        .iter()
        .find(|(_, name)| *name == official)
        .map(|(key, _)| key.to_uppercase())
}

/// Device-class number of an official system name; 0 when unknown.
pub fn device_class(official: &str) -> i32 {
    SYSTEM_CLASSES
        .iter()
        .find(|(name, _)| *name == official)
        .map(|(_, class)| *class)
        .unwrap_or(0)
}

/// LF-board filter bank of a system: bit value in the first active byte of
/// the LF bitfield, and the filter name.
pub fn lf_filter_bank(official: &str) -> &'static [(u8, &'static str)] {
    const ADU07E: [(u8, &str); 7] = [
        (1, "LF-RF-1"),
        (2, "LF-RF-2"),
        (4, "LF-RF-3"),
        (8, "LF-RF-4"),
        (16, "LF-LP-4Hz"),
        (32, "MF-RF-1"),
        (64, "MF-RF-2"),
    ];
    const ADU08E: [(u8, &str); 3] = [(1, "LF-RF-1"), (2, "LF-RF-2"), (16, "LF-LP-4Hz")];
    match official {
        // the 06 and 07 use the 07e banks
        "ADU-06" | "ADU-07e" => &ADU07E,
        "ADU-08e" => &ADU08E,
        _ => &[],
    }
}

/// HF-board filter bank of a system, same encoding as [`lf_filter_bank`].
pub fn hf_filter_bank(official: &str) -> &'static [(u8, &'static str)] {
    const ADU07E: [(u8, &str); 1] = [(1, "HF-HP-1Hz")];
    const ADU08E: [(u8, &str); 1] = [(2, "HF-HP-500Hz")];
    match official {
        "ADU-06" | "ADU-07e" => &ADU07E,
        "ADU-08e" => &ADU08E,
        _ => &[],
    }
}
