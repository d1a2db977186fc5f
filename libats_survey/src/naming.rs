//! Deterministic name generation and parsing.
//!
//! Two grammars live here: run directory names (`run_007`) and the tagged
//! channel filename `SSS_SYSTEM_Cccc_Rrrr_Ttype_RATEu[.ext]`. The legacy
//! fixed-width `.ats` filename is generated by the header codec, which
//! reuses the rate token from this module. All functions are pure; nothing
//! here touches the filesystem.

use super::error::ConflictError;

/// Sample rates closer to zero than this are rejected outright.
pub const TREAT_AS_NULL: f64 = 1e-12;

/// Rates above this render as Hz, below as integer seconds of period.
const HZ_THRESHOLD: f64 = 0.999999;

/// A sample rate rendered for a filename.
///
/// `value` is the rounded integer magnitude, `unit` is `"Hz"` or `"s"`,
/// and `residual` is the rounding error. A non-zero residual means the
/// token does not reconstruct the input rate; the caller decides whether
/// that is acceptable, this module does not auto-correct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateToken {
    pub value: f64,
    pub unit: &'static str,
    pub residual: f64,
}

impl RateToken {
    /// The compact string form, e.g. `256Hz` or `4s`.
    pub fn token(&self) -> String {
        format!("{}{}", self.value as u64, self.unit)
    }
}

/// Convert a sample rate to its filename token parts.
///
/// 256 becomes 256/`Hz`, 0.25 becomes 4/`s`. The residual is zero for
/// every rate whose token reads back exactly.
pub fn sample_rate_to_str(sample_rate: f64) -> RateToken {
    let (raw, unit) = if sample_rate > HZ_THRESHOLD {
        (sample_rate, "Hz")
    } else {
        (1.0 / sample_rate, "s")
    };
    let value = raw.round();
    RateToken {
        value,
        unit,
        residual: value - raw,
    }
}

/// The token string alone; logs when rounding lost information.
pub fn sample_rate_token(sample_rate: f64) -> String {
    let token = sample_rate_to_str(sample_rate);
    if token.residual != 0.0 {
        log::warn!(
            "sample rate {} does not render exactly, residual {}",
            sample_rate,
            token.residual
        );
    }
    token.token()
}

/// Parse a rate token back to Hz. `256Hz` -> 256.0, `4s` -> 0.25.
pub fn parse_sample_rate(token: &str) -> Option<f64> {
    let digits: String = token.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    let unit: String = token.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    let value: f64 = digits.parse().ok()?;
    if value <= 0.0 {
        return None;
    }
    match unit.as_str() {
        "Hz" => Some(value),
        "s" => Some(1.0 / value),
        _ => None,
    }
}

/// Left-pad an integer with zeros to at least `width` digits.
pub fn zero_fill(value: u64, width: usize) -> String {
    format!("{value:0>width$}")
}

/// Run directory name, `run_001` style.
pub fn run_to_string(run: usize) -> String {
    format!("run_{}", zero_fill(run as u64, 3))
}

/// Parse a run directory name back to its number. Accepts anything whose
/// final `_`-separated token is a short decimal number.
pub fn string_to_run(name: &str) -> Option<usize> {
    let digits = match name.rfind('_') {
        Some(pos) => &name[pos + 1..],
        None => name,
    };
    if digits.is_empty() || digits.len() > 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Collapse whitespace runs to single spaces and trim. With `strip` set,
/// spaces and underscores are removed entirely; underscores are the token
/// separator of the filename grammar and would corrupt parsing.
pub fn simplify(s: &str, strip: bool) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if strip {
        collapsed.replace([' ', '_'], "")
    } else {
        collapsed
    }
}

/// The identity fields encoded in a tagged channel filename.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelId {
    pub serial: usize,
    pub system: String,
    pub channel_no: usize,
    pub run: usize,
    pub channel_type: String,
    pub sample_rate: f64,
}

/// Build the tagged channel filename `SSS_SYSTEM_Cccc_Rrrr_Ttype_RATEu`.
///
/// The extension, when given, must include its dot.
pub fn channel_filename(
    serial: usize,
    system: &str,
    channel_no: usize,
    run: usize,
    channel_type: &str,
    sample_rate: f64,
    extension: &str,
) -> Result<String, ConflictError> {
    if sample_rate < TREAT_AS_NULL {
        return Err(ConflictError::BadSampleRate(sample_rate));
    }
    Ok(format!(
        "{}_{}_C{}_R{}_T{}_{}{}",
        zero_fill(serial as u64, 3),
        simplify(system, true),
        zero_fill(channel_no as u64, 3),
        zero_fill(run as u64, 3),
        simplify(channel_type, true),
        sample_rate_token(sample_rate),
        extension,
    ))
}

/// Parse a tagged filename stem back into its identity fields.
pub fn parse_channel_filename(stem: &str) -> Option<ChannelId> {
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() != 6 {
        return None;
    }
    let serial: usize = tokens[0].parse().ok()?;
    let system = tokens[1].to_string();
    let channel_no: usize = tokens[2].strip_prefix('C')?.parse().ok()?;
    let run: usize = tokens[3].strip_prefix('R')?.parse().ok()?;
    let channel_type = tokens[4].strip_prefix('T')?.to_string();
    let sample_rate = parse_sample_rate(tokens[5])?;
    if channel_type.is_empty() {
        return None;
    }
    Some(ChannelId {
        serial,
        system,
        channel_no,
        run,
        channel_type,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_tokens() {
        assert_eq!(sample_rate_token(256.0), "256Hz");
        assert_eq!(sample_rate_token(1.0), "1Hz");
        assert_eq!(sample_rate_token(0.25), "4s");
        assert_eq!(sample_rate_token(0.125), "8s");
    }

    #[test]
    fn test_rate_token_roundtrip_nice() {
        for rate in [65536.0, 4096.0, 512.0, 128.0, 1.0, 0.5, 0.25, 0.125, 0.01] {
            let token = sample_rate_to_str(rate);
            assert_eq!(token.residual, 0.0, "rate {rate}");
            assert_eq!(parse_sample_rate(&token.token()), Some(rate));
        }
    }

    #[test]
    fn test_rate_token_residual() {
        let token = sample_rate_to_str(16.6666);
        assert!(token.residual != 0.0);
        // reproducible
        assert_eq!(token.residual, sample_rate_to_str(16.6666).residual);
    }

    #[test]
    fn test_run_strings() {
        assert_eq!(run_to_string(7), "run_007");
        assert_eq!(run_to_string(123), "run_123");
        assert_eq!(string_to_run("run_007"), Some(7));
        assert_eq!(string_to_run("7"), Some(7));
        assert_eq!(string_to_run("meas_2019"), Some(2019));
        assert_eq!(string_to_run("filters"), None);
        assert_eq!(string_to_run("run_"), None);
    }

    #[test]
    fn test_channel_filename() {
        let name = channel_filename(84, "ADU-08e", 2, 1, "Ex", 256.0, ".atss").unwrap();
        assert_eq!(name, "084_ADU-08e_C002_R001_TEx_256Hz.atss");
        // deterministic
        let again = channel_filename(84, "ADU-08e", 2, 1, "Ex", 256.0, ".atss").unwrap();
        assert_eq!(name, again);
    }

    #[test]
    fn test_channel_filename_strips_separators() {
        let name = channel_filename(1, "ADU 08 e", 0, 0, "E_x", 2.0, "").unwrap();
        assert_eq!(name, "001_ADU08e_C000_R000_TEx_2Hz");
    }

    #[test]
    fn test_channel_filename_rejects_null_rate() {
        assert!(channel_filename(1, "ADU-08e", 0, 0, "Ex", 0.0, "").is_err());
    }

    #[test]
    fn test_parse_channel_filename() {
        let id = parse_channel_filename("084_ADU-08e_C002_R001_TEx_256Hz").unwrap();
        assert_eq!(id.serial, 84);
        assert_eq!(id.system, "ADU-08e");
        assert_eq!(id.channel_no, 2);
        assert_eq!(id.run, 1);
        assert_eq!(id.channel_type, "Ex");
        assert_eq!(id.sample_rate, 256.0);

        let period = parse_channel_filename("999_ADU-07e_C000_R012_THx_4s").unwrap();
        assert_eq!(period.sample_rate, 0.25);

        assert!(parse_channel_filename("084_ADU-08e_C002_TEx_256Hz").is_none());
        assert!(parse_channel_filename("garbage").is_none());
    }

    #[test]
    fn test_simplify() {
        assert_eq!(simplify("  ADU  08e ", false), "ADU 08e");
        assert_eq!(simplify("ADU_08 e", true), "ADU08e");
    }
}
