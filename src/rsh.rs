//! `.rsh` trial headers written by the VSFP imaging rig.
//!
//! A header is a run of `key=value` lines followed by a `Data-File-List`
//! line; every line after it names a data file of the trial. The first of
//! those is the `.rsm` monitor bitmap, the rest are `.rsd` chunks in order.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{require_file, ConvertError, Result};

const KEY_ACQUISITION_DATE: &str = "acquisition_date";
const KEY_SAMPLE_TIME: &str = "sample_time";
const KEY_PAGE_FRAMES: &str = "page_frames";
const FILE_LIST_SENTINEL: &str = "Data-File-List";

/// Format of `acquisition_date`
pub const ACQUISITION_DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Parsed trial header.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialMeta {
    /// Acquisition timestamp as written, `YYYY/MM/DD HH:MM:SS`
    pub acquisition_date: String,
    /// Frames per second, `1 / (sample_time_ms / 1000)`
    pub sample_rate: f64,
    /// Frames in the trial
    pub n_frames: usize,
    /// Monitor bitmap (first listed file)
    pub monitor_file: Option<String>,
    /// Raw data files, monitor excluded, in listed order
    pub raw_files: Vec<String>,
}

impl TrialMeta {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        require_file(path)?;
        let text = fs::read_to_string(path)?;
        Self::parse_with_context(&text, &path.display().to_string())
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_context(text, "trial header")
    }

    fn parse_with_context(text: &str, context: &str) -> Result<Self> {
        let mut acquisition_date = None;
        let mut sample_rate = None;
        let mut n_frames = None;
        let mut listed = Vec::new();
        let mut in_file_list = false;

        for line in text.lines() {
            if in_file_list {
                let name = line.trim();
                if !name.is_empty() {
                    listed.push(name.to_string());
                }
                continue;
            }

            if let Some(value) = value_after(line, KEY_ACQUISITION_DATE) {
                acquisition_date = Some(value.to_string());
            }
            if let Some(value) = value_after(line, KEY_SAMPLE_TIME) {
                let ms_text = value.trim_end_matches("msec").trim();
                let ms: f64 = ms_text.parse().map_err(|_| {
                    ConvertError::parse(context, format!("invalid sample_time '{}'", value))
                })?;
                if ms <= 0.0 {
                    return Err(ConvertError::parse(
                        context,
                        format!("sample_time must be positive, got {} msec", ms),
                    ));
                }
                sample_rate = Some(1.0 / (ms / 1000.0));
            }
            if let Some(value) = value_after(line, KEY_PAGE_FRAMES) {
                n_frames = Some(value.parse::<usize>().map_err(|_| {
                    ConvertError::parse(context, format!("invalid page_frames '{}'", value))
                })?);
            }
            if line.contains(FILE_LIST_SENTINEL) {
                in_file_list = true;
            }
        }

        let missing = |key: &str| ConvertError::parse(context, format!("missing required key '{}'", key));
        let acquisition_date = acquisition_date.ok_or_else(|| missing(KEY_ACQUISITION_DATE))?;
        let sample_rate = sample_rate.ok_or_else(|| missing(KEY_SAMPLE_TIME))?;
        let n_frames = n_frames.ok_or_else(|| missing(KEY_PAGE_FRAMES))?;

        let mut listed = listed.into_iter();
        let monitor_file = listed.next();
        let raw_files = listed.collect();

        Ok(TrialMeta {
            acquisition_date,
            sample_rate,
            n_frames,
            monitor_file,
            raw_files,
        })
    }

    /// Acquisition date as a timestamp.
    pub fn session_start(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.acquisition_date, ACQUISITION_DATE_FORMAT).map_err(|e| {
            ConvertError::parse(
                "acquisition_date",
                format!("'{}' is not {}: {}", self.acquisition_date, ACQUISITION_DATE_FORMAT, e),
            )
        })
    }

    /// Raw file list, failing when the header had no file list at all.
    pub fn raw_files_or_err(&self) -> Result<&[String]> {
        if self.raw_files.is_empty() {
            return Err(ConvertError::parse(
                "trial header",
                format!("no raw data files listed after '{}'", FILE_LIST_SENTINEL),
            ));
        }
        Ok(&self.raw_files)
    }

    /// Trial length in seconds
    pub fn duration(&self) -> f64 {
        self.n_frames as f64 / self.sample_rate
    }
}

/// Path of the header for one trial and channel, e.g. `VSFP_01A0801-100_A.rsh`.
pub fn trial_header_path(dir: &Path, prefix: &str, trial: &str, channel: char) -> PathBuf {
    dir.join(format!("{}{}_{}.rsh", prefix, trial, channel))
}

// Value of `key=value` (or `key: value`) when the line carries `key`
fn value_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let idx = line.find(key)?;
    let rest = &line[idx + key.len()..];
    Some(rest.trim_start_matches(|c: char| c == '=' || c == ':' || c.is_whitespace()).trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(files: &[&str]) -> String {
        let mut text = String::from(
            "acquisition_date=2019/08/01 14:03:22\n\
             sample_time=5msec\n\
             page_frames=256\n\
             Data-File-List\n",
        );
        for f in files {
            text.push_str(f);
            text.push('\n');
        }
        text
    }

    #[test]
    fn drops_monitor_and_keeps_order() {
        let meta = TrialMeta::parse(&header(&["t.rsm", "t_A.rsd", "t(0)_A.rsd", "t(1)_A.rsd"])).unwrap();
        assert_eq!(meta.monitor_file.as_deref(), Some("t.rsm"));
        assert_eq!(meta.raw_files, vec!["t_A.rsd", "t(0)_A.rsd", "t(1)_A.rsd"]);
        assert_eq!(meta.n_frames, 256);
        assert_eq!(meta.acquisition_date, "2019/08/01 14:03:22");
    }

    #[test]
    fn sample_rate_from_sample_time() {
        let meta = TrialMeta::parse(&header(&["m.rsm"])).unwrap();
        assert!((meta.sample_rate - 200.0).abs() < 1e-9);
        assert!((meta.duration() - 1.28).abs() < 1e-9);

        let text = header(&[]).replace("5msec", "2.5 msec");
        assert!((TrialMeta::parse(&text).unwrap().sample_rate - 400.0).abs() < 1e-9);
    }

    #[test]
    fn session_start_parses_acquisition_date() {
        let meta = TrialMeta::parse(&header(&[])).unwrap();
        let t = meta.session_start().unwrap();
        assert_eq!(t.to_string(), "2019-08-01 14:03:22");
    }

    #[test]
    fn missing_sentinel_leaves_file_list_empty() {
        let text = "acquisition_date=2019/08/01 14:03:22\nsample_time=5msec\npage_frames=2\nfoo.rsd\n";
        let meta = TrialMeta::parse(text).unwrap();
        assert!(meta.monitor_file.is_none());
        assert!(meta.raw_files.is_empty());
        assert!(meta.raw_files_or_err().is_err());
    }

    #[test]
    fn missing_key_fails_eagerly() {
        let text = "acquisition_date=2019/08/01 14:03:22\npage_frames=2\nData-File-List\nm.rsm\n";
        match TrialMeta::parse(text) {
            Err(ConvertError::Parse { message, .. }) => assert!(message.contains("sample_time")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn header_path_follows_naming_convention() {
        let p = trial_header_path(Path::new("/data"), "VSFP_01A0801-", "100", 'B');
        assert_eq!(p, PathBuf::from("/data/VSFP_01A0801-100_B.rsh"));
    }
}
