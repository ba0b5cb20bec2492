//! Resolution of command-line settings into a validated run configuration.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use clap::ValueEnum;

use crate::error::ConfigError;
use crate::flow::FlowInfo;

/// What the input file holds, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// pcap/pcapng trace to list or convert.
    Capture,
    /// Existing replay artifact, re-emitted as JSON lines.
    Replay,
}

impl InputKind {
    pub fn detect(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension {
            "pcap" | "pcapng" | "cap" => Ok(InputKind::Capture),
            "rdpreplay" => Ok(InputKind::Replay),
            other => Err(ConfigError::UnsupportedInput {
                extension: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Binary replay artifact
    #[default]
    Replay,
    /// One JSON object per event
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Replay => "rdpreplay",
            OutputFormat::Json => "jsonl",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub input_kind: InputKind,
    pub list: bool,
    pub secrets: Option<PathBuf>,
    pub format: OutputFormat,
    /// Only convert flows initiated from one of these addresses.
    pub src: Vec<IpAddr>,
    /// Only convert flows destined to one of these addresses.
    pub dst: Vec<IpAddr>,
    /// Prepended to every generated file name.
    pub prefix: String,
}

impl Config {
    pub fn new(input: PathBuf, output: Option<&Path>) -> Result<Self, ConfigError> {
        let input_kind = InputKind::detect(&input)?;
        let prefix = resolve_prefix(output)?;
        Ok(Config {
            input,
            input_kind,
            list: false,
            secrets: None,
            format: OutputFormat::default(),
            src: Vec::new(),
            dst: Vec::new(),
            prefix,
        })
    }

    pub fn list(mut self, list: bool) -> Self {
        self.list = list;
        self
    }

    pub fn secrets(mut self, secrets: Option<PathBuf>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn filters(mut self, src: Vec<IpAddr>, dst: Vec<IpAddr>) -> Self {
        self.src = src;
        self.dst = dst;
        self
    }

    /// Whether a flow passes the `--src` / `--dst` filters.
    pub fn accepts(&self, info: &FlowInfo) -> bool {
        (self.src.is_empty() || self.src.contains(&info.src))
            && (self.dst.is_empty() || self.dst.contains(&info.dst))
    }

    /// `{prefix}{YYYYmmddHHMMSS}_{src}-{dst}.{ext}`, UTC from the flow start.
    pub fn output_path(&self, info: &FlowInfo) -> PathBuf {
        PathBuf::from(format!(
            "{}{}_{}-{}.{}",
            self.prefix,
            file_timestamp(info.start),
            info.src,
            info.dst,
            self.format.extension()
        ))
    }
}

fn file_timestamp(t: SystemTime) -> String {
    let t: DateTime<Utc> = t.into();
    t.format("%Y%m%d%H%M%S").to_string()
}

/// No output: current directory. A directory: files go inside it. Anything
/// else is a file name whose stem prefixes every generated file.
pub fn resolve_prefix(output: Option<&Path>) -> Result<String, ConfigError> {
    let Some(output) = output else {
        return Ok(String::new());
    };
    let invalid = || ConfigError::InvalidOutput {
        path: output.display().to_string(),
    };
    let text = output.to_str().ok_or_else(invalid)?;

    if output.is_dir() {
        return Ok(if text.ends_with(std::path::MAIN_SEPARATOR) {
            text.to_string()
        } else {
            format!("{}{}", text, std::path::MAIN_SEPARATOR)
        });
    }

    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(invalid)?;
    match output.parent().filter(|p| !p.as_os_str().is_empty()) {
        None => Ok(format!("{}-", stem)),
        Some(parent) if parent.is_dir() => {
            let parent = parent.to_str().ok_or_else(invalid)?;
            Ok(format!("{}{}{}-", parent, std::path::MAIN_SEPARATOR, stem))
        }
        Some(_) => Err(invalid()),
    }
}
