//! Build options and the host labels they require.
//!
//! A matrix configuration is a list of build options such as `gcc-7`,
//! `no-mpi`, `simd=avx_256`, or `build-jobs=4`. Options that need specific
//! features from the build host map to a label that the host must provide
//! (see [`crate::agents`]).

use gantry_core::{Error, Result};
use regex::Regex;
use std::collections::BTreeSet;

/// SIMD instruction sets; values match the names the build scripts expect.
pub const SIMD_VALUES: &[&str] = &[
    "None",
    "Reference",
    "MIC",
    "SSE2",
    "SSE4.1",
    "AVX_128_FMA",
    "AVX_256",
    "AVX2_256",
    "ARM_NEON",
    "ARM_NEON_ASIMD",
];

/// GPU hardware, by vendor.
pub const GPUHW_VALUES: &[&str] = &["None", "amd", "intel", "nvidia"];

/// Parsed value of a single option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Flag(bool),
    Int(i64),
    Text(String),
}

/// How an option is spelled in a configuration line.
#[derive(Debug, Clone)]
pub enum OptionKind {
    /// `name`
    Simple,
    /// `[no-]name[=on/off]`
    Bool,
    /// `name=VALUE`
    String,
    /// `name=N`
    Int,
    /// `name=VALUE` with VALUE one of the given values (case-insensitive).
    Enum(&'static [&'static str]),
    /// `name-X[.Y]*`
    Version(Regex),
}

/// Host label required by an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelRule {
    None,
    /// The option string itself is the label (e.g. `gcc-7`).
    SameAsOption,
    /// Lowercased value, unless it is one of the given "no hardware" values.
    LowercaseValueExcept(&'static [&'static str]),
}

#[derive(Debug, Clone)]
pub struct OptionHandler {
    pub name: &'static str,
    kind: OptionKind,
    label: LabelRule,
    pub allow_multiple: bool,
}

impl OptionHandler {
    fn new(name: &'static str, kind: OptionKind, label: LabelRule) -> Self {
        Self {
            name,
            kind,
            label,
            allow_multiple: false,
        }
    }

    pub fn simple(name: &'static str) -> Self {
        Self::new(name, OptionKind::Simple, LabelRule::None)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, OptionKind::Bool, LabelRule::None)
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, OptionKind::String, LabelRule::None)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, OptionKind::Int, LabelRule::None)
    }

    pub fn enumeration(name: &'static str, values: &'static [&'static str]) -> Self {
        Self::new(name, OptionKind::Enum(values), LabelRule::None)
    }

    pub fn version(name: &'static str) -> Self {
        let pattern = format!(r"^{}-\d+(\.\d+)*$", regex::escape(name));
        let regex = Regex::new(&pattern).expect("escaped option name forms a valid regex");
        Self::new(name, OptionKind::Version(regex), LabelRule::None)
    }

    pub fn with_label(mut self, label: LabelRule) -> Self {
        self.label = label;
        self
    }

    fn value_part<'a>(&self, opt: &'a str) -> Option<&'a str> {
        opt.strip_prefix(self.name)?.strip_prefix('=')
    }

    /// Whether this handler handles `opt`.
    pub fn matches(&self, opt: &str) -> bool {
        match &self.kind {
            OptionKind::Simple => opt == self.name,
            OptionKind::Bool => {
                opt == self.name
                    || opt.strip_prefix("no-") == Some(self.name)
                    || self.value_part(opt).is_some()
            }
            OptionKind::String | OptionKind::Int | OptionKind::Enum(_) => {
                self.value_part(opt).is_some()
            }
            OptionKind::Version(regex) => regex.is_match(opt),
        }
    }

    /// Parse the value of a matching option.
    pub fn parse(&self, opt: &str) -> Result<OptionValue> {
        let invalid = || Error::InvalidOption(opt.to_string());
        match &self.kind {
            OptionKind::Simple => Ok(OptionValue::Flag(true)),
            OptionKind::Bool => {
                if opt == self.name {
                    return Ok(OptionValue::Flag(true));
                }
                if opt.strip_prefix("no-") == Some(self.name) {
                    return Ok(OptionValue::Flag(false));
                }
                match self.value_part(opt).map(str::to_ascii_lowercase).as_deref() {
                    Some("1" | "on" | "true") => Ok(OptionValue::Flag(true)),
                    Some("0" | "off" | "false") => Ok(OptionValue::Flag(false)),
                    _ => Err(invalid()),
                }
            }
            OptionKind::String => self
                .value_part(opt)
                .map(|v| OptionValue::Text(v.to_string()))
                .ok_or_else(invalid),
            OptionKind::Int => self
                .value_part(opt)
                .and_then(|v| v.parse().ok())
                .map(OptionValue::Int)
                .ok_or_else(invalid),
            OptionKind::Enum(values) => {
                let value = self.value_part(opt).ok_or_else(invalid)?;
                values
                    .iter()
                    .find(|allowed| allowed.eq_ignore_ascii_case(value))
                    .map(|allowed| OptionValue::Text(allowed.to_string()))
                    .ok_or_else(|| Error::UnknownValue {
                        kind: self.name,
                        value: value.to_string(),
                    })
            }
            OptionKind::Version(_) => Ok(OptionValue::Text(opt[self.name.len() + 1..].to_string())),
        }
    }

    /// Label a host must have to build with this option.
    pub fn label(&self, opt: &str, value: &OptionValue) -> Option<String> {
        if matches!(self.kind, OptionKind::Bool) && *value != OptionValue::Flag(true) {
            return None;
        }
        match self.label {
            LabelRule::None => None,
            LabelRule::SameAsOption => Some(opt.to_string()),
            LabelRule::LowercaseValueExcept(skip) => match value {
                OptionValue::Text(v) if !skip.contains(&v.as_str()) => Some(v.to_lowercase()),
                _ => None,
            },
        }
    }
}

/// The options recognized in matrix configurations, in processing order.
pub fn default_handlers() -> Vec<OptionHandler> {
    use LabelRule::SameAsOption;

    let mut handlers = vec![
        OptionHandler::int("build-jobs"),
        OptionHandler::simple("out-of-source"),
    ];
    for name in [
        "cmake",
        "gcc",
        "gcov",
        "armclang",
        "clang",
        "libcxx",
        "clang-static-analyzer",
        "msvc",
        "icc",
        "doxygen",
        "sphinx",
        "cuda",
        "amdappsdk",
        "clFFT",
        "armhpc",
    ] {
        handlers.push(OptionHandler::version(name).with_label(SameAsOption));
    }
    handlers.extend([
        OptionHandler::simple("phi").with_label(SameAsOption),
        OptionHandler::simple("tsan").with_label(SameAsOption),
        OptionHandler::simple("atlas"),
        OptionHandler::simple("x11").with_label(SameAsOption),
        OptionHandler::enumeration("simd", SIMD_VALUES)
            .with_label(LabelRule::LowercaseValueExcept(&["None", "Reference"])),
        OptionHandler::enumeration("gpuhw", GPUHW_VALUES)
            .with_label(LabelRule::LowercaseValueExcept(&["None"])),
        OptionHandler::simple("mpi").with_label(SameAsOption),
        OptionHandler::simple("armpl").with_label(SameAsOption),
        OptionHandler::simple("tidy").with_label(SameAsOption),
        OptionHandler::version("opencl").with_label(SameAsOption),
    ]);
    handlers
}

/// Whether an option selects the execution host rather than the build.
pub fn is_host_option(opt: &str) -> bool {
    let lower = opt.to_ascii_lowercase();
    lower.starts_with("host=") || lower.starts_with("label=")
}

/// Remove options that specify the execution host.
pub fn remove_host_options(opts: &[String]) -> Vec<String> {
    opts.iter().filter(|o| !is_host_option(o)).cloned().collect()
}

/// Labels required from a build host for the given options.
///
/// Options that no handler recognizes do not restrict the host.
pub fn required_labels(handlers: &[OptionHandler], opts: &[String]) -> Result<BTreeSet<String>> {
    let mut labels = BTreeSet::new();
    for handler in handlers {
        for opt in opts.iter().filter(|o| handler.matches(o)) {
            let value = handler.parse(opt)?;
            if let Some(label) = handler.label(opt, &value) {
                labels.insert(label);
            }
        }
    }
    Ok(labels)
}

/// Check that options do not conflict and are all known.
///
/// Returns the parsed value for every recognized option, keyed by handler
/// name.
pub fn validate_options(
    handlers: &[OptionHandler],
    opts: &[String],
) -> Result<Vec<(&'static str, OptionValue)>> {
    let mut remaining: Vec<&String> = opts.iter().filter(|o| !is_host_option(o)).collect();
    let mut values = Vec::new();
    for handler in handlers {
        let found: Vec<&String> = remaining
            .iter()
            .copied()
            .filter(|o| handler.matches(o))
            .collect();
        if !handler.allow_multiple && found.len() > 1 {
            let joined: Vec<&str> = found.iter().map(|s| s.as_str()).collect();
            return Err(Error::Configuration(format!(
                "conflicting options found: {}",
                joined.join(" ")
            )));
        }
        for opt in found {
            values.push((handler.name, handler.parse(opt)?));
            remaining.retain(|o| *o != opt);
        }
    }
    if !remaining.is_empty() {
        let joined: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();
        return Err(Error::Configuration(format!(
            "unknown options: {}",
            joined.join(" ")
        )));
    }
    Ok(values)
}
