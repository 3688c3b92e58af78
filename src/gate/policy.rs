//! Safety policy for candidate commands.
//!
//! Every command is checked against an ordered list of [`PolicyRule`]s before
//! it can reach a socket. Rules run in [`RULE_ORDER`] and the first rejecting
//! rule decides the verdict, so the order is part of the contract:
//!
//! 1. [`PolicyRule::Denylist`]: destructive programs anywhere in the words,
//!    shell separators, expansions and redirections anywhere in the raw
//!    text, and benchmark options that start other programs or write files
//! 2. [`PolicyRule::ProgramAllowlist`]: only the benchmark program and a few
//!    read-only diagnostics may run, named without a path, and diagnostics
//!    may not touch device files
//! 3. [`PolicyRule::TargetResource`]: the benchmark must name exactly the
//!    configured target
//! 4. [`PolicyRule::DurationBound`]: `--runtime` needs a value within the cap
//! 5. [`PolicyRule::TimeBasedPairing`]: `--time_based` needs `--runtime`
//!
//! Rules 3 to 5 only look at benchmark invocations. Validation is pure and is
//! recomputed on every call; a rejection is an ordinary [`Verdict`], not an
//! error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::command::Command;

/// Default benchmark target.
pub const DEFAULT_TARGET_DEVICE: &str = "/dev/nvme0n1";

/// Default cap on `--runtime`, in seconds.
pub const DEFAULT_MAX_RUNTIME_SECS: u64 = 10;

/// Default benchmark program.
pub const DEFAULT_BENCHMARK_PROGRAM: &str = "fio";

const TARGET_FLAG: &str = "--filename";
const RUNTIME_FLAG: &str = "--runtime";
const TIME_BASED_FLAG: &str = "--time_based";

/// Programs that are never run, wherever they appear in the words.
const DENIED_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "shred", "dd", "mkfs", "mkfs.ext4", "mkfs.xfs", "mkfs.btrfs", "mke2fs",
    "wipefs", "fdisk", "parted", "sgdisk", "blkdiscard", "mkswap", "shutdown", "reboot",
    "poweroff", "halt", "init", "apt", "apt-get", "dpkg", "snap", "pip", "curl", "wget", "ssh",
    "scp", "sftp", "nc", "chmod", "chown", "mkdir", "mv", "sudo", "su", "kill", "killall",
];

/// Raw substrings that indicate chaining, substitution or redirection.
///
/// A lone `&` backgrounds a command and a line break starts a new one, so
/// both separate commands as surely as `;`.
const DENIED_SUBSTRINGS: &[&str] = &[
    ";", "&&", "||", "&", "|", "\n", "\r", "`", "$(", "${", ">", "<", "of=/dev/",
];

/// Benchmark options that run other programs, load code or write files
/// outside the result bundle. `(option, value prefix)`.
const DENIED_FLAGS: &[(&str, Option<&str>)] = &[
    ("exec_prerun", None),
    ("exec_postrun", None),
    ("ioengine", Some("exec")),
    ("ioengine", Some("external")),
    ("program", None),
    ("trigger-cmd", None),
    ("trigger-remote", None),
    ("server", None),
    ("client", None),
    ("output", None),
    ("write_iolog", None),
    ("write_bw_log", None),
    ("write_lat_log", None),
    ("write_iops_log", None),
    ("write_hist_log", None),
];

/// Read-only diagnostics allowed alongside the benchmark.
const DIAGNOSTIC_PROGRAMS: &[&str] = &[
    "ls", "cat", "df", "free", "top", "iostat", "vmstat", "echo", "lsblk", "uptime",
];

/// One entry of the denylist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DenyEntry {
    /// Matches the program name, its basename, or any argument word exactly.
    Program(String),
    /// Matches anywhere in the raw command text.
    Substring(String),
    /// Matches an option argument (`-name`, `--name`, `--name=value`, or an
    /// unambiguous abbreviation of `name`), optionally only when its value
    /// starts with `value`. Case-insensitive.
    Flag { name: String, value: Option<String> },
}

impl DenyEntry {
    fn matches(&self, command: &Command) -> bool {
        match self {
            DenyEntry::Program(name) => {
                let name = name.as_str();
                command.program_name() == name
                    || command.tokens().iter().any(|word| {
                        word == name || word.rsplit('/').next().is_some_and(|base| base == name)
                    })
            }
            DenyEntry::Substring(needle) => command.as_str().contains(needle.as_str()),
            DenyEntry::Flag { name, value } => command
                .args()
                .iter()
                .any(|arg| flag_matches(arg, name, value.as_deref())),
        }
    }
}

/// Option parsing accepts one or two dashes and any unambiguous prefix of a
/// long option name, so `-exec_pre=x` reaches `--exec_prerun`.
fn flag_matches(arg: &str, name: &str, value: Option<&str>) -> bool {
    if !arg.starts_with('-') {
        return false;
    }
    let body = arg.trim_start_matches('-').to_ascii_lowercase();
    let (flag, given) = match body.split_once('=') {
        Some((flag, given)) => (flag, Some(given)),
        None => (body.as_str(), None),
    };
    if flag.is_empty() || !name.starts_with(flag) {
        return false;
    }
    match value {
        None => true,
        Some(prefix) => given.is_some_and(|given| given.starts_with(prefix)),
    }
}

impl fmt::Display for DenyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyEntry::Program(name) => write!(f, "program '{}'", name),
            DenyEntry::Substring(needle) => write!(f, "'{}'", needle.escape_debug()),
            DenyEntry::Flag { name, value: None } => write!(f, "option '--{}'", name),
            DenyEntry::Flag {
                name,
                value: Some(value),
            } => write!(f, "option '--{}={}'", name, value),
        }
    }
}

/// Immutable policy parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub denylist: Vec<DenyEntry>,
    pub diagnostic_programs: Vec<String>,
    pub benchmark_program: String,
    pub target_device: String,
    pub max_runtime: Duration,
}

impl PolicyConfig {
    /// Default policy for the given target and runtime cap.
    pub fn new(target_device: impl Into<String>, max_runtime: Duration) -> Self {
        Self {
            denylist: DENIED_PROGRAMS
                .iter()
                .map(|p| DenyEntry::Program((*p).to_string()))
                .chain(
                    DENIED_SUBSTRINGS
                        .iter()
                        .map(|s| DenyEntry::Substring((*s).to_string())),
                )
                .chain(DENIED_FLAGS.iter().map(|(name, value)| DenyEntry::Flag {
                    name: (*name).to_string(),
                    value: value.map(str::to_string),
                }))
                .collect(),
            diagnostic_programs: DIAGNOSTIC_PROGRAMS.iter().map(|p| p.to_string()).collect(),
            benchmark_program: DEFAULT_BENCHMARK_PROGRAM.to_string(),
            target_device: target_device.into(),
            max_runtime,
        }
    }

    /// Append extra denied program names.
    pub fn with_denied_programs<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denylist
            .extend(programs.into_iter().map(|p| DenyEntry::Program(p.into())));
        self
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_TARGET_DEVICE,
            Duration::from_secs(DEFAULT_MAX_RUNTIME_SECS),
        )
    }
}

/// The kinds of rule, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    Denylist,
    ProgramAllowlist,
    TargetResource,
    DurationBound,
    TimeBasedPairing,
}

/// Evaluation order. First rejection wins.
pub const RULE_ORDER: [PolicyRule; 5] = [
    PolicyRule::Denylist,
    PolicyRule::ProgramAllowlist,
    PolicyRule::TargetResource,
    PolicyRule::DurationBound,
    PolicyRule::TimeBasedPairing,
];

impl PolicyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyRule::Denylist => "denylist",
            PolicyRule::ProgramAllowlist => "program_allowlist",
            PolicyRule::TargetResource => "target_resource",
            PolicyRule::DurationBound => "duration_bound",
            PolicyRule::TimeBasedPairing => "time_based_pairing",
        }
    }

    /// Evaluate this single rule. `None` means the rule has no objection.
    pub fn check(&self, command: &Command, policy: &PolicyConfig) -> Option<String> {
        match self {
            PolicyRule::Denylist => check_denylist(command, policy),
            PolicyRule::ProgramAllowlist => check_allowlist(command, policy),
            _ if !is_benchmark(command, policy) => None,
            PolicyRule::TargetResource => check_target(command, policy),
            PolicyRule::DurationBound => check_duration(command, policy),
            PolicyRule::TimeBasedPairing => check_time_based(command),
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject { rule: PolicyRule, reason: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Classify `command` under `policy`.
pub fn validate(command: &Command, policy: &PolicyConfig) -> Verdict {
    for rule in RULE_ORDER {
        if let Some(reason) = rule.check(command, policy) {
            return Verdict::Reject { rule, reason };
        }
    }
    Verdict::Allow
}

fn is_benchmark(command: &Command, policy: &PolicyConfig) -> bool {
    command.program() == policy.benchmark_program
}

fn check_denylist(command: &Command, policy: &PolicyConfig) -> Option<String> {
    // Option entries describe the benchmark's options; diagnostics have
    // their own short flags (`lsblk -o`, `iostat -c`).
    let benchmark = is_benchmark(command, policy);
    policy
        .denylist
        .iter()
        .filter(|entry| benchmark || !matches!(entry, DenyEntry::Flag { .. }))
        .find(|entry| entry.matches(command))
        .map(|entry| format!("command contains denied {}", entry))
}

fn check_allowlist(command: &Command, policy: &PolicyConfig) -> Option<String> {
    let program = command.program();
    if program.contains('/') {
        return Some(format!("program '{}' must be named without a path", program));
    }

    if program == policy.benchmark_program {
        return None;
    }
    if !policy.diagnostic_programs.iter().any(|p| p == program) {
        return Some(format!(
            "program '{}' is not permitted; allowed: {}, {}",
            program,
            policy.benchmark_program,
            policy.diagnostic_programs.join(", ")
        ));
    }

    command
        .args()
        .iter()
        .find(|arg| is_device_path(arg))
        .map(|arg| format!("{} may not read device files; found '{}'", program, arg))
}

/// A path into `/dev`, absolute or relative.
fn is_device_path(arg: &str) -> bool {
    arg.contains("/dev/") || arg.starts_with("dev/")
}

fn check_target(command: &Command, policy: &PolicyConfig) -> Option<String> {
    if let Some(word) = command.bare_words().first() {
        return Some(format!(
            "{} options must be written as --option=value; found '{}'",
            policy.benchmark_program, word
        ));
    }

    let targets = command.flag_values(TARGET_FLAG);
    if targets.is_empty() {
        return Some(format!(
            "{} must target {} via {}",
            policy.benchmark_program, policy.target_device, TARGET_FLAG
        ));
    }
    targets
        .into_iter()
        .find(|target| *target != policy.target_device)
        .map(|target| {
            format!(
                "target '{}' is not the permitted resource {}",
                target, policy.target_device
            )
        })
}

fn check_duration(command: &Command, policy: &PolicyConfig) -> Option<String> {
    for value in command.flag_values(RUNTIME_FLAG) {
        if value.is_empty() {
            return Some(format!("{} requires an explicit duration", RUNTIME_FLAG));
        }
        let Some(runtime) = parse_runtime(value) else {
            return Some(format!("{} value '{}' is not a duration", RUNTIME_FLAG, value));
        };
        if runtime > policy.max_runtime {
            return Some(format!(
                "{}={} exceeds the maximum of {}s",
                RUNTIME_FLAG,
                value,
                policy.max_runtime.as_secs()
            ));
        }
    }
    None
}

fn check_time_based(command: &Command) -> Option<String> {
    (command.has_flag(TIME_BASED_FLAG) && !command.has_flag(RUNTIME_FLAG)).then(|| {
        format!(
            "{} requires {} so the run is bounded",
            TIME_BASED_FLAG, RUNTIME_FLAG
        )
    })
}

/// Parse an fio duration: plain seconds or an `s`, `m` or `h` suffix.
pub(crate) fn parse_runtime(value: &str) -> Option<Duration> {
    let (digits, multiplier) = match value.as_bytes().last()? {
        b's' => (&value[..value.len() - 1], 1),
        b'm' => (&value[..value.len() - 1], 60),
        b'h' => (&value[..value.len() - 1], 3600),
        _ => (value, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    amount.checked_mul(multiplier).map(Duration::from_secs)
}
