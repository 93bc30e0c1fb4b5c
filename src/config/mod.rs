//! Node configuration.
//!
//! Everything is read from `CC_*` environment variables (optionally seeded
//! from a dotenv file by the binary) and validated up front. A node with an
//! invalid configuration never joins the cluster.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::cleanup::types::{CleanupKind, CleanupSettings};
use crate::cluster::facade::ClusterSettings;
use crate::media::constraint::{
    Constraint, ConstraintKind, FileNameConstraint, FileSizeConstraint, TimeConstraint,
};
use crate::media::profile::{ProfileMatcherKind, ProfileSettings};
use crate::media::scanner::ScanSettings;
use crate::membership::gossip::GossipSettings;
use crate::membership::types::MemberId;
use crate::transcode::process::TranscoderSettings;
use crate::transcode::types::TranscoderKind;
use crate::workflow::types::WorkflowSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read discovery file {path}: {source}")]
    DiscoveryFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve seed '{host}'")]
    Unresolvable { host: String },
}

/// Longest accepted timeout or interval. Keeps deadline arithmetic in range.
const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

/// `amount` units of `unit_secs` seconds, rejected when it cannot be represented or exceeds [`MAX_INTERVAL`].
fn interval(key: &'static str, amount: f64, unit_secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(amount * unit_secs)
        .ok()
        .filter(|duration| *duration <= MAX_INTERVAL)
        .ok_or_else(|| invalid(key, amount.to_string(), "out of range (at most one year)"))
}

fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.into(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub cluster_name: String,
    pub bind_addr: IpAddr,
    pub bind_port: u16,
    pub initial_hosts: Vec<String>,
    pub discovery_file: Option<PathBuf>,
    pub prefer_ipv4: bool,
    pub hostname: Option<String>,
    pub arbiter: bool,
    pub orphan_timeout: Duration,
    pub scan_interval: Duration,
    pub cancel_timeout: Duration,
    pub discovery_window: Duration,

    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub extensions: Vec<String>,
    pub skip_extension: String,

    pub constraints: Vec<ConstraintKind>,
    pub min_file_size_mib: f64,
    pub max_file_size_mib: f64,
    pub time_begin: String,
    pub time_stop: String,
    pub file_regex: String,

    pub profile_matchers: Vec<ProfileMatcherKind>,
    pub profile_dir: PathBuf,
    pub profile_file_name: String,
    pub profile_extension: String,
    pub profile_default_name: String,

    pub transcoder: TranscoderKind,
    pub transcode_executable: PathBuf,
    pub default_format: String,

    pub cleanup: Vec<CleanupKind>,
    pub overwrite: bool,
    pub mark_source_dir: PathBuf,

    /// 0 disables the REST server.
    pub rest_port: u16,
}

struct Reader<F> {
    lookup: F,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &'static str, default: &str) -> String {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn optional(&self, key: &'static str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: &str) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        let raw = self.string(key, default);
        raw.parse::<T>()
            .map_err(|err| invalid(key, raw.clone(), err.to_string()))
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let raw = self.string(key, if default { "true" } else { "false" });
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid(key, raw, "expected true or false")),
        }
    }

    fn list(&self, key: &'static str, default: &str) -> Vec<String> {
        self.string(key, default)
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Reader { lookup };

        let orphan_hours: f64 = env.parse("CC_TASK_ORPHAN_TIMEOUT", "1")?;
        if !(orphan_hours > 0.0 && orphan_hours.is_finite()) {
            return Err(invalid("CC_TASK_ORPHAN_TIMEOUT", orphan_hours.to_string(), "must be > 0"));
        }
        let orphan_timeout = interval("CC_TASK_ORPHAN_TIMEOUT", orphan_hours, 3600.0)?;

        let scan_minutes: u64 = env.parse("CC_MEDIA_SCAN_INTERVAL", "30")?;
        if scan_minutes < 1 {
            return Err(invalid("CC_MEDIA_SCAN_INTERVAL", scan_minutes.to_string(), "must be >= 1"));
        }
        let scan_interval = interval("CC_MEDIA_SCAN_INTERVAL", scan_minutes as f64, 60.0)?;

        let cancel_secs: f64 = env.parse("CC_CLUSTER_CANCEL_TIMEOUT", "5")?;
        if !(cancel_secs > 0.0 && cancel_secs.is_finite()) {
            return Err(invalid("CC_CLUSTER_CANCEL_TIMEOUT", cancel_secs.to_string(), "must be > 0"));
        }
        let cancel_timeout = interval("CC_CLUSTER_CANCEL_TIMEOUT", cancel_secs, 1.0)?;

        let discovery_secs: f64 = env.parse("CC_CLUSTER_DISCOVERY_WINDOW", "3")?;
        if !(discovery_secs >= 0.0 && discovery_secs.is_finite()) {
            return Err(invalid(
                "CC_CLUSTER_DISCOVERY_WINDOW",
                discovery_secs.to_string(),
                "must be >= 0",
            ));
        }
        let discovery_window = interval("CC_CLUSTER_DISCOVERY_WINDOW", discovery_secs, 1.0)?;

        let bind_port: u16 = env.parse("CC_CLUSTER_BIND_PORT", "7600")?;
        if bind_port == 0 {
            return Err(invalid("CC_CLUSTER_BIND_PORT", "0", "must be in 1..=65535"));
        }

        let raw_constraints = env.string("CC_CONSTRAINTS_ACTIVE", "FILE_SIZE");
        let constraints = ConstraintKind::parse_list(&raw_constraints)
            .map_err(|reason| invalid("CC_CONSTRAINTS_ACTIVE", raw_constraints.clone(), reason))?;

        let raw_matchers = env.string("CC_PROFILE_MATCHERS", "COMPANION DIRECTORY_STRUCTURE DEFAULT");
        let profile_matchers = raw_matchers
            .split_whitespace()
            .map(|m| m.parse::<ProfileMatcherKind>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| invalid("CC_PROFILE_MATCHERS", raw_matchers.clone(), reason))?;
        if profile_matchers.is_empty() {
            return Err(invalid("CC_PROFILE_MATCHERS", "", "at least one matcher required"));
        }

        let raw_cleanup = env.string("CC_CLEANUP_STRATEGY", "STRUCTURED_OUTPUT MARK_SOURCE");
        let cleanup = CleanupKind::parse_list(&raw_cleanup)
            .map_err(|reason| invalid("CC_CLEANUP_STRATEGY", raw_cleanup.clone(), reason))?;

        let cluster_name = env.string("CC_CLUSTER_NAME", "clustercode");

        let config = Self {
            cluster_name,
            bind_addr: env.parse("CC_CLUSTER_BIND_ADDR", "0.0.0.0")?,
            bind_port,
            initial_hosts: env.list("CC_CLUSTER_INITIAL_HOSTS", ""),
            discovery_file: env.optional("CC_CLUSTER_DISCOVERY_FILE").map(PathBuf::from),
            prefer_ipv4: env.flag("CC_CLUSTER_PREFER_IPV4", true)?,
            hostname: env.optional("CC_CLUSTER_HOSTNAME"),
            arbiter: env.flag("CC_ARBITER_NODE", false)?,
            orphan_timeout,
            scan_interval,
            cancel_timeout,
            discovery_window,

            input_dir: PathBuf::from(env.string("CC_MEDIA_INPUT_DIR", "/input")),
            output_dir: PathBuf::from(env.string("CC_MEDIA_OUTPUT_DIR", "/output")),
            temp_dir: PathBuf::from(env.string("CC_TRANSCODE_TEMP_DIR", "/var/tmp/clustercode")),
            extensions: env.list("CC_MEDIA_EXTENSIONS", "mkv,mp4,avi"),
            skip_extension: env.string("CC_MEDIA_SKIP_NAME", ".done"),

            constraints,
            min_file_size_mib: env.parse("CC_CONSTRAINT_FILE_MIN_SIZE", "150")?,
            max_file_size_mib: env.parse("CC_CONSTRAINT_FILE_MAX_SIZE", "0")?,
            time_begin: env.string("CC_CONSTRAINT_TIME_BEGIN", "08:00"),
            time_stop: env.string("CC_CONSTRAINT_TIME_STOP", "16:00"),
            file_regex: env.string("CC_CONSTRAINT_FILE_REGEX", ".*"),

            profile_matchers,
            profile_dir: PathBuf::from(env.string("CC_PROFILE_DIR", "/profiles")),
            profile_file_name: env.string("CC_PROFILE_FILE_NAME", "profile"),
            profile_extension: env.string("CC_PROFILE_FILE_EXTENSION", ".ffmpeg"),
            profile_default_name: env.string("CC_PROFILE_DEFAULT_NAME", "default"),

            transcoder: env.parse("CC_TRANSCODE_TYPE", "FFMPEG")?,
            transcode_executable: PathBuf::from(env.string("CC_TRANSCODE_EXECUTABLE", "ffmpeg")),
            default_format: env.string("CC_TRANSCODE_DEFAULT_FORMAT", ".mkv"),

            cleanup,
            overwrite: env.flag("CC_CLEANUP_OVERWRITE", true)?,
            mark_source_dir: PathBuf::from(env.string("CC_CLEANUP_MARK_SOURCE_DIR", "/input/done")),

            rest_port: env.parse("CC_REST_API_PORT", "7700")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.prefer_ipv4 && self.bind_addr.is_ipv6() {
            return Err(invalid(
                "CC_CLUSTER_BIND_ADDR",
                self.bind_addr.to_string(),
                "IPv6 address while CC_CLUSTER_PREFER_IPV4 is set",
            ));
        }

        if self.extensions.is_empty() {
            return Err(invalid("CC_MEDIA_EXTENSIONS", "", "at least one extension required"));
        }

        if let Some(file) = &self.discovery_file
            && !file.is_file()
        {
            return Err(invalid(
                "CC_CLUSTER_DISCOVERY_FILE",
                file.display().to_string(),
                "file does not exist",
            ));
        }

        // Constructing the constraints runs their own validation.
        self.build_constraints().map(|_| ())
    }

    pub fn member_name(&self) -> MemberId {
        match &self.hostname {
            Some(name) => MemberId::from(name.as_str()),
            None => MemberId::generate(),
        }
    }

    pub fn bind_socket(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.bind_port)
    }

    /// Seeds from `CC_CLUSTER_INITIAL_HOSTS` and the discovery file, resolved.
    pub fn seeds(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        let mut hosts = self.initial_hosts.clone();

        if let Some(path) = &self.discovery_file {
            let content =
                std::fs::read_to_string(path).map_err(|source| ConfigError::DiscoveryFile {
                    path: path.clone(),
                    source,
                })?;
            hosts.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string),
            );
        }

        let mut seeds = Vec::new();
        for host in hosts {
            let resolved = host
                .to_socket_addrs()
                .map_err(|_| ConfigError::Unresolvable { host: host.clone() })?
                .find(|addr| !self.prefer_ipv4 || addr.is_ipv4())
                .ok_or_else(|| ConfigError::Unresolvable { host: host.clone() })?;

            if !seeds.contains(&resolved) {
                seeds.push(resolved);
            }
        }

        Ok(seeds)
    }

    pub fn build_constraints(&self) -> Result<Vec<Box<dyn Constraint>>, ConfigError> {
        let mut constraints: Vec<Box<dyn Constraint>> = Vec::new();

        for kind in &self.constraints {
            match kind {
                ConstraintKind::FileSize => {
                    let constraint = FileSizeConstraint::from_mib(
                        &self.input_dir,
                        self.min_file_size_mib,
                        self.max_file_size_mib,
                    )
                    .map_err(|err| {
                        invalid(
                            "CC_CONSTRAINT_FILE_MIN_SIZE",
                            self.min_file_size_mib.to_string(),
                            err.to_string(),
                        )
                    })?;
                    constraints.push(Box::new(constraint));
                }
                ConstraintKind::Time => {
                    let constraint = TimeConstraint::parse(&self.time_begin, &self.time_stop)
                        .map_err(|err| {
                            invalid(
                                "CC_CONSTRAINT_TIME_BEGIN",
                                format!("{}-{}", self.time_begin, self.time_stop),
                                err.to_string(),
                            )
                        })?;
                    constraints.push(Box::new(constraint));
                }
                ConstraintKind::FileName => {
                    let constraint = FileNameConstraint::new(&self.file_regex).map_err(|err| {
                        invalid("CC_CONSTRAINT_FILE_REGEX", self.file_regex.clone(), err.to_string())
                    })?;
                    constraints.push(Box::new(constraint));
                }
            }
        }

        Ok(constraints)
    }

    pub fn gossip_settings(&self, member_name: MemberId, seeds: Vec<SocketAddr>) -> GossipSettings {
        GossipSettings {
            group: self.cluster_name.clone(),
            member_name,
            bind_addr: self.bind_socket(),
            seeds,
            arbiter: self.arbiter,
            discovery_window: self.discovery_window,
        }
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            cluster_name: self.cluster_name.clone(),
            ..ClusterSettings::default()
        }
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            input_dir: self.input_dir.clone(),
            extensions: self.extensions.clone(),
            skip_extension: self.skip_extension.clone(),
            mark_source_dir: self
                .cleanup
                .contains(&CleanupKind::MarkSourceDir)
                .then(|| self.mark_source_dir.clone()),
        }
    }

    pub fn profile_settings(&self) -> ProfileSettings {
        ProfileSettings {
            input_dir: self.input_dir.clone(),
            profile_dir: self.profile_dir.clone(),
            file_name: self.profile_file_name.clone(),
            extension: self.profile_extension.clone(),
            default_name: self.profile_default_name.clone(),
        }
    }

    pub fn transcoder_settings(&self) -> TranscoderSettings {
        TranscoderSettings {
            kind: self.transcoder,
            executable: self.transcode_executable.clone(),
            input_dir: self.input_dir.clone(),
            temp_dir: self.temp_dir.clone(),
            default_format: self.default_format.clone(),
        }
    }

    pub fn cleanup_settings(&self) -> CleanupSettings {
        CleanupSettings {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            skip_extension: self.skip_extension.clone(),
            mark_source_dir: self.mark_source_dir.clone(),
            overwrite: self.overwrite,
        }
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            arbiter: self.arbiter,
            scan_interval: self.scan_interval,
            ..WorkflowSettings::default()
        }
    }

    /// The REST listener address, `None` when disabled.
    pub fn rest_addr(&self) -> Option<SocketAddr> {
        (self.rest_port != 0).then(|| SocketAddr::new(self.bind_addr, self.rest_port))
    }
}
