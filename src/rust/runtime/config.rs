// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::{
    fmt,
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Scheduler options. These apply to both the stackful and the stackless scheduler.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    // Stack size for tasks started with a zero stack size.
    pub const STACK_SIZE: &str = "stack_size";
    // Number of released stacks kept for reuse.
    pub const STACK_CACHE: &str = "stack_cache";
    // What the run loop does when the poller fails.
    pub const POLL_ERROR_POLICY: &str = "poll_error_policy";
    // Consecutive poller failures tolerated under the retry policy.
    pub const POLL_ERROR_RETRIES: &str = "poll_error_retries";
}

// Poller options.
mod poller_config {
    pub const SECTION_NAME: &str = "poller";
    pub const CAPACITY: &str = "capacity";
    pub const EDGE_TRIGGERED: &str = "edge_triggered";
}

// Worker pool options.
mod workers_config {
    pub const SECTION_NAME: &str = "workers";
    pub const COUNT: &str = "count";
}

/// Configuration used when no file is supplied.
const DEFAULT_CONFIG: &str = "
scheduler:
  stack_size: 262144
  stack_cache: 16
  poll_error_policy: retry
  poll_error_retries: 3
poller:
  capacity: 1024
  edge_triggered: true
workers:
  count: 4
";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scheduler configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// What a run loop does when waiting on the poller fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollErrorPolicy {
    /// Log and try the iteration again, up to the configured number of consecutive failures.
    Retry,
    /// Log and terminate the loop with the failure.
    Abort,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        config_s.parse()
    }

    fn get_scheduler_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, scheduler_config::SECTION_NAME)
    }

    fn get_poller_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, poller_config::SECTION_NAME)
    }

    fn get_workers_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, workers_config::SECTION_NAME)
    }

    /// Scheduler config: Reads the default stack size from the environment variable first and then the underlying
    /// configuration file. Values below [limits::MIN_STACK_SIZE] are rejected.
    pub fn stack_size(&self) -> Result<usize, Fail> {
        let stack_size: usize = if let Some(size) = Self::get_typed_env_option(scheduler_config::STACK_SIZE)? {
            size
        } else {
            match self.get_scheduler_config() {
                Ok(section) => Self::get_int_option(section, scheduler_config::STACK_SIZE)
                    .or_else(|e| Self::fallback(e, scheduler_config::STACK_SIZE, limits::DEFAULT_STACK_SIZE))?,
                Err(e) => Self::fallback(e, scheduler_config::SECTION_NAME, limits::DEFAULT_STACK_SIZE)?,
            }
        };

        if stack_size < limits::MIN_STACK_SIZE {
            let cause: String = format!("stack size too small (stack_size={})", stack_size);
            error!("stack_size(): {}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        }
        Ok(stack_size)
    }

    /// Scheduler config: Reads how many released stacks are kept for reuse. Zero disables the cache.
    pub fn stack_cache(&self) -> Result<usize, Fail> {
        if let Some(count) = Self::get_typed_env_option(scheduler_config::STACK_CACHE)? {
            return Ok(count);
        }
        match self.get_scheduler_config() {
            Ok(section) => Self::get_int_option(section, scheduler_config::STACK_CACHE)
                .or_else(|e| Self::fallback(e, scheduler_config::STACK_CACHE, limits::DEFAULT_STACK_CACHE)),
            Err(e) => Self::fallback(e, scheduler_config::SECTION_NAME, limits::DEFAULT_STACK_CACHE),
        }
    }

    /// Scheduler config: Reads the policy applied when the poller fails.
    pub fn poll_error_policy(&self) -> Result<PollErrorPolicy, Fail> {
        if let Some(policy) = Self::get_typed_env_option(scheduler_config::POLL_ERROR_POLICY)? {
            return Ok(policy);
        }
        match self.get_scheduler_config() {
            Ok(section) => Self::get_typed_str_option(section, scheduler_config::POLL_ERROR_POLICY, |val: &str| {
                val.parse().ok()
            })
            .or_else(|e| Self::fallback(e, scheduler_config::POLL_ERROR_POLICY, PollErrorPolicy::Retry)),
            Err(e) => Self::fallback(e, scheduler_config::SECTION_NAME, PollErrorPolicy::Retry),
        }
    }

    /// Scheduler config: Reads the number of consecutive poller failures tolerated under [PollErrorPolicy::Retry].
    pub fn poll_error_retries(&self) -> Result<usize, Fail> {
        if let Some(retries) = Self::get_typed_env_option(scheduler_config::POLL_ERROR_RETRIES)? {
            return Ok(retries);
        }
        match self.get_scheduler_config() {
            Ok(section) => Self::get_int_option(section, scheduler_config::POLL_ERROR_RETRIES).or_else(|e| {
                Self::fallback(e, scheduler_config::POLL_ERROR_RETRIES, limits::DEFAULT_POLL_ERROR_RETRIES)
            }),
            Err(e) => Self::fallback(e, scheduler_config::SECTION_NAME, limits::DEFAULT_POLL_ERROR_RETRIES),
        }
    }

    /// Poller config: Reads the maximum number of events collected by a single wait.
    pub fn poller_capacity(&self) -> Result<usize, Fail> {
        let capacity: usize = if let Some(capacity) = Self::get_typed_env_option(poller_config::CAPACITY)? {
            capacity
        } else {
            match self.get_poller_config() {
                Ok(section) => Self::get_int_option(section, poller_config::CAPACITY)
                    .or_else(|e| Self::fallback(e, poller_config::CAPACITY, limits::DEFAULT_POLLER_CAPACITY))?,
                Err(e) => Self::fallback(e, poller_config::SECTION_NAME, limits::DEFAULT_POLLER_CAPACITY)?,
            }
        };

        if capacity == 0 {
            let cause: &str = "poller capacity must be positive";
            error!("poller_capacity(): {}", cause);
            return Err(Fail::new(libc::ERANGE, cause));
        }
        Ok(capacity)
    }

    /// Poller config: Reads whether objects stay registered in edge-triggered mode (true) or are re-armed after every
    /// event (false).
    pub fn edge_triggered(&self) -> Result<bool, Fail> {
        if let Some(edge) = Self::get_typed_env_option(poller_config::EDGE_TRIGGERED)? {
            return Ok(edge);
        }
        match self.get_poller_config() {
            Ok(section) => Self::get_bool_option(section, poller_config::EDGE_TRIGGERED)
                .or_else(|e| Self::fallback(e, poller_config::EDGE_TRIGGERED, true)),
            Err(e) => Self::fallback(e, poller_config::SECTION_NAME, true),
        }
    }

    /// Workers config: Reads the default number of threads in a worker pool.
    pub fn worker_count(&self) -> Result<usize, Fail> {
        let count: usize = if let Some(count) = Self::get_typed_env_option(workers_config::COUNT)? {
            count
        } else {
            match self.get_workers_config() {
                Ok(section) => Self::get_int_option(section, workers_config::COUNT)
                    .or_else(|e| Self::fallback(e, workers_config::COUNT, limits::DEFAULT_WORKER_COUNT))?,
                Err(e) => Self::fallback(e, workers_config::SECTION_NAME, limits::DEFAULT_WORKER_COUNT)?,
            }
        };

        if count == 0 {
            let cause: &str = "worker count must be positive";
            error!("worker_count(): {}", cause);
            return Err(Fail::new(libc::ERANGE, cause));
        }
        Ok(count)
    }

    //======================================================================================================================
    // Static Functions
    //======================================================================================================================

    /// Falls back to `default` when `index` is missing from the configuration. Type and range errors are kept.
    fn fallback<T: fmt::Debug>(e: Fail, index: &str, default: T) -> Result<T, Fail> {
        if e.errno == libc::ENOENT {
            warn!("fallback(): using default for \"{}\" ({:?})", index, default);
            Ok(default)
        } else {
            Err(e)
        }
    }

    /// Similar to `require_typed_option` using `Yaml::as_hash` receiver. This method returns a `&Yaml` instead of
    /// yaml::Hash, and Yaml is more natural for indexing.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::ENOENT, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        let option: &Yaml = Self::get_option(yaml, index)?;
        if let Some(value) = option.as_str() {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        Err(Fail::new(libc::EINVAL, message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        // Check for the environment variable.
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `require_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Same as `Self::require_typed_option` using `Yaml::as_bool` as the receiver.
    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        Self::get_typed_option(yaml, index, &Yaml::as_bool)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Config {
    type Err = Fail;

    /// Parses a configuration document. Exactly one YAML document is expected.
    fn from_str(config_s: &str) -> Result<Self, Self::Err> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("failed to parse configuration: {}", e);
                error!("from_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            [c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }
}

impl Default for Config {
    fn default() -> Self {
        // An empty document still yields the built-in defaults option by option.
        DEFAULT_CONFIG.parse().unwrap_or_else(|_| Self(Yaml::Hash(Default::default())))
    }
}

impl FromStr for PollErrorPolicy {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(PollErrorPolicy::Retry),
            "abort" => Ok(PollErrorPolicy::Abort),
            _ => Err(Fail::new(libc::EINVAL, "unknown poll error policy")),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
