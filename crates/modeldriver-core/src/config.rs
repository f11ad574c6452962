use crate::error::DriverError;
use crate::platform::TargetPlatform;
use derive_builder::Builder;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Ambient variables every model inherits from the supervisor.
pub const ENV_ALLOWLIST: [&str; 3] = ["LANG", "PATH", "USER"];

/// Where the child's standard error goes.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Share the supervisor's standard error
    #[default]
    Inherit,
    /// Pipe it back and forward it to the driver's stderr sink
    Capture,
}

/// Configuration for a single model process, as handed over by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into, strip_option))]
pub struct ModelDriverConfig {
    pub name: String,

    /// Command line of the model. A bare string is treated as a single token.
    #[builder(setter(custom))]
    #[serde(deserialize_with = "one_or_many")]
    pub args: Vec<String>,

    #[builder(default)]
    #[serde(default)]
    pub is_server: bool,

    /// Names of the server models this model talks to
    #[builder(default, setter(custom))]
    #[serde(default, deserialize_with = "one_or_many")]
    pub client_of: Vec<String>,

    #[builder(default)]
    #[serde(default)]
    pub with_strace: bool,

    #[builder(default, setter(custom))]
    #[serde(default)]
    pub strace_flags: Vec<String>,

    #[builder(default)]
    #[serde(default)]
    pub with_valgrind: bool,

    #[builder(default, setter(custom))]
    #[serde(default)]
    pub valgrind_flags: Vec<String>,

    #[builder(default)]
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Instance overrides, applied underneath the ambient environment
    #[builder(default, setter(custom))]
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Upper bound for waiting on the process to exit (in milliseconds)
    #[builder(default = "default_timeout_ms()")]
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sleep between polls of the output channel and exit status (in milliseconds)
    #[builder(default = "default_poll_interval_ms()")]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Grace period for background workers at teardown (in milliseconds)
    #[builder(default = "default_join_timeout_ms()")]
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    #[builder(default)]
    #[serde(default)]
    pub stderr: StderrMode,

    /// Platform the command line is built for
    #[builder(default = "TargetPlatform::current()")]
    #[serde(skip, default = "TargetPlatform::current")]
    pub platform: TargetPlatform,
}

impl ModelDriverConfig {
    pub fn builder() -> ModelDriverConfigBuilder {
        ModelDriverConfigBuilder::default()
    }

    /// Parse a configuration handed over as JSON
    pub fn from_json(json: &str) -> Result<Self, DriverError> {
        serde_json::from_str(json)
            .map_err(|e| DriverError::Configuration(format!("invalid model config: {e}")))
    }

    /// Reject configurations that can never be spawned.
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.name.trim().is_empty() {
            return Err(DriverError::Configuration(
                "model name must not be empty".to_string(),
            ));
        }

        if self.args.is_empty() {
            return Err(DriverError::Configuration(format!(
                "model {} has no command to run",
                self.name
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(DriverError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.with_strace && self.with_valgrind {
            return Err(DriverError::Configuration(format!(
                "model {} cannot run with both strace and valgrind",
                self.name
            )));
        }

        if (self.with_strace || self.with_valgrind) && self.platform.is_windows() {
            return Err(DriverError::Configuration(
                "strace/valgrind options are invalid on windows".to_string(),
            ));
        }

        if self.with_strace && self.platform.tracer().is_none() {
            return Err(DriverError::Configuration(format!(
                "no syscall tracer is known for platform {:?}",
                self.platform
            )));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Instrumentation wrapper followed by the model's own arguments
    pub fn command_line(&self) -> Vec<String> {
        let mut line = Vec::with_capacity(self.args.len() + 4);
        if self.with_strace {
            if let Some(tracer) = self.platform.tracer() {
                line.push(tracer.to_string());
                line.extend(self.strace_flags.iter().cloned());
            }
        } else if self.with_valgrind {
            line.push("valgrind".to_string());
            line.extend(self.valgrind_flags.iter().cloned());
        }
        line.extend(self.args.iter().cloned());
        line
    }

    /// Environment the child is spawned with. Later layers win: instance
    /// overrides, then the allow-listed ambient variables, then the whole
    /// ambient environment.
    pub fn spawn_environment<I, K, V>(&self, ambient: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let ambient: HashMap<String, String> = ambient
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut env = self.env.clone();
        for key in ENV_ALLOWLIST {
            if let Some(value) = ambient.get(key) {
                env.insert(key.to_string(), value.clone());
            }
        }
        env.extend(ambient);
        env
    }
}

impl ModelDriverConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        self.args = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    /// Single command string, kept as one token
    pub fn command<S: ToString>(&mut self, command: S) -> &mut Self {
        self.args = Some(vec![command.to_string()]);
        self
    }

    pub fn client_of<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        self.client_of = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn strace_flags<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        self.strace_flags = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn valgrind_flags<S: ToString, I: IntoIterator<Item = S>>(
        &mut self,
        iter: I,
    ) -> &mut Self {
        self.valgrind_flags = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(single) => vec![single],
        OneOrMany::Many(many) => many,
    })
}

// Default value functions for serde
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_join_timeout_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModelDriverConfigBuilder {
        let mut builder = ModelDriverConfig::builder();
        builder
            .name("model")
            .args(["./model", "--fast"])
            .platform(TargetPlatform::Linux);
        builder
    }

    #[test]
    fn test_defaults() {
        let config = base().build().unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.is_server);
        assert!(config.client_of.is_empty());
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.stderr, StderrMode::Inherit);
    }

    #[test]
    fn test_strace_and_valgrind_are_exclusive() {
        let config = base().with_strace(true).with_valgrind(true).build().unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[test]
    fn test_instrumentation_rejected_on_windows() {
        for (strace, valgrind) in [(true, false), (false, true)] {
            let config = base()
                .with_strace(strace)
                .with_valgrind(valgrind)
                .platform(TargetPlatform::Windows)
                .build()
                .unwrap();
            assert!(matches!(
                config.validate(),
                Err(DriverError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_strace_needs_a_known_tracer() {
        let config = base()
            .with_strace(true)
            .platform(TargetPlatform::Other)
            .build()
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_basics() {
        let mut config = base().build().unwrap();
        config.args.clear();
        assert!(config.validate().is_err());

        let mut config = base().build().unwrap();
        config.name = "  ".to_string();
        assert!(config.validate().is_err());

        let config = base().poll_interval_ms(0u64).build().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_command_line_prefixes() {
        let config = base()
            .with_strace(true)
            .strace_flags(["-f"])
            .build()
            .unwrap();
        assert_eq!(config.command_line(), ["strace", "-f", "./model", "--fast"]);

        let config = base()
            .with_strace(true)
            .platform(TargetPlatform::Darwin)
            .build()
            .unwrap();
        assert_eq!(config.command_line(), ["dtrace", "./model", "--fast"]);

        let config = base()
            .with_valgrind(true)
            .valgrind_flags(["--leak-check=full"])
            .build()
            .unwrap();
        assert_eq!(
            config.command_line(),
            ["valgrind", "--leak-check=full", "./model", "--fast"]
        );

        let config = base().build().unwrap();
        assert_eq!(config.command_line(), ["./model", "--fast"]);
    }

    #[test]
    fn test_spawn_environment_layering() {
        let config = base()
            .env("PATH", "/override/bin")
            .env("MODEL_ONLY", "1")
            .build()
            .unwrap();

        let env = config.spawn_environment([("PATH", "/usr/bin"), ("HOME", "/home/model")]);
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["HOME"], "/home/model");
        assert_eq!(env["MODEL_ONLY"], "1");
        assert!(!env.contains_key("LANG"));
    }

    #[test]
    fn test_from_json_normalizes_single_strings() {
        let config = ModelDriverConfig::from_json(
            r#"{"name": "hello", "args": "./hello", "client_of": "server", "timeout_ms": 500}"#,
        )
        .unwrap();
        assert_eq!(config.args, ["./hello"]);
        assert_eq!(config.client_of, ["server"]);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.platform, TargetPlatform::current());

        let config = ModelDriverConfig::from_json(
            r#"{"name": "hello", "args": ["python", "hello.py"], "is_server": true, "stderr": "capture"}"#,
        )
        .unwrap();
        assert_eq!(config.args, ["python", "hello.py"]);
        assert!(config.is_server);
        assert_eq!(config.stderr, StderrMode::Capture);
    }

    #[test]
    fn test_from_json_rejects_missing_args() {
        let err = ModelDriverConfig::from_json(r#"{"name": "hello"}"#).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }
}
