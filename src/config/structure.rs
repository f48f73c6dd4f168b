//! Configuration structure
// (c) 2024 Ross Younger

use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use struct_field_names_as_array::FieldNamesAsSlice;

use crate::util::derive_deftly_template_Optionalify;

use derive_deftly::Deftly;

/// Deployment environment. This only affects logging.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    clap::ValueEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Coloured console logging
    #[default]
    Local,
    /// Plain console logging, plus a log file
    Production,
}

/// The set of configurable options supported by sshpipe.
///
/// **Note:** The implementation of `default()` for this struct returns sshpipe's hard-wired configuration defaults.
///
/// This structure uses the [Optionalify](derive_deftly_template_Optionalify) deftly macro to automatically
/// define the `Configuration_Optional` struct, which is the same but has all members of type `Option<whatever>`.
/// This is the magic that lets us use the same underlying struct for CLI and saved configuration files:
/// the CLI uses the `_Optional` version , with everything defaulting to `None`.
/// The result is that wherever the user does not provide a value, values read from lower priority sources
/// (configuration files and system defaults) obtain.
///
// Maintainer note: None of the members of this struct should be Option<anything>. That leads to sunspots in the CLI and strange warts (Some(Some(foo))).
#[derive(Deftly)]
#[derive_deftly(Optionalify)]
#[deftly(visibility = "pub(crate)")]
#[derive(Debug, Clone, PartialEq, Eq, Parser, Deserialize, Serialize, FieldNamesAsSlice)]
pub struct Configuration {
    // LISTENERS =======================================================================================
    /// TCP port for senders (SSH) [default: 2222]
    #[arg(long, value_name("port"), help_heading("Listeners"), display_order(1))]
    pub ssh_port: u16,

    /// TCP port for receivers (HTTP) [default: 8080]
    #[arg(long, value_name("port"), help_heading("Listeners"), display_order(1))]
    pub http_port: u16,

    /// Local address both listeners bind to [default: 0.0.0.0]
    #[arg(long, value_name("addr"), help_heading("Listeners"))]
    pub bind_address: String,

    /// Public base URL receivers use to reach the HTTP listener [default: http://localhost:8080]
    ///
    /// Share links are formed by appending `/?id=<identifier>`.
    #[arg(long, value_name("url"), env("SSHPIPE_ADDR"), help_heading("Listeners"))]
    pub base_url: String,

    // SECURITY ========================================================================================
    /// OpenSSH private key file for the SSH listener [default: none]
    ///
    /// If empty, a fresh Ed25519 key is generated on every start. Senders will see
    /// a host key warning each time; this is not suitable for production.
    #[arg(long, value_name("FILE"), help_heading("Security"))]
    pub host_key: String,

    /// OpenSSH authorized_keys file listing who may send [default: authorized_keys]
    #[arg(long, value_name("FILE"), help_heading("Security"))]
    pub authorized_keys: String,

    // BEHAVIOUR =======================================================================================
    /// How long listeners have to finish in-flight work on shutdown [seconds; default 5]
    #[arg(long, value_name("sec"), help_heading("Behaviour"))]
    pub grace_period: u16,

    /// How long a receiver waits for the sender to produce response headers [seconds; default 60]
    #[arg(long, value_name("sec"), help_heading("Behaviour"))]
    pub receiver_timeout: u16,

    /// Filename stem offered to receivers; an extension is added to suit the content [default: sshpipe]
    #[arg(long, value_name("stem"), help_heading("Behaviour"))]
    pub file_name: String,

    // OUTPUT ==========================================================================================
    /// Deployment environment, which selects the logging style [default: local]
    #[arg(long, value_name("env"), help_heading("Output"))]
    #[clap(value_enum)]
    pub environment: Environment,
}

impl Configuration {
    /// Address and port the SSH listener binds to
    #[must_use]
    pub fn ssh_endpoint(&self) -> (&str, u16) {
        (&self.bind_address, self.ssh_port)
    }

    /// Address and port the HTTP listener binds to
    #[must_use]
    pub fn http_endpoint(&self) -> (&str, u16) {
        (&self.bind_address, self.http_port)
    }

    /// Accessor for `grace_period`, as a Duration
    #[must_use]
    pub fn grace_period_duration(&self) -> Duration {
        Duration::from_secs(self.grace_period.into())
    }

    /// Accessor for `receiver_timeout`, as a Duration
    #[must_use]
    pub fn receiver_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.receiver_timeout.into())
    }

    /// The link a receiver should visit for a given transfer identifier
    #[must_use]
    pub fn share_url(&self, id: &str) -> String {
        format!("{}/?id={id}", self.base_url.trim_end_matches('/'))
    }

    /// Checks for values that are well-typed but unusable
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.base_url.starts_with("http://") || self.base_url.starts_with("https://"),
            "base_url must be an http or https URL (got {:?})",
            self.base_url
        );
        ensure!(
            !self.file_name.is_empty()
                && self
                    .file_name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b"-_.".contains(&b)),
            "file_name may contain only letters, digits, '-', '_' and '.' (got {:?})",
            self.file_name
        );
        ensure!(
            !self.authorized_keys.is_empty(),
            "authorized_keys must name a file"
        );
        ensure!(self.receiver_timeout > 0, "receiver_timeout must be positive");
        Ok(())
    }
}

impl Default for Configuration {
    /// **(Unusual!)**
    /// Returns sshpipe's hard-wired configuration defaults.
    fn default() -> Self {
        Self {
            ssh_port: 2222,
            http_port: 8080,
            bind_address: "0.0.0.0".into(),
            base_url: "http://localhost:8080".into(),

            host_key: String::new(),
            authorized_keys: "authorized_keys".into(),

            grace_period: 5,
            receiver_timeout: 60,
            file_name: "sshpipe".into(),

            environment: Environment::Local,
        }
    }
}
