// (c) 2024 Ross Younger
//! # Configuration management
//!
//! sshpipe obtains run-time configuration from the following sources, in order:
//! 1. Command-line options (and the `SSHPIPE_ADDR` environment variable, for `base_url`)
//! 2. A configuration file named with `--config-file`
//! 3. The user's configuration file (typically `~/.sshpipe.toml`)
//! 4. The system-wide configuration file (typically `/etc/sshpipe.toml`)
//! 5. Hard-wired defaults
//!
//! Each option may appear in multiple places, but only the first match is used.
//!
//! ## File format
//!
//! Configuration files are TOML. Keys are the field names of [Configuration].
//!
//! ### Example
//!
//! ```toml
//! http_port = 80
//! base_url = "https://pipe.example.com"
//! host_key = "/etc/sshpipe/ssh_host_ed25519_key"
//! authorized_keys = "/etc/sshpipe/authorized_keys"
//! environment = "production"
//! ```
//!
//! ## Configurable options
//!
//! The full list of supported fields is defined by [Configuration].
//!
//! On the command line:
//! * `sshpipe --show-config` outputs a list of supported fields, their current values, and where each value came from.
//! * For an explanation of each field, refer to `sshpipe --help` .
//! * `sshpipe --config-files` outputs the list of configuration files for the current user and platform.

mod structure;
pub use structure::{Configuration, Environment};
pub(crate) use structure::Configuration_Optional;

mod manager;
pub use manager::Manager;

pub(crate) const BASE_CONFIG_FILENAME: &str = "sshpipe.toml";
