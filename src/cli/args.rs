// sshpipe top-level command-line arguments
// (c) 2024 Ross Younger

use clap::Parser;

use crate::config::Configuration_Optional;

#[derive(Debug, Parser, Clone)]
#[command(
    author,
    version(env!("SSHPIPE_VERSION_STRING")),
    about,
    before_help = "e.g.   sshpipe --authorized-keys ~/.ssh/authorized_keys --base-url https://pipe.example.com",
    infer_long_args(true)
)]
#[command(help_template(
    "\
{name} version {version}
{about-with-newline}
{usage-heading} {usage}
{before-help}
{all-args}{after-help}
"
))]
#[command(styles=super::styles::CLAP_STYLES)]
pub(crate) struct CliArgs {
    // MODE SELECTION ======================================================================
    /// Outputs the configuration, then exits.
    ///
    /// This shows every setting, its current value and where that value came from.
    #[arg(long, help_heading("Configuration"), conflicts_with("config_files"))]
    pub show_config: bool,

    /// Outputs the paths to configuration file(s), then exits
    #[arg(long, help_heading("Configuration"))]
    pub config_files: bool,

    /// Reads an additional configuration file, which takes priority over the user and system files
    #[arg(long, value_name("FILE"), help_heading("Configuration"))]
    pub config_file: Option<String>,

    // DEBUG ===============================================================================
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=sshpipe=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, help_heading("Debug"))]
    pub debug: bool,

    /// Log to a file [default: sshpipe.log in the production environment, none otherwise]
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(short('l'), long, action, help_heading("Debug"), value_name("FILE"))]
    pub log_file: Option<String>,

    // CONFIGURABLE OPTIONS ================================================================
    #[command(flatten)]
    pub config: Configuration_Optional,
}
