//! Configuration file wrangling
// (c) 2024 Ross Younger

use super::{Configuration, BASE_CONFIG_FILENAME};

use figment::{
    providers::{Format, Serialized, Toml},
    value::Value,
    Figment, Metadata, Provider,
};
use serde::Deserialize;
use std::{
    collections::HashSet,
    fmt::Display,
    path::{Path, PathBuf},
};
use struct_field_names_as_array::FieldNamesAsSlice;
use tabled::{settings::style::Style, Table, Tabled};

use tracing::{trace, warn};

// PATHS /////////////////////////////////////////////////////////////////////////////////////////////////////

fn user_config_path() -> Option<PathBuf> {
    // ~/.<filename>
    dirs::home_dir().map(|d| d.join(format!(".{BASE_CONFIG_FILENAME}")))
}

fn system_config_path() -> PathBuf {
    // /etc/<filename>
    Path::new("/etc").join(BASE_CONFIG_FILENAME)
}

// SYSTEM DEFAULTS //////////////////////////////////////////////////////////////////////////////////////////////

/// A `[https://docs.rs/figment/latest/figment/trait.Provider.html](figment::Provider)` that holds
/// our set of fixed system default options
#[derive(Default)]
struct SystemDefault {}

impl SystemDefault {
    const META_NAME: &str = "default";
}

impl Provider for SystemDefault {
    fn metadata(&self) -> Metadata {
        figment::Metadata::named(Self::META_NAME)
    }

    fn data(
        &self,
    ) -> std::result::Result<
        figment::value::Map<figment::Profile, figment::value::Dict>,
        figment::Error,
    > {
        Serialized::defaults(Configuration::default()).data()
    }
}

// CONFIG MANAGER /////////////////////////////////////////////////////////////////////////////////////////////

/// Processes and merges all possible configuration sources.
///
/// Configuration file locations are platform-dependent.
/// To see what applies on the current platform, run `sshpipe --config-files`.
#[derive(Debug)]
pub struct Manager {
    /// Configuration data
    data: Figment,
}

fn add_user_config(f: Figment) -> Figment {
    let Some(path) = user_config_path() else {
        warn!("could not determine user configuration file path");
        return f;
    };
    if !path.exists() {
        trace!("user configuration file {path:?} not present");
        return f;
    }
    f.merge(Toml::file(path.as_path()))
}

fn add_system_config(f: Figment) -> Figment {
    let path = system_config_path();
    if !path.exists() {
        trace!("system configuration file {path:?} not present");
        return f;
    }
    f.merge(Toml::file(path.as_path()))
}

impl Manager {
    /// Initialises this structure, reading the set of config files appropriate to the platform
    /// and the current user.
    #[must_use]
    pub fn new() -> Self {
        let mut data = Figment::new().merge(SystemDefault::default());
        data = add_system_config(data);

        // N.B. This may leave data in a fused-error state, if a data file isn't parseable.
        data = add_user_config(data);
        Self { data }
    }

    /// Returns the list of configuration files we read.
    ///
    /// This is a function of platform and the current user id.
    pub fn config_files() -> Vec<String> {
        std::iter::once(system_config_path())
            .chain(user_config_path())
            .map(|p| p.to_string_lossy().into())
            .collect()
    }

    /// Testing/internal constructor, does not read files from system
    #[must_use]
    pub(crate) fn without_files() -> Self {
        let data = Figment::new().merge(SystemDefault::default());
        Self { data }
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    ///
    /// Within sshpipe, we use [crate::util::derive_deftly_template_Optionalify] to implement Provider for [Configuration].
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::replace(&mut self.data, Figment::new());
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Merges in a data set from a TOML file
    pub fn merge_toml_file<T>(&mut self, toml: T)
    where
        T: AsRef<Path>,
    {
        let path = toml.as_ref();
        let provider = Toml::file_exact(path);
        self.merge_provider(provider);
    }

    /// Attempts to extract a particular struct from the data.
    ///
    /// Within sshpipe, `T` is usually [Configuration], but it isn't intrinsically required to be.
    pub fn get<'de, T>(&self) -> anyhow::Result<T, figment::Error>
    where
        T: Deserialize<'de>,
    {
        self.data.extract::<T>()
    }
}

// PRETTY PRINT SUPPORT ///////////////////////////////////////////////////////////////////////////////////////

#[derive(Tabled)]
struct PrettyConfig {
    field: String,
    value: String,
    source: String,
}

impl PrettyConfig {
    fn render_source(meta: Option<&Metadata>) -> String {
        if let Some(m) = meta {
            m.source
                .as_ref()
                .map_or_else(|| m.name.to_string(), figment::Source::to_string)
        } else {
            String::new()
        }
    }

    fn render_value(value: &Value) -> String {
        match value {
            Value::String(_tag, s) => s.to_string(),
            Value::Char(_tag, c) => c.to_string(),
            Value::Bool(_tag, b) => b.to_string(),
            Value::Num(_tag, num) => {
                if let Some(i) = num.to_i128() {
                    i.to_string()
                } else if let Some(u) = num.to_u128() {
                    u.to_string()
                } else if let Some(ff) = num.to_f64() {
                    ff.to_string()
                } else {
                    "<number>".into()
                }
            }
            Value::Empty(_tag, _) => "<empty>".into(),
            Value::Dict(_tag, dict) => format!(
                "{{{}}}",
                dict.iter()
                    .map(|(k, v)| format!("{k}={}", PrettyConfig::render_value(v)))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Value::Array(_tag, vec) => {
                format!(
                    "[{}]",
                    vec.iter()
                        .map(PrettyConfig::render_value)
                        .collect::<Vec<_>>()
                        .join(",")
                )
            }
        }
    }

    fn new(field: &str, value: &Value, meta: Option<&Metadata>) -> Self {
        Self {
            field: field.into(),
            value: PrettyConfig::render_value(value),
            source: PrettyConfig::render_source(meta),
        }
    }
}

/// Pretty-printing type wrapper to Manager
#[derive(Debug)]
pub struct DisplayAdapter<'a> {
    /// Data source
    source: &'a Manager,
    /// Whether to warn if unused fields are present
    warn_on_unused: bool,
    /// The fields we want to output
    fields: HashSet<String>,
}

impl Manager {
    /// Creates a `DisplayAdapter` for this struct with the given options.
    ///
    /// # Returns
    /// An ephemeral structure implementing `Display`.
    #[must_use]
    pub fn to_display_adapter<'de, T>(&self, warn_on_unused: bool) -> DisplayAdapter<'_>
    where
        T: Deserialize<'de> + FieldNamesAsSlice,
    {
        let mut fields = HashSet::<String>::new();
        fields.extend(T::FIELD_NAMES_AS_SLICE.iter().map(|s| String::from(*s)));
        DisplayAdapter {
            source: self,
            warn_on_unused,
            fields,
        }
    }
}

impl Display for DisplayAdapter<'_> {
    /// Formats the contents of this structure which are relevant to a given output type.
    ///
    /// N.B. This function uses CLI styling.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::cli::styles::{ERROR, WARNING};
        use anstream::eprintln;

        let data = match self.source.data.data() {
            Ok(d) => d,
            Err(e) => {
                // This isn't terribly helpful as it doesn't have metadata attached; BUT attempting to get() a struct does.
                eprintln!("{ERROR}ERROR{ERROR:#} {e}");
                return Ok(());
            }
        };
        let Some(data) = data.get(&figment::Profile::Default) else {
            return Ok(());
        };

        let mut output = Vec::<PrettyConfig>::new();

        for field in data.keys() {
            let meta = self.source.data.find_metadata(field);
            if self.fields.contains(field) {
                let value = self.source.data.find_value(field);
                let value = match value {
                    Ok(v) => v,
                    Err(e) => {
                        eprintln!("{WARNING}WARNING{WARNING:#}: error on {field}: {e}");
                        continue;
                    }
                };
                output.push(PrettyConfig::new(field, &value, meta));
            } else if self.warn_on_unused {
                let source = PrettyConfig::render_source(meta);
                eprintln!("{WARNING}WARNING{WARNING:#}: unrecognised field `{field}` in {source}");
            }
        }
        write!(f, "{}", Table::new(output).with(Style::sharp()))
    }
}
