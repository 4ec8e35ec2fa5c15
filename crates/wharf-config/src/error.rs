use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(wharf_config::toml_deserialize),
        help("Check your settings file syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Failed to read settings file: {0}")]
    #[diagnostic(code(wharf_config::io))]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
