use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "strongkey",
    about = "Encrypted keychains with StrongBox-aware key selection",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Opt in to StrongBox-backed keys for this run (overrides config).
    #[arg(long, global = true)]
    pub strongbox: bool,
    /// Optional subcommand; defaults to reporting the protection level.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(flatten)]
    Keychain(KeychainCommand),
}

/// Commands that need a keychain factory.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeychainCommand {
    /// Run a round-trip health check against the keychain storage.
    Health,
    /// Print the strongest keychain protection available on this device.
    Protection,
    /// Print a value stored in a keychain.
    Get { keychain: String, key: String },
    /// Store a string value in a keychain (an empty value removes the entry).
    Set {
        keychain: String,
        key: String,
        value: String,
    },
    /// Remove a value from a keychain.
    Remove { keychain: String, key: String },
    /// List entry names stored in a keychain.
    List { keychain: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
