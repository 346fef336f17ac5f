mod cli;
mod config;
mod storage;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use color_eyre::Result;
use strongkey_core::{Keychain, KeychainProtection, KeychainValue};
use strongkey_storage::KeychainFactory;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand, KeychainCommand};

const HEALTH_KEYCHAIN: &str = "strongkey.health";

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli
        .command
        .unwrap_or(Command::Keychain(KeychainCommand::Protection))
    {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Keychain(command) => {
            let factory = storage::factory_from_config(&config, cli.strongbox)?;
            run_command(&factory, command)?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("strongkey {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn run_command(factory: &KeychainFactory, command: KeychainCommand) -> Result<()> {
    match command {
        KeychainCommand::Health => {
            run_health_check(factory)?;
            println!("Keychain: ok");
        }
        KeychainCommand::Protection => {
            let protection = factory.keychain_protection_supported_on_device()?;
            println!("{protection:?}");
        }
        KeychainCommand::Get { keychain, key } => {
            let keychain = factory.get_keychain(&keychain, KeychainProtection::None)?;
            match keychain.get(&key)? {
                Some(value) => println!("{}", render(&value)),
                None => color_eyre::eyre::bail!("no value stored for {key}"),
            }
        }
        KeychainCommand::Set {
            keychain,
            key,
            value,
        } => {
            let keychain = factory.get_keychain(&keychain, KeychainProtection::None)?;
            keychain.set_string(&key, Some(&value))?;
        }
        KeychainCommand::Remove { keychain, key } => {
            let keychain = factory.get_keychain(&keychain, KeychainProtection::None)?;
            keychain.remove(&key)?;
        }
        KeychainCommand::List { keychain } => {
            let keychain = factory.get_keychain(&keychain, KeychainProtection::None)?;
            for key in keychain.keys()? {
                println!("{key}");
            }
        }
    }
    Ok(())
}

/// Round-trips a probe value through an encrypted keychain.
fn run_health_check(factory: &KeychainFactory) -> Result<()> {
    let keychain = factory.get_keychain(HEALTH_KEYCHAIN, KeychainProtection::Software)?;
    run_keychain_health(keychain.as_ref())
}

fn run_keychain_health(keychain: &dyn Keychain) -> Result<()> {
    let probe_key = "health/probe";
    let payload = "ok";
    keychain.set_string(probe_key, Some(payload))?;
    let round_trip = keychain.string(probe_key)?;
    keychain.remove(probe_key)?;

    if round_trip.as_deref() != Some(payload) {
        color_eyre::eyre::bail!("keychain round-trip failed");
    }
    Ok(())
}

fn render(value: &KeychainValue) -> String {
    match value {
        KeychainValue::Text(text) => text.clone(),
        KeychainValue::Data(bytes) => STANDARD.encode(bytes),
        KeychainValue::Bool(flag) => flag.to_string(),
        KeychainValue::Long(number) => number.to_string(),
        KeychainValue::TextSet(set) => set.iter().cloned().collect::<Vec<_>>().join(","),
    }
}
