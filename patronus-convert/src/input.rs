use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use patronus_convert::detect::{detect_input, InputKind};
use patronus_convert::error::ConvertError;
use patronus_convert::import::{import_bytes, Imported};
use patronus_convert::settings::Settings;
use tracing::info;

/// What an input file turned out to hold.
pub enum Input {
    Config(Imported),
    Script(String),
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Import or read `raw`, keeping the library error for callers that
/// report it themselves.
pub fn classify(raw: &[u8]) -> Result<Input, ConvertError> {
    match detect_input(&String::from_utf8_lossy(raw)) {
        InputKind::Xml => import_bytes(raw).map(Input::Config),
        InputKind::NftScript => Ok(Input::Script(String::from_utf8_lossy(raw).into_owned())),
    }
}

pub fn read_input(path: &Path) -> Result<Input> {
    let raw = read_file(path)?;
    classify(&raw).with_context(|| format!("failed to import {}", path.display()))
}

/// Commands that work on the rule model need an XML configuration.
pub fn read_config(path: &Path) -> Result<Imported> {
    match read_input(path)? {
        Input::Config(imported) => Ok(imported),
        Input::Script(_) => bail!(
            "{} is an nft script; this command needs a pfSense/OPNsense configuration",
            path.display()
        ),
    }
}

/// Settings with their source (`embedded` or `file:<path>`).
pub fn load_settings(path: Option<&Path>) -> Result<(Settings, String)> {
    let (settings, source) = Settings::load(path).context("failed to load settings")?;
    info!(source = %source, table = %settings.table, "loaded settings");
    Ok((settings, source))
}
