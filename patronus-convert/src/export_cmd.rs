use anyhow::{Context, Result};
use patronus_convert::error::exit_code;
use patronus_convert::export::export_file;

use crate::cli::ExportArgs;
use crate::input::read_config;
use crate::path_guard::ensure_output_not_same;

pub fn run_export(args: ExportArgs) -> Result<i32> {
    let imported = read_config(&args.input)?;
    ensure_output_not_same(&args.output, &[&args.input])?;
    export_file(&imported.model, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!(
        "exported platform={} interfaces={} aliases={} rules={} nat={} to {}",
        imported.model.platform,
        imported.model.interfaces.len(),
        imported.model.aliases.len(),
        imported.model.rules.len(),
        imported.model.nat.len(),
        args.output.display()
    );
    Ok(exit_code::SUCCESS)
}
