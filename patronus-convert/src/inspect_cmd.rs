use anyhow::Result;
use patronus_convert::error::exit_code;
use patronus_convert::import::ImportWarning;
use patronus_convert::model::RuleModel;
use patronus_convert::report::{render_model, render_warnings};
use serde::Serialize;

use crate::cli::{InspectArgs, OutputFormat};
use crate::input::read_config;

#[derive(Serialize)]
struct InspectReport<'a> {
    model: &'a RuleModel,
    warnings: &'a [ImportWarning],
}

pub fn run_inspect(args: InspectArgs) -> Result<i32> {
    let imported = read_config(&args.input)?;
    match args.format {
        OutputFormat::Text => {
            println!("{}", render_model(&imported.model));
            if !imported.warnings.is_empty() {
                println!();
                println!("{}", render_warnings(&imported.warnings));
            }
        }
        OutputFormat::Json => {
            let report = InspectReport {
                model: &imported.model,
                warnings: &imported.warnings,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(exit_code::SUCCESS)
}
