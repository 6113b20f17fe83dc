use anyhow::Result;
use colored::Colorize;
use patronus_convert::error::exit_code;
use patronus_convert::report::{
    render_issues, render_notes, render_summary, render_warnings, CheckReport,
};
use patronus_convert::translate::{from_script, translate, TranslateOptions};

use crate::cli::{CheckArgs, OutputFormat};
use crate::input::{classify, load_settings, read_file, Input};

pub fn run_check(args: CheckArgs) -> Result<i32> {
    let (settings, source) = load_settings(args.settings.as_deref())?;
    let raw = read_file(&args.input)?;

    let report = match classify(&raw) {
        Err(err) => CheckReport::failed(&err, source, Vec::new()),
        Ok(Input::Config(imported)) => {
            match translate(&imported.model, &settings, &TranslateOptions::default()) {
                Ok(unit) => CheckReport::passed(&unit, source, imported.warnings),
                Err(err) => CheckReport::failed(&err, source, imported.warnings),
            }
        }
        Ok(Input::Script(text)) => match from_script(&text) {
            Ok(unit) => CheckReport::passed(&unit, source, Vec::new()),
            Err(err) => CheckReport::failed(&err, source, Vec::new()),
        },
    };

    match args.format {
        OutputFormat::Text => println!("{}", render_check_text(&report, &settings.table)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if let Some(category) = report.category {
        return Ok(category.exit_code());
    }
    if args.strict && (!report.warnings.is_empty() || !report.notes.is_empty()) {
        eprintln!(
            "strict mode failed: {} warning(s), {} note(s)",
            report.warnings.len(),
            report.notes.len()
        );
        return Ok(exit_code::GENERAL);
    }
    Ok(exit_code::SUCCESS)
}

fn render_check_text(report: &CheckReport, table: &str) -> String {
    let mut out = Vec::new();
    out.push(format!("settings={}", report.settings));
    if !report.issues.is_empty() {
        out.push(render_issues(&report.issues));
    }
    if !report.warnings.is_empty() {
        out.push(render_warnings(&report.warnings));
    }
    if !report.notes.is_empty() {
        out.push(render_notes(&report.notes));
    }
    match (&report.summary, report.category) {
        (Some(summary), _) => {
            out.push(render_summary(summary, table));
            out.push("ok".green().bold().to_string());
        }
        (None, Some(category)) => out.push(
            format!(
                "rejected: {} issue(s), category {}",
                report.issues.len(),
                category.as_str()
            )
            .red()
            .bold()
            .to_string(),
        ),
        (None, None) => {}
    }
    out.join("\n")
}
