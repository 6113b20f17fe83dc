use std::fs;

use anyhow::{Context, Result};
use patronus_convert::error::exit_code;
use patronus_convert::nft::apply::Nft;
use patronus_convert::nft::emit::emit;
use patronus_convert::nft::json::to_json;
use patronus_convert::report::{render_notes, render_summary, render_trace, RulesetSummary};
use patronus_convert::translate::{from_script, optimize, trace, translate, TranslateOptions};
use tracing::info;

use crate::cli::{ConvertArgs, RulesetFormat};
use crate::input::{load_settings, read_input, Input};
use crate::path_guard::ensure_output_not_same;

pub fn run_convert(args: ConvertArgs) -> Result<i32> {
    let (settings, _) = load_settings(args.settings.as_deref())?;
    let options = TranslateOptions {
        optimize: args.optimize,
    };

    let unit = match read_input(&args.input)? {
        Input::Config(imported) => translate(&imported.model, &settings, &options)
            .with_context(|| format!("failed to translate {}", args.input.display()))?,
        Input::Script(text) => {
            let mut unit = from_script(&text)
                .with_context(|| format!("failed to read script {}", args.input.display()))?;
            if options.optimize {
                optimize::optimize(&mut unit.ruleset.table);
                unit.trace = trace::build(&unit.ruleset.table);
            }
            unit
        }
    };

    if !unit.notes.is_empty() {
        eprintln!("{}", render_notes(&unit.notes));
    }
    if args.trace {
        eprintln!("{}", render_trace(&unit.trace));
    }

    let script = emit(&unit.ruleset);
    let rendered = match args.format {
        RulesetFormat::Nft => script.clone(),
        RulesetFormat::Json => {
            let mut json = serde_json::to_string_pretty(&to_json(&unit.ruleset))?;
            json.push('\n');
            json
        }
    };

    if let Some(out) = &args.output {
        ensure_output_not_same(out, &[&args.input])?;
    }

    let nft = (args.check_only || args.apply).then(Nft::default);
    if let Some(nft) = &nft {
        nft.check(&script).context("nft check failed")?;
    }

    if let Some(out) = &args.output {
        fs::write(out, &rendered)
            .with_context(|| format!("failed to write ruleset {}", out.display()))?;
        info!(path = %out.display(), bytes = rendered.len(), "wrote ruleset");
    }

    if let Some(nft) = nft.filter(|_| args.apply) {
        nft.apply(&script).context("failed to apply ruleset")?;
    }

    if args.output.is_none() && !args.apply && !args.check_only {
        print!("{rendered}");
    } else {
        let summary = RulesetSummary::of(&unit);
        eprintln!("{}", render_summary(&summary, &unit.ruleset.table.name));
    }
    Ok(exit_code::SUCCESS)
}
