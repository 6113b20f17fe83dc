use anyhow::{Context, Result};
use patronus_convert::error::exit_code;
use patronus_convert::nft::Hook;
use patronus_convert::report::render_simulation;
use patronus_convert::simulate::{parse_protocol, simulate, Packet};
use patronus_convert::translate::{translate, TranslateOptions};

use crate::cli::{OutputFormat, SimHook, SimulateArgs};
use crate::input::{load_settings, read_config};

pub fn run_simulate(args: SimulateArgs) -> Result<i32> {
    let (settings, _) = load_settings(args.settings.as_deref())?;
    let imported = read_config(&args.input)?;
    let unit = translate(&imported.model, &settings, &TranslateOptions::default())
        .with_context(|| format!("failed to translate {}", args.input.display()))?;

    let packet = Packet {
        hook: match args.hook {
            SimHook::Input => Hook::Input,
            SimHook::Forward => Hook::Forward,
            SimHook::Output => Hook::Output,
        },
        in_iface: args.in_iface.map(|name| name.to_ascii_lowercase()),
        out_iface: args.out_iface.map(|name| name.to_ascii_lowercase()),
        protocol: parse_protocol(&args.proto, args.src.is_ipv6())?,
        src: args.src,
        dst: args.dst,
        sport: args.sport,
        dport: args.dport,
        icmp_type: args.icmp_type,
        to_self: args.to_self,
    };
    let sim = simulate(&imported.model, &settings, &unit.ruleset.table, &packet)
        .context("simulation failed")?;

    match args.format {
        OutputFormat::Text => println!("{}", render_simulation(&sim)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "agrees": sim.agrees(),
                "simulation": &sim,
            }))?
        ),
    }

    if sim.agrees() {
        Ok(exit_code::SUCCESS)
    } else {
        Ok(exit_code::DISAGREEMENT)
    }
}
