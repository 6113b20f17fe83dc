use std::net::IpAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "patronus-convert")]
#[command(about = "Translate pfSense/OPNsense firewall configurations to nftables")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Translate a config (or a script this tool emitted) to nftables.
    Convert(ConvertArgs),
    /// Import and translate a config, reporting issues without output.
    Check(CheckArgs),
    /// Print the rule model of a config.
    Inspect(InspectArgs),
    /// Write the rule model of a config back as XML.
    Export(ExportArgs),
    /// Decide one packet on the rule model and on the translated ruleset.
    Simulate(SimulateArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum RulesetFormat {
    /// `nft -f` script.
    Nft,
    /// `nft -j` JSON.
    Json,
}

#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// pfSense/OPNsense XML export or an nft script emitted by this tool.
    pub input: PathBuf,
    /// Write the ruleset here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Load the ruleset with `nft -f -` after checking it.
    #[arg(long, conflicts_with = "check_only")]
    pub apply: bool,
    /// Validate the ruleset with `nft -c` without loading it.
    #[arg(long)]
    pub check_only: bool,
    #[arg(long, value_enum, default_value_t = RulesetFormat::Nft)]
    pub format: RulesetFormat,
    /// Merge adjacent rules and drop unreachable ones.
    #[arg(long)]
    pub optimize: bool,
    /// Settings TOML file. Defaults to the embedded settings.
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Print which source entity every emitted rule stems from.
    #[arg(long)]
    pub trace: bool,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    pub input: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Fail on import warnings and translation notes as well.
    #[arg(long)]
    pub strict: bool,
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    pub input: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    pub input: PathBuf,
    /// Destination XML file.
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum SimHook {
    Input,
    Forward,
    Output,
}

#[derive(Parser, Debug)]
pub struct SimulateArgs {
    pub input: PathBuf,
    #[arg(long, value_enum)]
    pub hook: SimHook,
    /// Logical interface the packet arrives on (`wan`, `lan`, `opt1`).
    #[arg(long)]
    pub in_iface: Option<String>,
    /// Logical interface the packet leaves on.
    #[arg(long)]
    pub out_iface: Option<String>,
    /// Protocol name (`tcp`, `udp`, `icmp`, `gre`) or number.
    #[arg(long)]
    pub proto: String,
    #[arg(long)]
    pub src: IpAddr,
    #[arg(long)]
    pub dst: IpAddr,
    #[arg(long)]
    pub sport: Option<u16>,
    #[arg(long)]
    pub dport: Option<u16>,
    /// pf ICMP type name (`echoreq`, `unreach`).
    #[arg(long)]
    pub icmp_type: Option<String>,
    /// Treat the destination as an address of the firewall itself.
    #[arg(long)]
    pub to_self: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[arg(long)]
    pub settings: Option<PathBuf>,
}
