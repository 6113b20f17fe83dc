//! pfSense/OPNsense firewall configuration to nftables translation.
//!
//! This library reads the packet filter part of a pfSense or OPNsense XML
//! export into an in-memory rule model and translates that model into a
//! single nftables table that decides every packet the way pf's
//! first-match evaluation would. Anything it cannot translate faithfully
//! is reported, never guessed.
//!
//! # Architecture
//!
//! ## Import
//!
//! - [`detect`]: Platform detection and input classification
//! - [`import`]: XML document to [`model::RuleModel`], with batched parse
//!   and reference errors
//! - [`model`]: Interfaces, groups, aliases, filter rules and NAT mappings
//! - [`location`]: Element paths and lines carried by every entity
//!
//! ## Translation
//!
//! - [`translate`]: Rule model to nftables IR: alias sets, filter and NAT
//!   chains, conflict detection, the optimization pass and the trace
//! - [`nft`]: nftables IR, `nft -f` text and `nft -j` JSON emitters, the
//!   script reader, a packet evaluator and `nft` invocation
//! - [`settings`]: Translation settings (embedded defaults, TOML override)
//!
//! ## Verification and output
//!
//! - [`simulate`]: Decide one packet on the rule model and on the ruleset
//! - [`export`]: Rule model back to a configuration document
//! - [`report`]: Terminal and JSON renderings
//! - [`error`]: Issue types and process exit codes
//!
//! # Workflow
//!
//! 1. **Import** the XML export; parse and reference errors reject it
//! 2. **Translate** with [`settings::Settings`]; conflicts and unsupported
//!    constructs reject it
//! 3. **Emit** the ruleset as an `nft -f` script or `nft -j` JSON
//! 4. **Apply** it with `nft`, or **simulate** packets against both sides
//!
//! # Examples
//!
//! ```ignore
//! use patronus_convert::import::import_file;
//! use patronus_convert::nft::emit::emit;
//! use patronus_convert::settings::Settings;
//! use patronus_convert::translate::{translate, TranslateOptions};
//!
//! let imported = import_file("config.xml".as_ref())?;
//! let settings = Settings::embedded()?;
//! let unit = translate(&imported.model, &settings, &TranslateOptions::default())?;
//! print!("{}", emit(&unit.ruleset));
//! ```

pub mod detect;
pub mod error;
pub mod export;
pub mod import;
pub mod location;
pub mod model;
pub mod nft;
pub mod report;
pub mod settings;
pub mod simulate;
pub mod translate;
