//! `lorch mapping` commands. They read the file without taking part in the
//! submission life cycle, so a running server is never disturbed.

use anyhow::{Context, Result};
use clap::Args;
use lorch_store::read_snapshot;
use serde_json::{Value, json};

use crate::opts::GlobalOpts;
use crate::output::print_json;

#[derive(Args, Debug)]
pub struct MappingGetArgs {
    /// Match id (for allocated matches this is the chain id)
    pub match_id: String,
}

pub fn cmd_mapping_get(opts: &GlobalOpts, args: &MappingGetArgs) -> Result<()> {
    let path = opts.resolved_mapping_path();
    let table = read_snapshot(&path).with_context(|| format!("read {}", path.display()))?;
    let mapping = table
        .get(&args.match_id)
        .with_context(|| format!("no mapping found for matchId={}", args.match_id))?;
    let mut value = serde_json::to_value(mapping)?;
    if let Value::Object(map) = &mut value {
        map.insert("matchId".into(), json!(args.match_id));
    }
    print_json(opts, &value)
}

pub fn cmd_mapping_list(opts: &GlobalOpts) -> Result<()> {
    let path = opts.resolved_mapping_path();
    let table = read_snapshot(&path).with_context(|| format!("read {}", path.display()))?;
    let mappings: Vec<Value> = table
        .iter()
        .map(|(match_id, m)| {
            json!({
                "matchId": match_id,
                "chainId": m.chain_id,
                "appId": m.app_id,
                "status": m.status,
            })
        })
        .collect();
    print_json(
        opts,
        &json!({ "count": mappings.len(), "mappings": mappings }),
    )
}
