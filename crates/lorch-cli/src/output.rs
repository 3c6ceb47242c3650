use anyhow::Result;
use serde_json::Value;

use crate::opts::GlobalOpts;

/// Write `data` to stdout as JSON. Logs go to stderr so stdout stays parseable.
pub fn print_json(opts: &GlobalOpts, data: &Value) -> Result<()> {
    let text = if opts.pretty {
        serde_json::to_string_pretty(data)?
    } else {
        serde_json::to_string(data)?
    };
    println!("{text}");
    Ok(())
}
