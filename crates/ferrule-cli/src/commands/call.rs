//! `ferrule call`

use anyhow::Result;
use ferrule_config::Config;
use ferrule_runtime::Value;
use std::path::Path;
use tracing::debug;

pub fn run(config: &Config, library: &str, symbol: &str, args: &[String], manifest: Option<&Path>) -> Result<()> {
    let (_bridge, namespace) = super::open(config, library, manifest)?;
    let args: Vec<Value> = args.iter().map(|a| parse_literal(a)).collect();
    debug!(symbol, args = args.len(), "calling from the command line");
    let result = namespace.call(symbol, &args)?;
    println!("{}", result);
    Ok(())
}

/// Host value for a command-line literal
pub fn parse_literal(text: &str) -> Value {
    let text = text.trim();
    match text {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = text.parse::<i128>() {
        return Value::Int(n);
    }
    if let Ok(x) = text.parse::<f64>() {
        return Value::Float(x);
    }
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_literal)
            .collect();
        return Value::list(items);
    }
    let unquoted = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    Value::str(unquoted)
}
