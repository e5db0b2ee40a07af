use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// TOML configuration file (default: $DRONE_CONFIG_FILE)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listen address, overrides server.bind and DRONE_BIND (e.g. :3000)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Pipeline configuration to convert; `-` reads standard input
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Repository namespace (owner)
    #[arg(long, value_name = "NS")]
    pub namespace: String,

    /// Repository name
    #[arg(long, value_name = "NAME")]
    pub name: String,

    /// Git reference the evaluation build runs against
    #[arg(long = "ref", value_name = "REF", default_value = "")]
    pub git_ref: String,

    /// Branch the evaluation build runs against
    #[arg(long, value_name = "BRANCH", default_value = "")]
    pub branch: String,

    /// Build event of the simulated request
    #[arg(long, value_name = "EVENT", default_value = "push")]
    pub event: String,

    /// Build parameter of the simulated request (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// TOML configuration file (default: $DRONE_CONFIG_FILE)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
