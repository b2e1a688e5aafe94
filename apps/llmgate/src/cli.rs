use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "llmgate",
    about = "An Anthropic-compatible gateway for OpenAI-compatible upstreams."
)]
pub struct Cli {
    #[arg(long, env = "LLMGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "LLMGATE_PORT", default_value_t = 8787)]
    pub port: u16,

    /// Gateway definition file: a JSON array of
    /// {id, auth_token, upstream_base_url, upstream_api_key, models}.
    #[arg(long, env = "LLMGATE_GATEWAYS")]
    pub gateways: PathBuf,
}
