use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tidecord-bot", about = "Tidecord demo bot")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tidecord.toml")]
    pub config: String,

    /// Bot token (overrides config file and TIDECORD_TOKEN)
    #[arg(long)]
    pub token: Option<String>,
}
