use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "sherpa",
    about = "Step-by-step screen guidance driven by a vision model",
    version
)]
pub struct Cli {
    /// What the user is trying to accomplish.
    #[arg(long, value_name = "TEXT")]
    pub goal: String,

    /// Directory of screen frames to replay in name order.
    #[arg(long, value_name = "DIR")]
    pub frames: PathBuf,

    /// Config file. Default: sherpa.toml in the working directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
