//! frame_inspect - Read-only views of a frame store.
//!
//! Lists keys, counts frames, prints the content digest, or exports one
//! decoded frame as an image file. The store is opened immutable; nothing is
//! ever written to it.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

use track_data_engine::codec::FrameCodec;
use track_data_engine::FrameReader;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "frame_inspect", about = "Inspect a frame store")]
struct Args {
    /// Frame store directory (the `frames/` folder of a run)
    #[arg(long, value_name = "PATH")]
    store: PathBuf,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every key in frame order
    Keys {
        /// Print at most this many keys
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the number of stored frames
    Count,
    /// Print the SHA-256 digest over all keys and frames
    Digest,
    /// Decode one frame and write it as PNG or JPEG (by extension)
    Export {
        #[arg(long)]
        key: String,
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let reader = {
        let _stage = ui.stage("Open frame store");
        FrameReader::open(&args.store)?
    };

    match args.command {
        Command::Keys { limit } => {
            let keys = reader.keys_ordered()?;
            for key in keys.iter().take(limit.unwrap_or(usize::MAX)) {
                println!("{}", key);
            }
        }
        Command::Count => {
            println!("{}", reader.len()?);
        }
        Command::Digest => {
            let digest = {
                let _stage = ui.stage("Hash frames");
                reader.digest()?
            };
            println!("{}", hex::encode(digest));
        }
        Command::Export { key, out } => {
            let bytes = reader.get(&key)?;
            let image = FrameCodec::default().decode_image(&bytes)?;
            image
                .save(&out)
                .map_err(|e| anyhow!("failed to write {}: {}", out.display(), e))?;
            println!(
                "frame_inspect: wrote {} ({}x{}) to {}",
                key,
                image.width(),
                image.height(),
                out.display()
            );
        }
    }
    Ok(())
}
