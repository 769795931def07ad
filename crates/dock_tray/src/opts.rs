use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "dock-tray", version, about = "A system tray for StatusNotifierItem and XEmbed icons")]
pub struct Opt {
    /// Write out debug logs.
    #[arg(long = "debug")]
    pub log_debug: bool,

    /// JSON file with tray settings. Missing keys keep their defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Horizontal position of the tray row on the screen.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub x: i32,

    /// Vertical position of the tray row on the screen.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub y: i32,

    /// Don't accept icons from applications that only support window embedding.
    #[arg(long)]
    pub no_xembed: bool,

    /// Print the tray contents as a line of JSON whenever they change.
    #[arg(long)]
    pub print: bool,
}
