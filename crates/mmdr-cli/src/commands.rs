//! CLI command definitions.

use clap::{Args, Subcommand, ValueEnum};
use mmdr_core::{Format, RenderOptions};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the render server
    Serve {
        /// Configuration file (YAML, TOML, or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Render a diagram file through a running server
    Render {
        /// Mermaid source file
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Svg)]
        format: OutputFormat,

        /// Output file (defaults to the input name with the format's extension)
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        options: OptionArgs,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Watch a diagram file and re-render it over the live channel
    Live {
        /// Mermaid source file
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Png)]
        format: OutputFormat,

        /// Output file (defaults to the input name with the format's extension)
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        options: OptionArgs,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Manage the server's artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,

        #[command(flatten)]
        server: ServerArgs,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove every cached artifact
    Clear,

    /// Remove the artifacts cached under one key
    Delete {
        /// 64-character cache key
        key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Svg,
    Png,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Svg => Format::Svg,
            OutputFormat::Png => Format::Png,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Server base URL, including any context path
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,
}

#[derive(Debug, Clone, Args)]
pub struct OptionArgs {
    /// default|dark|forest|neutral
    #[arg(long)]
    pub theme: Option<String>,

    /// white|transparent|#hexcolor
    #[arg(long = "bg")]
    pub background: Option<String>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,
}

impl From<OptionArgs> for RenderOptions {
    fn from(args: OptionArgs) -> Self {
        RenderOptions {
            theme: args.theme,
            background_color: args.background,
            width: args.width,
            height: args.height,
        }
    }
}

/// Default output path: the input with the format's extension.
pub fn output_path(input: &std::path::Path, out: Option<PathBuf>, format: Format) -> PathBuf {
    out.unwrap_or_else(|| input.with_extension(format.as_str()))
}
