//! Artifact Cache CLI Client
//!
//! Command-line interface for fetching and uploading versions.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use artifactcache::{CacheClient, FileType, Result, VersionKey};
use clap::{Parser, Subcommand, ValueEnum};

/// Artifact Cache CLI
#[derive(Parser, Debug)]
#[command(name = "artifactcache-cli")]
#[command(about = "CLI for the artifact cache server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8126")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one file of a version
    Get {
        /// Version as <guid>-<hash>
        version: VersionKey,

        /// Which file to fetch
        #[arg(short = 't', long = "type", value_enum, default_value = "asset")]
        file_type: Kind,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a version in one transaction
    Put {
        /// Version as <guid>-<hash>
        version: VersionKey,

        /// Asset file
        #[arg(long)]
        asset: Option<PathBuf>,

        /// Metadata (info) file
        #[arg(long)]
        info: Option<PathBuf>,

        /// Resource file
        #[arg(long)]
        resource: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Asset,
    Info,
    Resource,
}

impl From<Kind> for FileType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Asset => FileType::Asset,
            Kind::Info => FileType::Metadata,
            Kind::Resource => FileType::Resource,
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut client = CacheClient::connect(&args.server)?;

    match args.command {
        Commands::Get {
            version,
            file_type,
            output,
        } => match client.get(file_type.into(), &version)? {
            Some(data) => match output {
                Some(path) => fs::write(path, data)?,
                None => std::io::stdout().write_all(&data)?,
            },
            None => eprintln!("(not found)"),
        },
        Commands::Put {
            version,
            asset,
            info,
            resource,
        } => {
            let mut files = Vec::new();
            for (file_type, path) in [
                (FileType::Asset, asset),
                (FileType::Metadata, info),
                (FileType::Resource, resource),
            ] {
                if let Some(path) = path {
                    files.push((file_type, fs::read(path)?));
                }
            }
            let refs: Vec<(FileType, &[u8])> =
                files.iter().map(|(t, d)| (*t, d.as_slice())).collect();
            client.put_version(&version, &refs)?;
            eprintln!("uploaded {} file(s) for {}", refs.len(), version);
        }
    }

    client.quit()
}
