use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use peakprint::{erase, index_folder, search};

#[derive(Parser)]
#[command(
    name = "peakprint",
    about = "Index audio files and recognize clips against them",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint every mp3 file in a folder
    Index {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Rank indexed songs against an audio clip
    Search {
        #[arg(value_name = "AUDIO_FILE")]
        query_file: PathBuf,

        #[arg(short, long, value_name = "DB_PATH")]
        path: PathBuf,

        #[arg(short, long, default_value = "10")]
        rank: usize,
    },

    /// Remove every indexed song
    Erase {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

const DEFAULT_DB_PATH: &str = "db.db3";
const DEFAULT_FOLDER_DB_PATH: &str = ".db";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Index { path } => {
            let db_folder_path = path.join(DEFAULT_FOLDER_DB_PATH);
            if !db_folder_path.exists() {
                std::fs::create_dir_all(&db_folder_path)?;
            }

            index_folder(path, &db_folder_path.join(DEFAULT_DB_PATH))
        }

        Commands::Search {
            query_file,
            path,
            rank,
        } => {
            let db_path = path.join(DEFAULT_FOLDER_DB_PATH).join(DEFAULT_DB_PATH);
            search(query_file, &db_path, *rank)
        }

        Commands::Erase { path } => {
            let db_path = path.join(DEFAULT_FOLDER_DB_PATH).join(DEFAULT_DB_PATH);
            erase(&db_path)
        }
    }
}
