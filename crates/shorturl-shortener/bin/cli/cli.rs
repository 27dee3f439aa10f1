use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const BASE_URL_ENV: &str = "BASE_URL";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const STORAGE_BACKEND_ENV: &str = "SHORTURL_STORAGE";
pub const KEY_LENGTH_ENV: &str = "SHORTURL_KEY_LENGTH";
pub const DELETE_WORKERS_ENV: &str = "SHORTURL_DELETE_WORKERS";
pub const USER_ENV: &str = "SHORTURL_USER";
pub const LOG_LEVEL_ENV: &str = "SHORTURL_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "SHORTURL_LOG_FORMAT";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/short-url-db.json";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "memory")]
    Memory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Memory => write!(f, "memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "shorturl", about = "Shorten, resolve and delete URLs")]
pub struct CLI {
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::File
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, default_value = DEFAULT_FILE_STORAGE_PATH)]
    pub file_storage_path: PathBuf,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    #[arg(long, env = KEY_LENGTH_ENV, default_value_t = shorturl_generator::random::DEFAULT_KEY_LENGTH)]
    pub key_length: usize,

    #[arg(long, env = DELETE_WORKERS_ENV, default_value_t = 1)]
    pub delete_workers: usize,

    /// Owner recorded on new URLs and checked on deletes.
    #[arg(long, env = USER_ENV, default_value = "")]
    pub user: String,

    /// Used when `RUST_LOG` is not set.
    #[arg(long, env = LOG_LEVEL_ENV, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten a URL under a generated key, or under `--key`.
    Shorten {
        url: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Print the URL behind a short key or short URL.
    Resolve { key: String },
    /// List the URLs owned by `--user`.
    List,
    /// Delete short keys or short URLs owned by `--user`.
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print URL and user counts (postgres only).
    Stats,
    /// Rewrite the journal to one line per record (file only).
    Compact,
}
