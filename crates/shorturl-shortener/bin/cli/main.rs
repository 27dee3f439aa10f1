mod cli;

use crate::cli::{Command, LogFormatArg, StorageBackendArg, CLI};
use clap::Parser;
use shorturl_core::{OwnerId, Repository, ShortKey};
use shorturl_generator::{Generator, RandomGenerator};
use shorturl_shortener::{ShortenerError, ShortenerService, ShortenerSettings};
use shorturl_storage::{Journal, MemoryRepository, PostgresRepository};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = CLI::try_parse()?;
    init_tracing(&config.log_level, config.log_format);

    info!(
        storage_backend = %config.storage,
        base_url = %config.base_url,
        "starting shorturl"
    );

    let owner = OwnerId::new(config.user.clone());
    let generator = RandomGenerator::new(config.key_length)?;
    let settings = ShortenerSettings::builder()
        .base_url(config.base_url.clone())
        .delete_workers(config.delete_workers)
        .build();

    match config.storage {
        StorageBackendArg::Memory => {
            warn!("memory storage is discarded when the command exits");
            let service = ShortenerService::new(MemoryRepository::new(), generator, settings);
            run(&service, &owner, config.command, config.storage).await
        }
        StorageBackendArg::File => {
            let journal = Journal::new(&config.file_storage_path);
            let service =
                ShortenerService::new(MemoryRepository::with_journal(journal), generator, settings);
            service.repository().bootstrap().await?;

            match config.command {
                Command::Compact => {
                    service.repository().compact().await?;
                    println!(
                        "compacted {} records in {}",
                        service.repository().len(),
                        config.file_storage_path.display()
                    );
                    Ok(())
                }
                command => run(&service, &owner, command, config.storage).await,
            }
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .ok_or("database dsn is required when storage backend is postgres")?;
            let service =
                ShortenerService::new(PostgresRepository::connect(&dsn).await?, generator, settings);
            service.repository().bootstrap().await?;

            match config.command {
                Command::Stats => {
                    let stats = service.stats().await?;
                    println!("urls: {}\nusers: {}", stats.urls, stats.users);
                    Ok(())
                }
                command => run(&service, &owner, command, config.storage).await,
            }
        }
    }
}

fn init_tracing(level: &str, format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormatArg::Text => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}

async fn run<R: Repository, G: Generator>(
    service: &ShortenerService<R, G>,
    owner: &OwnerId,
    command: Command,
    backend: StorageBackendArg,
) -> Result<(), BoxError> {
    match command {
        Command::Shorten { url, key } => {
            let result = match key {
                Some(key) => {
                    let key = ShortKey::new(key)?;
                    service.shorten_with_key(owner, &key, &url).await
                }
                None => service.shorten(owner, &url).await,
            };
            match result {
                Ok(short) => println!("{}", short.url),
                // Reported like a success, with the existing short URL.
                Err(ShortenerError::UrlConflict(existing)) => {
                    println!("{}", existing.url);
                    warn!(key = %existing.key, "url was already shortened");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Resolve { key } => {
            let key = ShortKey::from_url_or_key(&key)?;
            println!("{}", service.resolve(&key).await?);
        }
        Command::List => {
            for url in service.user_urls(owner).await? {
                let marker = if url.deleted { " (deleted)" } else { "" };
                println!("{}\t{}{}", url.short_url.url, url.original_url, marker);
            }
        }
        Command::Delete { keys } => {
            let cancel = CancellationToken::new();
            let interrupt = tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                }
            });

            let report = service
                .delete_urls(owner, keys.as_slice(), &cancel)
                .drain()
                .await;
            interrupt.abort();

            for input in &report.rejected {
                eprintln!("{input}: not a short key or short url");
            }
            for (key, error) in &report.failed {
                eprintln!("{key}: {error}");
            }
            println!(
                "deleted: {}, failed: {}, skipped: {}, rejected: {}",
                report.succeeded,
                report.failed.len(),
                report.skipped(),
                report.rejected.len()
            );
        }
        Command::Stats | Command::Compact => {
            return Err(format!("command is not supported by the {backend} backend").into());
        }
    }

    Ok(())
}
