use crate::Result;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const POSTGRES_PORT: u16 = 5432;
const READY_MESSAGE: &str = "database system is ready to accept connections";

#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(default = "shorturl".to_string(), setter(into))]
    database: String,
    #[builder(default = "shorturl".to_string(), setter(into))]
    username: String,
    #[builder(default = "shorturl".to_string(), setter(into))]
    password: String,
    #[builder(default = "17-alpine".to_string(), setter(into))]
    tag: String,
    /// Server-side connection limit; concurrency tests open many pools.
    #[builder(default = 100)]
    max_connections: u32,
    #[builder(default = Duration::from_secs(60))]
    startup_timeout: Duration,
}

impl PostgresConfig {
    /// Server flags trading durability for speed; the data is thrown away.
    fn server_args(&self) -> Vec<String> {
        [
            "postgres".to_string(),
            "-c".to_string(),
            "fsync=off".to_string(),
            "-c".to_string(),
            "synchronous_commit=off".to_string(),
            "-c".to_string(),
            "full_page_writes=off".to_string(),
            "-c".to_string(),
            format!("max_connections={}", self.max_connections),
        ]
        .into()
    }

    fn url(&self, host: &str, port: u16) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.username, self.password, host, port, self.database
        )
    }
}

/// Throwaway Postgres server for storage integration tests.
///
/// The image logs its readiness line once from the initdb bootstrap server
/// and again from the real one, so the first connection can still be
/// refused. Connect with a retry.
pub struct PostgresServer {
    container: ContainerAsync<GenericImage>,
    config: PostgresConfig,
}

impl PostgresServer {
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        let container = GenericImage::new("postgres", config.tag.as_str())
            .with_exposed_port(POSTGRES_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr(READY_MESSAGE))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .with_cmd(config.server_args())
            .with_startup_timeout(config.startup_timeout)
            .start()
            .await?;

        Ok(Self { container, config })
    }

    pub async fn host(&self) -> Result<String> {
        Ok(self.container.get_host().await?.to_string())
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(POSTGRES_PORT).await?)
    }

    /// Connection string for the configured database, TLS disabled.
    pub async fn database_url(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        Ok(self.config.url(&host, port))
    }

    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
