pub mod checklist;
pub mod config;
pub mod deploy;
pub mod impact;
pub mod serve;
pub mod stories;

use shipgate_client::{ClientConfig, HttpStoryService};
use shipgate_core::config::Config;
use std::future::Future;

/// Run `fut` to completion on a fresh multi-threaded runtime.
pub fn block_on<F, T, E>(fut: F) -> anyhow::Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut).map_err(Into::into)
}

pub fn service(config: &Config) -> anyhow::Result<HttpStoryService> {
    Ok(HttpStoryService::new(&ClientConfig::from(config))?)
}
