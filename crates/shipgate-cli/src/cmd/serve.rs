use shipgate_core::config::Config;
use shipgate_server::AppState;

/// Serve the HTTP API until Ctrl-C. `port` overrides `server.port`.
pub fn run(config: &Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);
    let state = AppState::from_config(config)?;

    super::block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        let actual_port = listener.local_addr()?.port();
        println!(
            "shipgate → http://localhost:{actual_port}  (upstream {})",
            config.api_base
        );
        shipgate_server::serve_on(state, listener).await
    })
}
