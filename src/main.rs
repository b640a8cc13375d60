use edgeserve::app::App;
use edgeserve::config::Config;
use edgeserve::server::Engine;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let addr = cfg.socket_addr()?;
    let app = App::from_config(&cfg)?;

    let mut engine = Engine::start(addr, cfg.max_events)?;
    engine.set_write_timeout(cfg.write_timeout());
    engine.register_worker_pool(cfg.worker_count(), cfg.buffer_size, app)?;
    let shutdown = engine.shutdown_handle();
    tracing::info!("Listening on {}", engine.local_addr());

    let mut event_loop = tokio::task::spawn_blocking(move || engine.run_loop());

    tokio::select! {
        res = &mut event_loop => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.shutdown();
            event_loop.await??;
        }
    }

    Ok(())
}
