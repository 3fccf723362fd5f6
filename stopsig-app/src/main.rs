mod app;
mod participant;
pub use app::App;

use tracing_subscriber::{EnvFilter, fmt};

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let config_path = std::env::args().nth(1);
    let app = App::new(config_path.as_deref())?;
    app.run()?;

    Ok(())
}
