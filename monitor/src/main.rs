use crate::app::run_app;

mod app;
pub mod config;
mod daemon;
mod drivers;
mod error;
mod fleet;
mod machine;

fn init_logger() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    run_app().await
}
