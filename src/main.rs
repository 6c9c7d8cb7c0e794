mod catalog;
mod colors;
mod config;
mod connection;
mod engine;
mod error;
mod http;
mod log;
mod metrics;
mod verify;


use catalog::MemoryCatalog;
use engine::Engine;

fn main() {
    metrics::init();
    let c = config::load_config();
    log::init(c.engine.logging, &c.engine.log_level);

    let catalog = match MemoryCatalog::load(&c.catalog.path) {
        Ok(cat) => cat,
        Err(e) => {
            tracing::error!("Catalog failed: {e}");
            std::process::exit(1);
        }
    };
    let tests = if c.catalog.tests.is_empty() { catalog.test_ids() } else { c.catalog.tests.clone() };

    let mut engine = match Engine::new(c.engine, catalog) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Engine failed: {e}");
            std::process::exit(1);
        }
    };

    log::separator();
    for id in tests {
        match engine.run(id) {
            Ok(s) => {
                log::summary(id, &s);
                engine
                    .catalog()
                    .records()
                    .iter()
                    .filter(|r| r.test_id == id && r.outcome.completed && !r.outcome.passed)
                    .for_each(log::failure);
            }
            Err(e) => {
                tracing::error!("Run of test {id} aborted: {e}");
                std::process::exit(1);
            }
        }
    }
    log::separator();
    tracing::info!(metrics = %metrics::snapshot_json(), "done");
}
