// Configuration loading, validation, and default generation
use serde::Deserialize;
use std::fs;

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: Eng,
    pub catalog: Cat,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct Eng {
    pub target_addr: String,
    pub buffer_size: usize,
    pub max_connections: usize,
    pub poll_timeout_ms: u64,
    /// 0 disables idle eviction.
    pub idle_timeout_ms: u64,
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub log_level: String,
    pub logging: bool,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct Cat {
    pub path: String,
    /// Tests to run; empty runs every test in the catalog.
    pub tests: Vec<u64>,
}

impl Default for Eng {
    fn default() -> Self {
        Eng {
            target_addr: "127.0.0.1:8080".to_string(),
            buffer_size: 8192,
            max_connections: 256,
            poll_timeout_ms: 100,
            idle_timeout_ms: 30_000,
            max_header_size: 65_536,
            max_body_size: 16 * 1024 * 1024,
            log_level: "info".to_string(),
            logging: true,
        }
    }
}

impl Default for Cat {
    fn default() -> Self {
        Cat { path: "catalog.toml".to_string(), tests: Vec::new() }
    }
}

impl Eng {
    pub fn validate(&mut self) -> bool {
        let mut valid = true;

        if self.target_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!("target_addr '{}' is not a valid address (expected ip:port)", self.target_addr);
            valid = false;
        }

        if self.buffer_size < 1024 {
            tracing::warn!("buffer_size too small ({}), using 1024", self.buffer_size);
            self.buffer_size = 1024;
        }
        if self.max_connections == 0 {
            tracing::warn!("max_connections is 0, using 256");
            self.max_connections = 256;
        }
        if self.max_connections > 50_000 {
            tracing::warn!("max_connections very high ({}), may exhaust file descriptors", self.max_connections);
        }
        if self.poll_timeout_ms == 0 {
            self.poll_timeout_ms = 100;
        }
        if self.idle_timeout_ms != 0 && self.idle_timeout_ms < self.poll_timeout_ms {
            tracing::warn!(
                "idle_timeout_ms ({}) < poll_timeout_ms ({}), idle connections are only swept once per wait",
                self.idle_timeout_ms, self.poll_timeout_ms
            );
        }
        if self.max_header_size == 0 {
            self.max_header_size = 65_536;
        }
        if self.max_body_size == 0 {
            self.max_body_size = 16 * 1024 * 1024;
        }

        valid
    }
}

fn atomic_write(path: &str, content: &str) -> std::io::Result<()> {
    let tmp = format!("{path}.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load_config() -> Config {
    let p = path();
    let mut cfg = match fs::read_to_string(&p) {
        Ok(txt) => match toml::from_str(&txt) {
            Ok(c) => {
                tracing::info!("Loaded {p}");
                c
            }
            Err(e) => {
                tracing::error!("Parse error {p}: {e}");
                tracing::warn!("Using defaults");
                Config::default()
            }
        },
        Err(_) => {
            let cfg = Config::default();
            if atomic_write(&p, &generate_config(&cfg)).is_ok() {
                tracing::info!("Generated {p}");
            } else {
                tracing::warn!("No config at '{p}', using defaults");
            }
            cfg
        }
    };
    if !cfg.engine.validate() {
        let fallback = Eng::default().target_addr;
        tracing::warn!("target_addr invalid, using {fallback}");
        cfg.engine.target_addr = fallback;
    }
    cfg
}

pub fn generate_config(cfg: &Config) -> String {
    let e = &cfg.engine;
    let mut doc = toml::Table::new();
    let mut eng = toml::Table::new();
    eng.insert("target_addr".into(), toml::Value::String(e.target_addr.clone()));
    eng.insert("buffer_size".into(), toml::Value::Integer(e.buffer_size as i64));
    eng.insert("max_connections".into(), toml::Value::Integer(e.max_connections as i64));
    eng.insert("poll_timeout_ms".into(), toml::Value::Integer(e.poll_timeout_ms as i64));
    eng.insert("idle_timeout_ms".into(), toml::Value::Integer(e.idle_timeout_ms as i64));
    eng.insert("max_header_size".into(), toml::Value::Integer(e.max_header_size as i64));
    eng.insert("max_body_size".into(), toml::Value::Integer(e.max_body_size as i64));
    eng.insert("log_level".into(), toml::Value::String(e.log_level.clone()));
    eng.insert("logging".into(), toml::Value::Boolean(e.logging));
    doc.insert("engine".into(), toml::Value::Table(eng));
    let mut cat = toml::Table::new();
    cat.insert("path".into(), toml::Value::String(cfg.catalog.path.clone()));
    cat.insert(
        "tests".into(),
        toml::Value::Array(cfg.catalog.tests.iter().map(|t| toml::Value::Integer(*t as i64)).collect()),
    );
    doc.insert("catalog".into(), toml::Value::Table(cat));
    match toml::to_string_pretty(&doc) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Config serialization failed: {e}");
            String::new()
        }
    }
}

fn path() -> String {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| "engine.toml".to_string())
}
