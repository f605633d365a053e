use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    default_table_capacity: Option<u32>,
    elem_size_cap_divisor: Option<u32>,
    add_spin_limit: Option<u32>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    default_table_capacity: u32,
    elem_size_cap_divisor: u32,
    add_spin_limit: u32,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let default_table_capacity = cfg.default_table_capacity.unwrap_or(64);
    assert!(
        default_table_capacity > 0,
        "default_table_capacity must be > 0"
    );
    assert!(
        default_table_capacity <= 1 << 20,
        "default_table_capacity ({}) is implausibly large",
        default_table_capacity
    );

    let elem_size_cap_divisor = cfg.elem_size_cap_divisor.unwrap_or(4);
    assert!(elem_size_cap_divisor > 0, "elem_size_cap_divisor must be > 0");

    let add_spin_limit = cfg.add_spin_limit.unwrap_or(1 << 16);
    assert!(add_spin_limit > 0, "add_spin_limit must be > 0");

    ResolvedConfig {
        default_table_capacity,
        elem_size_cap_divisor,
        add_spin_limit,
    }
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const DEFAULT_TABLE_CAPACITY: u32 = {};\n\
         pub const ELEM_SIZE_CAP_DIVISOR: u32 = {};\n\
         pub const ADD_SPIN_LIMIT: u32 = {};\n",
        cfg.default_table_capacity, cfg.elem_size_cap_divisor, cfg.add_spin_limit,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/rtipc.toml", manifest_dir)
}

fn main() {
    println!("cargo:rerun-if-env-changed=RTIPC_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("RTIPC_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);

    let config: Config = match fs::read_to_string(&config_path) {
        Ok(content) => toml::from_str(&content).expect("failed to parse TOML config"),
        // Missing file means "all defaults"; only an explicit override must exist.
        Err(_) if env::var("RTIPC_CONFIG").is_err() => Config::default(),
        Err(e) => panic!("failed to read {}: {}", config_path, e),
    };

    let resolved = resolve_config(&config.config);
    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
