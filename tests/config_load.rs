// tests/config_load.rs
//
// Loading from disk (TOML and JSON), validation, env path resolution and hot reload.

use std::fs::{self, File};
use std::io::Write;
use std::time::{Duration, SystemTime};

use newsrelay::config::{HotReloadConfig, PipelineConfig, ENV_CONFIG_PATH};
use newsrelay::render::ContentStyle;
use newsrelay::router::MinTrust;
use serial_test::serial;
use tempfile::NamedTempFile;

const TOML: &str = r#"
[settings]
default_destination = "general"
concurrency = 3
send_delay_ms = 250
content_filtering = false

[[sources]]
name = "TechWire"
url = "https://techwire.test/rss"
category = "Technology"
trust_score = 0.9

[[sources]]
name = "BBC News"
url = "https://bbc.test/rss"

[[rules]]
destination = "tech"
categories = ["Technology"]
min_trust = "0.8"
style = "embed"
max_items = 3

[webhooks]
general = "https://discord.test/api/webhooks/1/a"
"#;

fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

fn bump_mtime(path: &std::path::Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn toml_file_loads_with_defaults_and_priors() {
    let f = write_temp(".toml", TOML);
    let cfg = PipelineConfig::load_from(f.path()).unwrap();

    assert_eq!(cfg.settings.default_destination, "general");
    assert_eq!(cfg.settings.concurrency, 3);
    assert_eq!(cfg.settings.send_delay(), Duration::from_millis(250));
    assert_eq!(cfg.settings.fetch_timeout(), Duration::from_secs(30));
    assert!(!cfg.settings.content_filtering);

    assert_eq!(cfg.sources.len(), 2);
    assert!(cfg.sources.iter().all(|s| s.active && !s.paused));
    // unset trust comes from the prior table
    assert!(cfg.source("bbc news").unwrap().trust_score.is_some());

    let rule = cfg.rule_for("tech").unwrap();
    assert_eq!(rule.style, ContentStyle::Embed);
    assert_eq!(rule.max_items, 3);
    assert_eq!(rule.min_trust, MinTrust::Text("0.8".into()));
    assert_eq!(cfg.webhooks.len(), 1);
}

#[test]
fn json_file_accepts_camel_case_rule_keys() {
    let json = r#"{
        "settings": { "default_destination": "general" },
        "sources": [ { "name": "Ledger", "url": "https://ledger.test/rss" } ],
        "rules": [ { "destination": "markets", "allowedCategories": ["Business"], "minTrust": 0.6, "maxItems": 4 } ]
    }"#;
    let f = write_temp(".json", json);
    let cfg = PipelineConfig::load_from(f.path()).unwrap();
    let rule = cfg.rule_for("markets").unwrap();
    assert_eq!(rule.categories, vec!["Business"]);
    assert_eq!(rule.max_items, 4);
    assert_eq!(rule.min_trust.threshold(), Some(0.6));
}

#[test]
fn classifier_settings_can_live_in_their_own_file() {
    let ai = write_temp(".json", r#"{ "enabled": true, "provider": "mock", "daily_limit": 7 }"#);
    let main = write_temp(
        ".toml",
        &format!(
            "[settings]\ndefault_destination = \"general\"\nai_config_path = \"{}\"\n\n[ai]\nprovider = \"openai\"\n",
            ai.path().display()
        ),
    );
    let cfg = PipelineConfig::load_from(main.path()).unwrap();
    assert!(cfg.ai.enabled);
    assert_eq!(cfg.ai.provider, "mock");
    assert_eq!(cfg.ai.daily_limit, 7);
    assert_eq!(cfg.ai.excerpt_chars, 1500);

    let missing = write_temp(
        ".toml",
        "[settings]\ndefault_destination = \"general\"\nai_config_path = \"/nonexistent/ai.json\"\n",
    );
    let err = PipelineConfig::load_from(missing.path()).unwrap_err();
    assert!(format!("{err:#}").contains("classifier config"));
}

#[test]
fn invalid_configs_are_rejected() {
    let no_default = write_temp(".toml", "[[sources]]\nname = \"A\"\nurl = \"u\"\n");
    assert!(PipelineConfig::load_from(no_default.path()).is_err());

    let broken = write_temp(".toml", "[settings\n");
    let err = PipelineConfig::load_from(broken.path()).unwrap_err();
    assert!(format!("{err:#}").contains("invalid TOML"));

    assert!(PipelineConfig::load_from(std::path::Path::new("/nonexistent/pipeline.toml")).is_err());
}

#[test]
#[serial]
fn env_var_selects_the_config_path() {
    let f = write_temp(".toml", TOML);
    std::env::set_var(ENV_CONFIG_PATH, f.path());
    let resolved = PipelineConfig::default_path();
    std::env::set_var(ENV_CONFIG_PATH, "/nonexistent/pipeline.toml");
    let missing = PipelineConfig::default_path();
    std::env::remove_var(ENV_CONFIG_PATH);

    assert_eq!(resolved.unwrap(), f.path());
    assert!(missing.is_err());
}

#[test]
fn hot_reload_picks_up_changes_and_keeps_last_good() {
    let f = write_temp(".toml", TOML);
    let hot = HotReloadConfig::open(f.path()).unwrap();
    assert_eq!(hot.current().sources.len(), 2);

    let edited = TOML.replace("concurrency = 3", "concurrency = 7");
    fs::write(f.path(), edited).unwrap();
    bump_mtime(f.path(), 5);
    let cfg = hot.current();
    assert_eq!(cfg.settings.concurrency, 7);

    fs::write(f.path(), "[settings\n").unwrap();
    bump_mtime(f.path(), 10);
    assert_eq!(hot.current().settings.concurrency, 7);

    // unchanged file hands back the same snapshot
    assert!(std::sync::Arc::ptr_eq(&hot.current(), &hot.current()));
}
