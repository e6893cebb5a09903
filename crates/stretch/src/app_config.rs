//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::bulk::BulkConfig;
use crate::transport::ConnectionConfig;

/// 📦 The AppConfig: where the cluster lives, and how hard to hit it with bulk requests.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// 📡 URL, auth, timeouts, gzip.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// 📦 Batch shape and pace for the bulk indexer.
    #[serde(default)]
    pub bulk: BulkConfig,
}

/// 🚀 Load the config from `STRETCH_*` env vars, plus a TOML file if one is given.
///
/// 📐 DESIGN NOTE:
///   - `None`  → env vars only. No file. No assumptions.
///   - `Some`  → env vars + TOML file, merged. TOML wins on conflicts.
///   - Nested keys use a double underscore: `STRETCH_BULK__MAX_DOCS=500`.
///
/// 💀 Returns an error if config is unparseable, with context that names the culprit.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("STRETCH_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (STRETCH_*). \
             The file exists in our hearts, but apparently not in a shape serde understands.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (STRETCH_*). \
                 No file was provided, this one's all on the environment."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .bulk
        .validate()
        .context("💀 The bulk section parsed, but the numbers do not add up to a working pipeline")?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::TimerGate;
    use figment::Jail;
    use std::io::Write;

    #[test]
    fn the_one_where_the_toml_file_sets_every_knob() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 temp file. The filesystem said 'new phone who dis'.");
        write!(
            file,
            r#"
            [connection]
            url = "https://search.internal:9243"
            api_key = "abc123"
            gzip = true

            [bulk]
            max_buffer_bytes = 2048
            max_docs = 3
            flush_interval_secs = 60
            workers = 8
            timer_gate = "document_age"
            "#
        )
        .expect("💀 write test config");

        let app_config = load_config(Some(file.path())).expect("💀 config should parse");
        assert_eq!(app_config.connection.url, "https://search.internal:9243");
        assert_eq!(app_config.connection.api_key.as_deref(), Some("abc123"));
        assert!(app_config.connection.gzip);
        assert_eq!(app_config.bulk.max_buffer_bytes, 2048);
        assert_eq!(app_config.bulk.max_docs, 3);
        assert_eq!(app_config.bulk.flush_interval_secs, 60);
        assert_eq!(app_config.bulk.workers, 8);
        assert_eq!(app_config.bulk.timer_gate, TimerGate::DocumentAge);
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let app_config: AppConfig = Figment::new()
            .merge(Toml::string(""))
            .extract()
            .expect("💀 empty config should still extract");
        assert_eq!(app_config.connection.url, "http://localhost:9200");
        assert_eq!(app_config.bulk.max_docs, 100);
        assert_eq!(app_config.bulk.max_buffer_bytes, 1_048_576);
        assert_eq!(app_config.bulk.flush_interval_secs, 5);
    }

    #[test]
    fn the_one_where_env_vars_fill_in_and_the_file_wins() {
        Jail::expect_with(|jail| {
            jail.set_env("STRETCH_CONNECTION__URL", "http://from-env:9200");
            jail.set_env("STRETCH_BULK__MAX_DOCS", "42");
            jail.set_env("STRETCH_BULK__WORKERS", "2");
            jail.create_file("stretch.toml", "[bulk]\nworkers = 6\n")?;

            let app_config =
                load_config(Some(Path::new("stretch.toml"))).map_err(|err| format!("{err:#}"))?;
            assert_eq!(app_config.connection.url, "http://from-env:9200");
            assert_eq!(app_config.bulk.max_docs, 42);
            assert_eq!(app_config.bulk.workers, 6, "TOML wins on conflicts");
            Ok(())
        });
    }

    #[test]
    fn the_one_where_zero_max_docs_is_caught_at_load_time() {
        Jail::expect_with(|jail| {
            jail.create_file("stretch.toml", "[bulk]\nmax_docs = 0\n")?;
            let err = load_config(Some(Path::new("stretch.toml")))
                .expect_err("💀 zero max_docs must not load");
            assert!(format!("{err:#}").contains("max_docs"));
            Ok(())
        });
    }
}
