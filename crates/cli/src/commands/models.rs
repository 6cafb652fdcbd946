//! `localforge models`: list configured models.

use anyhow::Context;
use localforge_config::AppConfig;
use localforge_providers::{ModelInfo, available_models};

pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let models = available_models(&config);
    print!("{}", format_table(&models, &config.default_model));
    Ok(())
}

fn format_table(models: &[ModelInfo], default_model: &str) -> String {
    let name_width = models
        .iter()
        .map(|m| m.name.len())
        .max()
        .unwrap_or(0)
        .max("MODEL".len());
    let provider_width = models
        .iter()
        .map(|m| m.provider.len())
        .max()
        .unwrap_or(0)
        .max("PROVIDER".len());

    let mut out = format!(
        "  {:<name_width$}  {:<provider_width$}  KEY  NAME\n",
        "MODEL", "PROVIDER"
    );
    for model in models {
        let marker = if model.name == default_model { "*" } else { " " };
        let key = if model.has_key { "yes" } else { "no " };
        out.push_str(&format!(
            "{marker} {:<name_width$}  {:<provider_width$}  {key}  {}\n",
            model.name, model.provider, model.display_name
        ));
    }
    out
}
