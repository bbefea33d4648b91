use anyhow::Context;
use clap::Args;
use remedy_core::{
    config::{ColorMetafieldConfig, Config, MetafieldConfig},
    io, paths,
};
use std::path::Path;

#[derive(Args)]
pub struct InitArgs {
    /// Ledger name for this campaign, e.g. venture-design
    #[arg(long)]
    pub scope: String,

    /// Vendor whose products are remediated
    #[arg(long)]
    pub vendor: String,

    /// Set variant price to unit cost × MULTIPLIER
    #[arg(long, value_name = "MULTIPLIER")]
    pub price_multiplier: Option<f64>,

    /// Write unit cost × --metafield-multiplier into this variant metafield
    #[arg(long, value_name = "NAMESPACE.KEY", requires = "metafield_multiplier")]
    pub cost_metafield: Option<String>,

    #[arg(long, value_name = "MULTIPLIER", requires = "cost_metafield")]
    pub metafield_multiplier: Option<f64>,

    /// Translate this product color metafield into Danish
    #[arg(
        long,
        value_name = "NAMESPACE.KEY",
        num_args = 0..=1,
        default_missing_value = "custom.farve"
    )]
    pub color_metafield: Option<String>,

    /// Color written when a product names no known color (default: Natur)
    #[arg(long, value_name = "COLOR", requires = "color_metafield")]
    pub color_fallback: Option<String>,

    /// Leave lead images alone
    #[arg(long)]
    pub no_lead_image: bool,

    /// Overwrite an existing config.yaml
    #[arg(long)]
    pub force: bool,
}

pub fn run(root: &Path, args: InitArgs) -> anyhow::Result<()> {
    println!("Initializing remedy in: {}", root.display());

    for dir in [paths::REMEDY_DIR, paths::PROGRESS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if config_path.exists() && !args.force {
        println!("  exists:  {}", paths::CONFIG_FILE);
        return Ok(());
    }

    let config = build_config(args);
    config
        .ensure_valid()
        .context("refusing to write config")?;
    config.save(root).context("failed to write config.yaml")?;
    println!("  created: {}", paths::CONFIG_FILE);

    println!("\nNext: export SHOPIFY_DOMAIN and SHOPIFY_TOKEN, then `remedy run` to preview.");
    Ok(())
}

fn build_config(args: InitArgs) -> Config {
    let mut config = Config::new(args.scope, args.vendor);
    config.remediation.swap_lead_images = !args.no_lead_image;
    config.remediation.price_multiplier = args.price_multiplier;
    if let (Some(field), Some(multiplier)) = (args.cost_metafield, args.metafield_multiplier) {
        let (namespace, key) = split_metafield(field);
        config.remediation.cost_metafield = Some(MetafieldConfig {
            namespace,
            key,
            multiplier,
        });
    }
    if let Some(field) = args.color_metafield {
        let (namespace, key) = split_metafield(field);
        let mut color = ColorMetafieldConfig {
            namespace,
            key,
            ..ColorMetafieldConfig::default()
        };
        if let Some(fallback) = args.color_fallback {
            color.fallback = fallback;
        }
        config.remediation.color_metafield = Some(color);
    }
    config
}

/// `NAMESPACE.KEY`, or a bare key in the `custom` namespace.
fn split_metafield(field: String) -> (String, String) {
    match field.split_once('.') {
        Some((ns, key)) => (ns.to_string(), key.to_string()),
        None => ("custom".to_string(), field),
    }
}
