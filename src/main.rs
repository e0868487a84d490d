use std::path::PathBuf;

use anyhow::Context;
use bevy::prelude::*;
use clap::Parser;

use splash_cursor::{SplashConfig, SplashCursorPlugin};

#[derive(Parser, Debug)]
#[command(version, about = "Pointer-driven fluid splash effect")]
struct Cli {
    /// RON config file
    #[arg(long, default_value = "assets/config/splash.ron")]
    config: PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
fn load_config(cli: &Cli) -> anyhow::Result<SplashConfig> {
    SplashConfig::load_from_file(&cli.config)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("loading {}", cli.config.display()))
}

// No filesystem on the web: the shipped config is embedded.
#[cfg(target_arch = "wasm32")]
fn load_config(_cli: &Cli) -> anyhow::Result<SplashConfig> {
    ron::from_str(include_str!("../assets/config/splash.ron")).context("parsing embedded config")
}

fn main() -> anyhow::Result<()> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    let mut app = App::new();
    app.add_plugins(
        DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: cfg.window.title.clone(),
                resolution: (cfg.window.width, cfg.window.height).into(),
                resizable: true,
                transparent: cfg.fluid.transparent,
                ..default()
            }),
            ..default()
        }),
    );
    for warning in cfg.validate() {
        warn!("config: {warning}");
    }
    let back = cfg.fluid.back_color();
    let clear = if cfg.fluid.transparent {
        Color::NONE
    } else {
        Color::srgb(back.x, back.y, back.z)
    };
    app.insert_resource(ClearColor(clear))
        .insert_resource(cfg)
        .add_plugins(SplashCursorPlugin)
        .run();
    Ok(())
}
