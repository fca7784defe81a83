mod cli;

use anyhow::{Context, Result};
use chain::{resolve_pass_sizes, Dimensions};
use preset::{load_preset, FilterMode, PassScale, ScaleType, ShaderPreset};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = cli::parse();
    initialise_tracing();

    let mut preset = match &cli.preset {
        Some(path) => load_preset(path)
            .with_context(|| format!("failed to load preset {}", path.display()))?,
        None => ShaderPreset::single_pass(None),
    };

    let issues = preset.validate();
    for issue in &issues {
        println!("warning: {issue}");
    }
    if cli.check {
        if issues.is_empty() {
            println!("preset is valid");
        }
        return Ok(());
    }
    preset.normalize();

    let frame = Dimensions::new(cli.frame.0, cli.frame.1);
    let source = Dimensions::new(
        frame.width.saturating_mul(cli.base_scale.max(1)),
        frame.height.saturating_mul(cli.base_scale.max(1)),
    );
    let viewport = Dimensions::new(cli.viewport.0, cli.viewport.1);

    let sizes = resolve_pass_sizes(&preset, source, viewport)
        .context("failed to resolve pass sizes")?;

    println!("frame {frame}, source {source}, viewport {viewport}");
    println!("{} pass chain:", preset.passes.len());
    for (index, (pass, size)) in preset.passes.iter().zip(&sizes).enumerate() {
        let shader = pass
            .shader
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "(pass-through)".to_string());
        let terminal = index + 1 == preset.passes.len();
        let sink = if terminal { " -> display" } else { "" };
        println!(
            "  #{index:<2} {size:<11} {:<8} scale={:<24} {shader}{sink}",
            describe_filter(pass.filter),
            pass.scale
                .as_ref()
                .map(describe_scale)
                .unwrap_or_else(|| "(unset)".to_string()),
        );
    }

    if !preset.textures.is_empty() {
        println!("lookup textures:");
        for texture in &preset.textures {
            println!("  {:<16} {}", texture.id, texture.path.display());
        }
    }
    if !preset.imports.is_empty() {
        println!("dynamic imports:");
        for import in &preset.imports {
            println!("  {}", import.name);
        }
    }

    Ok(())
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn describe_filter(filter: FilterMode) -> &'static str {
    match filter {
        FilterMode::Unspecified => "default",
        FilterMode::Linear => "linear",
        FilterMode::Nearest => "nearest",
    }
}

fn describe_scale(scale: &PassScale) -> String {
    let axis = |scale_type: ScaleType, factor: f32| match scale_type {
        ScaleType::Input => format!("input*{factor}"),
        ScaleType::Source => format!("source*{factor}"),
        ScaleType::Viewport => format!("viewport*{factor}"),
        ScaleType::Absolute => format!("{}px", factor as u32),
    };
    let x = axis(scale.type_x, scale.factor_x);
    let y = axis(scale.type_y, scale.factor_y);
    if x == y {
        x
    } else {
        format!("{x}, {y}")
    }
}
