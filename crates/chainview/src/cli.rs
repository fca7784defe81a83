use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "chainview",
    author,
    version,
    about = "Inspect shader preset pass chains without a GPU"
)]
pub struct Cli {
    /// Preset file to inspect; omit for the single pass-through chain.
    #[arg(value_name = "PRESET")]
    pub preset: Option<PathBuf>,

    /// Emulated frame size fed into the first pass.
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "320x240", value_parser = parse_dimensions)]
    pub frame: (u32, u32),

    /// Display viewport the terminal pass renders into.
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "1920x1080", value_parser = parse_dimensions)]
    pub viewport: (u32, u32),

    /// Multiplier applied to the frame size to form the source texture size.
    #[arg(long, value_name = "FACTOR", default_value_t = 2)]
    pub base_scale: u32,

    /// Report validation findings and exit without resolving sizes.
    #[arg(long)]
    pub check: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_dimensions(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimension_pairs() {
        assert_eq!(parse_dimensions("320x240").unwrap(), (320, 240));
        assert_eq!(parse_dimensions(" 1920X1080 ").unwrap(), (1920, 1080));
        assert!(parse_dimensions("320").is_err());
        assert!(parse_dimensions("0x240").is_err());
        assert!(parse_dimensions("320xtall").is_err());
    }
}
