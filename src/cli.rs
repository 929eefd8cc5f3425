// ============================================================================
// pixelsel CLI - headless select / transform / commit on a PNG
// ============================================================================
//
// Usage examples:
//   pixelsel -i sprite.png -o out.png --rect 4,4,16,16 --rotate 90
//   pixelsel -i sprite.png -o out.png --rect 0,0,8,8 --scale 2 --interp smooth2x
//   pixelsel -i sprite.png -o out.png --rect 2,2,6,6 --move 10,-2
//   pixelsel -i sprite.png --rect 0,0,8,8 --rotate 30 --outline hull --print-outline
//
// The pipeline drives the same SelectionController an interactive host uses:
// select, scale, rotate, move, commit. Scale happens before rotation, which
// happens before translation.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::{CanvasState, PixelRect};
use crate::components::selection_tool::SelectionController;
use crate::config::SelectionConfig;
use crate::error::{Result, SelectionError};
use crate::ops::outline::OutlineMode;
use crate::ops::resample::Interpolation;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Select a region of an image, transform it like the interactive tool would,
/// and write the committed result.
#[derive(Parser, Debug)]
#[command(
    name = "pixelsel",
    version,
    about = "Headless pixel-art selection transforms",
    long_about = "Lift a rectangular selection out of a PNG, scale/rotate/move it with\n\
                  pixel-art aware resampling, stamp it back and save the result.\n\n\
                  Example:\n  \
                  pixelsel -i sprite.png -o out.png --rect 4,4,16,16 --rotate 90"
)]
pub struct CliArgs {
    /// Input PNG.
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Output PNG. When omitted nothing is written (useful with --print-outline).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Selection rectangle. Defaults to the whole image.
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_rect, allow_hyphen_values = true)]
    pub rect: Option<PixelRect>,

    /// Rotation in degrees, clockwise.
    #[arg(long, value_name = "DEG", allow_hyphen_values = true)]
    pub rotate: Option<f32>,

    /// Scale factor, uniform or per axis.
    #[arg(long, value_name = "S|SX,SY", value_parser = parse_scale)]
    pub scale: Option<(f32, f32)>,

    /// Translation in whole pixels.
    #[arg(long = "move", value_name = "DX,DY", value_parser = parse_offset, allow_hyphen_values = true)]
    pub offset: Option<(f32, f32)>,

    /// Resampling: nearest, bilinear, smooth2x, rotsprite.
    #[arg(long, value_name = "MODE")]
    pub interp: Option<Interpolation>,

    /// Outline algorithm: trace or hull.
    #[arg(long, value_name = "MODE")]
    pub outline: Option<OutlineMode>,

    /// JSON selection config; command-line options override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the final outline vertices, one "x y" pair per line.
    #[arg(long)]
    pub print_outline: bool,

    /// Session log file (default: the platform data directory).
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Debug-level logging and a summary line.
    #[arg(short, long)]
    pub verbose: bool,
}

/// What a run did, for `--verbose` and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub committed: bool,
    pub selected_pixels: usize,
    pub bounds: Option<PixelRect>,
    /// One vertex list per outline ring.
    pub outline: Vec<Vec<(f32, f32)>>,
    pub history_entries: usize,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match process(&args) {
        Ok(summary) => {
            if args.print_outline {
                for (i, ring) in summary.outline.iter().enumerate() {
                    if i > 0 {
                        println!();
                    }
                    for (x, y) in ring {
                        println!("{} {}", x, y);
                    }
                }
            }
            if args.verbose {
                println!(
                    "{} pixels selected, bounds {:?}, committed: {} ({:.0}ms)",
                    summary.selected_pixels,
                    summary.bounds,
                    summary.committed,
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load, select, transform, commit and (optionally) save.
pub fn process(args: &CliArgs) -> Result<RunSummary> {
    let mut config = match &args.config {
        Some(path) => SelectionConfig::load(path)?,
        None => SelectionConfig::default(),
    };
    if let Some(interp) = args.interp {
        config.interpolation = interp;
    }
    if let Some(mode) = args.outline {
        config.outline_mode = mode;
    }

    let img = image::open(&args.input)?.to_rgba8();
    log::info!("Loaded {} ({}x{})", args.input.display(), img.width(), img.height());
    let canvas = CanvasState::from_rgba_image(&img);
    let (width, height) = (canvas.width, canvas.height);
    let mut controller = SelectionController::with_config(canvas, width, height, config);

    let selected = match args.rect {
        Some(r) => controller.select_rect(r.x, r.y, r.width, r.height),
        None => controller.select_all(),
    };
    if !selected {
        return Err(SelectionError::InvalidArgument(format!(
            "selection {:?} does not overlap the {}x{} image",
            args.rect, width, height
        )));
    }

    if let Some((sx, sy)) = args.scale {
        controller.scale_by(sx, sy);
    }
    if let Some(deg) = args.rotate {
        controller.rotate_by(deg);
    }
    if let Some((dx, dy)) = args.offset {
        controller.translate_by(dx, dy);
    }
    controller.present();
    let committed = controller.commit();

    let summary = RunSummary {
        committed,
        selected_pixels: controller.mask().count(),
        bounds: controller.mask().bounds(),
        outline: controller
            .outline()
            .iter()
            .map(|ring| ring.points().iter().map(|p| (p.x, p.y)).collect())
            .collect(),
        history_entries: controller.host().history.undo_count(),
    };

    if let Some(out) = &args.output {
        let canvas = controller.into_host();
        let layer = canvas
            .active_layer()
            .ok_or_else(|| SelectionError::InvalidArgument("document has no layer to save".into()))?;
        layer.pixels.to_rgba_image().save(out)?;
        log::info!("Wrote {}", out.display());
    }

    Ok(summary)
}

// ============================================================================
// Argument parsers
// ============================================================================

fn parse_numbers(s: &str, what: &str) -> Result<Vec<f32>> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| SelectionError::InvalidArgument(format!("bad {} '{}'", what, s)))
        })
        .collect()
}

pub fn parse_rect(s: &str) -> Result<PixelRect> {
    match parse_numbers(s, "rectangle")?.as_slice() {
        [x, y, w, h] if *w >= 0.0 && *h >= 0.0 => Ok(PixelRect::new(*x as i32, *y as i32, *w as u32, *h as u32)),
        _ => Err(SelectionError::InvalidArgument(format!("expected X,Y,W,H, got '{}'", s))),
    }
}

pub fn parse_scale(s: &str) -> Result<(f32, f32)> {
    let pair = match parse_numbers(s, "scale")?.as_slice() {
        [u] => (*u, *u),
        [x, y] => (*x, *y),
        _ => return Err(SelectionError::InvalidArgument(format!("expected S or SX,SY, got '{}'", s))),
    };
    if pair.0 <= 0.0 || pair.1 <= 0.0 {
        return Err(SelectionError::InvalidArgument(format!("scale must be positive, got '{}'", s)));
    }
    Ok(pair)
}

pub fn parse_offset(s: &str) -> Result<(f32, f32)> {
    match parse_numbers(s, "offset")?.as_slice() {
        [dx, dy] => Ok((*dx, *dy)),
        _ => Err(SelectionError::InvalidArgument(format!("expected DX,DY, got '{}'", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_parsers() {
        assert_eq!(parse_rect("1,2,3,4").unwrap(), PixelRect::new(1, 2, 3, 4));
        assert_eq!(parse_rect("-2, 0, 5, 5").unwrap(), PixelRect::new(-2, 0, 5, 5));
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_rect("1,2,-3,4").is_err());
        assert_eq!(parse_scale("2").unwrap(), (2.0, 2.0));
        assert_eq!(parse_scale("1.5,0.5").unwrap(), (1.5, 0.5));
        assert!(parse_scale("0").is_err());
        assert_eq!(parse_offset("10,-2").unwrap(), (10.0, -2.0));
        assert!(parse_offset("x,1").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = CliArgs::try_parse_from([
            "pixelsel", "-i", "in.png", "--rect", "0,0,4,4", "--rotate", "-90", "--move", "-1,2", "--interp",
            "rotsprite", "--outline", "hull",
        ])
        .unwrap();
        assert_eq!(args.rect, Some(PixelRect::new(0, 0, 4, 4)));
        assert_eq!(args.rotate, Some(-90.0));
        assert_eq!(args.offset, Some((-1.0, 2.0)));
        assert_eq!(args.interp, Some(Interpolation::RotSprite));
        assert_eq!(args.outline, Some(OutlineMode::ConvexHull));
        assert!(CliArgs::try_parse_from(["pixelsel"]).is_err());
    }

    #[test]
    fn test_process_moves_block() {
        let dir = std::env::temp_dir();
        let input = dir.join(format!("pixelsel-cli-in-{}.png", std::process::id()));
        let output = dir.join(format!("pixelsel-cli-out-{}.png", std::process::id()));

        let mut img = RgbaImage::new(12, 12);
        for y in 0..4 {
            for x in 0..4 {
                img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        img.save(&input).unwrap();

        let args = CliArgs::try_parse_from([
            "pixelsel",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--rect",
            "0,0,4,4",
            "--move",
            "5,6",
        ])
        .unwrap();
        let summary = process(&args).unwrap();
        assert!(summary.committed);
        assert_eq!(summary.bounds, Some(PixelRect::new(5, 6, 4, 4)));
        assert_eq!(summary.history_entries, 1);

        let out = image::open(&output).unwrap().to_rgba8();
        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(*out.get_pixel(5, 6), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(8, 9), Rgba([255, 0, 0, 255]));

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn test_process_rejects_offscreen_rect() {
        let dir = std::env::temp_dir();
        let input = dir.join(format!("pixelsel-cli-off-{}.png", std::process::id()));
        RgbaImage::new(4, 4).save(&input).unwrap();
        let args = CliArgs::try_parse_from(["pixelsel", "-i", input.to_str().unwrap(), "--rect", "10,10,2,2"]).unwrap();
        assert!(matches!(process(&args), Err(SelectionError::InvalidArgument(_))));
        let _ = std::fs::remove_file(&input);
    }
}
