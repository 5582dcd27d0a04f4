//! iat: command-line front end for the image alignment toolkit.
//!
//! Reads images from disk, drives the panel load protocol and the
//! aligner, and writes encoded results back to disk.
//!
//! # Usage
//!
//! ```text
//! iat align reference.tif moving.png \
//!     --ref-point 10,10 --ref-point 90,10 --ref-point 90,90 --ref-point 10,90 \
//!     --mov-point 20,20 --mov-point 100,20 --mov-point 100,100 --mov-point 20,100 \
//!     --output aligned.png
//! iat sniff scan.tif photo.jpg
//! iat convert scan.tif scan.png
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use iat_pipeline::{
    Aligner, AlignmentReport, ByteFetcher, FetchedImage, IatConfig, IatError, ImageSource,
    PanelController, Point, SaveFormat,
};

/// Image alignment toolkit.
///
/// Aligns a moving image onto a reference image from paired control
/// points, and decodes or converts the supported formats (including
/// uncompressed TIFF).
#[derive(Parser)]
#[command(name = "iat", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). Logs go to stderr.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Warp MOVING onto REFERENCE using paired control points.
    Align(AlignArgs),
    /// Print the detected format of each file.
    Sniff {
        /// Files to inspect.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Decode an image and re-encode it.
    Convert {
        /// Input image.
        input: PathBuf,
        /// Output path.
        output: PathBuf,
        #[command(flatten)]
        output_format: OutputFormat,
    },
}

#[derive(Args)]
struct OutputFormat {
    /// Output format (png, jpeg, tiff). Defaults to the output
    /// extension, then png.
    #[arg(long)]
    format: Option<SaveFormat>,

    /// JPEG quality in 0.0..=1.0.
    #[arg(long, default_value_t = 0.92)]
    quality: f64,
}

#[derive(Args)]
struct AlignArgs {
    /// Reference image (stays fixed).
    reference: PathBuf,

    /// Moving image (warped onto the reference).
    moving: PathBuf,

    /// Control point on the reference image as `X,Y`. Repeat per point.
    #[arg(long = "ref-point", value_parser = parse_point, required = true)]
    ref_points: Vec<Point>,

    /// Control point on the moving image as `X,Y`, paired by order with
    /// `--ref-point`.
    #[arg(long = "mov-point", value_parser = parse_point, required = true)]
    mov_points: Vec<Point>,

    /// Where to write the aligned moving image.
    #[arg(long, short)]
    output: PathBuf,

    #[command(flatten)]
    output_format: OutputFormat,

    /// Print the alignment report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Number of pairs each fit uses (at least 4). Defaults to the
    /// number of pairs supplied.
    #[arg(long)]
    control_point_max: Option<usize>,

    /// Radius in image pixels within which a new point selects an
    /// existing one instead.
    #[arg(long, default_value_t = IatConfig::DEFAULT_HIT_RADIUS)]
    hit_radius: f64,

    /// Full toolkit config as a JSON string (overrides the individual
    /// config flags). Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Parse an `X,Y` pair.
fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let parse = |v: &str| -> Result<f64, String> {
        let value = v
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid coordinate {v:?}: {e}"))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("coordinate {v:?} is not finite"))
        }
    };
    Ok(Point::new(parse(x)?, parse(y)?))
}

/// Reads [`ImageSource::LocalFile`] sources from disk.
struct FileFetcher;

impl ByteFetcher for FileFetcher {
    async fn fetch(&self, source: &ImageSource) -> Result<FetchedImage, IatError> {
        let ImageSource::LocalFile { path } = source else {
            return Err(IatError::InvalidConfig(format!(
                "only local files can be read here, got {source:?}"
            )));
        };
        let bytes = std::fs::read(path)
            .map_err(|e| IatError::ImageDecode(format!("reading {}: {e}", path.display())))?;
        Ok(FetchedImage {
            bytes,
            filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        })
    }
}

/// Pick the output format: explicit flag, then extension, then PNG.
fn resolve_format(flag: Option<SaveFormat>, output: &Path) -> SaveFormat {
    flag.or_else(|| {
        output
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    })
    .unwrap_or_default()
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: logging disabled: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Align(args) => run_align(&args),
        Command::Sniff { files } => run_sniff(&files),
        Command::Convert {
            input,
            output,
            output_format,
        } => run_convert(&input, &output, &output_format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn config_from_args(args: &AlignArgs) -> Result<IatConfig, String> {
    let config: IatConfig = if let Some(ref json) = args.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        let pairs = args.ref_points.len().max(args.mov_points.len());
        IatConfig {
            control_point_max: args
                .control_point_max
                .unwrap_or_else(|| pairs.max(IatConfig::DEFAULT_CONTROL_POINT_MAX)),
            hit_radius: args.hit_radius,
            ..IatConfig::default()
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_panel(panel: &mut PanelController, path: &Path, points: &[Point]) -> Result<(), String> {
    let source = ImageSource::LocalFile {
        path: path.to_path_buf(),
    };
    pollster::block_on(panel.load(&FileFetcher, &source))
        .map_err(|e| format!("Error loading {}: {e}", path.display()))?;
    for &p in points {
        panel.place_point(p).map_err(|e| {
            format!(
                "Error placing point ({}, {}) on {}: {e}",
                p.x,
                p.y,
                path.display()
            )
        })?;
    }
    Ok(())
}

fn run_align(args: &AlignArgs) -> Result<(), String> {
    let config = config_from_args(args)?;
    let mut aligner = Aligner::new(config).map_err(|e| e.to_string())?;

    load_panel(aligner.reference_mut(), &args.reference, &args.ref_points)?;
    load_panel(aligner.moving_mut(), &args.moving, &args.mov_points)?;

    let report = aligner
        .align()
        .map_err(|e| format!("Alignment error: {e}"))?;

    let format = resolve_format(args.output_format.format, &args.output);
    let bytes = aligner
        .save(format, args.output_format.quality)
        .map_err(|e| format!("Error encoding output: {e}"))?;
    std::fs::write(&args.output, &bytes)
        .map_err(|e| format!("Error writing {}: {e}", args.output.display()))?;
    eprintln!(
        "Aligned image written to {} ({format}, {} bytes)",
        args.output.display(),
        bytes.len(),
    );

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Error serializing report: {e}"))?;
        println!("{json}");
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &AlignmentReport) {
    let m = report.homography.to_matrix();
    println!(
        "Output: {}x{}",
        report.dimensions.width, report.dimensions.height
    );
    println!("Homography (reference -> moving):");
    for row in m {
        println!("  [{:>12.6} {:>12.6} {:>12.6}]", row[0], row[1], row[2]);
    }
    println!("Quality: {:.6e}", report.quality);
    if report.candidates.len() > 1 {
        println!();
        println!("{:<16} {:>12} {:>14}", "Subset", "RMSE (px)", "Quality");
        println!("{}", "-".repeat(44));
        for c in &report.candidates {
            let subset = format!("{:?}", c.indices);
            println!("{subset:<16} {:>12.4} {:>14.6e}", c.rmse, c.estimate.quality);
        }
    }
}

fn run_sniff(files: &[PathBuf]) -> Result<(), String> {
    let mut failed = false;
    for path in files {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error reading {}: {e}", path.display());
                failed = true;
                continue;
            }
        };
        let format = iat_pipeline::sniff::sniff(&bytes);
        if format.is_tiff() {
            match iat_pipeline::tiff::inspect(&bytes) {
                Ok(info) => println!(
                    "{}: {format} {}x{} {} bpp, photometric {}, {} page(s)",
                    path.display(),
                    info.width,
                    info.height,
                    info.bits_per_pixel,
                    info.photometric,
                    info.page_count,
                ),
                Err(e) => println!("{}: {format} (unreadable: {e})", path.display()),
            }
        } else {
            println!("{}: {format} ({})", path.display(), format.mime_type());
        }
    }
    if failed {
        Err("some files could not be read".to_string())
    } else {
        Ok(())
    }
}

fn run_convert(input: &Path, output: &Path, output_format: &OutputFormat) -> Result<(), String> {
    let bytes =
        std::fs::read(input).map_err(|e| format!("Error reading {}: {e}", input.display()))?;
    let decoded = iat_pipeline::decode::decode_image(&bytes)
        .map_err(|e| format!("Error decoding {}: {e}", input.display()))?;
    let format = resolve_format(output_format.format, output);
    let encoded = iat_pipeline::encode::encode(&decoded.buffer, format, output_format.quality)
        .map_err(|e| format!("Error encoding: {e}"))?;
    std::fs::write(output, &encoded)
        .map_err(|e| format!("Error writing {}: {e}", output.display()))?;
    eprintln!(
        "{} ({}, {}x{}) -> {} ({format}, {} bytes)",
        input.display(),
        decoded.format,
        decoded.buffer.width(),
        decoded.buffer.height(),
        output.display(),
        encoded.len(),
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_point_accepts_pairs() {
        assert_eq!(parse_point("10,20.5").unwrap(), Point::new(10.0, 20.5));
        assert_eq!(parse_point(" 3 , 4 ").unwrap(), Point::new(3.0, 4.0));
    }

    #[test]
    fn second_logging_init_is_reported_not_fatal() {
        init_logging(0);
        // The global subscriber is already set; this takes the error path.
        init_logging(2);
    }

    #[test]
    fn parse_point_rejects_garbage() {
        assert!(parse_point("10").is_err());
        assert!(parse_point("a,b").is_err());
        assert!(parse_point("NaN,4").is_err());
        assert!(parse_point("1,inf").is_err());
        assert!(parse_point("-infinity,0").is_err());
    }

    #[test]
    fn format_falls_back_to_extension_then_png() {
        assert_eq!(
            resolve_format(None, Path::new("out.JPG")),
            SaveFormat::Jpeg
        );
        assert_eq!(resolve_format(None, Path::new("out")), SaveFormat::Png);
        assert_eq!(
            resolve_format(Some(SaveFormat::Tiff), Path::new("out.png")),
            SaveFormat::Tiff
        );
    }

    #[test]
    fn cli_parses_align_invocation() {
        let cli = Cli::try_parse_from([
            "iat", "-v", "align", "a.png", "b.png", "--ref-point", "1,2", "--mov-point", "3,4",
            "--output", "out.png", "--format", "jpeg",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Command::Align(args) = cli.command else {
            unreachable!("align subcommand");
        };
        assert_eq!(args.ref_points, vec![Point::new(1.0, 2.0)]);
        assert_eq!(args.output_format.format, Some(SaveFormat::Jpeg));
    }

    #[test]
    fn extra_pairs_raise_point_limit() {
        let cli = Cli::try_parse_from([
            "iat", "align", "a", "b", "--ref-point", "0,0", "--ref-point", "50,0",
            "--ref-point", "0,50", "--ref-point", "50,50", "--ref-point", "25,25",
            "--mov-point", "0,0", "--output", "o",
        ])
        .unwrap();
        let Command::Align(args) = cli.command else {
            unreachable!("align subcommand");
        };
        assert_eq!(config_from_args(&args).unwrap().control_point_max, 5);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::try_parse_from([
            "iat", "align", "a", "b", "--ref-point", "0,0", "--mov-point", "0,0", "--output",
            "o", "--hit-radius", "3", "--config-json", r#"{"hit_radius": 7.5}"#,
        ])
        .unwrap();
        let Command::Align(args) = cli.command else {
            unreachable!("align subcommand");
        };
        let config = config_from_args(&args).unwrap();
        assert!((config.hit_radius - 7.5).abs() < f64::EPSILON);
        assert_eq!(config.control_point_max, IatConfig::DEFAULT_CONTROL_POINT_MAX);
    }

    #[test]
    fn too_small_point_limit_is_rejected() {
        let cli = Cli::try_parse_from([
            "iat", "align", "a", "b", "--ref-point", "0,0", "--mov-point", "0,0", "--output",
            "o", "--control-point-max", "3",
        ])
        .unwrap();
        let Command::Align(args) = cli.command else {
            unreachable!("align subcommand");
        };
        assert!(config_from_args(&args).is_err());
    }
}
