// Demo runner: bins an RGB image and writes its parallel-coordinates plot as PNG.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use distview::core_modules::utils::image_helper::image_helper::{
    PlotFrame, render_plot, save, threshold_labels,
};
use distview::{
    BandDesc, Binner, ColorMode, ComputeWorker, EngineConfig, Generation, MultiImage, ViewportCtx,
    palette,
};
use log::{LevelFilter, info};
use std::path::PathBuf;
use std::sync::Arc;

const MAXVAL: f32 = 255.0;

#[derive(Parser, Debug)]
#[command(name = "distview", about = "Parallel-coordinates plot of an image's pixel distribution")]
struct Args {
    /// Image to bin.
    input: PathBuf,
    /// Where to write the plot.
    #[arg(short, long, default_value = "distview.png")]
    output: PathBuf,
    /// Bins per band (2..=256).
    #[arg(short, long, default_value_t = 64)]
    bins: usize,
    /// Split pixels into two labels at this mean brightness.
    #[arg(short, long)]
    threshold: Option<f32>,
    /// Draw polylines through bin means instead of bin centers.
    #[arg(long)]
    means: bool,
    /// Color bins by their mean color instead of their label color.
    #[arg(long)]
    mean_colors: bool,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long)]
    min_weight: Option<f32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 1024)]
    width: u32,
    #[arg(long, default_value_t = 600)]
    height: u32,
    /// Opacity multiplier for the plot.
    #[arg(long, default_value_t = 40.0)]
    gain: f32,
    /// off, error, warn, info, debug or trace.
    #[arg(long)]
    log_level: Option<String>,
}

fn config_from(args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(threads) = args.threads {
        config = config.worker_threads(threads);
    }
    if let Some(min_weight) = args.min_weight {
        config = config.min_weight(min_weight);
    }
    if let Some(seed) = args.seed {
        config = config.shuffle_seed(seed);
    }
    if let Some(level) = &args.log_level {
        let level: LevelFilter = level.parse().map_err(|_| anyhow!("unknown log level `{level}`"))?;
        config = config.log_level(level);
    }
    config.check()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = config_from(&args)?;

    let level = config
        .log_level
        .as_str()
        .parse()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let rgb = image::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?
        .to_rgb8();
    let pixels = MultiImage::from_rgb(&rgb);
    info!("loaded {}x{} image", pixels.width, pixels.height);

    let labels = args.threshold.map(|t| threshold_labels(&pixels, t));
    let label_names = if labels.is_some() {
        vec!["dark".to_string(), "bright".to_string()]
    } else {
        vec!["unlabeled".to_string()]
    };
    let colors = palette(label_names.len());

    let ctx = ViewportCtx::for_range(3, 0.0, MAXVAL, args.bins)?
        .with_meta(vec![BandDesc::new("red"), BandDesc::new("green"), BandDesc::new("blue")])
        .with_labels(label_names);
    let generation = Generation::new();
    let binner = Binner::new(&ctx, &colors, config.shards, Arc::clone(&generation))?;
    binner.fill(&pixels, labels.as_deref())?;
    binner.publish();

    let worker = ComputeWorker::new(config, generation)?;
    let mut request = worker.request(Arc::new(ctx), binner.snapshots().current());
    request.vertex.draw_means = args.means;
    if args.mean_colors {
        request.vertex.color_mode = ColorMode::Mean;
    }
    let frame = worker.redraw(request).await?;

    let plot = render_plot(
        frame.vertices.as_slice(),
        frame.dimensionality,
        PlotFrame { width: args.width, height: args.height, margin: 24, minval: 0.0, maxval: MAXVAL },
        args.gain,
    );
    let output = args.output.to_string_lossy();
    save(&output, &plot).with_context(|| format!("failed to write {output}"))?;
    info!("wrote {} polylines to {output}", frame.bins);

    worker.shutdown().await;
    Ok(())
}
