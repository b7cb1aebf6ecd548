// Headless progressive render of the bundled sphere-lens scene to a PNG.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use gravlens::{EmissionSpectrum, Raytracer, SphereLens, TracerConfig};

#[derive(Parser, Debug)]
#[command(name = "offline_render", about = "Render the bundled sphere-lens scene offline")]
struct Args {
    #[arg(long, default_value_t = 512)]
    width: u32,

    #[arg(long, default_value_t = 512)]
    height: u32,

    /// Side length of the square ray grid (rays per wave = grid^2)
    #[arg(long, default_value_t = 64)]
    grid: u32,

    /// Number of progressive waves to accumulate
    #[arg(long, default_value_t = 100)]
    waves: u32,

    /// Blackbody emitter temperature in kelvin
    #[arg(long, default_value_t = 5800.0)]
    temperature: f32,

    #[arg(long, default_value = "render.png")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let ctx = gravlens::gpu::ctx().context("acquiring GPU context")?;
    let config = TracerConfig {
        width: args.width,
        height: args.height,
        ray_grid_size: args.grid,
        ..Default::default()
    };

    let mut tracer = Raytracer::new(ctx.device.clone(), ctx.queue.clone(), config)
        .context("creating raytracer")?;
    tracer.set_spectrum(EmissionSpectrum::blackbody(args.temperature))?;
    tracer
        .set_potential(Some(Box::new(SphereLens::default())))
        .context("compiling field shaders")?;

    for wave in 0..args.waves {
        tracer.render();
        if (wave + 1) % 16 == 0 {
            log::info!("traced {} / {} waves", wave + 1, args.waves);
        }
    }

    let stats = tracer.stats();
    log::info!(
        "done: {} rays across {} waves",
        stats.ray_count,
        stats.waves_traced
    );

    let pixels = tracer.read_display().context("reading display image")?;
    image::save_buffer(
        &args.output,
        &pixels,
        args.width,
        args.height,
        image::ColorType::Rgba8,
    )
    .with_context(|| format!("writing {}", args.output.display()))?;

    println!("wrote {}", args.output.display());
    Ok(())
}
