//! Command line baker for physics scene navigation meshes

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use detour_physics::{
    extract, generate_with_context, BuildOptions, ExtractOptions, ExtractionResult, NavMeshBuildCache,
    QualityPreset, SceneWorld,
};
use recast::{LogSink, RecastContext};
use std::sync::Arc;

/// Bakes navigation meshes from JSON physics scenes
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract a scene and write its navigation mesh as JSON
    Bake {
        /// Scene file (JSON)
        #[clap(long, value_parser)]
        scene: PathBuf,

        /// Output navigation mesh file (JSON)
        #[clap(long, value_parser)]
        output: PathBuf,

        /// Quality preset: default, crisp, crispStrict or fast
        #[clap(long, default_value = "default", value_parser = parse_preset)]
        preset: QualityPreset,

        /// Cell size (horizontal resolution), overrides the preset
        #[clap(long)]
        cell_size: Option<f32>,

        /// Cell height (vertical resolution), overrides the preset
        #[clap(long)]
        cell_height: Option<f32>,

        /// Agent radius in world units
        #[clap(long)]
        walkable_radius: Option<f32>,

        /// Tile size in voxels, overrides the preset. A mesh holds at most 1023 tiles
        #[clap(long)]
        tile_size: Option<i32>,

        /// Skip the detail mesh pass
        #[clap(long)]
        skip_detail: bool,
    },

    /// Print how the colliders of a scene are classified
    Extract {
        /// Scene file (JSON)
        #[clap(long, value_parser)]
        scene: PathBuf,
    },

    /// Print the resolved values of every quality preset
    Presets,
}

fn parse_preset(s: &str) -> Result<QualityPreset, String> {
    QualityPreset::from_name(s).ok_or_else(|| {
        let names: Vec<&str> = QualityPreset::ALL.iter().map(|p| p.name()).collect();
        format!("unknown preset '{s}', expected one of {}", names.join(", "))
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Bake {
            scene,
            output,
            preset,
            cell_size,
            cell_height,
            walkable_radius,
            tile_size,
            skip_detail,
        } => {
            let mut options = BuildOptions::new(preset).with_skip_detail_mesh(skip_detail);
            options.cell_size = cell_size;
            options.cell_height = cell_height;
            options.walkable_radius = walkable_radius;
            options.tile_size_voxels = tile_size;
            bake(&scene, &output, &options)
        }
        Commands::Extract { scene } => {
            let extraction = load_extraction(&scene)?;
            print!("{}", describe_extraction(extraction.as_ref()));
            Ok(())
        }
        Commands::Presets => {
            print!("{}", preset_table()?);
            Ok(())
        }
    }
}

fn load_extraction(scene: &Path) -> Result<Option<ExtractionResult>> {
    let world =
        SceneWorld::load(scene).with_context(|| format!("Failed to load scene {}", scene.display()))?;
    Ok(extract(&world, &ExtractOptions::default()))
}

/// Builds the navigation mesh of `scene` and writes it to `output`
fn bake(scene: &Path, output: &Path, options: &BuildOptions) -> Result<()> {
    let extraction = load_extraction(scene)?
        .ok_or_else(|| anyhow!("Scene {} has no colliders to bake", scene.display()))?;

    let mut cache = NavMeshBuildCache::new();
    let mut ctx = RecastContext::with_sink(Arc::new(LogSink));
    let generated = generate_with_context(&extraction, options, &mut cache, &mut ctx)
        .context("Failed to generate navigation mesh")?
        .ok_or_else(|| anyhow!("Scene {} has no walkable surface", scene.display()))?;

    let stats = &generated.stats;
    info!(
        "baked {} polygons in {} tiles ({} empty, {} detail retries)",
        stats.polygon_count, stats.tiles_total, stats.tiles_empty, stats.detail_retries
    );
    info!("{}", ctx.timer_summary());

    let file = File::create(output)
        .with_context(|| format!("Failed to create output file: {}", output.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &*generated.nav_mesh)
        .with_context(|| format!("Failed to write navigation mesh to {}", output.display()))?;
    info!("navigation mesh written to {}", output.display());
    Ok(())
}

fn describe_extraction(extraction: Option<&ExtractionResult>) -> String {
    let Some(e) = extraction else {
        return "empty scene\n".to_string();
    };
    let mut out = String::new();
    out.push_str(&format!("walkable triangles: {}\n", e.geometry.triangle_count()));
    out.push_str(&format!("height fields:      {}\n", e.heightfields.len()));
    out.push_str(&format!("static colliders:   {}\n", e.static_collider_handles.len()));
    out.push_str(&format!("static obstacles:   {}\n", e.static_obstacles.len()));
    out.push_str(&format!("dynamic obstacles:  {}\n", e.dynamic_obstacles.len()));
    if let Some(bounds) = e.walkable_bounds() {
        out.push_str(&format!("walkable bounds:    {:?} .. {:?}\n", bounds.min, bounds.max));
    }
    out.push_str(&format!("static signature:   {}\n", e.static_signature));
    out
}

fn preset_table() -> Result<String> {
    let mut out = format!(
        "{:<12} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>8} {:>6} {:>6}\n",
        "preset", "cs", "ch", "radius", "height", "climb", "tile", "minArea", "detail", "erode"
    );
    for preset in QualityPreset::ALL {
        let c = BuildOptions::new(preset).resolve()?;
        out.push_str(&format!(
            "{:<12} {:>6.2} {:>6.2} {:>6} {:>6} {:>6} {:>6} {:>8} {:>6.2} {:>6}\n",
            preset.name(),
            c.cell_size,
            c.cell_height,
            c.walkable_radius,
            c.walkable_height,
            c.walkable_climb,
            c.tile_size_voxels,
            c.min_region_area,
            c.detail_sample_dist,
            c.erode
        ));
    }
    Ok(out)
}
