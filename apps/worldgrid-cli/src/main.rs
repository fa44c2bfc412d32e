mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use worldgrid_common::{Placement, TileCoord};
use worldgrid_kernel::{EntityDesc, MapFleet, MoveOutcome};
use worldgrid_terrain::{
    AreaTable, DEFAULT_COLLISION_HEIGHT, LiquidSpec, LiquidTypeMask, TerrainTile, TileBuilder,
};

use crate::config::WorldConfig;

#[derive(Parser)]
#[command(name = "worldgrid-cli", about = "Terrain tiles and map grid tooling")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Decode a tile file and print its header
    Inspect {
        /// Path to a `.map` tile
        path: PathBuf,
    },
    /// Sample terrain at a world position
    Query {
        /// World config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Tile directory, overrides the config's data_dir
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(short, long, default_value = "0")]
        map: u32,
        #[arg(short)]
        x: f32,
        #[arg(short)]
        y: f32,
        /// Height for the liquid status query
        #[arg(short)]
        z: Option<f32>,
    },
    /// Write a flat tile, optionally covered by one liquid
    MakeTile {
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long, default_value = "0.0")]
        height: f32,
        #[arg(long, default_value = "0")]
        area: u16,
        #[arg(long)]
        liquid_level: Option<f32>,
        /// Liquid type id
        #[arg(long, default_value = "1")]
        liquid_entry: u16,
    },
    /// Run map instances with wandering players and print their stats
    Simulate {
        /// World config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, default_value = "0")]
        map: u32,
        #[arg(long, default_value = "1")]
        instances: u32,
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        #[arg(long, default_value = "100")]
        tick_ms: u64,
        #[arg(short, long, default_value = "4")]
        players: usize,
        #[arg(short, default_value = "0.0")]
        x: f32,
        #[arg(short, default_value = "0.0")]
        y: f32,
        /// Player speed in yards per second
        #[arg(long, default_value = "7.0")]
        speed: f32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("worldgrid-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("terrain: {}", worldgrid_terrain::crate_info());
            println!("stream: {}", worldgrid_stream::crate_info());
            println!("kernel: {}", worldgrid_kernel::crate_info());
            println!("persist: {}", worldgrid_persist::crate_info());
        }
        Commands::Inspect { path } => {
            let tile = TerrainTile::load(&path)
                .with_context(|| format!("loading tile {}", path.display()))?;
            println!("{}", path.display());
            println!("  version:   {}", tile.version());
            println!("  build:     {}", tile.build());
            match tile.encoding() {
                Some(encoding) => println!("  heights:   {encoding:?}"),
                None => println!("  heights:   none"),
            }
            if let Some((min, max)) = tile.height_bounds() {
                println!("  bounds:    {min:.2} .. {max:.2}");
            }
            if let Some(flight) = tile.flight_bounds() {
                println!("  flight:    max={:?} min={:?}", flight.max, flight.min);
            }
            println!("  liquid:    {}", tile.has_liquid());
            println!("  holes:     {}", tile.hole_count());
        }
        Commands::Query {
            config,
            data_dir,
            map,
            x,
            y,
            z,
        } => {
            let mut world = match &config {
                Some(path) => WorldConfig::load(path)?,
                None => WorldConfig::default(),
            };
            if let Some(dir) = data_dir {
                world.data_dir = dir;
            }
            let registry = world.registry();
            let areas = world.area_table()?;
            let terrain = registry.load_terrain(map);
            let tile = TileCoord::from_position(x, y)?;
            let _lease = terrain.acquire(tile);

            println!("map {map} at ({x:.2}, {y:.2}), tile {tile:?}");
            match terrain.height(map, x, y) {
                Some(height) => println!("  height:       {height:.3}"),
                None => println!("  height:       none"),
            }
            let area = terrain.area_id(map, x, y);
            println!("  area:         {area}");
            println!("  zone:         {}", areas.zone_of(u32::from(area)));
            println!("  min height:   {:.3}", terrain.min_height(map, x, y));
            match terrain.liquid_level(map, x, y) {
                Some(level) => println!("  liquid level: {level:.3}"),
                None => println!("  liquid level: none"),
            }
            if let Some(z) = z {
                let query =
                    terrain.liquid_status(map, x, y, z, None, DEFAULT_COLLISION_HEIGHT, &areas);
                println!("  liquid:       {}", serde_json::to_string(&query)?);
            }
        }
        Commands::MakeTile {
            out,
            height,
            area,
            liquid_level,
            liquid_entry,
        } => {
            let mut builder = TileBuilder::new().uniform_area(area).flat_height(height);
            if let Some(level) = liquid_level {
                builder = builder.liquid(LiquidSpec::global(
                    liquid_entry,
                    LiquidTypeMask::WATER,
                    level,
                ));
            }
            builder
                .write(&out)
                .with_context(|| format!("writing tile {}", out.display()))?;
            println!("wrote {}", out.display());
        }
        Commands::Simulate {
            config,
            map,
            instances,
            ticks,
            tick_ms,
            players,
            x,
            y,
            speed,
        } => {
            let world = match &config {
                Some(path) => WorldConfig::load(path)?,
                None => WorldConfig::default(),
            };
            let mut fleet = MapFleet::new(world.map.clone(), world.services()?);
            let mut walkers = Vec::new();
            for instance in 0..instances {
                let instance_map = fleet.create(map, instance)?;
                for i in 0..players {
                    let lane = y + i as f32 * 10.0;
                    let id = instance_map.add_entity(EntityDesc::player(Placement::new(x, lane, 0.0, 0.0)))?;
                    walkers.push((instance, id, lane));
                }
            }
            println!(
                "simulating {instances} instance(s) of map {map}: {players} player(s), {ticks} tick(s) of {tick_ms}ms"
            );

            let diff = Duration::from_millis(tick_ms);
            let step = speed * diff.as_secs_f32();
            // Players walk east and turn back after one grid length.
            let span = 533.333_3_f32;
            let mut queued = 0u64;
            for tick in 1..=ticks {
                let travelled = (tick as f32 * step) % (2.0 * span);
                let offset = if travelled > span { 2.0 * span - travelled } else { travelled };
                for &(instance, id, lane) in &walkers {
                    let Some(instance_map) = fleet.get_mut(map, instance) else {
                        continue;
                    };
                    let target = Placement::new(x + offset, lane, 0.0, 0.0);
                    if instance_map.move_entity(id, target)? == MoveOutcome::Queued {
                        queued += 1;
                    }
                }
                fleet.update(diff);
            }

            println!("queued relocations: {queued}");
            println!("{}", serde_json::to_string_pretty(&fleet.stats())?);
            fleet.shutdown();
        }
    }

    Ok(())
}
