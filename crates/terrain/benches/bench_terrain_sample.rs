use std::hint::black_box;
use std::time::Instant;

use worldgrid_common::TileCoord;
use worldgrid_terrain::{
    LiquidSpec, LiquidTypeMask, StaticAreaTable, TerrainTile, TileBuilder, sample_position,
};

const TILE: TileCoord = TileCoord { x: 32, y: 32 };

fn hills(row: f32, col: f32) -> f32 {
    (row * 0.21).sin() * 35.0 + (col * 0.17).cos() * 12.0
}

fn positions(count: usize) -> Vec<(f32, f32)> {
    let mut state = 0x9E37_79B9_u32;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let row = 1.0 + (state % 12_600) as f32 / 100.0;
            let col = 1.0 + ((state >> 8) % 12_600) as f32 / 100.0;
            sample_position(TILE, row, col)
        })
        .collect()
}

fn bench_height(label: &str, tile: &TerrainTile, iterations: usize) {
    let points = positions(4096);
    let start = Instant::now();
    for _ in 0..iterations {
        for &(x, y) in &points {
            let _ = black_box(tile.height(black_box(x), black_box(y)));
        }
    }
    let elapsed = start.elapsed();
    let per_query = elapsed / (iterations * points.len()) as u32;
    println!("  height ({label}, {iterations} x {} points): {per_query:?}/query, total {elapsed:?}", points.len());
}

fn bench_liquid(tile: &TerrainTile, iterations: usize) {
    let points = positions(4096);
    let areas = StaticAreaTable::new().with_default_liquids();
    let start = Instant::now();
    for _ in 0..iterations {
        for &(x, y) in &points {
            let _ = black_box(tile.liquid_status(x, y, black_box(5.0), None, 2.0, &areas));
        }
    }
    let elapsed = start.elapsed();
    let per_query = elapsed / (iterations * points.len()) as u32;
    println!("  liquid status ({iterations} x {} points): {per_query:?}/query, total {elapsed:?}", points.len());
}

fn bench_decode(bytes: &[u8], iterations: usize) {
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(TerrainTile::from_bytes(black_box(bytes)));
    }
    let elapsed = start.elapsed();
    println!("  decode ({} bytes, {iterations} iters): {:?}/iter", bytes.len(), elapsed / iterations as u32);
}

fn main() {
    println!("=== Terrain Sampling Benchmarks ===\n");

    let float_bytes = TileBuilder::new()
        .float_heights_from(hills)
        .liquid(LiquidSpec::global(1, LiquidTypeMask::WATER, 10.0))
        .to_bytes()
        .expect("encode float tile");
    let float_tile = TerrainTile::from_bytes(&float_bytes).expect("decode float tile");
    let int8_tile = TerrainTile::from_bytes(
        &TileBuilder::new()
            .int8_heights(-50.0, 200.0, vec![90; 129 * 129], vec![91; 128 * 128])
            .to_bytes()
            .expect("encode int8 tile"),
    )
    .expect("decode int8 tile");

    println!("Height queries:");
    bench_height("float", &float_tile, 100);
    bench_height("int8", &int8_tile, 100);

    println!("\nLiquid queries:");
    bench_liquid(&float_tile, 100);

    println!("\nDecode:");
    bench_decode(&float_bytes, 200);

    println!("\n=== Done ===");
}
