use std::hint::black_box;
use std::time::{Duration, Instant};

use worldgrid_common::{CellArea, CellCoord, EntityId, EntityKind, GridCoord, KindMask};
use worldgrid_stream::{Bucket, Grid, GridIndex};

fn make_index(entity_count: usize) -> GridIndex {
    let mut index = GridIndex::new();
    for x in 28..36 {
        for y in 28..36 {
            let coord = GridCoord { x, y };
            index.insert(Grid::new(coord, Duration::from_secs(300), None));
            index.mark_loaded(coord);
        }
    }
    for i in 0..entity_count {
        let cell = CellCoord {
            x: 224 + (i % 64) as u32,
            y: 224 + ((i / 64) % 64) as u32,
        };
        let (kind, bucket) = if i % 3 == 0 {
            (EntityKind::GameObject, Bucket::GridObjects)
        } else {
            (EntityKind::Creature, Bucket::WorldObjects)
        };
        if let Some(c) = index.cell_mut(cell) {
            c.insert(bucket, EntityId::new(kind, i as u64 + 1));
        }
    }
    index
}

fn bench_visit_area(entity_count: usize, radius: f32, iterations: usize) {
    let index = make_index(entity_count);
    let area = CellArea::around(0.0, 0.0, radius);
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(index.entities_in_area(black_box(&area), KindMask::CREATURE));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  area visit ({entity_count} entities, r={radius}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_move_between_cells(entity_count: usize, iterations: usize) {
    let mut index = make_index(entity_count);
    let id = EntityId::new(EntityKind::Creature, 1_000_000);
    let a = CellCoord { x: 250, y: 250 };
    let b = CellCoord { x: 251, y: 250 };
    if let Some(cell) = index.cell_mut(a) {
        cell.insert(Bucket::WorldObjects, id);
    }
    let start = Instant::now();
    for i in 0..iterations {
        let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
        if let Some(cell) = index.cell_mut(from) {
            black_box(cell.remove(id));
        }
        if let Some(cell) = index.cell_mut(to) {
            black_box(cell.insert(Bucket::WorldObjects, id));
        }
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  cell move ({entity_count} entities, {iterations} iters): {per_iter:?}/iter");
}

fn bench_stats(entity_count: usize, iterations: usize) {
    let index = make_index(entity_count);
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(index.stats());
    }
    let elapsed = start.elapsed();
    println!(
        "  stats ({entity_count} entities, {iterations} iters): {:?}/iter",
        elapsed / iterations as u32
    );
}

fn main() {
    println!("=== Grid Index Benchmarks ===\n");

    println!("Area visit:");
    bench_visit_area(1000, 100.0, 10000);
    bench_visit_area(10000, 100.0, 1000);
    bench_visit_area(10000, 500.0, 100);

    println!("\nCell moves:");
    bench_move_between_cells(1000, 100000);

    println!("\nStats:");
    bench_stats(10000, 1000);

    println!("\n=== Done ===");
}
