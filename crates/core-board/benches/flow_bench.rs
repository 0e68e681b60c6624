use core_board::test_support::board_from_rows;
use core_board::{SourceInfo, SourceType};
use core_grid::Pos;
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_flow_tick(c: &mut Criterion) {
    let mut board = board_from_rows(
        &[
            "************4444442*",
            "************2*******",
            "********44442*******",
            "**********2*********",
            "**********2*********",
            "********************",
            "********************",
            "********************",
            "********************",
            "********************",
        ],
        Pos::new(0, 18),
    );
    for (i, pos) in [Pos::new(6, 2), Pos::new(7, 14), Pos::new(9, 9)].into_iter().enumerate() {
        board
            .insert_source(
                pos,
                SourceInfo::new(20.0 + i as f32 * 10.0, SourceType::Generic, "default"),
            )
            .unwrap();
    }

    c.bench_function("simulate_10_ticks", |b| {
        b.iter(|| {
            let mut scratch = board.clone();
            scratch.simulate_data_flow(10, false);
            scratch.last_simulation_avg_flow_per_unit()
        })
    });

    c.bench_function("reorganize_round", |b| {
        b.iter(|| {
            let mut scratch = board.clone();
            scratch.reorganize()
        })
    });
}

criterion_group!(benches, bench_flow_tick);
criterion_main!(benches);
