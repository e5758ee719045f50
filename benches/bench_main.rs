use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kingfisher::evaluator::Evaluator;
use kingfisher::hce::HCEEvaluator;
use kingfisher::movegen::{self, MoveList};
use kingfisher::perft::perft;
use kingfisher::state::{Move, Position};
use kingfisher::tt::{TranspositionTable, BOUND_EXACT};

fn init_globals() {
    kingfisher::init_tables();
}

fn bench_make_unmake(c: &mut Criterion) {
    init_globals();
    let mut group = c.benchmark_group("make_move");
    let mut pos = Position::new();
    pos.set_startpos();
    let mut list = MoveList::new();
    movegen::generate_pseudo_legal(&pos, &mut list);
    let mv = list.moves[0];

    group.bench_function("make_unmake_startpos", |b| {
        b.iter(|| {
            pos.make_move(black_box(mv));
            pos.unmake_move();
        })
    });
    group.finish();
}

fn bench_perft(c: &mut Criterion) {
    init_globals();
    let mut group = c.benchmark_group("perft");
    group.sample_size(10);
    let mut pos = Position::new();
    pos.set_startpos();

    group.bench_function("perft3_startpos", |b| {
        b.iter(|| perft(black_box(&mut pos), 3))
    });
    group.finish();
}

fn bench_eval(c: &mut Criterion) {
    init_globals();
    let mut group = c.benchmark_group("eval");
    let eval = HCEEvaluator::new();
    let mut pos = Position::new();
    pos.set_from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");

    group.bench_function("hce_kiwipete", |b| {
        b.iter(|| eval.static_eval(black_box(&pos)))
    });
    group.finish();
}

fn bench_tt(c: &mut Criterion) {
    init_globals();
    let mut group = c.benchmark_group("tt");
    let mut tt = TranspositionTable::new(16);
    let mut pos = Position::new();
    pos.set_startpos();

    group.bench_function("tt_probe_empty", |b| {
        b.iter(|| tt.probe(black_box(pos.key())))
    });

    tt.store(pos.key(), Move::none(), 100, 50, 5, BOUND_EXACT, 1, 0);
    group.bench_function("tt_probe_hit", |b| {
        b.iter(|| tt.probe(black_box(pos.key())))
    });
    group.finish();
}

criterion_group!(benches, bench_make_unmake, bench_perft, bench_eval, bench_tt);
criterion_main!(benches);
