// End-to-end engine scenarios: exact perft counts, mate handling, and
// bestmove legality from the public crate surface.
use kingfisher::hce::HCEEvaluator;
use kingfisher::movegen::{self, MoveList};
use kingfisher::perft::perft;
use kingfisher::search::{Searcher, MAX_PLY, VALUE_MATE};
use kingfisher::state::Position;
use kingfisher::time::SearchLimits;

fn depth_limits(depth: i32) -> SearchLimits {
    SearchLimits {
        depth,
        ..SearchLimits::default()
    }
}

#[test]
fn scenario_startpos_perft() {
    kingfisher::init_tables();
    let mut pos = Position::new();
    assert!(pos.set_startpos());
    assert_eq!(perft(&mut pos, 1), 20);
    assert_eq!(perft(&mut pos, 2), 400);
    assert_eq!(perft(&mut pos, 3), 8902);
    assert_eq!(perft(&mut pos, 4), 197281);
}

#[test]
#[ignore] // several seconds without optimizations: cargo test --release -- --ignored
fn scenario_startpos_perft_5() {
    kingfisher::init_tables();
    let mut pos = Position::new();
    assert!(pos.set_startpos());
    assert_eq!(perft(&mut pos, 5), 4865609);
}

#[test]
fn scenario_kiwipete_perft() {
    kingfisher::init_tables();
    let mut pos = Position::new();
    assert!(pos.set_from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
    ));
    assert_eq!(perft(&mut pos, 1), 48);
    assert_eq!(perft(&mut pos, 2), 2039);
    assert_eq!(perft(&mut pos, 3), 97862);
}

#[test]
#[ignore]
fn scenario_kiwipete_perft_4() {
    kingfisher::init_tables();
    let mut pos = Position::new();
    assert!(pos.set_from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
    ));
    assert_eq!(perft(&mut pos, 4), 4085603);
}

#[test]
fn scenario_position5_perft() {
    kingfisher::init_tables();
    let mut pos = Position::new();
    assert!(pos.set_from_fen("rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8"));
    assert_eq!(perft(&mut pos, 3), 62379);
}

#[test]
fn scenario_checkmated_side_has_no_move() {
    kingfisher::init_tables();
    let eval = HCEEvaluator::new();
    let mut searcher = Searcher::new(&eval);
    let mut pos = Position::new();
    assert!(pos.set_from_fen("7k/6Q1/6K1/8/8/8/8/8 b - - 0 1"));

    let result = searcher.search(&mut pos, &depth_limits(2), None);
    assert!(result.best_move.is_none());
    assert!(result.score <= -VALUE_MATE + MAX_PLY);
}

#[test]
fn scenario_startpos_bestmove_is_a_legal_move() {
    kingfisher::init_tables();
    let eval = HCEEvaluator::new();
    let mut searcher = Searcher::new(&eval);
    let mut pos = Position::new();
    assert!(pos.set_startpos());

    let result = searcher.search(&mut pos, &depth_limits(3), None);
    assert!(!result.best_move.is_none());

    let mut legal = MoveList::new();
    movegen::generate_legal(&mut pos, &mut legal);
    let uci = movegen::move_to_uci(result.best_move);
    let found = (0..legal.count).any(|i| movegen::move_to_uci(legal.moves[i]) == uci);
    assert!(found, "bestmove {} is not a legal startpos move", uci);
}

#[test]
fn scenario_make_unmake_full_round_trip_under_search() {
    kingfisher::init_tables();
    let eval = HCEEvaluator::new();
    let mut searcher = Searcher::new(&eval);
    let mut pos = Position::new();
    assert!(pos.set_from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
    ));

    let key_before = pos.key();
    let pawn_key_before = pos.pawn_key();
    let history_before = pos.history_len();

    let _ = searcher.search(&mut pos, &depth_limits(5), None);

    // The search borrowed the position mutably but must hand it back untouched
    assert_eq!(pos.key(), key_before);
    assert_eq!(pos.pawn_key(), pawn_key_before);
    assert_eq!(pos.history_len(), history_before);
}

#[test]
fn scenario_random_walk_round_trips() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    kingfisher::init_tables();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..20 {
        let mut pos = Position::new();
        assert!(pos.set_startpos());

        let mut made = 0;
        for _ in 0..40 {
            let mut legal = MoveList::new();
            movegen::generate_legal(&mut pos, &mut legal);
            if legal.count == 0 {
                break;
            }
            let mv = legal.moves[rng.gen_range(0..legal.count)];
            assert!(pos.make_move(mv));
            made += 1;

            // Incremental key must always match a from-scratch recompute
            assert_eq!(pos.key(), pos.compute_full_key());
        }

        for _ in 0..made {
            pos.unmake_move();
        }
        let mut fresh = Position::new();
        assert!(fresh.set_startpos());
        assert_eq!(pos.key(), fresh.key());
        assert_eq!(pos.pawn_key(), fresh.pawn_key());
    }
}
