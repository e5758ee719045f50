pub mod bitboard;
pub mod eval_params;
pub mod eval_tables;
pub mod evaluator;
pub mod hce;
pub mod hybrid;
pub mod lc0_eval;
pub mod lc0_features;
pub mod lc0_linear;
pub mod lc0_net;
pub mod lc0_proto;
pub mod lc0_weights;
pub mod logging;
pub mod movegen;
pub mod movepicker;
pub mod pawn;
pub mod perft;
pub mod search;
pub mod see;
pub mod state;
pub mod time;
pub mod tt;
pub mod uci;
pub mod zobrist;

use std::env;
use std::thread;

/// Process-wide tables; call once before constructing any Position.
pub fn init_tables() {
    zobrist::init_zobrist();
    bitboard::init_masks();
    movegen::init_move_tables();
    eval_tables::init_psqt();
}

pub fn run_cli() {
    logging::init_logging();
    init_tables();

    let args: Vec<String> = env::args().collect();
    if args.len() > 1 {
        if args[1] == "bench" {
            uci::run_bench();
            return;
        }

        if args[1] == "perft" {
            if args.len() < 3 {
                perft::run_perft_suite();
                return;
            }

            let depth: u32 = args[2].parse().unwrap_or(5);
            let mut pos = state::Position::new();
            if args.len() > 3 {
                let fen = args[3..].join(" ");
                if !pos.set_from_fen(&fen) {
                    println!("info string invalid FEN");
                    return;
                }
            } else {
                pos.set_startpos();
            }

            let start = std::time::Instant::now();
            let nodes = perft::perft(&mut pos, depth);
            let ms = start.elapsed().as_millis().max(1);
            println!("nodes {}", nodes);
            println!("time_ms {}", ms);
            println!("nps {}", (nodes as u128 * 1000 / ms) as u64);
            return;
        }
    }

    // Deep searches recurse; give the UCI thread a roomy stack
    let builder = thread::Builder::new()
        .name("uci_thread".into())
        .stack_size(32 * 1024 * 1024);

    let handler = builder
        .spawn(|| {
            uci::uci_loop();
        })
        .unwrap();

    handler.join().unwrap();
}
