// src/uci.rs
use crate::evaluator::{EvalBreakdown, Evaluator};
use crate::hybrid::HybridEvaluator;
use crate::movegen;
use crate::perft;
use crate::search::{SearchConfig, SearchIterationInfo, Searcher, MAX_PLY, VALUE_MATE};
use crate::state::Position;
use crate::time::SearchLimits;
use std::io::{self, BufRead};
use std::path::Path;
use std::time::Instant;

const ENGINE_NAME: &str = "Kingfisher";
const ENGINE_AUTHOR: &str = "the Kingfisher developers";

const BENCH_FENS: [&str; 5] = [
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
    "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
];

const BENCH_NODES_PER_POSITION: u64 = 150_000;

fn score_string(score: i32) -> String {
    if score.abs() >= VALUE_MATE - MAX_PLY {
        let mate_ply = VALUE_MATE - score.abs();
        let mate_moves = (mate_ply + 1) / 2;
        let signed = if score > 0 { mate_moves } else { -mate_moves };
        format!("mate {}", signed)
    } else {
        format!("cp {}", score)
    }
}

fn join_pv(pv: &[crate::state::Move]) -> String {
    pv.iter()
        .map(|m| movegen::move_to_uci(*m))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_iteration(info: &SearchIterationInfo) {
    let mut line = format!(
        "info depth {} seldepth {} score {} nodes {} time {} nps {}",
        info.depth,
        info.seldepth,
        score_string(info.score),
        info.nodes,
        info.time_ms,
        info.nps
    );
    if !info.pv.is_empty() {
        line.push_str(" pv ");
        line.push_str(&join_pv(&info.pv));
    }
    println!("{}", line);

    log::info!(
        "depth {} ttHit {}/{} qnodes {} nmp {}/{} lmr {} singular {} probcut {} stab {} cx {}",
        info.depth,
        info.stats.tt_hits,
        info.stats.tt_probes,
        info.stats.qnodes,
        info.stats.nmp_cutoffs,
        info.stats.nmp_attempts,
        info.stats.lmr_reduced,
        info.stats.singular_extensions,
        info.stats.probcut_cutoffs,
        info.stability_score,
        info.complexity_x100
    );
}

fn run_perft_command(pos: &mut Position, depth: u32) {
    let start = Instant::now();
    let rows = perft::perft_divide(pos, depth);
    let mut nodes = 0u64;
    for (uci, count) in &rows {
        println!("{}: {}", uci, count);
        nodes += count;
    }
    let ms = start.elapsed().as_millis().max(1);
    println!("nodes {}", nodes);
    println!("time_ms {}", ms);
    println!("nps {}", (nodes as u128 * 1000 / ms) as u64);
}

fn handle_position(pos: &mut Position, tokens: &[&str]) -> bool {
    if tokens.len() < 2 {
        return false;
    }

    let mut i = 1;
    if tokens[i] == "startpos" {
        if !pos.set_startpos() {
            return false;
        }
        i += 1;
    } else if tokens[i] == "fen" {
        i += 1;
        let mut fen = String::new();
        let mut fields = 0;
        while i < tokens.len() && tokens[i] != "moves" && fields < 6 {
            if !fen.is_empty() {
                fen.push(' ');
            }
            fen.push_str(tokens[i]);
            i += 1;
            fields += 1;
        }
        if !pos.set_from_fen(&fen) {
            return false;
        }
    } else {
        return false;
    }

    if i < tokens.len() && tokens[i] == "moves" {
        i += 1;
        while i < tokens.len() {
            let mv = movegen::parse_uci_move(pos, tokens[i]);
            if mv.is_none() || !pos.make_move(mv) {
                return false;
            }
            i += 1;
        }
    }

    true
}

fn parse_int(s: &str, fallback: i32) -> i32 {
    s.parse().unwrap_or(fallback)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "on")
}

fn parse_go_limits(tokens: &[&str]) -> SearchLimits {
    let mut limits = SearchLimits::default();

    let mut i = 1;
    while i < tokens.len() {
        let mut next_int = |i: &mut usize, fallback: i32| -> i32 {
            if *i + 1 >= tokens.len() {
                return fallback;
            }
            *i += 1;
            parse_int(tokens[*i], fallback)
        };

        match tokens[i] {
            "depth" => limits.depth = next_int(&mut i, 0),
            "nodes" => limits.nodes = next_int(&mut i, 0).max(0) as u64,
            "movetime" => limits.movetime_ms = next_int(&mut i, -1),
            "wtime" => limits.wtime_ms = next_int(&mut i, -1),
            "btime" => limits.btime_ms = next_int(&mut i, -1),
            "winc" => limits.winc_ms = next_int(&mut i, 0),
            "binc" => limits.binc_ms = next_int(&mut i, 0),
            "movestogo" => limits.movestogo = next_int(&mut i, 0),
            "ponder" => limits.ponder = true,
            "infinite" => limits.infinite = true,
            _ => {}
        }
        i += 1;
    }

    limits
}

struct OptionState {
    config: SearchConfig,
    move_overhead_ms: i32,
    nodes_as_time: bool,
    pending_weights: Option<String>,
}

fn normalized_option_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn handle_setoption(
    searcher: &mut Searcher,
    evaluator: &HybridEvaluator,
    state: &mut OptionState,
    tokens: &[&str],
) -> bool {
    let mut name = String::new();
    let mut value = String::new();
    let mut parsing_name = false;
    let mut parsing_value = false;

    for tok in &tokens[1..] {
        match *tok {
            "name" => {
                parsing_name = true;
                parsing_value = false;
            }
            "value" => {
                parsing_name = false;
                parsing_value = true;
            }
            _ if parsing_name => {
                if !name.is_empty() {
                    name.push(' ');
                }
                name.push_str(tok);
            }
            _ if parsing_value => {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(tok);
            }
            _ => {}
        }
    }

    let name = normalized_option_name(&name);
    let config = &mut state.config;
    let mut config_changed = true;

    match name.as_str() {
        "hash" => {
            let mb = parse_int(&value, 32).clamp(1, 65536);
            searcher.set_hash_size_mb(mb as usize);
            config_changed = false;
        }
        "threads" => {
            // Core search is single-threaded; the option is accepted for GUIs
            config_changed = false;
        }
        "clearhash" => {
            searcher.clear_hash();
            config_changed = false;
        }
        "clearheuristics" => {
            searcher.clear_heuristics();
            config_changed = false;
        }
        "moveoverhead" => {
            state.move_overhead_ms = parse_int(&value, 30).clamp(0, 10000);
            config_changed = false;
        }
        "nodesastime" => {
            state.nodes_as_time = parse_bool(&value);
            config_changed = false;
        }

        "usehistory" => config.use_history = parse_bool(&value),
        "usecontinuationhistory" => config.use_cont_history = parse_bool(&value),
        "usecapturehistory" => config.use_capture_history = parse_bool(&value),
        "usenullmovepruning" => config.use_nmp = parse_bool(&value),
        "uselmr" => config.use_lmr = parse_bool(&value),
        "usesee" => config.use_see = parse_bool(&value),
        "useqdelta" => config.use_qdelta = parse_bool(&value),
        "userfp" => config.use_rfp = parse_bool(&value),
        "userazoring" => config.use_razoring = parse_bool(&value),
        "usefutility" => config.use_futility = parse_bool(&value),
        "uselmp" => config.use_lmp = parse_bool(&value),
        "usehistorypruning" => config.use_history_pruning = parse_bool(&value),
        "useprobcut" => config.use_probcut = parse_bool(&value),
        "usesingular" => config.use_singular = parse_bool(&value),

        "historymax" => config.history_max = parse_int(&value, config.history_max).clamp(1024, 32767),
        "nmpmindepth" => config.nmp_min_depth = parse_int(&value, config.nmp_min_depth).clamp(2, 16),
        "nmpmarginbase" => {
            config.nmp_margin_base = parse_int(&value, config.nmp_margin_base).clamp(0, 500)
        }
        "nmpmarginperdepth" => {
            config.nmp_margin_per_depth =
                parse_int(&value, config.nmp_margin_per_depth).clamp(0, 200)
        }
        "lmrmindepth" => config.lmr_min_depth = parse_int(&value, config.lmr_min_depth).clamp(2, 16),
        "lmrfulldepthmoves" => {
            config.lmr_full_depth_moves =
                parse_int(&value, config.lmr_full_depth_moves).clamp(0, 16)
        }
        "lmrhistorythreshold" => {
            config.lmr_history_threshold =
                parse_int(&value, config.lmr_history_threshold).clamp(-20000, 20000)
        }
        "rfpmaxdepth" => config.rfp_max_depth = parse_int(&value, config.rfp_max_depth).clamp(1, 12),
        "rfpmargin" => {
            config.rfp_margin_per_depth =
                parse_int(&value, config.rfp_margin_per_depth).clamp(10, 400)
        }
        "razorbase" => config.razor_base = parse_int(&value, config.razor_base).clamp(0, 1000),
        "razorperdepth" => {
            config.razor_per_depth = parse_int(&value, config.razor_per_depth).clamp(0, 500)
        }
        "futilitybase" => {
            config.futility_base = parse_int(&value, config.futility_base).clamp(0, 500)
        }
        "futilityperdepth" => {
            config.futility_per_depth =
                parse_int(&value, config.futility_per_depth).clamp(0, 400)
        }
        "probcutmargin" => {
            config.probcut_margin = parse_int(&value, config.probcut_margin).clamp(50, 600)
        }
        "probcutmindepth" => {
            config.probcut_min_depth = parse_int(&value, config.probcut_min_depth).clamp(3, 12)
        }
        "singularmindepth" => {
            config.singular_min_depth = parse_int(&value, config.singular_min_depth).clamp(4, 16)
        }
        "singularmargin" => {
            config.singular_margin_per_depth =
                parse_int(&value, config.singular_margin_per_depth).clamp(1, 16)
        }
        "qdeltamargin" => {
            config.qsearch_delta_margin =
                parse_int(&value, config.qsearch_delta_margin).clamp(0, 600)
        }

        "uselc0eval" => {
            evaluator.set_use_lc0(parse_bool(&value));
            config_changed = false;
        }
        "lc0weightsfile" => {
            state.pending_weights = Some(value.clone());
            config_changed = false;
        }
        "lc0cpscale" => {
            evaluator.lc0().set_cp_scale(parse_int(&value, 220));
            config_changed = false;
        }
        "lc0scoremap" => {
            evaluator.lc0().set_score_map(parse_int(&value, 1));
            config_changed = false;
        }
        "lc0evalthreads" => {
            evaluator.lc0().set_eval_threads(parse_int(&value, 1));
            config_changed = false;
        }
        "lc0batchmax" => {
            evaluator.lc0().set_batch_max(parse_int(&value, 16));
            config_changed = false;
        }
        "lc0batchwaitus" => {
            evaluator.lc0().set_batch_wait_us(parse_int(&value, 1000));
            config_changed = false;
        }
        "lc0cacheentries" => {
            evaluator
                .lc0()
                .set_cache_limit(parse_int(&value, 1 << 18).max(0) as usize);
            config_changed = false;
        }
        "lc0backend" => {
            evaluator.set_backend_from_int(parse_int(&value, 0));
            config_changed = false;
        }

        _ => return false,
    }

    if config_changed {
        searcher.set_config(config.clone());
    }
    true
}

fn load_pending_weights(evaluator: &HybridEvaluator, state: &mut OptionState) {
    if let Some(path) = state.pending_weights.take() {
        if evaluator.load_lc0_weights(Path::new(&path), false) {
            println!("info string lc0 weights loaded from {}", path);
        } else {
            println!(
                "info string lc0 weights load failed: {} (falling back to HCE)",
                evaluator.lc0().last_error()
            );
        }
    }
}

fn print_options() {
    println!("option name Hash type spin default 32 min 1 max 65536");
    println!("option name Threads type spin default 1 min 1 max 1");
    println!("option name MoveOverhead type spin default 30 min 0 max 10000");
    println!("option name NodesAsTime type check default false");
    println!("option name ClearHash type button");
    println!("option name Clear Heuristics type button");
    println!("option name UseHistory type check default true");
    println!("option name UseContinuationHistory type check default true");
    println!("option name UseCaptureHistory type check default true");
    println!("option name UseNullMovePruning type check default true");
    println!("option name UseLMR type check default true");
    println!("option name UseSEE type check default true");
    println!("option name UseQDelta type check default true");
    println!("option name UseRFP type check default true");
    println!("option name UseRazoring type check default true");
    println!("option name UseFutility type check default true");
    println!("option name UseLMP type check default true");
    println!("option name UseHistoryPruning type check default true");
    println!("option name UseProbCut type check default true");
    println!("option name UseSingular type check default true");
    println!("option name HistoryMax type spin default 20923 min 1024 max 32767");
    println!("option name NmpMinDepth type spin default 3 min 2 max 16");
    println!("option name NmpMarginBase type spin default 60 min 0 max 500");
    println!("option name NmpMarginPerDepth type spin default 14 min 0 max 200");
    println!("option name LmrMinDepth type spin default 3 min 2 max 16");
    println!("option name LmrFullDepthMoves type spin default 2 min 0 max 16");
    println!("option name LmrHistoryThreshold type spin default 3426 min -20000 max 20000");
    println!("option name RfpMaxDepth type spin default 6 min 1 max 12");
    println!("option name RfpMargin type spin default 60 min 10 max 400");
    println!("option name RazorBase type spin default 300 min 0 max 1000");
    println!("option name RazorPerDepth type spin default 150 min 0 max 500");
    println!("option name FutilityBase type spin default 90 min 0 max 500");
    println!("option name FutilityPerDepth type spin default 60 min 0 max 400");
    println!("option name ProbcutMargin type spin default 200 min 50 max 600");
    println!("option name ProbcutMinDepth type spin default 5 min 3 max 12");
    println!("option name SingularMinDepth type spin default 8 min 4 max 16");
    println!("option name SingularMargin type spin default 2 min 1 max 16");
    println!("option name QDeltaMargin type spin default 110 min 0 max 600");
    println!("option name UseLc0Eval type check default false");
    println!("option name Lc0WeightsFile type string default <empty>");
    println!("option name Lc0CpScale type spin default 220 min 1 max 2000");
    println!("option name Lc0ScoreMap type spin default 1 min 0 max 3");
    println!("option name Lc0EvalThreads type spin default 1 min 1 max 64");
    println!("option name Lc0BatchMax type spin default 16 min 1 max 512");
    println!("option name Lc0BatchWaitUs type spin default 1000 min 0 max 20000");
    println!("option name Lc0CacheEntries type spin default 262144 min 1024 max 16777216");
    println!("option name Lc0Backend type spin default 0 min 0 max 3");
}

fn print_eval(evaluator: &HybridEvaluator, pos: &Position) {
    let mut b = EvalBreakdown::default();
    let score = evaluator.static_eval_trace(pos, &mut b);
    println!(
        "info string eval score_cp {} phase {} mat_psqt_mg {} mat_psqt_eg {} pawns_mg {} pawns_eg {} \
         mobility_mg {} mobility_eg {} king_mg {} piece_mg {} threats_mg {} space_mg {} scale {} tempo {}",
        score,
        b.phase,
        b.material_psqt.mg,
        b.material_psqt.eg,
        b.pawns.mg,
        b.pawns.eg,
        b.mobility.mg,
        b.mobility.eg,
        b.king_safety.mg,
        b.piece_features.mg,
        b.threats.mg,
        b.space.mg,
        b.endgame_scale,
        b.tempo
    );
}

pub fn run_bench() {
    let evaluator = HybridEvaluator::new();
    let mut searcher = Searcher::new(&evaluator);

    let mut total_nodes = 0u64;
    let start = Instant::now();

    for fen in BENCH_FENS {
        let mut pos = Position::new();
        if !pos.set_from_fen(fen) {
            continue;
        }

        let limits = SearchLimits {
            nodes: BENCH_NODES_PER_POSITION,
            ..SearchLimits::default()
        };
        let result = searcher.search(&mut pos, &limits, None);
        total_nodes += result.stats.nodes;
        println!(
            "info string bench fen {} depth {} score {} nodes {}",
            fen,
            result.depth,
            score_string(result.score),
            result.stats.nodes
        );
    }

    let ms = start.elapsed().as_millis().max(1);
    println!("nodes searched {}", total_nodes);
    println!("nps {}", (total_nodes as u128 * 1000 / ms) as u64);
}

pub fn uci_loop() {
    let stdin = io::stdin();

    let evaluator = HybridEvaluator::new();
    let mut searcher = Searcher::new(&evaluator);
    let mut pos = Position::new();
    if !pos.set_startpos() {
        return;
    }

    let mut state = OptionState {
        config: SearchConfig::default(),
        move_overhead_ms: 30,
        nodes_as_time: false,
        pending_weights: None,
    };
    searcher.set_config(state.config.clone());

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = cmd.split_whitespace().collect();

        match tokens[0] {
            "uci" => {
                println!("id name {}", ENGINE_NAME);
                println!("id author {}", ENGINE_AUTHOR);
                print_options();
                println!("uciok");
            }
            "isready" => {
                load_pending_weights(&evaluator, &mut state);
                println!("readyok");
            }
            "ucinewgame" => {
                pos.set_startpos();
                searcher.clear_hash();
                searcher.clear_heuristics();
                evaluator.clear_stats();
            }
            "setoption" => {
                if !handle_setoption(&mut searcher, &evaluator, &mut state, &tokens) {
                    println!("info string unknown option");
                }
            }
            "position" => {
                if !handle_position(&mut pos, &tokens) {
                    println!("info string invalid position command");
                }
            }
            "go" => {
                if tokens.len() >= 3 && tokens[1] == "perft" {
                    let depth = parse_int(tokens[2], 1).max(1) as u32;
                    run_perft_command(&mut pos, depth);
                    continue;
                }

                load_pending_weights(&evaluator, &mut state);

                let mut limits = parse_go_limits(&tokens);
                limits.move_overhead_ms = state.move_overhead_ms;
                limits.nodes_as_time = state.nodes_as_time;
                if limits.depth <= 0
                    && limits.movetime_ms <= 0
                    && limits.nodes == 0
                    && limits.wtime_ms <= 0
                    && limits.btime_ms <= 0
                    && !limits.infinite
                {
                    limits.depth = 8;
                }

                let mut cb = |info: &SearchIterationInfo| print_iteration(info);
                let result = searcher.search(&mut pos, &limits, Some(&mut cb));
                println!("bestmove {}", movegen::move_to_uci(result.best_move));
            }
            "perft" => {
                if tokens.len() >= 2 {
                    let depth = parse_int(tokens[1], 1).max(1) as u32;
                    run_perft_command(&mut pos, depth);
                }
            }
            "bench" => {
                run_bench();
            }
            "eval" => {
                print_eval(&evaluator, &pos);
            }
            "stop" => {
                // Synchronous search: stop is consumed for UCI compatibility
            }
            "ponderhit" => {
                // No active ponder thread to promote
            }
            "quit" => break,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_globals() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_masks();
        crate::movegen::init_move_tables();
        crate::eval_tables::init_psqt();
    }

    #[test]
    fn test_score_string_encoding() {
        assert_eq!(score_string(42), "cp 42");
        assert_eq!(score_string(-15), "cp -15");
        // Mate in 1 ply (we mate next move): mate 1
        assert_eq!(score_string(VALUE_MATE - 1), "mate 1");
        assert_eq!(score_string(VALUE_MATE - 2), "mate 1");
        assert_eq!(score_string(VALUE_MATE - 3), "mate 2");
        assert_eq!(score_string(-(VALUE_MATE - 2)), "mate -1");
        assert_eq!(score_string(-(VALUE_MATE - 4)), "mate -2");
    }

    #[test]
    fn test_handle_position_startpos_moves() {
        init_globals();
        let mut pos = Position::new();
        assert!(handle_position(
            &mut pos,
            &["position", "startpos", "moves", "e2e4", "e7e5", "g1f3"]
        ));
        assert_eq!(pos.fullmove_number(), 2);
        assert_eq!(pos.side_to_move(), crate::state::BLACK);

        assert!(!handle_position(
            &mut pos,
            &["position", "startpos", "moves", "e2e5"]
        ));
    }

    #[test]
    fn test_handle_position_fen() {
        init_globals();
        let mut pos = Position::new();
        assert!(handle_position(
            &mut pos,
            &[
                "position", "fen", "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R",
                "w", "KQkq", "-", "0", "1"
            ]
        ));
        assert_eq!(pos.castling_rights(), 0x0F);
        assert!(!handle_position(&mut pos, &["position", "fen", "garbage"]));
    }

    #[test]
    fn test_parse_go_limits() {
        let limits = parse_go_limits(&[
            "go", "wtime", "60000", "btime", "50000", "winc", "1000", "binc", "900",
            "movestogo", "25",
        ]);
        assert_eq!(limits.wtime_ms, 60000);
        assert_eq!(limits.btime_ms, 50000);
        assert_eq!(limits.winc_ms, 1000);
        assert_eq!(limits.binc_ms, 900);
        assert_eq!(limits.movestogo, 25);

        let limits = parse_go_limits(&["go", "depth", "9"]);
        assert_eq!(limits.depth, 9);

        let limits = parse_go_limits(&["go", "infinite"]);
        assert!(limits.infinite);
    }

    #[test]
    fn test_option_name_normalization() {
        assert_eq!(normalized_option_name("Move Overhead"), "moveoverhead");
        assert_eq!(normalized_option_name("MoveOverhead"), "moveoverhead");
        assert_eq!(normalized_option_name("USE lmr"), "uselmr");
    }
}
