use crate::movegen::{self, MoveList};
use crate::state::Position;
use std::time::Instant;

// Recursive perft: pseudo-legal generation with legality settled by make_move
pub fn perft(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }

    let mut nodes = 0;
    let mut list = MoveList::new();
    movegen::generate_pseudo_legal(pos, &mut list);

    for i in 0..list.count {
        let mv = list.moves[i];
        if pos.make_move(mv) {
            nodes += perft(pos, depth - 1);
            pos.unmake_move();
        }
    }
    nodes
}

pub fn perft_divide(pos: &mut Position, depth: u32) -> Vec<(String, u64)> {
    let mut rows = Vec::new();
    let mut list = MoveList::new();
    movegen::generate_pseudo_legal(pos, &mut list);

    for i in 0..list.count {
        let mv = list.moves[i];
        if pos.make_move(mv) {
            let count = if depth > 0 { perft(pos, depth - 1) } else { 1 };
            pos.unmake_move();
            rows.push((movegen::move_to_uci(mv), count));
        }
    }
    rows
}

pub fn run_perft_suite() {
    println!("--- Kingfisher Perft Suite ---");

    let positions: [(&str, &str, [u64; 6]); 6] = [
        (
            "Start Position",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            [1, 20, 400, 8902, 197281, 4865609],
        ),
        (
            "Position 2 (Kiwipete)",
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            [1, 48, 2039, 97862, 4085603, 193690690],
        ),
        (
            "Position 3",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            [1, 14, 191, 2812, 43238, 674624],
        ),
        (
            "Position 4",
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
            [1, 6, 264, 9467, 422333, 15833292],
        ),
        (
            "Position 5",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
            [1, 44, 1486, 62379, 2103487, 89941194],
        ),
        (
            "Position 6",
            "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
            [1, 46, 2079, 89890, 3894594, 164075551],
        ),
    ];

    let mut total_nodes = 0u64;
    let mut total_ms = 0u128;

    for (name, fen, expected) in positions.iter() {
        println!("\nTesting: {}", name);
        let mut pos = Position::new();
        if !pos.set_from_fen(fen) {
            println!("RESULT: FAIL (bad FEN)");
            continue;
        }

        let depth = 4usize;
        let start = Instant::now();
        let nodes = perft(&mut pos, depth as u32);
        let elapsed = start.elapsed().as_millis();

        total_nodes += nodes;
        total_ms += elapsed;

        println!("Depth {}: Nodes: {} Time: {}ms", depth, nodes, elapsed);
        if nodes == expected[depth] {
            println!("RESULT: PASS");
        } else {
            println!("RESULT: FAIL (Expected {})", expected[depth]);
            for (uci, count) in perft_divide(&mut pos, depth as u32) {
                println!("{}: {}", uci, count);
            }
        }
    }

    println!("\n--- SUITE COMPLETE ---");
    println!("Total Nodes: {}", total_nodes);
    println!("Total Time:  {}ms", total_ms);
    if total_ms > 0 {
        println!("NPS:         {}", (total_nodes as u128 * 1000) / total_ms);
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
    fn test_perft_start_pos() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        assert_eq!(perft(&mut pos, 1), 20);
        assert_eq!(perft(&mut pos, 2), 400);
        assert_eq!(perft(&mut pos, 3), 8902);
        assert_eq!(perft(&mut pos, 4), 197281);
    }

    #[test]
    #[ignore] // ~seconds in debug builds; run with --ignored
    fn test_perft_start_pos_deep() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        assert_eq!(perft(&mut pos, 5), 4865609);
    }

    #[test]
    fn test_perft_kiwipete() {
        init_globals();
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
    fn test_perft_kiwipete_deep() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
        ));
        assert_eq!(perft(&mut pos, 4), 4085603);
    }

    #[test]
    fn test_perft_position3() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1"));
        assert_eq!(perft(&mut pos, 1), 14);
        assert_eq!(perft(&mut pos, 2), 191);
        assert_eq!(perft(&mut pos, 3), 2812);
        assert_eq!(perft(&mut pos, 4), 43238);
    }

    #[test]
    fn test_perft_position4() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_from_fen(
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1"
        ));
        assert_eq!(perft(&mut pos, 1), 6);
        assert_eq!(perft(&mut pos, 2), 264);
        assert_eq!(perft(&mut pos, 3), 9467);
    }

    #[test]
    fn test_perft_position5() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_from_fen(
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8"
        ));
        assert_eq!(perft(&mut pos, 1), 44);
        assert_eq!(perft(&mut pos, 2), 1486);
        assert_eq!(perft(&mut pos, 3), 62379);
    }

    #[test]
    fn test_perft_position6() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_from_fen(
            "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10"
        ));
        assert_eq!(perft(&mut pos, 1), 46);
        assert_eq!(perft(&mut pos, 2), 2079);
        assert_eq!(perft(&mut pos, 3), 89890);
    }

    #[test]
    fn test_perft_divide_totals_match() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        let rows = perft_divide(&mut pos, 3);
        assert_eq!(rows.len(), 20);
        let total: u64 = rows.iter().map(|(_, n)| n).sum();
        assert_eq!(total, perft(&mut pos, 3));
    }
}
