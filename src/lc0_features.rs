// src/lc0_features.rs
//
// 112-plane input extraction. Planes are oriented to the side to move: when
// black is to move every bitboard is vertically mirrored so the network always
// sees the board from "our" point of view.
use crate::bitboard::Bitboard;
use crate::state::{mirror, Position, BISHOP, BLACK, KING, KNIGHT, PAWN, QUEEN, ROOK, WHITE};

pub const PLANES: usize = 112;
pub const SQUARES: usize = 64;
pub const HISTORY_PLIES: usize = 8;

pub type InputPlanes = [f32; PLANES * SQUARES];

fn set_plane_all(out: &mut InputPlanes, plane: usize, value: f32) {
    let base = plane * SQUARES;
    for v in out[base..base + SQUARES].iter_mut() {
        *v = value;
    }
}

fn fill_plane_bb(out: &mut InputPlanes, plane: usize, mut bb: Bitboard, flip: bool) {
    let base = plane * SQUARES;
    while !bb.is_empty() {
        let sq = bb.pop_lsb();
        let sq = if flip { mirror(sq) } else { sq };
        out[base + sq as usize] = 1.0;
    }
}

/// Walk back through the move history on a scratch copy; when history runs out
/// the earliest reachable position fills the remaining slots.
fn reconstruct_history(pos: &Position, plies: usize) -> Vec<Position> {
    let mut states = Vec::with_capacity(plies);

    let mut cur = pos.clone();
    states.push(cur.clone());

    for _ in 1..plies {
        if cur.history_len() == 0 {
            break;
        }
        cur.unmake_move();
        states.push(cur.clone());
    }

    while states.len() < plies {
        let last = states.last().expect("at least the current position").clone();
        states.push(last);
    }

    states
}

pub fn extract_features_112(pos: &Position) -> Box<InputPlanes> {
    let mut out: Box<InputPlanes> = Box::new([0f32; PLANES * SQUARES]);

    let stm = pos.side_to_move();
    let flip = stm == BLACK;

    // 8 history plies * 13 planes = 104 planes; slot 0 is the current position
    let states = reconstruct_history(pos, HISTORY_PLIES);

    for (h, s) in states.iter().enumerate() {
        let ours = s.side_to_move();
        let theirs = 1 - ours;
        let base = h * 13;

        for (offset, pt) in [PAWN, KNIGHT, BISHOP, ROOK, QUEEN, KING].iter().enumerate() {
            fill_plane_bb(&mut out, base + offset, s.pieces(ours, *pt), flip);
            fill_plane_bb(&mut out, base + 6 + offset, s.pieces(theirs, *pt), flip);
        }

        if s.is_repetition() {
            set_plane_all(&mut out, base + 12, 1.0);
        }
    }

    // Castling rights from the side-to-move perspective
    let cr = pos.castling_rights();
    let (we_oo, we_ooo, they_oo, they_ooo) = if stm == WHITE {
        (
            cr & crate::state::WHITE_OO != 0,
            cr & crate::state::WHITE_OOO != 0,
            cr & crate::state::BLACK_OO != 0,
            cr & crate::state::BLACK_OOO != 0,
        )
    } else {
        (
            cr & crate::state::BLACK_OO != 0,
            cr & crate::state::BLACK_OOO != 0,
            cr & crate::state::WHITE_OO != 0,
            cr & crate::state::WHITE_OOO != 0,
        )
    };

    if we_ooo {
        set_plane_all(&mut out, 104, 1.0);
    }
    if we_oo {
        set_plane_all(&mut out, 105, 1.0);
    }
    if they_ooo {
        set_plane_all(&mut out, 106, 1.0);
    }
    if they_oo {
        set_plane_all(&mut out, 107, 1.0);
    }

    if stm == BLACK {
        set_plane_all(&mut out, 108, 1.0);
    }

    set_plane_all(&mut out, 109, pos.halfmove_clock() as f32);
    // Plane 110 stays zero
    set_plane_all(&mut out, 111, 1.0);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::parse_uci_move;

    fn init_globals() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_masks();
        crate::movegen::init_move_tables();
        crate::eval_tables::init_psqt();
    }

    fn plane(out: &InputPlanes, idx: usize) -> &[f32] {
        &out[idx * SQUARES..(idx + 1) * SQUARES]
    }

    #[test]
    fn test_startpos_planes() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        let planes = extract_features_112(&pos);

        // Own pawns on rank 2
        let own_pawns = plane(&planes, 0);
        for f in 0..8 {
            assert_eq!(own_pawns[8 + f], 1.0);
        }
        assert_eq!(own_pawns.iter().sum::<f32>(), 8.0);

        // Enemy king on e8
        assert_eq!(plane(&planes, 11)[60], 1.0);

        // All four castling planes set; stm plane zero; bias plane one
        for p in 104..=107 {
            assert_eq!(plane(&planes, p).iter().sum::<f32>(), 64.0);
        }
        assert_eq!(plane(&planes, 108).iter().sum::<f32>(), 0.0);
        assert_eq!(plane(&planes, 110).iter().sum::<f32>(), 0.0);
        assert_eq!(plane(&planes, 111).iter().sum::<f32>(), 64.0);
    }

    #[test]
    fn test_black_to_move_orientation() {
        init_globals();

        // White to move with a pawn on e4
        let mut white_pos = Position::new();
        assert!(white_pos.set_from_fen("4k3/8/8/8/4P3/8/8/4K3 w - - 0 1"));
        let white_planes = extract_features_112(&white_pos);

        // Mirrored position, black to move: own pawn plane must be identical
        let mut black_pos = Position::new();
        assert!(black_pos.set_from_fen("4k3/8/8/4p3/8/8/8/4K3 b - - 0 1"));
        let black_planes = extract_features_112(&black_pos);

        assert_eq!(plane(&white_planes, 0), plane(&black_planes, 0));
        assert_eq!(plane(&white_planes, 5), plane(&black_planes, 5));
        assert_eq!(plane(&white_planes, 11), plane(&black_planes, 11));

        // Side-to-move plane is all ones exactly for black
        assert_eq!(plane(&black_planes, 108).iter().sum::<f32>(), 64.0);
        assert_eq!(plane(&white_planes, 108).iter().sum::<f32>(), 0.0);
    }

    #[test]
    fn test_history_slots_follow_unmakes() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        let e2e4 = parse_uci_move(&mut pos, "e2e4");
        assert!(pos.make_move(e2e4));

        let planes = extract_features_112(&pos);
        // Slot 0: black to move, enemy (white) pawn on mirrored e4 = e5 frame
        // Enemy pawn plane of slot 0 carries 8 pawns
        assert_eq!(plane(&planes, 6).iter().sum::<f32>(), 8.0);
        // Slot 1 is the start position from white's view (own pawns plane, mirrored)
        assert_eq!(plane(&planes, 13).iter().sum::<f32>(), 8.0);
    }

    #[test]
    fn test_exhausted_history_replicates_earliest() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        let planes = extract_features_112(&pos);
        // No history at all: every slot equals the current position
        for h in 1..HISTORY_PLIES {
            assert_eq!(plane(&planes, 0), plane(&planes, h * 13));
        }
    }

    #[test]
    fn test_rule50_plane_broadcast() {
        init_globals();
        let mut pos = Position::new();
        assert!(pos.set_from_fen("4k3/8/8/8/8/8/8/4K3 w - - 37 40"));
        let planes = extract_features_112(&pos);
        for v in plane(&planes, 109) {
            assert_eq!(*v, 37.0);
        }
    }
}
