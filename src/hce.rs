// src/hce.rs
use crate::bitboard::{self, Bitboard};
use crate::eval_params;
use crate::evaluator::{make_score, EvalBreakdown, EvalStats, Evaluator, Score};
use crate::pawn::{self, PawnHashTable};
use crate::state::{
    file_of, relative_rank, Position, BISHOP, BLACK, KING, KNIGHT, PAWN, QUEEN, ROOK,
    WHITE,
};
use crate::zobrist;
use std::cell::RefCell;

const PAWN_HASH_ENTRIES: usize = 1 << 16;

// Squares c3..f6
const CENTER_MASK: u64 = {
    let mut b = 0u64;
    let mut r = 2;
    while r <= 5 {
        let mut f = 2;
        while f <= 5 {
            b |= 1u64 << (r * 8 + f);
            f += 1;
        }
        r += 1;
    }
    b
};

fn sign_for(side: usize) -> i32 {
    if side == WHITE {
        1
    } else {
        -1
    }
}

fn square_color(sq: u8) -> usize {
    ((sq % 8) + (sq / 8)) as usize & 1
}

fn king_centralization(sq: u8) -> i32 {
    let f = (sq % 8) as i32;
    let r = (sq / 8) as i32;
    14 - ((2 * f - 7).abs() + (2 * r - 7).abs())
}

#[derive(Default)]
struct AttackInfo {
    pawn_attacks: [Bitboard; 2],
    all_attacks: [Bitboard; 2],
    mobility: Score,
    king_attackers: [i32; 2],
    king_attack_units: [i32; 2],
}

pub struct HCEEvaluator {
    pawn_hash: RefCell<PawnHashTable>,
    stats: RefCell<EvalStats>,
}

impl HCEEvaluator {
    pub fn new() -> Self {
        Self {
            pawn_hash: RefCell::new(PawnHashTable::new(PAWN_HASH_ENTRIES)),
            stats: RefCell::new(EvalStats::default()),
        }
    }

    /// Full recompute path, used by tests to cross-check the incremental sums.
    pub fn static_eval_recompute(&self, pos: &Position) -> i32 {
        self.evaluate(pos, false, None)
    }

    fn material_psqt(&self, pos: &Position, use_incremental: bool) -> Score {
        if use_incremental {
            return make_score(
                pos.mg_psqt(WHITE) - pos.mg_psqt(BLACK),
                pos.eg_psqt(WHITE) - pos.eg_psqt(BLACK),
            );
        }

        let mut s = Score::default();
        for sq in 0..64u8 {
            let pc = pos.piece_on(sq);
            if pc == crate::state::NO_PIECE {
                continue;
            }
            let ps = crate::eval_tables::psqt(pc, sq);
            let sign = sign_for(crate::state::piece_color_of(pc));
            s += ps * sign;
        }
        s
    }

    fn build_attack_info(&self, pos: &Position) -> AttackInfo {
        let mut ai = AttackInfo::default();
        let occ = pos.occupancy_both();

        for side in [WHITE, BLACK] {
            ai.pawn_attacks[side] = bitboard::pawn_attacks(pos.pieces(side, PAWN), side);
            ai.all_attacks[side] = ai.pawn_attacks[side];
        }

        for side in [WHITE, BLACK] {
            let them = 1 - side;
            let own_occ = pos.occupancy(side);
            let enemy_pawn_attacks = ai.pawn_attacks[them];
            let enemy_king = pos.king_square(them);
            let king_ring = crate::movegen::king_attacks(enemy_king) | Bitboard(1u64 << enemy_king);

            for pt in [KNIGHT, BISHOP, ROOK, QUEEN] {
                let mut pieces = pos.pieces(side, pt);
                while !pieces.is_empty() {
                    let sq = pieces.pop_lsb();
                    let atk = match pt {
                        KNIGHT => crate::movegen::knight_attacks(sq),
                        BISHOP => bitboard::get_bishop_attacks(sq, occ),
                        ROOK => bitboard::get_rook_attacks(sq, occ),
                        _ => bitboard::get_queen_attacks(sq, occ),
                    };

                    ai.all_attacks[side] = ai.all_attacks[side] | atk;

                    let mobility_targets = atk & !own_occ & !enemy_pawn_attacks;
                    let mob = (mobility_targets.count_bits() as usize).min(15);
                    ai.mobility.mg += sign_for(side) * eval_params::MOBILITY_BONUS_MG[pt][mob];
                    ai.mobility.eg += sign_for(side) * eval_params::MOBILITY_BONUS_EG[pt][mob];

                    let ring_hits = (atk & king_ring).count_bits() as i32;
                    if ring_hits > 0 {
                        ai.king_attackers[side] += 1;
                        ai.king_attack_units[side] += ring_hits * eval_params::KING_ATTACK_UNIT[pt];
                    }
                }
            }

            ai.all_attacks[side] =
                ai.all_attacks[side] | crate::movegen::king_attacks(pos.king_square(side));
        }

        ai
    }

    fn piece_features(&self, pos: &Position, ai: &AttackInfo) -> Score {
        let mut s = Score::default();

        for side in [WHITE, BLACK] {
            let sign = sign_for(side);

            if pos.pieces(side, BISHOP).count_bits() >= 2 {
                s += eval_params::BISHOP_PAIR_BONUS * sign;
            }

            let mut rooks = pos.pieces(side, ROOK);
            while !rooks.is_empty() {
                let sq = rooks.pop_lsb();
                let file = bitboard::file_mask(file_of(sq));
                let own_pawn = !(pos.pieces(side, PAWN) & file).is_empty();
                let enemy_pawn = !(pos.pieces(1 - side, PAWN) & file).is_empty();

                if !own_pawn && !enemy_pawn {
                    s += eval_params::ROOK_OPEN_FILE_BONUS * sign;
                } else if !own_pawn && enemy_pawn {
                    s += eval_params::ROOK_SEMIOPEN_FILE_BONUS * sign;
                }

                if relative_rank(side, sq) == 6 {
                    s += eval_params::ROOK_ON_SEVENTH_BONUS * sign;
                }
            }

            let mut knights = pos.pieces(side, KNIGHT);
            while !knights.is_empty() {
                let sq = knights.pop_lsb();
                let rr = relative_rank(side, sq);
                if !(3..=5).contains(&rr) {
                    continue;
                }
                let sq_bb = Bitboard(1u64 << sq);
                if !(ai.pawn_attacks[side] & sq_bb).is_empty()
                    && (ai.pawn_attacks[1 - side] & sq_bb).is_empty()
                {
                    s += eval_params::KNIGHT_OUTPOST_BONUS * sign;
                }
            }

            let mut bad_bishop_pawns = 0;
            let mut bishops = pos.pieces(side, BISHOP);
            while !bishops.is_empty() {
                let bsq = bishops.pop_lsb();
                let bcolor = square_color(bsq);
                let mut pawns = pos.pieces(side, PAWN);
                while !pawns.is_empty() {
                    let psq = pawns.pop_lsb();
                    if square_color(psq) == bcolor {
                        bad_bishop_pawns += 1;
                    }
                }
            }
            s += eval_params::BAD_BISHOP_PENALTY * ((-sign * bad_bishop_pawns) / 2);
        }

        s
    }

    fn threats(&self, pos: &Position, ai: &AttackInfo) -> Score {
        let mut s = Score::default();

        for side in [WHITE, BLACK] {
            let them = 1 - side;
            let sign = sign_for(side);
            let enemy_pieces = pos.occupancy(them) & !pos.pieces(them, KING);

            let mut pawn_threats = ai.pawn_attacks[side] & enemy_pieces;
            while !pawn_threats.is_empty() {
                let sq = pawn_threats.pop_lsb();
                if !ai.all_attacks[them].get_bit(sq) {
                    s += eval_params::THREAT_BY_PAWN_BONUS * sign;
                }
            }

            let hanging = ai.all_attacks[side] & enemy_pieces & !ai.all_attacks[them];
            s += eval_params::HANGING_PIECE_BONUS * (sign * hanging.count_bits() as i32);
        }

        s
    }

    fn space(&self, pos: &Position, ai: &AttackInfo) -> Score {
        let mut s = Score::default();

        for side in [WHITE, BLACK] {
            if pos.pieces(side, PAWN).count_bits() < 4 {
                continue;
            }

            let controlled = ai.all_attacks[side] & Bitboard(CENTER_MASK);
            let free = controlled & !pos.occupancy(side);
            s += eval_params::SPACE_BONUS * (sign_for(side) * free.count_bits() as i32);
        }

        s
    }

    fn endgame_terms(&self, pos: &Position) -> Score {
        let w_center = king_centralization(pos.king_square(WHITE));
        let b_center = king_centralization(pos.king_square(BLACK));
        make_score(
            0,
            (w_center - b_center) * eval_params::KING_ACTIVITY_BONUS.eg / 8,
        )
    }

    fn endgame_scale(&self, pos: &Position, blended_white_pov: i32) -> i32 {
        let mut scale = 128;

        let only_bishops = pos.pieces(WHITE, KNIGHT).is_empty()
            && pos.pieces(BLACK, KNIGHT).is_empty()
            && pos.pieces(WHITE, ROOK).is_empty()
            && pos.pieces(BLACK, ROOK).is_empty()
            && pos.pieces(WHITE, QUEEN).is_empty()
            && pos.pieces(BLACK, QUEEN).is_empty();

        if only_bishops
            && pos.pieces(WHITE, BISHOP).count_bits() == 1
            && pos.pieces(BLACK, BISHOP).count_bits() == 1
        {
            scale = 96;
        }

        let total_pawns =
            (pos.pieces(WHITE, PAWN) | pos.pieces(BLACK, PAWN)).count_bits();
        if total_pawns <= 2 && blended_white_pov.abs() < 120 {
            scale = scale.min(88);
        }

        scale
    }

    fn evaluate(&self, pos: &Position, use_incremental: bool, out: Option<&mut EvalBreakdown>) -> i32 {
        self.stats.borrow_mut().eval_calls += 1;

        let mut b = EvalBreakdown::default();
        b.material_psqt = self.material_psqt(pos, use_incremental);

        let pawn_key = pos.pawn_key()
            ^ zobrist::pawn_file_king_key(WHITE, file_of(pos.king_square(WHITE)))
            ^ zobrist::pawn_file_king_key(BLACK, file_of(pos.king_square(BLACK)));

        let entry = {
            let cached = self.pawn_hash.borrow().probe(pawn_key).copied();
            match cached {
                Some(e) => {
                    self.stats.borrow_mut().pawn_hash_hits += 1;
                    e
                }
                None => {
                    self.stats.borrow_mut().pawn_hash_misses += 1;
                    let e = pawn::compute_pawn_entry(pos, pawn_key);
                    self.pawn_hash.borrow_mut().store(e);
                    e
                }
            }
        };

        b.pawns = entry.pawn_score;
        b.king_safety.mg += entry.shelter_bonus_mg[WHITE] - entry.shelter_bonus_mg[BLACK];

        let ai = self.build_attack_info(pos);
        b.mobility = ai.mobility;

        for side in [WHITE, BLACK] {
            let them = 1 - side;
            let sign = sign_for(side);
            let attackers = ai.king_attackers[side].clamp(0, 7) as usize;
            let np_scale = (pos.non_pawn_material(side) / 8).clamp(0, 128);
            let danger =
                (ai.king_attack_units[side] * eval_params::KING_DANGER_SCALE[attackers] * np_scale)
                    / 256;
            b.king_safety.mg += sign * danger;

            if pos.non_pawn_material(them) < 1200 {
                b.king_safety.mg -= sign * (danger / 3);
            }
        }

        b.piece_features = self.piece_features(pos, &ai);
        b.threats = self.threats(pos, &ai);
        b.space = self.space(pos, &ai);
        b.endgame_scale = self.endgame_scale(pos, b.material_psqt.mg + b.pawns.mg);

        let mut total = Score::default();
        total += b.material_psqt;
        total += b.pawns;
        total += b.mobility;
        total += b.king_safety;
        total += b.piece_features;
        total += b.threats;
        total += b.space;
        total += self.endgame_terms(pos);

        let tempo_sign = sign_for(pos.side_to_move());
        total.mg += eval_params::TEMPO_BONUS * tempo_sign;
        b.tempo = eval_params::TEMPO_BONUS * tempo_sign;

        let phase = if use_incremental {
            pos.phase().clamp(0, eval_params::MAX_PHASE)
        } else {
            let minors = (pos.pieces(WHITE, KNIGHT) | pos.pieces(BLACK, KNIGHT)).count_bits()
                + (pos.pieces(WHITE, BISHOP) | pos.pieces(BLACK, BISHOP)).count_bits();
            let rooks = (pos.pieces(WHITE, ROOK) | pos.pieces(BLACK, ROOK)).count_bits();
            let queens = (pos.pieces(WHITE, QUEEN) | pos.pieces(BLACK, QUEEN)).count_bits();
            ((minors + 2 * rooks + 4 * queens) as i32).clamp(0, eval_params::MAX_PHASE)
        };
        b.phase = phase;

        let mut blended = (total.mg * phase + total.eg * (eval_params::MAX_PHASE - phase))
            / eval_params::MAX_PHASE;
        blended = (blended * b.endgame_scale) / 128;
        b.total_white_pov = blended;

        if let Some(out) = out {
            *out = b;
        }

        if pos.side_to_move() == WHITE {
            blended
        } else {
            -blended
        }
    }
}

impl Default for HCEEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for HCEEvaluator {
    fn static_eval(&self, pos: &Position) -> i32 {
        self.evaluate(pos, true, None)
    }

    fn static_eval_trace(&self, pos: &Position, out: &mut EvalBreakdown) -> i32 {
        self.evaluate(pos, true, Some(out))
    }

    fn stats(&self) -> EvalStats {
        *self.stats.borrow()
    }

    fn clear_stats(&self) {
        *self.stats.borrow_mut() = EvalStats::default();
        self.pawn_hash.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::{self, MoveList};

    fn init_globals() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_masks();
        crate::movegen::init_move_tables();
        crate::eval_tables::init_psqt();
    }

    #[test]
    fn test_eval_deterministic() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut pos = Position::new();
        assert!(pos.set_from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
        ));
        assert_eq!(eval.static_eval(&pos), eval.static_eval(&pos));
    }

    #[test]
    fn test_eval_color_symmetry() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut pos = Position::new();
        let fens = [
            (
                "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 0 3",
                "rnbqkb1r/pppp1ppp/5n2/4p3/4P3/2N5/PPPP1PPP/R1BQKBNR b KQkq - 0 3",
            ),
            (
                "4k3/8/8/8/3P4/8/8/4K3 w - - 0 1",
                "4k3/8/8/3p4/8/8/8/4K3 b - - 0 1",
            ),
        ];
        for (white_pov, black_pov) in fens {
            assert!(pos.set_from_fen(white_pov));
            let a = eval.static_eval(&pos);
            assert!(pos.set_from_fen(black_pov));
            let b = eval.static_eval(&pos);
            assert!((a - b).abs() <= 4, "asymmetry {} vs {}", a, b);
        }
    }

    #[test]
    fn test_material_advantage_sign() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut pos = Position::new();
        // White up a queen, white to move: strongly positive
        assert!(pos.set_from_fen("4k3/8/8/8/8/8/8/3QK3 w - - 0 1"));
        assert!(eval.static_eval(&pos) > 500);
        // Same position, black to move: strongly negative
        assert!(pos.set_from_fen("4k3/8/8/8/8/8/8/3QK3 b - - 0 1"));
        assert!(eval.static_eval(&pos) < -500);
    }

    #[test]
    fn test_incremental_matches_recompute_after_walk() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut pos = Position::new();
        assert!(pos.set_from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
        ));

        // Walk a few legal moves deep, checking at each node
        for _ in 0..6 {
            assert_eq!(eval.static_eval(&pos), eval.static_eval_recompute(&pos));
            let mut list = MoveList::new();
            movegen::generate_legal(&mut pos, &mut list);
            if list.count == 0 {
                break;
            }
            assert!(pos.make_move(list.moves[0]));
        }
        assert_eq!(eval.static_eval(&pos), eval.static_eval_recompute(&pos));
    }

    #[test]
    fn test_pawn_hash_hits() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        eval.clear_stats();
        eval.static_eval(&pos);
        eval.static_eval(&pos);
        let stats = eval.stats();
        assert_eq!(stats.pawn_hash_misses, 1);
        assert_eq!(stats.pawn_hash_hits, 1);
        assert_eq!(stats.eval_calls, 2);
    }

    #[test]
    fn test_trace_breakdown_populated() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        let mut b = EvalBreakdown::default();
        let score = eval.static_eval_trace(&pos, &mut b);
        assert_eq!(b.phase, 24);
        assert_eq!(b.endgame_scale, 128);
        assert_eq!(b.total_white_pov, score);
        assert_eq!(b.tempo, eval_params::TEMPO_BONUS);
    }
}
