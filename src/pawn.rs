// src/pawn.rs
use crate::bitboard::{self, Bitboard};
use crate::eval_params;
use crate::evaluator::Score;
use crate::state::{file_of, rank_of, relative_rank, Position, BLACK, NO_PIECE, PAWN, WHITE};

pub const PAWN_HASH_MIN_ENTRIES: usize = 1024;

#[derive(Clone, Copy, Default, Debug)]
pub struct PawnHashEntry {
    pub key: u64,
    pub pawn_score: Score,
    pub passed: [Bitboard; 2],
    pub shelter_bonus_mg: [i32; 2],
}

// Direct-mapped, always-replace
pub struct PawnHashTable {
    table: Vec<PawnHashEntry>,
    mask: usize,
}

impl PawnHashTable {
    pub fn new(entries: usize) -> Self {
        let entries = entries.max(PAWN_HASH_MIN_ENTRIES).next_power_of_two();
        Self {
            table: vec![PawnHashEntry::default(); entries],
            mask: entries - 1,
        }
    }

    pub fn clear(&mut self) {
        self.table.fill(PawnHashEntry::default());
    }

    #[inline(always)]
    pub fn probe(&self, key: u64) -> Option<&PawnHashEntry> {
        let entry = &self.table[(key as usize) & self.mask];
        if entry.key == key && key != 0 {
            Some(entry)
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn store(&mut self, entry: PawnHashEntry) {
        let idx = (entry.key as usize) & self.mask;
        self.table[idx] = entry;
    }
}

fn sign_for(side: usize) -> i32 {
    if side == WHITE {
        1
    } else {
        -1
    }
}

/// Pawn structure plus king shelter/storm, computed once per distinct
/// (pawn layout, king files) and cached under `key`.
pub fn compute_pawn_entry(pos: &Position, key: u64) -> PawnHashEntry {
    let mut e = PawnHashEntry {
        key,
        ..PawnHashEntry::default()
    };

    let pawn_attacks = [
        bitboard::pawn_attacks(pos.pieces(WHITE, PAWN), WHITE),
        bitboard::pawn_attacks(pos.pieces(BLACK, PAWN), BLACK),
    ];

    for side in [WHITE, BLACK] {
        let them = 1 - side;
        let sign = sign_for(side);
        let our = pos.pieces(side, PAWN);
        let enemy = pos.pieces(them, PAWN);

        let mut pawns = our;
        while !pawns.is_empty() {
            let sq = pawns.pop_lsb();
            let rr = relative_rank(side, sq);
            let file = file_of(sq);
            let sq_bb = Bitboard(1u64 << sq);

            if (our & bitboard::adjacent_file_mask(file)).is_empty() {
                e.pawn_score += eval_params::ISOLATED_PAWN_PENALTY * -sign;
            }

            if (our & bitboard::file_mask(file)).count_bits() > 1 {
                e.pawn_score += eval_params::DOUBLED_PAWN_PENALTY * -sign;
            }

            let is_passed = (enemy & bitboard::passed_pawn_mask(side, sq as usize)).is_empty();
            if is_passed {
                e.passed[side].set_bit(sq);
                e.pawn_score += crate::evaluator::make_score(
                    eval_params::PASSED_PAWN_MG[rr],
                    eval_params::PASSED_PAWN_EG[rr],
                ) * sign;

                if !(pawn_attacks[side] & sq_bb).is_empty() {
                    e.pawn_score += eval_params::SUPPORTED_PASSER_BONUS * sign;
                }
                if !(our & bitboard::adjacent_file_mask(file)).is_empty() {
                    e.pawn_score += eval_params::CONNECTED_PASSER_BONUS * sign;
                }
                if file <= 1 || file >= 6 {
                    e.pawn_score += eval_params::OUTSIDE_PASSER_BONUS * sign;
                }

                let stop = if side == WHITE { sq as i32 + 8 } else { sq as i32 - 8 };
                if (0..64).contains(&stop) && pos.piece_on(stop as u8) != NO_PIECE {
                    e.pawn_score += eval_params::BLOCKED_PASSER_PENALTY * -sign;
                }
            } else if (enemy & bitboard::forward_mask(side, sq as usize)).is_empty() {
                e.pawn_score += eval_params::CANDIDATE_PAWN_BONUS * sign;
            }

            let stop = if side == WHITE { sq as i32 + 8 } else { sq as i32 - 8 };
            if (0..64).contains(&stop) {
                let stop = stop as u8;
                let blocked = pos.piece_on(stop) != NO_PIECE;
                let no_support = (our
                    & bitboard::adjacent_file_mask(file)
                    & bitboard::forward_mask(them, sq as usize))
                .is_empty();
                if blocked && no_support && pawn_attacks[them].get_bit(stop) {
                    e.pawn_score += eval_params::BACKWARD_PAWN_PENALTY * -sign;
                }
            }
        }
    }

    for side in [WHITE, BLACK] {
        let ksq = pos.king_square(side);
        let kf = file_of(ksq) as i32;
        let kr = rank_of(ksq) as i32;
        let mut shelter = 0;

        for df in -1..=1 {
            let f = kf + df;
            if !(0..8).contains(&f) {
                continue;
            }

            // Nearest friendly pawn ahead of the king on this file
            let mut file_pawns = pos.pieces(side, PAWN) & bitboard::file_mask(f as usize);
            let mut best: Option<i32> = None;
            while !file_pawns.is_empty() {
                let psq = file_pawns.pop_lsb();
                let dist = if side == WHITE {
                    rank_of(psq) as i32 - kr
                } else {
                    kr - rank_of(psq) as i32
                };
                if (0..=7).contains(&dist) {
                    best = Some(match best {
                        Some(b) => b.min(dist),
                        None => dist,
                    });
                }
            }
            if let Some(dist) = best {
                shelter += eval_params::SHELTER_PAWN_BONUS[dist as usize];
            }

            let mut storms = pos.pieces(1 - side, PAWN) & bitboard::file_mask(f as usize);
            let mut best: Option<i32> = None;
            while !storms.is_empty() {
                let esq = storms.pop_lsb();
                let dist = if side == WHITE {
                    kr - rank_of(esq) as i32
                } else {
                    rank_of(esq) as i32 - kr
                };
                if (0..=7).contains(&dist) {
                    best = Some(match best {
                        Some(b) => b.min(dist),
                        None => dist,
                    });
                }
            }
            if let Some(dist) = best {
                shelter -= eval_params::STORM_PAWN_PENALTY[dist as usize];
            }
        }

        e.shelter_bonus_mg[side] = shelter;
    }

    e
}
