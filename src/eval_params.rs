use crate::evaluator::{make_score, Score};

// --- MATERIAL / PHASE ---
#[rustfmt::skip]
pub const PIECE_VALUE: [Score; 6] = [
    make_score(82, 94),     // pawn
    make_score(337, 281),   // knight
    make_score(365, 297),   // bishop
    make_score(477, 512),   // rook
    make_score(1025, 936),  // queen
    make_score(0, 0),       // king
];

pub const PHASE_INC: [i32; 6] = [0, 1, 1, 2, 4, 0];
pub const MAX_PHASE: i32 = 24;
pub const TEMPO_BONUS: i32 = 10;

// --- PIECE FEATURES ---
pub const BISHOP_PAIR_BONUS: Score = make_score(28, 52);
pub const ROOK_OPEN_FILE_BONUS: Score = make_score(24, 6);
pub const ROOK_SEMIOPEN_FILE_BONUS: Score = make_score(14, 4);
pub const ROOK_ON_SEVENTH_BONUS: Score = make_score(18, 28);
pub const KNIGHT_OUTPOST_BONUS: Score = make_score(18, 14);
pub const BAD_BISHOP_PENALTY: Score = make_score(10, 6);

// --- PAWN STRUCTURE ---
#[rustfmt::skip] pub const PASSED_PAWN_MG: [i32; 8] = [0, 0, 10, 18, 36, 58, 96, 0];
#[rustfmt::skip] pub const PASSED_PAWN_EG: [i32; 8] = [0, 0, 16, 30, 58, 96, 150, 0];
pub const ISOLATED_PAWN_PENALTY: Score = make_score(14, 10);
pub const DOUBLED_PAWN_PENALTY: Score = make_score(11, 14);
pub const BACKWARD_PAWN_PENALTY: Score = make_score(10, 8);
pub const CANDIDATE_PAWN_BONUS: Score = make_score(8, 14);
pub const CONNECTED_PASSER_BONUS: Score = make_score(12, 20);
pub const SUPPORTED_PASSER_BONUS: Score = make_score(10, 16);
pub const OUTSIDE_PASSER_BONUS: Score = make_score(6, 16);
pub const BLOCKED_PASSER_PENALTY: Score = make_score(14, 10);

// --- KING SHELTER / STORM (indexed by pawn distance from the king rank) ---
#[rustfmt::skip] pub const SHELTER_PAWN_BONUS: [i32; 8] = [0, 34, 26, 18, 10, 6, 3, 0];
#[rustfmt::skip] pub const STORM_PAWN_PENALTY: [i32; 8] = [0, 8, 12, 18, 26, 34, 44, 0];

// --- MOBILITY (attack-count buckets, clamped to 0..15) ---
#[rustfmt::skip]
pub const MOBILITY_BONUS_MG: [[i32; 16]; 6] = [
    [0; 16],
    [-20, -12, -6, -2, 2, 6, 10, 14, 18, 20, 22, 24, 24, 24, 24, 24],
    [-16, -8, -2, 2, 6, 10, 14, 18, 22, 24, 26, 28, 28, 28, 28, 28],
    [-12, -6, 0, 4, 8, 12, 16, 20, 24, 26, 28, 30, 32, 32, 32, 32],
    [-8, -2, 2, 6, 10, 14, 18, 22, 26, 28, 30, 32, 34, 36, 36, 36],
    [0; 16],
];

#[rustfmt::skip]
pub const MOBILITY_BONUS_EG: [[i32; 16]; 6] = [
    [0; 16],
    [-12, -8, -4, -2, 0, 2, 4, 6, 8, 9, 10, 11, 12, 12, 12, 12],
    [-10, -6, -2, 0, 2, 4, 6, 8, 10, 11, 12, 13, 14, 14, 14, 14],
    [-8, -4, -1, 2, 4, 6, 8, 10, 12, 13, 14, 15, 16, 16, 16, 16],
    [-6, -2, 1, 4, 6, 8, 10, 12, 14, 15, 16, 17, 18, 20, 20, 20],
    [0; 16],
];

// --- KING DANGER ---
pub const KING_ATTACK_UNIT: [i32; 6] = [0, 2, 2, 3, 5, 0];
#[rustfmt::skip] pub const KING_DANGER_SCALE: [i32; 8] = [0, 1, 3, 6, 10, 15, 21, 28];

// --- THREATS / SPACE / ENDGAME ---
pub const HANGING_PIECE_BONUS: Score = make_score(18, 14);
pub const THREAT_BY_PAWN_BONUS: Score = make_score(16, 10);
pub const SPACE_BONUS: Score = make_score(4, 0);
pub const KING_ACTIVITY_BONUS: Score = make_score(0, 12);
