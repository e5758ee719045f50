use crate::eval_params::PIECE_VALUE;
use crate::evaluator::{make_score, Score};
use crate::state::{
    mirror, piece_color_of, piece_type_of, BISHOP, BLACK, KING, KNIGHT, PAWN, QUEEN, ROOK,
};
use std::sync::OnceLock;

// Packed (material + positional delta) tables per piece code
static PACKED_PSQT: OnceLock<[[Score; 64]; 12]> = OnceLock::new();

fn centralization_bonus(sq: u8) -> i32 {
    let f = (sq % 8) as i32;
    let r = (sq / 8) as i32;
    let df = (2 * f - 7).abs();
    let dr = (2 * r - 7).abs();
    14 - (df + dr)
}

fn psqt_delta(piece_type: usize, sq: u8) -> Score {
    let r = (sq / 8) as i32;
    let f = (sq % 8) as i32;
    let central = centralization_bonus(sq);

    match piece_type {
        PAWN => make_score(r * 6 - (f - 3).abs() * 2, r * 12 - (f - 3).abs() * 2),
        KNIGHT => make_score(
            central * 2 - if r == 0 { 8 } else { 0 },
            central - if r == 0 { 4 } else { 0 },
        ),
        BISHOP => make_score(central + r * 2, central + r),
        ROOK => make_score(r * 2 + if f == 3 || f == 4 { 6 } else { 0 }, r * 3),
        QUEEN => make_score(central, central / 2 + r),
        KING => make_score(-central * 2 - r * 8, central * 2 + r * 10),
        _ => make_score(0, 0),
    }
}

pub fn init_psqt() {
    PACKED_PSQT.get_or_init(|| {
        let mut table = [[make_score(0, 0); 64]; 12];
        for sq in 0..64u8 {
            for pt in 0..6usize {
                let base = PIECE_VALUE[pt];
                table[pt][sq as usize] = base + psqt_delta(pt, sq);
                table[6 + pt][sq as usize] = base + psqt_delta(pt, mirror(sq));
            }
        }
        table
    });
}

/// Packed PSQT for a piece code on a square; white reads the table as-is,
/// black reads its vertically mirrored counterpart.
#[inline(always)]
pub fn psqt(piece: u8, sq: u8) -> Score {
    PACKED_PSQT.get().expect("PSQT not init")[piece as usize][sq as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::make_piece;
    use crate::state::WHITE;

    #[test]
    fn test_psqt_mirror_symmetry() {
        init_psqt();
        for pt in 0..6usize {
            for sq in 0..64u8 {
                let w = psqt(make_piece(WHITE, pt), sq);
                let b = psqt(make_piece(BLACK, pt), mirror(sq));
                assert_eq!(w, b, "pt {} sq {}", pt, sq);
            }
        }
    }

    #[test]
    fn test_psqt_includes_material() {
        init_psqt();
        let p = psqt(make_piece(WHITE, QUEEN), 27);
        assert!(p.mg > 900 && p.eg > 800);
    }

    #[test]
    fn test_piece_code_helpers() {
        assert_eq!(piece_type_of(make_piece(BLACK, ROOK)), ROOK);
        assert_eq!(piece_color_of(make_piece(BLACK, ROOK)), BLACK);
    }
}
