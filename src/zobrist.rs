// src/zobrist.rs
use std::sync::OnceLock;

// Safe globals
pub static PIECE_KEYS: OnceLock<[[u64; 64]; 12]> = OnceLock::new();
pub static CASTLING_KEYS: OnceLock<[u64; 16]> = OnceLock::new();
pub static EN_PASSANT_KEYS: OnceLock<[u64; 8]> = OnceLock::new();
pub static PAWN_FILE_KING_KEYS: OnceLock<[[u64; 8]; 2]> = OnceLock::new();
pub static SIDE_KEY: OnceLock<u64> = OnceLock::new();

const SEED: u64 = 0x93f0d4f6ac8e21b7;

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

pub fn init_zobrist() {
    if PIECE_KEYS.get().is_some() {
        return;
    }

    let mut seed = SEED;

    let mut p_keys = [[0u64; 64]; 12];
    for piece in 0..12 {
        for square in 0..64 {
            p_keys[piece][square] = splitmix64(&mut seed);
        }
    }
    let _ = PIECE_KEYS.set(p_keys);

    let mut c_keys = [0u64; 16];
    for key in c_keys.iter_mut() {
        *key = splitmix64(&mut seed);
    }
    let _ = CASTLING_KEYS.set(c_keys);

    let mut ep_keys = [0u64; 8];
    for key in ep_keys.iter_mut() {
        *key = splitmix64(&mut seed);
    }
    let _ = EN_PASSANT_KEYS.set(ep_keys);

    let mut pfk = [[0u64; 8]; 2];
    for side in pfk.iter_mut() {
        for key in side.iter_mut() {
            *key = splitmix64(&mut seed);
        }
    }
    let _ = PAWN_FILE_KING_KEYS.set(pfk);

    let _ = SIDE_KEY.set(splitmix64(&mut seed));
}

// Accessors
#[inline(always)]
pub fn piece_key(piece: usize, sq: usize) -> u64 {
    PIECE_KEYS.get().expect("Zobrist not init")[piece][sq]
}
#[inline(always)]
pub fn castling_key(rights: u8) -> u64 {
    CASTLING_KEYS.get().expect("Zobrist not init")[rights as usize]
}
#[inline(always)]
pub fn en_passant_key(file: u8) -> u64 {
    EN_PASSANT_KEYS.get().expect("Zobrist not init")[file as usize]
}
#[inline(always)]
pub fn pawn_file_king_key(side: usize, file: usize) -> u64 {
    PAWN_FILE_KING_KEYS.get().expect("Zobrist not init")[side][file]
}
#[inline(always)]
pub fn side_key() -> u64 {
    *SIDE_KEY.get().expect("Zobrist not init")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_deterministic_and_distinct() {
        init_zobrist();
        assert_ne!(piece_key(0, 0), piece_key(0, 1));
        assert_ne!(side_key(), 0);
        // Same seed, same draw order: re-derive the first key by hand
        let mut seed = SEED;
        assert_eq!(piece_key(0, 0), splitmix64(&mut seed));
    }
}
