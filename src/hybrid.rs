// src/hybrid.rs
use crate::evaluator::{EvalBreakdown, EvalStats, Evaluator};
use crate::hce::HCEEvaluator;
use crate::lc0_eval::Lc0Evaluator;
use crate::state::{Move, Position};
use std::cell::Cell;
use std::path::Path;

pub const BACKEND_HCE: i32 = 0;
pub const BACKEND_LC0_FP32: i32 = 1;
pub const BACKEND_LC0_FP32_ASYNC: i32 = 2;
pub const BACKEND_LC0_INT8: i32 = 3;

/// Routes evaluation to the hand-crafted evaluator or the lc0 network. The
/// network must be both enabled and loaded; otherwise HCE answers.
pub struct HybridEvaluator {
    hce: HCEEvaluator,
    lc0: Lc0Evaluator,
    use_lc0: Cell<bool>,
    backend: Cell<i32>,
}

impl HybridEvaluator {
    pub fn new() -> Self {
        Self {
            hce: HCEEvaluator::new(),
            lc0: Lc0Evaluator::new(),
            use_lc0: Cell::new(false),
            backend: Cell::new(BACKEND_HCE),
        }
    }

    pub fn hce(&self) -> &HCEEvaluator {
        &self.hce
    }

    pub fn lc0(&self) -> &Lc0Evaluator {
        &self.lc0
    }

    pub fn set_use_lc0(&self, enabled: bool) {
        self.use_lc0.set(enabled);
        if !enabled {
            self.backend.set(BACKEND_HCE);
        } else if self.backend.get() == BACKEND_HCE {
            self.backend.set(BACKEND_LC0_FP32);
            self.lc0.set_backend_from_int(crate::lc0_eval::BACKEND_SYNC);
        }
    }

    pub fn use_lc0(&self) -> bool {
        self.use_lc0.get()
    }

    pub fn set_backend_from_int(&self, backend: i32) {
        match backend {
            BACKEND_LC0_FP32 => {
                self.backend.set(BACKEND_LC0_FP32);
                self.use_lc0.set(true);
                self.lc0.set_backend_from_int(crate::lc0_eval::BACKEND_SYNC);
            }
            BACKEND_LC0_FP32_ASYNC => {
                self.backend.set(BACKEND_LC0_FP32_ASYNC);
                self.use_lc0.set(true);
                self.lc0.set_backend_from_int(crate::lc0_eval::BACKEND_ASYNC);
            }
            BACKEND_LC0_INT8 => {
                self.backend.set(BACKEND_LC0_INT8);
                self.use_lc0.set(true);
                self.lc0.set_backend_from_int(crate::lc0_eval::BACKEND_INT8);
            }
            _ => {
                self.backend.set(BACKEND_HCE);
                self.use_lc0.set(false);
            }
        }
    }

    pub fn backend_as_int(&self) -> i32 {
        self.backend.get()
    }

    pub fn load_lc0_weights(&self, path: &Path, strict_t1_shape: bool) -> bool {
        self.lc0.load_weights(path, strict_t1_shape)
    }

    fn lc0_active(&self) -> bool {
        self.backend.get() != BACKEND_HCE && self.use_lc0.get() && self.lc0.is_ready()
    }

    fn active(&self) -> &dyn Evaluator {
        if self.lc0_active() {
            &self.lc0
        } else {
            &self.hce
        }
    }
}

impl Default for HybridEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for HybridEvaluator {
    fn static_eval(&self, pos: &Position) -> i32 {
        self.active().static_eval(pos)
    }

    fn static_eval_trace(&self, pos: &Position, out: &mut EvalBreakdown) -> i32 {
        self.active().static_eval_trace(pos, out)
    }

    fn requires_move_hooks(&self) -> bool {
        self.active().requires_move_hooks()
    }

    fn stats(&self) -> EvalStats {
        self.active().stats()
    }

    fn clear_stats(&self) {
        self.hce.clear_stats();
        self.lc0.clear_stats();
    }

    fn on_make_move(&self, pos: &Position, mv: Move) {
        self.active().on_make_move(pos, mv);
    }

    fn on_unmake_move(&self, pos: &Position, mv: Move) {
        self.active().on_unmake_move(pos, mv);
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
    fn test_falls_back_to_hce_without_weights() {
        init_globals();
        let hybrid = HybridEvaluator::new();
        let mut pos = Position::new();
        assert!(pos.set_from_fen("4k3/8/8/8/8/8/8/3QK3 w - - 0 1"));

        let hce_score = hybrid.static_eval(&pos);
        assert!(hce_score > 500);

        // Requesting lc0 without a loaded network still routes to HCE
        hybrid.set_use_lc0(true);
        assert_eq!(hybrid.static_eval(&pos), hce_score);
    }

    #[test]
    fn test_backend_codes() {
        let hybrid = HybridEvaluator::new();
        assert_eq!(hybrid.backend_as_int(), BACKEND_HCE);
        hybrid.set_backend_from_int(BACKEND_LC0_FP32_ASYNC);
        assert_eq!(hybrid.backend_as_int(), BACKEND_LC0_FP32_ASYNC);
        assert!(hybrid.use_lc0());
        hybrid.set_use_lc0(false);
        assert_eq!(hybrid.backend_as_int(), BACKEND_HCE);
    }
}
