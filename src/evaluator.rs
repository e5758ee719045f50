use crate::state::{Move, Position};

// --- SCORE ---
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Score {
    pub mg: i32,
    pub eg: i32,
}

pub const fn make_score(mg: i32, eg: i32) -> Score {
    Score { mg, eg }
}

impl std::ops::Add for Score {
    type Output = Score;
    fn add(self, rhs: Score) -> Score {
        make_score(self.mg + rhs.mg, self.eg + rhs.eg)
    }
}
impl std::ops::Sub for Score {
    type Output = Score;
    fn sub(self, rhs: Score) -> Score {
        make_score(self.mg - rhs.mg, self.eg - rhs.eg)
    }
}
impl std::ops::AddAssign for Score {
    fn add_assign(&mut self, rhs: Score) {
        self.mg += rhs.mg;
        self.eg += rhs.eg;
    }
}
impl std::ops::SubAssign for Score {
    fn sub_assign(&mut self, rhs: Score) {
        self.mg -= rhs.mg;
        self.eg -= rhs.eg;
    }
}
impl std::ops::Mul<i32> for Score {
    type Output = Score;
    fn mul(self, k: i32) -> Score {
        make_score(self.mg * k, self.eg * k)
    }
}

// --- BREAKDOWN / STATS ---
#[derive(Clone, Copy, Debug, Default)]
pub struct EvalBreakdown {
    pub material_psqt: Score,
    pub pawns: Score,
    pub mobility: Score,
    pub king_safety: Score,
    pub piece_features: Score,
    pub threats: Score,
    pub space: Score,
    pub endgame_scale: i32,
    pub tempo: i32,
    pub phase: i32,
    pub total_white_pov: i32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EvalStats {
    pub eval_calls: u64,
    pub pawn_hash_hits: u64,
    pub pawn_hash_misses: u64,

    pub eval_cache_hits: u64,
    pub eval_cache_misses: u64,
    pub nn_batches: u64,
    pub nn_batch_positions: u64,
    pub nn_queue_wait_us: u64,
    pub nn_infer_us: u64,
    pub nn_eval_latency_samples: u64,
    pub nn_eval_latency_us: u64,
    pub nn_eval_latency_max_us: u64,
    pub nn_eval_latency_le_250us: u64,
    pub nn_eval_latency_le_500us: u64,
    pub nn_eval_latency_le_1000us: u64,
    pub nn_eval_latency_le_2000us: u64,
    pub nn_eval_latency_le_5000us: u64,
    pub nn_eval_latency_gt_5000us: u64,
}

impl EvalStats {
    pub fn record_latency(&mut self, latency_us: u64) {
        self.nn_eval_latency_samples += 1;
        self.nn_eval_latency_us += latency_us;
        self.nn_eval_latency_max_us = self.nn_eval_latency_max_us.max(latency_us);
        if latency_us <= 250 {
            self.nn_eval_latency_le_250us += 1;
        } else if latency_us <= 500 {
            self.nn_eval_latency_le_500us += 1;
        } else if latency_us <= 1000 {
            self.nn_eval_latency_le_1000us += 1;
        } else if latency_us <= 2000 {
            self.nn_eval_latency_le_2000us += 1;
        } else if latency_us <= 5000 {
            self.nn_eval_latency_le_5000us += 1;
        } else {
            self.nn_eval_latency_gt_5000us += 1;
        }
    }
}

// --- EVALUATOR INTERFACE ---
/// Side-to-move-relative centipawn evaluation. Implementations with internal
/// caches use interior mutability so the search can hold a shared reference.
pub trait Evaluator {
    fn static_eval(&self, pos: &Position) -> i32;

    fn static_eval_trace(&self, pos: &Position, out: &mut EvalBreakdown) -> i32 {
        let score = self.static_eval(pos);
        *out = EvalBreakdown {
            total_white_pov: if pos.side_to_move() == crate::state::WHITE {
                score
            } else {
                -score
            },
            ..EvalBreakdown::default()
        };
        score
    }

    /// Evaluators that maintain incremental state can request make/unmake
    /// callbacks in the hot search loop.
    fn requires_move_hooks(&self) -> bool {
        false
    }

    fn stats(&self) -> EvalStats {
        EvalStats::default()
    }

    fn clear_stats(&self) {}

    fn on_make_move(&self, _pos: &Position, _mv: Move) {}
    fn on_unmake_move(&self, _pos: &Position, _mv: Move) {}
}
