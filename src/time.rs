// src/time.rs
use crate::state::WHITE;
use std::time::Instant;

pub const TIME_INF: i32 = i32::MAX / 4;

#[derive(Clone, Copy, Debug)]
pub struct SearchLimits {
    pub depth: i32,
    pub nodes: u64,
    pub movetime_ms: i32,
    pub wtime_ms: i32,
    pub btime_ms: i32,
    pub winc_ms: i32,
    pub binc_ms: i32,
    pub movestogo: i32,
    pub move_overhead_ms: i32,
    pub infinite: bool,
    pub ponder: bool,
    pub nodes_as_time: bool,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            depth: 0,
            nodes: 0,
            movetime_ms: -1,
            wtime_ms: -1,
            btime_ms: -1,
            winc_ms: 0,
            binc_ms: 0,
            movestogo: 0,
            move_overhead_ms: 30,
            infinite: false,
            ponder: false,
            nodes_as_time: false,
        }
    }
}

/// Per-iteration summary consumed by the soft-stop decision.
#[derive(Clone, Copy, Debug, Default)]
pub struct IterationSummary {
    pub depth: i32,
    pub score: i32,
    pub score_delta: i32,
    pub bestmove_changed: bool,
    pub bestmove_changes: i32,
    pub aspiration_fails: i32,
    pub root_legal_moves: i32,
    pub nodes_this_iter: u64,
    pub total_nodes: u64,
    pub nps: u64,
}

pub struct TimeManager {
    start_time: Instant,

    available_ms: i32,
    optimum_time_ms: i32,
    effective_optimum_ms: i32,
    maximum_time_ms: i32,

    fixed_movetime: bool,
    emergency_mode: bool,

    nodes_as_time: bool,
    soft_node_budget: u64,
    hard_node_budget: u64,

    nps_ema: f64,
    next_check_node: u64,
    check_period_nodes: u64,

    last_stability_score: i32,
    last_complexity_x100: i32,
}

fn clamp_ms(v: i32) -> i32 {
    v.clamp(1, TIME_INF)
}

impl TimeManager {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            available_ms: TIME_INF,
            optimum_time_ms: TIME_INF,
            effective_optimum_ms: TIME_INF,
            maximum_time_ms: TIME_INF,
            fixed_movetime: false,
            emergency_mode: false,
            nodes_as_time: false,
            soft_node_budget: 0,
            hard_node_budget: 0,
            nps_ema: 0.0,
            next_check_node: 1024,
            check_period_nodes: 1024,
            last_stability_score: 0,
            last_complexity_x100: 100,
        }
    }

    pub fn init(&mut self, limits: &SearchLimits, us: usize, session_nps_ema: f64) {
        self.start_time = Instant::now();

        let time_left = if us == WHITE { limits.wtime_ms } else { limits.btime_ms };
        let increment = if us == WHITE { limits.winc_ms } else { limits.binc_ms };
        let moves_to_go = limits.movestogo;

        self.fixed_movetime = limits.movetime_ms > 0;
        self.nodes_as_time = limits.nodes_as_time;
        self.emergency_mode = false;

        self.nps_ema = if session_nps_ema > 1.0 {
            session_nps_ema
        } else {
            200_000.0
        };
        self.check_period_nodes = ((self.nps_ema / 50.0) as u64).clamp(512, 32768);
        self.next_check_node = self.check_period_nodes;

        self.soft_node_budget = 0;
        self.hard_node_budget = 0;

        if limits.infinite || limits.ponder {
            self.available_ms = TIME_INF;
            self.optimum_time_ms = TIME_INF;
            self.effective_optimum_ms = TIME_INF;
            self.maximum_time_ms = TIME_INF;
            return;
        }

        let overhead = limits.move_overhead_ms.max(0);

        if self.fixed_movetime {
            self.available_ms = clamp_ms(limits.movetime_ms - overhead);
            self.optimum_time_ms = clamp_ms((self.available_ms * 85) / 100);
            self.maximum_time_ms = self.available_ms;
        } else if time_left > 0 {
            let safety_reserve = if moves_to_go > 0 {
                (time_left / 50).max(20)
            } else {
                (time_left / 25).max(40)
            };
            self.available_ms = clamp_ms(time_left - overhead - safety_reserve);

            if time_left <= overhead * 3 + 80 {
                self.emergency_mode = true;
            }

            let horizon = if moves_to_go > 0 {
                moves_to_go.clamp(1, 80)
            } else {
                (20 + time_left / 15000).clamp(20, 40)
            };
            let base_per_move = self.available_ms / horizon.max(1);

            self.optimum_time_ms = clamp_ms(base_per_move + increment / 2);

            self.maximum_time_ms = if moves_to_go > 0 {
                self.available_ms
                    .min(self.optimum_time_ms.max(self.optimum_time_ms * 3))
            } else {
                self.available_ms
                    .min((self.optimum_time_ms * 4).max(base_per_move * 6))
            };

            if self.emergency_mode {
                self.optimum_time_ms = self.optimum_time_ms.min(self.available_ms / 4).max(1);
                self.maximum_time_ms = self
                    .maximum_time_ms
                    .min(self.available_ms / 2)
                    .max(self.optimum_time_ms);
            }

            self.optimum_time_ms = self.optimum_time_ms.min(self.available_ms);
            self.maximum_time_ms = self
                .maximum_time_ms
                .min(self.available_ms)
                .max(self.optimum_time_ms);
        } else {
            self.available_ms = TIME_INF;
            self.optimum_time_ms = TIME_INF;
            self.maximum_time_ms = TIME_INF;
        }

        self.effective_optimum_ms = self.optimum_time_ms;
        self.refresh_node_budgets();
    }

    fn refresh_node_budgets(&mut self) {
        if self.nodes_as_time && self.maximum_time_ms < TIME_INF && self.nps_ema > 1.0 {
            self.soft_node_budget =
                ((self.effective_optimum_ms as f64 * self.nps_ema * 0.90) / 1000.0).max(1.0) as u64;
            self.hard_node_budget = ((self.maximum_time_ms as f64 * self.nps_ema * 0.80) / 1000.0)
                .max(self.soft_node_budget as f64 + 1.0) as u64;
        }
    }

    pub fn should_stop_hard(
        &mut self,
        total_nodes: u64,
        explicit_node_limit: u64,
        external_stop: bool,
    ) -> bool {
        if external_stop {
            return true;
        }

        if explicit_node_limit > 0 && total_nodes >= explicit_node_limit {
            return true;
        }

        if self.nodes_as_time && self.hard_node_budget > 0 && total_nodes >= self.hard_node_budget {
            return true;
        }

        if self.maximum_time_ms >= TIME_INF {
            return false;
        }

        if total_nodes < self.next_check_node {
            return false;
        }
        self.next_check_node = total_nodes + self.check_period_nodes;

        self.elapsed_ms() >= self.maximum_time_ms
    }

    pub fn should_stop_soft(&mut self, iteration: &IterationSummary) -> bool {
        let elapsed = self.elapsed_ms();

        if elapsed >= self.maximum_time_ms {
            return true;
        }

        if self.effective_optimum_ms >= TIME_INF {
            return false;
        }

        let mut complexity = 100;

        if iteration.root_legal_moves <= 1 {
            complexity -= 45;
        } else if iteration.root_legal_moves <= 3 {
            complexity -= 20;
        } else if iteration.root_legal_moves >= 30 {
            complexity += 20;
        } else if iteration.root_legal_moves >= 20 {
            complexity += 10;
        }

        if iteration.bestmove_changed {
            complexity += 18;
        }
        if iteration.bestmove_changes >= 2 {
            complexity += 8;
        }

        if iteration.score_delta >= 80 {
            complexity += 20;
        } else if iteration.score_delta >= 35 {
            complexity += 10;
        }

        if iteration.aspiration_fails >= 2 {
            complexity += 18;
        } else if iteration.aspiration_fails == 1 {
            complexity += 10;
        }

        complexity = complexity.clamp(55, 260);

        let min_optimum = (self.optimum_time_ms / 2).max(1);
        self.effective_optimum_ms =
            ((self.optimum_time_ms * complexity) / 100).clamp(min_optimum, self.maximum_time_ms);

        let mut stability = 0;

        if !iteration.bestmove_changed {
            stability += 3;
        } else {
            stability -= 1;
        }

        if iteration.bestmove_changes == 0 {
            stability += 1;
        }

        if iteration.score_delta <= 10 {
            stability += 2;
        } else if iteration.score_delta <= 25 {
            stability += 1;
        } else if iteration.score_delta >= 80 {
            stability -= 2;
        }

        if iteration.aspiration_fails == 0 {
            stability += 2;
        } else if iteration.aspiration_fails >= 2 {
            stability -= 2;
        }

        if iteration.root_legal_moves <= 1 {
            stability += 3;
        } else if iteration.root_legal_moves <= 3 {
            stability += 1;
        }

        self.last_stability_score = stability;
        self.last_complexity_x100 = complexity;

        if self.nodes_as_time
            && self.soft_node_budget > 0
            && iteration.total_nodes >= self.soft_node_budget
        {
            return stability >= 0;
        }

        elapsed >= self.effective_optimum_ms && stability >= 3
    }

    pub fn update_nps(&mut self, nps: u64) {
        if nps == 0 {
            return;
        }

        if self.nps_ema <= 1.0 {
            self.nps_ema = nps as f64;
        } else {
            self.nps_ema = 0.85 * self.nps_ema + 0.15 * nps as f64;
        }

        self.check_period_nodes = ((self.nps_ema / 50.0) as u64).clamp(512, 32768);
        self.refresh_node_budgets();
    }

    pub fn elapsed_ms(&self) -> i32 {
        self.start_time.elapsed().as_millis() as i32
    }

    pub fn optimum_ms(&self) -> i32 {
        self.optimum_time_ms
    }
    pub fn effective_optimum_ms(&self) -> i32 {
        self.effective_optimum_ms
    }
    pub fn maximum_ms(&self) -> i32 {
        self.maximum_time_ms
    }
    pub fn stability_score(&self) -> i32 {
        self.last_stability_score
    }
    pub fn complexity_x100(&self) -> i32 {
        self.last_complexity_x100
    }
    pub fn nps_ema(&self) -> f64 {
        self.nps_ema
    }
}

impl Default for TimeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BLACK;

    #[test]
    fn test_infinite_limits() {
        let mut tm = TimeManager::new();
        let limits = SearchLimits {
            infinite: true,
            ..SearchLimits::default()
        };
        tm.init(&limits, WHITE, 0.0);
        assert_eq!(tm.maximum_ms(), TIME_INF);
        assert!(!tm.should_stop_hard(1 << 30, 0, false));
    }

    #[test]
    fn test_fixed_movetime_budgets() {
        let mut tm = TimeManager::new();
        let limits = SearchLimits {
            movetime_ms: 1030,
            move_overhead_ms: 30,
            ..SearchLimits::default()
        };
        tm.init(&limits, WHITE, 0.0);
        assert_eq!(tm.maximum_ms(), 1000);
        assert_eq!(tm.optimum_ms(), 850);
    }

    #[test]
    fn test_game_time_budgets_reasonable() {
        let mut tm = TimeManager::new();
        let limits = SearchLimits {
            btime_ms: 60_000,
            binc_ms: 1_000,
            move_overhead_ms: 30,
            ..SearchLimits::default()
        };
        tm.init(&limits, BLACK, 0.0);
        assert!(tm.optimum_ms() > 0);
        assert!(tm.optimum_ms() <= tm.maximum_ms());
        assert!(tm.maximum_ms() < 60_000);
    }

    #[test]
    fn test_emergency_mode_clamps() {
        let mut tm = TimeManager::new();
        let limits = SearchLimits {
            wtime_ms: 120,
            move_overhead_ms: 30,
            ..SearchLimits::default()
        };
        tm.init(&limits, WHITE, 0.0);
        // 120 <= 30*3 + 80: emergency clamps apply
        assert!(tm.optimum_ms() <= tm.maximum_ms());
        assert!(tm.maximum_ms() <= 120);
    }

    #[test]
    fn test_explicit_node_limit_stops() {
        let mut tm = TimeManager::new();
        let limits = SearchLimits::default();
        tm.init(&limits, WHITE, 0.0);
        assert!(!tm.should_stop_hard(999, 1000, false));
        assert!(tm.should_stop_hard(1000, 1000, false));
        assert!(tm.should_stop_hard(0, 0, true));
    }

    #[test]
    fn test_soft_stop_needs_stability() {
        let mut tm = TimeManager::new();
        let limits = SearchLimits {
            movetime_ms: 10_000,
            ..SearchLimits::default()
        };
        tm.init(&limits, WHITE, 0.0);
        // Elapsed is ~0, so even a stable iteration must not stop yet
        let stable = IterationSummary {
            depth: 8,
            root_legal_moves: 20,
            ..IterationSummary::default()
        };
        assert!(!tm.should_stop_soft(&stable));
        assert!(tm.stability_score() >= 3);
    }

    #[test]
    fn test_nodes_as_time_budgets() {
        let mut tm = TimeManager::new();
        let limits = SearchLimits {
            movetime_ms: 1000,
            nodes_as_time: true,
            ..SearchLimits::default()
        };
        tm.init(&limits, WHITE, 1_000_000.0);
        // Soft budget ~0.9 * optimum_s * nps
        assert!(tm.soft_node_budget > 0);
        assert!(tm.hard_node_budget > tm.soft_node_budget);
        let summary = IterationSummary {
            total_nodes: tm.soft_node_budget,
            root_legal_moves: 20,
            ..IterationSummary::default()
        };
        assert!(tm.should_stop_soft(&summary));
    }
}
