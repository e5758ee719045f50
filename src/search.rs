// src/search.rs
use crate::evaluator::Evaluator;
use crate::movegen;
use crate::movepicker::{
    capture_history_index, history_index, move_index, MovePickPhase, MovePicker,
    QuietOrderContext, MOVE_INDEX_NB,
};
use crate::see;
use crate::state::{piece_type_of, Move, Position, NO_PIECE};
use crate::time::{IterationSummary, SearchLimits, TimeManager};
use crate::tt::{
    score_from_tt, TranspositionTable, BOUND_EXACT, BOUND_LOWER, BOUND_UPPER, MATE_SCORE_BOUND,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use crate::tt::{MAX_PLY, VALUE_INFINITE, VALUE_MATE};

const ASPIRATION_INITIAL: i32 = 24;
const ASPIRATION_MAX: i32 = 1024;

const HISTORY_SIZE: usize = 2 * 64 * 64;
const CONT_HISTORY_SIZE: usize = MOVE_INDEX_NB * MOVE_INDEX_NB;
const CAPTURE_HISTORY_SIZE: usize = 2 * 6 * 64 * 6;

// --- CONFIG ---
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    pub use_history: bool,
    pub use_cont_history: bool,
    pub use_capture_history: bool,
    pub use_nmp: bool,
    pub use_lmr: bool,
    pub use_see: bool,
    pub use_qdelta: bool,
    pub use_rfp: bool,
    pub use_razoring: bool,
    pub use_futility: bool,
    pub use_lmp: bool,
    pub use_history_pruning: bool,
    pub use_probcut: bool,
    pub use_singular: bool,

    pub history_max: i32,
    pub history_bonus_scale: i32,
    pub history_malus_divisor: i32,
    pub cont_history_2ply_divisor: i32,

    pub nmp_min_depth: i32,
    pub nmp_base_reduction: i32,
    pub nmp_depth_divisor: i32,
    pub nmp_margin_base: i32,
    pub nmp_margin_per_depth: i32,
    pub nmp_non_pawn_min: i32,
    pub nmp_verify_non_pawn_max: i32,
    pub nmp_verify_min_depth: i32,

    pub lmr_min_depth: i32,
    pub lmr_full_depth_moves: i32,
    pub lmr_history_threshold: i32,

    pub rfp_max_depth: i32,
    pub rfp_margin_per_depth: i32,

    pub razor_max_depth: i32,
    pub razor_base: i32,
    pub razor_per_depth: i32,

    pub futility_max_depth: i32,
    pub futility_base: i32,
    pub futility_per_depth: i32,

    pub lmp_thresholds: [i32; 5],

    pub history_pruning_max_depth: i32,
    pub history_pruning_min_moves: i32,
    pub history_pruning_threshold: i32,

    pub probcut_min_depth: i32,
    pub probcut_margin: i32,
    pub probcut_reduction: i32,
    pub probcut_see_threshold: i32,

    pub singular_min_depth: i32,
    pub singular_margin_per_depth: i32,
    pub singular_extension_cap: i32,

    pub qsearch_delta_margin: i32,
    pub qsearch_see_threshold: i32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            use_history: true,
            use_cont_history: true,
            use_capture_history: true,
            use_nmp: true,
            use_lmr: true,
            use_see: true,
            use_qdelta: true,
            use_rfp: true,
            use_razoring: true,
            use_futility: true,
            use_lmp: true,
            use_history_pruning: true,
            use_probcut: true,
            use_singular: true,

            history_max: 20923,
            history_bonus_scale: 1,
            history_malus_divisor: 3,
            cont_history_2ply_divisor: 4,

            nmp_min_depth: 3,
            nmp_base_reduction: 5,
            nmp_depth_divisor: 6,
            nmp_margin_base: 60,
            nmp_margin_per_depth: 14,
            nmp_non_pawn_min: 760,
            nmp_verify_non_pawn_max: 2004,
            nmp_verify_min_depth: 8,

            lmr_min_depth: 3,
            lmr_full_depth_moves: 2,
            lmr_history_threshold: 3426,

            rfp_max_depth: 6,
            rfp_margin_per_depth: 60,

            razor_max_depth: 3,
            razor_base: 300,
            razor_per_depth: 150,

            futility_max_depth: 4,
            futility_base: 90,
            futility_per_depth: 60,

            lmp_thresholds: [0, 4, 8, 14, 22],

            history_pruning_max_depth: 3,
            history_pruning_min_moves: 4,
            history_pruning_threshold: -2048,

            probcut_min_depth: 5,
            probcut_margin: 200,
            probcut_reduction: 4,
            probcut_see_threshold: 0,

            singular_min_depth: 8,
            singular_margin_per_depth: 2,
            singular_extension_cap: 3,

            qsearch_delta_margin: 110,
            qsearch_see_threshold: 0,
        }
    }
}

impl SearchConfig {
    pub fn save_to_json(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn load_from_json(path: &str) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

// --- STATS / RESULTS ---
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchStats {
    pub nodes: u64,
    pub qnodes: u64,
    pub tt_probes: u64,
    pub tt_hits: u64,
    pub beta_cutoffs: u64,
    pub pvs_researches: u64,
    pub movegen_calls: u64,
    pub moves_generated: u64,
    pub move_pick_iterations: u64,
    pub cutoff_tt: u64,
    pub cutoff_good_capture: u64,
    pub cutoff_quiet: u64,
    pub cutoff_bad_capture: u64,
    pub history_updates: u64,
    pub cont_history_updates: u64,
    pub capture_history_updates: u64,
    pub nmp_attempts: u64,
    pub nmp_cutoffs: u64,
    pub nmp_verifications: u64,
    pub nmp_verification_fails: u64,
    pub lmr_reduced: u64,
    pub lmr_researches: u64,
    pub lmr_fail_high_after_reduce: u64,
    pub probcut_cutoffs: u64,
    pub singular_extensions: u64,
    pub razor_drops: u64,
    pub futility_prunes: u64,
    pub lmp_prunes: u64,
    pub history_prunes: u64,
    pub qdelta_prunes: u64,
    pub qsee_prunes: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    pub best_move: Move,
    pub score: i32,
    pub depth: i32,
    pub seldepth: i32,
    pub pv: Vec<Move>,
    pub stats: SearchStats,
    pub time_ms: i32,
}

#[derive(Clone, Debug, Default)]
pub struct SearchIterationInfo {
    pub depth: i32,
    pub seldepth: i32,
    pub score: i32,
    pub score_delta: i32,
    pub aspiration_fails: i32,
    pub bestmove_changes: i32,
    pub root_legal_moves: i32,
    pub stability_score: i32,
    pub complexity_x100: i32,
    pub optimum_time_ms: i32,
    pub effective_optimum_ms: i32,
    pub maximum_time_ms: i32,
    pub time_ms: i32,
    pub nodes: u64,
    pub nodes_this_iter: u64,
    pub nps: u64,
    pub pv: Vec<Move>,
    pub stats: SearchStats,
}

pub type SearchInfoCallback<'a> = &'a mut dyn FnMut(&SearchIterationInfo);

#[derive(Clone, Copy)]
pub struct PVLine {
    pub moves: [Move; MAX_PLY as usize],
    pub len: usize,
}

impl Default for PVLine {
    fn default() -> Self {
        Self {
            moves: [Move::none(); MAX_PLY as usize],
            len: 0,
        }
    }
}

fn update_pv(dst: &mut PVLine, mv: Move, child: &PVLine) {
    dst.moves[0] = mv;
    dst.len = 1;
    for i in 0..child.len {
        if dst.len >= MAX_PLY as usize {
            break;
        }
        dst.moves[dst.len] = child.moves[i];
        dst.len += 1;
    }
}

#[derive(Clone, Copy, Debug)]
struct SearchStackEntry {
    last_move: Move,
    move_index: i32,
    did_null: bool,
    static_eval: i32,
    extensions: i32,
}

impl Default for SearchStackEntry {
    fn default() -> Self {
        Self {
            last_move: Move::none(),
            move_index: -1,
            did_null: false,
            static_eval: 0,
            extensions: 0,
        }
    }
}

// --- SEARCHER ---
pub struct Searcher<'a> {
    evaluator: &'a dyn Evaluator,
    tt: TranspositionTable,
    tm: TimeManager,

    limits: SearchLimits,
    config: SearchConfig,
    stats: SearchStats,

    generation: u8,
    stop: bool,
    stop_signal: Arc<AtomicBool>,
    root_legal_moves: i32,
    seldepth: i32,

    previous_root_best_move: Move,
    rolling_bestmove_changes: i32,
    session_nps_ema: f64,
    use_eval_move_hooks: bool,

    history: Vec<i16>,
    cont_history: Vec<i16>,
    capture_history: Vec<i16>,
    killers: [[Move; 2]; MAX_PLY as usize + 1],
    counter_moves: [[Move; 64]; 64],
    lmr_table: Vec<i32>,
    stack: Vec<SearchStackEntry>,
}

impl<'a> Searcher<'a> {
    pub fn new(evaluator: &'a dyn Evaluator) -> Self {
        let mut lmr_table = vec![0; (MAX_PLY as usize + 1) * 256];
        for d in 0..=MAX_PLY as usize {
            for m in 0..256usize {
                if d < 2 || m < 2 {
                    continue;
                }
                let r = ((d as f64).ln() * (m as f64).ln() / 2.0).floor() as i32;
                lmr_table[d * 256 + m] = r.max(1);
            }
        }

        Self {
            evaluator,
            tt: TranspositionTable::new(32),
            tm: TimeManager::new(),
            limits: SearchLimits::default(),
            config: SearchConfig::default(),
            stats: SearchStats::default(),
            generation: 0,
            stop: false,
            stop_signal: Arc::new(AtomicBool::new(false)),
            root_legal_moves: 0,
            seldepth: 0,
            previous_root_best_move: Move::none(),
            rolling_bestmove_changes: 0,
            session_nps_ema: 0.0,
            use_eval_move_hooks: false,
            history: vec![0; HISTORY_SIZE],
            cont_history: vec![0; CONT_HISTORY_SIZE],
            capture_history: vec![0; CAPTURE_HISTORY_SIZE],
            killers: [[Move::none(); 2]; MAX_PLY as usize + 1],
            counter_moves: [[Move::none(); 64]; 64],
            lmr_table,
            stack: vec![SearchStackEntry::default(); MAX_PLY as usize + 4],
        }
    }

    pub fn set_hash_size_mb(&mut self, mb: usize) {
        self.tt.resize_mb(mb);
    }

    pub fn clear_hash(&mut self) {
        self.tt.clear();
    }

    pub fn clear_heuristics(&mut self) {
        self.history.fill(0);
        self.cont_history.fill(0);
        self.capture_history.fill(0);
        self.killers = [[Move::none(); 2]; MAX_PLY as usize + 1];
        self.counter_moves = [[Move::none(); 64]; 64];
    }

    pub fn set_config(&mut self, config: SearchConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_signal.clone()
    }

    fn should_stop_hard(&mut self) -> bool {
        let external = self.stop || self.stop_signal.load(Ordering::Relaxed);
        self.stop = self
            .tm
            .should_stop_hard(self.stats.nodes, self.limits.nodes, external);
        self.stop
    }

    // --- HEURISTIC UPDATES ---
    fn quiet_move_score(&self, pos: &Position, mv: Move, ply: usize) -> i32 {
        if !self.config.use_history && !self.config.use_cont_history {
            return 0;
        }

        let mut score = 0;
        if self.config.use_history {
            score += self.history[history_index(pos.side_to_move(), mv)] as i32;
        }

        if self.config.use_cont_history {
            let cur = move_index(pos.piece_on(mv.source()), mv.target());
            if cur >= 0 {
                let prev1 = self.stack[ply].move_index;
                let prev2 = if ply > 0 { self.stack[ply - 1].move_index } else { -1 };
                if prev1 >= 0 {
                    score +=
                        self.cont_history[prev1 as usize * MOVE_INDEX_NB + cur as usize] as i32;
                }
                if prev2 >= 0 {
                    score += self.cont_history[prev2 as usize * MOVE_INDEX_NB + cur as usize]
                        as i32
                        / self.config.cont_history_2ply_divisor.max(1);
                }
            }
        }

        score
    }

    fn update_history_value(value: &mut i16, bonus: i32, max_h: i32) {
        let max_h = max_h.max(1);
        let v = *value as i32;
        let next = (v + bonus - (v * bonus.abs()) / max_h).clamp(-max_h, max_h);
        *value = next as i16;
    }

    fn update_quiet_history(
        &mut self,
        side: usize,
        best_move: Move,
        best_move_index: i32,
        ply: usize,
        depth: i32,
        quiet_tried: &[(Move, i32)],
    ) {
        if !self.config.use_history && !self.config.use_cont_history {
            return;
        }

        let bonus = (depth * depth * self.config.history_bonus_scale.max(1)).max(1);
        let malus = (bonus / self.config.history_malus_divisor.max(1)).max(1);
        let prev1 = self.stack[ply].move_index;
        let prev2 = if ply > 0 { self.stack[ply - 1].move_index } else { -1 };

        self.bump_quiet(side, best_move, best_move_index, bonus, prev1, prev2);
        for &(mv, cur) in quiet_tried {
            if mv == best_move {
                continue;
            }
            self.bump_quiet(side, mv, cur, -malus, prev1, prev2);
        }
    }

    fn bump_quiet(&mut self, side: usize, mv: Move, cur: i32, delta: i32, prev1: i32, prev2: i32) {
        if mv.is_none() || mv.is_capture() || mv.is_promotion() {
            return;
        }

        let max_h = self.config.history_max;
        if self.config.use_history {
            let idx = history_index(side, mv);
            Self::update_history_value(&mut self.history[idx], delta, max_h);
            self.stats.history_updates += 1;
        }

        if self.config.use_cont_history && cur >= 0 {
            if prev1 >= 0 {
                let idx = prev1 as usize * MOVE_INDEX_NB + cur as usize;
                Self::update_history_value(&mut self.cont_history[idx], delta, max_h);
                self.stats.cont_history_updates += 1;
            }
            if prev2 >= 0 {
                let idx = prev2 as usize * MOVE_INDEX_NB + cur as usize;
                let scaled = delta / self.config.cont_history_2ply_divisor.max(1);
                Self::update_history_value(&mut self.cont_history[idx], scaled, max_h);
                self.stats.cont_history_updates += 1;
            }
        }
    }

    fn update_capture_history_entry(&mut self, pos: &Position, mv: Move, bonus: i32) {
        if !self.config.use_capture_history || !mv.is_capture() {
            return;
        }
        let attacker = pos.piece_on(mv.source());
        if attacker == NO_PIECE {
            return;
        }
        let captured_pt = if mv.is_en_passant() {
            crate::state::PAWN
        } else {
            let captured = pos.piece_on(mv.target());
            if captured == NO_PIECE {
                return;
            }
            piece_type_of(captured)
        };
        let idx = capture_history_index(
            pos.side_to_move(),
            piece_type_of(attacker),
            mv.target(),
            captured_pt,
        );
        let max_h = self.config.history_max;
        Self::update_history_value(&mut self.capture_history[idx], bonus, max_h);
        self.stats.capture_history_updates += 1;
    }

    fn nmp_reduction(&self, depth: i32) -> i32 {
        (self.config.nmp_base_reduction + depth / self.config.nmp_depth_divisor.max(1))
            .clamp(1, depth - 1)
    }

    fn lmr_reduction(&self, depth: i32, move_count: i32, quiet_score: i32) -> i32 {
        if depth <= 1 {
            return 0;
        }
        let d = depth.min(MAX_PLY) as usize;
        let m = move_count.min(255) as usize;
        let mut r = self.lmr_table[d * 256 + m];
        if quiet_score >= self.config.lmr_history_threshold {
            r -= 1;
        }
        r.clamp(0, depth - 1)
    }

    fn lmp_threshold(&self, depth: i32) -> i32 {
        self.config.lmp_thresholds[depth.clamp(0, 4) as usize]
    }

    fn quiet_context(&self, pos: &Position, ply: usize) -> QuietOrderContext<'_> {
        let prev = self.stack[ply].last_move;
        let counter = if prev.is_none() {
            Move::none()
        } else {
            self.counter_moves[prev.source() as usize][prev.target() as usize]
        };

        QuietOrderContext {
            history: &self.history,
            cont_history: &self.cont_history,
            capture_history: &self.capture_history,
            use_history: self.config.use_history,
            use_cont_history: self.config.use_cont_history,
            use_capture_history: self.config.use_capture_history,
            use_see: self.config.use_see,
            side: pos.side_to_move(),
            prev1_move_index: self.stack[ply].move_index,
            prev2_move_index: if ply > 0 { self.stack[ply - 1].move_index } else { -1 },
            cont_history_2ply_divisor: self.config.cont_history_2ply_divisor,
            killer1: self.killers[ply][0],
            killer2: self.killers[ply][1],
            counter,
        }
    }

    // --- TOP LEVEL ---
    pub fn search(
        &mut self,
        pos: &mut Position,
        limits: &SearchLimits,
        mut on_iteration: Option<&mut dyn FnMut(&SearchIterationInfo)>,
    ) -> SearchResult {
        self.limits = *limits;
        self.stats = SearchStats::default();
        self.stop = false;
        self.stop_signal.store(false, Ordering::Relaxed);
        self.seldepth = 0;
        self.root_legal_moves = 0;
        self.previous_root_best_move = Move::none();
        self.rolling_bestmove_changes = 0;

        self.generation = self.generation.wrapping_add(1);

        self.tm = TimeManager::new();
        self.tm.init(&self.limits, pos.side_to_move(), self.session_nps_ema);
        self.use_eval_move_hooks = self.evaluator.requires_move_hooks();
        for entry in self.stack.iter_mut() {
            *entry = SearchStackEntry::default();
        }

        let mut result = SearchResult::default();
        let max_depth = if self.limits.depth > 0 { self.limits.depth } else { 64 };

        let mut have_prev_score = false;
        let mut prev_score = 0;

        for depth in 1..=max_depth {
            if self.should_stop_hard() {
                break;
            }

            let nodes_before = self.stats.nodes;
            let mut alpha = -VALUE_INFINITE;
            let mut beta = VALUE_INFINITE;
            let mut delta = ASPIRATION_INITIAL;

            if depth >= 4 && have_prev_score {
                alpha = (prev_score - delta).max(-VALUE_INFINITE);
                beta = (prev_score + delta).min(VALUE_INFINITE);
            }

            let mut aspiration_fails = 0;
            let mut pv;
            let mut score;

            loop {
                pv = PVLine::default();
                score = self.search_node(pos, depth, alpha, beta, 0, true, &mut pv, Move::none());
                if self.stop {
                    break;
                }

                if score <= alpha {
                    aspiration_fails += 1;
                    beta = (alpha + beta) / 2;
                    alpha = (score - delta).max(-VALUE_INFINITE);
                    delta = (delta * 2).min(ASPIRATION_MAX);
                    continue;
                }
                if score >= beta {
                    aspiration_fails += 1;
                    beta = (score + delta).min(VALUE_INFINITE);
                    delta = (delta * 2).min(ASPIRATION_MAX);
                    continue;
                }
                break;
            }

            if self.stop {
                break;
            }

            result.score = score;
            result.depth = depth;
            result.seldepth = self.seldepth;

            if pv.len > 0 {
                result.best_move = pv.moves[0];
                result.pv = pv.moves[..pv.len].to_vec();
            } else {
                result.best_move = Move::none();
                result.pv.clear();
            }

            let elapsed = self.tm.elapsed_ms();
            let nps = (self.stats.nodes * 1000) / elapsed.max(1) as u64;
            self.tm.update_nps(nps);

            let bestmove_changed = depth > 1
                && !result.best_move.is_none()
                && self.previous_root_best_move != result.best_move;
            if bestmove_changed {
                self.rolling_bestmove_changes = (self.rolling_bestmove_changes + 1).min(8);
            } else if depth > 1 && self.rolling_bestmove_changes > 0 {
                self.rolling_bestmove_changes -= 1;
            }

            let score_delta = if have_prev_score { (score - prev_score).abs() } else { 0 };
            self.previous_root_best_move = result.best_move;
            prev_score = score;
            have_prev_score = true;

            let iteration = IterationSummary {
                depth,
                score,
                score_delta,
                bestmove_changed,
                bestmove_changes: self.rolling_bestmove_changes,
                aspiration_fails,
                root_legal_moves: self.root_legal_moves,
                nodes_this_iter: self.stats.nodes - nodes_before,
                total_nodes: self.stats.nodes,
                nps,
            };

            let stop_soft = self.tm.should_stop_soft(&iteration);

            if let Some(cb) = on_iteration.as_mut() {
                cb(&SearchIterationInfo {
                    depth,
                    seldepth: self.seldepth,
                    score,
                    score_delta,
                    aspiration_fails,
                    bestmove_changes: self.rolling_bestmove_changes,
                    root_legal_moves: self.root_legal_moves,
                    stability_score: self.tm.stability_score(),
                    complexity_x100: self.tm.complexity_x100(),
                    optimum_time_ms: self.tm.optimum_ms(),
                    effective_optimum_ms: self.tm.effective_optimum_ms(),
                    maximum_time_ms: self.tm.maximum_ms(),
                    time_ms: elapsed,
                    nodes: self.stats.nodes,
                    nodes_this_iter: self.stats.nodes - nodes_before,
                    nps,
                    pv: result.pv.clone(),
                    stats: self.stats,
                });
            }

            if stop_soft {
                break;
            }
        }

        result.time_ms = self.tm.elapsed_ms();
        result.stats = self.stats;

        if result.time_ms > 0 && self.stats.nodes > 0 {
            let nps = (self.stats.nodes as f64 * 1000.0) / result.time_ms as f64;
            if self.session_nps_ema <= 1.0 {
                self.session_nps_ema = nps;
            } else {
                self.session_nps_ema = 0.90 * self.session_nps_ema + 0.10 * nps;
            }
        }

        result
    }

    // --- MAIN SEARCH ---
    #[allow(clippy::too_many_arguments)]
    fn search_node(
        &mut self,
        pos: &mut Position,
        mut depth: i32,
        mut alpha: i32,
        beta: i32,
        ply: usize,
        is_pv: bool,
        pv: &mut PVLine,
        excluded: Move,
    ) -> i32 {
        pv.len = 0;
        self.seldepth = self.seldepth.max(ply as i32);
        self.stats.nodes += 1;

        if self.should_stop_hard() {
            return 0;
        }

        if ply as i32 >= MAX_PLY - 1 {
            return self.evaluator.static_eval(pos);
        }

        if ply > 0 && pos.is_draw() {
            return 0;
        }

        let in_check = pos.in_check(pos.side_to_move());
        if in_check {
            depth += 1;
        }

        if depth <= 0 {
            return self.qsearch(pos, alpha, beta, ply, pv);
        }

        let alpha_orig = alpha;
        let key = pos.key();
        let us = pos.side_to_move();

        let mut tt_move = Move::none();
        let mut tt_eval: Option<i32> = None;
        let mut tt_score = 0;
        let mut tt_depth = 0;
        let mut tt_bound = crate::tt::BOUND_NONE;

        self.stats.tt_probes += 1;
        if let Some(e) = self.tt.probe(key) {
            self.stats.tt_hits += 1;
            tt_move = e.best_move();
            tt_eval = Some(e.eval as i32);
            tt_score = score_from_tt(e.score as i32, ply as i32);
            tt_depth = e.depth as i32;
            tt_bound = e.bound;

            if !is_pv && excluded.is_none() && tt_depth >= depth {
                if tt_bound == BOUND_EXACT {
                    return tt_score;
                }
                if tt_bound == BOUND_LOWER && tt_score >= beta {
                    return tt_score;
                }
                if tt_bound == BOUND_UPPER && tt_score <= alpha {
                    return tt_score;
                }
            }
        }

        let static_eval = match tt_eval {
            Some(v) => v,
            None => self.evaluator.static_eval(pos),
        };
        self.stack[ply].static_eval = static_eval;

        // Reverse futility: the static eval already clears beta by a margin
        if self.config.use_rfp
            && !is_pv
            && !in_check
            && excluded.is_none()
            && depth <= self.config.rfp_max_depth
            && beta.abs() < MATE_SCORE_BOUND
            && static_eval - self.config.rfp_margin_per_depth * depth >= beta
        {
            return static_eval;
        }

        // Razoring: hopeless static eval, verify with quiescence
        if self.config.use_razoring
            && !is_pv
            && !in_check
            && excluded.is_none()
            && depth <= self.config.razor_max_depth
        {
            let margin = self.config.razor_base + self.config.razor_per_depth * depth;
            if static_eval + margin < alpha {
                let mut razor_pv = PVLine::default();
                let v = self.qsearch(pos, alpha, beta, ply, &mut razor_pv);
                if v < alpha {
                    self.stats.razor_drops += 1;
                    return v;
                }
            }
        }

        // Null-move pruning with verification
        if self.config.use_nmp
            && depth >= self.config.nmp_min_depth
            && !is_pv
            && !in_check
            && !self.stack[ply].did_null
            && excluded.is_none()
            && beta.abs() < MATE_SCORE_BOUND
            && pos.non_pawn_material(us) >= self.config.nmp_non_pawn_min
            && static_eval
                >= beta - (self.config.nmp_margin_base + self.config.nmp_margin_per_depth * depth)
        {
            self.stats.nmp_attempts += 1;

            let r = self.nmp_reduction(depth);
            pos.make_null_move();
            self.stack[ply + 1] = SearchStackEntry {
                last_move: Move::none(),
                move_index: -1,
                did_null: true,
                static_eval: 0,
                extensions: self.stack[ply].extensions,
            };

            let mut null_pv = PVLine::default();
            let null_score =
                -self.search_node(pos, depth - 1 - r, -beta, -beta + 1, ply + 1, false, &mut null_pv, Move::none());

            pos.unmake_null_move();
            self.stack[ply + 1] = SearchStackEntry::default();

            if self.stop {
                return 0;
            }

            if null_score >= beta {
                let verify = depth >= self.config.nmp_verify_min_depth
                    || pos.non_pawn_material(us) <= self.config.nmp_verify_non_pawn_max;
                if verify {
                    self.stats.nmp_verifications += 1;
                    let mut verify_pv = PVLine::default();
                    let verify_score = self.search_node(
                        pos,
                        depth - 1 - r,
                        beta - 1,
                        beta,
                        ply,
                        false,
                        &mut verify_pv,
                        Move::none(),
                    );
                    if verify_score >= beta {
                        self.stats.nmp_cutoffs += 1;
                        return verify_score;
                    }
                    self.stats.nmp_verification_fails += 1;
                } else {
                    self.stats.nmp_cutoffs += 1;
                    return null_score;
                }
            }
        }

        // ProbCut: a shallow tactical search clearing beta by a wide margin
        if self.config.use_probcut
            && !is_pv
            && !in_check
            && excluded.is_none()
            && depth >= self.config.probcut_min_depth
            && beta.abs() < MATE_SCORE_BOUND
        {
            let prob_beta = beta + self.config.probcut_margin;
            let prob_depth = depth - 1 - self.config.probcut_reduction;
            let mut picker = {
                let ctx = self.quiet_context(pos, ply);
                MovePicker::new(pos, Move::none(), true, Some(&ctx))
            };

            loop {
                let (mv, _) = picker.next();
                if mv.is_none() {
                    break;
                }
                if see::static_exchange_eval(pos, mv) < self.config.probcut_see_threshold {
                    continue;
                }
                let move_idx = move_index(pos.piece_on(mv.source()), mv.target());
                if !pos.make_move(mv) {
                    continue;
                }
                if self.use_eval_move_hooks {
                    self.evaluator.on_make_move(pos, mv);
                }
                self.stack[ply + 1] = SearchStackEntry {
                    last_move: mv,
                    move_index: move_idx,
                    did_null: false,
                    static_eval: 0,
                    extensions: self.stack[ply].extensions,
                };

                let mut prob_pv = PVLine::default();
                let score = -self.search_node(
                    pos,
                    prob_depth.max(1),
                    -prob_beta,
                    -prob_beta + 1,
                    ply + 1,
                    false,
                    &mut prob_pv,
                    Move::none(),
                );

                pos.unmake_move();
                if self.use_eval_move_hooks {
                    self.evaluator.on_unmake_move(pos, mv);
                }
                self.stack[ply + 1] = SearchStackEntry::default();

                if self.stop {
                    return 0;
                }
                if score >= prob_beta {
                    self.stats.probcut_cutoffs += 1;
                    return score;
                }
            }
        }

        self.stats.movegen_calls += 1;
        let mut picker = {
            let ctx = self.quiet_context(pos, ply);
            MovePicker::new(pos, tt_move, false, Some(&ctx))
        };
        self.stats.moves_generated += picker.generated_count() as u64;

        let mut legal_moves = 0;
        let mut quiets_seen: i32 = 0;
        let mut best_score = -VALUE_INFINITE;
        let mut best_move = Move::none();
        let mut best_move_index = -1;
        let mut quiet_tried: Vec<(Move, i32)> = Vec::with_capacity(32);

        loop {
            let (mv, phase) = picker.next();
            if mv.is_none() {
                break;
            }
            if mv == excluded {
                continue;
            }

            self.stats.move_pick_iterations += 1;
            let is_quiet = !mv.is_capture() && !mv.is_promotion();
            let quiet_score = if is_quiet { self.quiet_move_score(pos, mv, ply) } else { 0 };
            let move_idx = move_index(pos.piece_on(mv.source()), mv.target());

            // Pre-make pruning: quiet moves only, never before the first legal move
            if is_quiet
                && !is_pv
                && !in_check
                && legal_moves > 0
                && best_score > -MATE_SCORE_BOUND
            {
                if self.config.use_lmp
                    && depth <= 4
                    && quiets_seen >= self.lmp_threshold(depth)
                {
                    self.stats.lmp_prunes += 1;
                    quiets_seen += 1;
                    continue;
                }

                if self.config.use_futility
                    && depth <= self.config.futility_max_depth
                    && pos.non_pawn_material(us) > 0
                    && static_eval
                        + self.config.futility_base
                        + self.config.futility_per_depth * depth
                        <= alpha
                    && !movegen::gives_check_fast(pos, mv)
                {
                    self.stats.futility_prunes += 1;
                    quiets_seen += 1;
                    continue;
                }

                if self.config.use_history_pruning
                    && depth <= self.config.history_pruning_max_depth
                    && legal_moves >= self.config.history_pruning_min_moves
                    && quiet_score < self.config.history_pruning_threshold
                {
                    self.stats.history_prunes += 1;
                    quiets_seen += 1;
                    continue;
                }
            }

            // Singular extension: is the TT move the only move to reach tt_score?
            let mut extension = 0;
            if self.config.use_singular
                && is_pv
                && excluded.is_none()
                && !tt_move.is_none()
                && mv == tt_move
                && depth >= self.config.singular_min_depth
                && tt_bound == BOUND_LOWER
                && tt_depth >= depth - 3
                && tt_score.abs() < MATE_SCORE_BOUND
                && self.stack[ply].extensions < self.config.singular_extension_cap
            {
                let singular_beta = tt_score - self.config.singular_margin_per_depth * depth;
                let reduced = (depth - 1) / 2;
                let mut singular_pv = PVLine::default();
                let s = self.search_node(
                    pos,
                    reduced,
                    singular_beta - 1,
                    singular_beta,
                    ply,
                    false,
                    &mut singular_pv,
                    tt_move,
                );
                if self.stop {
                    return 0;
                }
                if s < singular_beta {
                    extension = 1;
                    self.stats.singular_extensions += 1;
                }
            }

            if !pos.make_move(mv) {
                continue;
            }
            if self.use_eval_move_hooks {
                self.evaluator.on_make_move(pos, mv);
            }

            legal_moves += 1;
            if is_quiet {
                quiets_seen += 1;
                if quiet_tried.len() < 256 {
                    quiet_tried.push((mv, move_idx));
                }
            }

            self.stack[ply + 1] = SearchStackEntry {
                last_move: mv,
                move_index: move_idx,
                did_null: false,
                static_eval: 0,
                extensions: self.stack[ply].extensions + extension,
            };

            let next_depth = depth - 1 + extension;
            let gives_check = pos.in_check(pos.side_to_move());

            let mut child_pv = PVLine::default();
            let mut score;

            if legal_moves == 1 {
                score = -self.search_node(
                    pos,
                    next_depth,
                    -beta,
                    -alpha,
                    ply + 1,
                    is_pv,
                    &mut child_pv,
                    Move::none(),
                );
            } else {
                let mut reduced = false;
                if self.config.use_lmr
                    && depth >= self.config.lmr_min_depth
                    && !is_pv
                    && !in_check
                    && is_quiet
                    && mv != tt_move
                    && legal_moves > self.config.lmr_full_depth_moves
                    && !gives_check
                {
                    let red = self.lmr_reduction(depth, legal_moves, quiet_score);
                    if red > 0 {
                        reduced = true;
                        self.stats.lmr_reduced += 1;
                        score = self.null_window_search(pos, next_depth - red, alpha, ply, &mut child_pv);
                        if score > alpha {
                            self.stats.lmr_fail_high_after_reduce += 1;
                            self.stats.lmr_researches += 1;
                            score = self.null_window_search(pos, next_depth, alpha, ply, &mut child_pv);
                        }
                    } else {
                        score = self.null_window_search(pos, next_depth, alpha, ply, &mut child_pv);
                        reduced = true;
                    }
                } else {
                    score = 0;
                }

                if !reduced {
                    score = self.null_window_search(pos, next_depth, alpha, ply, &mut child_pv);
                }

                if score > alpha && score < beta {
                    self.stats.pvs_researches += 1;
                    score = -self.search_node(
                        pos,
                        next_depth,
                        -beta,
                        -alpha,
                        ply + 1,
                        is_pv,
                        &mut child_pv,
                        Move::none(),
                    );
                }
            }

            pos.unmake_move();
            if self.use_eval_move_hooks {
                self.evaluator.on_unmake_move(pos, mv);
            }
            self.stack[ply + 1] = SearchStackEntry::default();

            if self.stop {
                return 0;
            }

            if score > best_score {
                best_score = score;
                best_move = mv;
                best_move_index = move_idx;
            }

            if score > alpha {
                alpha = score;
                update_pv(pv, mv, &child_pv);
            }

            if alpha >= beta {
                self.stats.beta_cutoffs += 1;
                match phase {
                    MovePickPhase::Tt => self.stats.cutoff_tt += 1,
                    MovePickPhase::GoodCapture => self.stats.cutoff_good_capture += 1,
                    MovePickPhase::Quiet => self.stats.cutoff_quiet += 1,
                    MovePickPhase::BadCapture => self.stats.cutoff_bad_capture += 1,
                    MovePickPhase::End => {}
                }

                if is_quiet {
                    if self.killers[ply][0] != mv {
                        self.killers[ply][1] = self.killers[ply][0];
                        self.killers[ply][0] = mv;
                    }
                    let prev = self.stack[ply].last_move;
                    if !prev.is_none() {
                        self.counter_moves[prev.source() as usize][prev.target() as usize] = mv;
                    }
                    self.update_quiet_history(us, mv, best_move_index, ply, depth, &quiet_tried);
                } else {
                    let bonus =
                        (depth * depth * self.config.history_bonus_scale.max(1)).max(1);
                    self.update_capture_history_entry(pos, mv, bonus);
                }
                break;
            }
        }

        if ply == 0 {
            self.root_legal_moves = legal_moves;
        }

        if legal_moves == 0 {
            if in_check {
                return -VALUE_MATE + ply as i32;
            }
            return 0;
        }

        let bound = if best_score >= beta {
            BOUND_LOWER
        } else if best_score > alpha_orig {
            BOUND_EXACT
        } else {
            BOUND_UPPER
        };

        if excluded.is_none() {
            self.tt.store(
                key,
                best_move,
                best_score,
                static_eval,
                depth,
                bound,
                self.generation,
                ply as i32,
            );
        }

        best_score
    }

    #[inline(always)]
    fn null_window_search(
        &mut self,
        pos: &mut Position,
        depth: i32,
        alpha: i32,
        ply: usize,
        child_pv: &mut PVLine,
    ) -> i32 {
        -self.search_node(pos, depth, -alpha - 1, -alpha, ply + 1, false, child_pv, Move::none())
    }

    // --- QUIESCENCE ---
    fn qsearch(&mut self, pos: &mut Position, mut alpha: i32, beta: i32, ply: usize, pv: &mut PVLine) -> i32 {
        pv.len = 0;
        self.seldepth = self.seldepth.max(ply as i32);
        self.stats.nodes += 1;
        self.stats.qnodes += 1;

        if self.should_stop_hard() {
            return 0;
        }

        if ply as i32 >= MAX_PLY - 1 {
            return self.evaluator.static_eval(pos);
        }

        if pos.is_draw() {
            return 0;
        }

        let in_check = pos.in_check(pos.side_to_move());
        let mut stand_pat = -VALUE_INFINITE;

        if !in_check {
            stand_pat = self.evaluator.static_eval(pos);
            if stand_pat >= beta {
                return stand_pat;
            }
            if stand_pat > alpha {
                alpha = stand_pat;
            }
        }

        self.stats.movegen_calls += 1;
        // In check the picker yields every move so the side can evade
        let mut picker = {
            let ctx = self.quiet_context(pos, ply);
            MovePicker::new(pos, Move::none(), !in_check, Some(&ctx))
        };
        self.stats.moves_generated += picker.generated_count() as u64;

        let mut legal_moves = 0;

        loop {
            let (mv, _) = picker.next();
            if mv.is_none() {
                break;
            }
            self.stats.move_pick_iterations += 1;

            if !in_check {
                if self.config.use_qdelta && mv.is_capture() && !mv.is_promotion() {
                    let gain = see::see_captured_value(pos, mv);
                    if stand_pat + gain + self.config.qsearch_delta_margin < alpha {
                        self.stats.qdelta_prunes += 1;
                        continue;
                    }
                }

                if self.config.use_see
                    && mv.is_capture()
                    && see::static_exchange_eval(pos, mv) < self.config.qsearch_see_threshold
                {
                    self.stats.qsee_prunes += 1;
                    continue;
                }
            }

            let move_idx = move_index(pos.piece_on(mv.source()), mv.target());
            if !pos.make_move(mv) {
                continue;
            }
            if self.use_eval_move_hooks {
                self.evaluator.on_make_move(pos, mv);
            }
            legal_moves += 1;
            self.stack[ply + 1] = SearchStackEntry {
                last_move: mv,
                move_index: move_idx,
                did_null: false,
                static_eval: 0,
                extensions: self.stack[ply].extensions,
            };

            let mut child_pv = PVLine::default();
            let score = -self.qsearch(pos, -beta, -alpha, ply + 1, &mut child_pv);

            pos.unmake_move();
            if self.use_eval_move_hooks {
                self.evaluator.on_unmake_move(pos, mv);
            }
            self.stack[ply + 1] = SearchStackEntry::default();

            if self.stop {
                return 0;
            }

            if score >= beta {
                return score;
            }
            if score > alpha {
                alpha = score;
                update_pv(pv, mv, &child_pv);
            }
        }

        if in_check && legal_moves == 0 {
            return -VALUE_MATE + ply as i32;
        }

        alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hce::HCEEvaluator;

    fn init_globals() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_masks();
        crate::movegen::init_move_tables();
        crate::eval_tables::init_psqt();
    }

    fn depth_limits(depth: i32) -> SearchLimits {
        SearchLimits {
            depth,
            ..SearchLimits::default()
        }
    }

    #[test]
    fn test_startpos_bestmove_is_legal() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        assert!(pos.set_startpos());

        let result = searcher.search(&mut pos, &depth_limits(3), None);
        assert!(!result.best_move.is_none());
        assert!(pos.make_move(result.best_move));
        pos.unmake_move();
        assert!(result.depth >= 3);
        assert!(result.stats.nodes > 0);
    }

    #[test]
    fn test_checkmated_root() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        assert!(pos.set_from_fen("7k/6Q1/6K1/8/8/8/8/8 b - - 0 1"));

        let result = searcher.search(&mut pos, &depth_limits(2), None);
        assert!(result.best_move.is_none());
        assert!(result.score <= -VALUE_MATE + MAX_PLY);
    }

    #[test]
    fn test_finds_mate_in_one() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        // Qg1-g7 is mate
        assert!(pos.set_from_fen("7k/8/6K1/8/8/8/8/6Q1 w - - 0 1"));

        let result = searcher.search(&mut pos, &depth_limits(3), None);
        assert!(result.score >= VALUE_MATE - MAX_PLY);
        assert_eq!(movegen::move_to_uci(result.best_move), "g1g7");
    }

    #[test]
    fn test_stalemate_scores_zero() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        // Black to move, no legal move, not in check
        assert!(pos.set_from_fen("k7/8/1Q6/8/8/8/8/K7 b - - 0 1"));

        let result = searcher.search(&mut pos, &depth_limits(3), None);
        assert!(result.best_move.is_none());
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_node_limit_respected() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        assert!(pos.set_startpos());

        let limits = SearchLimits {
            nodes: 5_000,
            ..SearchLimits::default()
        };
        let result = searcher.search(&mut pos, &limits, None);
        // A small overshoot is allowed: the limit is polled per node batch
        assert!(result.stats.nodes <= 6_000);
        assert!(!result.best_move.is_none());
    }

    #[test]
    fn test_iteration_callback_streams_depths() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        assert!(pos.set_startpos());

        let mut depths = Vec::new();
        let mut cb = |info: &SearchIterationInfo| {
            depths.push(info.depth);
            assert!(info.nodes > 0);
            assert!(!info.pv.is_empty());
        };
        let _ = searcher.search(&mut pos, &depth_limits(4), Some(&mut cb));
        assert_eq!(depths, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_lost_side_never_scores_positive() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        // Bare king against king + queen: never report a positive score
        assert!(pos.set_from_fen("k7/8/8/8/8/8/8/K6q w - - 0 1"));
        let result = searcher.search(&mut pos, &depth_limits(6), None);
        assert!(result.score <= 0);
    }

    #[test]
    fn test_config_toggles_disable_pruning() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut config = SearchConfig::default();
        config.use_nmp = false;
        config.use_lmr = false;
        config.use_rfp = false;
        config.use_razoring = false;
        config.use_futility = false;
        config.use_lmp = false;
        config.use_history_pruning = false;
        config.use_probcut = false;
        config.use_singular = false;
        searcher.set_config(config);

        let mut pos = Position::new();
        assert!(pos.set_startpos());
        let result = searcher.search(&mut pos, &depth_limits(4), None);
        assert!(!result.best_move.is_none());
        assert_eq!(result.stats.nmp_attempts, 0);
        assert_eq!(result.stats.lmr_reduced, 0);
        assert_eq!(result.stats.razor_drops, 0);
        assert_eq!(result.stats.futility_prunes, 0);
    }

    #[test]
    fn test_deeper_search_beats_shallow_on_tactic() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        // White wins a rook with a simple fork: Nd5-e7+? use a hanging rook instead
        assert!(pos.set_from_fen("4k3/8/8/3r4/8/4N3/8/4K3 w - - 0 1"));
        let result = searcher.search(&mut pos, &depth_limits(4), None);
        // Nxd5 is simply winning
        assert_eq!(movegen::move_to_uci(result.best_move), "e3d5");
    }

    #[test]
    fn test_mate_score_encoding_distance() {
        init_globals();
        let eval = HCEEvaluator::new();
        let mut searcher = Searcher::new(&eval);
        let mut pos = Position::new();
        assert!(pos.set_from_fen("7k/8/6K1/8/8/8/8/6Q1 w - - 0 1"));
        let result = searcher.search(&mut pos, &depth_limits(4), None);
        // Mate in one: score is exactly VALUE_MATE - 1
        assert_eq!(result.score, VALUE_MATE - 1);
    }
}
