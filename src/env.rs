use crate::rect::Rect;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::fmt;

pub const PIPE_CAPACITY: usize = 4;
pub const PIPE_SPEED: f32 = 3.0;
pub const PIPE_W: f32 = 52.0;
pub const PIPE_H: f32 = 320.0;
pub const BIRD_W: f32 = 34.0;
pub const BIRD_H: f32 = 24.0;

pub const REWARD_TICK: f32 = -0.02;
pub const REWARD_OUT_OF_BOUNDS: f32 = -5.0;
pub const REWARD_PIPE_HIT: f32 = -2.0;
pub const REWARD_PIPE_PASSED: f32 = 10.0;

#[derive(Clone, Copy, Debug)]
pub struct EnvConfig {
    pub width: f32,
    pub height: f32,
    pub gravity: f32,
    pub frame_rate: u32,
    pub jump_velocity: f32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            width: 400.0,
            height: 600.0,
            gravity: 0.25,
            frame_rate: 60,
            jump_velocity: -3.0,
        }
    }
}

impl EnvConfig {
    /// The population variant flaps harder.
    pub fn population() -> Self {
        Self {
            jump_velocity: -4.0,
            ..Self::default()
        }
    }

    /// Vertical opening between a pair's top and bottom pipe.
    pub fn tb_pipe_gap(&self) -> f32 {
        0.25 * self.height
    }

    /// Horizontal spacing between consecutive pairs.
    pub fn ss_pipe_gap(&self) -> f32 {
        self.width / 2.0
    }

    pub fn ground_y(&self) -> f32 {
        0.85 * self.height
    }

    /// X where fresh pipes enter, just past the right edge.
    pub fn spawn_x(&self) -> f32 {
        self.width + PIPE_W / 2.0
    }

    pub fn bird_x(&self) -> f32 {
        0.2 * self.width
    }

    pub fn start_y(&self) -> f32 {
        0.425 * self.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collision {
    Pipe,
    Top,
    Bottom,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BirdState {
    pub rect: Rect,
    pub velocity: f32,
    pub alive: bool,
}

/// One obstacle unit: a shared x, a gap center, and the two pipe rectangles
/// derived from them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipePair {
    pub x: f32,
    pub gap_center: f32,
    pub gap: f32,
}

impl PipePair {
    pub fn bottom_rect(&self) -> Rect {
        Rect::from_midtop(self.x, self.gap_center + self.gap / 2.0, PIPE_W, PIPE_H)
    }

    pub fn top_rect(&self) -> Rect {
        Rect::from_midbottom(self.x, self.gap_center - self.gap / 2.0, PIPE_W, PIPE_H)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvError {
    InvalidAction(u8),
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::InvalidAction(a) => write!(f, "got unexpected action - {a}"),
        }
    }
}

impl std::error::Error for EnvError {}

/// The physics core shared by both training variants. One environment owns an
/// indexed collection of birds; the single-agent API is the `step` wrapper
/// around bird 0, the population drivers use `advance_pipes` + `step_bird`.
pub struct FlappyEnv {
    pub cfg: EnvConfig,
    pub birds: Vec<BirdState>,
    pub pipes: VecDeque<PipePair>,
    rng: SmallRng,
}

impl FlappyEnv {
    pub fn new(cfg: EnvConfig, population: usize) -> Self {
        Self::with_rng(cfg, population, SmallRng::from_entropy())
    }

    pub fn seeded(cfg: EnvConfig, population: usize, seed: u64) -> Self {
        Self::with_rng(cfg, population, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(cfg: EnvConfig, population: usize, mut rng: SmallRng) -> Self {
        let mut birds = Vec::with_capacity(population);
        for _ in 0..population {
            // A lone bird starts at the fixed spot; a population fans out.
            let y = if population == 1 {
                cfg.start_y()
            } else {
                rng.gen_range(0.1 * cfg.height..0.8 * cfg.height)
            };
            birds.push(BirdState {
                rect: Rect::new(cfg.bird_x(), y, BIRD_W, BIRD_H),
                velocity: 0.0,
                alive: true,
            });
        }
        let mut env = Self {
            cfg,
            birds,
            pipes: VecDeque::with_capacity(PIPE_CAPACITY),
            rng,
        };
        env.spawn_pipe();
        env
    }

    /// Back to episode-start defaults. Returns the initial observation of
    /// bird 0.
    pub fn reset(&mut self) -> [f32; 2] {
        for bird in &mut self.birds {
            bird.velocity = 0.0;
            bird.rect.cy = self.cfg.start_y();
            bird.alive = true;
        }
        self.pipes.clear();
        self.spawn_pipe();
        self.observation(0)
    }

    /// Appends a pair once the newest one has scrolled a full spacing away
    /// from the spawn line (or the queue is empty).
    fn spawn_pipe(&mut self) {
        let spawn_x = self.cfg.spawn_x();
        let due = match self.pipes.back() {
            None => true,
            Some(last) => spawn_x - last.x >= self.cfg.ss_pipe_gap(),
        };
        if !due {
            return;
        }
        if self.pipes.len() == PIPE_CAPACITY {
            self.pipes.pop_front();
        }
        let gap = self.cfg.tb_pipe_gap();
        let gap_bottom = self
            .rng
            .gen_range(0.4 * self.cfg.height..=0.75 * self.cfg.height);
        self.pipes.push_back(PipePair {
            x: spawn_x,
            gap_center: gap_bottom - gap / 2.0,
            gap,
        });
    }

    /// Scrolls every pair left by one tick and retires the lead pair once the
    /// bird line reaches it. Returns true on that pass event.
    pub fn advance_pipes(&mut self) -> bool {
        for pipe in &mut self.pipes {
            pipe.x -= PIPE_SPEED;
        }
        let bird_x = self.cfg.bird_x();
        let passed = self.pipes.front().is_some_and(|p| p.x <= bird_x);
        if passed {
            self.pipes.pop_front();
        }
        self.spawn_pipe();
        passed
    }

    /// One kinematics tick for one bird. Validates the action before touching
    /// any state. `index` must be a valid bird index; only actions are
    /// runtime inputs, an out-of-range index is a caller bug and panics.
    pub fn apply_action(&mut self, index: usize, action: u8) -> Result<(), EnvError> {
        debug_assert!(index < self.birds.len());
        match action {
            1 => self.birds[index].velocity = self.cfg.jump_velocity,
            0 => {}
            other => return Err(EnvError::InvalidAction(other)),
        }
        let bird = &mut self.birds[index];
        bird.velocity += self.cfg.gravity;
        bird.rect.cy += bird.velocity;
        Ok(())
    }

    /// First match wins: bottom pipes, then top pipes, then the ceiling, then
    /// the floor. `index` must be a valid bird index.
    pub fn check_collision(&self, index: usize) -> Option<Collision> {
        debug_assert!(index < self.birds.len());
        let rect = self.birds[index].rect;
        for pipe in &self.pipes {
            if rect.overlaps(&pipe.bottom_rect()) {
                return Some(Collision::Pipe);
            }
        }
        for pipe in &self.pipes {
            if rect.overlaps(&pipe.top_rect()) {
                return Some(Collision::Pipe);
            }
        }
        if rect.top() <= 0.0 {
            return Some(Collision::Top);
        }
        if rect.bottom() >= self.cfg.ground_y() {
            return Some(Collision::Bottom);
        }
        None
    }

    /// Vertical offset from the next gap center and horizontal distance to
    /// the next pipe, each with uniform noise in [0,1) folded in. `index`
    /// must be a valid bird index.
    pub fn observation(&mut self, index: usize) -> [f32; 2] {
        debug_assert!(index < self.birds.len());
        let lead = *self.pipes.front().unwrap();
        let rect = self.birds[index].rect;
        [
            rect.cy - lead.gap_center + self.rng.gen_range(0.0..1.0),
            lead.x - rect.cx + self.rng.gen_range(0.0..1.0),
        ]
    }

    /// Full single-agent tick: bird physics, pipe scroll, collision, reward.
    pub fn step(&mut self, action: u8) -> Result<([f32; 2], f32, bool), EnvError> {
        self.apply_action(0, action)?;
        let passed = self.advance_pipes();
        let collision = self.check_collision(0);
        if collision.is_some() {
            self.birds[0].alive = false;
        }
        let reward = match collision {
            Some(Collision::Top) | Some(Collision::Bottom) => REWARD_OUT_OF_BOUNDS,
            Some(Collision::Pipe) => REWARD_PIPE_HIT,
            None if passed => REWARD_PIPE_PASSED,
            None => REWARD_TICK,
        };
        Ok((self.observation(0), reward, collision.is_some()))
    }

    /// Population tick for one bird; the caller advances the pipes once per
    /// shared frame. Returns true if the bird collided.
    pub fn step_bird(&mut self, index: usize, action: u8) -> Result<bool, EnvError> {
        self.apply_action(index, action)?;
        let collided = self.check_collision(index).is_some();
        if collided {
            self.birds[index].alive = false;
        }
        Ok(collided)
    }

    pub fn alive_count(&self) -> usize {
        self.birds.iter().filter(|b| b.alive).count()
    }

    pub fn sample_action(&mut self) -> u8 {
        self.rng.gen_range(0..2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> FlappyEnv {
        FlappyEnv::seeded(EnvConfig::default(), 1, 7)
    }

    #[test]
    fn kinematics_are_exact() {
        let mut env = env();
        env.birds[0].velocity = 1.5;
        env.birds[0].rect.cy = 100.0;

        env.apply_action(0, 0).unwrap();
        assert_eq!(env.birds[0].velocity, 1.75);
        assert_eq!(env.birds[0].rect.cy, 101.75);

        env.apply_action(0, 1).unwrap();
        assert_eq!(env.birds[0].velocity, -3.0 + 0.25);
        assert_eq!(env.birds[0].rect.cy, 101.75 - 2.75);
    }

    #[test]
    fn pipe_gap_holds_for_every_pair() {
        let mut env = env();
        for tick in 0..600 {
            let _ = env.step(if tick % 17 == 0 { 1 } else { 0 }).unwrap();
            for pipe in &env.pipes {
                let opening = pipe.bottom_rect().top() - pipe.top_rect().bottom();
                assert!((opening - env.cfg.tb_pipe_gap()).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn bottom_pipe_beats_ceiling() {
        let mut env = env();
        env.birds[0].rect.cy = 5.0; // top edge at -7, through the ceiling
        env.pipes.clear();
        env.pipes.push_back(PipePair {
            x: env.cfg.bird_x(),
            gap_center: -75.0, // bottom pipe spans y 0..320 at the bird column
            gap: 150.0,
        });
        assert_eq!(env.check_collision(0), Some(Collision::Pipe));
    }

    #[test]
    fn idle_tick_reward() {
        let mut env = env();
        env.reset();
        let (_, reward, done) = env.step(0).unwrap();
        assert!(!done);
        assert_eq!(reward, REWARD_TICK);
    }

    #[test]
    fn ceiling_collision_reward() {
        let mut env = env();
        env.reset();
        env.birds[0].rect.cy = 10.0;
        let (_, reward, done) = env.step(0).unwrap();
        assert!(done);
        assert_eq!(reward, REWARD_OUT_OF_BOUNDS);
        assert_eq!(env.check_collision(0), Some(Collision::Top));
    }

    #[test]
    fn pipe_collision_reward() {
        let mut env = env();
        env.reset();
        env.pipes.clear();
        // After one scroll tick this pair sits right on the bird.
        env.pipes.push_back(PipePair {
            x: 85.0,
            gap_center: 180.0,
            gap: 150.0,
        });
        let (_, reward, done) = env.step(0).unwrap();
        assert!(done);
        assert_eq!(reward, REWARD_PIPE_HIT);
    }

    #[test]
    fn pipe_pass_reward() {
        let mut env = env();
        env.reset();
        env.pipes.clear();
        // One scroll tick puts this pair at x 79, at/behind the bird at 80.
        env.pipes.push_back(PipePair {
            x: 82.0,
            gap_center: 255.0,
            gap: 150.0,
        });
        let (_, reward, done) = env.step(0).unwrap();
        assert!(!done);
        assert_eq!(reward, REWARD_PIPE_PASSED);
    }

    #[test]
    fn collision_overrides_pass_bonus_on_the_same_tick() {
        let mut env = env();
        env.reset();
        env.pipes.clear();
        // One scroll tick evicts this pair (x 79, behind the bird at 80)...
        env.pipes.push_back(PipePair {
            x: 82.0,
            gap_center: 255.0,
            gap: 150.0,
        });
        // ...on the same tick the bird sinks through the floor.
        env.birds[0].rect.cy = 498.0;
        let (_, reward, done) = env.step(0).unwrap();
        assert!(done);
        assert_eq!(reward, REWARD_OUT_OF_BOUNDS);
        assert_eq!(env.check_collision(0), Some(Collision::Bottom));
    }

    #[test]
    fn queue_stays_bounded_and_nonempty() {
        let mut env = env();
        env.reset();
        for _ in 0..500 {
            let _ = env.step(0).unwrap();
            assert!(!env.pipes.is_empty());
            assert!(env.pipes.len() <= PIPE_CAPACITY);
        }
    }

    #[test]
    fn unchecked_gravity_hits_the_floor() {
        let mut env = env();
        env.reset();
        let mut terminal = None;
        for _ in 0..200 {
            let (_, reward, done) = env.step(0).unwrap();
            if done {
                terminal = Some(reward);
                break;
            }
        }
        assert_eq!(terminal, Some(REWARD_OUT_OF_BOUNDS));
        assert_eq!(env.check_collision(0), Some(Collision::Bottom));
    }

    #[test]
    fn sample_action_covers_both_values() {
        let mut env = env();
        let mut seen = [false; 2];
        for _ in 0..1000 {
            let a = env.sample_action();
            assert!(a == 0 || a == 1);
            seen[a as usize] = true;
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn invalid_action_fails_without_mutation() {
        let mut env = env();
        env.reset();
        let birds = env.birds.clone();
        let pipes = env.pipes.clone();

        let err = env.step(2).unwrap_err();
        assert_eq!(err, EnvError::InvalidAction(2));
        assert_eq!(env.birds, birds);
        assert_eq!(env.pipes, pipes);
    }

    #[test]
    #[should_panic]
    fn out_of_range_bird_index_is_a_caller_bug() {
        let mut env = env();
        let _ = env.step_bird(5, 0);
    }

    #[test]
    fn population_spawns_spread_out_and_die_individually() {
        let mut env = FlappyEnv::seeded(EnvConfig::population(), 10, 3);
        assert_eq!(env.birds.len(), 10);
        env.birds[4].rect.cy = 5.0;
        let collided = env.step_bird(4, 0).unwrap();
        assert!(collided);
        assert!(!env.birds[4].alive);
        assert_eq!(env.alive_count(), 9);
    }
}
