use crate::env::{EnvConfig, FlappyEnv};
use anyhow::Result;
use candle_core as candle;
use candle::{DType, Device, IndexOp, Tensor};
use candle_nn as nn;
use candle_nn::{Module, Optimizer, VarBuilder, VarMap};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const OBS_DIM: usize = 2;
const NUM_ACTIONS: usize = 2;
const LEARNING_RATE: f64 = 1e-3;

/// Shared 2-32-64 ReLU trunk; the actor puts a softmax on top of a 2-wide
/// head, the critic a linear 1-wide head.
#[derive(Debug)]
struct MlpHead {
    fc1: nn::Linear,
    fc2: nn::Linear,
    out: nn::Linear,
}

impl MlpHead {
    fn new(vb: VarBuilder, out_dim: usize) -> candle::Result<Self> {
        let fc1 = nn::linear(OBS_DIM, 32, vb.pp("fc1"))?;
        let fc2 = nn::linear(32, 64, vb.pp("fc2"))?;
        let out = nn::linear(64, out_dim, vb.pp("out"))?;
        Ok(Self { fc1, fc2, out })
    }

    fn forward(&self, x: &Tensor) -> candle::Result<Tensor> {
        let x = self.fc1.forward(x)?.relu()?;
        let x = self.fc2.forward(&x)?.relu()?;
        self.out.forward(&x)
    }
}

pub struct EpisodeStats {
    pub steps: usize,
    pub total_reward: f32,
    pub epsilon: f32,
}

pub struct ActorCritic {
    actor: MlpHead,
    critic: MlpHead,
    actor_opt: nn::AdamW,
    critic_opt: nn::AdamW,
    device: Device,
    pub discount: f32,
    pub epsilon: f32,
    pub epsilon_decay: f32,
    rng: SmallRng,
}

impl ActorCritic {
    pub fn new(device: Device) -> candle::Result<Self> {
        let actor_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&actor_vars, DType::F32, &device);
        let actor = MlpHead::new(vb, NUM_ACTIONS)?;

        let critic_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&critic_vars, DType::F32, &device);
        let critic = MlpHead::new(vb, 1)?;

        // One optimizer per network; the combined loss steps both.
        let actor_opt = nn::AdamW::new_lr(actor_vars.all_vars(), LEARNING_RATE)?;
        let critic_opt = nn::AdamW::new_lr(critic_vars.all_vars(), LEARNING_RATE)?;

        Ok(Self {
            actor,
            critic,
            actor_opt,
            critic_opt,
            device,
            discount: 0.99,
            epsilon: 1.0,
            epsilon_decay: 0.9975,
            rng: SmallRng::from_entropy(),
        })
    }

    /// Action distribution and value estimate for one observation.
    fn forward(&self, obs: &[f32; 2]) -> candle::Result<(Tensor, Tensor)> {
        let x = Tensor::new(&obs[..], &self.device)?.unsqueeze(0)?;
        let probs = nn::ops::softmax(&self.actor.forward(&x)?, 1)?.squeeze(0)?;
        let value = self.critic.forward(&x)?.squeeze(0)?.squeeze(0)?;
        Ok((probs, value))
    }

    /// One rollout from `reset` to terminal or `max_steps`, then a single
    /// gradient step on each network.
    pub fn train_episode(&mut self, env: &mut FlappyEnv, max_steps: usize) -> Result<EpisodeStats> {
        let mut obs = env.reset();
        let mut rewards: Vec<f32> = Vec::new();
        let mut values: Vec<Tensor> = Vec::new();
        let mut log_probs: Vec<Tensor> = Vec::new();
        let mut bootstrap = 0.0f32;

        for step in 0..max_steps {
            let (probs, value) = self.forward(&obs)?;
            let action = if self.rng.gen_range(0.0..1.0f32) > self.epsilon {
                sample_categorical(&probs.to_vec1::<f32>()?, &mut self.rng)
            } else {
                env.sample_action()
            };
            let (next_obs, reward, done) = env.step(action)?;

            let log_prob = (probs.i(action as usize)? + 1e-5)?.log()?;
            rewards.push(reward);
            values.push(value);
            log_probs.push(log_prob);
            obs = next_obs;

            if done {
                bootstrap = 0.0;
                break;
            }
            if step == max_steps - 1 {
                // Ran out of budget in a live state; bootstrap from the critic.
                let (_, value) = self.forward(&obs)?;
                bootstrap = value.to_scalar::<f32>()?;
            }
        }

        let returns = normalize(&discounted_returns(&rewards, bootstrap, self.discount));
        let returns_t = Tensor::new(&returns[..], &self.device)?;
        let values_t = Tensor::stack(&values, 0)?;
        let log_probs_t = Tensor::stack(&log_probs, 0)?;

        let advantage = (&returns_t - &values_t)?;
        let actor_loss = (log_probs_t * advantage.detach())?.mean_all()?.neg()?;
        let critic_loss = (advantage.sqr()?.mean_all()? * 0.5)?;
        let loss = (actor_loss + critic_loss)?;

        self.actor_opt.backward_step(&loss)?;
        self.critic_opt.backward_step(&loss)?;
        self.epsilon *= self.epsilon_decay;

        Ok(EpisodeStats {
            steps: rewards.len(),
            total_reward: rewards.iter().sum(),
            epsilon: self.epsilon,
        })
    }
}

/// Backward accumulation of discounted returns, seeded with the terminal
/// bootstrap value.
pub fn discounted_returns(rewards: &[f32], bootstrap: f32, discount: f32) -> Vec<f32> {
    let mut returns = vec![0.0f32; rewards.len()];
    let mut q = bootstrap;
    for t in (0..rewards.len()).rev() {
        q = rewards[t] + discount * q;
        returns[t] = q;
    }
    returns
}

/// Zero mean, unit std, epsilon-stabilized denominator.
pub fn normalize(xs: &[f32]) -> Vec<f32> {
    let n = xs.len() as f32;
    let mean = xs.iter().sum::<f32>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt() + f32::EPSILON;
    xs.iter().map(|x| (x - mean) / std).collect()
}

fn sample_categorical(probs: &[f32], rng: &mut SmallRng) -> u8 {
    let mut r = rng.gen_range(0.0..1.0f32);
    for (i, p) in probs.iter().enumerate() {
        if r < *p {
            return i as u8;
        }
        r -= p;
    }
    (probs.len() - 1) as u8
}

pub fn preferred_device() -> Device {
    // Try CUDA if feature enabled, else CPU
    #[cfg(feature = "cuda")]
    if let Ok(dev) = Device::new_cuda(0) {
        return dev;
    }
    Device::Cpu
}

/// Headless single-agent training loop.
pub fn train(episodes: usize, max_steps: usize) -> Result<()> {
    let mut env = FlappyEnv::new(EnvConfig::default(), 1);
    let mut agent = ActorCritic::new(preferred_device())?;
    for episode in 0..episodes {
        let stats = agent.train_episode(&mut env, max_steps)?;
        println!(
            "episode {episode:4}  steps {:5}  reward {:9.2}  eps {:.4}",
            stats.steps, stats.total_reward, stats.epsilon
        );
    }
    Ok(())
}
