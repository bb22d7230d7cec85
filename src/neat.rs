use crate::env::{EnvConfig, EnvError, FlappyEnv};
use anyhow::Result;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Hard cap so a generation that learns to fly forever still terminates.
/// This is a driver safeguard, not part of the environment contract; birds
/// still alive at the cap keep the fitness assigned on the last frame.
pub const MAX_GENERATION_FRAMES: usize = 60 * 60 * 5;

const WEIGHT_PERTURB_PROB: f64 = 0.8;
const WEIGHT_PERTURB_POWER: f32 = 0.5;
const ADD_CONN_PROB: f64 = 0.05;
const ADD_NODE_PROB: f64 = 0.03;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Input,
    Hidden,
    Output,
}

#[derive(Clone, Copy, Debug)]
pub struct ConnGene {
    pub from: usize,
    pub to: usize,
    pub weight: f32,
    pub enabled: bool,
    pub innovation: usize,
}

/// A feed-forward genome. Node ids are indices into `nodes`; connections only
/// ever form a DAG (the structural mutations reject cycles).
#[derive(Clone, Debug)]
pub struct Genome {
    pub nodes: Vec<NodeKind>,
    pub conns: Vec<ConnGene>,
}

impl Genome {
    /// Fully connected inputs-to-outputs starter genome, no hidden nodes.
    pub fn minimal(inputs: usize, outputs: usize, rng: &mut SmallRng, innovation: &mut usize) -> Self {
        let mut nodes = vec![NodeKind::Input; inputs];
        nodes.extend(std::iter::repeat(NodeKind::Output).take(outputs));
        let mut conns = Vec::with_capacity(inputs * outputs);
        for from in 0..inputs {
            for to in inputs..inputs + outputs {
                conns.push(ConnGene {
                    from,
                    to,
                    weight: rng.gen_range(-1.0..1.0),
                    enabled: true,
                    innovation: *innovation,
                });
                *innovation += 1;
            }
        }
        Self { nodes, conns }
    }

    pub fn mutate(&mut self, rng: &mut SmallRng, innovation: &mut usize) {
        for conn in &mut self.conns {
            if conn.enabled && rng.gen_bool(WEIGHT_PERTURB_PROB) {
                conn.weight += rng.gen_range(-WEIGHT_PERTURB_POWER..WEIGHT_PERTURB_POWER);
            }
        }
        if rng.gen_bool(ADD_CONN_PROB) {
            self.add_connection(rng, innovation);
        }
        if rng.gen_bool(ADD_NODE_PROB) {
            self.add_node(rng, innovation);
        }
    }

    /// New random-weight edge between two previously unconnected nodes; back
    /// edges (anything that would close a cycle) are rejected.
    fn add_connection(&mut self, rng: &mut SmallRng, innovation: &mut usize) {
        for _ in 0..16 {
            let from = rng.gen_range(0..self.nodes.len());
            let to = rng.gen_range(0..self.nodes.len());
            if from == to
                || self.nodes[from] == NodeKind::Output
                || self.nodes[to] == NodeKind::Input
                || self.conns.iter().any(|c| c.from == from && c.to == to)
                || self.creates_cycle(from, to)
            {
                continue;
            }
            self.conns.push(ConnGene {
                from,
                to,
                weight: rng.gen_range(-1.0..1.0),
                enabled: true,
                innovation: *innovation,
            });
            *innovation += 1;
            return;
        }
    }

    /// Splits an enabled connection: in-edge gets weight 1.0, out-edge
    /// inherits the split weight.
    fn add_node(&mut self, rng: &mut SmallRng, innovation: &mut usize) {
        let enabled: Vec<usize> = (0..self.conns.len()).filter(|&i| self.conns[i].enabled).collect();
        if enabled.is_empty() {
            return;
        }
        let split = enabled[rng.gen_range(0..enabled.len())];
        self.conns[split].enabled = false;
        let (from, to, weight) = {
            let c = self.conns[split];
            (c.from, c.to, c.weight)
        };
        let node = self.nodes.len();
        self.nodes.push(NodeKind::Hidden);
        self.conns.push(ConnGene {
            from,
            to: node,
            weight: 1.0,
            enabled: true,
            innovation: *innovation,
        });
        *innovation += 1;
        self.conns.push(ConnGene {
            from: node,
            to,
            weight,
            enabled: true,
            innovation: *innovation,
        });
        *innovation += 1;
    }

    /// Would an edge from -> to close a cycle? True if `from` is reachable
    /// from `to` along enabled connections.
    fn creates_cycle(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![to];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(node) = stack.pop() {
            if node == from {
                return true;
            }
            if seen[node] {
                continue;
            }
            seen[node] = true;
            for conn in self.conns.iter().filter(|c| c.enabled && c.from == node) {
                stack.push(conn.to);
            }
        }
        false
    }
}

/// Phenotype: the genome flattened into a topological evaluation order.
pub struct Network {
    order: Vec<usize>,
    incoming: Vec<Vec<(usize, f32)>>,
    num_inputs: usize,
    outputs: Vec<usize>,
}

impl Network {
    pub fn new(genome: &Genome) -> Self {
        let n = genome.nodes.len();
        let mut incoming: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for conn in genome.conns.iter().filter(|c| c.enabled) {
            incoming[conn.to].push((conn.from, conn.weight));
            in_degree[conn.to] += 1;
        }

        // Kahn's algorithm; the genome invariant guarantees this consumes
        // every node.
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = ready.pop() {
            order.push(node);
            for conn in genome.conns.iter().filter(|c| c.enabled && c.from == node) {
                in_degree[conn.to] -= 1;
                if in_degree[conn.to] == 0 {
                    ready.push(conn.to);
                }
            }
        }

        let num_inputs = genome.nodes.iter().filter(|&&k| k == NodeKind::Input).count();
        let outputs = (0..n).filter(|&i| genome.nodes[i] == NodeKind::Output).collect();
        Self {
            order,
            incoming,
            num_inputs,
            outputs,
        }
    }

    pub fn activate(&self, inputs: &[f32]) -> Vec<f32> {
        let mut values = vec![0.0f32; self.incoming.len()];
        values[..self.num_inputs].copy_from_slice(inputs);
        for &node in &self.order {
            if node < self.num_inputs {
                continue;
            }
            let sum: f32 = self.incoming[node].iter().map(|&(src, w)| values[src] * w).sum();
            values[node] = sigmoid(sum);
        }
        self.outputs.iter().map(|&id| values[id]).collect()
    }

    /// True when the evaluation order covers the whole genome, i.e. no cycle
    /// slipped through.
    pub fn is_complete(&self) -> bool {
        self.order.len() == self.incoming.len()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// The evolution oracle: owns the genomes and the innovation counter, turns a
/// fitness vector into the next generation.
pub struct Population {
    pub genomes: Vec<Genome>,
    pub generation: usize,
    innovation: usize,
    rng: SmallRng,
}

impl Population {
    pub fn new(size: usize, inputs: usize, outputs: usize) -> Self {
        Self::with_rng(size, inputs, outputs, SmallRng::from_entropy())
    }

    pub fn seeded(size: usize, inputs: usize, outputs: usize, seed: u64) -> Self {
        Self::with_rng(size, inputs, outputs, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(size: usize, inputs: usize, outputs: usize, mut rng: SmallRng) -> Self {
        let mut innovation = 0;
        let genomes = (0..size)
            .map(|_| Genome::minimal(inputs, outputs, &mut rng, &mut innovation))
            .collect();
        Self {
            genomes,
            generation: 0,
            innovation,
            rng,
        }
    }

    pub fn networks(&self) -> Vec<Network> {
        self.genomes.iter().map(Network::new).collect()
    }

    /// Rank by fitness, keep the champion unchanged, refill with mutated
    /// clones drawn from the top half.
    pub fn next_generation(&mut self, fitness: &[f32]) {
        let mut order: Vec<usize> = (0..self.genomes.len()).collect();
        order.sort_by(|&a, &b| fitness[b].partial_cmp(&fitness[a]).unwrap_or(std::cmp::Ordering::Equal));
        let parents = &order[..(order.len() / 2).max(1)];

        let mut next = Vec::with_capacity(self.genomes.len());
        next.push(self.genomes[order[0]].clone());
        while next.len() < self.genomes.len() {
            let parent = parents[self.rng.gen_range(0..parents.len())];
            let mut child = self.genomes[parent].clone();
            child.mutate(&mut self.rng, &mut self.innovation);
            next.push(child);
        }
        self.genomes = next;
        self.generation += 1;
    }
}

/// One synchronized generation over a shared environment: each frame the
/// pipes advance once, then every alive bird is stepped with its own
/// network's decision.
pub struct GenerationSim {
    pub env: FlappyEnv,
    pub fitness: Vec<f32>,
    pub score: usize,
    pub frame: usize,
    nets: Vec<Network>,
}

impl GenerationSim {
    pub fn new(cfg: EnvConfig, nets: Vec<Network>) -> Self {
        let env = FlappyEnv::new(cfg, nets.len());
        Self {
            fitness: vec![0.0; nets.len()],
            score: 0,
            frame: 0,
            env,
            nets,
        }
    }

    pub fn finished(&self) -> bool {
        self.env.alive_count() == 0
    }

    pub fn tick(&mut self) -> Result<(), EnvError> {
        if self.finished() {
            return Ok(());
        }
        if self.env.advance_pipes() {
            self.score += 1;
        }
        let game_time = self.frame as f32 / self.env.cfg.frame_rate as f32;
        for i in 0..self.nets.len() {
            if !self.env.birds[i].alive {
                continue;
            }
            let obs = self.env.observation(i);
            let output = self.nets[i].activate(&obs);
            // Output above 0.5 keeps gliding; at or below triggers a jump.
            let action = if output[0] > 0.5 { 0 } else { 1 };
            let collided = self.env.step_bird(i, action)?;
            self.fitness[i] = game_time + self.score as f32 - if collided { 10.0 } else { 0.0 };
        }
        self.frame += 1;
        Ok(())
    }
}

/// Headless population training loop.
pub fn train(generations: usize, population: usize) -> Result<()> {
    let cfg = EnvConfig::population();
    let mut pop = Population::new(population, 2, 1);
    for _ in 0..generations {
        let mut sim = GenerationSim::new(cfg, pop.networks());
        while !sim.finished() && sim.frame < MAX_GENERATION_FRAMES {
            sim.tick()?;
        }
        let best = sim.fitness.iter().cloned().fold(f32::MIN, f32::max);
        let mean = sim.fitness.iter().sum::<f32>() / sim.fitness.len() as f32;
        println!(
            "generation {:3}  best {:8.2}  mean {:8.2}  frames {:5}  pipes {}",
            pop.generation, best, mean, sim.frame, sim.score
        );
        pop.next_generation(&sim.fitness);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_genome_evaluates_deterministically() {
        let mut rng = SmallRng::seed_from_u64(2);
        let mut innovation = 0;
        let genome = Genome::minimal(2, 1, &mut rng, &mut innovation);
        assert_eq!(innovation, 2);

        let net = Network::new(&genome);
        let a = net.activate(&[0.3, -0.7]);
        let b = net.activate(&[0.3, -0.7]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        assert!(a[0] > 0.0 && a[0] < 1.0);
    }

    #[test]
    fn mutation_preserves_acyclicity() {
        let mut rng = SmallRng::seed_from_u64(9);
        let mut innovation = 0;
        let mut genome = Genome::minimal(2, 1, &mut rng, &mut innovation);
        for _ in 0..500 {
            genome.mutate(&mut rng, &mut innovation);
        }
        let net = Network::new(&genome);
        assert!(net.is_complete());
        assert!(net.activate(&[150.0, 300.0])[0].is_finite());
    }

    #[test]
    fn split_connection_keeps_old_edge_disabled() {
        let mut rng = SmallRng::seed_from_u64(4);
        let mut innovation = 0;
        let mut genome = Genome::minimal(2, 1, &mut rng, &mut innovation);
        genome.add_node(&mut rng, &mut innovation);
        assert_eq!(genome.nodes.len(), 4);
        assert_eq!(genome.conns.iter().filter(|c| !c.enabled).count(), 1);
        let incoming = genome
            .conns
            .iter()
            .find(|c| c.enabled && c.to == 3)
            .unwrap();
        assert_eq!(incoming.weight, 1.0);
    }

    #[test]
    fn turnover_keeps_size_and_champion() {
        let mut pop = Population::seeded(10, 2, 1, 5);
        let champion = pop.genomes[3].clone();
        let mut fitness = vec![0.0; 10];
        fitness[3] = 100.0;
        pop.next_generation(&fitness);
        assert_eq!(pop.genomes.len(), 10);
        assert_eq!(pop.generation, 1);
        let kept = &pop.genomes[0];
        assert_eq!(kept.conns.len(), champion.conns.len());
        for (a, b) in kept.conns.iter().zip(champion.conns.iter()) {
            assert_eq!(a.weight, b.weight);
        }
    }

    #[test]
    fn generation_runs_to_extinction() {
        // Zero weights make every net output exactly 0.5, which maps to a
        // jump each frame; all birds climb into the ceiling.
        let mut rng = SmallRng::seed_from_u64(11);
        let mut innovation = 0;
        let mut genomes: Vec<Genome> = (0..5)
            .map(|_| Genome::minimal(2, 1, &mut rng, &mut innovation))
            .collect();
        for genome in &mut genomes {
            for conn in &mut genome.conns {
                conn.weight = 0.0;
            }
        }
        let nets = genomes.iter().map(Network::new).collect();

        let mut sim = GenerationSim::new(EnvConfig::population(), nets);
        while !sim.finished() && sim.frame < 1000 {
            sim.tick().unwrap();
        }
        assert!(sim.finished());
        assert_eq!(sim.env.alive_count(), 0);
        assert!(sim.fitness.iter().all(|f| f.is_finite()));
    }
}
