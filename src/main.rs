mod a2c;
mod env;
mod neat;
mod rect;
mod render;

use crate::env::EnvConfig;
use crate::neat::{GenerationSim, MAX_GENERATION_FRAMES, Population};
use crate::render::{SnapshotSink, draw_env};
use anyhow::Result;
use pixels::{Pixels, SurfaceTexture};
use std::time::{Duration, Instant};
use winit::dpi::LogicalSize;
use winit::event::{Event, VirtualKeyCode};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;
use winit_input_helper::WinitInputHelper;

const WIDTH: u32 = 400;
const HEIGHT: u32 = 600;

const DEFAULT_EPISODES: usize = 2000;
const MAX_EPISODE_STEPS: usize = 3000;
const DEFAULT_GENERATIONS: usize = 15;
const POPULATION: usize = 10;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("a2c") => {
            let episodes = parse_count(args.get(2), DEFAULT_EPISODES)?;
            a2c::train(episodes, MAX_EPISODE_STEPS)
        }
        Some("neat") => {
            let generations = parse_count(args.get(2), DEFAULT_GENERATIONS)?;
            neat::train(generations, POPULATION)
        }
        Some("watch") | None => {
            let snapshots = args
                .iter()
                .position(|a| a == "--snapshots")
                .and_then(|i| args.get(i + 1).cloned());
            watch(snapshots)
        }
        Some(other) => {
            eprintln!("unknown mode '{other}'");
            eprintln!("usage: flappy [a2c [episodes] | neat [generations] | watch [--snapshots DIR]]");
            std::process::exit(2);
        }
    }
}

fn parse_count(arg: Option<&String>, default: usize) -> Result<usize> {
    match arg {
        None => Ok(default),
        Some(s) => Ok(s.parse()?),
    }
}

/// Runs NEAT training in a window, one simulation frame per paced redraw.
/// Generation and snapshot counters live in the session state here, nothing
/// is global.
fn watch(snapshot_dir: Option<String>) -> Result<()> {
    let event_loop = EventLoop::new();
    let mut input = WinitInputHelper::new();

    let window = WindowBuilder::new()
        .with_title("Flappy NEAT")
        .with_inner_size(LogicalSize::new(WIDTH, HEIGHT))
        .with_resizable(false)
        .build(&event_loop)?;

    let mut pixels = {
        let window_size = window.inner_size();
        let surface_texture = SurfaceTexture::new(window_size.width, window_size.height, &window);
        Pixels::new(WIDTH, HEIGHT, surface_texture)?
    };

    let cfg = EnvConfig::population();
    let mut pop = Population::new(POPULATION, 2, 1);
    let mut sim = GenerationSim::new(cfg, pop.networks());
    let mut sink = snapshot_dir.map(SnapshotSink::new).transpose()?;

    let frame_time = Duration::from_secs_f64(1.0 / cfg.frame_rate as f64);
    let mut last_tick = Instant::now();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        if let Event::RedrawRequested(_) = event {
            let frame = pixels.frame_mut();
            draw_env(frame, WIDTH, HEIGHT, &sim.env);
            if let Some(sink) = &mut sink {
                if let Err(err) = sink.write(frame, WIDTH, HEIGHT) {
                    eprintln!("snapshot write failed: {err}");
                }
            }
            if pixels.render().is_err() {
                *control_flow = ControlFlow::Exit;
            }
        }

        if input.update(&event) {
            if input.key_pressed(VirtualKeyCode::Escape)
                || input.close_requested()
                || input.destroyed()
            {
                *control_flow = ControlFlow::Exit;
                return;
            }

            // Fixed-rate pacing; without it the loop would outrun the display.
            if last_tick.elapsed() >= frame_time {
                last_tick = Instant::now();
                if sim.finished() || sim.frame >= MAX_GENERATION_FRAMES {
                    let best = sim.fitness.iter().cloned().fold(f32::MIN, f32::max);
                    println!(
                        "generation {:3}  best {:8.2}  frames {:5}  pipes {}",
                        pop.generation, best, sim.frame, sim.score
                    );
                    pop.next_generation(&sim.fitness);
                    sim = GenerationSim::new(cfg, pop.networks());
                } else if let Err(err) = sim.tick() {
                    eprintln!("simulation error: {err}");
                    *control_flow = ControlFlow::Exit;
                    return;
                }
            }

            window.request_redraw();
        }
    });
}
