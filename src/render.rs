use crate::env::FlappyEnv;
use crate::rect::Rect;
use std::fs;
use std::io;
use std::path::PathBuf;

const SKY: [u8; 4] = [110, 190, 235, 255];
const FLOOR: [u8; 4] = [215, 190, 125, 255];
const PIPE: [u8; 4] = [70, 180, 75, 255];
const PIPE_RIM: [u8; 4] = [45, 130, 55, 255];
const BIRD: [u8; 4] = [245, 210, 70, 255];

/// Draws the whole scene into the pixels RGBA frame.
pub fn draw_env(frame: &mut [u8], width: u32, height: u32, env: &FlappyEnv) {
    clear_rgba(frame, SKY);

    for pipe in &env.pipes {
        draw_pipe(frame, width, height, &pipe.bottom_rect());
        draw_pipe(frame, width, height, &pipe.top_rect());
    }

    let ground = env.cfg.ground_y() as i32;
    fill_rect(frame, width, height, 0, ground, width as i32, height as i32 - ground, FLOOR);

    for bird in env.birds.iter().filter(|b| b.alive) {
        fill_rect_f(frame, width, height, &bird.rect, BIRD);
    }
}

fn draw_pipe(frame: &mut [u8], width: u32, height: u32, rect: &Rect) {
    fill_rect_f(frame, width, height, rect, PIPE);
    // 2px rim so the pipes read as columns, not flat bars
    fill_rect(
        frame,
        width,
        height,
        rect.left() as i32,
        rect.top() as i32,
        2,
        rect.h as i32,
        PIPE_RIM,
    );
    fill_rect(
        frame,
        width,
        height,
        rect.right() as i32 - 2,
        rect.top() as i32,
        2,
        rect.h as i32,
        PIPE_RIM,
    );
}

fn clear_rgba(frame: &mut [u8], color: [u8; 4]) {
    for px in frame.chunks_exact_mut(4) {
        px.copy_from_slice(&color);
    }
}

fn fill_rect_f(frame: &mut [u8], fw: u32, fh: u32, rect: &Rect, color: [u8; 4]) {
    fill_rect(
        frame,
        fw,
        fh,
        rect.left() as i32,
        rect.top() as i32,
        rect.w as i32,
        rect.h as i32,
        color,
    );
}

// Signed coordinates; pipes live partly off-screen, so everything is clipped.
fn fill_rect(frame: &mut [u8], fw: u32, fh: u32, x: i32, y: i32, w: i32, h: i32, color: [u8; 4]) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w).min(fw as i32);
    let y1 = (y + h).min(fh as i32);
    for py in y0..y1 {
        for px in x0..x1 {
            let idx = ((py as u32 * fw + px as u32) * 4) as usize;
            frame[idx..idx + 4].copy_from_slice(&color);
        }
    }
}

/// Writes each frame as a sequentially numbered binary PPM. Nothing is ever
/// cleaned up; a long session fills the directory.
pub struct SnapshotSink {
    dir: PathBuf,
    counter: usize,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, counter: 0 })
    }

    pub fn write(&mut self, frame: &[u8], width: u32, height: u32) -> io::Result<()> {
        let path = self.dir.join(format!("{}.ppm", self.counter));
        self.counter += 1;

        let mut buf = format!("P6\n{width} {height}\n255\n").into_bytes();
        buf.reserve(frame.len() / 4 * 3);
        for px in frame.chunks_exact(4) {
            buf.extend_from_slice(&px[..3]);
        }
        fs::write(path, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvConfig;

    #[test]
    fn draw_env_touches_only_its_buffer() {
        let env = FlappyEnv::seeded(EnvConfig::population(), 3, 1);
        let mut frame = vec![0u8; 400 * 600 * 4];
        draw_env(&mut frame, 400, 600, &env);
        // Sky everywhere above the pipes' reach on the far left column.
        assert_eq!(&frame[..4], &SKY);
    }

    #[test]
    fn clipping_handles_offscreen_rects() {
        let mut frame = vec![0u8; 16 * 16 * 4];
        fill_rect(&mut frame, 16, 16, -5, -5, 100, 100, BIRD);
        assert_eq!(&frame[..4], &BIRD);
        fill_rect(&mut frame, 16, 16, 50, 50, 10, 10, PIPE); // fully outside
    }
}
