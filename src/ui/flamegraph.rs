//! Renders CPU-sample-mode folded-stack lines to a flame graph SVG, or
//! writes them back out in plain collapsed-stack form. The folded lines
//! themselves come from [`crate::sampler::CpuSampler::folded_lines`]; this
//! module only renders them.

use std::io::Write;

use anyhow::Result;
use inferno::flamegraph::{Direction, Options};

pub struct Stats {
    lines: Vec<String>,
}

impl Stats {
    pub fn new(lines: Vec<String>) -> Self {
        Stats { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn write_flamegraph<W: Write>(&self, w: W, min_width: f64) -> Result<()> {
        if self.is_empty() {
            eprintln!("Warning: no CPU samples were collected");
            return Ok(());
        }
        let mut opts = Options::default();
        opts.direction = Direction::Inverted;
        opts.hash = true;
        opts.min_width = min_width;
        inferno::flamegraph::from_lines(&mut opts, self.lines.iter().map(|x| x.as_str()), w)?;
        Ok(())
    }

    pub fn write_collapsed<W: Write>(&self, w: &mut W) -> Result<()> {
        if self.is_empty() {
            eprintln!("Warning: no CPU samples were collected");
            return Ok(());
        }
        for line in &self.lines {
            writeln!(w, "{}", line)?;
        }
        Ok(())
    }
}
