//! Instruction-count-driven sampling collector. The host fires the count
//! hook every `N` VM instructions; this spaces actual samples out across
//! those ticks by a geometrically-distributed gap so a tight loop doesn't
//! get sampled at a fixed, resonance-prone stride.

use crate::core::StrMap;

/// A small, dependency-free xorshift64 generator. The profiler only needs
/// a fast, seedable stream of bits for gap scheduling, not a
/// cryptographic or statistically rigorous RNG.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Xorshift64 {
            state: if seed == 0 { 0x9e3779b97f4a7c15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// A uniform draw in `(0, 1]`, built from the top 53 bits so it maps
    /// cleanly onto an `f64`'s mantissa.
    fn next_unit(&mut self) -> f64 {
        let bits = self.next_u64() >> 11;
        ((bits + 1) as f64) / ((1u64 << 53) as f64)
    }
}

pub struct CpuSampler {
    rng: Xorshift64,
    sample_period: u64,
    countdown: u64,
    folded: StrMap,
    total_samples: u64,
}

impl CpuSampler {
    pub fn new(sample_period: u64, seed: u64) -> Self {
        let sample_period = sample_period.max(1);
        let mut rng = Xorshift64::new(seed);
        let countdown = Self::draw_gap(&mut rng, sample_period);
        CpuSampler {
            rng,
            sample_period,
            countdown,
            folded: StrMap::new(),
            total_samples: 0,
        }
    }

    fn draw_gap(rng: &mut Xorshift64, sample_period: u64) -> u64 {
        let u = rng.next_unit();
        let gap = (-(u.ln()) * sample_period as f64).floor();
        if gap < 1.0 {
            1
        } else {
            gap as u64
        }
    }

    /// Advances the countdown by `instructions`, firing `stack_key` (built
    /// lazily, since most ticks fire no sample at all) once per gap
    /// crossed. Returns how many samples fired this tick.
    pub fn on_count(&mut self, instructions: u64, stack_key: impl Fn() -> String) -> u32 {
        let mut remaining = instructions;
        let mut fired = 0u32;

        while remaining >= self.countdown {
            remaining -= self.countdown;
            self.folded.increment(&stack_key());
            self.total_samples += 1;
            fired += 1;
            let period = self.sample_period;
            self.countdown = Self::draw_gap(&mut self.rng, period);
        }
        self.countdown -= remaining;
        fired
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Folded-stack lines in `"<root>;...;<leaf> <count>"` form, one per
    /// distinct path sampled.
    pub fn folded_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.folded.len());
        self.folded.iterate(|key, count| {
            lines.push(format!("{} {}", key, count));
        });
        lines.sort();
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_is_always_at_least_one() {
        let mut rng = Xorshift64::new(42);
        for _ in 0..10_000 {
            let gap = CpuSampler::draw_gap(&mut rng, 1000);
            assert!(gap >= 1);
        }
    }

    #[test]
    fn large_instruction_batches_can_fire_multiple_samples() {
        let mut sampler = CpuSampler::new(10, 1);
        let fired = sampler.on_count(1_000_000, || "root;leaf".to_string());
        assert!(fired > 1);
        assert_eq!(sampler.total_samples(), fired as u64);
    }

    #[test]
    fn folded_lines_accumulate_counts_per_distinct_path() {
        let mut sampler = CpuSampler::new(1, 7);
        for _ in 0..50 {
            sampler.on_count(1, || "root;a".to_string());
        }
        let lines = sampler.folded_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("root;a "));
    }
}
