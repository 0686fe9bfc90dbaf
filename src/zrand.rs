use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

/// The engine-wide random source used by `jmp_random` and as the
/// non-deterministic half of `jmp_seedrandom`.
pub struct ScriptRand {
    rng: Box<dyn RngCore>,
    /// set when the source replays a fixed sequence
    seed: Option<u64>,
}

impl ScriptRand {
    /// Gameplay randomness from the thread RNG.
    pub fn new_uniform() -> ScriptRand {
        ScriptRand {
            rng: Box::new(rand::thread_rng()),
            seed: None,
        }
    }

    /// A repeatable sequence, for tests and replays.
    pub fn new_predictable(seed: u64) -> ScriptRand {
        ScriptRand {
            rng: Box::new(StdRng::seed_from_u64(seed)),
            seed: Some(seed),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Uniform value in `0..limit`. A zero limit yields zero.
    pub fn random_below(&mut self, limit: u16) -> u16 {
        if limit == 0 {
            return 0;
        }
        self.rng.gen_range(0..limit)
    }
}

/// Linear-congruential generator private to seeded random jumps.
///
/// Must stay bit-exact: save games and replays depend on the branch it
/// picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomGenerator {
    a: u32,
}

impl RandomGenerator {
    const MULTIPLIER: u32 = 31415821;

    pub fn new(seed: u16) -> Self {
        RandomGenerator {
            a: (seed as u32) << 16,
        }
    }

    pub fn seed(&mut self, seed: u16) {
        self.a = (seed as u32) << 16;
    }

    pub fn next_value(&mut self) -> u16 {
        self.a = self.a.wrapping_mul(Self::MULTIPLIER).wrapping_add(1);
        (self.a >> 16) as u16
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        RandomGenerator { a: 1 }
    }
}

/// Restricted random: `restriction` values of engine randomness mixed with
/// a deterministic per-caller `id`, reduced modulo `cases`.
///
/// Returns `None` when `cases` is not positive.
pub fn restricted_random(rng: &mut ScriptRand, cases: i16, restriction: i16, id: i16) -> Option<i16> {
    if cases <= 0 {
        return None;
    }
    let noise = if restriction > 0 {
        rng.random_below(restriction as u16) as i32
    } else {
        0
    };
    let seed = noise.wrapping_add((id as i32).wrapping_mul(restriction as i32)) as u16;
    let mut generator = RandomGenerator::new(seed);
    Some((generator.next_value() as i32 % cases as i32) as i16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn lcg_is_bit_exact() {
        let mut g = RandomGenerator::new(1);
        // a = 0x0001_0000 * 31415821 + 1 (mod 2^32)
        let a = 0x0001_0000u32.wrapping_mul(31415821).wrapping_add(1);
        assert_eq!(g.next_value(), (a >> 16) as u16);
        let b = a.wrapping_mul(31415821).wrapping_add(1);
        assert_eq!(g.next_value(), (b >> 16) as u16);
    }

    #[test]
    fn reseeding_restarts_sequence() {
        let mut g = RandomGenerator::new(77);
        let first = g.next_value();
        g.next_value();
        g.seed(77);
        assert_eq!(g.next_value(), first);
    }

    #[test]
    fn restriction_of_one_is_fully_deterministic() {
        // With a restriction of one the engine RNG can only contribute zero.
        let mut r1 = ScriptRand::new_uniform();
        let mut r2 = ScriptRand::new_uniform();
        for id in [0, 5, 1234, -7] {
            assert_eq!(
                restricted_random(&mut r1, 10, 1, id),
                restricted_random(&mut r2, 10, 1, id)
            );
        }
    }

    #[test]
    fn predictable_rng_repeats() {
        let mut a = ScriptRand::new_predictable(99);
        let mut b = ScriptRand::new_predictable(99);
        for _ in 0..16 {
            assert_eq!(a.random_below(1000), b.random_below(1000));
        }
        assert_eq!(a.seed(), Some(99));
        assert_eq!(ScriptRand::new_uniform().seed(), None);
    }

    #[test]
    fn restriction_mixes_engine_noise_with_id() {
        for (restriction, id, cases) in [(3i16, -5i16, 10i16), (7, 4000, 13), (5, 0, 3)] {
            for seed in [1u64, 42, 7777] {
                let mut noise_source = ScriptRand::new_predictable(seed);
                let noise = noise_source.random_below(restriction as u16) as i32;
                let lcg_seed = (noise + id as i32 * restriction as i32) as u16;
                let expected = (RandomGenerator::new(lcg_seed).next_value() as i32 % cases as i32) as i16;

                let mut rng = ScriptRand::new_predictable(seed);
                assert_eq!(
                    restricted_random(&mut rng, cases, restriction, id),
                    Some(expected),
                    "restriction {restriction}, id {id}, seed {seed}"
                );
            }
        }
    }

    #[test]
    fn zero_cases_is_rejected() {
        let mut r = ScriptRand::new_predictable(1);
        assert_eq!(restricted_random(&mut r, 0, 4, 1), None);
    }
}
