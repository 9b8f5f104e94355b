//! Seeds and seed derivation. A world has exactly one root seed. Every
//! randomized process derives its own seed from that root by hashing a label
//! (and, for per-chunk/per-region processes, the coordinates). Two stages
//! never share a seed, so tweaking one stage can't perturb another.

use derive_more::Display;
use fnv::FnvHasher;
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    convert::TryInto,
    fmt,
    hash::{Hash, Hasher},
};

/// Root seed for a world.
///
/// When deserializing, this type supports a few options:
/// - If the value is an integer that fits into `u64`, use that value
/// - If it's a string that can be parsed into a `u64`, use the parsed value
/// - If it's any other string, just keep the string
/// - If it's anything else (out of range number, float, array, etc.), error
///
/// Text seeds are hashed into a `u64` when used. Regardless of the input
/// form, seeds are always serialized as a **string**, because JSON and TOML
/// can't reliably hold a full 64-bit unsigned integer.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Seed {
    /// An integer seed, which can be used directly
    Int(u64),
    /// A textual string, which will be hashed into a u64 before use
    Text(String),
}

impl Seed {
    /// Convert the seed to a `u64`, so it can actually be used
    pub fn to_u64(&self) -> u64 {
        match self {
            Self::Int(seed) => *seed,
            Self::Text(text) => {
                let mut hasher = FnvHasher::default();
                text.hash(&mut hasher);
                hasher.finish()
            }
        }
    }
}

impl Default for Seed {
    fn default() -> Self {
        // Danger! This means the default will vary between calls!
        Self::Int(rand::random())
    }
}

impl From<u64> for Seed {
    fn from(seed: u64) -> Self {
        Self::Int(seed)
    }
}

// If possible, parse it as an int. Otherwise, store the raw text to be hashed
// later
impl From<&str> for Seed {
    fn from(seed_str: &str) -> Self {
        match seed_str.parse::<u64>() {
            Ok(seed) => Self::Int(seed),
            Err(_) => Self::Text(seed_str.into()),
        }
    }
}

impl Serialize for Seed {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        // Ints and strings are both accepted, so no type hint
        deserializer.deserialize_any(SeedVisitor)
    }
}

macro_rules! impl_visit {
    ($fname:ident, $type:ty) => {
        fn $fname<E>(self, value: $type) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            value
                .try_into()
                .map(Seed::Int)
                .map_err(|_| E::custom(format!("u64 out of range: {}", value)))
        }
    };
}

struct SeedVisitor;

impl<'de> Visitor<'de> for SeedVisitor {
    type Value = Seed;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a positive integer or string")
    }

    impl_visit!(visit_u8, u8);
    impl_visit!(visit_u16, u16);
    impl_visit!(visit_u32, u32);
    impl_visit!(visit_u64, u64);
    impl_visit!(visit_i8, i8);
    impl_visit!(visit_i16, i16);
    impl_visit!(visit_i32, i32);
    impl_visit!(visit_i64, i64);

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(value.into())
    }
}

/// Derive a 32-bit seed from the world seed and a stage label, e.g.
/// `"climate.humidity"`. This is a pure hash; the same inputs always give the
/// same output.
pub fn derive_tag(world_seed: u64, tag: &str) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(&world_seed.to_le_bytes());
    hasher.write(tag.as_bytes());
    fold(hasher.finish())
}

/// Derive a 32-bit seed from the world seed, a stage label, and a pair of
/// grid coordinates (chunk or region).
pub fn derive_keyed(world_seed: u64, tag: &str, x: i32, z: i32) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(&world_seed.to_le_bytes());
    hasher.write(tag.as_bytes());
    // Separator keeps "a" + 12 from colliding with "a1" + 2
    hasher.write_u8(0xff);
    hasher.write(&x.to_le_bytes());
    hasher.write(&z.to_le_bytes());
    fold(hasher.finish())
}

/// Derive a sub-seed from an existing seed, e.g. one per noise octave or per
/// pipeline step.
pub fn mix(seed: u32, salt: u32) -> u32 {
    fold(splitmix64(((seed as u64) << 32) | salt as u64))
}

/// Hash a seed and a pair of integer lattice coordinates into a `u64`. Used
/// to place cellular-noise feature points, where we need a pseudo-random
/// value for every lattice cell without any state.
pub fn hash_cell(seed: u32, x: i64, z: i64) -> u64 {
    let mut h = splitmix64(seed as u64 ^ 0x9e37_79b9_7f4a_7c15);
    h = splitmix64(h ^ x as u64);
    splitmix64(h ^ (z as u64).rotate_left(32))
}

/// Map a hash to a float in `[0, 1)`
pub fn hash_to_unit(hash: u64) -> f64 {
    // Top 53 bits fill an f64 mantissa exactly
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn fold(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}

/// One independent seed per generation stage. Each field is hashed from a
/// different label, so they're statistically independent even though they
/// all come from the same root.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSeeds {
    pub elevation: u32,
    pub hydrology: u32,
    pub climate: u32,
    pub obstacles: u32,
}

impl StageSeeds {
    /// Seeds for a single chunk
    pub fn for_chunk(world_seed: u64, cx: i32, cz: i32) -> Self {
        Self::derive("chunk", world_seed, cx, cz)
    }

    /// Seeds for a whole region. Region-scale random processes (droplets,
    /// lakes, walkers) draw from these.
    pub fn for_region(world_seed: u64, rx: i32, rz: i32) -> Self {
        Self::derive("region", world_seed, rx, rz)
    }

    /// World-wide seeds, identical for every region. Anything sampled by
    /// world coordinates (noise fields) must use these, otherwise
    /// neighboring regions won't line up.
    pub fn for_world(world_seed: u64) -> Self {
        let seed = |stage: &str| {
            derive_tag(world_seed, &format!("world.{}", stage))
        };
        Self {
            elevation: seed("elevation"),
            hydrology: seed("hydrology"),
            climate: seed("climate"),
            obstacles: seed("obstacles"),
        }
    }

    fn derive(scope: &str, world_seed: u64, x: i32, z: i32) -> Self {
        let seed = |stage: &str| {
            derive_keyed(world_seed, &format!("{}.{}", scope, stage), x, z)
        };
        Self {
            elevation: seed("elevation"),
            hydrology: seed("hydrology"),
            climate: seed("climate"),
            obstacles: seed("obstacles"),
        }
    }

    /// Seeds as `(label, seed)` pairs, in a fixed order. Used for metadata
    /// output.
    pub fn labeled(&self) -> [(&'static str, u32); 4] {
        [
            ("elevation", self.elevation),
            ("hydrology", self.hydrology),
            ("climate", self.climate),
            ("obstacles", self.obstacles),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{
        assert_de_tokens, assert_de_tokens_error, assert_ser_tokens, Token,
    };
    use std::collections::HashSet;

    #[test]
    fn test_from_str() {
        assert_eq!(Seed::from("0"), Seed::Int(0));
        assert_eq!(
            Seed::from("12506774975058000"),
            Seed::Int(12506774975058000)
        );
        assert_eq!(Seed::from("-1"), Seed::Text("-1".into()));
        assert_eq!(Seed::from("potato"), Seed::Text("potato".into()));
    }

    #[test]
    fn test_to_u64() {
        assert_eq!(Seed::Int(12506774975058000).to_u64(), 12506774975058000);
        assert_eq!(Seed::Text("-1".into()).to_u64(), 16020590405669718844);
        assert_eq!(Seed::Text("potato".into()).to_u64(), 6265489318014208823);
    }

    #[test]
    fn test_serde() {
        assert_ser_tokens(&Seed::Int(0), &[Token::String("0")]);
        assert_ser_tokens(&Seed::Text("ash".into()), &[Token::String("ash")]);
        assert_de_tokens(&Seed::Int(17), &[Token::U64(17)]);
        assert_de_tokens(&Seed::Int(17), &[Token::String("17")]);
        assert_de_tokens_error::<Seed>(
            &[Token::I32(-1)],
            "u64 out of range: -1",
        );
        assert_de_tokens_error::<Seed>(
            &[Token::Bool(false)],
            "invalid type: boolean `false`, \
            expected a positive integer or string",
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(
            derive_tag(42, "climate.humidity"),
            derive_tag(42, "climate.humidity")
        );
        assert_eq!(
            StageSeeds::for_chunk(42, -3, 7),
            StageSeeds::for_chunk(42, -3, 7)
        );
    }

    #[test]
    fn test_derive_varies_with_inputs() {
        assert_ne!(
            derive_tag(42, "climate.humidity"),
            derive_tag(42, "climate.temperature")
        );
        assert_ne!(derive_tag(42, "elevation"), derive_tag(43, "elevation"));
        assert_ne!(
            StageSeeds::for_chunk(42, 1, 0),
            StageSeeds::for_chunk(42, 0, 1)
        );
        // Chunk and region seeds live in separate namespaces
        assert_ne!(
            StageSeeds::for_chunk(42, 0, 0),
            StageSeeds::for_region(42, 0, 0)
        );
        assert_ne!(
            StageSeeds::for_world(42).elevation,
            StageSeeds::for_region(42, 0, 0).elevation
        );
        assert_eq!(StageSeeds::for_world(42), StageSeeds::for_world(42));
    }

    /// The four stage seeds for a chunk should all be distinct, across a
    /// decent spread of chunks
    #[test]
    fn test_stage_seeds_independent() {
        for cx in -8..8 {
            for cz in -8..8 {
                let seeds = StageSeeds::for_chunk(1234, cx, cz);
                let unique: HashSet<u32> =
                    seeds.labeled().iter().map(|(_, s)| *s).collect();
                assert_eq!(unique.len(), 4, "colliding seeds: {:?}", seeds);
            }
        }
    }

    #[test]
    fn test_hash_to_unit_range() {
        for i in 0..1000 {
            let v = hash_to_unit(hash_cell(9, i, -i));
            assert!((0.0..1.0).contains(&v));
        }
    }
}
