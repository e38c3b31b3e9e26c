//! GPU-compatible particle record.
//!
//! The layout matches the storage buffer a shader-based renderer reads:
//! `pos: vec2f, vel: vec2f, acc: vec2f, ptype: u32, pad: u32`, 32 bytes per
//! particle. `acc` and `pad` are reserved and always written as zero.

use crate::cpu_state::Particle;
use particle_life_common::Vec2;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WireParticle {
    pub pos: [f32; 2],
    pub vel: [f32; 2],
    pub acc: [f32; 2],
    pub ptype: u32,
    pub pad: u32,
}

pub const WIRE_PARTICLE_SIZE: usize = std::mem::size_of::<WireParticle>();

impl From<&Particle> for WireParticle {
    fn from(p: &Particle) -> Self {
        Self {
            pos: [p.position.x, p.position.y],
            vel: [p.velocity.x, p.velocity.y],
            acc: [0.0; 2],
            ptype: p.ptype,
            pad: 0,
        }
    }
}

impl From<&WireParticle> for Particle {
    fn from(w: &WireParticle) -> Self {
        Particle::new(Vec2::new(w.pos[0], w.pos[1]), Vec2::new(w.vel[0], w.vel[1]), w.ptype)
    }
}

/// Packs particles into the renderer's byte layout (native endianness).
pub fn encode_particles(particles: &[Particle]) -> Vec<u8> {
    let records: Vec<WireParticle> = particles.iter().map(WireParticle::from).collect();
    records.as_slice().as_bytes().to_vec()
}

/// Unpacks a buffer produced by [`encode_particles`].
pub fn decode_particles(bytes: &[u8]) -> anyhow::Result<Vec<Particle>> {
    if bytes.len() % WIRE_PARTICLE_SIZE != 0 {
        anyhow::bail!(
            "Wire buffer length {} is not a multiple of the {}-byte particle record.",
            bytes.len(),
            WIRE_PARTICLE_SIZE
        );
    }
    bytes
        .chunks_exact(WIRE_PARTICLE_SIZE)
        .map(|chunk| {
            WireParticle::read_from_bytes(chunk)
                .map(|w| Particle::from(&w))
                .map_err(|e| anyhow::anyhow!("Malformed wire particle record: {:?}", e))
        })
        .collect()
}
