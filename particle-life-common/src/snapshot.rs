use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Position and type of one particle, as stored in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleSample {
    pub x: f32,
    pub y: f32,
    pub ptype: u32,
}

/// A snapshot of the simulation state and metrics at a specific step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Step number at which the snapshot was taken (0 = initial state).
    pub step: u32,
    /// Simulated time, `step * time_step`.
    pub time: f32,
    pub domain_width: f32,
    pub domain_height: f32,
    pub num_types: u32,
    pub total_particle_count: u32,
    /// Particles per type; index `num_types` collects out-of-range types.
    pub type_counts: Vec<u32>,
    pub mean_speed: f32,
    pub mean_neighbor_count: f32,
    /// `neighbor_counts_distribution[n]` = number of particles with exactly `n`
    /// neighbors inside their effective radius. The last bin also holds overflow.
    pub neighbor_counts_distribution: Vec<u32>,
    /// Present only when the run records positions. Always serialized (also as
    /// `null`) because the bincode stream is not self-describing.
    #[serde(default)]
    pub positions: Option<Vec<ParticleSample>>,
}

/// Writes snapshots as a `u32` count followed by each bincode-encoded snapshot.
pub fn write_snapshot_stream<W: Write>(mut writer: W, snapshots: &[Snapshot]) -> Result<()> {
    let count = u32::try_from(snapshots.len()).context("Too many snapshots for stream header")?;
    bincode::serialize_into(&mut writer, &count).context("Failed to write snapshot count")?;
    for (i, snapshot) in snapshots.iter().enumerate() {
        bincode::serialize_into(&mut writer, snapshot)
            .with_context(|| format!("Failed to write snapshot {}", i))?;
    }
    writer.flush().context("Failed to flush snapshot stream")?;
    Ok(())
}

/// Sequential reader over a stream produced by [`write_snapshot_stream`].
pub struct SnapshotReader<R: Read> {
    reader: R,
    remaining: u32,
    total: u32,
}

impl<R: Read> SnapshotReader<R> {
    /// Reads the stream header.
    pub fn new(mut reader: R) -> Result<Self> {
        let total: u32 = bincode::deserialize_from(&mut reader)
            .context("Failed to read snapshot count from header")?;
        Ok(Self { reader, remaining: total, total })
    }

    /// Number of snapshots announced by the header.
    pub fn len(&self) -> u32 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl<R: Read> Iterator for SnapshotReader<R> {
    type Item = Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.total - self.remaining;
        self.remaining -= 1;
        let result = bincode::deserialize_from(&mut self.reader)
            .with_context(|| format!("Failed to read snapshot {}", index));
        if result.is_err() {
            // A truncated stream cannot be resynchronised.
            self.remaining = 0;
        }
        Some(result)
    }
}
