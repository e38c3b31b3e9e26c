use crate::cpu_state::Particle;
use crate::wire::encode_particles;
use anyhow::{Context, Result};
use log::{error, info};
use particle_life_common::{write_snapshot_stream, Snapshot};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// On-disk encoding of the recorded snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    /// Counted bincode stream, the format the visualizer reads.
    Bincode,
    MessagePack,
}

impl SnapshotFormat {
    /// Maps the `output.format` setting; unknown names fall back to JSON.
    pub fn from_config(format: Option<&str>) -> Self {
        match format.unwrap_or("json") {
            "json" => Self::Json,
            "bincode" => Self::Bincode,
            "messagepack" => Self::MessagePack,
            other => {
                error!("Unknown output format: {}. Using JSON instead.", other);
                Self::Json
            }
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bin",
            Self::MessagePack => "msgpack",
        }
    }
}

pub fn write_snapshots<W: Write>(mut writer: W, format: SnapshotFormat, snapshots: &[Snapshot]) -> Result<()> {
    match format {
        SnapshotFormat::Json => {
            serde_json::to_writer(&mut writer, snapshots).context("Error serializing snapshots to JSON")?;
        }
        SnapshotFormat::Bincode => write_snapshot_stream(&mut writer, snapshots)?,
        SnapshotFormat::MessagePack => {
            rmp_serde::encode::write(&mut writer, snapshots).context("Error serializing snapshots to MessagePack")?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Writes `<base>_snapshots.<ext>` and returns the path.
pub fn save_snapshots(base_filename: &str, format: SnapshotFormat, snapshots: &[Snapshot]) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_snapshots.{}", base_filename, format.extension()));
    let file = File::create(&path).with_context(|| format!("Error creating snapshot file '{}'", path.display()))?;
    write_snapshots(BufWriter::new(file), format, snapshots)?;
    info!("{} snapshots saved to {} ({:?} format)", snapshots.len(), path.display(), format);
    Ok(path)
}

/// CSV with one row per particle: `x,y,vx,vy,type`.
pub fn write_final_state<W: Write>(writer: W, particles: &[Particle]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["x", "y", "vx", "vy", "type"])?;
    for p in particles {
        csv_writer.write_record(&[
            format!("{:.4}", p.position.x),
            format!("{:.4}", p.position.y),
            format!("{:.4}", p.velocity.x),
            format!("{:.4}", p.velocity.y),
            p.ptype.to_string(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn save_final_state(path: &Path, particles: &[Particle]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Error creating CSV file '{}'", path.display()))?;
    write_final_state(file, particles)?;
    info!("Final state saved to {}", path.display());
    Ok(())
}

/// Dumps the particles in the 32-byte renderer record layout.
pub fn save_wire_buffer(path: &Path, particles: &[Particle]) -> Result<()> {
    let bytes = encode_particles(particles);
    std::fs::write(path, &bytes).with_context(|| format!("Error writing wire buffer '{}'", path.display()))?;
    info!("Wire buffer saved to {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
