use anyhow::{Context, Result};
use log::{debug, error, info, trace};
use particle_life::export::{save_final_state, save_snapshots, save_wire_buffer, SnapshotFormat};
use particle_life::CpuSimulation;
use particle_life_common::SimulationConfig;
use std::path::PathBuf;
use std::time::Instant;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Particle Life Engine (CPU)...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = SimulationConfig::load(&config_path)?;

    // --- Configure Rayon Thread Pool (Optional) ---
    if let Some(threads) = config.execution.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure the rayon thread pool")?;
    }
    info!("Using {} Rayon threads ({:?} mode).", rayon::current_num_threads(), config.execution.mode);

    // --- Initialize Simulation ---
    let mut sim = CpuSimulation::new(config)?;
    info!("State initialized with {} particles.", sim.current_particle_count());
    debug!("Simulation Parameters: {:#?}", sim.params());

    // --- Simulation Loop ---
    let total_steps = sim.config().timing.total_steps;
    let record_interval_steps = sim.config().timing.record_interval_steps;
    let dt = sim.params().time_step;
    let recording = sim.config().output.save_snapshots;
    info!("Starting simulation loop for {} steps (dt = {}).", total_steps, dt);

    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    if recording {
        info!("Recording initial snapshot (step 0)...");
        sim.record_snapshot().context("Failed to record initial snapshot")?;
    }

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        if let Err(e) = sim.step() {
            error!("Error during simulation step {}: {}", step + 1, e);
            anyhow::bail!("Simulation step failed.");
        }
        let step_duration = step_start_time.elapsed();

        let now = Instant::now();
        let should_print_status = now.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step + 1 == total_steps;

        if should_print_status || is_record_step || is_last_step {
            info!(
                "Step [{}/{}] (t = {:.3}) | Particles: {} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                (step + 1) as f32 * dt,
                sim.current_particle_count(),
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = now;

            if recording && (is_record_step || is_last_step) {
                sim.record_snapshot()
                    .with_context(|| format!("Failed to record snapshot at step {}", step + 1))?;
            }
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds ({:.1} steps/s).",
        total_duration.as_secs_f64(),
        total_steps as f64 / total_duration.as_secs_f64().max(1e-9)
    );

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    if output.save_snapshots {
        let format = SnapshotFormat::from_config(output.format.as_deref());
        save_snapshots(&output.base_filename, format, sim.get_recorded_snapshots())?;
    } else {
        info!("Skipping saving snapshots as per config (save_snapshots is false).");
    }

    let particles = sim.particles();
    if output.save_final_state {
        save_final_state(&PathBuf::from(format!("{}_final_state.csv", output.base_filename)), &particles)?;
    } else {
        info!("Skipping saving final state as per config.");
    }
    if output.save_wire_buffer {
        save_wire_buffer(&PathBuf::from(format!("{}_particles.wire", output.base_filename)), &particles)?;
    }

    info!("Simulation Complete.");
    Ok(())
}
