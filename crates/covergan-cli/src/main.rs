//! CoverGAN CLI - progressive GAN training on album cover art.

use std::path::{Component, Path, PathBuf};

use clap::{Parser, Subcommand};
use covergan_core::{Architecture, CoverGanConfig, TrainingPhase};
use covergan_data::{CoverDataset, CoverLoader};
use covergan_models::{AnyGenerator, ProgressiveGenerator, Topology};
use covergan_trainer::{
    conditioning_sweep, interpolation_latents, load_module_arrays, save_strip, CheckpointManager,
    CompositeCallback, ImageSink, JsonlMetricSink, LoggingCallback, ProgressCallback,
    ProgressiveTrainer,
};

#[derive(Parser)]
#[command(name = "covergan")]
#[command(author, version, about = "Progressive GAN training on album cover art", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a generator through every burn-in and fade-in phase
    Train {
        /// Path to training configuration file (YAML or JSON)
        #[arg(short, long)]
        config: String,

        /// Output directory, overrides the configuration
        #[arg(short, long)]
        output: Option<String>,

        /// Resume from the latest checkpoint in the output directory
        #[arg(long)]
        resume: bool,
    },

    /// Sample an interpolation strip from a checkpoint
    Generate {
        /// Checkpoint directory (a `step_N` directory or a checkpoints root)
        #[arg(short, long)]
        checkpoint: String,

        /// Output PNG path
        #[arg(short, long, default_value = "strip.png")]
        out: String,

        /// Seed for the latent endpoints and per-pixel noise
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Number of images in the strip
        #[arg(short = 'n', long, default_value = "8")]
        count: usize,

        /// Upsample each image to this size
        #[arg(long)]
        size: Option<i32>,
    },

    /// Write a sample configuration file
    InitConfig {
        /// Output path for the configuration
        #[arg(short, long, default_value = "covergan.yaml")]
        output: String,
    },

    /// Print the block topology and channel schedule of a configuration
    Inspect {
        /// Path to configuration file (YAML or JSON)
        #[arg(short, long)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            output,
            resume,
        } => {
            run_training(&config, output, resume).await?;
        }

        Commands::Generate {
            checkpoint,
            out,
            seed,
            count,
            size,
        } => {
            let validated_out = validate_output_path(&out, "strip output")?;
            run_generation(Path::new(&checkpoint), &validated_out, seed, count, size)?;
        }

        Commands::InitConfig { output } => {
            let validated_output = validate_output_path(&output, "config output")?;
            generate_sample_config(&validated_output)?;
        }

        Commands::Inspect { config } => {
            let config = CoverGanConfig::from_file(&config)?;
            print!("{}", describe_config(&config)?);
        }
    }

    Ok(())
}

/// Run progressive training from a configuration file.
async fn run_training(config_path: &str, output: Option<String>, resume: bool) -> anyhow::Result<()> {
    let mut config = CoverGanConfig::from_file(config_path)?;
    if let Some(output) = output {
        config.output_dir = validate_output_path(&output, "output directory")?;
    }
    config.validate()?;

    println!("========================================");
    println!("  CoverGAN Progressive Training");
    println!("========================================");
    println!("Architecture:  {:?}", config.model.architecture);
    println!("Resolution:    {}", config.model.max_resolution());
    println!("Conditional:   {}", config.model.conditional);
    println!("Metadata:      {}", config.dataset.metadata_path.display());
    println!("Output:        {}", config.output_dir.display());
    println!("Batch Size:    {}", config.training.batch_size);
    println!("n_critic:      {}", config.training.n_critic);
    println!("LR:            {}", config.training.learning_rate);
    println!("Burn-in:       {} steps", config.training.burn_in_steps);
    println!("Fade-in:       {} steps", config.training.fade_in_steps);
    println!("========================================\n");

    let dataset = CoverDataset::from_metadata(&config.dataset, config.model.conditional)?;
    if let Some(scaler) = dataset.scaler() {
        tracing::info!(mean = scaler.mean, scale = scaler.scale, "Fitted release-year scaler");
    }
    let mut loader = CoverLoader::new(
        Box::new(dataset),
        config.training.batch_size,
        config.dataset.shuffle,
        config.training.seed,
    )?;

    let output_dir = config.output_dir.clone();
    let checkpoints = CheckpointManager::new(output_dir.join("checkpoints"))?
        .with_max_checkpoints(config.training.max_checkpoints);
    let images = ImageSink::new(
        output_dir.join("images"),
        config.model.noise_size(),
        config.model.conditional,
        8,
        config.model.max_resolution(),
        config.training.seed,
    )?;
    let config_json = serde_json::to_value(&config)?;
    let log_every = config.training.log_every;

    let mut trainer = ProgressiveTrainer::from_config(config)?
        .with_checkpoints(checkpoints)
        .with_image_sink(images);

    let metrics_path = output_dir.join("metrics.jsonl");
    let metrics = if resume && trainer.resume_latest()? {
        loader.reset(trainer.config().training.seed.wrapping_add(trainer.step() as u64));
        JsonlMetricSink::append(&metrics_path)?
    } else {
        if resume {
            tracing::warn!("No checkpoint found, starting from scratch");
        }
        JsonlMetricSink::new(&metrics_path)?.with_config(config_json)
    };

    let remaining = trainer.total_steps().saturating_sub(trainer.step());
    let mut callbacks = CompositeCallback::new();
    callbacks.add(Box::new(ProgressCallback::new(remaining)));
    callbacks.add(Box::new(LoggingCallback::new(log_every)));
    callbacks.add(Box::new(metrics.with_run_name("covergan")));

    trainer.run(&mut loader, &mut callbacks)?;

    println!("\nTraining complete!");
    println!("  Steps:         {}", trainer.step());
    println!("  Images shown:  {}", trainer.images_shown());
    println!("  Checkpoints:   {}", output_dir.join("checkpoints").display());
    println!("  Metrics:       {}", metrics_path.display());

    Ok(())
}

/// Load a generator from a checkpoint and write an interpolation strip.
fn run_generation(
    checkpoint: &Path,
    out: &Path,
    seed: u64,
    count: usize,
    size: Option<i32>,
) -> anyhow::Result<()> {
    let checkpoint_dir = if checkpoint.join("metadata.json").exists() {
        checkpoint.to_path_buf()
    } else {
        CheckpointManager::new(checkpoint)?
            .latest_path()?
            .ok_or_else(|| anyhow::anyhow!("no checkpoint found in {}", checkpoint.display()))?
    };
    let (state, metadata) = CheckpointManager::load_checkpoint(&checkpoint_dir)?;

    let config_json = metadata
        .config
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("checkpoint metadata carries no configuration"))?;
    let config: CoverGanConfig = serde_json::from_str(config_json)?;

    let mut generator = AnyGenerator::from_config(&config.model, config.training.seed)?;
    load_module_arrays(&mut generator, &state.generator)?;
    generator.load_buffers(&state.buffers)?;
    generator.set_training(false);

    let latents = interpolation_latents(generator.noise_size(), count, seed)?;
    let conditioning = config.model.conditional.then(|| conditioning_sweep(count));
    let target_size = size.unwrap_or_else(|| config.model.max_resolution());
    let images = ImageSink::generate(
        &generator,
        &latents,
        conditioning.as_ref(),
        metadata.block,
        metadata.alpha,
        Some(seed),
        target_size,
    )?;
    save_strip(&images, out)?;

    tracing::info!(
        step = metadata.step,
        phase = %metadata.phase,
        block = metadata.block,
        alpha = metadata.alpha,
        "Sampled generator"
    );
    println!("Strip of {} images written to: {}", count, out.display());
    Ok(())
}

fn generate_sample_config(output: &Path) -> anyhow::Result<()> {
    let mut config = CoverGanConfig::default();
    config.model.architecture = Architecture::StyleGan;
    config.dataset.metadata_path = PathBuf::from("./data/albums.jsonl");
    config.dataset.image_root = Some(PathBuf::from("./data/covers"));

    let yaml = serde_yaml::to_string(&config)?;
    std::fs::write(output, yaml)?;

    println!("Sample configuration written to: {}", output.display());
    println!("\nYou can edit this file and run training with:");
    println!("  covergan train --config {}", output.display());

    Ok(())
}

/// Human readable block topology, channel schedule and phase plan.
fn describe_config(config: &CoverGanConfig) -> anyhow::Result<String> {
    config.validate()?;
    let topology = Topology::from_config(&config.model)?;
    let training = &config.training;
    let target = training.target_block(&config.model);

    let mut out = String::new();
    out.push_str(&format!(
        "Architecture: {:?}  latent: {}  conditional: {}\n",
        config.model.architecture, topology.latent_size, topology.conditional
    ));
    out.push_str("\nBlock  Resolution  In -> Out (generator)  Batch\n");
    for block in &topology.blocks {
        out.push_str(&format!(
            "{:>5}  {:>10}  {:>6} -> {:<13}  {:>5}\n",
            block.index,
            format!("{0}x{0}", block.resolution),
            block.in_channels,
            block.out_channels,
            training.batch_size_for(block.resolution),
        ));
    }

    out.push_str("\nPhases\n");
    let mut total = 0;
    for phase in TrainingPhase::sequence(target) {
        let steps = match phase {
            TrainingPhase::FadeIn { .. } => training.fade_in_steps,
            TrainingPhase::BurnIn { .. } => training.burn_in_steps,
        };
        total += steps;
        out.push_str(&format!("  {:<14} {:>8} steps\n", phase.to_string(), steps));
    }
    out.push_str(&format!("  {:<14} {:>8} steps\n", "total", total));
    Ok(out)
}

/// Validate and canonicalize an output path.
///
/// Rejects `..` components and creates missing parent directories.
fn validate_output_path(path: &str, context: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(path);

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        anyhow::bail!(
            "Path traversal detected in {}: '{}' contains '..' component",
            context,
            path.display()
        );
    }

    let resolved = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()?.join(path)
    };

    if let Some(parent) = resolved.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    Ok(resolved)
}
