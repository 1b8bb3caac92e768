use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use fungi_scan_lib::disease_info::DiseaseInfo;
use fungi_scan_lib::ml::dataset::validate_dataset;
use fungi_scan_lib::model::{describe_metadata, load_metadata, AppConfig, ClassifierBackend};
use fungi_scan_lib::{AppContext, DatasetError, DiseaseInfoStore};

#[derive(Parser)]
#[command(name = "fungi_scan", version, about = "Fungal skin condition image classifier")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = AppConfig::DEFAULT_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify an image and show the ranked results
    Classify {
        image: PathBuf,
        /// Use the synthetic classifier instead of the trained model
        #[arg(long)]
        mock: bool,
    },
    /// Show disease information (all records when no label is given)
    Info { label: Option<String> },
    /// Check that a dataset directory is usable for training
    Validate { data_dir: PathBuf },
    /// Train a model and export the package
    #[cfg(feature = "ml")]
    Train {
        data_dir: PathBuf,
        /// Output package path (.tar.gz)
        output: PathBuf,
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Show the metadata stored in a model package
    Inspect { model: PathBuf },
    /// Write the effective configuration to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fungi_scan_lib::init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(&cli.config);

    match cli.command {
        Command::Classify { image, mock } => {
            if mock {
                config.classifier.backend = ClassifierBackend::Mock;
            }
            classify(&config, image).await
        }
        Command::Info { label } => {
            show_info(&config, label.as_deref());
            Ok(())
        }
        Command::Validate { data_dir } => validate(&data_dir),
        #[cfg(feature = "ml")]
        Command::Train {
            data_dir,
            output,
            epochs,
        } => {
            if let Some(epochs) = epochs {
                config.training.num_epochs = epochs;
            }
            train(&config, data_dir, output).await
        }
        Command::Inspect { model } => {
            let metadata = load_metadata(&model)?;
            println!("{}", describe_metadata(&metadata));
            Ok(())
        }
        Command::InitConfig { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", cli.config.display());
            }
            config.save(&cli.config)?;
            println!("Config written: {}", cli.config.display());
            Ok(())
        }
    }
}

async fn classify(config: &AppConfig, image: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&image)
        .await
        .with_context(|| format!("failed to read image: {}", image.display()))?;

    let context = AppContext::from_config(config);
    context.classifier.initialize().await?;
    let report = context.analyze(bytes).await?;
    context.classifier.dispose().await?;

    println!("Result: {} ({})", report.display_name, report.top_label);
    for result in &report.results {
        println!("  {:<20} {:>6.2}%", result.label, result.confidence * 100.0);
    }
    if let Some(info) = &report.info {
        println!();
        print_info(info);
    }
    Ok(())
}

fn show_info(config: &AppConfig, label: Option<&str>) {
    let store = DiseaseInfoStore::from_path_or_bundled(config.disease_info_path.as_deref().map(Path::new));

    match label {
        Some(label) => match store.get_info(label) {
            Some(info) => print_info(info),
            None => println!("No information for '{}'", label),
        },
        None => {
            for label in store.labels() {
                if let Some(info) = store.get_info(label) {
                    println!("[{}]", label);
                    print_info(info);
                    println!();
                }
            }
        }
    }
}

fn print_info(info: &DiseaseInfo) {
    println!("{}", info.name);
    if !info.description.is_empty() {
        println!("{}", info.description);
    }
    if let Some(severity) = &info.severity {
        println!("Severity: {}", severity);
    }
    print_list("Symptoms", &info.symptoms);
    print_list("Causes", &info.causes);
    print_list("Treatment", &info.treatment);
    print_list("When to see a doctor", &info.when_to_see_doctor);
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{}:", title);
    for item in items {
        println!("  - {}", item);
    }
}

fn validate(data_dir: &Path) -> Result<()> {
    match validate_dataset(data_dir) {
        Ok(stats) => {
            println!("Dataset OK: {} classes, {} images", stats.num_classes(), stats.total_images());
            for (class, count) in &stats.class_counts {
                println!("  {:<20} {:>5}", class, count);
            }
            Ok(())
        }
        Err(DatasetError::Insufficient(problems)) => {
            for problem in &problems {
                println!("  - {}", problem);
            }
            anyhow::bail!("dataset is not ready for training ({} problems)", problems.len())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(feature = "ml")]
async fn train(config: &AppConfig, data_dir: PathBuf, output_path: PathBuf) -> Result<()> {
    use fungi_scan_lib::ml::{train_model, TrainingOptions};

    let options = TrainingOptions {
        data_dir,
        output_path,
        device_type: config.device_type,
        image_size: config.classifier.input_size,
        settings: config.training.clone(),
    };

    let report = tokio::task::spawn_blocking(move || train_model(&options)).await??;

    println!("Model saved: {}", report.package_path.display());
    println!("Labels saved: {}", report.labels_path.display());
    println!(
        "Samples: {} train / {} validation",
        report.num_train, report.num_validation
    );
    if let Some(accuracy) = report.validation_accuracy {
        println!("Validation accuracy: {:.2}%", accuracy * 100.0);
    }
    Ok(())
}
