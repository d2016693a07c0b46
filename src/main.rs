use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use dronebot::android::AdbClient;
use dronebot::bot::{SessionLog, SupportBot};
use dronebot::calibration;
use dronebot::{BotConfig, TemplateClassifier};

#[derive(Parser)]
#[command(name = "dronebot", about = "Screen-state driven War Drone automation")]
struct Cli {
    /// Path to the json5 config file.
    #[arg(long, global = true, default_value = "config.json5")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the support-farming bot loop against a connected device.
    Run {
        /// adb device serial; omit when only one device is connected.
        #[arg(long)]
        serial: Option<String>,
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
        /// Stop after this many minutes.
        #[arg(long)]
        minutes: Option<u64>,
        /// Disable edge preprocessing for this run.
        #[arg(long)]
        no_edges: bool,
        /// Ignore template masks for this run.
        #[arg(long)]
        no_mask: bool,
    },
    /// Classify a screenshot file and print the full score table as JSON.
    Classify {
        /// Screenshot to classify.
        image: PathBuf,
    },
    /// Score a labeled dataset and suggest a detection threshold.
    Calibrate {
        /// Dataset root: one directory per state plus optional negatives/.
        dataset: PathBuf,
        /// Where to write the per-sample CSV.
        #[arg(long, default_value = "calibration.csv")]
        out: PathBuf,
        /// Separation margin used by the threshold suggestion.
        #[arg(long, default_value_t = 0.05)]
        margin: f32,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut cfg = BotConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match cli.command {
        Command::Run {
            serial,
            once,
            minutes,
            no_edges,
            no_mask,
        } => {
            if no_edges {
                cfg.detector.use_edges = false;
            }
            if no_mask {
                cfg.detector.use_mask = false;
            }
            let classifier = TemplateClassifier::new(&cfg)?;
            let session = SessionLog::create("runs")?;
            log::info!("session directory: {}", session.dir().display());
            let bot = SupportBot::new(AdbClient::new(serial), classifier, cfg, session);

            if once {
                bot.launch_game()?;
                bot.run_one_cycle()?;
            } else {
                let duration = minutes.map(|m| Duration::from_secs(m * 60));
                let cycles = bot.run(duration)?;
                log::info!("completed {cycles} cycle(s)");
            }
        }
        Command::Classify { image } => {
            let classifier = TemplateClassifier::new(&cfg)?;
            let frame = image::open(&image)
                .with_context(|| format!("loading {}", image.display()))?
                .to_rgb8();
            let result = classifier.classify(&frame);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Calibrate {
            dataset,
            out,
            margin,
        } => {
            let classifier = TemplateClassifier::new(&cfg)?;
            let report = calibration::score_dataset(&classifier, &dataset, margin)?;
            calibration::write_csv(&report, &out)?;

            for summary in &report.summaries {
                println!(
                    "{:12} n={:3} min={:.3} p15={:.3} max={:.3} misclassified={} suggest={:.3}",
                    summary.state.as_str(),
                    summary.samples,
                    summary.min,
                    summary.p15,
                    summary.max,
                    summary.misclassified,
                    summary.suggested,
                );
            }
            println!("negative max: {:.3}", report.negative_max);
            println!("suggested threshold: {:.3}", report.suggested_threshold);
            println!("per-sample scores written to {}", out.display());
        }
    }

    Ok(())
}
