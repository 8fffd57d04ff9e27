use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{MultiProgress, ProgressBar};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use media_curator::cli::Args;
use media_curator::config_file::CurationConfig;
use media_curator::curation::{PipelineEvent, Stage, StageStatus};
use media_curator::pipeline::Pipeline;
use media_curator::utils::create_progress_bar;
use media_curator::{json_output, report, EventSink};

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<CurationConfig> {
    let base = match &args.config {
        Some(path) => CurationConfig::load(path)
            .with_context(|| format!("Cannot use config file {}", path.display()))?,
        None => CurationConfig::default(),
    };
    let config = base.merge_with_cli(&args.overrides());
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    StopAfterStage,
    Exit,
}

/// The first Ctrl-C lets the current stage finish; any later one exits
fn interrupt_action(received: usize) -> InterruptAction {
    if received <= 1 {
        InterruptAction::StopAfterStage
    } else {
        InterruptAction::Exit
    }
}

/// Set `cancel` on the first Ctrl-C and exit with 130 on the second. The
/// listener runs on its own current-thread runtime so the pipeline itself
/// stays synchronous.
fn install_interrupt_handler(cancel: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                let mut received = 0;
                while tokio::signal::ctrl_c().await.is_ok() {
                    received += 1;
                    match interrupt_action(received) {
                        InterruptAction::StopAfterStage => {
                            warn!("Interrupt received, stopping after the current stage (Ctrl-C again to exit now)");
                            cancel.store(true, Ordering::SeqCst);
                        }
                        InterruptAction::Exit => {
                            warn!("Second interrupt received, exiting");
                            std::process::exit(130);
                        }
                    }
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Draw one progress bar per stage until the pipeline drops its sender
fn render_progress(events: Receiver<PipelineEvent>) {
    let multi = MultiProgress::new();
    let mut bars: HashMap<Stage, ProgressBar> = HashMap::new();

    for event in events {
        match event {
            PipelineEvent::StageStarted { stage, total } => {
                let pb = multi.add(create_progress_bar(total as u64));
                pb.set_message(stage.label());
                bars.insert(stage, pb);
            }
            PipelineEvent::StageProgress {
                stage,
                current,
                total,
            } => {
                if let Some(pb) = bars.get(&stage) {
                    pb.set_length(total as u64);
                    pb.set_position(current as u64);
                }
            }
            PipelineEvent::StageFinished {
                stage,
                status,
                errors,
            } => {
                let pb = bars
                    .remove(&stage)
                    .unwrap_or_else(|| multi.add(create_progress_bar(0)));
                let message = match status {
                    StageStatus::Completed if errors == 0 => format!("✓ {}", stage.label()),
                    StageStatus::Completed => {
                        format!("✓ {} ({} errors)", stage.label(), errors)
                    }
                    StageStatus::Skipped => format!("- {} (skipped)", stage.label()),
                    StageStatus::Failed => format!("✗ {} (failed)", stage.label()),
                };
                pb.finish_with_message(message);
            }
            PipelineEvent::Summary { .. } => {}
        }
    }
}

fn forward_json(events: Receiver<PipelineEvent>) {
    for event in events {
        json_output::emit_event(&event);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) if args.json_progress => {
            json_output::emit_error(&format!("{:#}", e));
            std::process::exit(2);
        }
        Err(e) => return Err(e),
    };

    if args.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    if !args.json_progress {
        println!("{}", style("Media Curator").bold().blue());
        println!(
            "{}",
            style(format!(
                "{} -> {}",
                config.directories.raw.display(),
                config.directories.final_dataset.display()
            ))
            .dim()
        );
        println!();
    }

    info!(
        "Using {} extraction workers, dedup threshold {}",
        config.effective_jobs(),
        config.dedup.threshold
    );

    let (sink, receiver) = EventSink::channel();
    let json_progress = args.json_progress;
    let renderer = thread::spawn(move || {
        if json_progress {
            forward_json(receiver);
        } else {
            render_progress(receiver);
        }
    });

    let mut pipeline = Pipeline::new(config).with_events(sink);
    if let Some(stage) = args.only {
        pipeline = pipeline.only(stage);
    }
    install_interrupt_handler(pipeline.cancel_flag())?;

    let outcome = pipeline.run();
    // dropping the pipeline closes the event channel and ends the renderer
    drop(pipeline);
    if renderer.join().is_err() {
        warn!("Progress renderer panicked");
    }

    match outcome {
        Ok(summary) => {
            if !json_progress {
                report::print_summary(&summary);
            }
            Ok(())
        }
        Err(failure) => {
            if json_progress {
                json_output::emit_error(&failure.to_string());
            } else {
                report::print_summary(&failure.summary);
                eprintln!();
                eprintln!("{} {}", style("Error:").red().bold(), failure);
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_interrupt_exits() {
        assert_eq!(interrupt_action(1), InterruptAction::StopAfterStage);
        assert_eq!(interrupt_action(2), InterruptAction::Exit);
        assert_eq!(interrupt_action(3), InterruptAction::Exit);
    }
}
