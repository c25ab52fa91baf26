//! geoflow - runs the geocoder and export pipelines against in-memory
//! collaborators.

mod steps;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use geoflow_core::app::{EngineBuilder, EngineGroup, EngineLoop};
use geoflow_core::domain::{Headers, TaskList};
use geoflow_core::impls::{InMemoryChannel, InMemoryLeaderLock, StepRegistry, TracingEventSink};
use geoflow_core::observability::init_tracing;
use geoflow_core::{FlowError, GeoflowConfig};

#[derive(Parser, Debug)]
#[command(name = "geoflow")]
#[command(about = "Task-queue workflow engine for the geocoder data pipeline", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "GEOFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Pipeline(s) to run
    #[arg(short, long, value_enum, default_value_t = PipelineChoice::All)]
    pipeline: PipelineChoice,

    /// Drain the queue(s) and exit instead of running until ctrl-c
    #[arg(long)]
    once: bool,

    /// Publish a fresh run before consuming
    #[arg(long)]
    trigger: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PipelineChoice {
    Geocoder,
    Export,
    All,
}

impl PipelineChoice {
    fn names(self) -> &'static [&'static str] {
        match self {
            PipelineChoice::Geocoder => &["geocoder"],
            PipelineChoice::Export => &["export"],
            PipelineChoice::All => &["geocoder", "export"],
        }
    }
}

/// Steps, expected destinations and trigger list of a named pipeline.
fn pipeline_parts(name: &str) -> Result<(StepRegistry, Vec<&'static str>, TaskList), FlowError> {
    match name {
        "export" => Ok((
            steps::export_registry()?,
            steps::export_destinations().to_vec(),
            steps::export_trigger(),
        )),
        _ => Ok((
            steps::geocoder_registry()?,
            steps::geocoder_destinations().to_vec(),
            steps::geocoder_trigger(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<(), FlowError> {
    let args = Args::parse();

    let config = GeoflowConfig::load(args.config.as_deref())?;
    init_tracing(&config.logging, &config.environment);

    let channel = Arc::new(InMemoryChannel::new());
    let lock = Arc::new(InMemoryLeaderLock::new(config.lease_ttl()));
    let holder = format!("geoflow-{}", std::process::id());

    let mut loops = Vec::new();
    for name in args.pipeline.names() {
        let (registry, expected, trigger) = pipeline_parts(name)?;
        let engine = EngineBuilder::new()
            .pipeline(config.pipeline(name)?)
            .phase_order(config.phase_order())
            .carry_over(config.carry_over())
            .dispatcher(Arc::new(registry))
            .channel(channel.clone())
            .event_sink(Arc::new(TracingEventSink))
            .expect_destinations(expected)
            .build()?;
        let engine = Arc::new(engine);

        if args.trigger {
            let correlation_id = engine.trigger(trigger, Headers::new()).await?;
            tracing::info!(pipeline = %name, correlation_id = %correlation_id, "triggered");
        }

        loops.push(EngineLoop::new(
            engine,
            config.aggregator.settings(),
            lock.clone(),
            holder.as_str(),
            config.lease_retry(),
        ));
    }

    if args.once {
        for engine_loop in &loops {
            let report = engine_loop.drain().await?;
            tracing::info!(
                pipeline = %engine_loop.engine().settings().name,
                iterations = report.iterations,
                last = ?report.last,
                "drained"
            );
        }
        return Ok(());
    }

    let group = EngineGroup::spawn(loops);
    tracing::info!(loops = group.len(), holder = %holder, "geoflow running, ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
    group.shutdown_and_join().await;
    Ok(())
}
