use clap::Parser;
use porty::{
    actors::{
        pipeline::{PipelineHandle, PipelineSettings},
        subscriber::SubscriberHandle,
    },
    alert_log::AlertLog,
    config::{Config, read_config_file},
    queue::IngestQueue,
    storage::{Persister, open_backend},
};
use tracing::{debug, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("porty", LevelFilter::TRACE),
        ("porty_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let pipeline = start_pipeline(&config).await?;
    let subscriber = SubscriberHandle::spawn(config.broker.clone(), pipeline.sender);

    tokio::spawn(report_status(pipeline.handle.clone(), subscriber.clone()));

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");

    subscriber.shutdown().await;
    pipeline.handle.shutdown().await;

    if let Some(stats) = pipeline.handle.stats().await {
        debug!("final stats: {stats:?}");
    }

    Ok(())
}

struct RunningPipeline {
    handle: PipelineHandle,
    sender: porty::queue::IngestSender,
}

async fn start_pipeline(config: &Config) -> anyhow::Result<RunningPipeline> {
    let backend = open_backend(&config.storage).await?;
    let persister = Persister::new(backend, config.persistence);
    let alert_log = AlertLog::new(&config.alert_log.path);

    let (sender, queue) = IngestQueue::new();
    let handle = PipelineHandle::spawn(
        PipelineSettings::from_config(config),
        queue,
        persister,
        alert_log,
    );

    Ok(RunningPipeline { handle, sender })
}

/// Log connection changes and new alerts as they are published
#[instrument(skip_all)]
async fn report_status(pipeline: PipelineHandle, subscriber: SubscriberHandle) {
    let mut snapshots = pipeline.subscribe();
    let mut states = subscriber.subscribe_state();
    let mut last_alert = None;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    warn!("broker subscriber stopped");
                    break;
                }
                info!("broker state: {}", *states.borrow_and_update());
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(latest) = snapshot.latest() {
                    trace!(
                        "latest reading: no2 {:.3} ppm, oxygen {:.1}%, flame {}",
                        latest.no2, latest.oxygen, latest.flame
                    );
                }
                if snapshot.last_alert != last_alert {
                    last_alert = snapshot.last_alert.clone();
                    debug!(
                        "{} alert(s) raised so far, window holds {} reading(s)",
                        snapshot.stats.alerts, snapshot.stats.window_len
                    );
                }
            }
        }
    }
}
