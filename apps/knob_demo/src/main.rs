use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use param_sync::{
    load_settings, load_settings_from, Bridge, GestureController, GrabGestureHook, GrabManager,
    KnobConfig, LoopbackHost, ParameterStore,
};
use shared::{domain::ParamId, protocol::ParameterInfo};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Replays a vertical drag on one knob against an in-process host.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "gain")]
    param: String,
    /// Cumulative vertical pointer offsets in pixels; negative drags upward.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "-20,-60,-140,-400")]
    drag: Vec<f64>,
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn demo_parameters() -> HashMap<ParamId, ParameterInfo> {
    [
        (
            ParamId::new("bypass"),
            ParameterInfo::new(0.0, 1.0).named("Bypass"),
        ),
        (
            ParamId::new("gain"),
            ParameterInfo::new(0.0, 1.0).named("Gain").with_default(0.1),
        ),
    ]
    .into_iter()
    .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings()?,
    };
    info!(?settings, "loaded settings");

    let host = Arc::new(
        LoopbackHost::new(demo_parameters()).with_latency(Duration::from_millis(args.latency_ms)),
    );
    let (store, pump) =
        ParameterStore::connect(Arc::clone(&host) as Arc<dyn Bridge>, settings.event_capacity)?;
    tokio::time::timeout(Duration::from_secs(2), store.wait_until_ready())
        .await
        .context("host never reported every parameter")?;

    let id = ParamId::new(args.param);
    let range = store
        .registry()
        .range(&id)
        .ok_or_else(|| anyhow!("unknown parameter {id}"))?;
    let manager = GrabManager::new(
        Arc::clone(&store),
        Arc::clone(&host) as Arc<dyn Bridge>,
        settings.grab_policy,
    );
    let mut knob = GestureController::new(
        id.clone(),
        KnobConfig::from_settings(range, &settings),
        Some(Arc::new(GrabGestureHook::new(
            manager,
            id.clone(),
            tokio::runtime::Handle::current(),
        ))),
    )?;

    let displayed = store.value(&id).await.unwrap_or(range.min);
    knob.begin(displayed)?;
    for dy in &args.drag {
        if let Some(value) = knob.update(*dy)? {
            println!(
                "dy={dy:>8.1} value={value:.4} progress={:.3}",
                knob.progress(value)
            );
        }
    }
    let target = knob.working_value();
    knob.end()?;

    tokio::time::timeout(Duration::from_secs(2), async {
        while host.is_grabbed(&id) || store.value(&id).await != target {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("grab was not released")?;

    println!("{}", serde_json::to_string_pretty(&store.snapshot().await)?);
    pump.abort();
    Ok(())
}
