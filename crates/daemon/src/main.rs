#![forbid(unsafe_code)]

//! Robot service daemon: HTTP API, telemetry subscriber, GC and metrics.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use robot_service::config::{pose_target, ServiceConfig, StorageConfig, TelemetryConfig};
use robot_service::gc::spawn_gc;
use robot_service::inference::HttpInferenceClient;
use robot_service::registry::TaskRegistry;
use robot_service::service::RobotService;
use robot_service::snapshot::{
    HttpCameraClient, MemorySnapshotStore, S3SnapshotStore, SnapshotBridge, SnapshotStore,
};
use robot_service::telemetry::{Backoff, TelemetrySource, ZmqTelemetrySource};
use robot_service::waiters::PoseWaiters;
use robot_service::{http, metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    S3,
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "robot-service")]
struct Args {
    /// API listen address.
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    listen: SocketAddr,

    /// Prometheus scrape listen address.
    #[arg(long, env = "METRICS_LISTEN", default_value = "0.0.0.0:9001")]
    metrics_listen: SocketAddr,

    /// Actuator host serving the inference and camera endpoints.
    #[arg(long, env = "PHOS_URL", default_value = "http://phosphobot")]
    phos_url: String,

    #[arg(long, env = "MODEL_ID")]
    model_id: String,

    /// Target joint vector as a JSON array.
    #[arg(long, env = "TARGET_POSE", default_value = "[0,0,0,0,0,0]")]
    target_pose: String,

    /// Componentwise convergence tolerance.
    #[arg(long, env = "TOL", default_value_t = 0.03)]
    tol: f64,

    #[arg(long, env = "TELEMETRY_ENDPOINT", default_value = "tcp://phosphobot:5555")]
    telemetry_endpoint: String,

    #[arg(long, env = "TELEMETRY_TOPIC", default_value = "state")]
    telemetry_topic: String,

    #[arg(long, env = "STORAGE", value_enum, default_value_t = StorageKind::S3)]
    storage: StorageKind,

    #[arg(long, env = "BUCKET", default_value = "snapshots")]
    bucket: String,

    /// Custom S3 endpoint, e.g. http://minio:9000.
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    s3_region: String,

    #[arg(long, default_value_t = 60)]
    inference_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    camera_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    pose_wait_secs: u64,

    #[arg(long, default_value_t = 86_400)]
    snapshot_url_ttl_secs: u64,

    #[arg(long, default_value_t = 300)]
    gc_interval_secs: u64,

    /// Tasks older than this are evicted regardless of status.
    #[arg(long, default_value_t = 3600)]
    retention_secs: u64,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

impl Args {
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let target = pose_target(&self.target_pose, self.tol)?;
        let mut config = ServiceConfig::new(&self.phos_url, &self.model_id, target);
        config.inference_timeout = Duration::from_secs(self.inference_timeout_secs);
        config.camera_timeout = Duration::from_secs(self.camera_timeout_secs);
        config.pose_wait_timeout = Duration::from_secs(self.pose_wait_secs);
        config.snapshot_url_ttl = Duration::from_secs(self.snapshot_url_ttl_secs);
        config.gc_interval = Duration::from_secs(self.gc_interval_secs);
        config.retention = Duration::from_secs(self.retention_secs);
        Ok(config)
    }

    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            bucket: self.bucket.clone(),
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
        }
    }

    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            endpoint: self.telemetry_endpoint.clone(),
            topic: self.telemetry_topic.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.service_config()?;
    tracing::info!(
        target_pose = ?config.pose_target.joints(),
        tolerance = config.pose_target.tolerance(),
        "pose target loaded"
    );

    // Metrics scrape endpoint on its own port.
    let prometheus = metrics::init_metrics()?;
    let metrics_listener = tokio::net::TcpListener::bind(args.metrics_listen)
        .await
        .with_context(|| format!("bind metrics listener {}", args.metrics_listen))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics::router(prometheus)).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    let http_client = reqwest::Client::builder()
        .build()
        .context("build HTTP client")?;
    let inference = Arc::new(HttpInferenceClient::new(
        http_client.clone(),
        &config.phos_url,
        config.inference_timeout,
    ));
    let camera = Arc::new(HttpCameraClient::new(
        http_client,
        &config.phos_url,
        config.camera_timeout,
    ));
    let store: Arc<dyn SnapshotStore> = match args.storage {
        StorageKind::S3 => Arc::new(S3SnapshotStore::new(&args.storage_config())?),
        StorageKind::Memory => {
            tracing::warn!("using in-memory snapshot storage; URLs are not retrievable");
            Arc::new(MemorySnapshotStore::new())
        }
    };
    let snapshots = SnapshotBridge::new(camera, store, config.snapshot_url_ttl);

    let svc = Arc::new(RobotService::new(
        config,
        Arc::new(TaskRegistry::new()),
        PoseWaiters::new(),
        inference,
        snapshots,
    ));

    // Telemetry subscriber: reconnects on its own, never exits.
    let telemetry = args.telemetry_config();
    let source: Arc<dyn TelemetrySource> =
        Arc::new(ZmqTelemetrySource::new(telemetry.endpoint, telemetry.topic));
    svc.telemetry_subscriber().spawn(source, Backoff::default());

    spawn_gc(Arc::clone(&svc));

    let app = http::router(svc);

    tracing::info!(listen = %args.listen, metrics = %args.metrics_listen, "robot service starting");
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind API listener {}", args.listen))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("robot service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
