//! Host build: the appliance logic running against a simulated panel and
//! radio, with the configuration record on the local filesystem.

use std::{
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    thread,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Router,
};
use chrono::{Datelike, NaiveDateTime, Utc};
use std::sync::Arc;
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};
use tracing::{info, warn};

use countdown_common::{BootMode, Configuration};

use crate::{
    controller,
    hal::{BootSensor, ConfigStore, Display, Radio, RestartReason, TimeSync, Timer, WallClock},
    provision::{ProvisioningServer, PROVISIONING_PORT, RESPONSE_FLUSH_DELAY},
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut sensor = EnvBootSensor;
    let mut store = FsConfigStore::new();
    let mode = controller::select_boot_mode(&mut sensor, &mut store);

    let reason = match mode {
        BootMode::SafeMode => {
            controller::run_safe_mode_reset(&mut ConsoleDisplay, &mut store, &mut ThreadTimer)
        }
        BootMode::Reconfigure => {
            controller::run_reconfigure_reset(&mut ConsoleDisplay, &mut store, &mut ThreadTimer)
        }
        BootMode::Recovery => {
            if let Err(err) =
                ConsoleDisplay.show_lines(&["Recovery mode.", "Reconfigure to resume."])
            {
                warn!("panel write failed: {err:#}");
            }
            info!("autostart disabled; parked until reconfigure is requested");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
        BootMode::Provision => run_provisioning(store).await?,
        BootMode::Normal => {
            let mut config = store
                .load()?
                .context("stored configuration vanished after mode selection")?;
            config.sanitize();
            info!(
                "configuration loaded: ssid=`{}`, timezone={}, target={} `{}`",
                config.ssid, config.timezone, config.target_date, config.target_label
            );
            run_normal_blocking(config).await?
        }
    };

    request_restart(reason)
}

/// The countdown loop sleeps across midnights; run it on a blocking thread
/// instead of parking a runtime worker.
async fn run_normal_blocking(config: Configuration) -> anyhow::Result<RestartReason> {
    let reason = tokio::task::spawn_blocking(move || {
        let mut display = ConsoleDisplay;
        let mut radio = SimRadio::from_env();
        let mut timer = ThreadTimer;
        let mut time_sync = HostTimeSync;
        let mut clock = SystemClock;
        controller::run_normal(
            &config,
            &mut display,
            &mut radio,
            &mut timer,
            &mut time_sync,
            &mut clock,
        )
    })
    .await?;
    Ok(reason)
}

#[derive(Clone)]
struct AppState {
    server: Arc<Mutex<ProvisioningServer<FsConfigStore, ConsoleDisplay>>>,
    done: Arc<Notify>,
}

async fn run_provisioning(store: FsConfigStore) -> anyhow::Result<RestartReason> {
    let mut radio = SimRadio::from_env();
    let mut timer = ThreadTimer;
    let mut display = ConsoleDisplay;

    let network = match controller::begin_provisioning(&mut radio, &mut timer, &mut display) {
        Ok(network) => network,
        Err(reason) => return Ok(reason),
    };

    let state = AppState {
        server: Arc::new(Mutex::new(ProvisioningServer::new(store, ConsoleDisplay))),
        done: Arc::new(Notify::new()),
    };

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/configure", post(handle_configure))
        .with_state(state.clone());

    let port = std::env::var("COUNTDOWN_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(PROVISIONING_PORT);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind setup server at {addr}"))?;

    info!(
        "setup form at http://{}:{port} (join `{}`)",
        network.address, network.ssid
    );

    let done = state.done.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { done.notified().await })
        .await?;

    if let Err(err) = radio.stop() {
        warn!("radio stop failed: {err:#}");
    }
    Ok(RestartReason::Provisioned)
}

async fn handle_index(State(state): State<AppState>) -> Html<String> {
    Html(state.server.lock().await.index_page())
}

async fn handle_configure(State(state): State<AppState>, body: String) -> axum::response::Response {
    match state.server.lock().await.handle_configure(&body) {
        Ok(page) => {
            // Let the confirmation page flush before the shutdown notify.
            let done = state.done.clone();
            tokio::spawn(async move {
                tokio::time::sleep(RESPONSE_FLUSH_DELAY).await;
                done.notify_one();
            });
            Html(page).into_response()
        }
        Err(err) => {
            warn!("failed to store submission: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to store settings").into_response()
        }
    }
}

fn request_restart(reason: RestartReason) -> ! {
    info!("restart requested: {}", reason.as_str());
    std::process::exit(0)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Boot pins become environment variables on the host.
struct EnvBootSensor;

impl BootSensor for EnvBootSensor {
    fn safe_mode_requested(&mut self) -> bool {
        env_flag("COUNTDOWN_SAFE_MODE")
    }

    fn reconfigure_requested(&mut self) -> bool {
        env_flag("COUNTDOWN_RECONFIGURE")
    }
}

struct FsConfigStore {
    config_path: PathBuf,
    autostart_marker: PathBuf,
}

impl FsConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("COUNTDOWN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.countdown"));

        Self {
            config_path: data_dir.join("config.json"),
            autostart_marker: data_dir.join("autostart_off"),
        }
    }
}

impl ConfigStore for FsConfigStore {
    fn load(&mut self) -> anyhow::Result<Option<Configuration>> {
        match std::fs::read(&self.config_path) {
            Ok(raw) => {
                let config = serde_json::from_slice::<Configuration>(&raw)
                    .context("configuration record is not valid JSON")?;
                Ok(Some(config))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, config: &Configuration) -> anyhow::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(config)?;
        std::fs::write(&self.config_path, payload)?;
        Ok(())
    }

    fn erase(&mut self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.config_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn disable_autostart(&mut self) -> anyhow::Result<()> {
        if let Some(parent) = self.autostart_marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.autostart_marker, b"1")?;
        Ok(())
    }

    fn enable_autostart(&mut self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.autostart_marker) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn autostart_disabled(&mut self) -> anyhow::Result<bool> {
        Ok(self.autostart_marker.exists())
    }
}

/// The front panel is stdout on the host.
struct ConsoleDisplay;

impl Display for ConsoleDisplay {
    fn show_lines(&mut self, lines: &[&str]) -> anyhow::Result<()> {
        for line in lines {
            println!("[panel] {line}");
        }
        Ok(())
    }

    fn show_countdown(&mut self, days_remaining: u32, label: &str) -> anyhow::Result<()> {
        println!("[panel] {label}");
        println!("[panel] {days_remaining} days");
        Ok(())
    }
}

/// Simulated radio. COUNTDOWN_SIM_WIFI_DOWN=1 withholds addresses so the
/// failure paths can be exercised end to end.
struct SimRadio {
    down: bool,
}

impl SimRadio {
    fn from_env() -> Self {
        Self {
            down: env_flag("COUNTDOWN_SIM_WIFI_DOWN"),
        }
    }
}

impl Radio for SimRadio {
    fn start_access_point(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        info!("simulated access point `{ssid}` (password `{password}`)");
        Ok(())
    }

    fn access_point_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>> {
        if self.down {
            return Ok(None);
        }
        Ok(Some(Ipv4Addr::new(192, 168, 4, 1)))
    }

    fn connect_station(&mut self, ssid: &str, _password: &str) -> anyhow::Result<()> {
        info!("simulated station join of `{ssid}`");
        Ok(())
    }

    fn station_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>> {
        if self.down {
            return Ok(None);
        }
        Ok(Some(Ipv4Addr::LOCALHOST))
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The host trusts the system clock; it only has to look plausible.
struct HostTimeSync;

impl TimeSync for HostTimeSync {
    fn sync(&mut self) -> anyhow::Result<()> {
        let year = Utc::now().year();
        if year < 2020 {
            anyhow::bail!("system clock is unset (year {year})");
        }
        Ok(())
    }
}

struct SystemClock;

impl WallClock for SystemClock {
    fn local_now(&mut self, utc_offset_hours: i32) -> NaiveDateTime {
        Utc::now().naive_utc() + chrono::Duration::hours(i64::from(utc_offset_hours))
    }
}

struct ThreadTimer;

impl Timer for ThreadTimer {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}
