//! ESP32 build: real pins, radio, NVS, and SNTP behind the platform traits.

use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use chrono::{NaiveDateTime, Utc};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{
        AccessPointConfiguration, AuthMethod, ClientConfiguration,
        Configuration as WifiConfiguration,
    },
};
use esp_idf_hal::gpio::{Gpio14, Gpio15, Input, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use countdown_common::{BootMode, Configuration};

use crate::{
    controller,
    hal::{BootSensor, ConfigStore, Display, Radio, RestartReason, TimeSync, Timer, WallClock},
    provision::{ProvisioningServer, PROVISIONING_PORT, RESPONSE_FLUSH_DELAY},
};

const NVS_NAMESPACE: &str = "countdown";
const NVS_CONFIG_KEY: &str = "config_json";
const NVS_AUTOSTART_KEY: &str = "autostart_off";
const MAX_HTTP_BODY: usize = 2048;
const SNTP_SYNC_ATTEMPTS: u32 = 30;
const SNTP_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RESTART_FLUSH_DELAY: Duration = Duration::from_millis(500);

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut sensor = PinBootSensor::new(peripherals.pins.gpio14, peripherals.pins.gpio15)?;
    let mut store = NvsConfigStore::new(nvs_partition.clone());
    let mode = controller::select_boot_mode(&mut sensor, &mut store);

    let mut display = PanelDisplay;
    let mut timer = ThreadTimer;

    let reason = match mode {
        BootMode::SafeMode => {
            controller::run_safe_mode_reset(&mut display, &mut store, &mut timer)
        }
        BootMode::Reconfigure => {
            controller::run_reconfigure_reset(&mut display, &mut store, &mut timer)
        }
        BootMode::Recovery => {
            if let Err(err) = display.show_lines(&["Recovery mode.", "Reconfigure to resume."]) {
                warn!("panel write failed: {err:#}");
            }
            info!("autostart disabled; parked until reconfigure is requested");
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
        BootMode::Provision => {
            let radio = EspRadio::new(peripherals.modem, sys_loop, nvs_partition)?;
            run_provisioning(radio, store, display, timer)?
        }
        BootMode::Normal => {
            let mut config = store
                .load()?
                .context("stored configuration vanished after mode selection")?;
            config.sanitize();
            info!(
                "configuration loaded: ssid=`{}`, timezone={}, target={} `{}`",
                config.ssid, config.timezone, config.target_date, config.target_label
            );

            let mut radio = EspRadio::new(peripherals.modem, sys_loop, nvs_partition)?;
            let mut time_sync = SntpTimeSync::default();
            let mut clock = EspClock;
            controller::run_normal(
                &config,
                &mut display,
                &mut radio,
                &mut timer,
                &mut time_sync,
                &mut clock,
            )
        }
    };

    restart(reason)
}

fn restart(reason: RestartReason) -> ! {
    info!("restarting: {}", reason.as_str());
    thread::sleep(RESTART_FLUSH_DELAY);
    unsafe { esp_idf_svc::sys::esp_restart() };
    unreachable!("esp_restart returned")
}

fn run_provisioning(
    mut radio: EspRadio,
    store: NvsConfigStore,
    mut display: PanelDisplay,
    mut timer: ThreadTimer,
) -> anyhow::Result<RestartReason> {
    let network = match controller::begin_provisioning(&mut radio, &mut timer, &mut display) {
        Ok(network) => network,
        Err(reason) => return Ok(reason),
    };
    info!(
        "setup form at http://{}:{} on `{}`",
        network.address, PROVISIONING_PORT, network.ssid
    );

    let backend = Arc::new(Mutex::new(ProvisioningServer::new(store, PanelDisplay)));

    let conf = HttpConfiguration {
        http_port: PROVISIONING_PORT,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    {
        let backend = backend.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
            let page = backend.lock().unwrap().index_page();
            req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "text/html; charset=utf-8")],
            )?
            .write_all(page.as_bytes())?;
            Ok(())
        })?;
    }

    {
        let backend = backend.clone();
        server.fn_handler::<anyhow::Error, _>("/configure", Method::Post, move |mut req| {
            let len = req.content_len().unwrap_or(0) as usize;
            if len > MAX_HTTP_BODY {
                req.into_response(413, None, &[])?
                    .write_all(b"submission too large")?;
                return Ok(());
            }

            let mut body = vec![0_u8; len];
            if len > 0 {
                req.read_exact(&mut body)?;
            }
            let body = String::from_utf8_lossy(&body);

            let page = backend.lock().unwrap().handle_configure(&body)?;
            req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "text/html; charset=utf-8")],
            )?
            .write_all(page.as_bytes())?;
            Ok(())
        })?;
    }

    loop {
        thread::sleep(SERVER_POLL_INTERVAL);
        if backend.lock().unwrap().is_complete() {
            break;
        }
    }

    // Leave the connection alive long enough for the confirmation page.
    thread::sleep(RESPONSE_FLUSH_DELAY);
    drop(server);
    if let Err(err) = radio.stop() {
        warn!("radio stop failed: {err:#}");
    }
    Ok(RestartReason::Provisioned)
}

/// Boot request buttons on GPIO14 (safe mode) and GPIO15 (reconfigure),
/// active low against internal pull-ups.
struct PinBootSensor {
    safe_mode: PinDriver<'static, Gpio14, Input>,
    reconfigure: PinDriver<'static, Gpio15, Input>,
}

impl PinBootSensor {
    fn new(safe_pin: Gpio14, reconfigure_pin: Gpio15) -> anyhow::Result<Self> {
        let mut safe_mode = PinDriver::input(safe_pin)?;
        safe_mode.set_pull(Pull::Up)?;
        let mut reconfigure = PinDriver::input(reconfigure_pin)?;
        reconfigure.set_pull(Pull::Up)?;

        Ok(Self {
            safe_mode,
            reconfigure,
        })
    }
}

impl BootSensor for PinBootSensor {
    fn safe_mode_requested(&mut self) -> bool {
        self.safe_mode.is_low()
    }

    fn reconfigure_requested(&mut self) -> bool {
        self.reconfigure.is_low()
    }
}

struct NvsConfigStore {
    partition: EspDefaultNvsPartition,
}

impl NvsConfigStore {
    fn new(partition: EspDefaultNvsPartition) -> Self {
        Self { partition }
    }

    fn open(&self) -> anyhow::Result<EspNvs<esp_idf_svc::nvs::NvsDefault>> {
        Ok(EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?)
    }
}

impl ConfigStore for NvsConfigStore {
    fn load(&mut self) -> anyhow::Result<Option<Configuration>> {
        let mut nvs = self.open()?;
        let mut buffer = vec![0_u8; 1024];

        match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
            Some(value) => {
                let config = serde_json::from_str::<Configuration>(value)
                    .context("configuration record is not valid JSON")?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    fn save(&mut self, config: &Configuration) -> anyhow::Result<()> {
        let mut nvs = self.open()?;
        let payload = serde_json::to_string(config)?;
        nvs.set_str(NVS_CONFIG_KEY, &payload)?;
        Ok(())
    }

    fn erase(&mut self) -> anyhow::Result<()> {
        let mut nvs = self.open()?;
        nvs.remove(NVS_CONFIG_KEY)?;
        Ok(())
    }

    fn disable_autostart(&mut self) -> anyhow::Result<()> {
        let mut nvs = self.open()?;
        nvs.set_u8(NVS_AUTOSTART_KEY, 1)?;
        Ok(())
    }

    fn enable_autostart(&mut self) -> anyhow::Result<()> {
        let mut nvs = self.open()?;
        nvs.remove(NVS_AUTOSTART_KEY)?;
        Ok(())
    }

    fn autostart_disabled(&mut self) -> anyhow::Result<bool> {
        let nvs = self.open()?;
        Ok(nvs.get_u8(NVS_AUTOSTART_KEY)?.unwrap_or(0) == 1)
    }
}

/// Front panel. Lines go to the log until the panel driver lands; the
/// countdown rendering hooks in here.
struct PanelDisplay;

impl Display for PanelDisplay {
    fn show_lines(&mut self, lines: &[&str]) -> anyhow::Result<()> {
        for line in lines {
            info!("[panel] {line}");
        }
        Ok(())
    }

    fn show_countdown(&mut self, days_remaining: u32, label: &str) -> anyhow::Result<()> {
        info!("[panel] {label}");
        info!("[panel] {days_remaining} days");
        Ok(())
    }
}

struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl EspRadio {
    fn new(
        modem: esp_idf_svc::hal::modem::Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        let wifi = BlockingWifi::wrap(
            EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?,
            sys_loop,
        )?;
        Ok(Self { wifi })
    }
}

impl Radio for EspRadio {
    fn start_access_point(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        self.wifi
            .set_configuration(&WifiConfiguration::AccessPoint(AccessPointConfiguration {
                ssid: ssid.try_into().map_err(|_| anyhow!("AP ssid too long"))?,
                password: password
                    .try_into()
                    .map_err(|_| anyhow!("AP password too long"))?,
                auth_method: AuthMethod::WPA2Personal,
                channel: 1,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        self.wifi.wait_netif_up()?;
        Ok(())
    }

    fn access_point_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>> {
        let info = self.wifi.wifi().ap_netif().get_ip_info()?;
        Ok((!info.ip.is_unspecified()).then_some(info.ip))
    }

    fn connect_station(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&WifiConfiguration::Client(ClientConfiguration {
                ssid: ssid.try_into().map_err(|_| anyhow!("ssid too long"))?,
                password: password
                    .try_into()
                    .map_err(|_| anyhow!("password too long"))?,
                auth_method,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn station_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>> {
        let info = self.wifi.wifi().sta_netif().get_ip_info()?;
        Ok((!info.ip.is_unspecified()).then_some(info.ip))
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.wifi.stop()?;
        Ok(())
    }
}

#[derive(Default)]
struct SntpTimeSync {
    // Dropping the handle stops the periodic resync, so it lives here.
    sntp: Option<EspSntp<'static>>,
}

impl TimeSync for SntpTimeSync {
    fn sync(&mut self) -> anyhow::Result<()> {
        let sntp = EspSntp::new_default().context("failed to start SNTP")?;

        for _ in 0..SNTP_SYNC_ATTEMPTS {
            if sntp.get_sync_status() == SyncStatus::Completed {
                info!("clock synchronized");
                self.sntp = Some(sntp);
                return Ok(());
            }
            thread::sleep(SNTP_POLL_INTERVAL);
        }

        Err(anyhow!(
            "no SNTP response after {SNTP_SYNC_ATTEMPTS} seconds"
        ))
    }
}

struct EspClock;

impl WallClock for EspClock {
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
