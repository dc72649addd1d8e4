//! The per-boot mode logic. A boot picks exactly one mode, runs it to a
//! [`RestartReason`], and the platform entry point reboots.

use std::time::Duration;

use log::{info, warn};

use countdown_common::{
    countdown::{next_wake_delay, CountdownEngine},
    BootInputs, BootMode, Configuration,
};

use crate::{
    hal::{BootSensor, ConfigStore, Display, Radio, RestartReason, TimeSync, Timer, WallClock},
    wifi::{ApNetwork, WifiConnector},
};

pub const FAILURE_RESTART_DELAY: Duration = Duration::from_secs(5);
pub const RESET_MESSAGE_DELAY: Duration = Duration::from_secs(2);

/// Reads pins and storage once and picks the boot mode. A record without
/// station credentials, or one that cannot be read at all, routes back into
/// provisioning rather than a connect loop that can never succeed.
pub fn select_boot_mode<B: BootSensor, S: ConfigStore>(sensor: &mut B, store: &mut S) -> BootMode {
    let configuration_present = match store.load() {
        Ok(Some(mut config)) => {
            config.sanitize();
            config.has_station_credentials()
        }
        Ok(None) => false,
        Err(err) => {
            warn!("configuration unreadable, treating as absent: {err:#}");
            false
        }
    };

    let autostart_disabled = store.autostart_disabled().unwrap_or_else(|err| {
        warn!("autostart marker unreadable, ignoring: {err:#}");
        false
    });

    let mode = BootMode::select(BootInputs {
        safe_mode_requested: sensor.safe_mode_requested(),
        reconfigure_requested: sensor.reconfigure_requested(),
        autostart_disabled,
        configuration_present,
    });
    info!("boot mode: {}", mode.as_str());
    mode
}

/// Safe mode does nothing but park the device: autostart off, message up,
/// reboot into a passive state for recovery over USB.
pub fn run_safe_mode_reset<D, S, T>(display: &mut D, store: &mut S, timer: &mut T) -> RestartReason
where
    D: Display,
    S: ConfigStore,
    T: Timer,
{
    if let Err(err) = store.disable_autostart() {
        warn!("failed to disable autostart: {err:#}");
    }
    if let Err(err) = display.show_lines(&["Safe mode entered.", "Rebooting now."]) {
        warn!("panel write failed: {err:#}");
    }
    timer.sleep(RESET_MESSAGE_DELAY);
    RestartReason::SafeModeRequested
}

/// Wipes the stored configuration so the next boot lands in provisioning.
/// Also the way out of recovery: the autostart marker is cleared here.
pub fn run_reconfigure_reset<D, S, T>(display: &mut D, store: &mut S, timer: &mut T) -> RestartReason
where
    D: Display,
    S: ConfigStore,
    T: Timer,
{
    if let Err(err) = store.erase() {
        warn!("failed to erase configuration: {err:#}");
    }
    if let Err(err) = store.enable_autostart() {
        warn!("failed to re-enable autostart: {err:#}");
    }
    if let Err(err) = display.show_lines(&["Settings cleared.", "Rebooting now."]) {
        warn!("panel write failed: {err:#}");
    }
    timer.sleep(RESET_MESSAGE_DELAY);
    RestartReason::Reconfigured
}

/// Brings up the setup network and puts the join instructions on the panel.
/// The platform front end then serves the form until a submission lands.
pub fn begin_provisioning<R, T, D>(
    radio: &mut R,
    timer: &mut T,
    display: &mut D,
) -> Result<ApNetwork, RestartReason>
where
    R: Radio,
    T: Timer,
    D: Display,
{
    let network = match WifiConnector::new(radio, timer).start_access_point() {
        Ok(Some(network)) => network,
        Ok(None) => {
            return Err(fail(
                display,
                timer,
                &["Setup network failed.", "Restarting..."],
                RestartReason::ApStartFailed,
            ))
        }
        Err(err) => {
            warn!("access point startup error: {err:#}");
            return Err(fail(
                display,
                timer,
                &["Setup network failed.", "Restarting..."],
                RestartReason::ApStartFailed,
            ));
        }
    };

    let url = format!("http://{}:{}", network.address, crate::provision::PROVISIONING_PORT);
    if let Err(err) = display.show_lines(&[
        &format!("Join: {}", network.ssid),
        &format!("Pass: {}", network.password),
        &url,
    ]) {
        warn!("panel write failed: {err:#}");
    }
    info!("provisioning at {url}");
    Ok(network)
}

/// The steady state: join the home network, sync the clock, then count days
/// until reboot or power loss. Never returns success; every exit is a reboot.
pub fn run_normal<D, R, T, Y, C>(
    config: &Configuration,
    display: &mut D,
    radio: &mut R,
    timer: &mut T,
    time_sync: &mut Y,
    clock: &mut C,
) -> RestartReason
where
    D: Display,
    R: Radio,
    T: Timer,
    Y: TimeSync,
    C: WallClock,
{
    let connected = WifiConnector::new(radio, timer).connect_station(&config.ssid, &config.password);
    match connected {
        Ok(Some(address)) => {
            info!("station up at {address}");
            if let Err(err) = display.show_lines(&["Connected to Wi-Fi"]) {
                warn!("panel write failed: {err:#}");
            }
        }
        Ok(None) => {
            return fail(
                display,
                timer,
                &["Wi-Fi connect failed.", "Restarting..."],
                RestartReason::WifiFailed,
            )
        }
        Err(err) => {
            warn!("station connect error: {err:#}");
            return fail(
                display,
                timer,
                &["Wi-Fi connect failed.", "Restarting..."],
                RestartReason::WifiFailed,
            );
        }
    }

    if let Err(err) = time_sync.sync() {
        warn!("time sync error: {err:#}");
        return fail(
            display,
            timer,
            &["Time sync failed.", "Restarting..."],
            RestartReason::TimeSyncFailed,
        );
    }

    let mut engine = CountdownEngine::new(config.target_date);
    loop {
        let now = clock.local_now(config.timezone);
        countdown_tick(&mut engine, now, display, &config.target_label);
        timer.sleep(next_wake_delay(now));
    }
}

/// One wake of the countdown loop. The engine memoizes, so a redundant wake
/// on the same day leaves the panel untouched.
fn countdown_tick<D: Display>(
    engine: &mut CountdownEngine,
    now: chrono::NaiveDateTime,
    display: &mut D,
    label: &str,
) {
    if let Some(frame) = engine.refresh(now) {
        info!(
            "{} days until {} ({})",
            frame.days_remaining, label, frame.target
        );
        if let Err(err) = display.show_countdown(frame.days_remaining, label) {
            warn!("panel write failed: {err:#}");
        }
    }
}

/// Failure policy: explain on the panel, hold long enough to read it, then
/// hand back the reason so the platform reboots for a clean retry.
fn fail<D: Display, T: Timer>(
    display: &mut D,
    timer: &mut T,
    lines: &[&str],
    reason: RestartReason,
) -> RestartReason {
    if let Err(err) = display.show_lines(lines) {
        warn!("panel write failed: {err:#}");
    }
    timer.sleep(FAILURE_RESTART_DELAY);
    reason
}
