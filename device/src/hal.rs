//! Platform seams. Each boot wires one concrete implementation per trait and
//! hands owned handles down to the mode logic; nothing here is global.

use std::{net::Ipv4Addr, time::Duration};

use chrono::NaiveDateTime;
use countdown_common::Configuration;

/// Why the firmware is asking for a restart. Logged right before the reboot
/// so a serial capture explains every reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    SafeModeRequested,
    Reconfigured,
    Provisioned,
    ApStartFailed,
    WifiFailed,
    TimeSyncFailed,
}

impl RestartReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafeModeRequested => "safe mode requested",
            Self::Reconfigured => "configuration cleared",
            Self::Provisioned => "new configuration saved",
            Self::ApStartFailed => "setup access point failed to start",
            Self::WifiFailed => "station connection failed",
            Self::TimeSyncFailed => "clock synchronization failed",
        }
    }
}

/// The front panel. Writes are infrequent; implementations may be as slow as
/// an e-paper refresh.
pub trait Display {
    fn show_lines(&mut self, lines: &[&str]) -> anyhow::Result<()>;
    fn show_countdown(&mut self, days_remaining: u32, label: &str) -> anyhow::Result<()>;
}

/// The two boot-time request pins, read exactly once per boot.
pub trait BootSensor {
    fn safe_mode_requested(&mut self) -> bool;
    fn reconfigure_requested(&mut self) -> bool;
}

/// Persistent configuration record plus the autostart marker. A set marker
/// parks the next boot in recovery; reconfigure and a provisioning save
/// clear it.
pub trait ConfigStore {
    fn load(&mut self) -> anyhow::Result<Option<Configuration>>;
    fn save(&mut self, config: &Configuration) -> anyhow::Result<()>;
    fn erase(&mut self) -> anyhow::Result<()>;
    fn disable_autostart(&mut self) -> anyhow::Result<()>;
    fn enable_autostart(&mut self) -> anyhow::Result<()>;
    fn autostart_disabled(&mut self) -> anyhow::Result<bool>;
}

/// The radio in either role. Address getters return `None` until the
/// interface has an address; callers poll.
pub trait Radio {
    fn start_access_point(&mut self, ssid: &str, password: &str) -> anyhow::Result<()>;
    fn access_point_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>>;
    fn connect_station(&mut self, ssid: &str, password: &str) -> anyhow::Result<()>;
    fn station_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>>;
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// One-shot clock synchronization after the station link is up.
pub trait TimeSync {
    fn sync(&mut self) -> anyhow::Result<()>;
}

/// Local wall time at the configured fixed UTC offset.
pub trait WallClock {
    fn local_now(&mut self, utc_offset_hours: i32) -> NaiveDateTime;
}

pub trait Timer {
    fn sleep(&mut self, duration: Duration);
}

#[cfg(test)]
pub mod fakes {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeDisplay {
        pub lines: Vec<Vec<String>>,
        pub frames: Vec<(u32, String)>,
    }

    impl Display for FakeDisplay {
        fn show_lines(&mut self, lines: &[&str]) -> anyhow::Result<()> {
            self.lines
                .push(lines.iter().map(|line| line.to_string()).collect());
            Ok(())
        }

        fn show_countdown(&mut self, days_remaining: u32, label: &str) -> anyhow::Result<()> {
            self.frames.push((days_remaining, label.to_string()));
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakePins {
        pub safe_mode: bool,
        pub reconfigure: bool,
    }

    impl BootSensor for FakePins {
        fn safe_mode_requested(&mut self) -> bool {
            self.safe_mode
        }

        fn reconfigure_requested(&mut self) -> bool {
            self.reconfigure
        }
    }

    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub config: Option<Configuration>,
        pub fail_load: bool,
        pub erased: bool,
        pub autostart_disabled: bool,
    }

    impl ConfigStore for MemoryStore {
        fn load(&mut self) -> anyhow::Result<Option<Configuration>> {
            if self.fail_load {
                anyhow::bail!("storage read error");
            }
            Ok(self.config.clone())
        }

        fn save(&mut self, config: &Configuration) -> anyhow::Result<()> {
            self.config = Some(config.clone());
            Ok(())
        }

        fn erase(&mut self) -> anyhow::Result<()> {
            self.config = None;
            self.erased = true;
            Ok(())
        }

        fn disable_autostart(&mut self) -> anyhow::Result<()> {
            self.autostart_disabled = true;
            Ok(())
        }

        fn enable_autostart(&mut self) -> anyhow::Result<()> {
            self.autostart_disabled = false;
            Ok(())
        }

        fn autostart_disabled(&mut self) -> anyhow::Result<bool> {
            Ok(self.autostart_disabled)
        }
    }

    /// Address polls are scripted: each getter call pops the next entry, and
    /// an exhausted queue keeps answering `None`.
    #[derive(Debug, Default)]
    pub struct ScriptedRadio {
        pub fail_ap_start: bool,
        pub fail_station_connect: bool,
        pub ap_started: Vec<(String, String)>,
        pub ap_addresses: VecDeque<Option<Ipv4Addr>>,
        pub station_attempts: Vec<(String, String)>,
        pub station_addresses: VecDeque<Option<Ipv4Addr>>,
        pub stopped: bool,
    }

    impl Radio for ScriptedRadio {
        fn start_access_point(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
            if self.fail_ap_start {
                anyhow::bail!("radio refused access point mode");
            }
            self.ap_started.push((ssid.to_string(), password.to_string()));
            Ok(())
        }

        fn access_point_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>> {
            Ok(self.ap_addresses.pop_front().flatten())
        }

        fn connect_station(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
            if self.fail_station_connect {
                anyhow::bail!("association failed");
            }
            self.station_attempts
                .push((ssid.to_string(), password.to_string()));
            Ok(())
        }

        fn station_address(&mut self) -> anyhow::Result<Option<Ipv4Addr>> {
            Ok(self.station_addresses.pop_front().flatten())
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            self.stopped = true;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeTimeSync {
        pub fail: bool,
        pub calls: u32,
    }

    impl TimeSync for FakeTimeSync {
        fn sync(&mut self) -> anyhow::Result<()> {
            self.calls += 1;
            if self.fail {
                anyhow::bail!("no response from time server");
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    pub struct FixedClock {
        pub now: NaiveDateTime,
    }

    impl WallClock for FixedClock {
        fn local_now(&mut self, _utc_offset_hours: i32) -> NaiveDateTime {
            self.now
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingTimer {
        pub slept: Vec<Duration>,
    }

    impl Timer for RecordingTimer {
        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
        }
    }
}
