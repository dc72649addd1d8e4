use std::{net::Ipv4Addr, time::Duration};

use log::{info, warn};
use rand::Rng;

use crate::hal::{Radio, Timer};

pub const SETUP_AP_SSID: &str = "Countdown-Setup";
pub const AP_SETTLE_DELAY: Duration = Duration::from_secs(2);
pub const ADDRESS_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const ADDRESS_POLL_ATTEMPTS: u32 = 10;

/// A running setup access point, ready to be printed on the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApNetwork {
    pub ssid: String,
    pub password: String,
    pub address: Ipv4Addr,
}

/// Eight random digits, zero-padded. Regenerated every provisioning boot so
/// the setup network is never left open behind a well-known credential.
pub fn generate_ap_password() -> String {
    format!("{:08}", rand::thread_rng().gen_range(0..100_000_000))
}

/// Drives the radio through either role, polling for an address with the
/// supplied timer so the waits stay testable.
pub struct WifiConnector<'a, R: Radio, T: Timer> {
    radio: &'a mut R,
    timer: &'a mut T,
}

impl<'a, R: Radio, T: Timer> WifiConnector<'a, R, T> {
    pub fn new(radio: &'a mut R, timer: &'a mut T) -> Self {
        Self { radio, timer }
    }

    /// Brings up the setup access point and waits for it to get an address.
    /// `Ok(None)` means the radio started but never produced one.
    pub fn start_access_point(&mut self) -> anyhow::Result<Option<ApNetwork>> {
        let password = generate_ap_password();
        self.radio.start_access_point(SETUP_AP_SSID, &password)?;
        info!("setup access point `{SETUP_AP_SSID}` starting");

        match self.poll_address(|radio| radio.access_point_address())? {
            Some(address) => {
                // The address can land before the AP accepts joins.
                self.timer.sleep(AP_SETTLE_DELAY);
                Ok(Some(ApNetwork {
                    ssid: SETUP_AP_SSID.to_string(),
                    password,
                    address,
                }))
            }
            None => {
                warn!("setup access point never obtained an address");
                Ok(None)
            }
        }
    }

    /// Joins the configured home network. `Ok(None)` means the association
    /// went through but no address arrived within the polling window.
    pub fn connect_station(&mut self, ssid: &str, password: &str) -> anyhow::Result<Option<Ipv4Addr>> {
        self.radio.connect_station(ssid, password)?;
        info!("connecting to `{ssid}`");

        let address = self.poll_address(|radio| radio.station_address())?;
        if address.is_none() {
            warn!("no address from `{ssid}` after {ADDRESS_POLL_ATTEMPTS} polls");
        }
        Ok(address)
    }

    fn poll_address(
        &mut self,
        mut getter: impl FnMut(&mut R) -> anyhow::Result<Option<Ipv4Addr>>,
    ) -> anyhow::Result<Option<Ipv4Addr>> {
        for attempt in 1..=ADDRESS_POLL_ATTEMPTS {
            if let Some(address) = getter(self.radio)? {
                info!("address {address} acquired on poll {attempt}");
                return Ok(Some(address));
            }
            if attempt < ADDRESS_POLL_ATTEMPTS {
                self.timer.sleep(ADDRESS_POLL_INTERVAL);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hal::fakes::{RecordingTimer, ScriptedRadio};

    #[test]
    fn ap_password_is_eight_digits() {
        for _ in 0..32 {
            let password = generate_ap_password();
            assert_eq!(password.len(), 8);
            assert!(password.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn access_point_reports_network_once_address_arrives() {
        let mut radio = ScriptedRadio::default();
        radio.ap_addresses.extend([None, None, Some("192.168.4.1".parse().unwrap())]);
        let mut timer = RecordingTimer::default();

        let network = WifiConnector::new(&mut radio, &mut timer)
            .start_access_point()
            .unwrap()
            .unwrap();

        assert_eq!(network.ssid, SETUP_AP_SSID);
        assert_eq!(network.address, "192.168.4.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(network.password.len(), 8);

        let (ssid, password) = &radio.ap_started[0];
        assert_eq!(ssid, SETUP_AP_SSID);
        assert_eq!(password, &network.password);

        // One poll interval per miss, then the settle delay.
        assert_eq!(
            timer.slept,
            vec![ADDRESS_POLL_INTERVAL, ADDRESS_POLL_INTERVAL, AP_SETTLE_DELAY]
        );
    }

    #[test]
    fn access_point_gives_up_after_poll_budget() {
        let mut radio = ScriptedRadio::default();
        let mut timer = RecordingTimer::default();

        let network = WifiConnector::new(&mut radio, &mut timer)
            .start_access_point()
            .unwrap();

        assert_eq!(network, None);
        assert_eq!(timer.slept.len() as u32, ADDRESS_POLL_ATTEMPTS - 1);
    }

    #[test]
    fn access_point_start_failure_propagates() {
        let mut radio = ScriptedRadio {
            fail_ap_start: true,
            ..ScriptedRadio::default()
        };
        let mut timer = RecordingTimer::default();

        let result = WifiConnector::new(&mut radio, &mut timer).start_access_point();
        assert!(result.is_err());
    }

    #[test]
    fn station_connect_passes_credentials_and_polls() {
        let mut radio = ScriptedRadio::default();
        radio.station_addresses.extend([None, Some("10.0.0.7".parse().unwrap())]);
        let mut timer = RecordingTimer::default();

        let address = WifiConnector::new(&mut radio, &mut timer)
            .connect_station("HomeNet", "hunter2")
            .unwrap();

        assert_eq!(address, Some("10.0.0.7".parse::<Ipv4Addr>().unwrap()));
        assert_eq!(
            radio.station_attempts,
            vec![("HomeNet".to_string(), "hunter2".to_string())]
        );
        assert_eq!(timer.slept, vec![ADDRESS_POLL_INTERVAL]);
    }

    #[test]
    fn station_connect_returns_none_without_address() {
        let mut radio = ScriptedRadio::default();
        let mut timer = RecordingTimer::default();

        let address = WifiConnector::new(&mut radio, &mut timer)
            .connect_station("HomeNet", "hunter2")
            .unwrap();

        assert_eq!(address, None);
        assert_eq!(timer.slept.len() as u32, ADDRESS_POLL_ATTEMPTS - 1);
    }
}
