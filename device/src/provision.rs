use std::time::Duration;

use log::{info, warn};

use countdown_common::{config, ProvisioningSubmission};

use crate::hal::{ConfigStore, Display};

pub const PROVISIONING_PORT: u16 = 8080;
/// Grace period after the confirmation page is handed to the HTTP stack so
/// the bytes reach the browser before the restart tears the radio down.
pub const RESPONSE_FLUSH_DELAY: Duration = Duration::from_secs(2);

const SETUP_SAVED_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Countdown Setup</title>
</head>
<body>
  <h1>Saved</h1>
  <p>Settings stored. The device is restarting and will join your network.</p>
</body>
</html>
"#;

fn setup_form_page() -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Countdown Setup</title>
  <style>
    body{{font-family:Arial,sans-serif;max-width:480px;margin:2rem auto;padding:0 1rem;color:#111}}
    h1{{margin:0 0 .5rem}}.card{{border:1px solid #ddd;border-radius:8px;padding:1rem}}
    label{{display:block;margin:.5rem 0 .2rem}}input{{width:100%;padding:.5rem;box-sizing:border-box}}
    .muted{{color:#555}}button{{padding:.55rem .9rem;margin-top:.8rem}}
  </style>
</head>
<body>
  <h1>Countdown Setup</h1>
  <p class="muted">Enter your network and the date to count down to.</p>
  <div class="card">
    <form method="post" action="/configure">
      <label>Wi-Fi Network Name</label><input name="ssid" type="text">
      <label>Wi-Fi Password</label><input name="password" type="password">
      <label>Timezone (hours from UTC)</label><input name="timezone" type="number" min="{tz_min}" max="{tz_max}" value="0">
      <label>Target Date (MM-DD)</label><input name="target_date" type="text" value="{target_date}">
      <label>Label</label><input name="target_label" type="text" value="{target_label}">
      <button type="submit">Save</button>
    </form>
  </div>
</body>
</html>
"#,
        tz_min = config::TIMEZONE_MIN,
        tz_max = config::TIMEZONE_MAX,
        target_date = config::DEFAULT_TARGET_DATE,
        target_label = config::DEFAULT_TARGET_LABEL,
    )
}

/// The setup form backend. Owns the store and panel for the duration of the
/// provisioning boot; the HTTP front end on each platform delegates here.
pub struct ProvisioningServer<S: ConfigStore, D: Display> {
    store: S,
    display: D,
    complete: bool,
}

impl<S: ConfigStore, D: Display> ProvisioningServer<S, D> {
    pub fn new(store: S, display: D) -> Self {
        Self {
            store,
            display,
            complete: false,
        }
    }

    pub fn index_page(&self) -> String {
        setup_form_page()
    }

    /// Accepts one form submission: decode, persist, confirm on the panel.
    /// The returned page is the browser's confirmation; the caller restarts
    /// after [`RESPONSE_FLUSH_DELAY`].
    pub fn handle_configure(&mut self, body: &str) -> anyhow::Result<String> {
        let config = ProvisioningSubmission::from_body(body).into_configuration();
        info!(
            "saving configuration: ssid=`{}`, timezone={}, target={} `{}`",
            config.ssid, config.timezone, config.target_date, config.target_label
        );

        self.store.save(&config)?;
        // A freshly provisioned device always autostarts, even if the last
        // configured life ended in a safe-mode reset.
        if let Err(err) = self.store.enable_autostart() {
            warn!("failed to re-enable autostart: {err:#}");
        }
        self.display.show_lines(&["Saved.", "Restarting..."])?;
        self.complete = true;
        Ok(SETUP_SAVED_HTML.to_string())
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
