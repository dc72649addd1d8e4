use std::collections::HashMap;

use crate::config::{Configuration, TargetDate, DEFAULT_TARGET_LABEL};

/// Decodes one `application/x-www-form-urlencoded` component: `+` becomes a
/// space, then each `%XX` escape becomes the character with hex value `XX`.
/// Malformed escapes (non-hex digits, truncated sequences) pass through
/// verbatim instead of failing.
pub fn decode_component(raw: &str) -> String {
    let replaced = raw.replace('+', " ");
    let chars: Vec<char> = replaced.chars().collect();

    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '%' && i + 2 < chars.len() {
            let hex: String = chars[i + 1..i + 3].iter().collect();
            if let Ok(value) = u8::from_str_radix(&hex, 16) {
                out.push(value as char);
                i += 3;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Splits a form body into decoded key/value pairs. Pairs without an `=` are
/// dropped; the split is on the first `=` only.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    for pair in body.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        fields.insert(decode_component(key), decode_component(value));
    }

    fields
}

/// One decoded provisioning form submission, converted into a Configuration
/// or discarded.
#[derive(Debug)]
pub struct ProvisioningSubmission {
    fields: HashMap<String, String>,
}

impl ProvisioningSubmission {
    pub fn from_body(body: &str) -> Self {
        Self {
            fields: parse_form(body),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Builds the replacement Configuration. Missing keys fall back to the
    /// documented defaults; there is no further validation here — a bad
    /// stored date is caught by `sanitize()` at the next load.
    pub fn into_configuration(self) -> Configuration {
        let mut config = Configuration {
            ssid: self.get("ssid").unwrap_or_default().to_string(),
            password: self.get("password").unwrap_or_default().to_string(),
            timezone: self.get("timezone").unwrap_or("0").parse().unwrap_or(0),
            target_date: self
                .get("target_date")
                .map(TargetDate::parse)
                .and_then(Result::ok)
                .unwrap_or(crate::config::DEFAULT_TARGET_DATE),
            target_label: self
                .get("target_label")
                .filter(|label| !label.trim().is_empty())
                .unwrap_or(DEFAULT_TARGET_LABEL)
                .to_string(),
        };

        config.sanitize();
        config
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DEFAULT_TARGET_DATE;

    #[test]
    fn decodes_plus_and_percent_escapes() {
        assert_eq!(decode_component("My+Router"), "My Router");
        assert_eq!(decode_component("p%40ss"), "p@ss");
        assert_eq!(decode_component("100%25+done"), "100% done");
    }

    #[test]
    fn malformed_escapes_pass_through_verbatim() {
        assert_eq!(decode_component("50%ZZoff"), "50%ZZoff");
        assert_eq!(decode_component("trail%4"), "trail%4");
        assert_eq!(decode_component("end%"), "end%");
    }

    #[test]
    fn form_round_trip_matches_browser_encoding() {
        let fields = parse_form("ssid=My+Router&password=p%40ss&timezone=-5");

        assert_eq!(fields["ssid"], "My Router");
        assert_eq!(fields["password"], "p@ss");
        assert_eq!(fields["timezone"], "-5");
    }

    #[test]
    fn pairs_without_equals_are_dropped() {
        let fields = parse_form("ssid=Net&garbage&label=x");
        assert_eq!(fields.len(), 2);
        assert!(!fields.contains_key("garbage"));
    }

    #[test]
    fn splits_on_first_equals_only() {
        let fields = parse_form("password=a%3Db=c");
        assert_eq!(fields["password"], "a=b=c");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let submission = ProvisioningSubmission::from_body("ssid=HomeNet&password=");
        let config = submission.into_configuration();

        assert_eq!(config.ssid, "HomeNet");
        assert_eq!(config.password, "");
        assert_eq!(config.timezone, 0);
        assert_eq!(config.target_date, DEFAULT_TARGET_DATE);
        assert_eq!(config.target_label, "Event");
    }

    #[test]
    fn full_submission_builds_configuration() {
        let body = "ssid=My+Router&password=p%40ss&timezone=-5&target_date=10-31&target_label=Halloween";
        let config = ProvisioningSubmission::from_body(body).into_configuration();

        assert_eq!(config.ssid, "My Router");
        assert_eq!(config.password, "p@ss");
        assert_eq!(config.timezone, -5);
        assert_eq!(config.target_date, TargetDate { month: 10, day: 31 });
        assert_eq!(config.target_label, "Halloween");
    }

    #[test]
    fn unparseable_date_falls_back_to_default() {
        let config =
            ProvisioningSubmission::from_body("ssid=Net&target_date=31-31").into_configuration();
        assert_eq!(config.target_date, DEFAULT_TARGET_DATE);
    }
}
