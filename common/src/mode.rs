/// The mutually exclusive boot decision. Derived exactly once per boot and
/// never re-derived mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    SafeMode,
    Reconfigure,
    /// A previous safe-mode reset disabled autostart; park passively until
    /// the reconfigure pin clears the marker.
    Recovery,
    Provision,
    Normal,
}

impl BootMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafeMode => "SAFE_MODE",
            Self::Reconfigure => "RECONFIGURE",
            Self::Recovery => "RECOVERY",
            Self::Provision => "PROVISION",
            Self::Normal => "NORMAL",
        }
    }

    /// Priority order: safe-mode pin, then reconfigure pin, then the
    /// autostart marker, then whether a configuration is stored.
    pub fn select(inputs: BootInputs) -> Self {
        if inputs.safe_mode_requested {
            Self::SafeMode
        } else if inputs.reconfigure_requested {
            Self::Reconfigure
        } else if inputs.autostart_disabled {
            Self::Recovery
        } else if !inputs.configuration_present {
            Self::Provision
        } else {
            Self::Normal
        }
    }
}

/// The observations the boot decision is made from: two pin reads, the
/// autostart marker, and the presence of a stored configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootInputs {
    pub safe_mode_requested: bool,
    pub reconfigure_requested: bool,
    pub autostart_disabled: bool,
    pub configuration_present: bool,
}
