//! Lifecycle signals from the hosting environment and the driver action
//! each one maps to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::PresenceError;

/// A page/process lifecycle edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    VisibilityHidden,
    VisibilityVisible,
    FocusGained,
    FocusLost,
    PageShow,
    PageHide,
    Unload,
}

/// What the heartbeat driver does in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverAction {
    StartHeartbeat,
    SetOffline,
}

impl LifecycleSignal {
    pub const ALL: [Self; 7] = [
        Self::VisibilityHidden,
        Self::VisibilityVisible,
        Self::FocusGained,
        Self::FocusLost,
        Self::PageShow,
        Self::PageHide,
        Self::Unload,
    ];

    pub fn action(self) -> DriverAction {
        match self {
            Self::VisibilityVisible | Self::FocusGained | Self::PageShow => {
                DriverAction::StartHeartbeat
            }
            Self::VisibilityHidden | Self::FocusLost | Self::PageHide | Self::Unload => {
                DriverAction::SetOffline
            }
        }
    }

    /// Short name as used by the environment (`hidden`, `blur`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VisibilityHidden => "hidden",
            Self::VisibilityVisible => "visible",
            Self::FocusGained => "focus",
            Self::FocusLost => "blur",
            Self::PageShow => "pageshow",
            Self::PageHide => "pagehide",
            Self::Unload => "unload",
        }
    }
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleSignal {
    type Err = PresenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hidden" | "visibility_hidden" => Ok(Self::VisibilityHidden),
            "visible" | "visibility_visible" => Ok(Self::VisibilityVisible),
            "focus" | "focus_gained" => Ok(Self::FocusGained),
            "blur" | "focus_lost" => Ok(Self::FocusLost),
            "pageshow" | "page_show" => Ok(Self::PageShow),
            "pagehide" | "page_hide" => Ok(Self::PageHide),
            "unload" | "beforeunload" => Ok(Self::Unload),
            _ => Err(PresenceError::UnknownSignal(s.to_owned())),
        }
    }
}
