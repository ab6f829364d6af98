//! Display resolution

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Resolution reported when the display cannot be queried
pub const FALLBACK_RESOLUTION: Resolution = Resolution {
    width: 1920,
    height: 1080,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Find the first "W x H" pair in free text, e.g.
    /// "Screen 0: minimum 8 x 8, current 2560 x 1440, maximum 32767 x 32767".
    /// Pairs smaller than 320x200 are ignored.
    pub fn find_in(text: &str) -> Option<Self> {
        let tokens: Vec<&str> = text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .collect();

        for (i, token) in tokens.iter().enumerate() {
            if let Some(found) = parse_dimensions(token) {
                return Some(found);
            }
            if matches!(*token, "x" | "X" | "×") && i > 0 && i + 1 < tokens.len() {
                let width = tokens[i - 1].parse::<u32>().ok();
                let height = tokens[i + 1].parse::<u32>().ok();
                if let (Some(width), Some(height)) = (width, height) {
                    if width >= 320 && height >= 200 {
                        return Some(Resolution::new(width, height));
                    }
                }
            }
        }

        None
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts "2560x1440" or a common label such as "1440p", "qhd" or "4k".
impl FromStr for Resolution {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(' ', "");

        let labelled = match normalized.as_str() {
            "720p" | "hd" => Some((1280, 720)),
            "900p" => Some((1600, 900)),
            "1080p" | "fhd" => Some((1920, 1080)),
            "1200p" => Some((1920, 1200)),
            "1440p" | "qhd" | "2k" => Some((2560, 1440)),
            "1600p" => Some((2560, 1600)),
            "1800p" => Some((3200, 1800)),
            "4k" | "2160p" | "uhd" => Some((3840, 2160)),
            "8k" | "4320p" => Some((7680, 4320)),
            _ => None,
        };
        if let Some((width, height)) = labelled {
            return Ok(Resolution::new(width, height));
        }

        parse_dimensions(&normalized)
            .ok_or_else(|| format!("unrecognized resolution '{}' (try 1440p or 2560x1440)", value))
    }
}

fn parse_dimensions(value: &str) -> Option<Resolution> {
    let (width_text, height_text) = value
        .split_once('x')
        .or_else(|| value.split_once('X'))
        .or_else(|| value.split_once('×'))?;
    let width = width_text.parse::<u32>().ok()?;
    let height = height_text.parse::<u32>().ok()?;
    if width < 320 || height < 200 {
        return None;
    }
    Some(Resolution::new(width, height))
}

/// Primary monitor size from the Win32 system metrics.
#[cfg(target_os = "windows")]
pub fn primary_monitor() -> Option<Resolution> {
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN,
    };

    // SAFETY: GetSystemMetrics has no preconditions and only reads system state.
    let (width, height) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
    if width <= 0 || height <= 0 {
        return None;
    }
    Some(Resolution::new(width as u32, height as u32))
}

#[cfg(not(target_os = "windows"))]
pub fn primary_monitor() -> Option<Resolution> {
    None
}
