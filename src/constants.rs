//! Shared constants used across the application.

/// User agent string presented by both the browser session and the JSON client.
///
/// A realistic desktop Chrome identity; the target serves a login wall or a
/// stripped page to obvious automation.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Application identifier the public web client sends as `X-IG-App-ID`.
pub const DEFAULT_API_APP_ID: &str = "936619743392459";

/// Viewport width of the browser session in pixels.
pub const VIEWPORT_WIDTH: u32 = 1280;

/// Viewport height of the browser session in pixels.
pub const VIEWPORT_HEIGHT: u32 = 800;
