use std::time::Duration;

pub const APP_NAME: &str = "dtseed";

/// Project name used when a BOM carries no usable primary component.
pub const DEFAULT_PROJECT_NAME: &str = "Dependency-Track";

/// Glob suffix of the manifest files picked up from the BOM directory.
pub const BOM_FILE_SUFFIX: &str = ".cdx.json";

pub const DEFAULT_ADMIN_USER: &str = "admin";
/// Password Dependency-Track ships with before the first forced rotation.
pub const INITIAL_ADMIN_PASSWORD: &str = "admin";
pub const ADMIN_TEAM_NAME: &str = "Administrators";

pub const READINESS_TICK: Duration = Duration::from_secs(3);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_DELAY: Duration = Duration::ZERO;

/// Page size used when walking every page of a listing.
pub const FETCH_ALL_PAGE_SIZE: usize = 100;
