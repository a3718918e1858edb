pub const APP_NAME: &str = "siasync";

pub const SIA_USER_AGENT: &str = "Sia-Agent";
pub const DEFAULT_API_URL: &str = "http://localhost:9980";

pub const GIO_EMBLEMS_ATTRIBUTE: &str = "metadata::emblems";
pub const METADATA_FILE_EXTENSION: &str = "sia";
