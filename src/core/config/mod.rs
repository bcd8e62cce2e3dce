pub mod store;

pub use store::{
    default_app_dir, resolve_auth_domain, ConfigStore, LauncherConfig, APP_DIR_NAME,
    DEFAULT_AUTH_DOMAIN,
};
