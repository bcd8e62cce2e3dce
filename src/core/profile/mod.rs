pub mod model;
pub mod store;

pub use model::{
    GameOptions, ModEntry, ModSourceIds, Profile, ProfileUpdate, DEFAULT_PROFILE_ID,
    DEFAULT_PROFILE_NAME,
};
pub use store::ProfileStore;
