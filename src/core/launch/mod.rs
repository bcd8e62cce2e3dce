pub mod fixups;
pub mod task;

pub use fixups::{fixups_for, CommandRunner, FixupOutcome, MacFixups, NoFixups, PlatformFixups};
pub use task::{
    launch, player_uuid, update_client_settings, AuthMode, LaunchContext, LaunchPlan,
    LaunchRequest, LaunchResult,
};
