mod identity;
mod measure;
mod sync_item;
mod user;

pub use identity::Identity;
pub use measure::MeasureType;
pub use sync_item::SyncItem;
pub use user::{ProfileDefaults, ProfileUpdate, User};
