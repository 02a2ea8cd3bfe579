pub mod hash;
pub mod mock;
pub mod notifier;
