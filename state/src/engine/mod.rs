pub mod events;
pub mod gc;
pub mod member;
pub mod message;
pub mod messages;
pub mod permissions;
pub mod shard;
pub mod snapshot;
pub mod tracker;
