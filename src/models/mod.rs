mod feed;
mod item;

pub use feed::{CacheMeta, Feed, RefreshMeta, Validators};
pub use item::{Item, ItemFilter, NewItem};
