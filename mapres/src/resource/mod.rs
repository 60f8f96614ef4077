//! Cached tile resources and their collections.

mod collection;
mod entry;
mod state;
mod symbols;
mod tile;

pub use collection::{CollectionId, TiledCollection};
pub use entry::{EntryBody, ResourceEntry};
pub use state::{ResourceState, StateCell};
pub use symbols::{SymbolsBody, TileSymbols};
pub use tile::TileBody;
