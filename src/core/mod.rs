pub mod entity;
pub mod error;
pub mod keys;

pub use entity::{Entity, FieldMap, RankedEntity};
pub use error::{Result, StoreError};
pub use keys::KeyLayout;
