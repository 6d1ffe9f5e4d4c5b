//! Data models for DevFocus entities

mod push;
mod room;
mod task;
mod user;

pub use push::*;
pub use room::*;
pub use task::*;
pub use user::*;

use serde::{Deserialize, Deserializer};

/// Deserialize a nullable field into its default value.
///
/// The server emits `null` for several list fields on rooms created by older
/// builds, which plain `#[serde(default)]` does not cover.
pub(crate) fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}
