//! Domain types shared by the clipbox stores and coordinators
//!
//! - Clip / ClipItem: a bundle of images with shared metadata
//! - ClipRecipe / ImagePayload: the input for creating (or migrating) a clip
//! - Tag / ReferenceTag: permanent tags and their lightweight staging mirror
//! - Album: an ordered, titled set of clips

pub mod album;
pub mod clip;
pub mod recipe;
pub mod tag;

pub use album::*;
pub use clip::*;
pub use recipe::*;
pub use tag::*;
