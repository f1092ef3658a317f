//! voxtract-io: Filesystem I/O for voxtract volumes.
//!
//! Reads and writes the `.vxl` JSON volume format and builds the
//! synthetic phantom volumes used by demos and integration tests. This
//! is the only voxtract crate that touches the filesystem; everything
//! it loads feeds the sans-IO pipeline crate.

pub mod phantom;
pub mod volume;

pub use phantom::sphere_phantom;
pub use volume::{LoadError, create_full_mask, load_mask, load_volume, save_mask, save_volume};
