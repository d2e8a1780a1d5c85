//! ClassCast Media Model
//!
//! Defines the data contracts shared by the composition pipeline:
//! - **Sources:** tagged camera/screen origins and their descriptors
//! - **Layout:** percentage-based placement entries for the composite frame
//! - **Constraints:** resolution and frame rate requested from capture devices
//! - **Session:** session mode and the user-visible status
//!
//! Layout geometry is expressed in percent of the canvas (`0..=100`) so a
//! layout survives canvas resolution changes.

pub mod constraints;
pub mod layout;
pub mod session;
pub mod source;

pub use constraints::*;
pub use layout::*;
pub use session::*;
pub use source::*;
