//! Media inspection model for VPO.
//!
//! An [`Inspection`] is the immutable description of a source media file:
//! container kind, container-level metadata tags, track inventory and
//! plugin-sourced metadata. Policy evaluation never touches the file
//! itself, only this value.

pub mod types;
pub mod view;

pub use types::{
    ContainerKind, FrameRate, Inspection, InspectionError, MetaValue, ProvenanceVerdict, Track,
    TrackKind,
};
pub use view::InspectionView;
